use clap::{Args, Parser, Subcommand, ValueEnum};
use mqtt::{
	broker::{AllowAll, BrokerConfiguration},
	transport::TcpConfiguration,
	Client, ClientConfiguration, QoS, Server,
};
use std::{process, str::from_utf8, time::Duration};
use tokio::{
	io::{self, AsyncBufReadExt, BufReader},
	signal,
	sync::broadcast::error::RecvError,
};
use tracing::subscriber::SetGlobalDefaultError;
use tracing_subscriber::{filter::LevelFilter, EnvFilter};

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
	setup_tracing()?;

	let Arguments { command } = Arguments::parse();
	match command {
		Commands::Sub { connection, topic } => {
			let qos = connection.qos.into();
			let (client, task) = connect(&connection);
			let task = tokio::spawn(task);

			subscribe(&client, topic, qos).await?;
			client.disconnect().await?;
			task.await??;
		}
		Commands::Pub {
			connection,
			count,
			retain,
			topic,
			payload,
		} => {
			let qos = connection.qos.into();
			let (client, task) = connect(&connection);
			let task = tokio::spawn(task);

			match payload {
				Some(payload) => {
					for _ in 0..count.unwrap_or(1) {
						client.publish(topic.as_str(), payload.clone(), qos, retain).await?;
					}
				}
				None => {
					// Publish each line read from stdin, until end-of-stream or
					// `count` lines.
					let mut lines = BufReader::new(io::stdin()).lines();
					let mut published = 0;
					while count.map_or(true, |max| published < max) {
						let Some(line) = lines.next_line().await? else {
							break;
						};
						client.publish(topic.as_str(), line, qos, retain).await?;
						published += 1;
					}
				}
			}

			client.disconnect().await?;
			task.await??;
		}
		Commands::Broker {
			listen,
			max_qos,
			connect_timeout,
		} => {
			let configuration = BrokerConfiguration {
				max_subscription_qos: max_qos.into(),
				connect_timeout: Duration::from_secs(connect_timeout),
				..Default::default()
			};
			broker(configuration, listen).await?;
		}
	}

	Ok(())
}

fn setup_tracing() -> Result<(), SetGlobalDefaultError> {
	let filter = EnvFilter::builder()
		.with_default_directive(LevelFilter::ERROR.into())
		.with_env_var("MQTT_LOG")
		.try_from_env();

	let subscriber = tracing_subscriber::fmt()
		.with_file(true)
		.with_target(false)
		.with_env_filter(filter.unwrap_or_default())
		.finish();

	tracing::subscriber::set_global_default(subscriber)
}

fn connect(connection: &ConnectionArguments) -> (Client, mqtt::Task) {
	let transport = TcpConfiguration {
		host: connection.host.clone(),
		port: connection.port,
		..Default::default()
	};

	let clean_session = !connection.disable_clean_session;
	let configuration = ClientConfiguration {
		keep_alive: connection.keep_alive,
		clean_session,
		client_id: connection
			.id
			.clone()
			.unwrap_or_else(|| default_client_id(clean_session)),
		username: connection.username.clone(),
		password: connection.password.clone(),
		..Default::default()
	};

	mqtt::tcp_client(transport, configuration)
}

/// Prints messages matching `filter` until interrupted.
async fn subscribe(client: &Client, filter: String, qos: QoS) -> anyhow::Result<()> {
	let mut subscription = client.subscribe((filter, qos), 64).await?;
	if subscription.filters().is_empty() {
		anyhow::bail!("subscription refused by the server");
	}

	loop {
		tokio::select! {
			message = subscription.recv() => {
				let Some(message) = message else {
					break;
				};
				println!(
					"{}: {}",
					message.topic,
					from_utf8(&message.payload).unwrap_or_default()
				);
			}
			result = signal::ctrl_c() => {
				result?;
				subscription.unsubscribe().await?;
				break;
			}
		}
	}

	Ok(())
}

async fn broker(configuration: BrokerConfiguration, listen: Vec<String>) -> anyhow::Result<()> {
	let server = Server::new(configuration, AllowAll);
	let mut events = server.events();

	let mut listeners = Vec::with_capacity(listen.len());
	for addr in listen {
		let listener = server.listen(addr.as_str()).await?;
		if let Some(local_addr) = server.local_addr(listener).await {
			tracing::info!(%local_addr, "broker listening");
		}
		listeners.push(listener);
	}

	loop {
		tokio::select! {
			event = events.recv() => match event {
				Ok(event) => tracing::debug!(?event),
				Err(RecvError::Lagged(skipped)) => tracing::warn!(skipped, "event log lagging"),
				Err(RecvError::Closed) => break,
			},
			result = signal::ctrl_c() => {
				result?;
				break;
			}
		}
	}

	for listener in listeners {
		server.close(listener).await?;
	}

	Ok(())
}

/// Persistent sessions need an id which is stable across runs.
fn default_client_id(clean_session: bool) -> String {
	let name = env!("CARGO_PKG_NAME");
	let version = env!("CARGO_PKG_VERSION");
	if clean_session {
		format!("{name}/{version}:{}", process::id())
	} else {
		format!("{name}/{version}")
	}
}

#[derive(Debug, Parser)]
#[command(version, about)]
struct Arguments {
	#[command(subcommand)]
	command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
	/// Subscribe to a topic filter and print the messages received.
	Sub {
		#[command(flatten)]
		connection: ConnectionArguments,

		#[arg(default_value = "#")]
		topic: String,
	},
	/// Publish a message. Without a payload, every line read from stdin is
	/// published.
	Pub {
		#[command(flatten)]
		connection: ConnectionArguments,

		/// Number of times to publish the payload, or the maximum number of
		/// lines to publish from stdin.
		#[arg(long, short = 'C')]
		count: Option<usize>,

		/// Ask the broker to retain the message.
		#[arg(long, short)]
		retain: bool,

		topic: String,

		payload: Option<String>,
	},
	/// Run a broker.
	Broker {
		/// Address to accept connections on. May be repeated.
		#[arg(long, short, default_value = "0.0.0.0:1883")]
		listen: Vec<String>,

		/// Highest QoS granted to subscriptions.
		#[arg(long, value_enum, default_value = "qos2", rename_all = "lower")]
		max_qos: InputQoS,

		/// Seconds a new connection has to send Connect.
		#[arg(long, default_value = "10")]
		connect_timeout: u64,
	},
}

#[derive(Debug, Args)]
struct ConnectionArguments {
	/// MQTT broker to connect to.
	#[arg(long, short = 'H', default_value = "localhost", env = "MQTT_HOST")]
	host: String,

	#[arg(long, short, default_value = "1883", env = "MQTT_PORT")]
	port: u16,

	/// ID to use for this client.
	#[arg(long, short = 'i', env = "MQTT_ID")]
	id: Option<String>,

	#[arg(long, short = 'u', env = "MQTT_USERNAME")]
	username: Option<String>,

	#[arg(long, short = 'P', env = "MQTT_PASSWORD", hide_env_values = true)]
	password: Option<String>,

	/// Keep-alive timeout, in seconds.
	#[arg(short = 'k', default_value = "60")]
	keep_alive: u16,

	/// Disable clean session to enable persistent sessions.
	#[arg(short = 'c')]
	disable_clean_session: bool,

	#[arg(long, value_enum, default_value = "qos0", rename_all = "lower")]
	qos: InputQoS,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum InputQoS {
	Qos0,
	Qos1,
	Qos2,
}

impl From<InputQoS> for QoS {
	fn from(value: InputQoS) -> Self {
		match value {
			InputQoS::Qos0 => QoS::AtMostOnce,
			InputQoS::Qos1 => QoS::AtLeastOnce,
			InputQoS::Qos2 => QoS::ExactlyOnce,
		}
	}
}

#[cfg(test)]
mod tests {
	use super::{default_client_id, Arguments, Commands};
	use clap::{CommandFactory, Parser};

	#[test]
	fn verifies_arguments() {
		Arguments::command().debug_assert();
	}

	#[test]
	fn parses_publish() {
		let arguments =
			Arguments::parse_from(["mqtt", "pub", "-H", "broker", "--qos", "qos1", "a/b", "hi"]);
		let Commands::Pub {
			connection,
			topic,
			payload,
			..
		} = arguments.command
		else {
			panic!("expected pub");
		};
		assert_eq!(connection.host, "broker");
		assert_eq!(topic, "a/b");
		assert_eq!(payload.as_deref(), Some("hi"));
	}

	#[test]
	fn persistent_client_id_is_stable() {
		assert_eq!(default_client_id(false), default_client_id(false));
		assert!(default_client_id(true).ends_with(&std::process::id().to_string()));
	}
}
