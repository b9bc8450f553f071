use crate::{packet_stream::PacketStream, router::Router, Command, CommandRx};
use mqtt_client::{
	command::Issued,
	transport::TcpConfiguration,
	ClientSession, Event, StateError,
};
use std::{
	io,
	ops::ControlFlow::{self, Break, Continue},
	time::Instant,
};
use tokio::{net::TcpStream, time};

/// Drives `session` over TCP until the client disconnects, the Server refuses
/// the connection, or the connection is lost with reconnection disabled.
#[tracing::instrument(skip_all, fields(host = %transport.host, port = transport.port), err)]
pub(crate) async fn client_task(
	transport: TcpConfiguration,
	mut session: ClientSession,
	mut commands: CommandRx,
) -> anyhow::Result<()> {
	let mut router = Router::default();

	loop {
		if let Some(reconnect_at) = session.reconnect_at() {
			time::sleep_until(reconnect_at.into()).await;
		}

		let stream = match TcpStream::connect((transport.host.as_str(), transport.port)).await {
			Ok(stream) => stream,
			Err(error) => {
				tracing::error!(%error, "error connecting to host");
				if session.connection_lost(Instant::now()).is_none() {
					return Err(error.into());
				}
				continue;
			}
		};

		if transport.linger {
			stream.set_linger(session.configuration().keep_alive())?;
		}

		session.connection_established()?;
		let mut stream = PacketStream::new(stream, 8 * 1024);

		let result = connected(&mut session, &mut router, &mut commands, &mut stream).await;
		let _ = stream.shutdown().await;
		let reconnect_at = session.connection_lost(Instant::now());
		dispatch_events(&mut session, &mut router).await?;

		match result {
			Ok(Break(())) => {
				tracing::info!("client shutdown");
				return Ok(());
			}
			Ok(Continue(())) => tracing::warn!("connection reset by peer"),
			Err(TaskError::State(error @ StateError::ConnectionRefused(_))) => {
				return Err(error.into());
			}
			Err(error) => tracing::warn!(%error, "connection failed"),
		}

		if reconnect_at.is_none() {
			anyhow::bail!("connection lost");
		}
	}
}

#[derive(Debug, thiserror::Error)]
enum TaskError {
	#[error(transparent)]
	State(#[from] StateError),
	#[error(transparent)]
	Stream(#[from] crate::packet_stream::PacketStreamError),
	#[error(transparent)]
	Io(#[from] io::Error),
}

/// Runs one connection. Returns `Break` once the client has disconnected and
/// `Continue` if the Server closed the connection.
async fn connected(
	session: &mut ClientSession,
	router: &mut Router,
	commands: &mut CommandRx,
	stream: &mut PacketStream<TcpStream>,
) -> Result<ControlFlow<()>, TaskError> {
	loop {
		dispatch_events(session, router).await?;
		flush(session, stream).await?;

		let timeout = session.poll_timeout();

		#[rustfmt::skip]
		tokio::select! {
			command = commands.recv() => {
				// Every client handle has been dropped.
				let Some(command) = command else {
					session.disconnect()?;
					flush(session, stream).await?;
					return Ok(Break(()));
				};

				if process_command(session, router, *command)? {
					flush(session, stream).await?;
					return Ok(Break(()));
				}
			}
			packet = stream.read_packet() => {
				let Some(packet) = packet? else {
					return Ok(Continue(()));
				};
				session.handle_packet(packet, Instant::now())?;
			}
			_ = time::sleep_until(timeout.map_or_else(time::Instant::now, time::Instant::from_std)), if timeout.is_some() => {
				session.handle_timeout(Instant::now())?;
			}
		}
	}
}

/// Returns `true` when the command ends the client.
fn process_command(
	session: &mut ClientSession,
	router: &mut Router,
	command: Command,
) -> Result<bool, StateError> {
	tracing::debug!(?command);
	let disconnect = matches!(command, Command::Disconnect);
	match command.issue(session) {
		Ok(Issued::Complete(reply)) => {
			let _ = reply.send(());
		}
		Ok(Issued::Publish { id, reply }) => router.publish_sent(id, reply),
		Ok(Issued::Subscribe {
			id,
			filters,
			messages,
			reply,
		}) => router.subscribe_sent(id, filters, messages, reply),
		Ok(Issued::Unsubscribe { id, filters, reply }) => router.unsubscribe_sent(id, filters, reply),
		Ok(Issued::Disconnect) => return Ok(true),
		Err(error) if disconnect => return Err(error),
		Err(error) => tracing::error!(%error, "command failed"),
	}

	Ok(false)
}

async fn dispatch_events(session: &mut ClientSession, router: &mut Router) -> Result<(), StateError> {
	while let Some(event) = session.poll_event() {
		match event {
			Event::Connected { session_present } => {
				tracing::info!(session_present, "connected");

				// The Server forgot our subscriptions, request them again.
				let filters = router.resubscribe_filters();
				if !session_present && !filters.is_empty() {
					let id = session.subscribe(filters.clone())?;
					router.resubscribe_sent(id, filters);
				}
			}
			Event::ConnectionRefused(code) => tracing::error!(%code, "connection refused"),
			Event::Disconnected => tracing::info!("disconnected"),
			Event::Message(message) => router.route(message).await,
			Event::Published { id: Some(id) } => router.published(id),
			Event::Published { id: None } => {}
			Event::Subscribed { id, result } => router.subscribed(id, result),
			Event::Unsubscribed { id } => router.unsubscribed(id),
		}
	}

	Ok(())
}

async fn flush(session: &mut ClientSession, stream: &mut PacketStream<TcpStream>) -> io::Result<()> {
	if let Some(bytes) = session.take_outgoing(Instant::now()) {
		stream.write(bytes).await?;
	}
	Ok(())
}
