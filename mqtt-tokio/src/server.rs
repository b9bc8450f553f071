use crate::connection::{self, ConnectionHandle};
use bytes::Bytes;
use mqtt_broker::{
	Authorizer, Broker, BrokerConfiguration, BrokerError, BrokerEvent, ConnectionId, ListenerId,
	Subscription,
};
use mqtt_protocol::Topic;
use std::{
	collections::{BTreeMap, HashMap},
	io,
	net::SocketAddr,
	sync::Arc,
	time::Duration,
};
use tokio::{
	net::{TcpListener, ToSocketAddrs},
	sync::{broadcast, Mutex},
	task::AbortHandle,
};

const EVENT_CAPACITY: usize = 1024;

#[derive(Debug, thiserror::Error)]
pub enum ServerError {
	#[error(transparent)]
	Io(#[from] io::Error),
	#[error(transparent)]
	Broker(#[from] BrokerError),
}

#[derive(Debug)]
pub(crate) struct Shared<A> {
	pub broker: Mutex<Broker<ConnectionHandle>>,
	pub authorizer: A,
	events: broadcast::Sender<BrokerEvent>,
	listeners: Mutex<HashMap<ListenerId, (SocketAddr, AbortHandle)>>,
}

impl<A> Shared<A> {
	/// Hands the broker's pending events to subscribers of
	/// [`Server::events`].
	pub fn forward_events(&self, broker: &mut Broker<ConnectionHandle>) {
		while let Some(event) = broker.poll_event() {
			tracing::trace!(?event);
			// Nobody listening.
			let _ = self.events.send(event);
		}
	}

	pub async fn close(&self, connection: ConnectionId) {
		let mut broker = self.broker.lock().await;
		broker.close(connection);
		self.forward_events(&mut broker);
	}
}

/// An MQTT broker serving TCP listeners on the tokio runtime.
///
/// Cloning a `Server` yields another handle to the same broker.
///
/// # Example
/// ```no_run
/// # tokio_test::block_on(async {
/// use mqtt_broker::{AllowAll, BrokerConfiguration};
///
/// let server = mqtt_tokio::Server::new(BrokerConfiguration::default(), AllowAll);
/// let listener = server.listen("0.0.0.0:1883").await.unwrap();
/// println!("listening on {:?}", server.local_addr(listener).await);
/// # });
/// ```
#[derive(Debug)]
pub struct Server<A> {
	shared: Arc<Shared<A>>,
}

impl<A> Clone for Server<A> {
	fn clone(&self) -> Self {
		Self {
			shared: Arc::clone(&self.shared),
		}
	}
}

impl<A> Server<A>
where
	A: Authorizer + Send + Sync + 'static,
{
	pub fn new(configuration: BrokerConfiguration, authorizer: A) -> Self {
		let (events, _) = broadcast::channel(EVENT_CAPACITY);
		Self {
			shared: Arc::new(Shared {
				broker: Mutex::new(Broker::new(configuration)),
				authorizer,
				events,
				listeners: Mutex::new(HashMap::new()),
			}),
		}
	}

	/// Binds a TCP listener to `addr` and starts accepting connections.
	///
	/// Must be called from within a tokio runtime.
	pub async fn listen(&self, addr: impl ToSocketAddrs) -> Result<ListenerId, ServerError> {
		let socket = TcpListener::bind(addr).await?;
		let local_addr = socket.local_addr()?;

		let id = self.shared.broker.lock().await.register_listener();
		let accept = tokio::spawn(accept_loop(Arc::clone(&self.shared), id, socket));

		tracing::info!(listener = %id, %local_addr, "listening");
		self.shared
			.listeners
			.lock()
			.await
			.insert(id, (local_addr, accept.abort_handle()));

		Ok(id)
	}

	/// The address `listener` is bound to.
	pub async fn local_addr(&self, listener: ListenerId) -> Option<SocketAddr> {
		let listeners = self.shared.listeners.lock().await;
		listeners.get(&listener).map(|(addr, _)| *addr)
	}

	/// Stops accepting connections on `listener` and closes those it
	/// accepted.
	pub async fn close(&self, listener: ListenerId) -> Result<(), ServerError> {
		if let Some((local_addr, accept)) = self.shared.listeners.lock().await.remove(&listener) {
			tracing::info!(%listener, %local_addr, "stopped listening");
			accept.abort();
		}

		let mut broker = self.shared.broker.lock().await;
		let result = broker.close_listener(listener);
		self.shared.forward_events(&mut broker);
		Ok(result?)
	}

	/// Publishes `payload` on `topic` to every matching subscription, as the
	/// broker itself.
	///
	/// Returns the clients the message was sent to and the packet identifier
	/// used for each.
	pub async fn publish(
		&self,
		topic: &Topic,
		payload: impl Into<Bytes>,
	) -> BTreeMap<String, u16> {
		let mut broker = self.shared.broker.lock().await;
		let delivered = broker.publish(topic, payload.into());
		self.shared.forward_events(&mut broker);
		delivered
	}

	/// Client ids of the connected clients.
	pub async fn clients(&self) -> Vec<String> {
		self.shared.broker.lock().await.clients()
	}

	pub async fn subscriptions(&self, client_id: &str) -> Option<Vec<Subscription>> {
		let broker = self.shared.broker.lock().await;
		broker.subscriptions(client_id).map(<[_]>::to_vec)
	}

	/// Drops the connection of `client_id`. Its will is published. Returns
	/// `false` if the client is not connected.
	pub async fn disconnect_client(&self, client_id: &str) -> bool {
		let mut broker = self.shared.broker.lock().await;
		let disconnected = broker.disconnect_client(client_id);
		self.shared.forward_events(&mut broker);
		disconnected
	}

	/// Subscribes to the broker's events. A receiver which falls more than
	/// a thousand events behind will skip the oldest.
	pub fn events(&self) -> broadcast::Receiver<BrokerEvent> {
		self.shared.events.subscribe()
	}
}

async fn accept_loop<A>(shared: Arc<Shared<A>>, listener: ListenerId, socket: TcpListener)
where
	A: Authorizer + Send + Sync + 'static,
{
	loop {
		match socket.accept().await {
			Ok((stream, peer)) => {
				tracing::debug!(%listener, %peer, "accepted connection");
				tokio::spawn(connection::run(Arc::clone(&shared), listener, stream, peer));
			}
			Err(error) => {
				// Usually out of file descriptors, give some connections a
				// chance to close.
				tracing::error!(%listener, %error, "accept failed");
				tokio::time::sleep(Duration::from_millis(100)).await;
			}
		}
	}
}

#[cfg(test)]
mod tests {
	use super::Server;
	use crate::tcp_client;
	use mqtt_broker::{AllowAll, BrokerConfiguration, BrokerEvent, Policy, PolicyAuthorizer};
	use mqtt_client::{transport::TcpConfiguration, ClientConfiguration, StateError};
	use mqtt_protocol::{ConnectReturnCode, FilterBuf, QoS, Topic};
	use std::net::SocketAddr;

	fn transport(addr: SocketAddr) -> TcpConfiguration {
		TcpConfiguration {
			host: addr.ip().to_string(),
			port: addr.port(),
			linger: false,
		}
	}

	fn configuration(client_id: &str) -> ClientConfiguration {
		ClientConfiguration {
			client_id: client_id.into(),
			reconnect: false,
			..Default::default()
		}
	}

	#[tokio::test]
	async fn relays_messages_between_clients() {
		let server = Server::new(BrokerConfiguration::default(), AllowAll);
		let mut events = server.events();
		let listener = server.listen("127.0.0.1:0").await.unwrap();
		let addr = server.local_addr(listener).await.unwrap();

		let (subscriber, task) = tcp_client(transport(addr), configuration("subscriber"));
		tokio::spawn(task);
		let mut subscription = subscriber
			.subscribe(("a/+", QoS::AtLeastOnce), 4)
			.await
			.unwrap();
		assert_eq!(
			subscription.filters(),
			[(FilterBuf::new("a/+").unwrap(), QoS::AtLeastOnce)]
		);

		let (publisher, task) = tcp_client(transport(addr), configuration("publisher"));
		let publisher_task = tokio::spawn(task);
		publisher
			.publish("a/b", "hello", QoS::AtLeastOnce, true)
			.await
			.unwrap();

		let message = subscription.recv().await.unwrap();
		assert_eq!(message.topic.as_str(), "a/b");
		assert_eq!(&message.payload[..], b"hello");
		assert!(!message.retain);

		let mut clients = server.clients().await;
		clients.sort();
		assert_eq!(clients, ["publisher", "subscriber"]);
		assert_eq!(server.subscriptions("subscriber").await.unwrap().len(), 1);

		// A later subscriber receives the retained message.
		let (late, task) = tcp_client(transport(addr), configuration("late"));
		tokio::spawn(task);
		let mut retained = late.subscribe("a/b", 4).await.unwrap();
		let message = retained.recv().await.unwrap();
		assert_eq!(&message.payload[..], b"hello");
		assert!(message.retain);

		publisher.disconnect().await.unwrap();
		publisher_task.await.unwrap().unwrap();

		let mut received = false;
		while let Ok(event) = events.try_recv() {
			if let BrokerEvent::PublishReceived { client_id, message } = event {
				assert_eq!(client_id, "publisher");
				assert_eq!(message.topic.as_str(), "a/b");
				received = true;
			}
		}
		assert!(received);
	}

	#[tokio::test]
	async fn publishes_from_server() {
		let server = Server::new(BrokerConfiguration::default(), AllowAll);
		let listener = server.listen("127.0.0.1:0").await.unwrap();
		let addr = server.local_addr(listener).await.unwrap();

		let (client, task) = tcp_client(transport(addr), configuration("client"));
		tokio::spawn(task);
		let mut subscription = client.subscribe("status", 4).await.unwrap();

		let delivered = server
			.publish(Topic::from_static("status"), "up")
			.await;
		assert_eq!(delivered.get("client"), Some(&0));
		assert_eq!(&subscription.recv().await.unwrap().payload[..], b"up");

		assert!(server.disconnect_client("client").await);
		assert!(!server.disconnect_client("client").await);
	}

	#[tokio::test]
	async fn refuses_unknown_clients() {
		let mut authorizer = PolicyAuthorizer::new();
		authorizer.add_policy(
			"known",
			Policy {
				username: "user".into(),
				password: "secret".into(),
				..Default::default()
			},
		);

		let server = Server::new(BrokerConfiguration::default(), authorizer);
		let listener = server.listen("127.0.0.1:0").await.unwrap();
		let addr = server.local_addr(listener).await.unwrap();

		// The handle must outlive the task, or the client disconnects.
		let (_client, task) = tcp_client(transport(addr), configuration("stranger"));
		let error = task.await.unwrap_err();
		assert!(matches!(
			error.downcast_ref::<StateError>(),
			Some(StateError::ConnectionRefused(
				ConnectReturnCode::NotAuthorized
			))
		));

		server.close(listener).await.unwrap();
		assert_eq!(server.local_addr(listener).await, None);
		assert!(server.close(listener).await.is_err());
	}
}
