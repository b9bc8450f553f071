use crate::{
	authorizer::Verdict,
	config::BrokerConfiguration,
	event::BrokerEvent,
	retained::RetainedStore,
	session::{Session, Subscription},
	transport::{ConnectionId, ListenerId, Transport},
};
use bytes::Bytes;
use mqtt_protocol::{
	misc::Will,
	packets::{
		ConnAck, Connect, PubAck, PubComp, PubRec, PubRel, Publish, SubAck, Subscribe, UnsubAck,
		Unsubscribe, PROTOCOL_NAME,
	},
	serde::SerializeError,
	ConnectReturnCode, FilterBuf, Message, Packet, PacketId, PacketType, QoS, SubscribeFailed,
	Topic, TopicBuf, PROTOCOL_LEVEL,
};
use std::{
	collections::{BTreeMap, BTreeSet, HashMap, VecDeque},
	net::SocketAddr,
	time::{Duration, Instant},
};

#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
	#[error("unknown connection {0}")]
	UnknownConnection(ConnectionId),
	#[error("unknown listener {0}")]
	UnknownListener(ListenerId),
	#[error("no session for client {0:?}")]
	UnknownSession(String),
	#[error("protocol violation: {0}")]
	ProtocolViolation(&'static str),
	#[error("unexpected {0:?} packet from client")]
	UnexpectedPacket(PacketType),
	#[error("no packet identifiers available")]
	PacketIdsExhausted,
	#[error(transparent)]
	Serialize(#[from] SerializeError),
}

#[derive(Debug)]
enum ConnectionState {
	/// Waiting for Connect.
	Pending,
	Active { client_id: String },
}

#[derive(Debug)]
struct Connection<T> {
	transport: T,
	listener: ListenerId,
	state: ConnectionState,
	keep_alive: Option<Duration>,
	deadline: Option<Instant>,
	closing: bool,
}

impl<T: Transport> Connection<T> {
	fn client_id(&self) -> Option<&str> {
		match &self.state {
			ConnectionState::Pending => None,
			ConnectionState::Active { client_id } => Some(client_id),
		}
	}

	fn send(&mut self, packet: &Packet) -> Result<(), SerializeError> {
		let bytes = packet.to_bytes()?;
		if !self.transport.send(bytes) {
			tracing::debug!(packet_type = ?packet.packet_type(), "transport closed, packet dropped");
		}
		Ok(())
	}
}

/// Validates the protocol and client id of a Connect packet, returning the
/// client id to use for the session.
///
/// An empty client id is replaced with a random one when the Client asked for
/// a clean session.
pub(crate) fn check_connect(connect: &Connect) -> Result<String, ConnectReturnCode> {
	if connect.protocol_level != PROTOCOL_LEVEL || connect.protocol_name != PROTOCOL_NAME {
		return Err(ConnectReturnCode::UnacceptableProtocolVersion);
	}

	if connect.client_id.is_empty() {
		if !connect.clean_session {
			return Err(ConnectReturnCode::IdentifierRejected);
		}
		return Ok(uuid::Uuid::new_v4().simple().to_string());
	}

	Ok(connect.client_id.clone())
}

/// Sends `message` to a single session at `qos`, recording it in the
/// session's outbound ledger when it needs acknowledgement.
///
/// Returns the packet identifier used, or 0 for QoS 0.
fn deliver<T: Transport>(
	session: &mut Session,
	connection: &mut Connection<T>,
	message: &Message,
	qos: QoS,
	retain: bool,
) -> Result<u16, BrokerError> {
	let Session {
		outbound,
		packet_ids,
		..
	} = session;

	let mut publish = message
		.to_publish(qos, || packet_ids.next(outbound))
		.ok_or(BrokerError::PacketIdsExhausted)?;
	publish.set_retain(retain);

	let id = publish.id();
	let packet = Packet::from(publish);
	if let Some(id) = id {
		outbound.insert(id, packet.clone());
	}

	connection.send(&packet)?;
	Ok(id.map_or(0, PacketId::get))
}

/// Sans-io MQTT broker.
///
/// The broker owns every accepted connection's [`Transport`] and the
/// sessions, subscriptions and retained messages shared between them. The
/// driver decodes packets, asks an [`Authorizer`](crate::Authorizer) for a
/// [`Verdict`] and hands both to [`handle_packet`](Broker::handle_packet).
/// Time is passed in; the broker never reads a clock.
#[derive(Debug)]
pub struct Broker<T> {
	configuration: BrokerConfiguration,
	listeners: BTreeSet<ListenerId>,
	connections: HashMap<ConnectionId, Connection<T>>,
	sessions: BTreeMap<String, Session>,
	retained: RetainedStore,
	events: VecDeque<BrokerEvent>,
	next_listener: u64,
	next_connection: u64,
}

impl<T: Transport> Broker<T> {
	pub fn new(configuration: BrokerConfiguration) -> Self {
		Self {
			configuration,
			listeners: BTreeSet::new(),
			connections: HashMap::new(),
			sessions: BTreeMap::new(),
			retained: RetainedStore::default(),
			events: VecDeque::new(),
			next_listener: 0,
			next_connection: 0,
		}
	}

	#[inline]
	pub fn configuration(&self) -> &BrokerConfiguration {
		&self.configuration
	}

	#[inline]
	pub fn retained(&self) -> &RetainedStore {
		&self.retained
	}

	pub fn register_listener(&mut self) -> ListenerId {
		let listener = ListenerId(self.next_listener);
		self.next_listener += 1;
		self.listeners.insert(listener);
		listener
	}

	/// Closes every connection accepted on `listener` and forgets it.
	pub fn close_listener(&mut self, listener: ListenerId) -> Result<(), BrokerError> {
		if !self.listeners.remove(&listener) {
			return Err(BrokerError::UnknownListener(listener));
		}

		let accepted: Vec<_> = self
			.connections
			.iter()
			.filter(|(_, connection)| connection.listener == listener)
			.map(|(id, _)| *id)
			.collect();

		tracing::info!(%listener, connections = accepted.len(), "closing listener");
		for id in accepted {
			self.close(id);
		}

		Ok(())
	}

	/// Registers a new connection accepted on `listener`. The Client has
	/// until the connect timeout to send Connect.
	pub fn accept(
		&mut self,
		listener: ListenerId,
		transport: T,
		now: Instant,
	) -> Result<ConnectionId, BrokerError> {
		if !self.listeners.contains(&listener) {
			return Err(BrokerError::UnknownListener(listener));
		}

		let id = ConnectionId(self.next_connection);
		self.next_connection += 1;

		tracing::debug!(connection = %id, %listener, peer = ?transport.peer_address(), "accepted");
		self.connections.insert(
			id,
			Connection {
				transport,
				listener,
				state: ConnectionState::Pending,
				keep_alive: None,
				deadline: Some(now + self.configuration.connect_timeout),
				closing: false,
			},
		);

		Ok(id)
	}

	/// The client id bound to `connection`, once Connect has been accepted.
	pub fn client_id(&self, connection: ConnectionId) -> Option<&str> {
		self.connections.get(&connection)?.client_id()
	}

	pub fn listener(&self, connection: ConnectionId) -> Option<ListenerId> {
		self.connections
			.get(&connection)
			.map(|connection| connection.listener)
	}

	pub fn peer_address(&self, connection: ConnectionId) -> Option<SocketAddr> {
		self.connections.get(&connection)?.transport.peer_address()
	}

	/// Client ids of the sessions with an active connection.
	pub fn clients(&self) -> Vec<String> {
		self.sessions
			.values()
			.filter(|session| session.connection.is_some())
			.map(|session| session.client_id.clone())
			.collect()
	}

	/// Subscriptions held by the session for `client_id`, connected or
	/// parked.
	pub fn subscriptions(&self, client_id: &str) -> Option<&[Subscription]> {
		self.sessions
			.get(client_id)
			.map(|session| session.subscriptions.as_slice())
	}

	/// Closes the connection bound to `client_id`, as if its transport had
	/// been lost. Returns `false` if the client is not connected.
	pub fn disconnect_client(&mut self, client_id: &str) -> bool {
		let Some(connection) = self
			.sessions
			.get(client_id)
			.and_then(|session| session.connection)
		else {
			return false;
		};

		self.close(connection);
		true
	}

	#[inline]
	pub fn poll_event(&mut self) -> Option<BrokerEvent> {
		self.events.pop_front()
	}

	/// Publishes a message originating from the broker itself. It is not
	/// authorized and not retained.
	///
	/// Returns the packet identifier used for each client the message was
	/// sent to, 0 for QoS 0 deliveries.
	pub fn publish(&mut self, topic: &Topic, payload: Bytes) -> BTreeMap<String, u16> {
		let message = Message {
			topic: topic.to_topic_buf(),
			payload,
			qos: QoS::AtMostOnce,
			retain: false,
		};
		self.fan_out(&message)
	}

	/// Handles a packet received on `connection`.
	///
	/// Errors are fatal to the connection, which has been closed by the time
	/// this returns.
	pub fn handle_packet(
		&mut self,
		connection: ConnectionId,
		packet: Packet,
		verdict: Verdict,
		now: Instant,
	) -> Result<(), BrokerError> {
		let result = self.dispatch(connection, packet, verdict, now);
		if let Err(error) = &result {
			tracing::warn!(%connection, %error, "closing connection");
			self.close(connection);
		}
		result
	}

	fn dispatch(
		&mut self,
		id: ConnectionId,
		packet: Packet,
		verdict: Verdict,
		now: Instant,
	) -> Result<(), BrokerError> {
		let connection = self
			.connections
			.get_mut(&id)
			.ok_or(BrokerError::UnknownConnection(id))?;
		if connection.closing {
			return Ok(());
		}

		let Some(client_id) = connection.client_id().map(str::to_owned) else {
			let Packet::Connect(connect) = packet else {
				return Err(BrokerError::ProtocolViolation("first packet must be Connect"));
			};
			return self.handle_connect(id, *connect, verdict, now);
		};

		connection.deadline = connection.keep_alive.map(|timeout| now + timeout);
		self.events.push_back(BrokerEvent::ClientAlive {
			client_id: client_id.clone(),
		});

		tracing::trace!(%client_id, packet_type = ?packet.packet_type(), "received");
		match packet {
			Packet::Connect(_) => Err(BrokerError::ProtocolViolation("second Connect")),
			Packet::Publish(publish) => self.handle_publish(id, &client_id, *publish, verdict),
			Packet::PubAck(PubAck { id: packet_id }) => {
				self.handle_puback(&client_id, packet_id)
			}
			Packet::PubRec(PubRec { id: packet_id }) => {
				self.handle_pubrec(id, &client_id, packet_id)
			}
			Packet::PubRel(PubRel { id: packet_id }) => {
				self.handle_pubrel(id, &client_id, packet_id)
			}
			Packet::PubComp(PubComp { id: packet_id }) => {
				self.handle_pubcomp(&client_id, packet_id)
			}
			Packet::Subscribe(subscribe) => {
				self.handle_subscribe(id, &client_id, *subscribe, verdict)
			}
			Packet::Unsubscribe(unsubscribe) => {
				self.handle_unsubscribe(id, &client_id, *unsubscribe)
			}
			Packet::PingReq => self.send(id, &Packet::PingResp),
			Packet::Disconnect => {
				tracing::debug!(%client_id, "graceful disconnect");
				self.session_mut(&client_id)?.will = None;
				self.close(id);
				Ok(())
			}
			packet => Err(BrokerError::UnexpectedPacket(packet.packet_type())),
		}
	}

	fn handle_connect(
		&mut self,
		id: ConnectionId,
		connect: Connect,
		verdict: Verdict,
		now: Instant,
	) -> Result<(), BrokerError> {
		let (client_id, code) = match check_connect(&connect) {
			Err(code) => (connect.client_id.clone(), code),
			Ok(client_id) => match verdict {
				Verdict::Connect { client_id, code } => (client_id, code),
				_ => (client_id, ConnectReturnCode::Accepted),
			},
		};

		if code != ConnectReturnCode::Accepted {
			tracing::info!(connection = %id, %client_id, %code, "connection refused");
			self.send(
				id,
				&ConnAck {
					session_present: false,
					code,
				}
				.into(),
			)?;
			self.close(id);
			return Ok(());
		}

		let Connect {
			keep_alive,
			clean_session,
			will,
			..
		} = connect;

		let session_present = self.resolve_session(&client_id, clean_session);

		let session = self
			.sessions
			.entry(client_id.clone())
			.or_insert_with(|| Session::new(client_id.clone()));
		session.clean_session = clean_session;
		session.will = will;
		session.connection = Some(id);
		let replay = session.outbound.replay();

		let keep_alive = self.configuration.keep_alive_timeout(keep_alive);
		let connection = self
			.connections
			.get_mut(&id)
			.ok_or(BrokerError::UnknownConnection(id))?;
		connection.state = ConnectionState::Active {
			client_id: client_id.clone(),
		};
		connection.keep_alive = keep_alive;
		connection.deadline = keep_alive.map(|timeout| now + timeout);

		connection.send(
			&ConnAck {
				session_present,
				code: ConnectReturnCode::Accepted,
			}
			.into(),
		)?;
		for packet in &replay {
			connection.send(packet)?;
		}

		tracing::info!(
			%client_id,
			listener = %connection.listener,
			session_present,
			replayed = replay.len(),
			"client connected"
		);
		self.events.push_back(BrokerEvent::ClientConnected {
			client_id,
			listener: connection.listener,
			peer: connection.transport.peer_address(),
			session_present,
		});

		Ok(())
	}

	/// Deals with any session already held for `client_id` before a new
	/// connection binds to it. Returns whether the session is resumed.
	fn resolve_session(&mut self, client_id: &str, clean_session: bool) -> bool {
		let Some(previous) = self.sessions.get(client_id).map(|session| session.connection)
		else {
			return false;
		};

		if clean_session {
			// A full teardown of the previous connection: will, unsubscribes,
			// then disconnect.
			if let Some(previous) = previous {
				if let Some(session) = self.sessions.get_mut(client_id) {
					session.clean_session = true;
				}
				self.close(previous);
			}
			if let Some(session) = self.sessions.remove(client_id) {
				tracing::debug!(%client_id, "discarding stored session");
				self.unsubscribe_all(session);
			}
			return false;
		}

		if let Some(previous) = previous {
			if let Some(mut connection) = self.connections.remove(&previous) {
				tracing::info!(%client_id, connection = %previous, "session taken over");
				connection.closing = true;
				connection.transport.close();
			}
		}
		true
	}

	fn unsubscribe_all(&mut self, session: Session) {
		let Session {
			client_id,
			subscriptions,
			..
		} = session;

		for subscription in subscriptions {
			self.events.push_back(BrokerEvent::ClientUnsubscribed {
				client_id: client_id.clone(),
				filter: subscription.filter,
			});
		}
	}

	fn handle_publish(
		&mut self,
		id: ConnectionId,
		client_id: &str,
		publish: Publish,
		verdict: Verdict,
	) -> Result<(), BrokerError> {
		let session = self.session_mut(client_id)?;
		let (reply, deliver): (Option<Packet>, bool) = match &publish {
			Publish::AtMostOnce { .. } => (None, true),
			Publish::AtLeastOnce { id, .. } => (Some(PubAck { id: *id }.into()), true),
			Publish::ExactlyOnce { id, duplicate, .. } => {
				let reply = PubRec { id: *id };
				if session.inbound.contains(*id) {
					if !duplicate {
						return Err(BrokerError::ProtocolViolation(
							"QoS 2 packet identifier reused before PubRel",
						));
					}
					tracing::debug!(%client_id, %id, "duplicate QoS 2 Publish");
					(Some(reply.into()), false)
				} else {
					session.inbound.insert(*id, reply.into());
					(Some(reply.into()), true)
				}
			}
		};

		if let Some(reply) = reply {
			self.send(id, &reply)?;
		}
		if !deliver {
			return Ok(());
		}

		if verdict == Verdict::Publish(false) {
			tracing::debug!(%client_id, topic = %publish.topic(), "unauthorized Publish dropped");
			return Ok(());
		}

		let message = Message::from(publish);
		if message.retain {
			self.retained.retain(&message);
		}

		tracing::debug!(%client_id, topic = %message.topic, qos = ?message.qos, "publish received");
		self.events.push_back(BrokerEvent::PublishReceived {
			client_id: client_id.to_owned(),
			message: message.clone(),
		});
		self.fan_out(&message);

		Ok(())
	}

	/// Sends `message` to every connected session with a matching
	/// subscription, at the highest QoS among those subscriptions.
	fn fan_out(&mut self, message: &Message) -> BTreeMap<String, u16> {
		let mut deliveries = BTreeMap::new();

		for session in self.sessions.values_mut() {
			let Some(connection) = session
				.connection
				.and_then(|id| self.connections.get_mut(&id))
			else {
				continue;
			};
			if connection.closing {
				continue;
			}

			let Some(qos) = session.matching_qos(&message.topic) else {
				continue;
			};

			match deliver(session, connection, message, qos, false) {
				Ok(packet_id) => {
					if packet_id == 0 {
						self.events.push_back(BrokerEvent::Published {
							client_id: session.client_id.clone(),
							packet_id,
						});
					}
					deliveries.insert(session.client_id.clone(), packet_id);
				}
				Err(error) => {
					tracing::warn!(client_id = %session.client_id, %error, "delivery failed");
				}
			}
		}

		deliveries
	}

	fn handle_puback(&mut self, client_id: &str, id: PacketId) -> Result<(), BrokerError> {
		let session = self.session_mut(client_id)?;
		match session.outbound.get(id) {
			Some(Packet::Publish(publish)) if publish.qos() == QoS::AtLeastOnce => {
				session.outbound.remove(id);
				self.events.push_back(BrokerEvent::Published {
					client_id: client_id.to_owned(),
					packet_id: id.get(),
				});
			}
			_ => tracing::warn!(%client_id, %id, "unsolicited PubAck"),
		}
		Ok(())
	}

	fn handle_pubrec(
		&mut self,
		connection: ConnectionId,
		client_id: &str,
		id: PacketId,
	) -> Result<(), BrokerError> {
		let session = self.session_mut(client_id)?;
		match session.outbound.get(id) {
			Some(Packet::Publish(publish)) if publish.qos() == QoS::ExactlyOnce => {
				session.outbound.insert(id, PubRel { id }.into());
			}
			Some(Packet::PubRel(_)) => {}
			_ => tracing::warn!(%client_id, %id, "unsolicited PubRec"),
		}
		self.send(connection, &PubRel { id }.into())
	}

	fn handle_pubrel(
		&mut self,
		connection: ConnectionId,
		client_id: &str,
		id: PacketId,
	) -> Result<(), BrokerError> {
		if self.session_mut(client_id)?.inbound.remove(id).is_none() {
			tracing::debug!(%client_id, %id, "PubRel for unknown packet identifier");
		}
		self.send(connection, &PubComp { id }.into())
	}

	fn handle_pubcomp(&mut self, client_id: &str, id: PacketId) -> Result<(), BrokerError> {
		let session = self.session_mut(client_id)?;
		match session.outbound.get(id) {
			Some(Packet::PubRel(_)) => {
				session.outbound.remove(id);
				self.events.push_back(BrokerEvent::Published {
					client_id: client_id.to_owned(),
					packet_id: id.get(),
				});
			}
			_ => tracing::warn!(%client_id, %id, "unsolicited PubComp"),
		}
		Ok(())
	}

	fn handle_subscribe(
		&mut self,
		connection: ConnectionId,
		client_id: &str,
		subscribe: Subscribe,
		verdict: Verdict,
	) -> Result<(), BrokerError> {
		let granted = |index: usize| match &verdict {
			Verdict::Allow => true,
			Verdict::Subscribe(granted) => granted.get(index).copied().unwrap_or(false),
			_ => false,
		};

		let max_qos = self.configuration.max_subscription_qos;
		let session = self
			.sessions
			.get_mut(client_id)
			.ok_or_else(|| BrokerError::UnknownSession(client_id.to_owned()))?;

		let mut result = Vec::with_capacity(subscribe.filters.len());
		let mut accepted = Vec::new();
		for (index, (filter, qos)) in subscribe.filters.into_iter().enumerate() {
			if !granted(index) {
				tracing::debug!(%client_id, %filter, "subscription not authorized");
				result.push(Err(SubscribeFailed));
				continue;
			}

			let Ok(filter) = FilterBuf::new(filter) else {
				tracing::debug!(%client_id, "invalid topic filter");
				result.push(Err(SubscribeFailed));
				continue;
			};

			let qos = qos.min(max_qos);
			session.subscribe(filter.clone(), qos);
			self.events.push_back(BrokerEvent::ClientSubscribed {
				client_id: client_id.to_owned(),
				filter: filter.clone(),
				qos,
			});
			accepted.push(filter);
			result.push(Ok(qos));
		}

		self.send(
			connection,
			&SubAck {
				id: subscribe.id,
				result,
			}
			.into(),
		)?;

		self.deliver_retained(connection, client_id, &accepted)
	}

	/// Sends each retained message matching one of `filters` once, marked as
	/// retained.
	fn deliver_retained(
		&mut self,
		id: ConnectionId,
		client_id: &str,
		filters: &[FilterBuf],
	) -> Result<(), BrokerError> {
		let mut messages: BTreeMap<&TopicBuf, &Message> = BTreeMap::new();
		for filter in filters {
			messages.extend(
				self.retained
					.matching(filter)
					.map(|message| (&message.topic, message)),
			);
		}
		if messages.is_empty() {
			return Ok(());
		}

		let session = self
			.sessions
			.get_mut(client_id)
			.ok_or_else(|| BrokerError::UnknownSession(client_id.to_owned()))?;
		let connection = self
			.connections
			.get_mut(&id)
			.ok_or(BrokerError::UnknownConnection(id))?;

		for message in messages.into_values() {
			let Some(granted) = session.matching_qos_among(filters, &message.topic) else {
				continue;
			};

			let packet_id = deliver(session, connection, message, granted.min(message.qos), true)?;
			if packet_id == 0 {
				self.events.push_back(BrokerEvent::Published {
					client_id: client_id.to_owned(),
					packet_id,
				});
			}
		}

		Ok(())
	}

	fn handle_unsubscribe(
		&mut self,
		connection: ConnectionId,
		client_id: &str,
		unsubscribe: Unsubscribe,
	) -> Result<(), BrokerError> {
		let session = self
			.sessions
			.get_mut(client_id)
			.ok_or_else(|| BrokerError::UnknownSession(client_id.to_owned()))?;

		for filter in &unsubscribe.filters {
			if let Some(subscription) = session.unsubscribe(filter) {
				self.events.push_back(BrokerEvent::ClientUnsubscribed {
					client_id: client_id.to_owned(),
					filter: subscription.filter,
				});
			}
		}

		self.send(connection, &UnsubAck { id: unsubscribe.id }.into())
	}

	/// Closes `connection`.
	///
	/// If the connection is bound to a session, the will is published, a
	/// clean session is discarded and any other is kept for resumption, and
	/// [`ClientDisconnected`](BrokerEvent::ClientDisconnected) is emitted.
	/// Closing a connection twice is a no-op.
	pub fn close(&mut self, id: ConnectionId) {
		let Some(connection) = self.connections.get_mut(&id) else {
			return;
		};
		if connection.closing {
			return;
		}

		connection.closing = true;
		connection.transport.close();

		if let Some(client_id) = connection.client_id().map(str::to_owned) {
			self.end_session(id, &client_id);
		}

		self.connections.remove(&id);
		tracing::debug!(connection = %id, "connection closed");
	}

	fn end_session(&mut self, id: ConnectionId, client_id: &str) {
		let Some(session) = self
			.sessions
			.get_mut(client_id)
			.filter(|session| session.connection == Some(id))
		else {
			return;
		};

		let will = session.will.take();
		if let Some(Will {
			topic,
			payload,
			qos,
			retain,
		}) = will
		{
			tracing::debug!(%client_id, %topic, "publishing will");
			let message = Message {
				topic,
				payload,
				qos,
				retain,
			};
			if message.retain {
				self.retained.retain(&message);
			}
			self.fan_out(&message);
		}

		let clean_session = self
			.sessions
			.get(client_id)
			.is_some_and(|session| session.clean_session);
		if clean_session {
			if let Some(session) = self.sessions.remove(client_id) {
				self.unsubscribe_all(session);
			}
		} else if let Some(session) = self.sessions.get_mut(client_id) {
			session.connection = None;
		}

		tracing::info!(%client_id, clean_session, "client disconnected");
		self.events.push_back(BrokerEvent::ClientDisconnected {
			client_id: client_id.to_owned(),
		});
	}

	/// When `connection` times out, if it has not sent a packet in time.
	pub fn deadline(&self, connection: ConnectionId) -> Option<Instant> {
		self.connections.get(&connection)?.deadline
	}

	/// The earliest deadline of any connection.
	pub fn next_timeout(&self) -> Option<Instant> {
		self.connections
			.values()
			.filter_map(|connection| connection.deadline)
			.min()
	}

	/// Closes `connection` if its deadline has passed. Returns whether it was
	/// closed.
	pub fn handle_timeout(&mut self, connection: ConnectionId, now: Instant) -> bool {
		if !self.deadline(connection).is_some_and(|deadline| deadline <= now) {
			return false;
		}

		tracing::warn!(%connection, client_id = ?self.client_id(connection), "connection timed out");
		self.close(connection);
		true
	}

	/// Closes every connection whose deadline has passed.
	pub fn check_timeouts(&mut self, now: Instant) -> Vec<ConnectionId> {
		let expired: Vec<_> = self
			.connections
			.iter()
			.filter(|(_, connection)| connection.deadline.is_some_and(|deadline| deadline <= now))
			.map(|(id, _)| *id)
			.collect();

		for id in &expired {
			self.handle_timeout(*id, now);
		}
		expired
	}

	fn session_mut(&mut self, client_id: &str) -> Result<&mut Session, BrokerError> {
		self.sessions
			.get_mut(client_id)
			.ok_or_else(|| BrokerError::UnknownSession(client_id.to_owned()))
	}

	fn send(&mut self, id: ConnectionId, packet: &Packet) -> Result<(), BrokerError> {
		let connection = self
			.connections
			.get_mut(&id)
			.ok_or(BrokerError::UnknownConnection(id))?;
		connection.send(packet)?;
		Ok(())
	}
}
