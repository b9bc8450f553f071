use crate::{client_configuration::ClientConfiguration, holdoff::HoldOff};
use bytes::{Buf, Bytes, BytesMut};
use mqtt_protocol::{
	packets::{
		ConnAck, ConnectReturnCode, DeserializeError, PubAck, PubComp, PubRec, PubRel, Publish,
		SubAck, Subscribe, UnsubAck, Unsubscribe,
	},
	serde::SerializeError,
	FilterBuf, Message, Packet, PacketId, PacketIdAllocator, PacketType, QoS,
	RetransmissionLedger, SubscribeReturnCode, TopicBuf,
};
use std::{collections::VecDeque, time::Instant};

#[derive(Debug, thiserror::Error)]
pub enum StateError {
	#[error("malformed packet: {0}")]
	Deserialize(#[from] DeserializeError),
	#[error("failed to serialize packet: {0}")]
	Serialize(#[from] SerializeError),
	#[error("connection refused: {0}")]
	ConnectionRefused(ConnectReturnCode),
	#[error("unsolicited {0:?} packet")]
	Unsolicited(PacketType),
	/// The Client received a packet that the Server should not send.
	#[error("unexpected {0:?} packet")]
	InvalidPacket(PacketType),
	#[error("protocol error: {0}")]
	ProtocolError(&'static str),
	#[error("client is not connected")]
	NotConnected,
	#[error("no packet identifiers available")]
	PacketIdsExhausted,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionState {
	Disconnected,
	/// Connect sent, waiting for ConnAck.
	Connecting,
	Connected,
	/// Disconnect sent, waiting for the transport to close.
	Disconnecting,
	/// Waiting for the back-off delay before opening a new transport.
	Reconnecting,
}

/// Notifications for the application, collected with
/// [`ClientSession::poll_event`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Event {
	Connected { session_present: bool },
	ConnectionRefused(ConnectReturnCode),
	Disconnected,
	Message(Message),
	/// A publish completed. `id` is `None` for [`QoS::AtMostOnce`].
	Published { id: Option<PacketId> },
	Subscribed {
		id: PacketId,
		result: Vec<SubscribeReturnCode>,
	},
	Unsubscribed { id: PacketId },
}

/// MQTT client session.
///
/// The session performs no I/O and never reads the clock. The driver feeds it
/// received bytes and the current time, writes out whatever
/// [`take_outgoing`](Self::take_outgoing) returns, and sleeps until
/// [`poll_timeout`](Self::poll_timeout).
#[derive(Debug)]
pub struct ClientSession {
	configuration: ClientConfiguration,
	state: ConnectionState,

	outgoing: BytesMut,
	incoming: BytesMut,
	events: VecDeque<Event>,

	/// Our own unacknowledged Publish, PubRel, Subscribe and Unsubscribe
	/// packets.
	outbound: RetransmissionLedger,

	/// QoS 2 messages received from the Server and awaiting PubRel.
	inbound: RetransmissionLedger,
	packet_ids: PacketIdAllocator,

	/// Outbound ledger entries to resend once the current connection is
	/// accepted.
	replay: Vec<PacketId>,

	/// Clean session flag for the next Connect. Automatic reconnections
	/// always resume the existing session.
	clean_session: bool,
	hold_off: HoldOff,
	reconnect_at: Option<Instant>,
	ping_at: Option<Instant>,
}

impl ClientSession {
	pub fn new(configuration: ClientConfiguration) -> Self {
		let hold_off = HoldOff::new(configuration.reconnect_delay.clone());
		let clean_session = configuration.clean_session;

		Self {
			configuration,
			state: ConnectionState::Disconnected,
			outgoing: BytesMut::new(),
			incoming: BytesMut::new(),
			events: VecDeque::new(),
			outbound: RetransmissionLedger::new(),
			inbound: RetransmissionLedger::new(),
			packet_ids: PacketIdAllocator::new(),
			replay: Vec::new(),
			clean_session,
			hold_off,
			reconnect_at: None,
			ping_at: None,
		}
	}

	#[inline]
	pub fn state(&self) -> ConnectionState {
		self.state
	}

	#[inline]
	pub fn configuration(&self) -> &ClientConfiguration {
		&self.configuration
	}

	/// Number of our packets awaiting acknowledgement.
	#[inline]
	pub fn in_flight(&self) -> usize {
		self.outbound.len()
	}

	/// Called once the transport to the Server is open. Queues the Connect
	/// packet.
	pub fn connection_established(&mut self) -> Result<(), StateError> {
		match self.state {
			ConnectionState::Disconnected | ConnectionState::Reconnecting => {}
			_ => return Err(StateError::ProtocolError("connection already established")),
		}

		self.incoming.clear();
		self.outgoing.clear();
		self.reconnect_at = None;
		self.ping_at = None;
		self.replay = self.outbound.pending().map(|(id, _)| id).collect();

		let connect = self.configuration.connect_packet(self.clean_session);
		tracing::debug!(client_id = %connect.client_id, clean_session = connect.clean_session, "connecting");
		self.enqueue_packet(&connect.into())?;
		self.state = ConnectionState::Connecting;
		Ok(())
	}

	/// Feeds bytes received from the transport into the session.
	pub fn handle_bytes(&mut self, bytes: &[u8], now: Instant) -> Result<(), StateError> {
		self.incoming.extend_from_slice(bytes);
		while let Some((consumed, packet)) = Packet::decode(&self.incoming)? {
			self.incoming.advance(consumed);
			self.handle_packet(packet, now)?;
		}
		Ok(())
	}

	/// Processes a single packet received from the Server.
	///
	/// An error means the connection must be closed.
	pub fn handle_packet(&mut self, packet: Packet, now: Instant) -> Result<(), StateError> {
		tracing::trace!(packet_type = ?packet.packet_type(), "received");

		match self.state {
			ConnectionState::Connecting => match packet {
				Packet::ConnAck(connack) => self.connack(connack, now),
				packet => Err(StateError::InvalidPacket(packet.packet_type())),
			},
			ConnectionState::Connected | ConnectionState::Disconnecting => match packet {
				Packet::Publish(publish) => self.handle_publish(*publish),
				Packet::PubAck(PubAck { id }) => {
					self.complete_publish(id, QoS::AtLeastOnce);
					Ok(())
				}
				Packet::PubRec(PubRec { id }) => self.pubrec(id),
				Packet::PubRel(PubRel { id }) => self.pubrel(id),
				Packet::PubComp(PubComp { id }) => {
					self.complete_publish(id, QoS::ExactlyOnce);
					Ok(())
				}
				Packet::SubAck(suback) => self.suback(*suback),
				Packet::UnsubAck(unsuback) => self.unsuback(unsuback),
				Packet::PingResp => Ok(()),
				packet => Err(StateError::InvalidPacket(packet.packet_type())),
			},
			ConnectionState::Disconnected | ConnectionState::Reconnecting => {
				Err(StateError::NotConnected)
			}
		}
	}

	/// Publishes a message.
	///
	/// Returns the packet identifier for [`AtLeastOnce`] and [`ExactlyOnce`]
	/// publishes; completion is reported with [`Event::Published`]. An
	/// [`AtMostOnce`] publish completes immediately.
	///
	/// [`AtMostOnce`]: QoS#variant.AtMostOnce
	/// [`AtLeastOnce`]: QoS#variant.AtLeastOnce
	/// [`ExactlyOnce`]: QoS#variant.ExactlyOnce
	pub fn publish(
		&mut self,
		topic: TopicBuf,
		payload: Bytes,
		qos: QoS,
		retain: bool,
	) -> Result<Option<PacketId>, StateError> {
		self.require_connection()?;

		let message = Message {
			topic,
			payload,
			qos,
			retain,
		};

		let Some(publish) = message.to_publish(qos, || self.packet_ids.next(&self.outbound))
		else {
			return Err(StateError::PacketIdsExhausted);
		};

		let id = publish.id();
		let packet = Packet::from(publish);
		self.enqueue_packet(&packet)?;

		match id {
			Some(id) => {
				self.outbound.insert(id, packet);
			}
			None => self.events.push_back(Event::Published { id: None }),
		}

		Ok(id)
	}

	/// Requests subscriptions to `filters`. The result is reported with
	/// [`Event::Subscribed`].
	pub fn subscribe(&mut self, filters: Vec<(FilterBuf, QoS)>) -> Result<PacketId, StateError> {
		self.require_connection()?;
		let id = self.next_packet_id()?;
		let packet = Packet::from(Subscribe {
			id,
			filters: filters
				.into_iter()
				.map(|(filter, qos)| (filter.into_inner(), qos))
				.collect(),
		});

		self.enqueue_packet(&packet)?;
		self.outbound.insert(id, packet);
		Ok(id)
	}

	/// Requests removal of subscriptions to `filters`. Completion is reported
	/// with [`Event::Unsubscribed`].
	pub fn unsubscribe(&mut self, filters: Vec<FilterBuf>) -> Result<PacketId, StateError> {
		self.require_connection()?;
		let id = self.next_packet_id()?;
		let packet = Packet::from(Unsubscribe {
			id,
			filters: filters.into_iter().map(FilterBuf::into_inner).collect(),
		});

		self.enqueue_packet(&packet)?;
		self.outbound.insert(id, packet);
		Ok(id)
	}

	/// Queues a Disconnect packet. The driver should flush
	/// [`take_outgoing`](Self::take_outgoing) and close the transport.
	pub fn disconnect(&mut self) -> Result<(), StateError> {
		self.reconnect_at = None;
		match self.state {
			ConnectionState::Connecting | ConnectionState::Connected => {
				self.enqueue_packet(&Packet::Disconnect)?;
				self.state = ConnectionState::Disconnecting;
			}
			ConnectionState::Reconnecting => self.state = ConnectionState::Disconnected,
			ConnectionState::Disconnecting | ConnectionState::Disconnected => {}
		}
		Ok(())
	}

	/// Called when the transport closes, or could not be opened.
	///
	/// Unless the closure was requested or the Server refused the
	/// connection, a reconnection is scheduled when enabled. Returns the time
	/// of the next attempt.
	pub fn connection_lost(&mut self, now: Instant) -> Option<Instant> {
		let previous = self.state;
		self.incoming.clear();
		self.outgoing.clear();
		self.ping_at = None;

		if previous == ConnectionState::Connected || previous == ConnectionState::Disconnecting {
			self.events.push_back(Event::Disconnected);
		}

		match previous {
			ConnectionState::Connecting
			| ConnectionState::Connected
			| ConnectionState::Reconnecting
				if self.configuration.reconnect =>
			{
				let delay = self.hold_off.increase_with(|delay| delay * 2);
				tracing::info!(?delay, "connection lost, reconnecting");

				self.clean_session = false;
				self.state = ConnectionState::Reconnecting;
				self.reconnect_at = Some(now + delay);
			}
			_ => {
				tracing::info!("connection closed");
				self.state = ConnectionState::Disconnected;
				self.reconnect_at = None;
			}
		}

		self.reconnect_at
	}

	/// Time of the next scheduled reconnection attempt.
	#[inline]
	pub fn reconnect_at(&self) -> Option<Instant> {
		self.reconnect_at
	}

	/// Returns the next instant [`handle_timeout`](Self::handle_timeout)
	/// should be called.
	pub fn poll_timeout(&self) -> Option<Instant> {
		match self.state {
			ConnectionState::Connected => self.ping_at,
			ConnectionState::Reconnecting => self.reconnect_at,
			_ => None,
		}
	}

	/// Queues a PingReq if the keep-alive interval has elapsed without any
	/// other packet being sent.
	pub fn handle_timeout(&mut self, now: Instant) -> Result<(), StateError> {
		if self.state != ConnectionState::Connected {
			return Ok(());
		}

		let (Some(ping_at), Some(keep_alive)) = (self.ping_at, self.configuration.keep_alive())
		else {
			return Ok(());
		};

		if now >= ping_at {
			if self.outgoing.is_empty() {
				tracing::trace!("sending PingReq");
				self.enqueue_packet(&Packet::PingReq)?;
			}
			self.ping_at = Some(now + keep_alive);
		}

		Ok(())
	}

	/// Takes the bytes to write to the transport. Writing restarts the
	/// keep-alive interval.
	pub fn take_outgoing(&mut self, now: Instant) -> Option<Bytes> {
		if self.outgoing.is_empty() {
			return None;
		}

		if self.state == ConnectionState::Connected {
			self.ping_at = self.configuration.keep_alive().map(|keep_alive| now + keep_alive);
		}

		Some(self.outgoing.split().freeze())
	}

	#[inline]
	pub fn poll_event(&mut self) -> Option<Event> {
		self.events.pop_front()
	}

	fn connack(&mut self, connack: ConnAck, now: Instant) -> Result<(), StateError> {
		let ConnAck {
			session_present,
			code,
		} = connack;

		if code != ConnectReturnCode::Accepted {
			tracing::warn!(%code, "connection refused");
			self.state = ConnectionState::Disconnected;
			self.reconnect_at = None;
			self.events.push_back(Event::ConnectionRefused(code));
			return Err(StateError::ConnectionRefused(code));
		}

		tracing::info!(session_present, "connected");
		if !session_present {
			// The Server has no QoS 2 state for us, so nothing will release
			// the messages we were holding.
			self.inbound.clear();
		}

		// Resend everything that was unacknowledged when this connection was
		// opened. Packets queued while waiting for ConnAck were sent after
		// Connect already.
		let replay: Vec<_> = self
			.replay
			.drain(..)
			.filter_map(|id| self.outbound.get(id).cloned())
			.collect();
		for mut packet in replay {
			if let Packet::Publish(publish) = &mut packet {
				publish.set_duplicate(true);
			}
			self.enqueue_packet(&packet)?;
		}

		self.hold_off.reset();
		self.state = ConnectionState::Connected;
		self.ping_at = self
			.configuration
			.keep_alive()
			.map(|keep_alive| now + keep_alive);
		self.events.push_back(Event::Connected { session_present });
		Ok(())
	}

	fn handle_publish(&mut self, publish: Publish) -> Result<(), StateError> {
		match publish.qos() {
			QoS::AtMostOnce => {
				self.events.push_back(Event::Message(publish.into()));
			}
			QoS::AtLeastOnce => {
				let Some(id) = publish.id() else {
					return Err(StateError::ProtocolError("missing packet identifier"));
				};
				self.events.push_back(Event::Message(publish.into()));
				self.enqueue_packet(&PubAck { id }.into())?;
			}
			QoS::ExactlyOnce => {
				let Some(id) = publish.id() else {
					return Err(StateError::ProtocolError("missing packet identifier"));
				};

				if self.inbound.contains(id) {
					if !publish.duplicate() {
						return Err(StateError::ProtocolError(
							"packet identifier reused before QoS 2 exchange completed",
						));
					}
					tracing::debug!(%id, "duplicate QoS 2 Publish");
				} else {
					self.events.push_back(Event::Message(publish.into()));
					self.inbound.insert(id, PubRec { id }.into());
				}

				self.enqueue_packet(&PubRec { id }.into())?;
			}
		}

		Ok(())
	}

	fn pubrec(&mut self, id: PacketId) -> Result<(), StateError> {
		match self.outbound.get(id) {
			Some(Packet::Publish(publish)) if publish.qos() == QoS::ExactlyOnce => {
				self.outbound.insert(id, PubRel { id }.into());
			}
			Some(Packet::PubRel(_)) => {}
			_ => tracing::warn!(%id, "unsolicited PubRec"),
		}

		self.enqueue_packet(&PubRel { id }.into())
	}

	fn pubrel(&mut self, id: PacketId) -> Result<(), StateError> {
		if self.inbound.remove(id).is_none() {
			tracing::debug!(%id, "PubRel for unknown packet identifier");
		}
		self.enqueue_packet(&PubComp { id }.into())
	}

	fn complete_publish(&mut self, id: PacketId, qos: QoS) {
		let expected = match (self.outbound.get(id), qos) {
			(Some(Packet::Publish(publish)), QoS::AtLeastOnce) => {
				publish.qos() == QoS::AtLeastOnce
			}
			(Some(Packet::PubRel(_)), QoS::ExactlyOnce) => true,
			_ => false,
		};

		if !expected {
			tracing::warn!(%id, ?qos, "unsolicited publish acknowledgement");
			return;
		}

		self.outbound.remove(id);
		self.events.push_back(Event::Published { id: Some(id) });
	}

	fn suback(&mut self, suback: SubAck) -> Result<(), StateError> {
		let SubAck { id, result } = suback;

		let Some(Packet::Subscribe(subscribe)) = self.outbound.get(id) else {
			return Err(StateError::Unsolicited(PacketType::SubAck));
		};

		if subscribe.filters.len() != result.len() {
			return Err(StateError::ProtocolError(
				"SubAck payload length does not correspond to Subscribe payload length",
			));
		}

		self.outbound.remove(id);
		self.events.push_back(Event::Subscribed { id, result });
		Ok(())
	}

	fn unsuback(&mut self, unsuback: UnsubAck) -> Result<(), StateError> {
		let UnsubAck { id } = unsuback;

		let Some(Packet::Unsubscribe(_)) = self.outbound.get(id) else {
			return Err(StateError::Unsolicited(PacketType::UnsubAck));
		};

		self.outbound.remove(id);
		self.events.push_back(Event::Unsubscribed { id });
		Ok(())
	}

	fn require_connection(&self) -> Result<(), StateError> {
		match self.state {
			ConnectionState::Connecting | ConnectionState::Connected => Ok(()),
			_ => Err(StateError::NotConnected),
		}
	}

	fn next_packet_id(&mut self) -> Result<PacketId, StateError> {
		self.packet_ids
			.next(&self.outbound)
			.ok_or(StateError::PacketIdsExhausted)
	}

	fn enqueue_packet(&mut self, packet: &Packet) -> Result<(), StateError> {
		packet.serialize_into(&mut self.outgoing)?;
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::{ClientSession, ConnectionState, Event, StateError};
	use crate::ClientConfiguration;
	use bytes::Bytes;
	use mqtt_protocol::{
		packets::{ConnAck, PubAck, PubComp, PubRec, PubRel, Publish, SubAck},
		ConnectReturnCode, FilterBuf, Packet, PacketId, QoS, SubscribeFailed, TopicBuf,
	};
	use std::time::{Duration, Instant};

	fn id(value: u16) -> PacketId {
		PacketId::new(value).unwrap()
	}

	fn session() -> ClientSession {
		ClientSession::new(ClientConfiguration {
			client_id: "test".into(),
			keep_alive: 10,
			..Default::default()
		})
	}

	/// Decodes everything the session wants to send.
	fn sent(session: &mut ClientSession, now: Instant) -> Vec<Packet> {
		let Some(mut bytes) = session.take_outgoing(now) else {
			return Vec::new();
		};

		let mut packets = Vec::new();
		while let Some((consumed, packet)) = Packet::decode(&bytes).unwrap() {
			packets.push(packet);
			bytes = bytes.slice(consumed..);
		}
		assert!(bytes.is_empty());
		packets
	}

	fn events(session: &mut ClientSession) -> Vec<Event> {
		std::iter::from_fn(|| session.poll_event()).collect()
	}

	fn connect(session: &mut ClientSession, now: Instant, session_present: bool) {
		session.connection_established().unwrap();
		match &sent(session, now)[..] {
			[Packet::Connect(_)] => {}
			packets => panic!("expected Connect, got {packets:?}"),
		}

		session
			.handle_packet(
				ConnAck {
					session_present,
					code: ConnectReturnCode::Accepted,
				}
				.into(),
				now,
			)
			.unwrap();
		assert_eq!(session.state(), ConnectionState::Connected);
	}

	fn incoming(qos: QoS, packet_id: u16, duplicate: bool) -> Packet {
		let topic = TopicBuf::new("a/b").unwrap();
		let payload = Bytes::from_static(b"hello");
		match qos {
			QoS::AtMostOnce => Publish::AtMostOnce {
				retain: false,
				topic,
				payload,
			},
			QoS::AtLeastOnce => Publish::AtLeastOnce {
				id: id(packet_id),
				retain: false,
				duplicate,
				topic,
				payload,
			},
			QoS::ExactlyOnce => Publish::ExactlyOnce {
				id: id(packet_id),
				retain: false,
				duplicate,
				topic,
				payload,
			},
		}
		.into()
	}

	#[test]
	fn sends_connect_with_configuration() {
		let now = Instant::now();
		let mut session = session();
		session.connection_established().unwrap();

		let packets = sent(&mut session, now);
		let [Packet::Connect(connect)] = &packets[..] else {
			panic!("expected Connect, got {packets:?}");
		};
		assert_eq!(connect.client_id, "test");
		assert_eq!(connect.keep_alive, 10);
		assert!(connect.clean_session);
		assert_eq!(session.state(), ConnectionState::Connecting);
	}

	#[test]
	fn surfaces_refused_connection() {
		let now = Instant::now();
		let mut session = session();
		session.connection_established().unwrap();

		let result = session.handle_packet(
			ConnAck {
				session_present: false,
				code: ConnectReturnCode::NotAuthorized,
			}
			.into(),
			now,
		);

		assert!(matches!(
			result,
			Err(StateError::ConnectionRefused(ConnectReturnCode::NotAuthorized))
		));
		assert_eq!(
			events(&mut session),
			[Event::ConnectionRefused(ConnectReturnCode::NotAuthorized)]
		);

		// A refused connection is not retried.
		assert_eq!(session.connection_lost(now), None);
		assert_eq!(session.state(), ConnectionState::Disconnected);
	}

	#[test]
	fn rejects_packets_before_connack() {
		let now = Instant::now();
		let mut session = session();
		session.connection_established().unwrap();
		assert!(session.handle_packet(incoming(QoS::AtMostOnce, 0, false), now).is_err());
	}

	#[test]
	fn publishes_at_most_once_immediately() {
		let now = Instant::now();
		let mut session = session();
		connect(&mut session, now, false);
		events(&mut session);

		let id = session
			.publish(TopicBuf::new("t").unwrap(), Bytes::new(), QoS::AtMostOnce, false)
			.unwrap();

		assert_eq!(id, None);
		assert_eq!(events(&mut session), [Event::Published { id: None }]);
		assert_eq!(session.in_flight(), 0);
		assert_eq!(sent(&mut session, now).len(), 1);
	}

	#[test]
	fn completes_exactly_once_publish() {
		let now = Instant::now();
		let mut session = session();
		connect(&mut session, now, false);
		events(&mut session);

		let packet_id = session
			.publish(TopicBuf::new("t").unwrap(), Bytes::new(), QoS::ExactlyOnce, false)
			.unwrap()
			.unwrap();
		sent(&mut session, now);

		session.handle_packet(PubRec { id: packet_id }.into(), now).unwrap();
		assert_eq!(sent(&mut session, now), [Packet::from(PubRel { id: packet_id })]);
		assert!(events(&mut session).is_empty());

		session.handle_packet(PubComp { id: packet_id }.into(), now).unwrap();
		assert_eq!(
			events(&mut session),
			[Event::Published {
				id: Some(packet_id)
			}]
		);
		assert_eq!(session.in_flight(), 0);
	}

	#[test]
	fn replays_unacknowledged_publish_after_reconnect() {
		let now = Instant::now();
		let mut session = session();
		connect(&mut session, now, false);

		let packet_id = session
			.publish(TopicBuf::new("t").unwrap(), Bytes::from_static(b"x"), QoS::AtLeastOnce, false)
			.unwrap()
			.unwrap();
		sent(&mut session, now);

		// Lose the connection before the PubAck arrives.
		let retry_at = session.connection_lost(now).unwrap();
		assert_eq!(retry_at, now + Duration::from_millis(500));
		assert_eq!(session.state(), ConnectionState::Reconnecting);
		assert_eq!(session.poll_timeout(), Some(retry_at));

		session.connection_established().unwrap();
		let packets = sent(&mut session, retry_at);
		let [Packet::Connect(connect)] = &packets[..] else {
			panic!("expected Connect, got {packets:?}");
		};
		assert!(!connect.clean_session);

		session
			.handle_packet(
				ConnAck {
					session_present: true,
					code: ConnectReturnCode::Accepted,
				}
				.into(),
				retry_at,
			)
			.unwrap();

		let packets = sent(&mut session, retry_at);
		let [Packet::Publish(publish)] = &packets[..] else {
			panic!("expected Publish, got {packets:?}");
		};
		assert!(publish.duplicate());
		assert_eq!(publish.id(), Some(packet_id));

		session.handle_packet(PubAck { id: packet_id }.into(), retry_at).unwrap();
		session.handle_packet(PubAck { id: packet_id }.into(), retry_at).unwrap();
		let published = events(&mut session)
			.into_iter()
			.filter(|event| matches!(event, Event::Published { .. }))
			.count();
		assert_eq!(published, 1);
	}

	#[test]
	fn backs_off_between_failed_attempts() {
		let now = Instant::now();
		let mut session = session();
		connect(&mut session, now, false);

		let first = session.connection_lost(now).unwrap();
		// The transport could not be reopened.
		let second = session.connection_lost(first).unwrap();
		assert_eq!(second - first, Duration::from_secs(1));

		session.connection_established().unwrap();
		assert_eq!(session.poll_timeout(), None);
	}

	#[test]
	fn does_not_reconnect_after_disconnect() {
		let now = Instant::now();
		let mut session = session();
		connect(&mut session, now, false);
		events(&mut session);

		session.disconnect().unwrap();
		assert_eq!(sent(&mut session, now), [Packet::Disconnect]);
		assert_eq!(session.state(), ConnectionState::Disconnecting);

		assert_eq!(session.connection_lost(now), None);
		assert_eq!(session.state(), ConnectionState::Disconnected);
		assert_eq!(events(&mut session), [Event::Disconnected]);
	}

	#[test]
	fn acknowledges_incoming_publishes() {
		let now = Instant::now();
		let mut session = session();
		connect(&mut session, now, false);
		events(&mut session);

		session.handle_packet(incoming(QoS::AtMostOnce, 0, false), now).unwrap();
		session.handle_packet(incoming(QoS::AtLeastOnce, 4, false), now).unwrap();
		assert_eq!(sent(&mut session, now), [Packet::from(PubAck { id: id(4) })]);

		let delivered = events(&mut session);
		assert_eq!(delivered.len(), 2);
		assert!(matches!(&delivered[1], Event::Message(message) if message.qos == QoS::AtLeastOnce));
	}

	#[test]
	fn delivers_exactly_once_message_once() {
		let now = Instant::now();
		let mut session = session();
		connect(&mut session, now, false);
		events(&mut session);

		session.handle_packet(incoming(QoS::ExactlyOnce, 9, false), now).unwrap();
		session.handle_packet(incoming(QoS::ExactlyOnce, 9, true), now).unwrap();

		// PubRec is sent for both, the message is delivered once.
		assert_eq!(
			sent(&mut session, now),
			[Packet::from(PubRec { id: id(9) }), Packet::from(PubRec { id: id(9) })]
		);
		assert_eq!(events(&mut session).len(), 1);

		session.handle_packet(PubRel { id: id(9) }.into(), now).unwrap();
		assert_eq!(sent(&mut session, now), [Packet::from(PubComp { id: id(9) })]);

		// The identifier is free again.
		session.handle_packet(incoming(QoS::ExactlyOnce, 9, false), now).unwrap();
		assert_eq!(events(&mut session).len(), 1);
	}

	#[test]
	fn rejects_reused_exactly_once_identifier() {
		let now = Instant::now();
		let mut session = session();
		connect(&mut session, now, false);

		session.handle_packet(incoming(QoS::ExactlyOnce, 9, false), now).unwrap();
		assert!(matches!(
			session.handle_packet(incoming(QoS::ExactlyOnce, 9, false), now),
			Err(StateError::ProtocolError(_))
		));
	}

	#[test]
	fn checks_suback_length() {
		let now = Instant::now();
		let mut session = session();
		connect(&mut session, now, false);
		events(&mut session);

		let filters = vec![
			(FilterBuf::new("a/+").unwrap(), QoS::AtLeastOnce),
			(FilterBuf::new("b").unwrap(), QoS::AtMostOnce),
		];
		let packet_id = session.subscribe(filters.clone()).unwrap();
		let result = vec![Ok(QoS::AtLeastOnce), Err(SubscribeFailed)];
		session
			.handle_packet(
				SubAck {
					id: packet_id,
					result: result.clone(),
				}
				.into(),
				now,
			)
			.unwrap();
		assert_eq!(
			events(&mut session),
			[Event::Subscribed {
				id: packet_id,
				result
			}]
		);

		// Unsolicited.
		assert!(session
			.handle_packet(
				SubAck {
					id: packet_id,
					result: vec![Ok(QoS::AtMostOnce)],
				}
				.into(),
				now
			)
			.is_err());

		// Wrong number of return codes.
		let packet_id = session.subscribe(filters).unwrap();
		assert!(matches!(
			session.handle_packet(
				SubAck {
					id: packet_id,
					result: vec![Ok(QoS::AtMostOnce)],
				}
				.into(),
				now
			),
			Err(StateError::ProtocolError(_))
		));
	}

	#[test]
	fn pings_when_idle() {
		let now = Instant::now();
		let mut session = session();
		connect(&mut session, now, false);
		sent(&mut session, now);

		let deadline = session.poll_timeout().unwrap();
		assert_eq!(deadline, now + Duration::from_secs(10));

		session.handle_timeout(deadline).unwrap();
		assert_eq!(sent(&mut session, deadline), [Packet::PingReq]);
		assert_eq!(
			session.poll_timeout(),
			Some(deadline + Duration::from_secs(10))
		);

		// Any write pushes the next ping back.
		let later = deadline + Duration::from_secs(3);
		session
			.publish(TopicBuf::new("t").unwrap(), Bytes::new(), QoS::AtMostOnce, false)
			.unwrap();
		sent(&mut session, later);
		assert_eq!(session.poll_timeout(), Some(later + Duration::from_secs(10)));
	}
}
