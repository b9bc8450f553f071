use crate::{ClientSession, StateError};
use core::fmt;
use mqtt_protocol::{FilterBuf, Message, PacketId, QoS};

/// The channel types a driver hands out with each request.
pub trait Channels {
	/// Receives the messages routed to a subscription.
	type Messages;
	/// Carries the outcome of a request back to the caller.
	type Reply<T>;
}

/// Requests from a client handle to the task driving a [`ClientSession`].
pub enum Command<C: Channels> {
	Publish {
		message: Message,
		reply: C::Reply<()>,
	},
	Subscribe {
		filters: Vec<(FilterBuf, QoS)>,
		/// Where messages matching `filters` are delivered.
		messages: C::Messages,
		reply: C::Reply<Vec<(FilterBuf, QoS)>>,
	},
	Unsubscribe {
		filters: Vec<FilterBuf>,
		reply: C::Reply<()>,
	},
	Disconnect,
}

/// What is left for the driver once a [`Command`] has been handed to the
/// session.
pub enum Issued<C: Channels> {
	/// Nothing to wait for, `reply` can be completed at once.
	Complete(C::Reply<()>),
	/// Waiting for PubAck or PubComp.
	Publish { id: PacketId, reply: C::Reply<()> },
	/// Waiting for SubAck.
	Subscribe {
		id: PacketId,
		filters: Vec<(FilterBuf, QoS)>,
		messages: C::Messages,
		reply: C::Reply<Vec<(FilterBuf, QoS)>>,
	},
	/// Waiting for UnsubAck.
	Unsubscribe {
		id: PacketId,
		filters: Vec<FilterBuf>,
		reply: C::Reply<()>,
	},
	Disconnect,
}

impl<C: Channels> Command<C> {
	/// Queues the packet for this command on `session`.
	///
	/// On error the command is dropped along with its reply channel.
	pub fn issue(self, session: &mut ClientSession) -> Result<Issued<C>, StateError> {
		match self {
			Self::Publish { message, reply } => {
				let Message {
					topic,
					payload,
					qos,
					retain,
				} = message;
				Ok(match session.publish(topic, payload, qos, retain)? {
					Some(id) => Issued::Publish { id, reply },
					None => Issued::Complete(reply),
				})
			}
			Self::Subscribe {
				filters,
				messages,
				reply,
			} => {
				let id = session.subscribe(filters.clone())?;
				Ok(Issued::Subscribe {
					id,
					filters,
					messages,
					reply,
				})
			}
			Self::Unsubscribe { filters, reply } => {
				let id = session.unsubscribe(filters.clone())?;
				Ok(Issued::Unsubscribe { id, filters, reply })
			}
			Self::Disconnect => {
				session.disconnect()?;
				Ok(Issued::Disconnect)
			}
		}
	}
}

impl<C: Channels> fmt::Debug for Command<C> {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Self::Publish { message, .. } => f
				.debug_struct("Publish")
				.field("topic", &message.topic)
				.field("qos", &message.qos)
				.field("retain", &message.retain)
				.field("len", &message.payload.len())
				.finish_non_exhaustive(),
			Self::Subscribe { filters, .. } => f
				.debug_struct("Subscribe")
				.field("filters", filters)
				.finish_non_exhaustive(),
			Self::Unsubscribe { filters, .. } => f
				.debug_struct("Unsubscribe")
				.field("filters", filters)
				.finish_non_exhaustive(),
			Self::Disconnect => f.write_str("Disconnect"),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::{Channels, Command, Issued};
	use crate::{ClientConfiguration, ClientSession, ConnectionState, StateError};
	use bytes::Bytes;
	use mqtt_protocol::{
		packets::ConnAck, ConnectReturnCode, FilterBuf, Message, Packet, QoS, TopicBuf,
	};
	use std::time::Instant;

	struct Tagged;

	impl Channels for Tagged {
		type Messages = &'static str;
		type Reply<T> = Option<T>;
	}

	fn connected() -> ClientSession {
		let mut session = ClientSession::new(ClientConfiguration {
			client_id: "commands".into(),
			..Default::default()
		});
		session.connection_established().unwrap();
		session
			.handle_packet(
				ConnAck {
					session_present: false,
					code: ConnectReturnCode::Accepted,
				}
				.into(),
				Instant::now(),
			)
			.unwrap();
		// Drop the queued Connect.
		session.take_outgoing(Instant::now());
		session
	}

	fn publish(qos: QoS) -> Command<Tagged> {
		Command::Publish {
			message: Message {
				topic: TopicBuf::new("a/b").unwrap(),
				payload: Bytes::from_static(b"hi"),
				qos,
				retain: false,
			},
			reply: Some(()),
		}
	}

	#[test]
	fn completes_at_most_once_publish_at_once() {
		let mut session = connected();
		let Issued::Complete(reply) = publish(QoS::AtMostOnce).issue(&mut session).unwrap() else {
			panic!("expected a completed publish");
		};
		assert_eq!(reply, Some(()));
		assert_eq!(session.in_flight(), 0);
	}

	#[test]
	fn tracks_acknowledged_requests() {
		let mut session = connected();

		let Issued::Publish { reply, .. } = publish(QoS::ExactlyOnce).issue(&mut session).unwrap()
		else {
			panic!("expected a pending publish");
		};
		assert_eq!(reply, Some(()));

		let filters = vec![(FilterBuf::new("a/#").unwrap(), QoS::AtLeastOnce)];
		let command = Command::<Tagged>::Subscribe {
			filters: filters.clone(),
			messages: "inbox",
			reply: None,
		};
		let Issued::Subscribe {
			id,
			filters: pending,
			messages,
			..
		} = command.issue(&mut session).unwrap()
		else {
			panic!("expected a pending subscribe");
		};
		assert_eq!(pending, filters);
		assert_eq!(messages, "inbox");

		let command = Command::<Tagged>::Unsubscribe {
			filters: vec![FilterBuf::new("a/#").unwrap()],
			reply: Some(()),
		};
		let Issued::Unsubscribe { id: unsubscribe, .. } = command.issue(&mut session).unwrap() else {
			panic!("expected a pending unsubscribe");
		};
		assert_ne!(id, unsubscribe);
		assert_eq!(session.in_flight(), 3);

		let packets = session.take_outgoing(Instant::now()).unwrap();
		let (_, first) = Packet::decode(&packets).unwrap().unwrap();
		assert!(matches!(first, Packet::Publish(_)));
	}

	#[test]
	fn disconnects_session() {
		let mut session = connected();
		assert!(matches!(
			Command::<Tagged>::Disconnect.issue(&mut session),
			Ok(Issued::Disconnect)
		));
		assert_eq!(session.state(), ConnectionState::Disconnecting);
	}

	#[test]
	fn rejects_requests_once_disconnected() {
		let mut session = connected();
		session.disconnect().unwrap();
		assert!(matches!(
			publish(QoS::AtLeastOnce).issue(&mut session),
			Err(StateError::NotConnected)
		));
	}
}
