use crate::ListenerId;
use mqtt_protocol::{FilterBuf, Message, QoS};
use std::net::SocketAddr;

/// Notifications emitted by the [`Broker`](crate::Broker).
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BrokerEvent {
	ClientConnected {
		client_id: String,
		listener: ListenerId,
		peer: Option<SocketAddr>,
		session_present: bool,
	},
	ClientDisconnected {
		client_id: String,
	},
	/// A packet was received from the client.
	ClientAlive {
		client_id: String,
	},
	ClientSubscribed {
		client_id: String,
		filter: FilterBuf,
		qos: QoS,
	},
	ClientUnsubscribed {
		client_id: String,
		filter: FilterBuf,
	},
	PublishReceived {
		client_id: String,
		message: Message,
	},
	/// A message was delivered to a client. `packet_id` is 0 for QoS 0
	/// deliveries, which are reported as soon as they are sent.
	Published {
		client_id: String,
		packet_id: u16,
	},
}
