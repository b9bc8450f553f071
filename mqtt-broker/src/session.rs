use crate::ConnectionId;
use mqtt_protocol::{
	misc::Will, FilterBuf, PacketIdAllocator, QoS, RetransmissionLedger, Topic,
};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Subscription {
	pub filter: FilterBuf,
	pub qos: QoS,
}

/// Server-side state for one client id. Outlives the connection when the
/// Client asked for a persistent session.
#[derive(Debug)]
pub(crate) struct Session {
	pub client_id: String,
	pub clean_session: bool,

	/// The connection currently bound to the session. `None` while parked.
	pub connection: Option<ConnectionId>,
	pub subscriptions: Vec<Subscription>,
	pub will: Option<Will>,

	/// Publish and PubRel packets sent to the Client and not yet
	/// acknowledged.
	pub outbound: RetransmissionLedger,

	/// QoS 2 messages received from the Client and awaiting PubRel.
	pub inbound: RetransmissionLedger,
	pub packet_ids: PacketIdAllocator,
}

impl Session {
	pub fn new(client_id: String) -> Self {
		Self {
			client_id,
			clean_session: true,
			connection: None,
			subscriptions: Vec::new(),
			will: None,
			outbound: RetransmissionLedger::new(),
			inbound: RetransmissionLedger::new(),
			packet_ids: PacketIdAllocator::new(),
		}
	}

	/// Adds a subscription, replacing any existing one with the same filter.
	pub fn subscribe(&mut self, filter: FilterBuf, qos: QoS) {
		match self
			.subscriptions
			.iter_mut()
			.find(|subscription| subscription.filter == filter)
		{
			Some(existing) => existing.qos = qos,
			None => self.subscriptions.push(Subscription { filter, qos }),
		}
	}

	/// Removes the subscription for exactly `filter`, returning it.
	pub fn unsubscribe(&mut self, filter: &str) -> Option<Subscription> {
		let index = self
			.subscriptions
			.iter()
			.position(|subscription| subscription.filter.as_str() == filter)?;
		Some(self.subscriptions.remove(index))
	}

	/// Highest QoS among the subscriptions matching `topic`.
	pub fn matching_qos(&self, topic: &Topic) -> Option<QoS> {
		self.subscriptions
			.iter()
			.filter(|subscription| subscription.filter.matches(topic))
			.map(|subscription| subscription.qos)
			.max()
	}

	/// Highest QoS among the subscriptions for `filters` matching `topic`.
	pub fn matching_qos_among(&self, filters: &[FilterBuf], topic: &Topic) -> Option<QoS> {
		self.subscriptions
			.iter()
			.filter(|subscription| filters.contains(&subscription.filter))
			.filter(|subscription| subscription.filter.matches(topic))
			.map(|subscription| subscription.qos)
			.max()
	}
}

#[cfg(test)]
mod tests {
	use super::Session;
	use mqtt_protocol::{FilterBuf, QoS, Topic};

	fn filter(filter: &str) -> FilterBuf {
		FilterBuf::new(filter).unwrap()
	}

	#[test]
	fn upserts_subscriptions() {
		let mut session = Session::new("c".into());
		session.subscribe(filter("a/+"), QoS::AtMostOnce);
		session.subscribe(filter("a/#"), QoS::AtLeastOnce);
		session.subscribe(filter("a/+"), QoS::ExactlyOnce);

		assert_eq!(session.subscriptions.len(), 2);
		assert_eq!(
			session.matching_qos(Topic::from_static("a/b")),
			Some(QoS::ExactlyOnce)
		);
		assert_eq!(
			session.matching_qos(Topic::from_static("a")),
			Some(QoS::AtLeastOnce)
		);
		assert_eq!(session.matching_qos(Topic::from_static("b")), None);

		assert!(session.unsubscribe("a/+").is_some());
		assert!(session.unsubscribe("a/+").is_none());
		assert_eq!(
			session.matching_qos(Topic::from_static("a/b")),
			Some(QoS::AtLeastOnce)
		);
	}
}
