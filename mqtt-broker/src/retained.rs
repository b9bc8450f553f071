use mqtt_protocol::{Filter, Message, QoS, Topic, TopicBuf};
use std::collections::BTreeMap;

/// The last retained message published to each topic.
#[derive(Debug, Default)]
pub struct RetainedStore {
	messages: BTreeMap<TopicBuf, Message>,
}

impl RetainedStore {
	/// Applies a message published with the retain flag set.
	///
	/// An empty payload clears the topic. Otherwise the message replaces
	/// whatever was stored; a QoS 0 message clears the topic first.
	pub fn retain(&mut self, message: &Message) {
		if message.payload.is_empty() {
			if self.messages.remove(&message.topic).is_some() {
				tracing::debug!(topic = %message.topic, "cleared retained message");
			}
			return;
		}

		if message.qos == QoS::AtMostOnce {
			self.messages.remove(&message.topic);
		}

		tracing::debug!(topic = %message.topic, "retained message");
		self.messages.insert(message.topic.clone(), message.clone());
	}

	/// Messages whose topic is matched by `filter`.
	pub fn matching<'a>(&'a self, filter: &'a Filter) -> impl Iterator<Item = &'a Message> + 'a {
		self.messages
			.iter()
			.filter(move |(topic, _)| filter.matches(topic))
			.map(|(_, message)| message)
	}

	#[inline]
	pub fn get(&self, topic: &Topic) -> Option<&Message> {
		self.messages.get(topic)
	}

	#[inline]
	pub fn len(&self) -> usize {
		self.messages.len()
	}

	#[inline]
	pub fn is_empty(&self) -> bool {
		self.messages.is_empty()
	}
}
