use crate::{packets::Publish, PacketId, QoS, TopicBuf};
use bytes::Bytes;

/// An application message, independent of any packet identifier.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Message {
	pub topic: TopicBuf,
	pub payload: Bytes,
	pub qos: QoS,
	/// Indicates whether the sender of the message set the retain flag.
	pub retain: bool,
}

impl Message {
	/// Builds a Publish packet carrying this message at `qos`.
	///
	/// `id` is only called for QoS above [`AtMostOnce`](QoS::AtMostOnce).
	/// Returns `None` if it yields no identifier.
	pub fn to_publish(
		&self,
		qos: QoS,
		id: impl FnOnce() -> Option<PacketId>,
	) -> Option<Publish> {
		let Self {
			topic,
			payload,
			retain,
			..
		} = self;

		let (topic, payload, retain) = (topic.clone(), payload.clone(), *retain);
		Some(match qos {
			QoS::AtMostOnce => Publish::AtMostOnce {
				retain,
				topic,
				payload,
			},
			QoS::AtLeastOnce => Publish::AtLeastOnce {
				id: id()?,
				retain,
				duplicate: false,
				topic,
				payload,
			},
			QoS::ExactlyOnce => Publish::ExactlyOnce {
				id: id()?,
				retain,
				duplicate: false,
				topic,
				payload,
			},
		})
	}
}

impl From<Publish> for Message {
	fn from(publish: Publish) -> Self {
		let qos = publish.qos();
		let retain = publish.retain();
		let (topic, payload) = publish.into_parts();
		Self {
			topic,
			payload,
			qos,
			retain,
		}
	}
}

impl From<&Publish> for Message {
	fn from(publish: &Publish) -> Self {
		Self {
			topic: publish.topic().to_owned(),
			payload: publish.payload().clone(),
			qos: publish.qos(),
			retain: publish.retain(),
		}
	}
}
