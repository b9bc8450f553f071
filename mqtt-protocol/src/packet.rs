use crate::{
	frame::Frame,
	packets::{
		ConnAck, Connect, DeserializeError, Disconnect, PingReq, PingResp, PubAck, PubComp,
		PubRec, PubRel, Publish, SubAck, Subscribe, UnsubAck, Unsubscribe,
	},
	serde::SerializeError,
};
use bytes::{BufMut, Bytes, BytesMut};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Packet {
	Connect(Box<Connect>),
	ConnAck(ConnAck),
	Publish(Box<Publish>),
	PubAck(PubAck),
	PubRec(PubRec),
	PubRel(PubRel),
	PubComp(PubComp),
	Subscribe(Box<Subscribe>),
	SubAck(Box<SubAck>),
	Unsubscribe(Box<Unsubscribe>),
	UnsubAck(UnsubAck),
	PingReq,
	PingResp,
	Disconnect,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PacketType {
	Connect,
	ConnAck,
	Publish,
	PubAck,
	PubRec,
	PubRel,
	PubComp,
	Subscribe,
	SubAck,
	Unsubscribe,
	UnsubAck,
	PingReq,
	PingResp,
	Disconnect,
}

const CONNECT: u8 = 0x10;
const CONNACK: u8 = 0x20;
const PUBLISH: u8 = 0x30;
const PUBACK: u8 = 0x40;
const PUBREC: u8 = 0x50;
const PUBREL: u8 = 0x60;
const PUBCOMP: u8 = 0x70;
const SUBSCRIBE: u8 = 0x80;
const SUBACK: u8 = 0x90;
const UNSUBSCRIBE: u8 = 0xa0;
const UNSUBACK: u8 = 0xb0;
const PINGREQ: u8 = 0xc0;
const PINGRESP: u8 = 0xd0;
const DISCONNECT: u8 = 0xe0;

impl Packet {
	/// Attempts to decode one packet from the start of `src`.
	///
	/// Returns `Ok(None)` if `src` does not yet hold a complete packet, or the
	/// number of bytes consumed together with the packet.
	pub fn decode(src: &[u8]) -> Result<Option<(usize, Self)>, DeserializeError> {
		let length = match Frame::check(src) {
			Ok(length) => length,
			Err(DeserializeError::Incomplete) => return Ok(None),
			Err(error) => return Err(error),
		};

		let frame = Frame::parse(Bytes::copy_from_slice(&src[..length]))?;
		let packet = Self::parse(&frame)?;
		Ok(Some((length, packet)))
	}

	/// Parses a [`Packet`] from a complete frame.
	pub fn parse(frame: &Frame) -> Result<Self, DeserializeError> {
		let header = frame.header;
		match (header & 0xf0, header & 0x0f) {
			(CONNECT, 0x00) => Ok(Connect::deserialize_from(frame)?.into()),
			(CONNACK, 0x00) => Ok(ConnAck::deserialize_from(frame)?.into()),
			(PUBLISH, _) => Ok(Publish::deserialize_from(frame)?.into()),
			(PUBACK, 0x00) => Ok(PubAck::deserialize_from(frame)?.into()),
			(PUBREC, 0x00) => Ok(PubRec::deserialize_from(frame)?.into()),
			(PUBREL, 0x02) => Ok(PubRel::deserialize_from(frame)?.into()),
			(PUBCOMP, 0x00) => Ok(PubComp::deserialize_from(frame)?.into()),
			(SUBSCRIBE, 0x02) => Ok(Subscribe::deserialize_from(frame)?.into()),
			(SUBACK, 0x00) => Ok(SubAck::deserialize_from(frame)?.into()),
			(UNSUBSCRIBE, 0x02) => Ok(Unsubscribe::deserialize_from(frame)?.into()),
			(UNSUBACK, 0x00) => Ok(UnsubAck::deserialize_from(frame)?.into()),
			(PINGREQ, 0x00) => Ok(PingReq::deserialize_from(frame)?.into()),
			(PINGRESP, 0x00) => Ok(PingResp::deserialize_from(frame)?.into()),
			(DISCONNECT, 0x00) => Ok(Disconnect::deserialize_from(frame)?.into()),
			_ => Err(DeserializeError::InvalidHeader(header)),
		}
	}

	pub fn serialize_into(&self, dst: &mut impl BufMut) -> Result<(), SerializeError> {
		match self {
			Self::Connect(connect) => connect.serialize_into(dst),
			Self::ConnAck(connack) => connack.serialize_into(dst),
			Self::Publish(publish) => publish.serialize_into(dst),
			Self::PubAck(puback) => puback.serialize_into(dst),
			Self::PubRec(pubrec) => pubrec.serialize_into(dst),
			Self::PubRel(pubrel) => pubrel.serialize_into(dst),
			Self::PubComp(pubcomp) => pubcomp.serialize_into(dst),
			Self::Subscribe(subscribe) => subscribe.serialize_into(dst),
			Self::SubAck(suback) => suback.serialize_into(dst),
			Self::Unsubscribe(unsubscribe) => unsubscribe.serialize_into(dst),
			Self::UnsubAck(unsuback) => unsuback.serialize_into(dst),
			Self::PingReq => PingReq.serialize_into(dst),
			Self::PingResp => PingResp.serialize_into(dst),
			Self::Disconnect => Disconnect.serialize_into(dst),
		}
	}

	/// Serializes the packet into a new buffer.
	pub fn to_bytes(&self) -> Result<Bytes, SerializeError> {
		let mut buffer = BytesMut::new();
		self.serialize_into(&mut buffer)?;
		Ok(buffer.freeze())
	}

	#[inline]
	pub fn packet_type(&self) -> PacketType {
		match self {
			Self::Connect(_) => PacketType::Connect,
			Self::ConnAck(_) => PacketType::ConnAck,
			Self::Publish(_) => PacketType::Publish,
			Self::PubAck(_) => PacketType::PubAck,
			Self::PubRec(_) => PacketType::PubRec,
			Self::PubRel(_) => PacketType::PubRel,
			Self::PubComp(_) => PacketType::PubComp,
			Self::Subscribe(_) => PacketType::Subscribe,
			Self::SubAck(_) => PacketType::SubAck,
			Self::Unsubscribe(_) => PacketType::Unsubscribe,
			Self::UnsubAck(_) => PacketType::UnsubAck,
			Self::PingReq => PacketType::PingReq,
			Self::PingResp => PacketType::PingResp,
			Self::Disconnect => PacketType::Disconnect,
		}
	}
}

impl From<Connect> for Packet {
	#[inline]
	fn from(value: Connect) -> Self {
		Self::Connect(value.into())
	}
}

impl From<ConnAck> for Packet {
	#[inline]
	fn from(value: ConnAck) -> Self {
		Self::ConnAck(value)
	}
}

impl From<Publish> for Packet {
	#[inline]
	fn from(value: Publish) -> Self {
		Self::Publish(value.into())
	}
}

impl From<Subscribe> for Packet {
	#[inline]
	fn from(value: Subscribe) -> Self {
		Self::Subscribe(value.into())
	}
}

impl From<SubAck> for Packet {
	#[inline]
	fn from(value: SubAck) -> Self {
		Self::SubAck(value.into())
	}
}

impl From<Unsubscribe> for Packet {
	#[inline]
	fn from(value: Unsubscribe) -> Self {
		Self::Unsubscribe(value.into())
	}
}

#[cfg(test)]
mod tests {
	use super::{Packet, PacketType};
	use crate::{
		packets::{
			ConnAck, Connect, DeserializeError, PubAck, PubComp, PubRec, PubRel, Publish, SubAck,
			Subscribe, UnsubAck, Unsubscribe,
		},
		misc::Will,
		ConnectReturnCode, PacketId, QoS, SubscribeFailed, TopicBuf,
	};
	use bytes::Bytes;

	fn id(value: u16) -> PacketId {
		PacketId::new(value).unwrap()
	}

	fn samples() -> Vec<Packet> {
		vec![
			Connect {
				client_id: "client".into(),
				keep_alive: 30,
				clean_session: false,
				will: Some(Will {
					topic: TopicBuf::new("clients/client").unwrap(),
					payload: Bytes::from_static(b"gone"),
					qos: QoS::ExactlyOnce,
					retain: true,
				}),
				credentials: Some(("user", "secret").into()),
				..Default::default()
			}
			.into(),
			ConnAck {
				session_present: true,
				code: ConnectReturnCode::Accepted,
			}
			.into(),
			Publish::ExactlyOnce {
				id: id(513),
				retain: false,
				duplicate: true,
				topic: TopicBuf::new("a/b").unwrap(),
				payload: Bytes::from(vec![0x5a; 300]),
			}
			.into(),
			PubRel { id: id(1) }.into(),
			Subscribe {
				id: id(2),
				filters: vec![("a/+".into(), QoS::AtLeastOnce), ("#".into(), QoS::AtMostOnce)],
			}
			.into(),
			SubAck {
				id: id(2),
				result: vec![Ok(QoS::AtLeastOnce), Err(SubscribeFailed)],
			}
			.into(),
			Connect {
				client_id: "anonymous".into(),
				keep_alive: 0,
				clean_session: true,
				credentials: Some("user".into()),
				..Default::default()
			}
			.into(),
			ConnAck {
				session_present: false,
				code: ConnectReturnCode::BadUsernameOrPassword,
			}
			.into(),
			// Clears a retained message.
			Publish::AtMostOnce {
				retain: true,
				topic: TopicBuf::new("a/b").unwrap(),
				payload: Bytes::new(),
			}
			.into(),
			// Needs a three byte remaining length.
			Publish::AtLeastOnce {
				id: id(7),
				retain: false,
				duplicate: false,
				topic: TopicBuf::new("bulk").unwrap(),
				payload: Bytes::from(vec![0xa5; 20 * 1024]),
			}
			.into(),
			PubAck { id: id(7) }.into(),
			PubRec { id: id(513) }.into(),
			PubComp { id: id(513) }.into(),
			Unsubscribe {
				id: id(3),
				filters: vec!["a/+".into(), "#".into()],
			}
			.into(),
			UnsubAck { id: id(3) }.into(),
			Packet::PingReq,
			Packet::PingResp,
			Packet::Disconnect,
		]
	}

	#[test]
	fn decodes_serialized_packets() {
		for packet in samples() {
			let bytes = packet.to_bytes().unwrap();
			let (consumed, decoded) = Packet::decode(&bytes).unwrap().unwrap();
			assert_eq!(consumed, bytes.len());
			assert_eq!(decoded, packet);
		}
	}

	#[test]
	fn decodes_byte_at_a_time() {
		for packet in samples() {
			let bytes = packet.to_bytes().unwrap();
			for end in 0..bytes.len() {
				assert!(
					Packet::decode(&bytes[..end]).unwrap().is_none(),
					"{:?} decoded from {end} bytes",
					packet.packet_type()
				);
			}
		}
	}

	#[test]
	fn decodes_consecutive_packets() {
		let buffer = [0xd0, 0x00, 0x40, 0x02, 0x00, 0x07, 0xe0];
		let (consumed, packet) = Packet::decode(&buffer).unwrap().unwrap();
		assert_eq!((consumed, packet), (2, Packet::PingResp));

		let (consumed, packet) = Packet::decode(&buffer[2..]).unwrap().unwrap();
		assert_eq!(consumed, 4);
		assert_eq!(packet.packet_type(), PacketType::PubAck);

		assert!(Packet::decode(&buffer[6..]).unwrap().is_none());
	}

	#[test]
	fn rejects_invalid_fixed_header_flags() {
		// PubRel, Subscribe and Unsubscribe require flags 0x02.
		for header in [0x60, 0x80, 0xa0] {
			let buffer = [header, 0x02, 0x00, 0x01];
			assert!(matches!(
				Packet::decode(&buffer),
				Err(DeserializeError::InvalidHeader(_))
			));
		}

		// PingReq with a flag set.
		assert!(Packet::decode(&[0xc1, 0x00]).is_err());
		// Reserved packet types.
		assert!(Packet::decode(&[0x00, 0x00]).is_err());
		assert!(Packet::decode(&[0xf0, 0x00]).is_err());
	}

	#[test]
	fn rejects_malformed_bodies() {
		// Zero packet identifier.
		assert!(matches!(
			Packet::decode(&[0x40, 0x02, 0x00, 0x00]),
			Err(DeserializeError::InvalidPacketId)
		));
		// PingReq with a body.
		assert!(Packet::decode(&[0xc0, 0x01, 0x00]).is_err());
		// Five byte remaining length.
		assert!(matches!(
			Packet::decode(&[0x30, 0xff, 0xff, 0xff, 0xff, 0x01]),
			Err(DeserializeError::MalformedLength)
		));
		// Invalid UTF-8 in the topic.
		assert!(matches!(
			Packet::decode(&[0x30, 0x04, 0x00, 0x02, 0xc3, 0x28]),
			Err(DeserializeError::Utf8Error(_))
		));
	}
}
