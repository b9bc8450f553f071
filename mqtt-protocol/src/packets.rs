use crate::{
	bytes_reader::BytesReader,
	frame::Frame,
	misc::{Credentials, Will},
	serde::{self, SerializeError},
	InvalidQoS, InvalidTopic, Packet, PacketId, QoS, Topic, TopicBuf, PROTOCOL_LEVEL,
};
use bytes::{BufMut, Bytes};
use std::{fmt, str::Utf8Error};

/// Protocol name for MQTT 3.1.1 [`Connect`] packets.
pub const PROTOCOL_NAME: &str = "MQTT";

/// Protocol name used by MQTT 3.1 clients. Accepted by the decoder so the
/// Server can refuse the connection with a proper return code.
pub const LEGACY_PROTOCOL_NAME: &str = "MQIsdp";

pub trait SerializePacket {
	/// Serializes the packet into the provided [`BufMut`] implementation.
	fn serialize_into(&self, dst: &mut impl BufMut) -> Result<(), SerializeError>;
}

pub trait DeserializePacket: Sized {
	fn deserialize_from(frame: &Frame) -> Result<Self, DeserializeError>;
}

#[derive(Debug, thiserror::Error)]
pub enum DeserializeError {
	#[error("incomplete packet")]
	Incomplete,
	#[error("packet body is shorter than its fields declare")]
	Truncated,
	#[error("invalid quality of service")]
	InvalidQoS,
	#[error("invalid topic: {0}")]
	InvalidTopic(#[from] InvalidTopic),
	#[error("invalid fixed header {0:#04x}")]
	InvalidHeader(u8),
	#[error("packet identifier cannot be zero")]
	InvalidPacketId,
	#[error("malformed remaining length")]
	MalformedLength,
	#[error("malformed packet: {0}")]
	MalformedPacket(&'static str),
	#[error("invalid UTF-8 string: {0}")]
	Utf8Error(#[from] Utf8Error),
}

impl From<InvalidQoS> for DeserializeError {
	#[inline]
	fn from(_: InvalidQoS) -> Self {
		Self::InvalidQoS
	}
}

/// Return code carried by a [`ConnAck`] packet.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, thiserror::Error)]
#[repr(u8)]
pub enum ConnectReturnCode {
	#[error("connection accepted")]
	Accepted = 0,
	#[error("unacceptable protocol version")]
	UnacceptableProtocolVersion = 1,
	#[error("identifier rejected")]
	IdentifierRejected = 2,
	#[error("server unavailable")]
	ServerUnavailable = 3,
	#[error("bad username or password")]
	BadUsernameOrPassword = 4,
	#[error("not authorized")]
	NotAuthorized = 5,
}

impl TryFrom<u8> for ConnectReturnCode {
	type Error = DeserializeError;
	fn try_from(value: u8) -> Result<Self, Self::Error> {
		Ok(match value {
			0 => Self::Accepted,
			1 => Self::UnacceptableProtocolVersion,
			2 => Self::IdentifierRejected,
			3 => Self::ServerUnavailable,
			4 => Self::BadUsernameOrPassword,
			5 => Self::NotAuthorized,
			_ => {
				return Err(DeserializeError::MalformedPacket(
					"unknown ConnAck return code",
				))
			}
		})
	}
}

/// Failure return code (0x80) in a [`SubAck`] packet.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SubscribeFailed;

/// One entry of a [`SubAck`]: the granted QoS or a failure.
pub type SubscribeReturnCode = Result<QoS, SubscribeFailed>;

//
// Packet Types
//

/// A `Connect` packet is sent by the Client to the Server to initialise a
/// session.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Connect {
	/// Protocol name. Should always be `"MQTT"`.
	pub protocol_name: String,

	/// Protocol version.
	pub protocol_level: u8,

	/// Client ID.
	///
	/// The Server _may_ accept an empty client ID.
	pub client_id: String,

	/// Keep-alive timeout in seconds.
	pub keep_alive: u16,

	/// Request a clean session.
	pub clean_session: bool,

	/// Last will and testament for the Client.
	pub will: Option<Will>,

	/// Login credentials.
	pub credentials: Option<Credentials>,
}

/// A ConnAck packet is sent by the Server to the Client to acknowledge a
/// new session.
///
/// The Server must not send any packets to the Client before ConnAck.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ConnAck {
	/// Indicates that the Server has existing state from a previous session for
	/// the client.
	pub session_present: bool,

	pub code: ConnectReturnCode,
}

/// A Publish packet can be sent by either the Client or the Server.
///
/// Only QoS 1 and 2 packets carry a packet identifier.
#[derive(Clone, PartialEq, Eq)]
pub enum Publish {
	AtMostOnce {
		retain: bool,
		topic: TopicBuf,
		payload: Bytes,
	},
	AtLeastOnce {
		id: PacketId,
		retain: bool,
		duplicate: bool,
		topic: TopicBuf,
		payload: Bytes,
	},
	ExactlyOnce {
		id: PacketId,
		retain: bool,
		duplicate: bool,
		topic: TopicBuf,
		payload: Bytes,
	},
}

id_packet!(PubAck, Packet::PubAck, 0x40, "PubAck");
id_packet!(PubRec, Packet::PubRec, 0x50, "PubRec");
id_packet!(PubRel, Packet::PubRel, 0x62, "PubRel");
id_packet!(PubComp, Packet::PubComp, 0x70, "PubComp");

/// Topic filters are carried unvalidated so the Server can fail individual
/// entries.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Subscribe {
	pub id: PacketId,
	pub filters: Vec<(String, QoS)>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SubAck {
	pub id: PacketId,
	pub result: Vec<SubscribeReturnCode>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Unsubscribe {
	pub id: PacketId,
	pub filters: Vec<String>,
}

id_packet!(UnsubAck, Packet::UnsubAck, 0xb0, "UnsubAck");
nul_packet!(PingReq, Packet::PingReq, 0xc0);
nul_packet!(PingResp, Packet::PingResp, 0xd0);
nul_packet!(Disconnect, Packet::Disconnect, 0xe0);

mod connect {
	use super::*;

	const RESERVED: u8 = 0x01;
	const CLEAN_SESSION: u8 = 0x02;
	const WILL: u8 = 0x04;
	const WILL_QOS_MASK: u8 = 0x18;
	const WILL_RETAIN: u8 = 0x20;
	const PASSWORD: u8 = 0x40;
	const USERNAME: u8 = 0x80;

	impl Default for Connect {
		fn default() -> Self {
			Self {
				protocol_name: PROTOCOL_NAME.into(),
				protocol_level: PROTOCOL_LEVEL,
				client_id: String::new(),
				keep_alive: 0,
				clean_session: true,
				will: None,
				credentials: None,
			}
		}
	}

	impl Connect {
		pub fn deserialize_from(frame: &Frame) -> Result<Self, DeserializeError> {
			let mut reader = BytesReader::new(frame.payload.clone());

			let protocol_name = reader.take_str()?;
			if protocol_name != PROTOCOL_NAME && protocol_name != LEGACY_PROTOCOL_NAME {
				return Err(DeserializeError::MalformedPacket("invalid protocol name"));
			}

			let protocol_level = reader.take_u8()?;
			let flags = reader.take_u8()?;
			if flags & RESERVED != 0 {
				return Err(DeserializeError::MalformedPacket(
					"reserved Connect flag must be zero",
				));
			}

			let keep_alive = reader.take_u16()?;
			let client_id = reader.take_str()?;
			let clean_session = flags & CLEAN_SESSION == CLEAN_SESSION;

			let will = if flags & WILL == WILL {
				let topic = TopicBuf::new(reader.take_str()?)?;
				let payload = reader.take_bytes()?;
				let qos = ((flags & WILL_QOS_MASK) >> 3).try_into()?;
				let retain = flags & WILL_RETAIN == WILL_RETAIN;

				Some(Will {
					topic,
					payload,
					qos,
					retain,
				})
			} else {
				if flags & (WILL_QOS_MASK | WILL_RETAIN) != 0 {
					return Err(DeserializeError::MalformedPacket(
						"will QoS and retain must be zero without a will",
					));
				}
				None
			};

			let credentials = if flags & USERNAME == USERNAME {
				let username = reader.take_str()?;
				let password = if flags & PASSWORD == PASSWORD {
					Some(reader.take_bytes()?)
				} else {
					None
				};
				Some(Credentials { username, password })
			} else {
				if flags & PASSWORD == PASSWORD {
					return Err(DeserializeError::MalformedPacket(
						"password flag set without username flag",
					));
				}
				None
			};

			reader.finish()?;

			Ok(Self {
				protocol_name,
				protocol_level,
				client_id,
				keep_alive,
				clean_session,
				will,
				credentials,
			})
		}

		pub fn serialize_into(&self, dst: &mut impl BufMut) -> Result<(), SerializeError> {
			// Write the packet type and length.
			serde::put_u8(dst, 0x10)?;
			serde::put_var(dst, self.payload_len())?;

			// Write the protocol name and level.
			serde::put_str(dst, &self.protocol_name)?;
			serde::put_u8(dst, self.protocol_level)?;

			// Write the flags and keep alive.
			serde::put_u8(dst, self.flags())?;
			serde::put_u16(dst, self.keep_alive)?;

			serde::put_str(dst, &self.client_id)?;

			if let Some(will) = &self.will {
				serde::put_str(dst, will.topic.as_str())?;
				serde::put_bytes(dst, &will.payload)?;
			}

			if let Some(credentials) = &self.credentials {
				serde::put_str(dst, &credentials.username)?;
				if let Some(password) = &credentials.password {
					serde::put_bytes(dst, password)?;
				}
			}

			Ok(())
		}

		#[inline(always)]
		fn payload_len(&self) -> usize {
			let mut len = 2 + self.protocol_name.len() + 4 + (2 + self.client_id.len());

			if let Some(will) = &self.will {
				len += 2 + will.topic.len() + 2 + will.payload.len();
			}

			if let Some(credentials) = &self.credentials {
				len += 2 + credentials.username.len();
				if let Some(password) = &credentials.password {
					len += 2 + password.len();
				}
			}

			len
		}

		fn flags(&self) -> u8 {
			let mut flags = 0;

			if self.clean_session {
				flags |= CLEAN_SESSION;
			}

			if let Some(will) = &self.will {
				flags |= WILL;
				flags |= (will.qos as u8) << 3;
				if will.retain {
					flags |= WILL_RETAIN;
				}
			}

			if let Some(credentials) = &self.credentials {
				flags |= USERNAME;
				if credentials.password.is_some() {
					flags |= PASSWORD;
				}
			}

			flags
		}
	}
}

impl ConnAck {
	pub fn deserialize_from(frame: &Frame) -> Result<Self, DeserializeError> {
		let mut reader = BytesReader::new(frame.payload.clone());

		if reader.remaining() != 2 {
			return Err(DeserializeError::MalformedPacket(
				"ConnAck packet must have length 2",
			));
		}

		let flags = reader.take_u8()?;
		let code = reader.take_u8()?.try_into()?;

		if flags & 0xfe != 0 {
			return Err(DeserializeError::MalformedPacket(
				"upper 7 bits in ConnAck flags must be zero",
			));
		}

		Ok(Self {
			session_present: flags & 0x01 == 0x01,
			code,
		})
	}

	pub fn serialize_into(&self, dst: &mut impl BufMut) -> Result<(), SerializeError> {
		let Self {
			session_present,
			code,
		} = self;
		serde::put_u8(dst, 0x20)?;
		serde::put_var(dst, 2)?;
		serde::put_u8(dst, u8::from(*session_present))?;
		serde::put_u8(dst, *code as u8)?;
		Ok(())
	}
}

const PUBLISH_HEADER_CONTROL: u8 = 0x30;
const PUBLISH_HEADER_RETAIN_FLAG: u8 = 0x01;
const PUBLISH_HEADER_DUPLICATE_FLAG: u8 = 0x08;
const PUBLISH_HEADER_QOS_MASK: u8 = 0x06;

impl Publish {
	pub fn deserialize_from(frame: &Frame) -> Result<Self, DeserializeError> {
		let mut reader = BytesReader::new(frame.payload.clone());

		// Extract properties from the header flags.
		let flags = frame.header & 0x0f;
		let retain = flags & PUBLISH_HEADER_RETAIN_FLAG == PUBLISH_HEADER_RETAIN_FLAG;
		let duplicate = flags & PUBLISH_HEADER_DUPLICATE_FLAG == PUBLISH_HEADER_DUPLICATE_FLAG;
		let qos: QoS = ((flags & PUBLISH_HEADER_QOS_MASK) >> 1).try_into()?;

		let topic = TopicBuf::new(reader.take_str()?)?;

		// The interpretation of the remaining bytes depends on the QoS.
		match qos {
			QoS::AtMostOnce => {
				if duplicate {
					return Err(DeserializeError::MalformedPacket(
						"duplicate flag must be 0 for Publish packets with QoS of AtMostOnce",
					));
				}

				Ok(Self::AtMostOnce {
					retain,
					topic,
					payload: reader.take_inner(),
				})
			}
			QoS::AtLeastOnce => Ok(Self::AtLeastOnce {
				id: reader.take_id()?,
				retain,
				duplicate,
				topic,
				payload: reader.take_inner(),
			}),
			QoS::ExactlyOnce => Ok(Self::ExactlyOnce {
				id: reader.take_id()?,
				retain,
				duplicate,
				topic,
				payload: reader.take_inner(),
			}),
		}
	}

	pub fn serialize_into(&self, dst: &mut impl BufMut) -> Result<(), SerializeError> {
		let mut header = PUBLISH_HEADER_CONTROL | (self.qos() as u8) << 1;
		if self.retain() {
			header |= PUBLISH_HEADER_RETAIN_FLAG;
		}
		if self.duplicate() {
			header |= PUBLISH_HEADER_DUPLICATE_FLAG;
		}

		let topic = self.topic();
		let payload = self.payload();
		let id_len = if self.id().is_some() { 2 } else { 0 };

		serde::put_u8(dst, header)?;
		serde::put_var(dst, 2 + topic.len() + id_len + payload.len())?;
		serde::put_str(dst, topic.as_str())?;
		if let Some(id) = self.id() {
			serde::put_u16(dst, id.get())?;
		}
		serde::put_slice(dst, payload)?;

		Ok(())
	}

	/// Returns the topic of the Publish packet.
	#[inline]
	pub fn topic(&self) -> &Topic {
		match self {
			Self::AtMostOnce { topic, .. }
			| Self::AtLeastOnce { topic, .. }
			| Self::ExactlyOnce { topic, .. } => topic,
		}
	}

	/// Returns the payload of the Publish packet.
	#[inline]
	pub fn payload(&self) -> &Bytes {
		match self {
			Self::AtMostOnce { payload, .. }
			| Self::AtLeastOnce { payload, .. }
			| Self::ExactlyOnce { payload, .. } => payload,
		}
	}

	/// Returns the QoS of the Publish packet.
	#[inline]
	pub fn qos(&self) -> QoS {
		match self {
			Self::AtMostOnce { .. } => QoS::AtMostOnce,
			Self::AtLeastOnce { .. } => QoS::AtLeastOnce,
			Self::ExactlyOnce { .. } => QoS::ExactlyOnce,
		}
	}

	/// Returns the retain flag of the Publish packet.
	#[inline]
	pub fn retain(&self) -> bool {
		match self {
			Self::AtMostOnce { retain, .. }
			| Self::AtLeastOnce { retain, .. }
			| Self::ExactlyOnce { retain, .. } => *retain,
		}
	}

	/// Returns the Packet ID of the Publish packet.
	///
	/// This will always return `None` for Publish packets with [`QoS`] of
	/// [`AtMostOnce`].
	///
	/// [`AtMostOnce`]: QoS#variant.AtMostOnce
	#[inline]
	pub fn id(&self) -> Option<PacketId> {
		match self {
			Self::AtMostOnce { .. } => None,
			Self::AtLeastOnce { id, .. } | Self::ExactlyOnce { id, .. } => Some(*id),
		}
	}

	/// Returns the duplicate flag of the Publish packet.
	///
	/// This will always return `false` for Publish packets with [`QoS`] of
	/// [`AtMostOnce`].
	///
	/// [`AtMostOnce`]: QoS#variant.AtMostOnce
	#[inline]
	pub fn duplicate(&self) -> bool {
		match self {
			Self::AtMostOnce { .. } => false,
			Self::AtLeastOnce { duplicate, .. } | Self::ExactlyOnce { duplicate, .. } => *duplicate,
		}
	}

	/// Sets the duplicate flag. Has no effect at [`QoS::AtMostOnce`].
	#[inline]
	pub fn set_duplicate(&mut self, value: bool) {
		match self {
			Self::AtMostOnce { .. } => {}
			Self::AtLeastOnce { duplicate, .. } | Self::ExactlyOnce { duplicate, .. } => {
				*duplicate = value
			}
		}
	}

	#[inline]
	pub fn set_retain(&mut self, value: bool) {
		match self {
			Self::AtMostOnce { retain, .. }
			| Self::AtLeastOnce { retain, .. }
			| Self::ExactlyOnce { retain, .. } => *retain = value,
		}
	}

	/// Consumes the packet, returning the topic and payload.
	#[inline]
	pub fn into_parts(self) -> (TopicBuf, Bytes) {
		match self {
			Self::AtMostOnce { topic, payload, .. }
			| Self::AtLeastOnce { topic, payload, .. }
			| Self::ExactlyOnce { topic, payload, .. } => (topic, payload),
		}
	}
}

impl fmt::Debug for Publish {
	#[inline]
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Publish")
			.field("id", &self.id())
			.field("qos", &self.qos())
			.field("retain", &self.retain())
			.field("duplicate", &self.duplicate())
			.field("topic", &self.topic())
			.field("payload length", &self.payload().len())
			.finish()
	}
}

impl Subscribe {
	pub fn deserialize_from(frame: &Frame) -> Result<Self, DeserializeError> {
		let mut reader = BytesReader::new(frame.payload.clone());

		let id = reader.take_id()?;
		let mut filters = Vec::new();
		while reader.has_remaining() {
			let filter = reader.take_str()?;
			let options = reader.take_u8()?;
			if options & 0xfc != 0 {
				return Err(DeserializeError::MalformedPacket(
					"reserved bits in requested QoS must be zero",
				));
			}
			filters.push((filter, options.try_into()?));
		}

		if filters.is_empty() {
			return Err(DeserializeError::MalformedPacket(
				"Subscribe packet must contain at least one filter",
			));
		}

		Ok(Self { id, filters })
	}

	pub fn serialize_into(&self, dst: &mut impl BufMut) -> Result<(), SerializeError> {
		let Self { id, filters } = self;
		serde::put_u8(dst, 0x82)?;

		let len = 2 + filters
			.iter()
			.fold(0usize, |acc, (filter, _)| acc + 3 + filter.len());

		serde::put_var(dst, len)?;
		serde::put_u16(dst, id.get())?;
		for (filter, qos) in filters {
			serde::put_str(dst, filter)?;
			serde::put_u8(dst, *qos as u8)?;
		}

		Ok(())
	}
}

impl SubAck {
	pub fn deserialize_from(frame: &Frame) -> Result<Self, DeserializeError> {
		let mut reader = BytesReader::new(frame.payload.clone());
		let id = reader.take_id()?;

		let mut result = Vec::new();
		while reader.has_remaining() {
			let return_code = reader.take_u8()?;
			let qos = match QoS::try_from(return_code) {
				Ok(qos) => Ok(qos),
				Err(_) if return_code == 0x80 => Err(SubscribeFailed),
				Err(_) => {
					return Err(DeserializeError::MalformedPacket(
						"invalid return code in SubAck",
					));
				}
			};

			result.push(qos);
		}

		Ok(Self { id, result })
	}

	pub fn serialize_into(&self, dst: &mut impl BufMut) -> Result<(), SerializeError> {
		let Self { id, result } = self;
		serde::put_u8(dst, 0x90)?;
		serde::put_var(dst, 2 + result.len())?;
		serde::put_u16(dst, id.get())?;
		for qos in result {
			serde::put_u8(dst, qos.map(|qos| qos as u8).unwrap_or(0x80))?;
		}

		Ok(())
	}
}

impl Unsubscribe {
	pub fn deserialize_from(frame: &Frame) -> Result<Self, DeserializeError> {
		let mut reader = BytesReader::new(frame.payload.clone());

		let id = reader.take_id()?;
		let mut filters = Vec::new();
		while reader.has_remaining() {
			filters.push(reader.take_str()?);
		}

		if filters.is_empty() {
			return Err(DeserializeError::MalformedPacket(
				"Unsubscribe packet must contain at least one filter",
			));
		}

		Ok(Self { id, filters })
	}

	pub fn serialize_into(&self, dst: &mut impl BufMut) -> Result<(), SerializeError> {
		let Self { id, filters } = self;
		serde::put_u8(dst, 0xa2)?;

		let len = 2 + filters
			.iter()
			.fold(0usize, |acc, filter| acc + 2 + filter.len());

		serde::put_var(dst, len)?;
		serde::put_u16(dst, id.get())?;
		for filter in filters {
			serde::put_str(dst, filter)?;
		}

		Ok(())
	}
}

macro_rules! impl_serde {
	($name:tt) => {
		impl SerializePacket for $name {
			fn serialize_into(&self, dst: &mut impl BufMut) -> Result<(), SerializeError> {
				Self::serialize_into(self, dst)
			}
		}

		impl DeserializePacket for $name {
			fn deserialize_from(frame: &Frame) -> Result<Self, DeserializeError> {
				Self::deserialize_from(frame)
			}
		}
	};
}

impl_serde!(Connect);
impl_serde!(ConnAck);
impl_serde!(Publish);
impl_serde!(PubAck);
impl_serde!(PubRec);
impl_serde!(PubRel);
impl_serde!(PubComp);
impl_serde!(Subscribe);
impl_serde!(SubAck);
impl_serde!(Unsubscribe);
impl_serde!(UnsubAck);
impl_serde!(PingReq);
impl_serde!(PingResp);
impl_serde!(Disconnect);

macro_rules! id_packet {
	($name:tt,$variant:expr,$header:literal,$label:literal) => {
		#[derive(Clone, Copy, Debug, PartialEq, Eq)]
		pub struct $name {
			pub id: PacketId,
		}

		impl $name {
			pub fn deserialize_from(frame: &Frame) -> Result<Self, DeserializeError> {
				let mut reader = BytesReader::new(frame.payload.clone());

				if reader.remaining() != 2 {
					return Err(DeserializeError::MalformedPacket(concat!(
						$label,
						" packet must have length 2"
					)));
				}

				let id = reader.take_id()?;
				Ok(Self { id })
			}

			pub fn serialize_into(&self, dst: &mut impl BufMut) -> Result<(), SerializeError> {
				let Self { id } = self;
				serde::put_u8(dst, $header)?;
				serde::put_var(dst, 2)?;
				serde::put_u16(dst, id.get())?;
				Ok(())
			}
		}

		impl From<$name> for Packet {
			#[inline]
			fn from(value: $name) -> Packet {
				$variant(value)
			}
		}
	};
}
use id_packet;

macro_rules! nul_packet {
	($name:tt,$variant:expr,$header:literal) => {
		#[derive(Clone, Copy, Debug, PartialEq, Eq)]
		pub struct $name;

		impl $name {
			pub fn deserialize_from(frame: &Frame) -> Result<Self, DeserializeError> {
				if !frame.payload.is_empty() {
					return Err(DeserializeError::MalformedPacket(
						"packet must have length 0",
					));
				}
				Ok(Self)
			}

			pub fn serialize_into(&self, dst: &mut impl BufMut) -> Result<(), SerializeError> {
				serde::put_u8(dst, $header)?;
				serde::put_var(dst, 0)?;
				Ok(())
			}
		}

		impl From<$name> for Packet {
			#[inline]
			fn from(_: $name) -> Packet {
				$variant
			}
		}
	};
}
use nul_packet;
