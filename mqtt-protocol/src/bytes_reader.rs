use crate::{packets::DeserializeError, PacketId, QoS};
use bytes::{Buf, Bytes};

type Result<T> = std::result::Result<T, DeserializeError>;

/// Reads MQTT primitives from the body of a single, complete packet.
///
/// Every read is bounded by the bytes remaining in the packet. Running out
/// of bytes is [`Truncated`](DeserializeError::Truncated), never
/// [`Incomplete`](DeserializeError::Incomplete).
#[derive(Debug)]
pub struct BytesReader {
	bytes: Bytes,
}

impl BytesReader {
	#[inline]
	pub fn new(bytes: Bytes) -> Self {
		Self { bytes }
	}

	#[inline]
	pub fn remaining(&self) -> usize {
		self.bytes.remaining()
	}

	#[inline]
	pub fn has_remaining(&self) -> bool {
		self.bytes.has_remaining()
	}

	pub fn require(&self, len: usize) -> Result<()> {
		if self.bytes.remaining() >= len {
			Ok(())
		} else {
			Err(DeserializeError::Truncated)
		}
	}

	/// Fails if any bytes are left unread.
	pub fn finish(self) -> Result<()> {
		if self.bytes.is_empty() {
			Ok(())
		} else {
			Err(DeserializeError::MalformedPacket(
				"trailing bytes after packet body",
			))
		}
	}

	/// Consumes the reader, returning the unread bytes.
	#[inline]
	pub fn take_inner(self) -> Bytes {
		self.bytes
	}

	pub fn take_u8(&mut self) -> Result<u8> {
		self.require(1)?;
		Ok(self.bytes.get_u8())
	}

	pub fn take_u16(&mut self) -> Result<u16> {
		self.require(2)?;
		Ok(self.bytes.get_u16())
	}

	pub fn take_id(&mut self) -> Result<PacketId> {
		let id = self.take_u16()?;
		PacketId::new(id).ok_or(DeserializeError::InvalidPacketId)
	}

	pub fn take_qos(&mut self) -> Result<QoS> {
		Ok(self.take_u8()?.try_into()?)
	}

	pub fn take_slice(&mut self, len: usize) -> Result<Bytes> {
		self.require(len)?;
		Ok(self.bytes.split_to(len))
	}

	/// Reads a length-prefixed byte string.
	pub fn take_bytes(&mut self) -> Result<Bytes> {
		let len = self.take_u16()?;
		self.take_slice(len.into())
	}

	/// Reads a length-prefixed UTF-8 string.
	pub fn take_str(&mut self) -> Result<String> {
		let bytes = self.take_bytes()?;
		let s = String::from_utf8(bytes.into()).map_err(|error| error.utf8_error())?;
		Ok(s)
	}
}
