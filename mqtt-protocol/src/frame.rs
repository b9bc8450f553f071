use crate::{packets::DeserializeError, serde};
use bytes::Bytes;

/// A complete packet: the fixed header byte and the packet body.
#[derive(Debug)]
pub struct Frame {
	pub header: u8,
	pub payload: Bytes,
}

impl Frame {
	/// Checks whether a complete packet frame is buffered at the start of
	/// `src`. On success returns the length of the frame, which is the header
	/// byte, the remaining length field and the remaining length.
	pub fn check(src: &[u8]) -> Result<usize, DeserializeError> {
		let (&header, rest) = src.split_first().ok_or(DeserializeError::Incomplete)?;

		// Packet types 0 and 15 are reserved.
		if matches!(header & 0xf0, 0x00 | 0xf0) {
			return Err(DeserializeError::InvalidHeader(header));
		}

		let (length, length_len) = serde::get_var(rest)?;
		let extent = 1 + length_len + length;
		if src.len() < extent {
			return Err(DeserializeError::Incomplete);
		}

		Ok(extent)
	}

	/// Splits a frame previously measured by [`check`](Self::check) into
	/// header and body.
	///
	/// `buffer` should contain *exactly* the length of the complete frame.
	pub fn parse(buffer: Bytes) -> Result<Self, DeserializeError> {
		let header = *buffer.first().ok_or(DeserializeError::Incomplete)?;
		let (length, length_len) = serde::get_var(&buffer[1..])?;

		if buffer.len() != 1 + length_len + length {
			return Err(DeserializeError::MalformedLength);
		}

		let payload = buffer.slice(1 + length_len..);
		Ok(Self { header, payload })
	}
}
