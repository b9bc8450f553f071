//! Primitive encoders for the MQTT wire format, and the remaining length
//! decoder.
use crate::packets::DeserializeError;
use bytes::BufMut;
use std::mem;

/// Largest value representable by the four byte remaining length field.
pub const MAX_REMAINING_LENGTH: usize = 268_435_455;

#[derive(Debug, thiserror::Error)]
pub enum SerializeError {
	#[error("destination buffer is full")]
	BufferFull,
	#[error("string exceeds maximum length for an MQTT string (65,535 bytes)")]
	StringTooLong,
	#[error("packet exceeds maximum remaining length")]
	PacketTooLarge,
}

pub fn require_mut(dst: &impl BufMut, len: usize) -> Result<(), SerializeError> {
	if dst.remaining_mut() < len {
		Err(SerializeError::BufferFull)
	} else {
		Ok(())
	}
}

pub fn put_u8(dst: &mut impl BufMut, val: u8) -> Result<(), SerializeError> {
	require_mut(dst, mem::size_of::<u8>())?;
	dst.put_u8(val);
	Ok(())
}

pub fn put_u16(dst: &mut impl BufMut, val: u16) -> Result<(), SerializeError> {
	require_mut(dst, mem::size_of::<u16>())?;
	dst.put_u16(val);
	Ok(())
}

pub fn put_slice(dst: &mut impl BufMut, slice: &[u8]) -> Result<(), SerializeError> {
	require_mut(dst, slice.len())?;
	dst.put_slice(slice);
	Ok(())
}

/// Writes a length-prefixed byte string.
pub fn put_bytes(dst: &mut impl BufMut, bytes: &[u8]) -> Result<(), SerializeError> {
	let len = u16::try_from(bytes.len()).map_err(|_| SerializeError::StringTooLong)?;
	put_u16(dst, len)?;
	put_slice(dst, bytes)
}

#[inline]
pub fn put_str(dst: &mut impl BufMut, s: &str) -> Result<(), SerializeError> {
	put_bytes(dst, s.as_bytes())
}

pub fn put_var(dst: &mut impl BufMut, mut value: usize) -> Result<(), SerializeError> {
	if value > MAX_REMAINING_LENGTH {
		return Err(SerializeError::PacketTooLarge);
	}

	loop {
		let mut encoded = value % 0x80;
		value /= 0x80;
		if value > 0 {
			encoded |= 0x80;
		}
		put_u8(dst, encoded as u8)?;
		if value == 0 {
			break Ok(());
		}
	}
}

/// Decodes a remaining length field from the start of `src`.
///
/// Returns the decoded value and the number of bytes the field occupied. A
/// field may span at most four bytes; a continuation bit on the fourth byte
/// is malformed.
pub fn get_var(src: &[u8]) -> Result<(usize, usize), DeserializeError> {
	let mut value = 0;
	for (position, byte) in src.iter().take(4).enumerate() {
		value += usize::from(byte & 0x7f) << (7 * position);
		if byte & 0x80 == 0 {
			return Ok((value, position + 1));
		}
	}

	if src.len() >= 4 {
		Err(DeserializeError::MalformedLength)
	} else {
		Err(DeserializeError::Incomplete)
	}
}

/// Number of bytes `put_var` writes for `value`.
pub fn var_len(value: usize) -> usize {
	match value {
		0..=0x7f => 1,
		0x80..=0x3fff => 2,
		0x4000..=0x1f_ffff => 3,
		_ => 4,
	}
}
