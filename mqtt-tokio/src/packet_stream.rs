use bytes::{Buf, BytesMut};
use mqtt_protocol::{DeserializeError, Packet};
use std::io;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

#[derive(Debug, thiserror::Error)]
pub enum PacketStreamError {
	#[error(transparent)]
	Io(#[from] io::Error),
	#[error("malformed packet: {0}")]
	Deserialize(#[from] DeserializeError),
	#[error("connection reset by peer")]
	ConnectionReset,
}

/// Reads whole packets from a byte stream.
#[derive(Debug)]
pub struct PacketStream<T> {
	stream: T,
	buffer: BytesMut,
}

impl<T> PacketStream<T> {
	/// Create a new `PacketStream` with the given stream and buffer length.
	pub fn new(stream: T, len: usize) -> Self {
		Self {
			stream,
			buffer: BytesMut::with_capacity(len),
		}
	}

	/// Attempt to parse a single [`Packet`] from the buffered data.
	fn parse_packet(&mut self) -> Result<Option<Packet>, DeserializeError> {
		let Some((consumed, packet)) = Packet::decode(&self.buffer)? else {
			return Ok(None);
		};

		self.buffer.advance(consumed);
		Ok(Some(packet))
	}

	#[inline]
	pub fn get_mut(&mut self) -> &mut T {
		&mut self.stream
	}
}

impl<T: AsyncRead + Unpin> PacketStream<T> {
	/// Read a single [`Packet`] from the underlying stream.
	///
	/// Returns `None` when the peer closed the stream between packets. This
	/// is cancel safe: bytes already read stay buffered.
	pub async fn read_packet(&mut self) -> Result<Option<Packet>, PacketStreamError> {
		loop {
			if let Some(packet) = self.parse_packet()? {
				return Ok(Some(packet));
			}

			if 0 == self.stream.read_buf(&mut self.buffer).await? {
				// If the buffer is empty the connection was shutdown cleanly,
				// otherwise the peer closed the socket while sending a packet.
				if self.buffer.is_empty() {
					return Ok(None);
				} else {
					return Err(PacketStreamError::ConnectionReset);
				}
			}
		}
	}
}

impl<T: AsyncWrite + Unpin> PacketStream<T> {
	/// Write `buffer` to the underlying stream and flush it.
	pub async fn write(&mut self, mut buffer: impl Buf) -> io::Result<()> {
		while buffer.has_remaining() {
			self.stream.write_buf(&mut buffer).await?;
		}
		self.stream.flush().await?;
		Ok(())
	}

	pub async fn shutdown(&mut self) -> io::Result<()> {
		self.stream.shutdown().await
	}
}
