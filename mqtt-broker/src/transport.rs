use bytes::Bytes;
use core::fmt;
use std::net::SocketAddr;

/// The byte stream to a single Client.
///
/// Implementations queue bytes for the peer; they must not block.
pub trait Transport {
	/// Queues `bytes` for the peer. Returns `false` if the transport has
	/// already closed.
	fn send(&mut self, bytes: Bytes) -> bool;

	/// Closes the transport after any queued bytes have been flushed.
	fn close(&mut self);

	fn peer_address(&self) -> Option<SocketAddr>;
}

/// Identifies a connection accepted by the [`Broker`](crate::Broker).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub(crate) u64);

/// Identifies a listener registered with the [`Broker`](crate::Broker).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(pub(crate) u64);

impl fmt::Display for ConnectionId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "connection-{}", self.0)
	}
}

impl fmt::Display for ListenerId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "listener-{}", self.0)
	}
}
