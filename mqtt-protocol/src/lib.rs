//! Wire-level building blocks for MQTT 3.1.1.
//!
//! Everything in this crate is pure: packets are decoded from and encoded
//! into byte buffers, topic filters are validated and matched, and the
//! retransmission ledger tracks unacknowledged packets. No I/O is performed.
pub mod bytes_reader;
mod filter;
pub mod frame;
mod ledger;
mod message;
pub mod misc;
mod packet;
pub mod packets;
mod qos;
pub mod serde;
mod topic;

pub use filter::{Filter, FilterBuf, InvalidFilter, Matches};
pub use ledger::{PacketIdAllocator, RetransmissionLedger};
pub use message::Message;
pub use packet::{Packet, PacketType};
pub use packets::{ConnectReturnCode, DeserializeError, SubscribeFailed, SubscribeReturnCode};
pub use qos::{InvalidQoS, QoS};
pub use topic::{InvalidTopic, Topic, TopicBuf};

pub type PacketId = core::num::NonZeroU16;

/// Protocol level for MQTT 3.1.1.
pub const PROTOCOL_LEVEL: u8 = 4;
