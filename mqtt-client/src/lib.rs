//! Sans-io MQTT client.
//!
//! [`ClientSession`] implements the client half of the protocol: the
//! Connect/ConnAck handshake, QoS 1 and 2 flows in both directions,
//! keep-alive pings and the reconnection back-off. Drivers such as
//! `mqtt-tokio` own the transport and the clock.
pub mod client_configuration;
pub mod client_options;
pub mod command;
pub mod conversions;
mod holdoff;
mod state;
pub mod transport;

pub use client_configuration::ClientConfiguration;
pub use client_options::ClientOptions;
pub use holdoff::HoldOff;
pub use state::{ClientSession, ConnectionState, Event, StateError};
