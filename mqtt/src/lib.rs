#![allow(clippy::tabs_in_doc_comments)]
//! # MQTT
//!
//! MQTT 3.1.1 for clients and brokers.
//!
//! The codec and the sans-io client session are always available. Enable
//! `broker` for the sans-io broker, `tokio-client` for the async client and
//! `tokio-server` for the TCP broker.
pub use mqtt_client::*;
pub use mqtt_protocol::*;

#[cfg(feature = "broker")]
pub mod broker {
	pub use mqtt_broker::*;
}

#[cfg(any(feature = "tokio-client", feature = "tokio-server"))]
pub use mqtt_tokio::{
	create_client, tcp_client, Client, ClientError, PublishRx, PublishTx, Subscription, Task,
};

#[cfg(feature = "tokio-server")]
pub use mqtt_tokio::{ConnectionHandle, Server, ServerError};
