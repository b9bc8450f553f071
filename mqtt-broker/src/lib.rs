//! A sans-io MQTT 3.1.1 broker.
//!
//! The [`Broker`] tracks connections, sessions, subscriptions and retained
//! messages. It performs no I/O: bytes leave through a [`Transport`] supplied
//! for every accepted connection, and notifications are drained with
//! [`Broker::poll_event`].
mod authorizer;
mod broker;
mod config;
mod event;
mod retained;
mod session;
mod transport;

pub use authorizer::{authorize, AllowAll, Authorizer, Policy, PolicyAuthorizer, Verdict};
pub use broker::{Broker, BrokerError};
pub use config::BrokerConfiguration;
pub use event::BrokerEvent;
pub use retained::RetainedStore;
pub use session::Subscription;
pub use transport::{ConnectionId, ListenerId, Transport};
