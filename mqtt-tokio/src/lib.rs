//! Tokio drivers for the sans-io MQTT client and broker.
//!
//! [`tcp_client`] spawns nothing itself: it returns a [`Client`] handle and
//! the [`Task`] that owns the connection, which the caller must spawn.
//! [`Server`] runs a broker on any number of TCP listeners.
mod client;
mod connection;
mod packet_stream;
mod router;
mod server;
mod subscription;
mod task;

use mqtt_client::{
	command::Channels,
	transport::{TcpConfiguration, Transport},
	ClientConfiguration, ClientOptions, ClientSession,
};
use mqtt_protocol::Message;
use std::{future::Future, pin::Pin};
use tokio::sync::{mpsc, oneshot};

pub use client::{Client, ClientError};
pub use connection::ConnectionHandle;
pub use packet_stream::{PacketStream, PacketStreamError};
pub use server::{Server, ServerError};
pub use subscription::Subscription;

pub type PublishTx = mpsc::Sender<Message>;
pub type PublishRx = mpsc::Receiver<Message>;

pub(crate) type ResponseTx<T> = oneshot::Sender<T>;

/// Subscriptions get a bounded message channel, requests a oneshot reply.
#[derive(Debug)]
pub(crate) enum Oneshot {}

impl Channels for Oneshot {
	type Messages = PublishTx;
	type Reply<T> = ResponseTx<T>;
}

type Command = mqtt_client::command::Command<Oneshot>;
type CommandTx = mpsc::UnboundedSender<Box<Command>>;
type CommandRx = mpsc::UnboundedReceiver<Box<Command>>;

/// The future driving a client's connection.
pub type Task = Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + 'static>>;

pub fn create_client(options: ClientOptions) -> (Client, Task) {
	let ClientOptions {
		transport,
		configuration,
	} = options;
	match transport {
		Transport::Tcp(transport) => tcp_client(transport, configuration),
	}
}

pub fn tcp_client(transport: TcpConfiguration, configuration: ClientConfiguration) -> (Client, Task) {
	let (command_tx, command_rx) = mpsc::unbounded_channel();

	tracing::debug!(?configuration);
	let session = ClientSession::new(configuration);
	let task = Box::pin(task::client_task(transport, session, command_rx));

	(Client::new(command_tx), task)
}
