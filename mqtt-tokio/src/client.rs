use crate::{subscription::Subscription, Command, CommandTx, ResponseTx};
use bytes::Bytes;
use core::fmt;
use mqtt_client::conversions::{Filters, FiltersWithQoS};
use mqtt_protocol::{InvalidFilter, InvalidTopic, Message, QoS, TopicBuf};
use std::convert;
use tokio::sync::{mpsc, oneshot};

/// Handle to a client task created by [`tcp_client`](crate::tcp_client).
///
/// Handles are cheap to clone. The task disconnects once every handle and
/// [`Subscription`] has been dropped.
#[derive(Clone, Debug)]
pub struct Client {
	tx: CommandTx,
}

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
	#[error("client task closed")]
	ClientTaskClosed,
	#[error("invalid filter(s): {0}")]
	InvalidFilter(#[from] InvalidFilter),
	#[error("invalid topic: {0}")]
	InvalidTopic(#[from] InvalidTopic),
}

impl Client {
	pub(crate) fn new(tx: CommandTx) -> Self {
		Self { tx }
	}

	/// Sends a command built around a fresh response channel and waits for
	/// the task to answer.
	async fn request<R>(
		&self,
		command: impl FnOnce(ResponseTx<R>) -> Command,
	) -> Result<R, ClientError> {
		let (response, response_rx) = oneshot::channel();
		self.tx.send(Box::new(command(response)))?;
		Ok(response_rx.await?)
	}

	/// Subscribes to `filters`, waiting for the Server's [`SubAck`].
	///
	/// Messages matching the granted filters are buffered in the returned
	/// [`Subscription`], `len` at most. Filters the Server refused are left
	/// out of [`Subscription::filters`].
	///
	/// # Example
	///
	/// ```no_run
	/// # tokio_test::block_on(async {
	/// use mqtt_protocol::QoS;
	///
	/// let (client, task) = mqtt_tokio::tcp_client(Default::default(), Default::default());
	/// tokio::spawn(task);
	///
	/// let mut readings = client
	/// 	.subscribe(vec![("sensors/+/temperature", QoS::AtLeastOnce)], 16)
	/// 	.await
	/// 	.unwrap();
	/// while let Some(message) = readings.recv().await {
	/// 	println!("{} = {:?}", message.topic, message.payload);
	/// }
	/// # })
	/// ```
	///
	/// [`SubAck`]: mqtt_protocol::packets::SubAck
	#[inline]
	pub async fn subscribe<T, E>(&self, filters: T, len: usize) -> Result<Subscription, ClientError>
	where
		T: TryInto<FiltersWithQoS, Error = E>,
		ClientError: From<E>,
	{
		let FiltersWithQoS(filters) = filters.try_into()?;

		// Every granted filter is routed into this one channel.
		let (messages, publish_rx) = mpsc::channel(len);
		let granted = self
			.request(|reply| Command::Subscribe {
				filters,
				messages,
				reply,
			})
			.await?;

		Ok(Subscription::new(granted, publish_rx, self.tx.clone()))
	}

	/// Publishes `payload` to `topic`.
	///
	/// Returns once the message has been handed to the connection for QoS 0,
	/// once [`PubAck`] arrives for QoS 1 and once [`PubComp`] arrives for
	/// QoS 2.
	///
	/// # Example
	///
	/// ```no_run
	/// # tokio_test::block_on(async {
	/// use mqtt_protocol::QoS;
	///
	/// let (client, task) = mqtt_tokio::tcp_client(Default::default(), Default::default());
	/// tokio::spawn(task);
	///
	/// client
	/// 	.publish("lights/kitchen", "on", QoS::ExactlyOnce, true)
	/// 	.await
	/// 	.unwrap();
	/// # })
	/// ```
	///
	/// [`PubAck`]: mqtt_protocol::packets::PubAck
	/// [`PubComp`]: mqtt_protocol::packets::PubComp
	pub async fn publish<T, E>(
		&self,
		topic: T,
		payload: impl Into<Bytes> + fmt::Debug,
		qos: QoS,
		retain: bool,
	) -> Result<(), ClientError>
	where
		T: TryInto<TopicBuf, Error = E>,
		ClientError: From<E>,
	{
		let message = Message {
			topic: topic.try_into()?,
			payload: payload.into(),
			qos,
			retain,
		};
		self.request(|reply| Command::Publish { message, reply })
			.await
	}

	/// Unsubscribes from `filters`, waiting for the Server's [`UnsubAck`].
	/// Subscriptions stop receiving messages for those filters.
	///
	/// [`UnsubAck`]: mqtt_protocol::packets::UnsubAck
	pub async fn unsubscribe<T, E>(&self, filters: T) -> Result<(), ClientError>
	where
		T: TryInto<Filters, Error = E>,
		ClientError: From<E>,
	{
		let Filters(filters) = filters.try_into()?;
		self.request(|reply| Command::Unsubscribe { filters, reply })
			.await
	}

	/// Sends Disconnect and ends the client task, which stops reconnecting.
	/// Other handles fail with [`ClientError::ClientTaskClosed`] from then on.
	pub async fn disconnect(self) -> Result<(), ClientError> {
		self.tx.send(Box::new(Command::Disconnect))?;
		Ok(())
	}
}

impl<T> From<mpsc::error::SendError<T>> for ClientError {
	fn from(_: mpsc::error::SendError<T>) -> Self {
		Self::ClientTaskClosed
	}
}

impl From<oneshot::error::RecvError> for ClientError {
	fn from(_: oneshot::error::RecvError) -> Self {
		Self::ClientTaskClosed
	}
}

impl From<convert::Infallible> for ClientError {
	fn from(value: convert::Infallible) -> Self {
		match value {}
	}
}
