use crate::{ClientError, Command, CommandTx, PublishRx, ResponseTx};
use mqtt_protocol::{FilterBuf, Message, QoS};
use tokio::sync::oneshot;

/// Messages for the filters granted by one Subscribe request.
///
/// Dropping the subscription unsubscribes from its filters without waiting
/// for the Server.
#[derive(Debug)]
pub struct Subscription {
	command_tx: CommandTx,
	publish_rx: PublishRx,
	granted: Vec<(FilterBuf, QoS)>,
}

impl Subscription {
	pub(crate) fn new(granted: Vec<(FilterBuf, QoS)>, rx: PublishRx, tx: CommandTx) -> Self {
		Self {
			command_tx: tx,
			publish_rx: rx,
			granted,
		}
	}

	/// Waits for the next message matching the subscription.
	///
	/// Returns `None` once the client task has ended.
	///
	/// # Example
	/// ```no_run
	/// # tokio_test::block_on(async {
	/// # let (client, task) = mqtt_tokio::tcp_client(Default::default(), Default::default());
	/// # tokio::spawn(task);
	/// let mut subscription = client.subscribe("a/b", 2).await.unwrap();
	/// while let Some(message) = subscription.recv().await {
	/// 	println!("{}: {:?}", &message.topic, &message.payload[..]);
	/// }
	/// # });
	/// ```
	pub async fn recv(&mut self) -> Option<Message> {
		let message = self.publish_rx.recv().await;
		if message.is_none() {
			// Nothing left to unsubscribe from.
			self.granted.clear();
		}
		message
	}

	/// Unsubscribes from every filter, returning once the Server has sent
	/// UnsubAck.
	#[tracing::instrument(ret, err)]
	pub async fn unsubscribe(mut self) -> Result<(), ClientError> {
		let (response, response_rx) = oneshot::channel();
		if let Some(command) = self.unsubscribe_command(response) {
			self.command_tx.send(command)?;
			response_rx.await?;
		}
		Ok(())
	}

	/// The filters the Server accepted, with the granted QoS.
	#[inline]
	pub fn filters(&self) -> &[(FilterBuf, QoS)] {
		&self.granted
	}

	fn unsubscribe_command(&mut self, reply: ResponseTx<()>) -> Option<Box<Command>> {
		if self.granted.is_empty() {
			return None;
		}

		let filters = self.granted.drain(..).map(|(filter, _)| filter).collect();
		Some(Command::Unsubscribe { filters, reply }.into())
	}
}

impl Drop for Subscription {
	fn drop(&mut self) {
		let (response, _) = oneshot::channel();
		if let Some(command) = self.unsubscribe_command(response) {
			let _ = self.command_tx.send(command);
		}
	}
}
