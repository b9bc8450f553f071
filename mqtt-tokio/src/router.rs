use crate::{PublishTx, ResponseTx};
use mqtt_protocol::{FilterBuf, Message, PacketId, QoS, SubscribeReturnCode};
use std::collections::{BTreeMap, HashMap};

#[derive(Debug)]
struct PendingSubscribe {
	filters: Vec<(FilterBuf, QoS)>,
	channel: Option<PublishTx>,
	response: Option<ResponseTx<Vec<(FilterBuf, QoS)>>>,
}

#[derive(Debug)]
struct PendingUnsubscribe {
	filters: Vec<FilterBuf>,
	response: ResponseTx<()>,
}

/// Tracks the client handle's outstanding requests and routes incoming
/// messages to subscriptions.
#[derive(Debug, Default)]
pub(crate) struct Router {
	publishes: HashMap<PacketId, ResponseTx<()>>,
	subscribes: HashMap<PacketId, PendingSubscribe>,
	unsubscribes: HashMap<PacketId, PendingUnsubscribe>,

	/// Active subscriptions.
	subscriptions: BTreeMap<FilterBuf, (QoS, PublishTx)>,
}

impl Router {
	pub fn publish_sent(&mut self, id: PacketId, response: ResponseTx<()>) {
		self.publishes.insert(id, response);
	}

	pub fn published(&mut self, id: PacketId) {
		if let Some(response) = self.publishes.remove(&id) {
			let _ = response.send(());
		}
	}

	pub fn subscribe_sent(
		&mut self,
		id: PacketId,
		filters: Vec<(FilterBuf, QoS)>,
		channel: PublishTx,
		response: ResponseTx<Vec<(FilterBuf, QoS)>>,
	) {
		self.subscribes.insert(
			id,
			PendingSubscribe {
				filters,
				channel: Some(channel),
				response: Some(response),
			},
		);
	}

	/// Filters to subscribe to again when the Server did not keep our
	/// session.
	pub fn resubscribe_filters(&self) -> Vec<(FilterBuf, QoS)> {
		self.subscriptions
			.iter()
			.map(|(filter, (qos, _))| (filter.clone(), *qos))
			.collect()
	}

	pub fn resubscribe_sent(&mut self, id: PacketId, filters: Vec<(FilterBuf, QoS)>) {
		self.subscribes.insert(
			id,
			PendingSubscribe {
				filters,
				channel: None,
				response: None,
			},
		);
	}

	pub fn subscribed(&mut self, id: PacketId, result: Vec<SubscribeReturnCode>) {
		let Some(PendingSubscribe {
			filters,
			channel,
			response,
		}) = self.subscribes.remove(&id)
		else {
			return;
		};

		let granted: Vec<_> = filters
			.into_iter()
			.zip(result)
			.filter_map(|((filter, _), result)| Some((filter, result.ok()?)))
			.collect();

		for (filter, qos) in &granted {
			match &channel {
				Some(channel) => {
					self.subscriptions
						.insert(filter.clone(), (*qos, channel.clone()));
				}
				None => {
					if let Some(existing) = self.subscriptions.get_mut(filter) {
						existing.0 = *qos;
					}
				}
			}
		}

		tracing::info!(?granted, "subscribed");
		if let Some(response) = response {
			if response.send(granted).is_err() {
				tracing::warn!(%id, "response channel for SubAck closed");
			}
		}
	}

	pub fn unsubscribe_sent(
		&mut self,
		id: PacketId,
		filters: Vec<FilterBuf>,
		response: ResponseTx<()>,
	) {
		self.unsubscribes
			.insert(id, PendingUnsubscribe { filters, response });
	}

	pub fn unsubscribed(&mut self, id: PacketId) {
		let Some(PendingUnsubscribe { filters, response }) = self.unsubscribes.remove(&id) else {
			return;
		};

		for filter in &filters {
			self.subscriptions.remove(filter);
		}

		tracing::info!(?filters, "unsubscribed");
		let _ = response.send(());
	}

	/// Finds the channel of the most specific subscription matching the
	/// message's topic.
	pub fn find_channel(&self, message: &Message) -> Option<&PublishTx> {
		self.subscriptions
			.iter()
			.filter_map(|(filter, (_, channel))| {
				let matches = filter.matches_topic(&message.topic)?;
				Some((matches.score(), channel))
			})
			.max_by_key(|(score, _)| *score)
			.map(|(_, channel)| channel)
	}

	/// Delivers `message` to its subscription. Messages for closed
	/// subscriptions are dropped.
	pub async fn route(&self, message: Message) {
		let Some(channel) = self.find_channel(&message) else {
			tracing::warn!(topic = %message.topic, "no subscription for message");
			return;
		};

		if channel.send(message).await.is_err() {
			tracing::debug!("subscription closed, message dropped");
		}
	}
}
