//! Connect, subscribe and publish authorization.
//!
//! Authorization may be slow (a database lookup, say), so it happens outside
//! the [`Broker`](crate::Broker). The driver asks the [`Authorizer`] about a
//! packet with [`authorize`] and hands the resulting [`Verdict`] to
//! [`Broker::handle_packet`](crate::Broker::handle_packet).
use crate::{broker::check_connect, ListenerId};
use core::future::Future;
use mqtt_protocol::{ConnectReturnCode, Filter, FilterBuf, Packet, Topic};
use std::{collections::HashMap, net::SocketAddr};

pub trait Authorizer {
	fn authorize_connect(
		&self,
		listener: ListenerId,
		client_id: &str,
		username: Option<&str>,
		password: Option<&[u8]>,
		peer: Option<SocketAddr>,
	) -> impl Future<Output = ConnectReturnCode> + Send;

	fn authorize_subscribe(
		&self,
		listener: ListenerId,
		client_id: &str,
		filter: &str,
	) -> impl Future<Output = bool> + Send;

	fn authorize_publish(
		&self,
		listener: ListenerId,
		client_id: &str,
		topic: &Topic,
	) -> impl Future<Output = bool> + Send;
}

/// The outcome of authorizing a packet.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum Verdict {
	/// Nothing to authorize, or everything allowed.
	#[default]
	Allow,
	Connect {
		client_id: String,
		code: ConnectReturnCode,
	},
	/// One entry per requested filter.
	Subscribe(Vec<bool>),
	Publish(bool),
}

/// Allows everything.
#[derive(Clone, Copy, Debug, Default)]
pub struct AllowAll;

impl Authorizer for AllowAll {
	async fn authorize_connect(
		&self,
		_: ListenerId,
		_: &str,
		_: Option<&str>,
		_: Option<&[u8]>,
		_: Option<SocketAddr>,
	) -> ConnectReturnCode {
		ConnectReturnCode::Accepted
	}

	async fn authorize_subscribe(&self, _: ListenerId, _: &str, _: &str) -> bool {
		true
	}

	async fn authorize_publish(&self, _: ListenerId, _: &str, _: &Topic) -> bool {
		true
	}
}

/// Access rules for one client id.
#[derive(Clone, Debug, Default)]
pub struct Policy {
	pub username: String,
	pub password: String,

	/// Filters the client may subscribe to, compared literally.
	pub subscribe: Vec<String>,

	/// Filters matching the topics the client may publish to.
	pub publish: Vec<FilterBuf>,
}

/// In-memory policies keyed by client id. Clients without a policy are
/// refused.
#[derive(Clone, Debug, Default)]
pub struct PolicyAuthorizer {
	policies: HashMap<String, Policy>,
}

impl PolicyAuthorizer {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn add_policy(&mut self, client_id: impl Into<String>, policy: Policy) {
		self.policies.insert(client_id.into(), policy);
	}

	pub fn remove_policy(&mut self, client_id: &str) -> Option<Policy> {
		self.policies.remove(client_id)
	}

	fn check_connect(
		&self,
		client_id: &str,
		username: Option<&str>,
		password: Option<&[u8]>,
	) -> ConnectReturnCode {
		let Some(policy) = self.policies.get(client_id) else {
			return ConnectReturnCode::NotAuthorized;
		};

		if username.unwrap_or_default() != policy.username
			|| password.unwrap_or_default() != policy.password.as_bytes()
		{
			return ConnectReturnCode::BadUsernameOrPassword;
		}

		ConnectReturnCode::Accepted
	}

	fn check_subscribe(&self, client_id: &str, filter: &str) -> bool {
		self.policies
			.get(client_id)
			.is_some_and(|policy| policy.subscribe.iter().any(|allowed| allowed == filter))
	}

	fn check_publish(&self, client_id: &str, topic: &Topic) -> bool {
		self.policies.get(client_id).is_some_and(|policy| {
			policy
				.publish
				.iter()
				.any(|allowed| Filter::matches(allowed, topic))
		})
	}
}

impl Authorizer for PolicyAuthorizer {
	async fn authorize_connect(
		&self,
		_: ListenerId,
		client_id: &str,
		username: Option<&str>,
		password: Option<&[u8]>,
		_: Option<SocketAddr>,
	) -> ConnectReturnCode {
		self.check_connect(client_id, username, password)
	}

	async fn authorize_subscribe(&self, _: ListenerId, client_id: &str, filter: &str) -> bool {
		self.check_subscribe(client_id, filter)
	}

	async fn authorize_publish(&self, _: ListenerId, client_id: &str, topic: &Topic) -> bool {
		self.check_publish(client_id, topic)
	}
}

/// Consults `authorizer` about `packet`, received on `listener`.
///
/// `client_id` is the id of the session bound to the connection, or `None`
/// before Connect has been accepted.
pub async fn authorize<A: Authorizer>(
	authorizer: &A,
	listener: ListenerId,
	client_id: Option<&str>,
	peer: Option<SocketAddr>,
	packet: &Packet,
) -> Verdict {
	match (packet, client_id) {
		(Packet::Connect(connect), None) => {
			let client_id = match check_connect(connect) {
				Ok(client_id) => client_id,
				Err(code) => {
					return Verdict::Connect {
						client_id: connect.client_id.clone(),
						code,
					}
				}
			};

			let credentials = connect.credentials.as_ref();
			let code = authorizer
				.authorize_connect(
					listener,
					&client_id,
					credentials.map(|credentials| credentials.username.as_str()),
					credentials.and_then(|credentials| credentials.password.as_deref()),
					peer,
				)
				.await;

			Verdict::Connect { client_id, code }
		}
		(Packet::Subscribe(subscribe), Some(client_id)) => {
			let mut granted = Vec::with_capacity(subscribe.filters.len());
			for (filter, _) in &subscribe.filters {
				granted.push(
					authorizer
						.authorize_subscribe(listener, client_id, filter)
						.await,
				);
			}
			Verdict::Subscribe(granted)
		}
		(Packet::Publish(publish), Some(client_id)) => Verdict::Publish(
			authorizer
				.authorize_publish(listener, client_id, publish.topic())
				.await,
		),
		_ => Verdict::Allow,
	}
}

#[cfg(test)]
mod tests {
	use super::{authorize, AllowAll, Policy, PolicyAuthorizer, Verdict};
	use crate::ListenerId;
	use mqtt_protocol::{
		packets::{Connect, Publish, Subscribe},
		ConnectReturnCode, FilterBuf, Packet, PacketId, QoS, TopicBuf,
	};

	const LISTENER: ListenerId = ListenerId(0);

	fn authorizer() -> PolicyAuthorizer {
		let mut authorizer = PolicyAuthorizer::new();
		authorizer.add_policy(
			"sensor",
			Policy {
				username: "user".into(),
				password: "secret".into(),
				subscribe: vec!["commands/#".into()],
				publish: vec![FilterBuf::new("sensors/+").unwrap()],
			},
		);
		authorizer
	}

	fn connect(client_id: &str, credentials: Option<(&str, &str)>) -> Packet {
		Connect {
			client_id: client_id.into(),
			credentials: credentials.map(Into::into),
			..Default::default()
		}
		.into()
	}

	#[test]
	fn authorizes_connect() {
		let authorizer = authorizer();
		let code = |packet: Packet| {
			match tokio_test::block_on(authorize(&authorizer, LISTENER, None, None, &packet)) {
				Verdict::Connect { code, .. } => code,
				verdict => panic!("unexpected {verdict:?}"),
			}
		};

		assert_eq!(
			code(connect("sensor", Some(("user", "secret")))),
			ConnectReturnCode::Accepted
		);
		assert_eq!(
			code(connect("sensor", Some(("user", "wrong")))),
			ConnectReturnCode::BadUsernameOrPassword
		);
		assert_eq!(
			code(connect("other", Some(("user", "secret")))),
			ConnectReturnCode::NotAuthorized
		);
	}

	#[test]
	fn authorizes_subscribe_filters_literally() {
		let authorizer = authorizer();
		let packet = Packet::from(Subscribe {
			id: PacketId::new(1).unwrap(),
			filters: vec![
				("commands/#".into(), QoS::AtMostOnce),
				("commands/reboot".into(), QoS::AtMostOnce),
			],
		});

		let verdict = tokio_test::block_on(authorize(
			&authorizer,
			LISTENER,
			Some("sensor"),
			None,
			&packet,
		));
		assert_eq!(verdict, Verdict::Subscribe(vec![true, false]));
	}

	#[test]
	fn authorizes_publish_by_filter() {
		let authorizer = authorizer();
		let publish = |topic: &str| {
			Packet::from(Publish::AtMostOnce {
				retain: false,
				topic: TopicBuf::new(topic).unwrap(),
				payload: Default::default(),
			})
		};

		let verdict = |packet: Packet| {
			tokio_test::block_on(authorize(
				&authorizer,
				LISTENER,
				Some("sensor"),
				None,
				&packet,
			))
		};

		assert_eq!(verdict(publish("sensors/temp")), Verdict::Publish(true));
		assert_eq!(verdict(publish("actuators/fan")), Verdict::Publish(false));
	}

	#[test]
	fn synthesizes_empty_client_id() {
		let verdict = tokio_test::block_on(authorize(
			&AllowAll,
			LISTENER,
			None,
			None,
			&connect("", None),
		));

		let Verdict::Connect { client_id, code } = verdict else {
			panic!("unexpected {verdict:?}");
		};
		assert_eq!(code, ConnectReturnCode::Accepted);
		assert!(!client_id.is_empty());
	}
}
