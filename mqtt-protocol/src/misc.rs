use crate::{QoS, TopicBuf};
use bytes::Bytes;

/// Client credentials.
///
/// It is not possible to set a password without also setting a username.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Credentials {
	pub username: String,
	pub password: Option<Bytes>,
}

impl From<&str> for Credentials {
	#[inline]
	fn from(username: &str) -> Self {
		Self {
			username: String::from(username),
			password: None,
		}
	}
}

impl From<(&str, &str)> for Credentials {
	#[inline]
	fn from((username, password): (&str, &str)) -> Self {
		Self {
			username: String::from(username),
			password: Some(Bytes::copy_from_slice(password.as_bytes())),
		}
	}
}

impl From<(String, Option<String>)> for Credentials {
	#[inline]
	fn from((username, password): (String, Option<String>)) -> Self {
		Self {
			username,
			password: password.map(Bytes::from),
		}
	}
}

/// Will Message
///
/// The will message is set by the Client when it connects to the Server. If the
/// Client disconnects abnormally, the Server publishes the will message to the
/// topic on behalf of the Client. A graceful Disconnect discards it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Will {
	/// The topic to publish the will message to.
	pub topic: TopicBuf,

	/// The message to publish as the will.
	pub payload: Bytes,

	/// The quality of service to publish the will message at.
	pub qos: QoS,

	/// Whether or not the will message should be retained.
	pub retain: bool,
}
