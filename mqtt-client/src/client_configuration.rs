use super::{client_options::ClientOptions, transport::Transport};
use bytes::Bytes;
use core::time::Duration;
use mqtt_protocol::{
	misc::{Credentials, Will},
	packets::Connect,
};
use std::ops::Range;

/// Client configuration which is independent from the transport protocol.
#[derive(Clone, Debug)]
pub struct ClientConfiguration {
	/// Keep alive timeout in seconds.
	///
	/// Defaults to 60 seconds.
	pub keep_alive: u16,
	pub clean_session: bool,
	pub client_id: String,

	/// Username for authentication.
	pub username: Option<String>,

	/// Password for authentication.
	///
	/// This will be ignored if no username is set.
	pub password: Option<String>,
	pub will: Option<Will>,

	/// Controls whether the client should automatically reconnect after
	/// losing the connection to the Server.
	pub reconnect: bool,

	/// Bounds of the reconnection back-off. The delay starts at the lower
	/// bound and doubles after every failed attempt.
	pub reconnect_delay: Range<Duration>,
}

impl Default for ClientConfiguration {
	fn default() -> Self {
		Self {
			keep_alive: 60,
			clean_session: true,
			client_id: Default::default(),
			username: Default::default(),
			password: Default::default(),
			will: Default::default(),
			reconnect: true,
			reconnect_delay: Duration::from_millis(500)..Duration::from_secs(60),
		}
	}
}

impl ClientConfiguration {
	#[cfg(feature = "url")]
	pub fn from_url(url: &url::Url) -> Self {
		let mut config = ClientConfiguration::default();

		if !url.username().is_empty() {
			config.username = Some(url.username().into());
		}
		config.password = url.password().map(|x| x.into());

		for (key, value) in url.query_pairs() {
			match key.as_ref() {
				"clean_session" => {
					let Ok(clean_session) = value.parse() else {
						continue;
					};
					config.clean_session = clean_session;
				}
				"client_id" => {
					config.client_id = value.into_owned();
				}
				"keep_alive" => {
					let Ok(keep_alive) = value.parse() else {
						continue;
					};
					config.keep_alive = keep_alive;
				}
				"reconnect" => {
					let Ok(reconnect) = value.parse() else {
						continue;
					};
					config.reconnect = reconnect;
				}
				_ => {}
			}
		}

		config
	}

	pub fn into_options<T, E>(self, transport: T) -> Result<ClientOptions, E>
	where
		T: TryInto<Transport>,
		E: From<T::Error>,
	{
		let transport = transport.try_into()?;
		Ok(ClientOptions {
			transport,
			configuration: self,
		})
	}

	pub fn credentials(&self) -> Option<Credentials> {
		self.username.as_ref().map(|username| Credentials {
			username: username.clone(),
			password: self
				.password
				.as_ref()
				.map(|password| Bytes::copy_from_slice(password.as_bytes())),
		})
	}

	/// Builds the Connect packet sent at the start of every connection.
	pub fn connect_packet(&self, clean_session: bool) -> Connect {
		Connect {
			client_id: self.client_id.clone(),
			keep_alive: self.keep_alive,
			clean_session,
			will: self.will.clone(),
			credentials: self.credentials(),
			..Default::default()
		}
	}

	#[inline]
	pub fn keep_alive(&self) -> Option<Duration> {
		(self.keep_alive != 0).then(|| Duration::from_secs(self.keep_alive.into()))
	}
}

#[cfg(test)]
mod tests {
	use super::ClientConfiguration;

	#[test]
	fn builds_connect_packet() {
		let configuration = ClientConfiguration {
			client_id: "sensor".into(),
			username: Some("user".into()),
			password: Some("secret".into()),
			..Default::default()
		};

		let connect = configuration.connect_packet(false);
		assert_eq!(connect.client_id, "sensor");
		assert_eq!(connect.keep_alive, 60);
		assert!(!connect.clean_session);

		let credentials = connect.credentials.unwrap();
		assert_eq!(credentials.username, "user");
		assert_eq!(credentials.password.as_deref(), Some(&b"secret"[..]));
	}

	#[test]
	fn ignores_password_without_username() {
		let configuration = ClientConfiguration {
			password: Some("secret".into()),
			..Default::default()
		};
		assert!(configuration.credentials().is_none());
	}

	#[cfg(feature = "url")]
	#[test]
	fn parses_url_query() {
		let url = url::Url::parse("mqtt://user:pw@localhost?client_id=abc&keep_alive=5&clean_session=false")
			.unwrap();
		let configuration = ClientConfiguration::from_url(&url);

		assert_eq!(configuration.client_id, "abc");
		assert_eq!(configuration.keep_alive, 5);
		assert!(!configuration.clean_session);
		assert_eq!(configuration.username.as_deref(), Some("user"));
		assert_eq!(configuration.password.as_deref(), Some("pw"));
	}
}
