use super::{
	client_configuration::ClientConfiguration,
	transport::{TcpConfiguration, Transport},
};
use core::time::Duration;
use mqtt_protocol::misc::Will;
use std::ops::Range;

#[cfg(feature = "url")]
use super::transport::UnsupportedScheme;

/// Where to connect, and how to behave once connected.
///
/// ```
/// use mqtt_client::ClientOptions;
/// use std::time::Duration;
///
/// let options = ClientOptions::tcp("broker.local", 1883)
/// 	.with_client_id("sensor-7")
/// 	.with_keep_alive(30)
/// 	.with_reconnect_delay(Duration::from_secs(1)..Duration::from_secs(30));
/// assert_eq!(options.configuration.keep_alive, 30);
/// ```
#[derive(Clone, Debug)]
pub struct ClientOptions {
	pub transport: Transport,
	pub configuration: ClientConfiguration,
}

impl ClientOptions {
	pub fn new(transport: Transport, configuration: ClientConfiguration) -> Self {
		Self {
			transport,
			configuration,
		}
	}

	/// Plain TCP to `host:port` with the default configuration.
	pub fn tcp(host: impl Into<String>, port: u16) -> Self {
		let transport = TcpConfiguration {
			host: host.into(),
			port,
			..Default::default()
		};
		Self::new(transport.into(), ClientConfiguration::default())
	}

	pub fn with_client_id(mut self, client_id: impl Into<String>) -> Self {
		self.configuration.client_id = client_id.into();
		self
	}

	/// The password is only sent along with a username.
	pub fn with_credentials(mut self, username: impl Into<String>, password: Option<String>) -> Self {
		self.configuration.username = Some(username.into());
		self.configuration.password = password;
		self
	}

	pub fn with_will(mut self, will: Will) -> Self {
		self.configuration.will = Some(will);
		self
	}

	/// Keep-alive interval in seconds, `0` disables pings.
	pub fn with_keep_alive(mut self, keep_alive: u16) -> Self {
		self.configuration.keep_alive = keep_alive;
		self
	}

	pub fn with_clean_session(mut self, clean_session: bool) -> Self {
		self.configuration.clean_session = clean_session;
		self
	}

	/// The client task ends on the first lost connection.
	pub fn without_reconnect(mut self) -> Self {
		self.configuration.reconnect = false;
		self
	}

	/// Sets the bounds of the reconnection back-off. An upper bound below
	/// the lower one is raised to it.
	pub fn with_reconnect_delay(mut self, delay: Range<Duration>) -> Self {
		let end = delay.end.max(delay.start);
		self.configuration.reconnect = true;
		self.configuration.reconnect_delay = delay.start..end;
		self
	}
}

#[cfg(feature = "url")]
impl TryFrom<&url::Url> for ClientOptions {
	type Error = UnsupportedScheme;
	fn try_from(url: &url::Url) -> Result<Self, Self::Error> {
		let transport = url.try_into()?;
		Ok(Self::new(transport, ClientConfiguration::from_url(url)))
	}
}

#[cfg(feature = "url")]
impl TryFrom<url::Url> for ClientOptions {
	type Error = UnsupportedScheme;
	#[inline]
	fn try_from(value: url::Url) -> Result<Self, Self::Error> {
		Self::try_from(&value)
	}
}

#[cfg(feature = "url")]
impl TryFrom<&str> for ClientOptions {
	type Error = UnsupportedScheme;
	#[inline]
	fn try_from(value: &str) -> Result<Self, Self::Error> {
		let url: url::Url = value.try_into().map_err(|_| UnsupportedScheme)?;
		Self::try_from(url)
	}
}

#[cfg(test)]
mod tests {
	use super::ClientOptions;
	use crate::transport::Transport;
	use std::time::Duration;

	#[test]
	fn builds_tcp_options() {
		let options = ClientOptions::tcp("broker.local", 8883)
			.with_client_id("sensor")
			.with_credentials("user", Some("secret".into()))
			.with_clean_session(false);

		let Transport::Tcp(tcp) = &options.transport;
		assert_eq!(tcp.host, "broker.local");
		assert_eq!(tcp.port, 8883);

		let connect = options.configuration.connect_packet(options.configuration.clean_session);
		assert_eq!(connect.client_id, "sensor");
		assert!(!connect.clean_session);
		assert_eq!(connect.credentials.unwrap().username, "user");
	}

	#[test]
	fn configures_reconnection() {
		let options = ClientOptions::tcp("localhost", 1883).without_reconnect();
		assert!(!options.configuration.reconnect);

		let options = options.with_reconnect_delay(Duration::from_secs(5)..Duration::from_secs(1));
		assert!(options.configuration.reconnect);
		assert_eq!(
			options.configuration.reconnect_delay,
			Duration::from_secs(5)..Duration::from_secs(5)
		);
	}

	#[cfg(feature = "url")]
	#[test]
	fn parses_urls() {
		let options = ClientOptions::try_from("mqtt://broker.local:1884?client_id=abc&reconnect=false")
			.unwrap();
		let Transport::Tcp(tcp) = &options.transport;
		assert_eq!(tcp.port, 1884);
		assert_eq!(options.configuration.client_id, "abc");
		assert!(!options.configuration.reconnect);

		assert!(ClientOptions::try_from("http://broker.local").is_err());
	}
}
