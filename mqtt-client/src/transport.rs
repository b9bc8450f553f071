pub const DEFAULT_MQTT_HOST: &str = "localhost";
pub const DEFAULT_MQTT_PORT: u16 = 1883;

/// Transport options.
#[derive(Clone, Debug)]
pub enum Transport {
	/// Raw TCP transport.
	Tcp(TcpConfiguration),
}

/// Configuration for connecting to a Server over TCP.
#[derive(Clone, Debug)]
pub struct TcpConfiguration {
	/// Hostname or IP address of the MQTT Server.
	pub host: String,
	pub port: u16,
	pub linger: bool,
}

impl Default for TcpConfiguration {
	fn default() -> Self {
		Self {
			host: DEFAULT_MQTT_HOST.into(),
			port: DEFAULT_MQTT_PORT,
			linger: true,
		}
	}
}

impl From<TcpConfiguration> for Transport {
	#[inline]
	fn from(value: TcpConfiguration) -> Self {
		Self::Tcp(value)
	}
}

#[derive(thiserror::Error, Debug)]
#[error("the specified url scheme is not supported")]
pub struct UnsupportedScheme;

#[cfg(feature = "url")]
impl TryFrom<&url::Url> for Transport {
	type Error = UnsupportedScheme;
	fn try_from(value: &url::Url) -> Result<Self, Self::Error> {
		match value.scheme() {
			"mqtt" | "tcp" => Ok(Self::Tcp(TcpConfiguration {
				host: value.host_str().unwrap_or(DEFAULT_MQTT_HOST).into(),
				port: value.port().unwrap_or(DEFAULT_MQTT_PORT),
				linger: true,
			})),
			_ => Err(UnsupportedScheme),
		}
	}
}
