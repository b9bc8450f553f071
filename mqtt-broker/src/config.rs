use core::time::Duration;
use mqtt_protocol::QoS;

/// Broker behaviour which is independent from any listener.
#[derive(Clone, Debug)]
pub struct BrokerConfiguration {
	/// Granted subscription QoS is clamped to this level.
	///
	/// Defaults to [`QoS::ExactlyOnce`].
	pub max_subscription_qos: QoS,

	/// How long a new connection may take to send Connect.
	///
	/// Defaults to 10 seconds.
	pub connect_timeout: Duration,

	/// Multiplier applied to the keep-alive declared by the Client before the
	/// connection is considered dead.
	pub keep_alive_factor: f64,
}

impl Default for BrokerConfiguration {
	fn default() -> Self {
		Self {
			max_subscription_qos: QoS::ExactlyOnce,
			connect_timeout: Duration::from_secs(10),
			keep_alive_factor: 1.5,
		}
	}
}

impl BrokerConfiguration {
	/// Time allowed between packets for a Client declaring `keep_alive`
	/// seconds. A keep-alive of zero disables the check.
	pub fn keep_alive_timeout(&self, keep_alive: u16) -> Option<Duration> {
		(keep_alive != 0)
			.then(|| Duration::from_secs(keep_alive.into()).mul_f64(self.keep_alive_factor))
	}
}
