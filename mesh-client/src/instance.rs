use std::time::Duration;

/// Identity of one addressable replica of a service (spec.md §3). Created
/// when the watcher observes it; never mutated after publication — a
/// `Discovered` event for an existing key replaces the entry, it does not
/// patch it.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ServiceInstance {
	/// Network address string that uniquely keys the instance.
	pub address: String,
	/// Used to form the remote method path (`"<name>.Forward"`).
	pub service_name: String,
	pub registered: bool,
}

impl ServiceInstance {
	pub fn new(address: impl Into<String>, service_name: impl Into<String>) -> Self {
		ServiceInstance {
			address: address.into(),
			service_name: service_name.into(),
			registered: true,
		}
	}
}

/// `(retry-interval, giveup-deadline)` pair, owned by the Mux and readable
/// only through it (spec.md §3, §4.4).
#[derive(Clone, Copy, Debug)]
pub struct TimeoutConfig {
	pub retry: Duration,
	pub giveup: Duration,
}

impl Default for TimeoutConfig {
	fn default() -> Self {
		TimeoutConfig {
			retry: Duration::from_millis(20),
			giveup: Duration::from_secs(1),
		}
	}
}
