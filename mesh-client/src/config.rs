use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Selects which instances the [`crate::registry`] watcher should track: a
/// base path under the coordination store plus a matcher applied to events
/// observed past that path (spec.md §4.1, §6).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Query {
	/// Base path enumerated at startup and watched thereafter.
	pub base_path: String,
	/// Only events whose path starts with this prefix are considered; empty
	/// matches everything under `base_path`.
	#[serde(default)]
	pub path_prefix: String,
}

impl Query {
	pub fn new(base_path: impl Into<String>) -> Self {
		Query {
			base_path: base_path.into(),
			path_prefix: String::new(),
		}
	}

	pub fn matches(&self, path: &str) -> bool {
		path.starts_with(&self.base_path) && path.strip_prefix(&self.base_path)
			.map(|rest| rest.trim_start_matches('/').starts_with(&self.path_prefix))
			.unwrap_or(false)
	}
}

/// Process-wide-per-client configuration (spec.md §3 `TimeoutConfig`, §4.3
/// pool sizing).
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientConfig {
	/// Interval between hedged retry attempts; zero disables hedging.
	#[serde(with = "humantime_duration")]
	pub retry_interval: Duration,
	/// Deadline after which `Send` gives up; zero means wait forever.
	#[serde(with = "humantime_duration")]
	pub giveup_deadline: Duration,
	/// Maximum simultaneously outstanding RPC handles per instance.
	pub connection_pool_size: usize,
}

impl Default for ClientConfig {
	fn default() -> Self {
		ClientConfig {
			retry_interval: Duration::from_millis(20),
			giveup_deadline: Duration::from_secs(1),
			connection_pool_size: 4,
		}
	}
}

// A minimal `serde_with`-style duration shim: the workspace does not carry
// `serde_with`, and a single pair of functions is simpler than adding it for
// one field pair.
mod humantime_duration {
	use std::time::Duration;

	use serde::{Deserialize, Deserializer, Serializer};

	pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
		s.serialize_u64(d.as_millis() as u64)
	}

	pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
		let millis = u64::deserialize(d)?;
		Ok(Duration::from_millis(millis))
	}
}
