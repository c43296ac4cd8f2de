//! The coordination store contract consumed by the [`crate::registry`]
//! watcher (spec.md §6). Only the narrow `GetCurrentRevision`/`Walk`/`Get`/
//! `Wait` surface is required; a real etcd-or-similar backed implementation
//! is an external collaborator and out of scope here (spec.md §1) — only
//! [`memory::MemoryCoordinationStore`], a fully-functional in-process stand
//! in, is provided.

pub mod memory;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_stream::Stream;

pub use memory::MemoryCoordinationStore;

/// A monotonically increasing revision of the coordination store's state.
pub type Revision = u64;

/// The JSON-persisted payload a coordination store holds at each path
/// (spec.md §6). `config.service_addr`/`config.name` form the instance's
/// identity and method prefix; `registered` distinguishes a live instance
/// from one that is mid-deregistration.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ServiceRecord {
	pub config: ServiceRecordConfig,
	pub registered: bool,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ServiceRecordConfig {
	pub service_addr: String,
	pub name: String,
}

impl ServiceRecord {
	pub fn decode(bytes: &[u8]) -> Result<Self, serde_json::Error> {
		serde_json::from_slice(bytes)
	}

	pub fn encode(&self) -> Vec<u8> {
		// A record we construct ourselves always serializes; `MemoryCoordinationStore`
		// is the only producer and only used in tests/the demo CLI.
		serde_json::to_vec(self).expect("ServiceRecord always serializes")
	}
}

/// One event observed by `Wait`, carrying the path it applies to, the
/// revision it was observed at, and the raw record body.
#[derive(Clone, Debug)]
pub struct WatchEvent {
	pub path: String,
	pub revision: Revision,
	pub body: Vec<u8>,
}

/// The consumed subset of a coordination-store client (spec.md §6).
#[async_trait]
pub trait CoordinationStore: Send + Sync + 'static {
	/// Current revision, used to seam the initial snapshot with the tail watch.
	async fn current_revision(&self) -> anyhow::Result<Revision>;

	/// Enumerate every path under `base_path` as of `revision`.
	async fn walk(&self, base_path: &str, revision: Revision) -> anyhow::Result<Vec<String>>;

	/// Fetch one record's raw bytes at (at-or-before) the given revision.
	async fn get(&self, path: &str, revision: Revision) -> anyhow::Result<Vec<u8>>;

	/// A stream of events starting at `from_revision` (inclusive), with no
	/// gap relative to a `walk` performed at `from_revision - 1`.
	async fn watch(
		&self,
		base_path: &str,
		from_revision: Revision,
	) -> anyhow::Result<std::pin::Pin<Box<dyn Stream<Item = anyhow::Result<WatchEvent>> + Send>>>;
}
