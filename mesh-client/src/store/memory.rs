use std::collections::BTreeMap;
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_stream::{Stream, StreamExt};

use super::{CoordinationStore, Revision, WatchEvent};

struct Inner {
	revision: Revision,
	records: BTreeMap<String, Vec<u8>>,
	subscribers: Vec<mpsc::UnboundedSender<WatchEvent>>,
	/// Every event ever published, in revision order. A real coordination
	/// store keeps its history on disk and can always replay from any
	/// revision; this in-process stand-in keeps the same guarantee by never
	/// discarding an event, which is what closes the snapshot/watch gap
	/// below (an unbounded log is fine for a test/demo store; a long-lived
	/// production store would need to compact it against the oldest
	/// `from_revision` still in use).
	log: Vec<WatchEvent>,
}

/// A fully-functional in-process [`CoordinationStore`]: backs the demo CLI
/// and the integration test suite. Not a substitute for a real etcd- or
/// similar-backed client, which remains an external collaborator. `watch`
/// replays any already-published event at-or-after `from_revision` before
/// switching to live delivery, so a `put`/`delete` racing between a
/// `current_revision` read and the following `watch` call (exactly the
/// window `registry::snapshot` leaves open) is never silently dropped —
/// see `watch`'s doc comment for how the replay-then-live splice stays gap
/// free.
pub struct MemoryCoordinationStore {
	inner: Mutex<Inner>,
}

impl Default for MemoryCoordinationStore {
	fn default() -> Self {
		Self::new()
	}
}

impl MemoryCoordinationStore {
	pub fn new() -> Self {
		MemoryCoordinationStore {
			inner: Mutex::new(Inner {
				revision: 0,
				records: BTreeMap::new(),
				subscribers: Vec::new(),
				log: Vec::new(),
			}),
		}
	}

	/// Publishes a record at `path`, bumping the revision and notifying any
	/// active `watch` streams. Used by tests and the demo CLI to simulate
	/// instance registration/deregistration.
	pub fn put(&self, path: impl Into<String>, body: Vec<u8>) {
		let path = path.into();
		let mut inner = self.inner.lock().unwrap();
		inner.revision += 1;
		let revision = inner.revision;
		inner.records.insert(path.clone(), body.clone());
		let event = WatchEvent {
			path,
			revision,
			body,
		};
		inner.log.push(event.clone());
		inner
			.subscribers
			.retain(|tx| tx.send(event.clone()).is_ok());
	}

	/// Removes a record, bumping the revision and notifying watchers with an
	/// empty body (callers interpret an empty/undecodable body as removal
	/// via their own record shape, matching `registered: false` semantics).
	pub fn delete(&self, path: &str) {
		let mut inner = self.inner.lock().unwrap();
		inner.revision += 1;
		let revision = inner.revision;
		inner.records.remove(path);
		let event = WatchEvent {
			path: path.to_string(),
			revision,
			body: Vec::new(),
		};
		inner.log.push(event.clone());
		inner
			.subscribers
			.retain(|tx| tx.send(event.clone()).is_ok());
	}
}

#[async_trait]
impl CoordinationStore for MemoryCoordinationStore {
	async fn current_revision(&self) -> anyhow::Result<Revision> {
		Ok(self.inner.lock().unwrap().revision)
	}

	async fn walk(&self, base_path: &str, _revision: Revision) -> anyhow::Result<Vec<String>> {
		let inner = self.inner.lock().unwrap();
		Ok(
			inner
				.records
				.keys()
				.filter(|p| p.starts_with(base_path))
				.cloned()
				.collect(),
		)
	}

	async fn get(&self, path: &str, _revision: Revision) -> anyhow::Result<Vec<u8>> {
		let inner = self.inner.lock().unwrap();
		inner
			.records
			.get(path)
			.cloned()
			.ok_or_else(|| anyhow::anyhow!("no record at path {path}"))
	}

	/// Snapshot-then-watch callers (`registry::snapshot` followed by
	/// `registry::run`'s `store.watch(...)`) read `current_revision`, fetch
	/// every record as of that revision, and only afterwards call `watch`.
	/// Any `put`/`delete` landing in between would be invisible to a watch
	/// that only delivered events published after the subscriber was
	/// registered. To close that window, subscriber registration and the
	/// backlog replay are computed under the same lock acquisition that
	/// guards `put`/`delete`'s log append, so no event can land in the gap
	/// between "compute backlog" and "start receiving live events": it is
	/// either already in `log` (and thus in the backlog) or it arrives after
	/// this function returns (and thus is delivered live). The backlog is
	/// replayed before the live stream is polled, so ordering is preserved.
	async fn watch(
		&self,
		base_path: &str,
		from_revision: Revision,
	) -> anyhow::Result<std::pin::Pin<Box<dyn Stream<Item = anyhow::Result<WatchEvent>> + Send>>> {
		let (tx, rx) = mpsc::unbounded_channel();
		let base_path = base_path.to_string();

		let backlog: Vec<WatchEvent> = {
			let mut inner = self.inner.lock().unwrap();
			let backlog = inner
				.log
				.iter()
				.filter(|ev| ev.revision >= from_revision && ev.path.starts_with(&base_path))
				.cloned()
				.collect();
			inner.subscribers.push(tx);
			backlog
		};

		let live_base_path = base_path.clone();
		let live = UnboundedReceiverStream::new(rx)
			.filter(move |ev| ev.revision >= from_revision && ev.path.starts_with(&live_base_path));
		let stream = tokio_stream::iter(backlog).chain(live).map(Ok);
		Ok(Box::pin(stream))
	}
}

#[cfg(test)]
mod tests {
	use tokio_stream::StreamExt;

	use super::*;

	#[tokio::test]
	async fn walk_returns_records_under_base_path() {
		let store = MemoryCoordinationStore::new();
		store.put("/services/a", b"one".to_vec());
		store.put("/services/b", b"two".to_vec());
		store.put("/other/c", b"three".to_vec());

		let rev = store.current_revision().await.unwrap();
		let mut paths = store.walk("/services", rev).await.unwrap();
		paths.sort();
		assert_eq!(paths, vec!["/services/a", "/services/b"]);
	}

	#[tokio::test]
	async fn watch_sees_events_after_subscribe() {
		let store = MemoryCoordinationStore::new();
		let rev = store.current_revision().await.unwrap();
		let mut events = store.watch("/services", rev + 1).await.unwrap();

		store.put("/services/a", b"one".to_vec());
		let ev = events.next().await.unwrap().unwrap();
		assert_eq!(ev.path, "/services/a");
		assert_eq!(ev.body, b"one".to_vec());
	}

	/// Reproduces the snapshot/watch race a real caller hits: `put` lands
	/// strictly between the revision read and the `watch` call that follows
	/// it (no `sleep` involved — the two calls are made back to back, with
	/// the `put` interleaved in between), and the event must still show up.
	/// Without the backlog replay, this event would be silently lost because
	/// no subscriber existed yet when it was published.
	#[tokio::test]
	async fn watch_replays_events_published_between_snapshot_and_subscribe() {
		let store = MemoryCoordinationStore::new();
		let rev = store.current_revision().await.unwrap();

		// Simulates the exact gap `registry::snapshot` leaves open: the
		// revision has been read, but `watch` has not yet been called.
		store.put("/services/a", b"one".to_vec());

		let mut events = store.watch("/services", rev + 1).await.unwrap();
		let ev = events.next().await.unwrap().unwrap();
		assert_eq!(ev.path, "/services/a");
		assert_eq!(ev.revision, rev + 1);
		assert_eq!(ev.body, b"one".to_vec());
	}

	/// A backlog event must never be redelivered once it's also live: the
	/// subscriber registration happens under the same lock as the backlog
	/// snapshot, so anything already in `log` is replayed exactly once and
	/// anything published afterwards arrives exactly once via the live path.
	#[tokio::test]
	async fn watch_does_not_duplicate_backlog_events_as_live_events() {
		let store = MemoryCoordinationStore::new();
		let rev = store.current_revision().await.unwrap();
		store.put("/services/a", b"one".to_vec());

		let mut events = store.watch("/services", rev + 1).await.unwrap();
		store.put("/services/b", b"two".to_vec());

		let first = events.next().await.unwrap().unwrap();
		let second = events.next().await.unwrap().unwrap();
		assert_eq!(first.path, "/services/a");
		assert_eq!(second.path, "/services/b");
	}
}
