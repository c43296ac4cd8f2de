//! Instance Registry Watcher (spec.md §4.1): snapshot the coordination
//! store, then tail-watch it with no gap, feeding `Discovered`/`Removed`
//! events into the [`crate::mux::Mux`]. Grounded on the teacher's
//! `agent_xds`-driven update loop in shape (best-effort decode, warn-and-skip
//! on individual failures, `tracing::instrument`), generalized to the
//! coordination-store contract named in spec.md §6.

use std::sync::Arc;

use tokio_stream::StreamExt;
use tracing::{instrument, warn};

use mesh_core::readiness::BlockReady;

use crate::config::Query;
use crate::instance::ServiceInstance;
use crate::mux::MuxHandle;
use crate::store::{CoordinationStore, ServiceRecord};
use crate::transport::RpcTransport;

/// Runs the watcher to completion: initial snapshot, then tail-watch until
/// `shutdown` fires (spec.md §9 adds this clean shutdown path; absent a
/// signal the watcher never exits while the client is alive, matching the
/// distilled spec exactly). `ready`, when given, is dropped the moment the
/// initial snapshot completes, the way the teacher's own update loops
/// release their `BlockReady` guard once the first sync lands
/// (`agentgateway::state::DemandCache` callers register against
/// `agent_core::readiness`).
#[instrument(skip_all, name = "registry-watcher", fields(base_path = %query.base_path))]
pub async fn run<S, T>(
	store: Arc<S>,
	query: Query,
	mux: MuxHandle<T>,
	mut shutdown: tokio::sync::watch::Receiver<()>,
	ready: Option<BlockReady>,
) where
	S: CoordinationStore,
	T: RpcTransport + Clone,
{
	let snapshot_revision = match snapshot(&store, &query, &mux).await {
		Ok(rev) => rev,
		Err(e) => {
			warn!(error = %e, "failed to read initial snapshot revision, starting watch at 0");
			0
		},
	};
	drop(ready);

	let mut events = match store.watch(&query.base_path, snapshot_revision + 1).await {
		Ok(events) => events,
		Err(e) => {
			warn!(error = %e, "coordination store watch failed to start; registry will never update");
			return;
		},
	};

	loop {
		tokio::select! {
			biased;
			_ = shutdown.changed() => {
				return;
			}
			event = events.next() => {
				match event {
					Some(Ok(event)) => apply_event(&query, &mux, &event.path, &event.body),
					Some(Err(e)) => {
						// Best-effort continuation (spec.md §4.1, §9): a watch
						// error for a single revision is logged, the watcher
						// moves on to the next event.
						warn!(error = %e, "watch error, continuing");
					},
					None => {
						warn!("coordination store watch stream ended; registry will no longer update");
						return;
					},
				}
			}
		}
	}
}

async fn snapshot<S: CoordinationStore, T: RpcTransport + Clone>(
	store: &Arc<S>,
	query: &Query,
	mux: &MuxHandle<T>,
) -> anyhow::Result<u64> {
	let revision = store.current_revision().await?;
	let paths = store.walk(&query.base_path, revision).await?;
	for path in paths {
		match store.get(&path, revision).await {
			Ok(bytes) => apply_event(query, mux, &path, &bytes),
			Err(e) => warn!(path = %path, error = %e, "failed to fetch snapshot record, skipping"),
		}
	}
	Ok(revision)
}

fn apply_event<T: RpcTransport + Clone>(query: &Query, mux: &MuxHandle<T>, path: &str, body: &[u8]) {
	if !query.matches(path) {
		return;
	}
	let record = match ServiceRecord::decode(body) {
		Ok(record) => record,
		Err(e) => {
			warn!(path = %path, error = %e, "failed to decode service record, skipping");
			return;
		},
	};

	let instance = Arc::new(ServiceInstance {
		address: record.config.service_addr,
		service_name: record.config.name,
		registered: record.registered,
	});

	if record.registered {
		mux.notify_discovered(instance);
	} else {
		mux.notify_removed(instance);
	}
}
