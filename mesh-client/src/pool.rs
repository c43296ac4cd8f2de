//! Bounded per-instance resource pool (spec.md §4.3). Grounded in structure
//! (an `Arc`-wrapped inner state, tracing spans on acquire/release,
//! idle-vs-outstanding accounting) on the teacher's `hbone::pool`, but scaled
//! down to the spec's simple bounded-handle contract: a `Semaphore` of size
//! `ConnectionPoolSize` gates concurrent outstanding handles, and idle
//! handles sit in a `VecDeque`. Outstanding-handle count is exported as the
//! `mesh_client_pool_outstanding` gauge (ambient observability, SPEC_FULL.md
//! §2's "pool utilization" metric), mirroring `hbone::pool`'s own
//! connection-count gauges.
//!
//! `idle` is a plain `std::sync::Mutex`, not `tokio::sync::Mutex`: the queue
//! is only ever touched for an instant (a `pop_front`/`push_back`, never
//! held across an `.await`), and making it synchronous lets `PooledHandle`'s
//! `Drop` requeue the handle and release its semaphore permit in the same,
//! ordinary (non-spawned) drop — the requeue is guaranteed to be visible to
//! the next `acquire` *before* the permit it was gating is released, so the
//! bound on simultaneously outstanding handles can never be exceeded by a
//! concurrent acquire racing a detached requeue task.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use tokio::sync::Semaphore;
use tracing::{debug, trace};

use crate::connection::{ConnectionFactory, RpcHandle};
use crate::error::DispatchError;
use crate::metrics::{ClientMetrics, PoolLabel};
use crate::transport::RpcTransport;

struct State<S> {
	idle: Mutex<VecDeque<RpcHandle<S>>>,
	permits: Semaphore,
	address: String,
	metrics: Option<Arc<ClientMetrics>>,
}

/// Bounded pool of live RPC handles for a single instance. Acquire
/// constructs a handle via the factory on demand up to `ConnectionPoolSize`;
/// release returns a handle to the pool; a handle that closed itself (due to
/// a transport error) is dropped instead of being requeued, so the pool
/// regenerates it on next acquire.
pub struct ResourcePool<T: RpcTransport> {
	factory: ConnectionFactory<T>,
	state: Arc<State<T::Stream>>,
}

impl<T: RpcTransport> ResourcePool<T> {
	pub fn new(factory: ConnectionFactory<T>, max_size: usize, metrics: Option<Arc<ClientMetrics>>) -> Self {
		let address = factory.instance_address().to_string();
		ResourcePool {
			factory,
			state: Arc::new(State {
				idle: Mutex::new(VecDeque::new()),
				permits: Semaphore::new(max_size),
				address,
				metrics,
			}),
		}
	}

	/// Acquires a handle, constructing a fresh one via the factory if none is
	/// idle and capacity remains. Blocks if `ConnectionPoolSize` handles are
	/// already outstanding.
	pub async fn acquire(&self) -> Result<PooledHandle<T>, DispatchError> {
		let permit = self
			.state
			.permits
			.clone()
			.acquire_owned()
			.await
			.map_err(|_| DispatchError::PoolExhausted(self.factory_address()))?;

		let existing = self.state.idle.lock().unwrap().pop_front();
		let handle = match existing {
			Some(h) => {
				trace!("reusing idle handle");
				h
			},
			None => {
				debug!("constructing new handle");
				self.factory.connect().await?
			},
		};

		if let Some(m) = &self.state.metrics {
			m.pool_outstanding
				.get_or_create(&PoolLabel {
					address: self.state.address.clone(),
				})
				.inc();
		}

		Ok(PooledHandle {
			handle: Some(handle),
			state: self.state.clone(),
			_permit: permit,
		})
	}

	fn factory_address(&self) -> String {
		self.factory.instance_address().to_string()
	}
}

/// A borrowed [`RpcHandle`]. Released back to the pool (if still usable) on
/// drop, so callers never have to remember to call `release` explicitly.
pub struct PooledHandle<T: RpcTransport> {
	handle: Option<RpcHandle<T::Stream>>,
	state: Arc<State<T::Stream>>,
	_permit: tokio::sync::OwnedSemaphorePermit,
}

impl<T: RpcTransport> std::ops::Deref for PooledHandle<T> {
	type Target = RpcHandle<T::Stream>;

	fn deref(&self) -> &Self::Target {
		self.handle.as_ref().expect("handle taken only on drop")
	}
}

impl<T: RpcTransport> std::ops::DerefMut for PooledHandle<T> {
	fn deref_mut(&mut self) -> &mut Self::Target {
		self.handle.as_mut().expect("handle taken only on drop")
	}
}

impl<T: RpcTransport> Drop for PooledHandle<T> {
	fn drop(&mut self) {
		if let Some(m) = &self.state.metrics {
			m.pool_outstanding
				.get_or_create(&PoolLabel {
					address: self.state.address.clone(),
				})
				.dec();
		}

		let Some(handle) = self.handle.take() else {
			return;
		};
		if handle.is_closed() {
			trace!("dropping closed handle instead of requeuing");
		} else {
			self.state.idle.lock().unwrap().push_back(handle);
		}
		// `_permit` is dropped by the compiler-generated field drop glue
		// that runs immediately after this function returns — i.e. only
		// once the handle above is already either requeued in `idle` or
		// discarded, never before. A concurrent `acquire` that wakes on
		// that permit is therefore guaranteed to see the requeued handle
		// (or none, if it was discarded), so idle-plus-outstanding can
		// never exceed `ConnectionPoolSize`.
	}
}
