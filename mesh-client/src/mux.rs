//! Dispatch Mux: the single-owner actor holding registry state, timeouts,
//! and pending waiters (spec.md §4.4). Grounded in shape — a keyed map of
//! entries, insert/replace/remove semantics, a `Dump`-style snapshot — on
//! the teacher's `store::discovery::WorkloadStore`, but restructured as a
//! channel-driven actor rather than an `RwLock`-guarded store: the spec is
//! explicit that no lock protects the instance map (spec.md §9), so the Mux
//! is the sole task that ever touches it.

use std::collections::HashMap;
use std::sync::Arc;

use rand::seq::IteratorRandom;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, info, instrument};

use crate::instance::{ServiceInstance, TimeoutConfig};
use crate::metrics::{ClientMetrics, RegistryEvent, RegistryEventKind};
use crate::pool::ResourcePool;
use crate::transport::RpcTransport;

/// Events fed into the Mux by the [`crate::registry`] watcher.
pub enum RegistryEventMsg {
	Discovered(Arc<ServiceInstance>),
	Removed(Arc<ServiceInstance>),
}

/// A one-shot query from a send attempt: "give me an instance whose key is
/// not in `excluded`" (spec.md §3 `InstanceRequest`). Consumed exactly once.
pub struct InstanceRequest<T: RpcTransport> {
	pub excluded: std::collections::HashSet<String>,
	pub reply: oneshot::Sender<Arc<ServicePool<T>>>,
}

/// Pairs one [`ServiceInstance`] with its bounded connection pool. Owned
/// exclusively by the Mux; lifetime equals the lifetime of the enclosing
/// registry entry.
pub struct ServicePool<T: RpcTransport> {
	pub instance: Arc<ServiceInstance>,
	pub pool: ResourcePool<T>,
}

enum Command<T: RpcTransport> {
	Registry(RegistryEventMsg),
	Instance(InstanceRequest<T>),
	SetTimeout(TimeoutConfig),
	ListInstances(oneshot::Sender<Vec<String>>),
}

/// Handle used by every other component to talk to the Mux task.
#[derive(Clone)]
pub struct MuxHandle<T: RpcTransport> {
	commands: mpsc::UnboundedSender<Command<T>>,
	timeout: watch::Receiver<TimeoutConfig>,
}

impl<T: RpcTransport> MuxHandle<T> {
	pub fn notify_discovered(&self, instance: Arc<ServiceInstance>) {
		let _ = self
			.commands
			.send(Command::Registry(RegistryEventMsg::Discovered(instance)));
	}

	pub fn notify_removed(&self, instance: Arc<ServiceInstance>) {
		let _ = self
			.commands
			.send(Command::Registry(RegistryEventMsg::Removed(instance)));
	}

	/// Asks the Mux for a non-excluded instance. Never times out at the Mux
	/// (spec.md §4.4); the caller's giveup deadline drives cancellation. The
	/// reply is guaranteed to arrive: `self` holds a live `commands` sender
	/// for the whole `.await` below, so the Mux (which only exits once every
	/// sender is dropped, see `Mux::run`) cannot have already shut down out
	/// from under this call.
	pub async fn request_instance(
		&self,
		excluded: std::collections::HashSet<String>,
	) -> Arc<ServicePool<T>> {
		let (reply, rx) = oneshot::channel();
		let _ = self
			.commands
			.send(Command::Instance(InstanceRequest { excluded, reply }));
		rx.await.expect("mux task outlives every handle that can reach it")
	}

	pub fn set_timeout(&self, cfg: TimeoutConfig) {
		let _ = self.commands.send(Command::SetTimeout(cfg));
	}

	pub fn get_timeout(&self) -> TimeoutConfig {
		*self.timeout.borrow()
	}

	/// Diagnostic snapshot of the currently registered instance keys, not a
	/// spec requirement but mirroring `StoreUpdater::dump` in the teacher.
	pub async fn list_instances(&self) -> Vec<String> {
		let (reply, rx) = oneshot::channel();
		let _ = self.commands.send(Command::ListInstances(reply));
		rx.await.unwrap_or_default()
	}
}

/// The actor itself: one task, one `select`, sole writer of `instances`.
pub struct Mux<T: RpcTransport> {
	instances: HashMap<String, Arc<ServicePool<T>>>,
	waiters: Vec<InstanceRequest<T>>,
	timeout: TimeoutConfig,
	timeout_tx: watch::Sender<TimeoutConfig>,
	pool_size: usize,
	transport: T,
	metrics: Option<Arc<ClientMetrics>>,
	commands: mpsc::UnboundedReceiver<Command<T>>,
}

impl<T: RpcTransport + Clone> Mux<T> {
	/// Spawns the actor. Deliberately takes no shutdown signal of its own:
	/// the Mux's lifetime is governed entirely by its `commands` channel, the
	/// way any actor's is — it runs until every `MuxHandle` clone that could
	/// ever reach it (the `ServiceClient`, the registry watcher, and any
	/// in-flight hedge attempt awaiting a reply) has been dropped. Wiring the
	/// client-wide shutdown signal in here as well was a bug: a `Send` call
	/// blocked in `request_instance` (empty registry, all instances
	/// excluded) holds its own live `MuxHandle` clone for the duration of
	/// that await, so the channel can never close out from under it — but an
	/// explicit shutdown broadcast could still race ahead and tear the actor
	/// down regardless, dropping the pending reply and panicking the waiting
	/// caller. Only the registry watcher (`registry::run`) needs an explicit
	/// stop signal (spec.md §9's "clean shutdown path" note); the Mux needs
	/// none.
	pub fn spawn(
		transport: T,
		pool_size: usize,
		initial_timeout: TimeoutConfig,
		metrics: Option<Arc<ClientMetrics>>,
	) -> MuxHandle<T> {
		let (commands_tx, commands_rx) = mpsc::unbounded_channel();
		let (timeout_tx, timeout_rx) = watch::channel(initial_timeout);

		let mux = Mux {
			instances: HashMap::new(),
			waiters: Vec::new(),
			timeout: initial_timeout,
			timeout_tx,
			pool_size,
			transport,
			metrics,
			commands: commands_rx,
		};

		tokio::spawn(mux.run());

		MuxHandle {
			commands: commands_tx,
			timeout: timeout_rx,
		}
	}

	/// Runs until `commands` reports `None` — every `MuxHandle` clone has
	/// been dropped. No other exit path exists (see `spawn`'s doc comment).
	#[instrument(skip_all, name = "mux")]
	async fn run(mut self) {
		while let Some(cmd) = self.commands.recv().await {
			self.handle(cmd);
		}
		debug!("mux shutting down, no handle can reach it anymore");
	}

	fn handle(&mut self, cmd: Command<T>) {
		match cmd {
			Command::Registry(RegistryEventMsg::Discovered(instance)) => self.on_discovered(instance),
			Command::Registry(RegistryEventMsg::Removed(instance)) => self.on_removed(instance),
			Command::Instance(req) => self.on_instance_request(req),
			Command::SetTimeout(cfg) => {
				self.timeout = cfg;
				let _ = self.timeout_tx.send(cfg);
			},
			Command::ListInstances(reply) => {
				let mut keys: Vec<String> = self.instances.keys().cloned().collect();
				keys.sort();
				let _ = reply.send(keys);
			},
		}
	}

	fn on_discovered(&mut self, instance: Arc<ServiceInstance>) {
		let is_new = !self.instances.contains_key(&instance.address);
		let factory = crate::connection::ConnectionFactory::new(self.transport.clone(), instance.clone());
		let pool = Arc::new(ServicePool {
			instance: instance.clone(),
			pool: ResourcePool::new(factory, self.pool_size, self.metrics.clone()),
		});
		self.instances.insert(instance.address.clone(), pool.clone());
		if is_new {
			info!(address = %instance.address, "discovered instance");
		}
		if let Some(metrics) = &self.metrics {
			metrics.registry_size.set(self.instances.len() as i64);
			metrics
				.registry_events
				.get_or_create(&RegistryEvent {
					kind: RegistryEventKind::Discovered,
				})
				.inc();
		}

		// Wake *every* current waiter with this pool, unconditionally —
		// including ones whose exclusion set already names this address.
		// This is the documented "known subtle behavior" (spec.md §4.4):
		// the Mux does no filtering on wake, it only filters on request; a
		// waiter that gets handed an instance it already excluded will
		// simply ask again on its next retry tick, exclusion intact.
		for waiter in self.waiters.drain(..) {
			let _ = waiter.reply.send(pool.clone());
		}
	}

	fn on_removed(&mut self, instance: Arc<ServiceInstance>) {
		if self.instances.remove(&instance.address).is_some() {
			info!(address = %instance.address, "removed instance");
			if let Some(metrics) = &self.metrics {
				metrics.registry_size.set(self.instances.len() as i64);
				metrics
					.registry_events
					.get_or_create(&RegistryEvent {
						kind: RegistryEventKind::Removed,
					})
					.inc();
			}
		}
	}

	fn on_instance_request(&mut self, req: InstanceRequest<T>) {
		let candidate = self
			.instances
			.iter()
			.filter(|(addr, _)| !req.excluded.contains(*addr))
			.choose(&mut rand::rng());

		match candidate {
			Some((_, pool)) => {
				let _ = req.reply.send(pool.clone());
			},
			None => {
				self.waiters.push(req);
			},
		}
	}
}
