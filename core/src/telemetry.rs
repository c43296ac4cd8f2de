// Originally derived from https://github.com/istio/ztunnel (Apache 2.0 licensed)
//
// Simplified relative to the upstream implementation: the original batches
// log writes through a dedicated worker thread with a hand-rolled date
// cache to shave allocations off the hot path of a high-throughput proxy.
// A dispatch client issuing at most a handful of RPCs per call does not
// need that, so this just configures `tracing-subscriber`'s standard
// fmt layer with an `EnvFilter`.

use std::time::Instant;

use once_cell::sync::Lazy;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::prelude::*;

pub static APPLICATION_START_TIME: Lazy<Instant> = Lazy::new(Instant::now);

const DEFAULT_LOG_FILTER: &str = "info";

/// Installs a process-global `tracing` subscriber. Returns a guard; drop it
/// at the end of `main` to flush buffered output.
#[must_use = "dropping the guard immediately flushes no logging"]
pub fn setup_logging() -> impl Drop {
	let filter = EnvFilter::try_from_env("MESH_LOG")
		.or_else(|_| EnvFilter::try_new(DEFAULT_LOG_FILTER))
		.unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));

	let fmt_layer = tracing_subscriber::fmt::layer()
		.with_target(true)
		.with_thread_names(false);

	let _ = tracing_subscriber::registry()
		.with(filter)
		.with(fmt_layer)
		.try_init();

	LoggingGuard
}

struct LoggingGuard;

impl Drop for LoggingGuard {
	fn drop(&mut self) {
		// tracing-subscriber's fmt layer writes synchronously; nothing to flush.
		// Kept as an explicit guard type so call sites read the same as the
		// teacher's `telemetry::setup_logging()` -> flush-on-drop convention,
		// and so a future switch to a buffered writer is a one-file change.
	}
}
