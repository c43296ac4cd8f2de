//! Public API of the dispatch core (spec.md §6): `ServiceClient::new`,
//! `set_timeout`/`get_timeout`, `send`, `send_once`. Wires the registry
//! watcher, the Mux actor, and the hedge controller together behind one
//! cloneable handle, the way the teacher's `client::Client` is a thin
//! `Clone` wrapper over the machinery it owns
//! (`agentgateway::client::Client`).

use std::sync::Arc;
use std::time::Duration;

use mesh_core::readiness::Ready;
use prometheus_client::registry::Registry;
use tokio::sync::watch;
use tracing::instrument;

use crate::config::{ClientConfig, Query};
use crate::error::DispatchError;
use crate::instance::TimeoutConfig;
use crate::metrics::ClientMetrics;
use crate::mux::{Mux, MuxHandle};
use crate::receptacle::Receptacle;
use crate::store::CoordinationStore;
use crate::transport::RpcTransport;
use crate::wire::RequestInfo;
use crate::{hedge, registry};

/// A live client to one logical service-mesh query: tracks the instance
/// set matching `query` in the given coordination store, pools connections
/// to each instance via `transport`, and dispatches hedged `Send`/`SendOnce`
/// calls across them.
///
/// Cloning a `ServiceClient` clones the handle, not the machinery — the
/// registry watcher and Mux task run once per `new()` call and are shared
/// by every clone, matching the teacher's `Client` (`agentgateway::client`).
#[derive(Clone)]
pub struct ServiceClient<T: RpcTransport + Clone> {
    mux: MuxHandle<T>,
    metrics: Option<Arc<ClientMetrics>>,
    ready: Ready,
    _shutdown: watch::Sender<()>,
}

impl<T: RpcTransport + Clone> ServiceClient<T> {
    /// Spawns the registry watcher and Mux actor and returns a handle bound
    /// to `query` (spec.md §6 `newServiceClient`). `metrics_registry`, when
    /// given, receives this client's Prometheus collectors.
    #[instrument(skip_all, fields(base_path = %query.base_path))]
    pub fn new<S>(
        store: Arc<S>,
        query: Query,
        config: ClientConfig,
        transport: T,
        metrics_registry: Option<&mut Registry>,
    ) -> Self
    where
        S: CoordinationStore,
    {
        let metrics = metrics_registry.map(|r| Arc::new(ClientMetrics::new(r)));
        let (shutdown_tx, shutdown_rx) = watch::channel(());
        let ready = Ready::new();
        let snapshot_ready = ready.register_task("registry-snapshot");

        let initial_timeout = TimeoutConfig {
            retry: config.retry_interval,
            giveup: config.giveup_deadline,
        };

        // Only the registry watcher takes the shutdown signal: the Mux's
        // lifetime is governed by its `commands` channel alone (see
        // `Mux::spawn`'s doc comment) — it must not be torn down by this
        // signal while a `Send` call is still blocked waiting on it.
        let mux = Mux::spawn(transport, config.connection_pool_size, initial_timeout, metrics.clone());

        tokio::spawn(registry::run(
            store,
            query,
            mux.clone(),
            shutdown_rx,
            Some(snapshot_ready),
        ));

        ServiceClient {
            mux,
            metrics,
            ready,
            _shutdown: shutdown_tx,
        }
    }

    /// Replaces the stored `(retry, giveup)` pair (spec.md §6 `SetTimeout`).
    pub fn set_timeout(&self, retry: Duration, giveup: Duration) {
        self.mux.set_timeout(TimeoutConfig { retry, giveup });
    }

    /// Reads the current `(retry, giveup)` pair race-free off the Mux's
    /// timeout-broadcast channel (spec.md §6 `GetTimeout`, §4.4).
    pub fn get_timeout(&self) -> (Duration, Duration) {
        let cfg = self.mux.get_timeout();
        (cfg.retry, cfg.giveup)
    }

    /// Diagnostic snapshot of the currently registered instance addresses.
    /// Not part of the distilled spec's public surface; mirrors the
    /// teacher's `StoreUpdater::dump` (spec.md §4.4 supplemental note).
    pub async fn list_instances(&self) -> Vec<String> {
        self.mux.list_instances().await
    }

    /// Readiness gate for this client: pending until the registry watcher's
    /// initial snapshot has landed, the way a consuming binary's readiness
    /// probe would report on `agent_core::readiness::Ready` in the teacher.
    /// Not part of the distilled spec's public surface; exposed so a
    /// long-lived process holding a `ServiceClient` can wire it into its own
    /// health check instead of guessing with a fixed startup delay.
    pub fn readiness(&self) -> Ready {
        self.ready.clone()
    }

    /// `Send(requestInfo?, method, input, outputReceptacle) -> error`
    /// (spec.md §4.5, §6): hedged dispatch across instances.
    pub async fn send<R: Receptacle>(
        &self,
        request_info: Option<RequestInfo>,
        method: &str,
        input: &impl serde::Serialize,
        receptacle: &mut R,
    ) -> Result<(), DispatchError> {
        hedge::send(
            &self.mux,
            self.metrics.clone(),
            request_info,
            method,
            input,
            receptacle,
        )
        .await
    }

    /// `SendOnce(giveup, requestInfo?, method, input, outputReceptacle) ->
    /// error` (spec.md §6): a single unhedged attempt bounded by `giveup`.
    pub async fn send_once<R: Receptacle>(
        &self,
        giveup: Duration,
        request_info: Option<RequestInfo>,
        method: &str,
        input: &impl serde::Serialize,
        receptacle: &mut R,
    ) -> Result<(), DispatchError> {
        hedge::send_once(&self.mux, giveup, request_info, method, input, receptacle).await
    }
}
