//! Thin demo binary wiring a [`mesh_client::ServiceClient`] to an in-process
//! coordination store stub, grounded in shape on the teacher's
//! `agentgateway-app::main` (flag parsing, logging setup, a
//! `tokio::runtime::Builder::new_current_thread` entrypoint). This is not a
//! production mesh client launcher — the real coordination-store client
//! remains an external collaborator (spec.md §1) — it exists to exercise
//! `mesh-client` end to end against a handful of seeded, in-memory
//! instances.

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use mesh_client::store::MemoryCoordinationStore;
use mesh_client::store::{ServiceRecord, ServiceRecordConfig};
use mesh_client::transport::TcpRpcTransport;
use mesh_client::{ClientConfig, Query, ServiceClient};
use mesh_core::{signal, telemetry, version};
use prometheus_client::registry::Registry;
use tracing::info;

#[derive(Parser, Debug)]
#[command(about, long_about = None)]
#[command(disable_version_flag = true)]
struct Args {
    /// Base path under the coordination store to watch.
    #[arg(long, default_value = "/services")]
    base_path: String,

    /// Seed an instance at startup as `addr=service_name`, repeatable.
    #[arg(long = "instance", value_name = "addr=service_name")]
    instances: Vec<String>,

    /// Interval between hedged retry attempts, in milliseconds.
    #[arg(long, default_value_t = 20)]
    retry_ms: u64,

    /// `Send` giveup deadline, in milliseconds.
    #[arg(long, default_value_t = 2000)]
    giveup_ms: u64,

    /// Maximum simultaneously outstanding RPC handles per instance.
    #[arg(long, default_value_t = 4)]
    pool_size: usize,

    /// Print version (as a simple version string).
    #[arg(short = 'V', value_name = "version")]
    version_short: bool,

    /// Print version (as JSON).
    #[arg(long = "version")]
    version_long: bool,
}

fn main() -> anyhow::Result<()> {
    let _log_flush = telemetry::setup_logging();

    let args = Args::parse();
    if args.version_short {
        println!("{}", version::BuildInfo::new().version);
        return Ok(());
    }
    if args.version_long {
        println!("{}", version::BuildInfo::new());
        return Ok(());
    }

    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?
        .block_on(run(args))
}

async fn run(args: Args) -> anyhow::Result<()> {
    let store = Arc::new(MemoryCoordinationStore::new());
    for (i, spec) in args.instances.iter().enumerate() {
        let (addr, name) = spec
            .split_once('=')
            .ok_or_else(|| anyhow::anyhow!("--instance must be addr=service_name, got {spec}"))?;
        store.put(
            format!("{}/seed-{i}", args.base_path),
            ServiceRecord {
                config: ServiceRecordConfig {
                    service_addr: addr.to_string(),
                    name: name.to_string(),
                },
                registered: true,
            }
            .encode(),
        );
    }

    let mut metrics_registry = Registry::default();
    let config = ClientConfig {
        retry_interval: Duration::from_millis(args.retry_ms),
        giveup_deadline: Duration::from_millis(args.giveup_ms),
        connection_pool_size: args.pool_size,
    };

    let client = ServiceClient::new(
        store,
        Query::new(args.base_path),
        config,
        TcpRpcTransport,
        Some(&mut metrics_registry),
    );

    let shutdown = signal::Shutdown::new();
    let trigger = shutdown.trigger();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(3600)).await;
        trigger.shutdown_now().await;
    });

    info!(
        instances = ?client.list_instances().await,
        pending_readiness = ?client.readiness().pending(),
        "mesh-client demo started, watching for coordination store changes"
    );
    shutdown.wait().await;
    Ok(())
}
