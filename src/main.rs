//! fanout-guard daemon.
//!
//! Hosts the resilience core: health checking, state snapshots, config hot
//! reload of the TTL table and the read-only diagnostics endpoint.
//!
//! ```text
//!   config (TOML + FANOUT_*) ──▶ Core::init ──┬─▶ health monitor ──▶ instances
//!                                             ├─▶ registry / breaker snapshots ──▶ KvStore
//!   config watcher ──▶ TTL table hot swap ──▶ ├─▶ fan-out cache
//!                                             └─▶ admin endpoint (/admin/*)
//! ```
//!
//! The daemon runs on the in-process `MemoryStore`. Breaker and registry
//! snapshots, and the remote cache tier, therefore live only as long as the
//! process; state survives a restart only when the library is embedded with
//! a `KvStore` backed by an external store.

use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;

use fanout_guard::admin::{self, AdminState};
use fanout_guard::config::loader::load_effective;
use fanout_guard::config::watcher::{apply_ttl_updates, ConfigWatcher};
use fanout_guard::lifecycle::signals::wait_for_signal;
use fanout_guard::observability::{logging::init_logging, metrics::init_metrics};
use fanout_guard::persistence::MemoryStore;
use fanout_guard::{Core, Shutdown};

#[derive(Parser)]
#[command(name = "fanout-guard")]
#[command(
    about = "Resilience and fan-out query core",
    long_about = "Resilience and fan-out query core.\n\n\
        Breaker and registry state is kept in an in-process store and does \
        not survive a process restart."
)]
struct Args {
    /// Path to a TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Do not reload the TTL table when the file changes.
    #[arg(long)]
    no_watch: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let config = match load_effective(args.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            init_logging("info");
            tracing::error!(error = %e, "Invalid configuration");
            return Err(e.into());
        }
    };
    init_logging(&config.observability.log_level);

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "fanout-guard starting");

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse::<SocketAddr>() {
            Ok(addr) => init_metrics(addr),
            Err(e) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                error = %e,
                "Failed to parse metrics address"
            ),
        }
    }

    tracing::info!("Using in-process state store; breaker and registry state will not survive a process restart");
    let core = Core::init(config.clone(), Arc::new(MemoryStore::new())).await?;

    // Kept alive for the lifetime of the process.
    let _watcher = match (&args.config, args.no_watch) {
        (Some(path), false) => {
            let (watcher, updates) = ConfigWatcher::new(path);
            match watcher.run() {
                Ok(handle) => {
                    tokio::spawn(apply_ttl_updates(updates, core.cache()));
                    Some(handle)
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Config watcher unavailable, hot reload disabled");
                    None
                }
            }
        }
        _ => None,
    };

    let listeners = Shutdown::new();
    if config.admin.enabled {
        let listener = TcpListener::bind(&config.admin.bind_address).await?;
        let state = AdminState::from_core(&core);
        let mut stop = listeners.subscribe();
        listeners.track(
            "admin",
            tokio::spawn(async move {
                let shutdown = async move {
                    let _ = stop.recv().await;
                };
                if let Err(e) = admin::serve(listener, state, shutdown).await {
                    tracing::error!(error = %e, "Admin endpoint failed");
                }
            }),
        );
    }

    wait_for_signal().await;

    listeners.trigger_and_wait(Duration::from_secs(5)).await;
    core.shutdown().await;

    tracing::info!("Shutdown complete");
    Ok(())
}
