/*!
 * Workload Orchestrator - Main Entry Point
 *
 * Loads configuration from the environment, scans the capability
 * directory once, wires the configured collaborators and serves the
 * control protocol until interrupted.
 */

use anyhow::Context;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{info, warn};

use workload_orchestrator::core::limits::{CLEANUP_INTERVAL, DEFAULT_SESSION_MAX_ENTRIES};
use workload_orchestrator::core::TtlStore;
use workload_orchestrator::{init_tracing, CapabilityRegistry, ControlServer, Orchestrator, OrchestratorConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    info!("Workload orchestrator starting...");
    let config = OrchestratorConfig::from_env().context("invalid configuration")?;

    info!(dir = %config.capability_dir.display(), ext = %config.capability_ext, "Scanning capabilities");
    let registry = CapabilityRegistry::scan(&config.capability_dir, &config.capability_ext)
        .context("could not load capability registry")?;
    info!(count = registry.ids().len(), "Capability registry loaded");

    let orchestrator = Arc::new(
        Orchestrator::from_config(&config, registry).context("could not wire collaborators")?,
    );
    let history = TtlStore::new(config.session_ttl, DEFAULT_SESSION_MAX_ENTRIES);

    // Out-of-band storage cleanup and session expiry
    let janitor = {
        let orchestrator = Arc::clone(&orchestrator);
        let history = history.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(CLEANUP_INTERVAL);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                orchestrator.retry_pending_cleanup().await;
                let evicted = history.evict_expired();
                if evicted > 0 {
                    info!(evicted, "Expired session history");
                }
            }
        })
    };

    let listener = TcpListener::bind(config.listen_addr)
        .await
        .with_context(|| format!("could not bind {}", config.listen_addr))?;
    let server = ControlServer::new(Arc::clone(&orchestrator), history);

    info!(backend = ?config.backend, "Orchestrator ready; press Ctrl+C to exit");
    server
        .serve(listener, async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "Could not listen for Ctrl+C");
                std::future::pending::<()>().await;
            }
        })
        .await
        .context("control server failed")?;

    janitor.abort();
    orchestrator.shutdown();
    let pending = orchestrator.pending_cleanup();
    if !pending.is_empty() {
        warn!(count = pending.len(), "Exiting with storage cleanup still pending");
    }
    info!("Workload orchestrator stopped");
    Ok(())
}
