//! Driver lifecycle: open the registry, serve metrics, sync until signalled

use anyhow::{Context, Result};
use plexvol_core::config::PlexConfig;
use plexvol_driver::{DriverMetrics, Registry, RegistryOptions};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

pub async fn run(config: PlexConfig) -> Result<()> {
    info!("driver starting");

    let backend =
        plexvol_storage::build_backend(&config.storage).context("building storage backend")?;

    let mut prom = prometheus_client::registry::Registry::default();
    let metrics = DriverMetrics::new(&mut prom);

    let opts = RegistryOptions::from_config(&config);
    let root = opts.root.clone();
    let registry = Registry::open(opts, backend, metrics)
        .await
        .with_context(|| format!("opening volume registry at {}", root.display()))?;

    let stop_metrics = CancellationToken::new();
    if let Some(addr) = config.daemon.metrics_addr.clone() {
        let prom = Arc::new(prom);
        let token = stop_metrics.clone();
        tokio::spawn(async move {
            if let Err(e) = crate::metrics::serve(addr, prom, token).await {
                error!("metrics server failed: {e}");
            }
        });
    }

    let volumes = registry.list().await;
    info!(
        volumes = volumes.len(),
        mounted = volumes.iter().filter(|v| v.mounted).count(),
        interval = ?config.driver.sync_interval(),
        "driver ready"
    );
    notify_ready();

    crate::shutdown_signal().await?;

    info!("shutting down, pushing mounted volumes");
    registry.shutdown().await;
    stop_metrics.cancel();
    Ok(())
}

fn notify_ready() {
    // sd_notify(READY=1) when running under systemd; no-op without $NOTIFY_SOCKET
    if let Ok(socket) = std::env::var("NOTIFY_SOCKET") {
        use std::os::unix::net::UnixDatagram;
        if let Ok(sock) = UnixDatagram::unbound() {
            let _ = sock.send_to(b"READY=1\n", &socket);
            tracing::debug!(notify_socket = %socket, "sent systemd READY=1");
        }
    }
}
