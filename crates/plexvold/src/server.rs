//! Object server mode: the remote end of the http and tcp backends

use anyhow::{Context, Result};
use plexvol_core::config::{ServerConfig, ServerProtocol};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::info;

pub async fn run(cfg: ServerConfig) -> Result<()> {
    let store = plexvol_storage::server::open_store(&cfg.data_dir)
        .with_context(|| format!("opening data dir {}", cfg.data_dir.display()))?;
    let listener = TcpListener::bind(&cfg.listen)
        .await
        .with_context(|| format!("binding {}", cfg.listen))?;

    let shutdown = CancellationToken::new();
    let mut server = {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            match cfg.protocol {
                ServerProtocol::Http => {
                    plexvol_storage::server::http::serve(listener, store, shutdown).await
                }
                ServerProtocol::Tcp => {
                    plexvol_storage::server::tcp::serve(listener, store, shutdown).await
                }
            }
        })
    };

    let exited = tokio::select! {
        res = crate::shutdown_signal() => {
            res?;
            false
        }
        res = &mut server => {
            res?.context("object server")?;
            true
        }
    };

    if !exited {
        info!("stopping object server");
        shutdown.cancel();
        server.await?.context("object server")?;
    }
    Ok(())
}
