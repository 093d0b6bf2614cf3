//! The Store/Retrieve capability shared by every transport

use std::sync::Arc;

use async_trait::async_trait;
use plexvol_core::config::{BackendKind, StorageConfig};
use plexvol_core::PlexResult;
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::info;

use crate::fs::FsBackend;
use crate::http::{HttpBackend, HttpOptions};
use crate::tcp::TcpBackend;

/// An object store holding one archive per volume id.
///
/// Error contract, identical across implementations:
///   - `NotFound`: nothing stored under this id yet
///   - `RecentlyCached`: debounced, the call did nothing (benign)
///   - `Remote` / `Protocol` / `Timeout` / `Io`: the transfer failed
#[async_trait]
pub trait Backend: Send + Sync {
    /// Short transport name for logs
    fn name(&self) -> &'static str;

    /// Replace the object for `id` with everything readable from `src`.
    /// Returns the number of bytes stored.
    async fn store(&self, id: &str, src: &mut (dyn AsyncRead + Send + Unpin)) -> PlexResult<u64>;

    /// Copy the object for `id` into `dst`. Returns the number of bytes copied.
    async fn retrieve(
        &self,
        id: &str,
        dst: &mut (dyn AsyncWrite + Send + Unpin),
    ) -> PlexResult<u64>;
}

pub type SharedBackend = Arc<dyn Backend>;

/// Build the backend selected by `[storage]`.
pub fn build_backend(cfg: &StorageConfig) -> PlexResult<SharedBackend> {
    let backend: SharedBackend = match cfg.backend {
        BackendKind::Fs => Arc::new(FsBackend::new(&cfg.fs_root)?),
        BackendKind::Http => Arc::new(HttpBackend::new(
            &cfg.endpoint,
            HttpOptions {
                timeout: cfg.timeout(),
                debounce: cfg.debounce(),
                verify_uploads: cfg.verify_uploads,
            },
        )?),
        BackendKind::Tcp => Arc::new(TcpBackend::new(&cfg.endpoint, cfg.timeout())?),
    };
    info!(backend = backend.name(), endpoint = %cfg.endpoint, "storage backend ready");
    Ok(backend)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_each_kind() {
        let tmp = tempfile::TempDir::new().unwrap();
        let mut cfg = StorageConfig {
            fs_root: tmp.path().join("objects"),
            ..Default::default()
        };

        cfg.backend = BackendKind::Fs;
        assert_eq!(build_backend(&cfg).unwrap().name(), "fs");
        assert!(tmp.path().join("objects").is_dir());

        cfg.backend = BackendKind::Http;
        cfg.endpoint = "http://127.0.0.1:30000".into();
        assert_eq!(build_backend(&cfg).unwrap().name(), "http");

        cfg.backend = BackendKind::Tcp;
        cfg.endpoint = "tcp://127.0.0.1:30000".into();
        assert_eq!(build_backend(&cfg).unwrap().name(), "tcp");
    }

    #[test]
    fn rejects_bad_http_endpoint() {
        let cfg = StorageConfig {
            backend: BackendKind::Http,
            endpoint: "not a url".into(),
            ..Default::default()
        };
        assert!(build_backend(&cfg).is_err());
    }
}
