//! HTTP object-server client
//!
//! Wire surface:
//!   GET  /data/{id}      -> 200 + body | 404
//!   PUT  /data/{id}      -> 200
//!   GET  /checksum/{id}  -> 200 + BLAKE3 hex | 404

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use plexvol_core::{validate_id, PlexError, PlexResult};
use reqwest::{header, Client, StatusCode, Url};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, info};

use crate::backend::Backend;
use crate::debounce::{Clock, RecentWindow, SystemClock};

#[derive(Debug, Clone)]
pub struct HttpOptions {
    /// Per-request timeout
    pub timeout: Duration,
    /// Debounce window per id (zero disables)
    pub debounce: Duration,
    /// Compare `/checksum/{id}` with the uploaded bytes after every PUT
    pub verify_uploads: bool,
}

impl Default for HttpOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(300),
            debounce: Duration::from_secs(10),
            verify_uploads: false,
        }
    }
}

pub struct HttpBackend {
    client: Client,
    base: String,
    recent: RecentWindow,
    opts: HttpOptions,
}

impl HttpBackend {
    pub fn new(endpoint: &str, opts: HttpOptions) -> PlexResult<Self> {
        Self::with_clock(endpoint, opts, Arc::new(SystemClock))
    }

    pub fn with_clock(endpoint: &str, opts: HttpOptions, clock: Arc<dyn Clock>) -> PlexResult<Self> {
        let url = Url::parse(endpoint)
            .map_err(|e| PlexError::Config(format!("invalid http endpoint {endpoint:?}: {e}")))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(PlexError::Config(format!(
                "http endpoint must use http or https, got {endpoint:?}"
            )));
        }
        let client = Client::builder()
            .timeout(opts.timeout)
            .build()
            .map_err(|e| PlexError::Config(format!("building http client: {e}")))?;

        Ok(Self {
            client,
            base: url.as_str().trim_end_matches('/').to_string(),
            recent: RecentWindow::with_clock(opts.debounce, clock),
            opts,
        })
    }

    fn url(&self, route: &str, id: &str) -> String {
        format!("{}/{route}/{id}", self.base)
    }

    /// Hex content hash of the stored object.
    pub async fn checksum(&self, id: &str) -> PlexResult<String> {
        validate_id(id)?;
        let res = self
            .client
            .get(self.url("checksum", id))
            .send()
            .await
            .map_err(|e| self.transport(e))?;

        match res.status() {
            StatusCode::OK => {
                let body = res.text().await.map_err(|e| self.transport(e))?;
                Ok(body.trim().to_string())
            }
            StatusCode::NOT_FOUND => Err(PlexError::NotFound(id.to_string())),
            status => Err(remote_error(status, res).await),
        }
    }

    /// Forget the debounce entry for `id` so the next call goes out.
    pub fn invalidate(&self, id: &str) {
        self.recent.forget(id);
    }

    fn transport(&self, e: reqwest::Error) -> PlexError {
        if e.is_timeout() {
            PlexError::Timeout(self.opts.timeout)
        } else {
            PlexError::Io(std::io::Error::other(e))
        }
    }
}

#[async_trait]
impl Backend for HttpBackend {
    fn name(&self) -> &'static str {
        "http"
    }

    async fn store(&self, id: &str, src: &mut (dyn AsyncRead + Send + Unpin)) -> PlexResult<u64> {
        validate_id(id)?;
        self.recent.check(id)?;

        let mut payload = Vec::new();
        src.read_to_end(&mut payload).await?;
        let size = payload.len() as u64;
        let digest = self
            .opts
            .verify_uploads
            .then(|| blake3::hash(&payload).to_hex().to_string());

        let res = self
            .client
            .put(self.url("data", id))
            .header(header::CONTENT_TYPE, "application/octet-stream")
            .body(payload)
            .send()
            .await
            .map_err(|e| self.transport(e))?;

        if res.status() != StatusCode::OK {
            return Err(remote_error(res.status(), res).await);
        }

        if let Some(local) = digest {
            let remote = self.checksum(id).await?;
            if remote != local {
                return Err(PlexError::Protocol(format!(
                    "checksum mismatch after upload of {id}: local {local}, remote {remote}"
                )));
            }
        }

        self.recent.record(id);
        info!(id = %id, bytes = size, "uploaded");
        Ok(size)
    }

    async fn retrieve(
        &self,
        id: &str,
        dst: &mut (dyn AsyncWrite + Send + Unpin),
    ) -> PlexResult<u64> {
        validate_id(id)?;
        self.recent.check(id)?;

        let mut res = self
            .client
            .get(self.url("data", id))
            .send()
            .await
            .map_err(|e| self.transport(e))?;

        match res.status() {
            StatusCode::OK => {}
            StatusCode::NOT_FOUND => {
                debug!(id = %id, "nothing stored yet");
                return Err(PlexError::NotFound(id.to_string()));
            }
            status => return Err(remote_error(status, res).await),
        }

        let mut n = 0u64;
        while let Some(chunk) = res.chunk().await.map_err(|e| self.transport(e))? {
            dst.write_all(&chunk).await?;
            n += chunk.len() as u64;
        }
        dst.flush().await?;

        self.recent.record(id);
        info!(id = %id, bytes = n, "downloaded");
        Ok(n)
    }
}

async fn remote_error(status: StatusCode, res: reqwest::Response) -> PlexError {
    let body = res.text().await.unwrap_or_default();
    PlexError::Remote {
        status: status.as_u16(),
        body,
    }
}
