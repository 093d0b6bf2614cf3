//! TCP object-server client: one connection per call

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use plexvol_core::{validate_id, PlexError, PlexResult};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tracing::debug;

use crate::backend::Backend;
use crate::protocol::{read_line, Command, Reply};

#[derive(Debug, Clone)]
pub struct TcpBackend {
    addr: String,
    timeout: Duration,
}

impl TcpBackend {
    /// `endpoint` is `tcp://host:port` or plain `host:port`.
    pub fn new(endpoint: &str, timeout: Duration) -> PlexResult<Self> {
        let addr = endpoint
            .trim()
            .trim_start_matches("tcp://")
            .trim_end_matches('/')
            .to_string();
        if addr.is_empty() || !addr.contains(':') {
            return Err(PlexError::Config(format!(
                "tcp endpoint must be host:port, got {endpoint:?}"
            )));
        }
        Ok(Self { addr, timeout })
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    async fn connect(&self) -> PlexResult<TcpStream> {
        let stream = TcpStream::connect(&self.addr).await?;
        stream.set_nodelay(true)?;
        Ok(stream)
    }

    /// Bound the whole exchange so a hung server cannot block the caller.
    async fn bounded<T>(&self, fut: impl Future<Output = PlexResult<T>>) -> PlexResult<T> {
        tokio::time::timeout(self.timeout, fut)
            .await
            .map_err(|_| PlexError::Timeout(self.timeout))?
    }
}

#[async_trait]
impl Backend for TcpBackend {
    fn name(&self) -> &'static str {
        "tcp"
    }

    async fn store(&self, id: &str, src: &mut (dyn AsyncRead + Send + Unpin)) -> PlexResult<u64> {
        validate_id(id)?;
        // the size goes in the control line, so the payload is buffered first
        let mut payload = Vec::new();
        src.read_to_end(&mut payload).await?;
        let size = payload.len() as u64;

        self.bounded(async {
            let mut stream = self.connect().await?;
            let (reader, mut writer) = stream.split();

            let cmd = Command::Store {
                id: id.to_string(),
                size,
            };
            writer.write_all(cmd.encode().as_bytes()).await?;
            writer.write_all(&payload).await?;
            writer.flush().await?;

            let mut reader = BufReader::new(reader);
            let line = read_line(&mut reader).await?;
            Reply::parse(&line).into_result(id)
        })
        .await?;

        debug!(id = %id, bytes = size, addr = %self.addr, "tcp store complete");
        Ok(size)
    }

    async fn retrieve(
        &self,
        id: &str,
        dst: &mut (dyn AsyncWrite + Send + Unpin),
    ) -> PlexResult<u64> {
        validate_id(id)?;
        let n = self
            .bounded(async {
                let mut stream = self.connect().await?;
                let (reader, mut writer) = stream.split();

                let cmd = Command::Retrieve { id: id.to_string() };
                writer.write_all(cmd.encode().as_bytes()).await?;
                writer.flush().await?;

                let mut reader = BufReader::new(reader);
                let line = read_line(&mut reader).await?;
                Reply::parse(&line).into_result(id)?;

                let n = tokio::io::copy(&mut reader, &mut *dst).await?;
                dst.flush().await?;
                Ok(n)
            })
            .await?;

        debug!(id = %id, bytes = n, addr = %self.addr, "tcp retrieve complete");
        Ok(n)
    }
}
