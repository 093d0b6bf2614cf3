//! TCP object server: accept loop plus one task per connection

use std::net::SocketAddr;
use std::time::Duration;

use plexvol_core::{PlexError, PlexResult};
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::SharedStore;
use crate::protocol::{read_line, Command, Reply};

/// Accept connections until `shutdown` is cancelled.
pub async fn serve(
    listener: TcpListener,
    store: SharedStore,
    shutdown: CancellationToken,
) -> PlexResult<()> {
    let addr = listener.local_addr()?;
    info!(addr = %addr, root = %store.root().display(), "tcp object server listening");

    loop {
        let (conn, peer) = tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok(pair) => pair,
                Err(e) => {
                    warn!("accept failed: {e}");
                    continue;
                }
            },
        };

        let store = store.clone();
        tokio::spawn(async move {
            if let Err(e) = handle_conn(conn, peer, &store).await {
                warn!(peer = %peer, "connection failed: {e}");
            }
        });
    }

    info!(addr = %addr, "tcp object server stopped");
    Ok(())
}

async fn handle_conn(conn: TcpStream, peer: SocketAddr, store: &SharedStore) -> PlexResult<()> {
    conn.set_nodelay(true)?;
    let (reader, mut writer) = conn.into_split();
    let mut reader = BufReader::new(reader);

    let line = read_line(&mut reader).await?;
    let cmd = match Command::parse(&line) {
        Ok(cmd) => cmd,
        Err(e) => {
            writer.write_all(Reply::from_error(&e).encode().as_bytes()).await?;
            writer.shutdown().await?;
            drain(&mut reader).await;
            return Err(e);
        }
    };
    debug!(peer = %peer, command = ?cmd, "command received");

    match cmd {
        Command::Store { id, size } => {
            let mut body = (&mut reader).take(size);
            let reply = match store.store_exact(&id, &mut body, Some(size)).await {
                Ok(n) => {
                    info!(id = %id, bytes = n, peer = %peer, "object received");
                    Reply::Ok
                }
                Err(e) => {
                    warn!(id = %id, peer = %peer, "store failed: {e}");
                    Reply::from_error(&e)
                }
            };
            writer.write_all(reply.encode().as_bytes()).await?;
            writer.shutdown().await?;
            if !matches!(reply, Reply::Ok) {
                drain(&mut reader).await;
            }
        }
        Command::Retrieve { id } => match store.open(&id).await {
            Ok((mut file, len)) => {
                writer.write_all(Reply::Ok.encode().as_bytes()).await?;
                let n = tokio::io::copy(&mut file, &mut writer).await?;
                writer.shutdown().await?;
                if n != len {
                    return Err(PlexError::Protocol(format!(
                        "object {id} changed while streaming: sent {n} of {len} bytes"
                    )));
                }
                info!(id = %id, bytes = n, peer = %peer, "object served");
            }
            Err(e) => {
                writer.write_all(Reply::from_error(&e).encode().as_bytes()).await?;
                writer.shutdown().await?;
                if !e.is_not_found() {
                    return Err(e);
                }
            }
        },
    }
    Ok(())
}

/// Swallow whatever the peer still sends so closing does not reset the
/// connection before it has read our reply.
async fn drain(reader: &mut BufReader<OwnedReadHalf>) {
    let _ = tokio::time::timeout(
        Duration::from_secs(2),
        tokio::io::copy(reader, &mut tokio::io::sink()),
    )
    .await;
}
