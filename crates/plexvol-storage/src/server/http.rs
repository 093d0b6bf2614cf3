//! axum router for `GET/PUT /data/{id}` and `GET /checksum/{id}`

use std::io;
use std::time::Instant;

use axum::{
    body::Body,
    extract::{DefaultBodyLimit, Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use futures::TryStreamExt;
use plexvol_core::{PlexError, PlexResult};
use tokio::net::TcpListener;
use tokio_util::io::{ReaderStream, StreamReader};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use super::SharedStore;
use crate::backend::Backend;

pub fn router(store: SharedStore) -> Router {
    Router::new()
        .route("/data/{id}", get(get_data).put(put_data))
        .route("/checksum/{id}", get(get_checksum))
        // archives are far larger than axum's default limit
        .layer(DefaultBodyLimit::disable())
        .with_state(store)
}

/// Serve until `shutdown` is cancelled.
pub async fn serve(
    listener: TcpListener,
    store: SharedStore,
    shutdown: CancellationToken,
) -> PlexResult<()> {
    let addr = listener.local_addr()?;
    info!(addr = %addr, root = %store.root().display(), "http object server listening");

    axum::serve(listener, router(store))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;
    Ok(())
}

async fn get_data(State(store): State<SharedStore>, Path(id): Path<String>) -> Response {
    let start = Instant::now();
    match store.open(&id).await {
        Ok((file, len)) => {
            info!(id = %id, bytes = len, took = ?start.elapsed(), "serving object");
            (
                StatusCode::OK,
                [
                    (header::CONTENT_TYPE, "application/octet-stream".to_string()),
                    (header::CONTENT_LENGTH, len.to_string()),
                ],
                Body::from_stream(ReaderStream::new(file)),
            )
                .into_response()
        }
        Err(e) => error_response(&id, e),
    }
}

async fn put_data(
    State(store): State<SharedStore>,
    Path(id): Path<String>,
    body: Body,
) -> Response {
    let start = Instant::now();
    let stream = body.into_data_stream().map_err(io::Error::other);
    let mut reader = StreamReader::new(stream);

    match store.store(&id, &mut reader).await {
        Ok(n) => {
            info!(id = %id, bytes = n, took = ?start.elapsed(), "object received");
            (StatusCode::OK, "stored").into_response()
        }
        Err(e) => error_response(&id, e),
    }
}

async fn get_checksum(State(store): State<SharedStore>, Path(id): Path<String>) -> Response {
    match store.checksum(&id).await {
        Ok(sum) => (StatusCode::OK, [(header::CONTENT_TYPE, "text/plain")], sum).into_response(),
        Err(e) => error_response(&id, e),
    }
}

fn error_response(id: &str, e: PlexError) -> Response {
    let status = match &e {
        e if e.is_not_found() => StatusCode::NOT_FOUND,
        PlexError::InvalidId(_) => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    if status == StatusCode::INTERNAL_SERVER_ERROR {
        error!(id = %id, "object request failed: {e}");
    } else {
        warn!(id = %id, status = status.as_u16(), "object request rejected: {e}");
    }
    (status, e.to_string()).into_response()
}
