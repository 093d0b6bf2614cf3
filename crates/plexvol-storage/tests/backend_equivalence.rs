//! Integration test: every backend against a live object server
//!
//! The HTTP and TCP servers from `plexvol_storage::server` are bound to
//! 127.0.0.1:0 so no external service is required.

use std::sync::Arc;
use std::time::Duration;

use plexvol_core::PlexError;
use plexvol_storage::server::{self, SharedStore};
use plexvol_storage::{Backend, FsBackend, HttpBackend, HttpOptions, ManualClock, TcpBackend};
use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;

struct Server {
    addr: String,
    store: SharedStore,
    shutdown: CancellationToken,
    _dir: TempDir,
}

impl Drop for Server {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

async fn start_http() -> Server {
    let dir = TempDir::new().unwrap();
    let store = server::open_store(dir.path()).unwrap();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    let shutdown = CancellationToken::new();
    tokio::spawn(server::http::serve(listener, store.clone(), shutdown.clone()));
    Server {
        addr: format!("http://{addr}"),
        store,
        shutdown,
        _dir: dir,
    }
}

async fn start_tcp() -> Server {
    let dir = TempDir::new().unwrap();
    let store = server::open_store(dir.path()).unwrap();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    let shutdown = CancellationToken::new();
    tokio::spawn(server::tcp::serve(listener, store.clone(), shutdown.clone()));
    Server {
        addr: format!("tcp://{addr}"),
        store,
        shutdown,
        _dir: dir,
    }
}

fn no_debounce() -> HttpOptions {
    HttpOptions {
        timeout: Duration::from_secs(10),
        debounce: Duration::ZERO,
        verify_uploads: false,
    }
}

fn payload() -> Vec<u8> {
    (0u32..200_000).map(|i| (i.wrapping_mul(31) >> 3) as u8).collect()
}

async fn assert_store_retrieve(backend: &dyn Backend) {
    let data = payload();
    let stored = backend.store("mc-1", &mut data.as_slice()).await.unwrap();
    assert_eq!(stored, data.len() as u64);

    let mut out = Vec::new();
    let got = backend.retrieve("mc-1", &mut out).await.unwrap();
    assert_eq!(got, data.len() as u64);
    assert_eq!(out, data, "{} backend must return stored bytes", backend.name());
}

async fn assert_not_found(backend: &dyn Backend) {
    let mut out = Vec::new();
    match backend.retrieve("never-stored", &mut out).await {
        Err(PlexError::NotFound(id)) => assert_eq!(id, "never-stored"),
        other => panic!("{}: expected NotFound, got {other:?}", backend.name()),
    }
    assert!(out.is_empty());
}

#[tokio::test]
async fn fs_backend_roundtrip_and_not_found() {
    let dir = TempDir::new().unwrap();
    let backend = FsBackend::new(dir.path()).unwrap();
    assert_store_retrieve(&backend).await;
    assert_not_found(&backend).await;
}

#[tokio::test]
async fn http_backend_roundtrip_and_not_found() {
    let srv = start_http().await;
    let backend = HttpBackend::new(&srv.addr, no_debounce()).unwrap();
    assert_store_retrieve(&backend).await;
    assert_not_found(&backend).await;
    assert!(srv.store.object_path("mc-1").exists());
}

#[tokio::test]
async fn tcp_backend_roundtrip_and_not_found() {
    let srv = start_tcp().await;
    let backend = TcpBackend::new(&srv.addr, Duration::from_secs(10)).unwrap();
    assert_store_retrieve(&backend).await;
    assert_not_found(&backend).await;
    assert!(srv.store.object_path("mc-1").exists());
}

#[tokio::test]
async fn tcp_store_replaces_existing_object() {
    let srv = start_tcp().await;
    let backend = TcpBackend::new(&srv.addr, Duration::from_secs(10)).unwrap();

    backend.store("mc-1", &mut &b"old contents that are longer"[..]).await.unwrap();
    backend.store("mc-1", &mut &b"new"[..]).await.unwrap();

    let mut out = Vec::new();
    backend.retrieve("mc-1", &mut out).await.unwrap();
    assert_eq!(out, b"new");
}

#[tokio::test]
async fn tcp_empty_payload_roundtrips() {
    let srv = start_tcp().await;
    let backend = TcpBackend::new(&srv.addr, Duration::from_secs(10)).unwrap();

    backend.store("empty", &mut &b""[..]).await.unwrap();
    let mut out = Vec::new();
    assert_eq!(backend.retrieve("empty", &mut out).await.unwrap(), 0);
}

#[tokio::test]
async fn http_second_store_within_window_is_recently_cached() {
    let srv = start_http().await;
    let clock = Arc::new(ManualClock::default());
    let opts = HttpOptions {
        debounce: Duration::from_secs(10),
        ..no_debounce()
    };
    let backend = HttpBackend::with_clock(&srv.addr, opts, clock.clone()).unwrap();

    backend.store("mc-1", &mut &b"first"[..]).await.unwrap();

    clock.advance(Duration::from_secs(3));
    let err = backend.store("mc-1", &mut &b"second"[..]).await.unwrap_err();
    assert!(matches!(err, PlexError::RecentlyCached(_)));
    assert!(err.is_benign_miss());

    // the debounced call moved nothing
    let stored = tokio::fs::read(srv.store.object_path("mc-1")).await.unwrap();
    assert_eq!(stored, b"first");

    clock.advance(Duration::from_secs(8));
    backend.store("mc-1", &mut &b"third"[..]).await.unwrap();
    let stored = tokio::fs::read(srv.store.object_path("mc-1")).await.unwrap();
    assert_eq!(stored, b"third");
}

#[tokio::test]
async fn http_retrieve_after_store_is_debounced_until_invalidated() {
    let srv = start_http().await;
    let clock = Arc::new(ManualClock::default());
    let opts = HttpOptions {
        debounce: Duration::from_secs(10),
        ..no_debounce()
    };
    let backend = HttpBackend::with_clock(&srv.addr, opts, clock).unwrap();

    backend.store("mc-1", &mut &b"data"[..]).await.unwrap();
    let mut out = Vec::new();
    assert!(matches!(
        backend.retrieve("mc-1", &mut out).await,
        Err(PlexError::RecentlyCached(_))
    ));

    backend.invalidate("mc-1");
    backend.retrieve("mc-1", &mut out).await.unwrap();
    assert_eq!(out, b"data");
}

#[tokio::test]
async fn http_not_found_is_not_recorded_by_debounce() {
    let srv = start_http().await;
    let backend = HttpBackend::new(
        &srv.addr,
        HttpOptions {
            debounce: Duration::from_secs(60),
            ..no_debounce()
        },
    )
    .unwrap();

    let mut out = Vec::new();
    assert!(backend.retrieve("mc-1", &mut out).await.unwrap_err().is_not_found());
    // a miss must not suppress the next attempt
    assert!(backend.retrieve("mc-1", &mut out).await.unwrap_err().is_not_found());
}

#[tokio::test]
async fn http_checksum_and_verified_upload() {
    let srv = start_http().await;
    let opts = HttpOptions {
        verify_uploads: true,
        ..no_debounce()
    };
    let backend = HttpBackend::new(&srv.addr, opts).unwrap();

    backend.store("mc-1", &mut &b"verify me"[..]).await.unwrap();
    let sum = backend.checksum("mc-1").await.unwrap();
    assert_eq!(sum, blake3::hash(b"verify me").to_hex().to_string());

    assert!(backend.checksum("missing").await.unwrap_err().is_not_found());
}

#[tokio::test]
async fn http_server_rejects_invalid_id() {
    let srv = start_http().await;
    let res = reqwest::get(format!("{}/data/..%2Fetc", srv.addr)).await.unwrap();
    assert_eq!(res.status().as_u16(), 400);
}

#[tokio::test]
async fn http_server_error_surfaces_as_remote() {
    // data directory replaced by a plain file: every PUT fails server side
    let srv = start_http().await;
    std::fs::remove_dir_all(srv.store.root()).unwrap();
    std::fs::write(srv.store.root(), b"not a directory").unwrap();

    let backend = HttpBackend::new(&srv.addr, no_debounce()).unwrap();
    match backend.store("mc-1", &mut &b"x"[..]).await {
        Err(PlexError::Remote { status, .. }) => assert_eq!(status, 500),
        other => panic!("expected Remote, got {other:?}"),
    }
}

#[tokio::test]
async fn tcp_server_rejects_unsized_store() {
    let srv = start_tcp().await;
    let addr = srv.addr.trim_start_matches("tcp://");

    let mut conn = TcpStream::connect(addr).await.unwrap();
    conn.write_all(b"STORE:mc-1\npayload").await.unwrap();
    conn.shutdown().await.unwrap();

    let mut reply = String::new();
    conn.read_to_string(&mut reply).await.unwrap();
    assert!(reply.starts_with("ERR "), "got {reply:?}");
    assert!(!srv.store.object_path("mc-1").exists());
}

#[tokio::test]
async fn tcp_truncated_payload_keeps_previous_object() {
    let srv = start_tcp().await;
    let backend = TcpBackend::new(&srv.addr, Duration::from_secs(10)).unwrap();
    backend.store("mc-1", &mut &b"intact"[..]).await.unwrap();

    let addr = srv.addr.trim_start_matches("tcp://");
    let mut conn = TcpStream::connect(addr).await.unwrap();
    conn.write_all(b"STORE:mc-1:1000\nonly a few bytes").await.unwrap();
    conn.shutdown().await.unwrap();
    let mut reply = String::new();
    conn.read_to_string(&mut reply).await.unwrap();
    assert!(reply.starts_with("ERR "), "got {reply:?}");

    let mut out = Vec::new();
    backend.retrieve("mc-1", &mut out).await.unwrap();
    assert_eq!(out, b"intact");
}

#[tokio::test]
async fn tcp_hung_server_times_out() {
    // accepts connections but never answers
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((conn, _)) = listener.accept().await {
            held.push(conn);
        }
    });

    let backend = TcpBackend::new(&addr.to_string(), Duration::from_millis(200)).unwrap();
    let mut out = Vec::new();
    let err = backend.retrieve("mc-1", &mut out).await.unwrap_err();
    assert!(matches!(err, PlexError::Timeout(_)), "got {err:?}");
}
