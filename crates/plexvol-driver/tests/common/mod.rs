//! In-memory backend that records every call and flags overlapping stores.

#![allow(dead_code)]

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use plexvol_core::{PlexError, PlexResult};
use plexvol_driver::{DriverMetrics, Registry, RegistryOptions};
use plexvol_storage::Backend;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::Notify;

#[derive(Default)]
pub struct Recorder {
    objects: Mutex<HashMap<String, Vec<u8>>>,
    in_flight: Mutex<HashMap<String, usize>>,
    pub max_overlap: AtomicUsize,
    pub stores: AtomicUsize,
    pub retrieves: AtomicUsize,
    pub fail_stores: AtomicBool,
    pub store_delay: Mutex<Duration>,
    /// Signalled when a store begins
    pub store_started: Notify,
}

impl Recorder {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_store_delay(delay: Duration) -> Arc<Self> {
        let r = Self::default();
        *r.store_delay.lock().unwrap() = delay;
        Arc::new(r)
    }

    pub fn stores(&self) -> usize {
        self.stores.load(Ordering::SeqCst)
    }

    pub fn retrieves(&self) -> usize {
        self.retrieves.load(Ordering::SeqCst)
    }

    pub fn max_overlap(&self) -> usize {
        self.max_overlap.load(Ordering::SeqCst)
    }

    pub fn object(&self, id: &str) -> Option<Vec<u8>> {
        self.objects.lock().unwrap().get(id).cloned()
    }

    pub fn put_object(&self, id: &str, data: Vec<u8>) {
        self.objects.lock().unwrap().insert(id.to_string(), data);
    }

    fn enter(&self, id: &str) {
        let mut in_flight = self.in_flight.lock().unwrap();
        let n = in_flight.entry(id.to_string()).or_default();
        *n += 1;
        self.max_overlap.fetch_max(*n, Ordering::SeqCst);
    }

    fn leave(&self, id: &str) {
        let mut in_flight = self.in_flight.lock().unwrap();
        if let Some(n) = in_flight.get_mut(id) {
            *n -= 1;
        }
    }
}

#[async_trait]
impl Backend for Recorder {
    fn name(&self) -> &'static str {
        "recorder"
    }

    async fn store(&self, id: &str, src: &mut (dyn AsyncRead + Send + Unpin)) -> PlexResult<u64> {
        self.enter(id);
        self.stores.fetch_add(1, Ordering::SeqCst);
        self.store_started.notify_one();

        let delay = *self.store_delay.lock().unwrap();
        tokio::time::sleep(delay).await;

        let mut data = Vec::new();
        let read = src.read_to_end(&mut data).await;
        let result = match read {
            Err(e) => Err(e.into()),
            Ok(_) if self.fail_stores.load(Ordering::SeqCst) => Err(PlexError::Remote {
                status: 503,
                body: "unavailable".into(),
            }),
            Ok(n) => {
                self.put_object(id, data);
                Ok(n as u64)
            }
        };
        self.leave(id);
        result
    }

    async fn retrieve(&self, id: &str, dst: &mut (dyn AsyncWrite + Send + Unpin)) -> PlexResult<u64> {
        self.retrieves.fetch_add(1, Ordering::SeqCst);
        let data = self
            .object(id)
            .ok_or_else(|| PlexError::NotFound(id.to_string()))?;
        dst.write_all(&data).await?;
        Ok(data.len() as u64)
    }
}

pub fn options(root: &Path, every: Duration) -> RegistryOptions {
    let mut opts = RegistryOptions::new(root);
    opts.sync_interval = every;
    opts
}

pub async fn open(root: &Path, every: Duration, backend: Arc<Recorder>) -> Registry {
    Registry::open(options(root, every), backend, DriverMetrics::default())
        .await
        .unwrap()
}
