//! Volume registry: the lifecycle state machine behind Create/Mount/Unmount/Remove.
//!
//! Locking:
//!   - `volumes` (RwLock) is held only for map reads and updates, never
//!     across archive or network I/O.
//!   - each entry's sync lock (tokio Mutex) serialises Mount, Unmount,
//!     Remove and every save-to-store for that volume.
//!   - `persist_lock` orders snapshot writes; it is taken before `volumes`.

use std::collections::{hash_map, BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use plexvol_archive::ArchiveOptions;
use plexvol_core::config::{PlexConfig, RemovePolicy};
use plexvol_core::types::{
    CapabilitiesResponse, Capability, ListResponse, Scope, Volume, VolumeSummary,
};
use plexvol_core::{validate_id, PlexError, PlexResult};
use plexvol_storage::SharedBackend;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};
use tracing::{debug, error, info, warn};

use crate::metrics::{DriverMetrics, SyncOutcome};
use crate::scheduler::{self, SyncTask};
use crate::snapshot::{self, Snapshot};

#[derive(Debug, Clone)]
pub struct RegistryOptions {
    /// Mountpoints are `root/<id>`; the snapshot is `root/volumes.json`
    pub root: PathBuf,
    pub sync_interval: Duration,
    pub remove_policy: RemovePolicy,
    pub archive: ArchiveOptions,
}

impl RegistryOptions {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let defaults = plexvol_core::config::DriverConfig::default();
        Self {
            root: root.into(),
            sync_interval: defaults.sync_interval(),
            remove_policy: defaults.remove_policy,
            archive: ArchiveOptions::default(),
        }
    }

    pub fn from_config(cfg: &PlexConfig) -> Self {
        Self {
            root: cfg.driver.root.clone(),
            sync_interval: cfg.driver.sync_interval(),
            remove_policy: cfg.driver.remove_policy,
            archive: ArchiveOptions::from_config(&cfg.archive),
        }
    }
}

struct Entry {
    volume: Volume,
    sync_lock: Arc<Mutex<()>>,
    /// Present iff the volume is mounted in this process
    task: Option<SyncTask>,
}

impl Entry {
    fn new(volume: Volume) -> Self {
        Self {
            volume,
            sync_lock: Arc::new(Mutex::new(())),
            task: None,
        }
    }
}

/// A volume's sync lock, held.
pub(crate) type SyncGuard = OwnedMutexGuard<()>;

struct Held {
    guard: SyncGuard,
    lock: Arc<Mutex<()>>,
    mountpoint: PathBuf,
}

pub(crate) struct Inner {
    opts: RegistryOptions,
    backend: SharedBackend,
    metrics: DriverMetrics,
    volumes: RwLock<HashMap<String, Entry>>,
    snapshot: Snapshot,
    persist_lock: Mutex<()>,
}

impl Inner {
    /// Take the sync lock of `id`, retrying if the entry was replaced while
    /// we waited.
    async fn acquire(&self, id: &str) -> PlexResult<Held> {
        loop {
            let lock = {
                let map = self.volumes.read().await;
                map.get(id)
                    .map(|e| e.sync_lock.clone())
                    .ok_or_else(|| PlexError::NotFound(id.to_string()))?
            };
            let guard = lock.clone().lock_owned().await;

            let map = self.volumes.read().await;
            match map.get(id) {
                Some(e) if Arc::ptr_eq(&e.sync_lock, &lock) => {
                    let mountpoint = e.volume.mountpoint.clone();
                    return Ok(Held {
                        guard,
                        lock,
                        mountpoint,
                    });
                }
                Some(_) => continue,
                None => return Err(PlexError::NotFound(id.to_string())),
            }
        }
    }

    pub(crate) async fn mountpoint_of(&self, id: &str) -> Option<PathBuf> {
        let map = self.volumes.read().await;
        map.get(id).map(|e| e.volume.mountpoint.clone())
    }

    async fn take_task(&self, id: &str) -> Option<SyncTask> {
        let mut map = self.volumes.write().await;
        map.get_mut(id).and_then(|e| e.task.take())
    }

    /// Archive `mountpoint` and store it under `id`. Caller holds the sync lock.
    pub(crate) async fn save(&self, id: &str, mountpoint: &Path, _guard: &SyncGuard) -> PlexResult<()> {
        let start = Instant::now();
        match self.push(id, mountpoint).await {
            Ok(bytes) => {
                self.metrics.record_sync(SyncOutcome::Ok);
                self.touch(id).await;
                info!(id = %id, bytes, took = ?start.elapsed(), "volume synced");
                Ok(())
            }
            Err(PlexError::RecentlyCached(_)) => {
                self.metrics.record_sync(SyncOutcome::Cached);
                debug!(id = %id, "sync skipped, recently transferred");
                Ok(())
            }
            Err(e) => {
                self.metrics.record_sync(SyncOutcome::Failed);
                Err(e)
            }
        }
    }

    async fn push(&self, id: &str, mountpoint: &Path) -> PlexResult<u64> {
        let src = mountpoint.to_path_buf();
        let opts = self.opts.archive.clone();
        let payload = blocking(move || plexvol_archive::compress_to_vec(&src, &opts)).await?;
        self.backend.store(id, &mut payload.as_slice()).await
    }

    /// Replace the mountpoint with the stored archive, if there is one.
    async fn load(&self, id: &str, mountpoint: &Path, _guard: &SyncGuard) -> PlexResult<()> {
        let start = Instant::now();
        let mut buf = Vec::new();
        match self.backend.retrieve(id, &mut buf).await {
            Ok(bytes) => {
                let dst = mountpoint.to_path_buf();
                blocking(move || plexvol_archive::decompress_slice(&buf, &dst)).await?;
                info!(id = %id, bytes, took = ?start.elapsed(), "volume restored");
                Ok(())
            }
            Err(e) if e.is_benign_miss() => {
                info!(id = %id, "nothing to restore ({e}), keeping local contents");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    async fn touch(&self, id: &str) {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        let mut map = self.volumes.write().await;
        if let Some(e) = map.get_mut(id) {
            e.volume.last_sync = Some(now);
        }
    }

    /// Write the snapshot. Failures are logged, never returned.
    pub(crate) async fn persist(&self) {
        let _order = self.persist_lock.lock().await;
        let volumes: BTreeMap<String, Volume> = {
            let map = self.volumes.read().await;
            map.iter()
                .map(|(id, e)| (id.clone(), e.volume.clone()))
                .collect()
        };
        self.metrics
            .set_mounted(volumes.values().filter(|v| v.mounted).count());

        if let Err(e) = self.snapshot.store(&volumes).await {
            warn!("failed to persist registry: {e:#}");
        }
    }
}

async fn blocking<T, F>(f: F) -> PlexResult<T>
where
    F: FnOnce() -> PlexResult<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| PlexError::Other(anyhow::anyhow!("archive worker failed: {e}")))?
}

/// Owner of every known volume. Clones share the same registry.
#[derive(Clone)]
pub struct Registry {
    inner: Arc<Inner>,
}

impl Registry {
    /// Load the snapshot under `opts.root` and re-arm the sync task of
    /// every volume it marks mounted. Nothing is pulled from the backend.
    pub async fn open(
        opts: RegistryOptions,
        backend: SharedBackend,
        metrics: DriverMetrics,
    ) -> PlexResult<Self> {
        tokio::fs::create_dir_all(&opts.root).await?;
        let snapshot = Snapshot::new(&opts.root);
        let stored = match snapshot.load() {
            Ok(stored) => stored,
            Err(e) if snapshot::is_corrupt(&e) => {
                error!(error = ?e, "registry snapshot is corrupt");
                let moved = snapshot.quarantine()?;
                warn!(moved = %moved.display(), "starting with an empty registry");
                BTreeMap::new()
            }
            Err(e) => return Err(e.into()),
        };

        let mut volumes = HashMap::with_capacity(stored.len());
        for (id, mut volume) in stored {
            if validate_id(&id).is_err() || snapshot::is_reserved(&id) {
                warn!(id = %id, "skipping snapshot entry with invalid id");
                continue;
            }
            let mountpoint = opts.root.join(&id);
            if volume.mountpoint != mountpoint {
                warn!(
                    id = %id,
                    stored = %volume.mountpoint.display(),
                    now = %mountpoint.display(),
                    "mountpoint moved with the registry root"
                );
            }
            volume.id = id.clone();
            volume.mountpoint = mountpoint;
            tokio::fs::create_dir_all(&volume.mountpoint).await?;
            volumes.insert(id, Entry::new(volume));
        }

        let inner = Arc::new(Inner {
            opts,
            backend,
            metrics,
            volumes: RwLock::new(volumes),
            snapshot,
            persist_lock: Mutex::new(()),
        });

        let mut rearmed = 0usize;
        {
            let mut map = inner.volumes.write().await;
            for (id, entry) in map.iter_mut().filter(|(_, e)| e.volume.mounted) {
                entry.task = Some(scheduler::spawn(
                    Arc::downgrade(&inner),
                    id.clone(),
                    entry.sync_lock.clone(),
                    inner.opts.sync_interval,
                ));
                rearmed += 1;
            }
            inner
                .metrics
                .set_mounted(map.values().filter(|e| e.volume.mounted).count());
        }

        info!(
            root = %inner.opts.root.display(),
            backend = inner.backend.name(),
            rearmed,
            "registry opened"
        );
        Ok(Self { inner })
    }

    pub fn root(&self) -> &Path {
        &self.inner.opts.root
    }

    pub fn metrics(&self) -> &DriverMetrics {
        &self.inner.metrics
    }

    /// Ensure `root/<id>` exists and register the volume unmounted.
    ///
    /// Creating an id that already exists keeps the existing entry, including
    /// its mounted state.
    pub async fn create(&self, id: &str) -> PlexResult<PathBuf> {
        validate_id(id)?;
        if snapshot::is_reserved(id) {
            return Err(PlexError::InvalidId(id.to_string()));
        }

        // a concurrent Remove can drop the entry before we hold its lock
        let (fresh, held) = loop {
            let fresh = {
                let mut map = self.inner.volumes.write().await;
                match map.entry(id.to_string()) {
                    hash_map::Entry::Occupied(_) => false,
                    hash_map::Entry::Vacant(slot) => {
                        slot.insert(Entry::new(Volume {
                            id: id.to_string(),
                            mountpoint: self.inner.opts.root.join(id),
                            mounted: false,
                            last_sync: None,
                        }));
                        true
                    }
                }
            };
            match self.inner.acquire(id).await {
                Ok(held) => break (fresh, held),
                Err(PlexError::NotFound(_)) => {
                    debug!(id = %id, "volume removed during create, retrying");
                }
                Err(e) => return Err(e),
            }
        };
        if let Err(e) = tokio::fs::create_dir_all(&held.mountpoint).await {
            if fresh {
                self.inner.volumes.write().await.remove(id);
            }
            return Err(e.into());
        }

        if fresh {
            info!(id = %id, mountpoint = %held.mountpoint.display(), "volume created");
        } else {
            debug!(id = %id, "volume already exists, keeping entry");
        }
        self.inner.persist().await;
        Ok(held.mountpoint)
    }

    /// Pull the stored archive into the mountpoint and start the sync task.
    ///
    /// Mounting a mounted volume just returns its mountpoint.
    pub async fn mount(&self, id: &str) -> PlexResult<PathBuf> {
        validate_id(id)?;
        let held = self.inner.acquire(id).await?;
        if self.is_armed(id).await {
            debug!(id = %id, "already mounted");
            return Ok(held.mountpoint);
        }

        tokio::fs::create_dir_all(&held.mountpoint).await?;
        self.inner.load(id, &held.mountpoint, &held.guard).await?;

        {
            let mut map = self.inner.volumes.write().await;
            let entry = map
                .get_mut(id)
                .ok_or_else(|| PlexError::NotFound(id.to_string()))?;
            entry.volume.mounted = true;
            entry.task = Some(scheduler::spawn(
                Arc::downgrade(&self.inner),
                id.to_string(),
                held.lock.clone(),
                self.inner.opts.sync_interval,
            ));
        }
        self.inner.persist().await;

        info!(id = %id, mountpoint = %held.mountpoint.display(), "volume mounted");
        Ok(held.mountpoint)
    }

    /// Stop the sync task, then push one final archive.
    ///
    /// The volume ends up unmounted even when the final save fails; that
    /// failure is returned. Unmounting an unmounted volume does nothing.
    pub async fn unmount(&self, id: &str) -> PlexResult<()> {
        validate_id(id)?;
        let held = self.inner.acquire(id).await?;
        let Some(task) = self.inner.take_task(id).await else {
            debug!(id = %id, "not mounted, nothing to do");
            return Ok(());
        };
        task.stop(id).await;

        let result = self.inner.save(id, &held.mountpoint, &held.guard).await;
        {
            let mut map = self.inner.volumes.write().await;
            if let Some(e) = map.get_mut(id) {
                e.volume.mounted = false;
            }
        }
        self.inner.persist().await;

        match &result {
            Ok(()) => info!(id = %id, "volume unmounted"),
            Err(e) => error!(id = %id, "final sync failed, local data not stored: {e}"),
        }
        result
    }

    /// Delete the mountpoint and forget the volume. Never syncs.
    pub async fn remove(&self, id: &str) -> PlexResult<()> {
        validate_id(id)?;
        let held = self.inner.acquire(id).await?;

        if self.is_armed(id).await {
            match self.inner.opts.remove_policy {
                RemovePolicy::Refuse => return Err(PlexError::Mounted(id.to_string())),
                RemovePolicy::Discard => {
                    warn!(id = %id, "removing a mounted volume, changes since the last sync are lost");
                    if let Some(task) = self.inner.take_task(id).await {
                        task.stop(id).await;
                    }
                    let mut map = self.inner.volumes.write().await;
                    if let Some(e) = map.get_mut(id) {
                        e.volume.mounted = false;
                    }
                }
            }
        }

        let dir = held.mountpoint.clone();
        match blocking(move || Ok(plexvol_archive::remove_tree(&dir)?)).await {
            Ok(()) => {}
            Err(e) if e.is_not_found() => {
                debug!(id = %id, "mountpoint already gone");
            }
            Err(e) => {
                self.inner.persist().await;
                return Err(e);
            }
        }

        self.inner.volumes.write().await.remove(id);
        self.inner.persist().await;
        info!(id = %id, "volume removed");
        Ok(())
    }

    /// Save `id` now if it is mounted. Returns whether a save ran.
    pub async fn sync(&self, id: &str) -> PlexResult<bool> {
        validate_id(id)?;
        let held = self.inner.acquire(id).await?;
        if !self.is_armed(id).await {
            debug!(id = %id, "not mounted, skipping sync");
            return Ok(false);
        }
        self.inner.save(id, &held.mountpoint, &held.guard).await?;
        self.inner.persist().await;
        Ok(true)
    }

    pub async fn path(&self, id: &str) -> PlexResult<PathBuf> {
        self.get(id).await.map(|v| v.mountpoint)
    }

    pub async fn get(&self, id: &str) -> PlexResult<Volume> {
        let map = self.inner.volumes.read().await;
        map.get(id)
            .map(|e| e.volume.clone())
            .ok_or_else(|| PlexError::NotFound(id.to_string()))
    }

    /// `{Name, Mountpoint}` for one volume.
    pub async fn describe(&self, id: &str) -> PlexResult<VolumeSummary> {
        self.get(id).await.map(|v| v.summary())
    }

    /// `{Volumes: [{Name, Mountpoint}]}`, sorted by name.
    pub async fn list_response(&self) -> ListResponse {
        ListResponse {
            volumes: self.list().await.iter().map(Volume::summary).collect(),
        }
    }

    /// Every known volume, sorted by id.
    pub async fn list(&self) -> Vec<Volume> {
        let map = self.inner.volumes.read().await;
        let mut volumes: Vec<Volume> = map.values().map(|e| e.volume.clone()).collect();
        volumes.sort_by(|a, b| a.id.cmp(&b.id));
        volumes
    }

    pub fn capabilities(&self) -> CapabilitiesResponse {
        CapabilitiesResponse {
            capabilities: Capability {
                scope: Scope::Local,
            },
        }
    }

    /// Stop every sync task and push a final archive for each mounted
    /// volume. Volumes stay marked mounted so the next `open` re-arms them.
    pub async fn shutdown(&self) {
        let ids: Vec<String> = {
            let map = self.inner.volumes.read().await;
            map.iter()
                .filter(|(_, e)| e.task.is_some())
                .map(|(id, _)| id.clone())
                .collect()
        };

        let mut failed = 0usize;
        for id in &ids {
            let Ok(held) = self.inner.acquire(id).await else {
                continue;
            };
            let Some(task) = self.inner.take_task(id).await else {
                continue;
            };
            task.stop(id).await;
            if let Err(e) = self.inner.save(id, &held.mountpoint, &held.guard).await {
                error!(id = %id, "final sync on shutdown failed: {e}");
                failed += 1;
            }
        }

        self.inner.persist().await;
        info!(volumes = ids.len(), failed, "registry shut down");
    }

    async fn is_armed(&self, id: &str) -> bool {
        let map = self.inner.volumes.read().await;
        map.get(id).is_some_and(|e| e.task.is_some())
    }
}
