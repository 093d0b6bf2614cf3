//! One periodic save-to-store task per mounted volume.
//!
//! The task only ever saves while holding the volume's sync lock, and both
//! the tick and the lock acquisition race against cancellation with
//! cancellation checked first. Unmount takes the sync lock before it
//! cancels, so once Unmount has started no periodic save can begin.

use std::sync::{Arc, Weak};
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::registry::Inner;

/// Handle to a running sync task, owned by the volume's registry entry.
pub(crate) struct SyncTask {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl SyncTask {
    /// Cancel and wait until the task has exited.
    pub(crate) async fn stop(self, id: &str) {
        self.cancel.cancel();
        if let Err(e) = self.handle.await {
            if e.is_panic() {
                error!(id = %id, "sync task panicked: {e}");
            }
        }
    }
}

pub(crate) fn spawn(
    registry: Weak<Inner>,
    id: String,
    sync_lock: Arc<Mutex<()>>,
    every: Duration,
) -> SyncTask {
    let cancel = CancellationToken::new();
    let handle = tokio::spawn(run(registry, id, sync_lock, every, cancel.clone()));
    SyncTask { cancel, handle }
}

async fn run(
    registry: Weak<Inner>,
    id: String,
    sync_lock: Arc<Mutex<()>>,
    every: Duration,
    cancel: CancellationToken,
) {
    // first save one full interval after arming
    let mut ticker = interval_at(Instant::now() + every, every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    debug!(id = %id, every = ?every, "sync task armed");

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let guard = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            guard = sync_lock.clone().lock_owned() => guard,
        };

        let Some(inner) = registry.upgrade() else {
            break;
        };
        let Some(mountpoint) = inner.mountpoint_of(&id).await else {
            info!(id = %id, "volume no longer registered, sync task exiting");
            break;
        };

        match inner.save(&id, &mountpoint, &guard).await {
            Ok(()) => inner.persist().await,
            // retried on the next tick
            Err(e) => warn!(id = %id, "periodic sync failed: {e}"),
        }
    }

    debug!(id = %id, "sync task stopped");
}
