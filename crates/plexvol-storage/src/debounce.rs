//! Per-id debounce window for remote transfers.
//!
//! The orchestrator tends to fire Mount, Unmount, Mount within a second or
//! two. Recording each completed transfer lets the backend answer the repeat
//! with `RecentlyCached` instead of moving the whole archive again. This
//! trades a bounded staleness window for traffic; a change written inside the
//! window is not pushed until the next transfer after it expires.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use plexvol_core::{PlexError, PlexResult};

/// Time source, swappable in tests.
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<Instant>,
}

impl Default for ManualClock {
    fn default() -> Self {
        Self {
            now: Mutex::new(Instant::now()),
        }
    }
}

impl ManualClock {
    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *now += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        *self.now.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Thread-safe map of id -> last transfer time.
pub struct RecentWindow {
    window: Duration,
    clock: Arc<dyn Clock>,
    seen: Mutex<HashMap<String, Instant>>,
}

impl RecentWindow {
    pub fn new(window: Duration) -> Self {
        Self::with_clock(window, Arc::new(SystemClock))
    }

    pub fn with_clock(window: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            window,
            clock,
            seen: Mutex::new(HashMap::new()),
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// True if `id` was transferred less than `window` ago.
    pub fn is_recent(&self, id: &str) -> bool {
        if self.window.is_zero() {
            return false;
        }
        let now = self.clock.now();
        let seen = self.seen.lock().unwrap_or_else(|e| e.into_inner());
        seen.get(id)
            .map(|at| now.saturating_duration_since(*at) < self.window)
            .unwrap_or(false)
    }

    /// `Err(RecentlyCached)` if the call for `id` should be skipped.
    pub fn check(&self, id: &str) -> PlexResult<()> {
        if self.is_recent(id) {
            tracing::warn!(id = %id, window = ?self.window, "transfer debounced");
            return Err(PlexError::RecentlyCached(id.to_string()));
        }
        Ok(())
    }

    /// Mark a completed transfer. Expired entries are dropped on the way.
    pub fn record(&self, id: &str) {
        if self.window.is_zero() {
            return;
        }
        let now = self.clock.now();
        let mut seen = self.seen.lock().unwrap_or_else(|e| e.into_inner());
        seen.retain(|_, at| now.saturating_duration_since(*at) < self.window);
        seen.insert(id.to_string(), now);
    }

    pub fn forget(&self, id: &str) {
        let mut seen = self.seen.lock().unwrap_or_else(|e| e.into_inner());
        seen.remove(id);
    }
}
