//! Sync counters exported through the daemon's `/metrics` endpoint

use prometheus_client::metrics::{counter::Counter, family::Family, gauge::Gauge};
use prometheus_client::registry::Registry;

/// Result of one save-to-store attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    Ok,
    Failed,
    /// Backend answered `RecentlyCached`
    Cached,
}

impl SyncOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            SyncOutcome::Ok => "ok",
            SyncOutcome::Failed => "failed",
            SyncOutcome::Cached => "cached",
        }
    }
}

/// Cheap to clone; clones share the underlying counters.
#[derive(Clone, Default)]
pub struct DriverMetrics {
    syncs: Family<Vec<(String, String)>, Counter>,
    mounted: Gauge,
}

impl DriverMetrics {
    pub fn new(registry: &mut Registry) -> Self {
        let metrics = Self::default();
        registry.register(
            "plexvol_syncs",
            "Save-to-store attempts by outcome",
            metrics.syncs.clone(),
        );
        registry.register(
            "plexvol_mounted_volumes",
            "Volumes with a live sync task",
            metrics.mounted.clone(),
        );
        metrics
    }

    pub fn record_sync(&self, outcome: SyncOutcome) {
        self.syncs.get_or_create(&Self::labels(outcome)).inc();
    }

    pub fn syncs(&self, outcome: SyncOutcome) -> u64 {
        self.syncs.get_or_create(&Self::labels(outcome)).get()
    }

    pub fn set_mounted(&self, n: usize) {
        self.mounted.set(n as i64);
    }

    pub fn mounted(&self) -> i64 {
        self.mounted.get()
    }

    fn labels(outcome: SyncOutcome) -> Vec<(String, String)> {
        vec![("outcome".to_string(), outcome.as_str().to_string())]
    }
}
