//! plexvol-driver: volume registry with one background sync task per mounted volume
//!
//! Mount pulls the stored archive into `root/<id>` and arms a periodic
//! save-to-store; Unmount stops it and pushes a final archive. The set of
//! volumes survives restarts through `root/volumes.json`.

pub mod metrics;
pub mod registry;
mod scheduler;
pub mod snapshot;

pub use metrics::{DriverMetrics, SyncOutcome};
pub use registry::{Registry, RegistryOptions};
