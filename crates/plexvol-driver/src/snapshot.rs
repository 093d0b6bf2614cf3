//! `volumes.json`: the persisted registry, rewritten whole after every mutation.

use anyhow::{Context, Result};
use plexvol_core::types::Volume;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

pub const SNAPSHOT_FILE: &str = "volumes.json";
const SNAPSHOT_TMP: &str = "volumes.json.tmp";
const SNAPSHOT_BAD: &str = "volumes.json.bad";

/// True for names the snapshot occupies inside the registry root.
pub fn is_reserved(id: &str) -> bool {
    matches!(id, SNAPSHOT_FILE | SNAPSHOT_TMP | SNAPSHOT_BAD)
}

/// True when `err` came from a snapshot that exists but does not parse.
pub fn is_corrupt(err: &anyhow::Error) -> bool {
    err.downcast_ref::<serde_json::Error>().is_some()
}

#[derive(Debug, Clone)]
pub struct Snapshot {
    path: PathBuf,
}

impl Snapshot {
    pub fn new(root: &Path) -> Self {
        Self {
            path: root.join(SNAPSHOT_FILE),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the snapshot. A missing file is an empty registry.
    pub fn load(&self) -> Result<BTreeMap<String, Volume>> {
        if !self.path.exists() {
            return Ok(BTreeMap::new());
        }
        let content = std::fs::read_to_string(&self.path)
            .with_context(|| format!("reading registry snapshot: {}", self.path.display()))?;
        if content.trim().is_empty() {
            return Ok(BTreeMap::new());
        }
        serde_json::from_str(&content)
            .with_context(|| format!("parsing registry snapshot: {}", self.path.display()))
    }

    /// Move an unreadable snapshot to `volumes.json.bad`, replacing any
    /// earlier one. Returns the new path.
    pub fn quarantine(&self) -> Result<PathBuf> {
        let bad = self.path.with_file_name(SNAPSHOT_BAD);
        std::fs::rename(&self.path, &bad)
            .with_context(|| format!("moving aside registry snapshot: {}", self.path.display()))?;
        Ok(bad)
    }

    /// Atomic write: temp file then rename over the old snapshot.
    pub async fn store(&self, volumes: &BTreeMap<String, Volume>) -> Result<()> {
        let json = serde_json::to_string_pretty(volumes).context("serializing registry")?;

        let tmp_path = self.path.with_file_name(SNAPSHOT_TMP);
        tokio::fs::write(&tmp_path, json)
            .await
            .with_context(|| format!("writing registry temp: {}", tmp_path.display()))?;
        tokio::fs::rename(&tmp_path, &self.path)
            .await
            .with_context(|| format!("renaming registry snapshot: {}", self.path.display()))?;
        Ok(())
    }
}
