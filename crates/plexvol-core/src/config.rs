use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{PlexError, PlexResult};

/// Top-level configuration (loaded from config.toml)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PlexConfig {
    pub daemon: DaemonConfig,
    pub driver: DriverConfig,
    pub archive: ArchiveConfig,
    pub storage: StorageConfig,
    pub server: ServerConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    /// Log level (default: info)
    pub log_level: String,
    /// Log format: "json" or "text"
    pub log_format: String,
    /// Prometheus metrics endpoint (default: 127.0.0.1:9100)
    pub metrics_addr: Option<String>,
}

/// What Remove does when the volume is still mounted
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RemovePolicy {
    /// Stop the sync task and delete without a final sync
    #[default]
    Discard,
    /// Fail with `PlexError::Mounted`
    Refuse,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DriverConfig {
    /// Directory holding every mountpoint and volumes.json
    pub root: PathBuf,
    /// Seconds between background syncs of a mounted volume
    pub sync_interval_secs: u64,
    pub remove_policy: RemovePolicy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ArchiveConfig {
    /// zstd compression level
    pub compression_level: i32,
    /// Relative paths (forward slashes) left out of every archive
    pub exclude: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Fs,
    Http,
    Tcp,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub backend: BackendKind,
    /// Object server URL (http://host:port or tcp://host:port)
    pub endpoint: String,
    /// Object directory for the fs backend
    pub fs_root: PathBuf,
    /// HTTP debounce window in seconds (0 disables)
    pub debounce_secs: u64,
    /// Per-call network timeout in seconds
    pub timeout_secs: u64,
    /// Compare the server checksum with the uploaded payload after each PUT
    pub verify_uploads: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServerProtocol {
    Http,
    Tcp,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub protocol: ServerProtocol,
    pub listen: String,
    /// Where the object server keeps `<id>.plex` files
    pub data_dir: PathBuf,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            log_level: "info".into(),
            log_format: "text".into(),
            metrics_addr: Some("127.0.0.1:9100".into()),
        }
    }
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("/live"),
            sync_interval_secs: 120,
            remove_policy: RemovePolicy::Discard,
        }
    }
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            compression_level: 3,
            exclude: vec!["world/session.lock".into()],
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::Http,
            endpoint: "http://127.0.0.1:30000".into(),
            fs_root: PathBuf::from("/var/lib/plexvol/objects"),
            debounce_secs: 10,
            timeout_secs: 300,
            verify_uploads: false,
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            protocol: ServerProtocol::Http,
            listen: "0.0.0.0:30000".into(),
            data_dir: PathBuf::from("/var/lib/plexvol/server"),
        }
    }
}

impl DriverConfig {
    pub fn sync_interval(&self) -> Duration {
        Duration::from_secs(self.sync_interval_secs)
    }
}

impl StorageConfig {
    pub fn debounce(&self) -> Duration {
        Duration::from_secs(self.debounce_secs)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl PlexConfig {
    /// Parse and validate a config file. `None` when it does not exist; the
    /// caller decides whether defaults are acceptable.
    pub fn load(path: &Path) -> PlexResult<Option<Self>> {
        if !path.exists() {
            return Ok(None);
        }
        let content = std::fs::read_to_string(path)?;
        let config: PlexConfig = toml::from_str(&content)
            .map_err(|e| PlexError::Config(format!("parsing {}: {e}", path.display())))?;
        config.validate()?;
        Ok(Some(config))
    }

    pub fn validate(&self) -> PlexResult<()> {
        if self.driver.sync_interval_secs == 0 {
            return Err(PlexError::Config(
                "driver.sync_interval_secs must be greater than zero".into(),
            ));
        }
        if self.storage.backend != BackendKind::Fs && self.storage.endpoint.trim().is_empty() {
            return Err(PlexError::Config(format!(
                "storage.endpoint is required for the {:?} backend",
                self.storage.backend
            )));
        }
        if self.storage.timeout_secs == 0 {
            return Err(PlexError::Config(
                "storage.timeout_secs must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}
