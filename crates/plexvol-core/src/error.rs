use std::time::Duration;

use thiserror::Error;

pub type PlexResult<T> = Result<T, PlexError>;

/// Error kinds surfaced to the lifecycle caller.
///
/// Backends translate their transport failures into these variants so the
/// registry behaves the same whichever store is configured.
#[derive(Debug, Error)]
pub enum PlexError {
    #[error("not found: {0}")]
    NotFound(String),

    /// Debounce short-circuit: the id was transferred moments ago.
    #[error("recently cached: {0}")]
    RecentlyCached(String),

    #[error("remote error (status {status}): {body}")]
    Remote { status: u16, body: String },

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("unsupported archive entry type {kind} at {path}")]
    UnsupportedEntryType { path: String, kind: String },

    #[error("invalid volume id {0:?}")]
    InvalidId(String),

    #[error("volume {0} is mounted")]
    Mounted(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl PlexError {
    pub fn is_not_found(&self) -> bool {
        match self {
            PlexError::NotFound(_) => true,
            PlexError::Io(e) => e.kind() == std::io::ErrorKind::NotFound,
            _ => false,
        }
    }

    /// True for outcomes that mean "nothing to transfer" rather than failure.
    pub fn is_benign_miss(&self) -> bool {
        self.is_not_found() || matches!(self, PlexError::RecentlyCached(_))
    }
}
