//! Object server: the remote end of the HTTP and TCP backends.
//!
//! Both protocols persist through an [`FsBackend`] rooted at the server's
//! data directory, so uploads are written to a temp file and atomically
//! renamed over any previous object for the same id.

pub mod http;
pub mod tcp;

use std::path::Path;
use std::sync::Arc;

use plexvol_core::PlexResult;

use crate::fs::FsBackend;

/// Suffix of objects kept by the server
pub const OBJECT_SUFFIX: &str = ".plex";

pub type SharedStore = Arc<FsBackend>;

pub fn open_store(data_dir: &Path) -> PlexResult<SharedStore> {
    Ok(Arc::new(FsBackend::with_suffix(data_dir, OBJECT_SUFFIX)?))
}
