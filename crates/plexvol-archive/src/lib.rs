//! plexvol-archive: directory tree <-> single compressed byte stream
//!
//! Stream layout: tar records (GNU headers, relative forward-slash paths,
//! mode bits, directory or regular-file type) wrapped in one zstd frame.
//! Both ends of every storage backend exchange exactly this format.

pub mod codec;
pub mod exclude;

pub use codec::{compress, compress_to_vec, decompress, decompress_slice, remove_tree};
pub use exclude::ExcludePolicy;

/// Settings shared by compress calls
#[derive(Debug, Clone)]
pub struct ArchiveOptions {
    pub compression_level: i32,
    pub exclude: ExcludePolicy,
}

impl Default for ArchiveOptions {
    fn default() -> Self {
        Self::from_config(&plexvol_core::config::ArchiveConfig::default())
    }
}

impl ArchiveOptions {
    pub fn from_config(cfg: &plexvol_core::config::ArchiveConfig) -> Self {
        Self {
            compression_level: cfg.compression_level,
            exclude: ExcludePolicy::new(cfg.exclude.iter().cloned()),
        }
    }
}
