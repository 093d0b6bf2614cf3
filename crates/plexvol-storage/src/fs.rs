//! Local-directory object store: one `<root>/<id><suffix>` file per volume

use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use plexvol_core::{validate_id, PlexError, PlexResult};
use tokio::fs::File;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::debug;

use crate::backend::Backend;

pub const DEFAULT_SUFFIX: &str = ".tar.zst";

static TMP_SEQ: AtomicU64 = AtomicU64::new(0);

#[derive(Debug, Clone)]
pub struct FsBackend {
    root: PathBuf,
    suffix: String,
}

impl FsBackend {
    pub fn new(root: &Path) -> PlexResult<Self> {
        Self::with_suffix(root, DEFAULT_SUFFIX)
    }

    /// Creates `root` if needed.
    pub fn with_suffix(root: &Path, suffix: &str) -> PlexResult<Self> {
        std::fs::create_dir_all(root)?;
        Ok(Self {
            root: root.to_path_buf(),
            suffix: suffix.to_string(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn object_path(&self, id: &str) -> PathBuf {
        self.root.join(format!("{id}{}", self.suffix))
    }

    /// Store exactly `expected` bytes when given, failing if `src` ends early.
    ///
    /// Data goes to a unique temp file first and is renamed over the object
    /// only once complete, so readers never observe a partial archive.
    pub async fn store_exact(
        &self,
        id: &str,
        src: &mut (dyn AsyncRead + Send + Unpin),
        expected: Option<u64>,
    ) -> PlexResult<u64> {
        validate_id(id)?;
        let target = self.object_path(id);
        let tmp = self.root.join(format!(
            ".{id}{}.{}.{}.tmp",
            self.suffix,
            std::process::id(),
            TMP_SEQ.fetch_add(1, Ordering::Relaxed)
        ));

        let result = write_file(&tmp, src, expected).await;
        let written = match result {
            Ok(n) => n,
            Err(e) => {
                let _ = tokio::fs::remove_file(&tmp).await;
                return Err(e);
            }
        };

        if let Err(e) = tokio::fs::rename(&tmp, &target).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e.into());
        }
        debug!(id = %id, bytes = written, path = %target.display(), "object stored");
        Ok(written)
    }

    /// Open the object for `id` along with its length.
    pub async fn open(&self, id: &str) -> PlexResult<(File, u64)> {
        validate_id(id)?;
        let file = File::open(self.object_path(id))
            .await
            .map_err(|e| not_found_as(e, id))?;
        let len = file.metadata().await?.len();
        Ok((file, len))
    }

    /// BLAKE3 hex digest of the stored object.
    pub async fn checksum(&self, id: &str) -> PlexResult<String> {
        let (mut file, _) = self.open(id).await?;
        let mut hasher = blake3::Hasher::new();
        let mut buf = vec![0u8; 64 * 1024];
        loop {
            let n = file.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
        }
        Ok(hasher.finalize().to_hex().to_string())
    }

}

#[async_trait]
impl Backend for FsBackend {
    fn name(&self) -> &'static str {
        "fs"
    }

    async fn store(&self, id: &str, src: &mut (dyn AsyncRead + Send + Unpin)) -> PlexResult<u64> {
        self.store_exact(id, src, None).await
    }

    async fn retrieve(
        &self,
        id: &str,
        dst: &mut (dyn AsyncWrite + Send + Unpin),
    ) -> PlexResult<u64> {
        let (mut file, _) = self.open(id).await?;
        let n = tokio::io::copy(&mut file, dst).await?;
        dst.flush().await?;
        Ok(n)
    }
}

async fn write_file(
    path: &Path,
    src: &mut (dyn AsyncRead + Send + Unpin),
    expected: Option<u64>,
) -> PlexResult<u64> {
    let mut file = File::create(path).await?;
    let written = match expected {
        Some(size) => tokio::io::copy(&mut src.take(size), &mut file).await?,
        None => tokio::io::copy(src, &mut file).await?,
    };
    if let Some(size) = expected {
        if written != size {
            return Err(PlexError::Protocol(format!(
                "payload truncated: expected {size} bytes, got {written}"
            )));
        }
    }
    file.sync_all().await?;
    Ok(written)
}

fn not_found_as(e: io::Error, id: &str) -> PlexError {
    if e.kind() == io::ErrorKind::NotFound {
        PlexError::NotFound(id.to_string())
    } else {
        PlexError::Io(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn store_then_retrieve() {
        let tmp = tempfile::TempDir::new().unwrap();
        let fs = FsBackend::new(tmp.path()).unwrap();

        let n = fs.store("mc-1", &mut &b"archive bytes"[..]).await.unwrap();
        assert_eq!(n, 13);
        assert!(tmp.path().join("mc-1.tar.zst").exists());

        let mut out = Vec::new();
        fs.retrieve("mc-1", &mut out).await.unwrap();
        assert_eq!(out, b"archive bytes");
    }

    #[tokio::test]
    async fn store_overwrites_existing_object() {
        let tmp = tempfile::TempDir::new().unwrap();
        let fs = FsBackend::new(tmp.path()).unwrap();

        fs.store("mc-1", &mut &b"first version, longer"[..]).await.unwrap();
        fs.store("mc-1", &mut &b"second"[..]).await.unwrap();

        let mut out = Vec::new();
        fs.retrieve("mc-1", &mut out).await.unwrap();
        assert_eq!(out, b"second");
    }

    #[tokio::test]
    async fn retrieve_missing_is_not_found() {
        let tmp = tempfile::TempDir::new().unwrap();
        let fs = FsBackend::new(tmp.path()).unwrap();

        let mut out = Vec::new();
        let err = fs.retrieve("never-stored", &mut out).await.unwrap_err();
        assert!(matches!(err, PlexError::NotFound(ref id) if id == "never-stored"));
    }

    #[tokio::test]
    async fn short_payload_is_rejected_and_old_object_kept() {
        let tmp = tempfile::TempDir::new().unwrap();
        let fs = FsBackend::with_suffix(tmp.path(), ".plex").unwrap();
        fs.store("mc-1", &mut &b"good"[..]).await.unwrap();

        let err = fs
            .store_exact("mc-1", &mut &b"abc"[..], Some(10))
            .await
            .unwrap_err();
        assert!(matches!(err, PlexError::Protocol(_)));

        let mut out = Vec::new();
        fs.retrieve("mc-1", &mut out).await.unwrap();
        assert_eq!(out, b"good");
        // temp file cleaned up
        assert_eq!(std::fs::read_dir(tmp.path()).unwrap().count(), 1);
    }

    #[tokio::test]
    async fn invalid_id_never_touches_disk() {
        let tmp = tempfile::TempDir::new().unwrap();
        let fs = FsBackend::new(tmp.path()).unwrap();
        let err = fs.store("../escape", &mut &b"x"[..]).await.unwrap_err();
        assert!(matches!(err, PlexError::InvalidId(_)));
    }

    #[tokio::test]
    async fn checksum_matches_blake3_of_content() {
        let tmp = tempfile::TempDir::new().unwrap();
        let fs = FsBackend::new(tmp.path()).unwrap();
        fs.store("mc-1", &mut &b"hash me"[..]).await.unwrap();

        let sum = fs.checksum("mc-1").await.unwrap();
        assert_eq!(sum, blake3::hash(b"hash me").to_hex().to_string());
    }
}
