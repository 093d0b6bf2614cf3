//! Compress and restore directory trees.
//!
//! Writer chain: walk -> tar::Builder -> zstd Encoder -> dst
//! Reader chain: src -> zstd Decoder -> tar::Archive -> files under dst

use std::fs::{self, OpenOptions, Permissions};
use std::io::{self, Read, Write};
use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};
use std::path::{Component, Path, PathBuf};

use plexvol_core::{PlexError, PlexResult};
use tar::{Builder, EntryType, Header};
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::ArchiveOptions;

const MODE_MASK: u32 = 0o7777;
const OWNER_RWX: u32 = 0o700;

/// Archive every directory and regular file below `src` into `dst`.
///
/// Entries are written in file-name order; the root itself is not recorded.
/// The first I/O error aborts the whole archive. Returns the inner writer
/// once the tar trailer and the zstd frame are flushed.
pub fn compress<W: Write>(src: &Path, dst: W, opts: &ArchiveOptions) -> PlexResult<W> {
    let encoder = zstd::stream::write::Encoder::new(dst, opts.compression_level)?;
    let mut builder = Builder::new(encoder);
    builder.follow_symlinks(false);

    let walker = WalkDir::new(src)
        .min_depth(1)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| match e.path().strip_prefix(src) {
            Ok(rel) => !opts.exclude.is_excluded(&slash_path(rel)),
            Err(_) => true,
        });

    let mut records = 0usize;
    for entry in walker {
        let entry = entry.map_err(io::Error::from)?;
        let rel = entry
            .path()
            .strip_prefix(src)
            .map_err(|e| PlexError::Other(e.into()))?;
        let meta = entry.metadata().map_err(io::Error::from)?;

        let mut header = Header::new_gnu();
        header.set_metadata(&meta);

        if meta.is_dir() {
            header.set_entry_type(EntryType::Directory);
            header.set_size(0);
            builder.append_data(&mut header, rel, io::empty())?;
        } else if meta.is_file() {
            let file = fs::File::open(entry.path())?;
            let len = file.metadata()?.len();
            header.set_entry_type(EntryType::Regular);
            header.set_size(len);
            builder.append_data(&mut header, rel, exact_len(file, len))?;
        } else {
            warn!(path = %entry.path().display(), "skipping entry that is neither file nor directory");
            continue;
        }
        records += 1;
    }

    let encoder = builder.into_inner()?;
    let dst = encoder.finish()?;
    debug!(src = %src.display(), records, "archive written");
    Ok(dst)
}

/// Yield exactly `len` bytes of `file`: a file that grew is cut off and one
/// that shrank is zero-filled, so the record always matches its header.
fn exact_len(file: fs::File, len: u64) -> impl Read {
    file.take(len).chain(io::repeat(0)).take(len)
}

/// `compress` into a fresh buffer.
pub fn compress_to_vec(src: &Path, opts: &ArchiveOptions) -> PlexResult<Vec<u8>> {
    compress(src, Vec::with_capacity(1024 * 1024), opts)
}

/// Replace the contents of `dst` with the tree stored in `src`.
///
/// The destination is cleared only after the first record decodes, so a
/// stream in the wrong format leaves existing data alone. Any failure after
/// that point leaves a partially restored tree.
///
/// Directories stay owner-writable until every record is written; their
/// recorded modes are applied last, deepest first.
pub fn decompress<R: Read>(src: R, dst: &Path) -> PlexResult<()> {
    let decoder = zstd::stream::read::Decoder::new(src)?;
    let mut archive = tar::Archive::new(decoder);
    let mut entries = archive.entries()?;

    let first = entries.next().transpose()?;
    clear_dir(dst)?;

    let mut records = 0usize;
    let mut dir_modes: Vec<(PathBuf, u32)> = Vec::new();
    for entry in first.into_iter().map(Ok::<_, io::Error>).chain(entries) {
        let mut entry = entry?;
        let rel = entry.path()?.into_owned();
        let target = entry_target(dst, &rel)?;
        let mode = entry.header().mode()? & MODE_MASK;
        let kind = entry.header().entry_type();

        if kind.is_dir() {
            fs::create_dir_all(&target)?;
            fs::set_permissions(&target, Permissions::from_mode(mode | OWNER_RWX))?;
            dir_modes.push((target, mode));
        } else if kind.is_file() {
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)?;
            }
            let mut file = OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(true)
                .mode(mode)
                .open(&target)?;
            io::copy(&mut entry, &mut file)?;
            // open() applies the umask
            fs::set_permissions(&target, Permissions::from_mode(mode))?;
        } else {
            return Err(PlexError::UnsupportedEntryType {
                path: rel.display().to_string(),
                kind: format!("{kind:?}"),
            });
        }
        records += 1;
    }

    for (dir, mode) in dir_modes.into_iter().rev() {
        fs::set_permissions(&dir, Permissions::from_mode(mode))?;
    }

    debug!(dst = %dst.display(), records, "archive restored");
    Ok(())
}

pub fn decompress_slice(src: &[u8], dst: &Path) -> PlexResult<()> {
    decompress(src, dst)
}

/// Remove everything inside `dir`, creating it if missing.
fn clear_dir(dir: &Path) -> io::Result<()> {
    match fs::read_dir(dir) {
        Ok(children) => {
            for child in children {
                let path = child?.path();
                if fs::symlink_metadata(&path)?.is_dir() {
                    remove_tree(&path)?;
                } else {
                    fs::remove_file(&path)?;
                }
            }
            Ok(())
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => fs::create_dir_all(dir),
        Err(e) => Err(e),
    }
}

/// Delete `dir` and everything below it, read-only directories included.
pub fn remove_tree(dir: &Path) -> io::Result<()> {
    make_removable(dir)?;
    fs::remove_dir_all(dir)
}

/// Give the owner rwx on every directory below `dir` so its entries can be
/// unlinked.
fn make_removable(dir: &Path) -> io::Result<()> {
    let mode = fs::symlink_metadata(dir)?.permissions().mode();
    if mode & OWNER_RWX != OWNER_RWX {
        fs::set_permissions(dir, Permissions::from_mode(mode | OWNER_RWX))?;
    }
    for child in fs::read_dir(dir)? {
        let child = child?;
        if child.file_type()?.is_dir() {
            make_removable(&child.path())?;
        }
    }
    Ok(())
}

/// Join a record path onto `dst`, refusing anything that climbs out of it.
fn entry_target(dst: &Path, rel: &Path) -> PlexResult<PathBuf> {
    let mut target = dst.to_path_buf();
    for component in rel.components() {
        match component {
            Component::Normal(part) => target.push(part),
            Component::CurDir => {}
            _ => {
                return Err(PlexError::Protocol(format!(
                    "archive entry escapes destination: {}",
                    rel.display()
                )))
            }
        }
    }
    Ok(target)
}

fn slash_path(rel: &Path) -> String {
    rel.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}
