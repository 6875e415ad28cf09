//! Atomic installer.
//!
//! All incoming content is materialized into a freshly created scratch
//! directory first — the target is never observed half-written. Only then
//! are matching target entries cleared and the scratch contents copied
//! over, permissions preserved, with a durable flush before returning.
//!
//! The clear-then-copy step is not transactional: a failure mid-copy can
//! leave the target partially cleared. The next successful cycle repairs
//! it, because an empty or changed target forces a reinstall.

use std::io::Read;
use std::path::{Component, Path, PathBuf};

use flate2::read::GzDecoder;
use tar::{Archive, EntryType};
use tempfile::TempDir;
use tokio::sync::mpsc;
use tokio_util::io::SyncIoBridge;
use walkdir::WalkDir;

use depot_store::{ObjectReader, PrefixEntry, StoreError};

use crate::error::{io_err, SyncError};

/// A directory tree staged in scratch, ready to be swapped into a target.
pub struct StagedTree {
    scratch: TempDir,
}

/// True when `dir` contains no entries at all.
pub fn is_empty_dir(dir: &Path) -> Result<bool, SyncError> {
    let mut entries = std::fs::read_dir(dir).map_err(|e| io_err(dir, e))?;
    Ok(entries.next().is_none())
}

// ---------------------------------------------------------------------------
// Archive mode
// ---------------------------------------------------------------------------

/// Decode a gzip-compressed tar stream into scratch, then replace matching
/// `target` entries with the result.
pub async fn install_archive(
    name: &str,
    body: ObjectReader,
    target: &Path,
    replace_prefix: &str,
) -> Result<(), SyncError> {
    let scratch = scratch_dir(name)?;
    let result = async {
        stage_archive(scratch.path(), body).await?;
        swap_into_target(scratch.path(), target, replace_prefix).await
    }
    .await;
    cleanup_scratch(scratch);
    result
}

/// Run the blocking tar decode on a dedicated thread, bridged from the
/// async byte stream.
async fn stage_archive(scratch: &Path, body: ObjectReader) -> Result<(), SyncError> {
    let dest = scratch.to_path_buf();
    let reader = SyncIoBridge::new(body);
    tokio::task::spawn_blocking(move || extract_tar_gz(reader, &dest))
        .await
        .map_err(|e| SyncError::Join(e.to_string()))?
}

/// Decode entry by entry. Only regular files and directories are
/// supported; any other entry type fails hard.
fn extract_tar_gz(reader: impl Read, dest: &Path) -> Result<(), SyncError> {
    let mut archive = Archive::new(GzDecoder::new(reader));
    for entry in archive.entries().map_err(SyncError::Archive)? {
        let mut entry = entry.map_err(SyncError::Archive)?;
        let raw = entry.path().map_err(SyncError::Archive)?.into_owned();
        let out = dest.join(safe_relative(&raw)?);

        match entry.header().entry_type() {
            EntryType::Directory => {
                std::fs::create_dir_all(&out).map_err(|e| io_err(&out, e))?;
            }
            EntryType::Regular => {
                if let Some(parent) = out.parent() {
                    std::fs::create_dir_all(parent).map_err(|e| io_err(parent, e))?;
                }
                let mut file = std::fs::File::create(&out).map_err(|e| io_err(&out, e))?;
                std::io::copy(&mut entry, &mut file).map_err(|e| io_err(&out, e))?;
            }
            other => {
                tracing::debug!(path = %raw.display(), entry_type = ?other, "rejecting archive entry");
                return Err(SyncError::UnsupportedEntry { path: raw });
            }
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Directory mode
// ---------------------------------------------------------------------------

/// Write each fetched `(relative key, body)` pair into scratch at that
/// relative path. The caller swaps the result in with [`install_staged`].
pub async fn stage_tree(
    name: &str,
    mut entries: mpsc::Receiver<Result<PrefixEntry, StoreError>>,
) -> Result<StagedTree, SyncError> {
    let scratch = scratch_dir(name)?;
    while let Some(entry) = entries.recv().await {
        let mut entry = entry?;
        let out = scratch.path().join(safe_relative(Path::new(&entry.relative_key))?);
        if let Some(parent) = out.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| io_err(parent, e))?;
        }
        let mut file = tokio::fs::File::create(&out)
            .await
            .map_err(|e| io_err(&out, e))?;
        tokio::io::copy(&mut entry.body, &mut file)
            .await
            .map_err(|e| io_err(&out, e))?;
    }
    Ok(StagedTree { scratch })
}

/// Replace matching `target` entries with a staged tree.
pub async fn install_staged(
    staged: StagedTree,
    target: &Path,
    replace_prefix: &str,
) -> Result<(), SyncError> {
    let result = swap_into_target(staged.scratch.path(), target, replace_prefix).await;
    cleanup_scratch(staged.scratch);
    result
}

// ---------------------------------------------------------------------------
// Shared steps
// ---------------------------------------------------------------------------

fn scratch_dir(name: &str) -> Result<TempDir, SyncError> {
    tempfile::Builder::new()
        .prefix(&format!("depot-{name}-"))
        .tempdir()
        .map_err(|e| io_err(std::env::temp_dir(), e))
}

fn cleanup_scratch(scratch: TempDir) {
    let path = scratch.path().to_path_buf();
    if let Err(err) = scratch.close() {
        tracing::debug!(dir = %path.display(), error = %err, "failed best effort scratch cleanup");
    }
}

/// Clear matching target entries, copy everything from scratch over, and
/// flush durably.
async fn swap_into_target(
    scratch: &Path,
    target: &Path,
    replace_prefix: &str,
) -> Result<(), SyncError> {
    let scratch = scratch.to_path_buf();
    let target = target.to_path_buf();
    let prefix = replace_prefix.to_string();
    tokio::task::spawn_blocking(move || {
        clear_matching(&target, &prefix)?;
        copy_tree(&scratch, &target)?;
        std::fs::File::open(&target)
            .and_then(|dir| dir.sync_all())
            .map_err(|e| io_err(&target, e))
    })
    .await
    .map_err(|e| SyncError::Join(e.to_string()))?
}

/// Remove every entry of `dir` whose name starts with `prefix`; an empty
/// prefix removes everything. Byte-prefix match, not a glob.
fn clear_matching(dir: &Path, prefix: &str) -> Result<(), SyncError> {
    for entry in std::fs::read_dir(dir).map_err(|e| io_err(dir, e))? {
        let entry = entry.map_err(|e| io_err(dir, e))?;
        if !prefix.is_empty() && !name_has_prefix(&entry.file_name(), prefix) {
            continue;
        }
        let path = entry.path();
        let file_type = entry.file_type().map_err(|e| io_err(&path, e))?;
        if file_type.is_dir() {
            std::fs::remove_dir_all(&path).map_err(|e| io_err(&path, e))?;
        } else {
            std::fs::remove_file(&path).map_err(|e| io_err(&path, e))?;
        }
    }
    Ok(())
}

#[cfg(unix)]
fn name_has_prefix(name: &std::ffi::OsStr, prefix: &str) -> bool {
    use std::os::unix::ffi::OsStrExt;
    name.as_bytes().starts_with(prefix.as_bytes())
}

#[cfg(not(unix))]
fn name_has_prefix(name: &std::ffi::OsStr, prefix: &str) -> bool {
    name.to_string_lossy().starts_with(prefix)
}

/// Copy every scratch entry into the target, preserving permissions, and
/// fsync each copied file.
fn copy_tree(src: &Path, dst: &Path) -> Result<(), SyncError> {
    for entry in WalkDir::new(src).min_depth(1) {
        let entry = entry.map_err(|e| SyncError::Io {
            path: src.to_path_buf(),
            source: e.into(),
        })?;
        let rel = entry.path().strip_prefix(src).unwrap_or(entry.path());
        let out = dst.join(rel);
        if entry.file_type().is_dir() {
            std::fs::create_dir_all(&out).map_err(|e| io_err(&out, e))?;
        } else {
            std::fs::copy(entry.path(), &out).map_err(|e| io_err(&out, e))?;
            std::fs::File::open(&out)
                .and_then(|file| file.sync_all())
                .map_err(|e| io_err(&out, e))?;
        }
    }
    Ok(())
}

/// Reject entry paths that would land outside the staging root.
fn safe_relative(path: &Path) -> Result<PathBuf, SyncError> {
    let mut clean = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Normal(part) => clean.push(part),
            Component::CurDir => {}
            _ => {
                return Err(SyncError::UnsafePath {
                    path: path.to_path_buf(),
                })
            }
        }
    }
    if clean.as_os_str().is_empty() {
        return Err(SyncError::UnsafePath {
            path: path.to_path_buf(),
        });
    }
    Ok(clean)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
