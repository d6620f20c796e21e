//! File system utilities for atomic publishing
//!
//! Every artifact the worker makes visible to other processes (source archives
//! and shared cache entries) goes through [`publish_with`]: content is written
//! to a temporary file in the destination's own directory, synced, and then
//! renamed over the destination. A reader therefore sees either the previous
//! file, the complete new file, or nothing, never a truncated copy. Dropping
//! the operation midway (error, panic, task cancellation) removes the
//! temporary file and publishes nothing.
//!
//! # Examples
//!
//! ```rust,no_run
//! use cachito_worker::utils::fs::{atomic_copy, atomic_write};
//! use std::path::Path;
//!
//! # fn example() -> anyhow::Result<()> {
//! atomic_write(Path::new("/srv/shared/notes.txt"), b"hello")?;
//! atomic_copy(Path::new("/tmp/app.tar.gz"), Path::new("/srv/shared/myapp/app.tar.gz"))?;
//! # Ok(())
//! # }
//! ```

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

/// Mode of published files unless the writer sets its own.
#[cfg(unix)]
pub const PUBLISHED_FILE_MODE: u32 = 0o644;

/// Ensures a directory exists, creating it and all parent directories if necessary.
///
/// Returns an error if the path exists but is not a directory.
pub fn ensure_dir(path: &Path) -> Result<()> {
    if !path.exists() {
        fs::create_dir_all(path)
            .with_context(|| format!("Failed to create directory: {}", path.display()))?;
    } else if !path.is_dir() {
        return Err(anyhow::anyhow!("Path exists but is not a directory: {}", path.display()));
    }
    Ok(())
}

/// Atomically publishes a file produced by `write`.
///
/// The closure receives a temporary file created next to `dest` (same
/// directory, hence same filesystem, so the final rename is atomic). Once it
/// returns `Ok`, the file is synced and renamed over `dest`; an existing file
/// at `dest` is replaced (last writer wins). If the closure fails, nothing is
/// published and the temporary file is removed.
///
/// Parent directories of `dest` are created as needed. On Unix the file is
/// published with [`PUBLISHED_FILE_MODE`]; the closure may change it.
pub fn publish_with<F>(dest: &Path, write: F) -> Result<()>
where
    F: FnOnce(&mut File) -> Result<()>,
{
    let parent = dest
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    ensure_dir(parent)?;

    let file_name = dest.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
    let mut temp = tempfile::Builder::new()
        .prefix(&format!(".{file_name}."))
        .suffix(".tmp")
        .tempfile_in(parent)
        .with_context(|| format!("Failed to create temp file in {}", parent.display()))?;

    // Temp files start out 0600; published entries are read by other users
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        temp.as_file()
            .set_permissions(fs::Permissions::from_mode(PUBLISHED_FILE_MODE))
            .context("Failed to set permissions on temp file")?;
    }

    write(temp.as_file_mut())?;

    temp.as_file_mut().flush().context("Failed to flush temp file")?;
    temp.as_file().sync_all().context("Failed to sync file to disk")?;

    temp.persist(dest)
        .map_err(|e| e.error)
        .with_context(|| format!("Failed to rename temp file to: {}", dest.display()))?;

    Ok(())
}

/// Atomically writes bytes to a file using a write-then-rename strategy.
pub fn atomic_write(path: &Path, content: &[u8]) -> Result<()> {
    publish_with(path, |file| {
        file.write_all(content)
            .with_context(|| format!("Failed to write content for {}", path.display()))
    })
}

/// Atomically copies `src` to `dest`, returning the number of bytes copied.
///
/// The source is opened before anything is created at the destination, so a
/// missing source never leaves a temp file behind. The copy keeps the source's
/// permission bits.
pub fn atomic_copy(src: &Path, dest: &Path) -> Result<u64> {
    let mut reader =
        File::open(src).with_context(|| format!("Failed to open {}", src.display()))?;
    let permissions = reader
        .metadata()
        .with_context(|| format!("Failed to read metadata of {}", src.display()))?
        .permissions();
    let mut copied = 0;
    publish_with(dest, |file| {
        copied = io::copy(&mut reader, file).with_context(|| {
            format!("Failed to copy {} to {}", src.display(), dest.display())
        })?;
        file.set_permissions(permissions)
            .with_context(|| format!("Failed to set permissions on {}", dest.display()))?;
        Ok(())
    })?;
    Ok(copied)
}

/// Calculates the SHA-256 checksum of a file as a lowercase hex string.
///
/// The file is streamed, so archives of any size can be hashed.
pub fn calculate_checksum(path: &Path) -> Result<String> {
    let mut file = File::open(path)
        .with_context(|| format!("Failed to read file for checksum: {}", path.display()))?;
    let mut hasher = Sha256::new();
    io::copy(&mut file, &mut hasher)
        .with_context(|| format!("Failed to read file for checksum: {}", path.display()))?;
    Ok(hex::encode(hasher.finalize()))
}

/// Removes a directory tree, first making read-only entries writable.
///
/// Package-manager caches (notably Go's module cache) mark their directories
/// read-only, which makes a plain `remove_dir_all` fail halfway.
pub fn remove_dir_all(path: &Path) -> Result<()> {
    if !path.exists() {
        return Ok(());
    }

    if fs::remove_dir_all(path).is_ok() {
        return Ok(());
    }

    for entry in walkdir::WalkDir::new(path).into_iter().filter_map(Result::ok) {
        if entry.file_type().is_symlink() {
            continue;
        }
        if let Ok(metadata) = entry.metadata() {
            let mut perms = metadata.permissions();
            if perms.readonly() {
                #[cfg(unix)]
                {
                    use std::os::unix::fs::PermissionsExt;
                    perms.set_mode(perms.mode() | 0o700);
                }
                #[cfg(not(unix))]
                #[allow(clippy::permissions_set_readonly_false)]
                perms.set_readonly(false);
                let _ = fs::set_permissions(entry.path(), perms);
            }
        }
    }

    fs::remove_dir_all(path)
        .with_context(|| format!("Failed to remove directory: {}", path.display()))
}

/// A request-scoped scratch directory that is removed when dropped.
///
/// The directory is created immediately under the given root with a name like
/// `{prefix}-{uuid}`. Removal happens on every exit path (success, error,
/// panic unwinding, task cancellation) because it lives in `Drop`.
#[derive(Debug)]
pub struct ScratchDir {
    path: PathBuf,
}

impl ScratchDir {
    /// Creates a new scratch directory beneath `root`.
    pub fn new_in(root: &Path, prefix: &str) -> Result<Self> {
        let path = root.join(format!("{}-{}", prefix, uuid::Uuid::new_v4()));
        ensure_dir(&path)?;
        Ok(Self {
            path,
        })
    }

    /// Returns the path to the scratch directory.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for ScratchDir {
    fn drop(&mut self) {
        if let Err(e) = remove_dir_all(&self.path) {
            tracing::warn!("Failed to clean up scratch directory: {e:#}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_atomic_write_creates_parents_and_leaves_no_temp() {
        let temp = TempDir::new().unwrap();
        let dest = temp.path().join("a/b/c.txt");

        atomic_write(&dest, b"content").unwrap();

        assert_eq!(fs::read(&dest).unwrap(), b"content");
        let leftovers: Vec<_> = fs::read_dir(dest.parent().unwrap())
            .unwrap()
            .filter_map(Result::ok)
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn test_atomic_copy_overwrites_existing() {
        let temp = TempDir::new().unwrap();
        let src = temp.path().join("src.bin");
        let dest = temp.path().join("dest.bin");
        fs::write(&src, b"new bytes").unwrap();
        fs::write(&dest, b"old").unwrap();

        let copied = atomic_copy(&src, &dest).unwrap();

        assert_eq!(copied, 9);
        assert_eq!(fs::read(&dest).unwrap(), b"new bytes");
    }

    #[test]
    fn test_failed_publish_leaves_destination_untouched() {
        let temp = TempDir::new().unwrap();
        let dest = temp.path().join("entry");
        fs::write(&dest, b"original").unwrap();

        let result = publish_with(&dest, |file| {
            file.write_all(b"partial")?;
            Err(anyhow::anyhow!("simulated failure"))
        });

        assert!(result.is_err());
        assert_eq!(fs::read(&dest).unwrap(), b"original");
        assert_eq!(fs::read_dir(temp.path()).unwrap().count(), 1);
    }

    #[cfg(unix)]
    #[test]
    fn test_published_files_are_readable_by_others() {
        use std::os::unix::fs::PermissionsExt;

        let temp = TempDir::new().unwrap();
        let written = temp.path().join("written");
        atomic_write(&written, b"x").unwrap();
        assert_eq!(fs::metadata(&written).unwrap().permissions().mode() & 0o777, 0o644);

        let src = temp.path().join("script.sh");
        fs::write(&src, b"#!/bin/sh\n").unwrap();
        fs::set_permissions(&src, fs::Permissions::from_mode(0o755)).unwrap();
        let copy = temp.path().join("copy/script.sh");
        atomic_copy(&src, &copy).unwrap();
        assert_eq!(fs::metadata(&copy).unwrap().permissions().mode() & 0o777, 0o755);
    }

    #[test]
    fn test_atomic_copy_missing_source_creates_nothing() {
        let temp = TempDir::new().unwrap();
        let dest = temp.path().join("out/dest.bin");

        assert!(atomic_copy(&temp.path().join("missing"), &dest).is_err());
        assert!(!dest.parent().unwrap().exists());
    }

    #[test]
    fn test_calculate_checksum() {
        let temp = TempDir::new().unwrap();
        let file = temp.path().join("hello.txt");
        fs::write(&file, b"hello").unwrap();

        assert_eq!(
            calculate_checksum(&file).unwrap(),
            "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );
    }

    #[test]
    fn test_scratch_dir_removed_on_drop() {
        let temp = TempDir::new().unwrap();
        let path = {
            let scratch = ScratchDir::new_in(temp.path(), "resolve").unwrap();
            fs::write(scratch.path().join("file"), b"x").unwrap();
            assert!(scratch.path().is_dir());
            scratch.path().to_path_buf()
        };
        assert!(!path.exists());
    }

    #[cfg(unix)]
    #[test]
    fn test_remove_dir_all_handles_read_only_dirs() {
        use std::os::unix::fs::PermissionsExt;

        let temp = TempDir::new().unwrap();
        let root = temp.path().join("modcache");
        let locked = root.join("example.com/mod@v1.0.0");
        fs::create_dir_all(&locked).unwrap();
        fs::write(locked.join("go.mod"), b"module example.com/mod\n").unwrap();
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o555)).unwrap();

        remove_dir_all(&root).unwrap();
        assert!(!root.exists());
    }
}
