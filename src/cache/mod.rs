//! Shared cache staging.
//!
//! The shared cache is a directory tree read by other services (and written
//! by many workers at once). [`CacheStager`] mirrors artifacts into it at
//! caller-chosen relative destinations:
//!
//! ```text
//! {shared_dir}/
//! ├── myapp/
//! │   └── abc123.tar.gz                       # stage_to_cache
//! └── gomod/
//!     └── myapp/
//!         └── github.com/pkg/errors/@v/...    # stage_dir_to_cache
//! ```
//!
//! # Guarantees
//!
//! - Destinations are validated before anything is written; absolute paths,
//!   `..` components and symlinks leading out of the root are rejected.
//! - Every file is written to a temporary file in its destination directory,
//!   synced and renamed into place. Readers never observe a truncated entry.
//! - Concurrent stagers of the same destination do not interfere; the last
//!   rename wins.

use anyhow::Result;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::config::WorkerConfig;
use crate::core::{CacheWriteError, CachitoError};
use crate::utils::fs::atomic_copy;
use crate::utils::path_validation::safe_join;

/// Copies artifacts into the shared cache.
#[derive(Debug, Clone)]
pub struct CacheStager {
    root: PathBuf,
}

impl CacheStager {
    /// Stager rooted at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
        }
    }

    /// Stager rooted at the configured `shared_dir`.
    pub fn from_config(config: &Arc<WorkerConfig>) -> Self {
        Self::new(&config.shared_dir)
    }

    /// The cache root.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve `relative_destination` beneath the root without writing.
    ///
    /// # Errors
    ///
    /// [`CacheWriteError::InvalidDestination`] if the destination is empty,
    /// absolute, contains `..`, or escapes the root through a symlink.
    pub fn resolve_destination(&self, relative_destination: &str) -> Result<PathBuf, CacheWriteError> {
        safe_join(&self.root, relative_destination).map_err(|e| CacheWriteError::InvalidDestination {
            destination: relative_destination.to_string(),
            reason: e.to_string(),
        })
    }

    fn check_root(&self) -> Result<(), CacheWriteError> {
        if !self.root.is_dir() {
            return Err(CacheWriteError::UnwritableRoot {
                root: self.root.clone(),
                reason: "directory does not exist".to_string(),
            });
        }
        Ok(())
    }

    /// Copy `source` to `relative_destination` beneath the root.
    ///
    /// Returns the final path of the entry.
    ///
    /// # Errors
    ///
    /// - [`CacheWriteError::InvalidDestination`] for a rejected destination
    /// - [`CacheWriteError::UnwritableRoot`] if the root is missing or not writable
    /// - [`CacheWriteError::Io`] if reading the source or writing the entry fails
    pub async fn stage_to_cache(&self, source: &Path, relative_destination: &str) -> Result<PathBuf> {
        let dest = self.resolve_destination(relative_destination).map_err(CachitoError::from)?;
        self.check_root().map_err(CachitoError::from)?;

        let root = self.root.clone();
        let src = source.to_path_buf();
        let target = dest.clone();
        let bytes = tokio::task::spawn_blocking(move || copy_entry(&root, &src, &target)).await??;

        tracing::info!(
            "Staged {} into the shared cache at {} ({} bytes)",
            source.display(),
            dest.display(),
            bytes
        );
        Ok(dest)
    }

    /// Copy every regular file under `source_dir` to `relative_destination`,
    /// keeping the tree layout.
    ///
    /// Each file is published atomically on its own; the tree as a whole is
    /// not. Symlinks are skipped. Returns the destination directory.
    pub async fn stage_dir_to_cache(
        &self,
        source_dir: &Path,
        relative_destination: &str,
    ) -> Result<PathBuf> {
        let dest = self.resolve_destination(relative_destination).map_err(CachitoError::from)?;
        self.check_root().map_err(CachitoError::from)?;

        let root = self.root.clone();
        let src = source_dir.to_path_buf();
        let target = dest.clone();
        let files = tokio::task::spawn_blocking(move || -> Result<usize> {
            let mut files = 0;
            for entry in walkdir::WalkDir::new(&src).follow_links(false).sort_by_file_name() {
                let entry = entry.map_err(|e| {
                    CachitoError::from(CacheWriteError::Io {
                        path: src.clone(),
                        reason: e.to_string(),
                    })
                })?;
                if !entry.file_type().is_file() {
                    continue;
                }
                let rel = entry.path().strip_prefix(&src)?;
                copy_entry(&root, entry.path(), &target.join(rel))?;
                files += 1;
            }
            Ok(files)
        })
        .await??;

        tracing::info!(
            "Staged {} files from {} into the shared cache at {}",
            files,
            source_dir.display(),
            dest.display()
        );
        Ok(dest)
    }
}

fn copy_entry(root: &Path, source: &Path, dest: &Path) -> Result<u64> {
    atomic_copy(source, dest).map_err(|e| {
        let reason = format!("{e:#}");
        let denied = e
            .chain()
            .filter_map(|c| c.downcast_ref::<std::io::Error>())
            .any(|io| io.kind() == std::io::ErrorKind::PermissionDenied);
        let error = if denied && source.exists() {
            CacheWriteError::UnwritableRoot {
                root: root.to_path_buf(),
                reason,
            }
        } else {
            CacheWriteError::Io {
                path: dest.to_path_buf(),
                reason,
            }
        };
        CachitoError::from(error).into()
    })
}
