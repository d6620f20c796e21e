//! Dependency resolution for fetched source archives.
//!
//! [`DependencyResolver`] owns the orchestration around an ecosystem tool:
//!
//! 1. the archive is extracted into a fresh scratch directory, so resolution
//!    never touches the archive itself
//! 2. a [`PackageManager`] computes the dependency list from the extracted
//!    tree (the tool invocation is opaque to the resolver)
//! 3. on success, artifacts the tool downloaded are staged into the shared
//!    cache through [`CacheStager`]
//! 4. the scratch directory is removed on every exit path
//!
//! Adding an ecosystem means implementing [`PackageManager`]; nothing else
//! changes. Go modules live in [`gomod`].

pub mod gomod;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::cache::CacheStager;
use crate::config::WorkerConfig;
use crate::core::{CachitoError, ResolutionError};
use crate::source::archive::{extract_archive, source_root};
use crate::utils::fs::{ScratchDir, ensure_dir};

pub use gomod::Gomod;

/// One resolved dependency, identified well enough to be fetched again.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dependency {
    /// Package name (module path for Go)
    pub name: String,
    /// Resolved version
    pub version: String,
    /// Ecosystem, e.g. `gomod`
    pub kind: String,
    /// Where the dependency can be downloaded from
    pub source: String,
    /// Replacement in effect for this dependency, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replaced_by: Option<Replacement>,
}

/// A dependency substituted by another package or a local path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Replacement {
    /// Replacement name or filesystem path
    pub name: String,
    /// Replacement version; absent for filesystem replacements
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

/// Dependencies of one archive, in the order the tool reported them.
pub type DependencyManifest = Vec<Dependency>;

/// Output of a [`PackageManager`] run.
#[derive(Debug, Clone, Default)]
pub struct Resolution {
    /// Resolved dependencies
    pub dependencies: Vec<Dependency>,
    /// Directory of downloaded artifacts worth caching, if the tool produced one
    pub artifacts: Option<PathBuf>,
}

/// An ecosystem-specific dependency tool.
#[async_trait]
pub trait PackageManager: Send + Sync {
    /// Short ecosystem name, used for logs and scratch directory names
    fn name(&self) -> &'static str;

    /// Resolve the dependencies of the tree at `source_dir`.
    ///
    /// `work_dir` is private to this call and removed afterwards; any
    /// downloads should land there.
    async fn resolve(&self, source_dir: &Path, work_dir: &Path) -> Result<Resolution>;
}

/// Extracts archives and runs a [`PackageManager`] over them.
#[derive(Clone)]
pub struct DependencyResolver {
    config: Arc<WorkerConfig>,
    stager: CacheStager,
    manager: Arc<dyn PackageManager>,
}

impl std::fmt::Debug for DependencyResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DependencyResolver")
            .field("manager", &self.manager.name())
            .field("cache_root", &self.stager.root())
            .finish()
    }
}

impl DependencyResolver {
    /// Resolver using `manager`, staging into the configured shared cache.
    pub fn new(config: Arc<WorkerConfig>, manager: Arc<dyn PackageManager>) -> Self {
        Self {
            stager: CacheStager::from_config(&config),
            config,
            manager,
        }
    }

    /// Resolver for Go modules.
    pub fn gomod(config: Arc<WorkerConfig>) -> Self {
        let manager = Arc::new(Gomod::new(config.gomod.clone()));
        Self::new(config, manager)
    }

    /// Resolve the dependencies of `archive_path`.
    ///
    /// With `cache_destination`, artifacts downloaded by the tool are staged
    /// beneath it in the shared cache. The destination is validated before
    /// the tool runs.
    ///
    /// # Errors
    ///
    /// - [`ResolutionError::Extraction`] if the archive is missing or unreadable
    /// - errors of the [`PackageManager`] (tool failures, malformed manifests)
    /// - [`CacheWriteError`](crate::core::CacheWriteError) if staging fails
    pub async fn resolve(
        &self,
        archive_path: &Path,
        cache_destination: Option<&str>,
    ) -> Result<DependencyManifest> {
        if let Some(destination) = cache_destination {
            self.stager.resolve_destination(destination).map_err(CachitoError::from)?;
        }
        if !archive_path.is_file() {
            return Err(CachitoError::from(ResolutionError::Extraction {
                archive: archive_path.to_path_buf(),
                reason: "archive does not exist".to_string(),
            })
            .into());
        }

        // Shared with the extraction task so the directory outlives it
        let scratch = Arc::new(self.prepare_scratch(archive_path)?);
        let extract_dir = scratch.path().join("source");
        let work_dir = scratch.path().join("work");

        tracing::debug!("Extracting {} to {}", archive_path.display(), extract_dir.display());
        let archive = archive_path.to_path_buf();
        let target = extract_dir.clone();
        let guard = Arc::clone(&scratch);
        tokio::task::spawn_blocking(move || {
            let result = extract_archive(&archive, &target);
            drop(guard);
            result
        })
        .await
        .map_err(anyhow::Error::from)
        .and_then(|r| r)
        .map_err(|e| {
            CachitoError::from(ResolutionError::Extraction {
                archive: archive_path.to_path_buf(),
                reason: format!("{e:#}"),
            })
        })?;

        let source_dir = source_root(&extract_dir);
        tracing::info!("Resolving {} dependencies of {}", self.manager.name(), archive_path.display());
        let resolution = self.manager.resolve(&source_dir, &work_dir).await?;

        if let Some(destination) = cache_destination {
            match resolution.artifacts.as_deref() {
                Some(artifacts) if artifacts.is_dir() => {
                    self.stager.stage_dir_to_cache(artifacts, destination).await?;
                }
                _ => tracing::debug!("No {} artifacts to stage", self.manager.name()),
            }
        }

        tracing::info!(
            "Resolved {} {} dependencies of {}",
            resolution.dependencies.len(),
            self.manager.name(),
            archive_path.display()
        );
        Ok(resolution.dependencies)
    }

    /// Scratch directory with empty `source/` and `work/` subdirectories.
    fn prepare_scratch(&self, archive_path: &Path) -> Result<ScratchDir, CachitoError> {
        let prepare = || -> Result<ScratchDir> {
            let scratch = ScratchDir::new_in(&self.config.scratch_dir, self.manager.name())?;
            ensure_dir(&scratch.path().join("source"))?;
            ensure_dir(&scratch.path().join("work"))?;
            Ok(scratch)
        };
        prepare().map_err(|e| {
            CachitoError::from(ResolutionError::Extraction {
                archive: archive_path.to_path_buf(),
                reason: format!("cannot prepare scratch directory: {e:#}"),
            })
        })
    }
}
