//! Source control fetcher.
//!
//! [`GitFetcher::fetch_source`] turns a `(url, reference)` pair into a
//! [`SourceArchive`]: a gzip tarball of the reference's tree stored at a path
//! derived only from the URL and the reference:
//!
//! ```text
//! {sources_dir}/
//! └── github.com/
//!     └── org/
//!         └── app/
//!             ├── 4a5d3f...e1.tar.gz
//!             └── release%2F1.0.tar.gz     # '/' in a reference is encoded
//! ```
//!
//! Fetching is idempotent: an existing archive that reads back completely is
//! reused, and re-packing the same commit produces identical bytes. Archives
//! are published with write-temp-then-rename, so a concurrent reader never
//! sees a partial file.
//!
//! The network phase (clone, resolve, checkout) is bounded by the configured
//! fetch timeout. Work happens in a scratch directory that is removed on every
//! exit path, including cancellation.

pub mod archive;

use anyhow::Result;
use regex::Regex;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock};

use crate::config::WorkerConfig;
use crate::constants::ARCHIVE_EXTENSION;
use crate::core::{CachitoError, SourceFetchError};
use crate::git::{GitRepo, parse_repo_location, strip_auth_from_url};
use crate::utils::fs::{ScratchDir, calculate_checksum};

static REFERENCE_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9._/-]+$").expect("reference pattern is valid"));

/// Fragments of git's clone stderr meaning the repository itself is missing
/// or inaccessible, as opposed to the network being unavailable.
const NOT_FOUND_MARKERS: &[&str] = &[
    "repository not found",
    "not found",
    "does not exist",
    "does not appear to be a git repository",
    "could not read username",
    "authentication failed",
];

/// A fetched, complete source archive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceArchive {
    /// Location of the archive
    pub path: PathBuf,
    /// Repository URL with credentials removed
    pub origin_url: String,
    /// Reference as requested
    pub reference: String,
    /// Commit the reference resolved to
    pub commit: String,
    /// SHA-256 of the archive file
    pub sha256: String,
}

/// Fetches repositories with the system git binary.
#[derive(Debug, Clone)]
pub struct GitFetcher {
    config: Arc<WorkerConfig>,
}

impl GitFetcher {
    /// Create a fetcher writing under `config.sources_dir`.
    pub fn new(config: Arc<WorkerConfig>) -> Self {
        Self {
            config,
        }
    }

    /// Deterministic archive location for `(url, reference)`.
    ///
    /// # Errors
    ///
    /// Returns [`SourceFetchError::InvalidUrl`] or
    /// [`SourceFetchError::InvalidReference`] if either input is rejected.
    pub fn archive_path(&self, url: &str, reference: &str) -> Result<PathBuf, SourceFetchError> {
        let location = parse_repo_location(url)?;
        validate_reference(url, reference)?;
        let file_name = format!("{}.{ARCHIVE_EXTENSION}", reference.replace('/', "%2F"));
        Ok(self.config.sources_dir.join(location.relative_dir()).join(file_name))
    }

    /// Fetch `reference` of `url` into its archive, reusing a complete one.
    ///
    /// # Errors
    ///
    /// Any failure is a [`SourceFetchError`] wrapped in [`CachitoError`]:
    /// `Timeout` when the network phase exceeds the configured deadline,
    /// `NotFound` / `Network` for clone failures, `InvalidReference` for a
    /// reference that is malformed or absent from the repository,
    /// `InvalidUrl` for an unusable URL, `Archive` when packing fails.
    /// A missing git binary surfaces as [`CachitoError::GitNotFound`].
    pub async fn fetch_source(&self, url: &str, reference: &str) -> Result<SourceArchive> {
        let archive_path = self.archive_path(url, reference).map_err(CachitoError::from)?;
        let origin_url = strip_auth_from_url(url);

        if let Some(commit) = reusable_archive(&archive_path).await {
            tracing::info!(
                "Reusing existing archive {} for \"{}\" at \"{}\"",
                archive_path.display(),
                origin_url,
                reference
            );
            let sha256 = checksum(&archive_path).await?;
            return Ok(SourceArchive {
                path: archive_path,
                origin_url,
                reference: reference.to_string(),
                commit,
                sha256,
            });
        }

        let scratch = ScratchDir::new_in(&self.config.scratch_dir, "fetch").map_err(|e| {
            CachitoError::from(SourceFetchError::Archive {
                path: archive_path.clone(),
                reason: format!("cannot prepare scratch directory: {e:#}"),
            })
        })?;
        let checkout = scratch.path().join("repo");
        let deadline = self.config.fetch_timeout;

        let commit = match tokio::time::timeout(
            deadline,
            self.checkout(url, &origin_url, reference, &checkout),
        )
        .await
        {
            Ok(result) => result?,
            Err(_) => {
                return Err(CachitoError::from(SourceFetchError::Timeout {
                    url: origin_url,
                    reference: reference.to_string(),
                    timeout: deadline,
                })
                .into());
            }
        };

        tracing::debug!("Packing {} at {} into {}", origin_url, commit, archive_path.display());
        let dest = archive_path.clone();
        let packed_commit = commit.clone();
        // The scratch dir moves into the blocking task so the tree outlives a
        // cancelled caller until packing finishes.
        tokio::task::spawn_blocking(move || {
            let result = archive::write_archive(&checkout, &dest, &packed_commit);
            drop(scratch);
            result
        })
        .await
        .map_err(anyhow::Error::from)
        .and_then(|r| r)
        .map_err(|e| {
            CachitoError::from(SourceFetchError::Archive {
                path: archive_path.clone(),
                reason: format!("{e:#}"),
            })
        })?;

        let sha256 = checksum(&archive_path).await?;
        tracing::info!("Stored source archive {} (sha256 {})", archive_path.display(), sha256);

        Ok(SourceArchive {
            path: archive_path,
            origin_url,
            reference: reference.to_string(),
            commit,
            sha256,
        })
    }

    /// Clone, resolve and check out; returns the resolved commit.
    async fn checkout(
        &self,
        url: &str,
        origin_url: &str,
        reference: &str,
        target: &Path,
    ) -> Result<String> {
        let repo = GitRepo::clone_no_checkout(&self.config.git_binary, url, target)
            .await
            .map_err(|e| classify_clone_error(e, origin_url, reference, self.config.fetch_timeout))?;

        let commit = repo
            .resolve_commit(reference)
            .await
            .map_err(|e| classify_clone_error(e, origin_url, reference, self.config.fetch_timeout))?
            .ok_or_else(|| {
                CachitoError::from(SourceFetchError::InvalidReference {
                    url: origin_url.to_string(),
                    reference: reference.to_string(),
                    reason: "no commit matches the reference".to_string(),
                })
            })?;

        repo.checkout_detach(&commit)
            .await
            .map_err(|e| classify_clone_error(e, origin_url, reference, self.config.fetch_timeout))?;
        Ok(commit)
    }
}

/// Validate a reference before it reaches git.
///
/// Rejects empty references, anything starting with `-` (it would be read as
/// an option), characters outside `[A-Za-z0-9._/-]` and `..` sequences.
pub fn validate_reference(url: &str, reference: &str) -> Result<(), SourceFetchError> {
    let reason = if reference.is_empty() {
        Some("reference is empty")
    } else if reference.starts_with('-') {
        Some("reference must not start with '-'")
    } else if !REFERENCE_PATTERN.is_match(reference) {
        Some("reference contains unsupported characters")
    } else if reference.contains("..") {
        Some("reference must not contain '..'")
    } else {
        None
    };

    match reason {
        Some(reason) => Err(SourceFetchError::InvalidReference {
            url: strip_auth_from_url(url),
            reference: reference.to_string(),
            reason: reason.to_string(),
        }),
        None => Ok(()),
    }
}

fn classify_clone_error(
    error: anyhow::Error,
    url: &str,
    reference: &str,
    timeout: std::time::Duration,
) -> anyhow::Error {
    let classified = match error.downcast_ref::<CachitoError>() {
        Some(CachitoError::GitCommand { stderr, .. }) => {
            let lowered = stderr.to_lowercase();
            let reason = stderr.trim().to_string();
            if NOT_FOUND_MARKERS.iter().any(|m| lowered.contains(m)) {
                SourceFetchError::NotFound {
                    url: url.to_string(),
                    reason,
                }
            } else {
                SourceFetchError::Network {
                    url: url.to_string(),
                    reason,
                }
            }
        }
        Some(CachitoError::GitTimeout { .. }) => SourceFetchError::Timeout {
            url: url.to_string(),
            reference: reference.to_string(),
            timeout,
        },
        _ => return error,
    };
    CachitoError::from(classified).into()
}

/// The commit of an existing, complete archive at `path`, if any.
///
/// A corrupt archive is left in place; the re-fetch renames over it. Removing
/// it here could delete a valid archive another worker just published.
async fn reusable_archive(path: &Path) -> Option<String> {
    if !path.is_file() {
        return None;
    }
    let owned = path.to_path_buf();
    let verified = tokio::task::spawn_blocking(move || archive::verify_archive(&owned)).await;
    match verified {
        Ok(Ok(Some(commit))) => Some(commit),
        Ok(Ok(None)) => {
            tracing::warn!("Archive {} has no recorded commit; fetching again", path.display());
            None
        }
        Ok(Err(e)) => {
            tracing::warn!("Archive {} is corrupt; fetching again: {e:#}", path.display());
            None
        }
        Err(e) => {
            tracing::warn!("Archive verification of {} did not complete: {e}", path.display());
            None
        }
    }
}

async fn checksum(path: &Path) -> Result<String> {
    let owned = path.to_path_buf();
    tokio::task::spawn_blocking(move || calculate_checksum(&owned)).await?
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{TestGit, WorkerFixture};
    use std::time::Duration;

    fn file_url(path: &Path) -> String {
        format!("file://{}", path.display())
    }

    #[test]
    fn test_validate_reference() {
        let url = "https://example.com/repo.git";
        for ok in ["abc123", "v1.0.0", "release/1.x", "feature_branch-2"] {
            assert!(validate_reference(url, ok).is_ok(), "{ok}");
        }
        for bad in ["", "-upload-pack=evil", "a b", "v1..v2", "main;rm", "ref~1", "HEAD^"] {
            assert!(
                matches!(validate_reference(url, bad), Err(SourceFetchError::InvalidReference { .. })),
                "{bad}"
            );
        }
    }

    #[test]
    fn test_archive_path_is_deterministic() {
        let fixture = WorkerFixture::new().unwrap();
        let fetcher = GitFetcher::new(fixture.config());

        let a = fetcher.archive_path("https://token@example.com/org/repo.git", "release/1.0").unwrap();
        let b = fetcher.archive_path("https://example.com/org/repo", "release/1.0").unwrap();

        assert_eq!(a, b);
        assert_eq!(
            a,
            fixture.sources_dir().join("example.com/org/repo/release%2F1.0.tar.gz")
        );
    }

    #[tokio::test]
    async fn test_fetch_by_commit_branch_and_tag() {
        let fixture = WorkerFixture::new().unwrap();
        let (repo, commit) = TestGit::create_repo(
            &fixture.root().join("upstream"),
            &[("go.mod", "module example.com/app\n"), ("main.go", "package main\n")],
        )
        .unwrap();
        repo.tag("v1.0.0").unwrap();
        let fetcher = GitFetcher::new(fixture.config());
        let url = file_url(repo.repo_path());

        for reference in [commit.as_str(), "main", "v1.0.0"] {
            let archive = fetcher.fetch_source(&url, reference).await.unwrap();
            assert_eq!(archive.commit, commit);
            assert!(archive.path.starts_with(fixture.sources_dir()));
            assert_eq!(archive.sha256, calculate_checksum(&archive.path).unwrap());
        }

        // Scratch directories are cleaned up
        assert_eq!(std::fs::read_dir(fixture.scratch_dir()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_refetch_produces_identical_archive() {
        let fixture = WorkerFixture::new().unwrap();
        let (repo, commit) =
            TestGit::create_repo(&fixture.root().join("upstream"), &[("README", "hello\n")]).unwrap();
        let fetcher = GitFetcher::new(fixture.config());
        let url = file_url(repo.repo_path());

        let first = fetcher.fetch_source(&url, &commit).await.unwrap();
        let first_bytes = std::fs::read(&first.path).unwrap();
        std::fs::remove_file(&first.path).unwrap();

        let second = fetcher.fetch_source(&url, &commit).await.unwrap();
        assert_eq!(std::fs::read(&second.path).unwrap(), first_bytes);
        assert_eq!(first.sha256, second.sha256);
    }

    #[tokio::test]
    async fn test_corrupt_archive_is_refetched() {
        let fixture = WorkerFixture::new().unwrap();
        let (repo, commit) =
            TestGit::create_repo(&fixture.root().join("upstream"), &[("README", "hello\n")]).unwrap();
        let fetcher = GitFetcher::new(fixture.config());
        let url = file_url(repo.repo_path());

        let path = fetcher.archive_path(&url, &commit).unwrap();
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, b"not an archive").unwrap();

        let archive = fetcher.fetch_source(&url, &commit).await.unwrap();
        assert_eq!(archive.commit, commit);
        assert!(archive::verify_archive(&archive.path).is_ok());
    }

    #[tokio::test]
    async fn test_corrupt_archive_is_not_deleted_on_check() {
        let temp = tempfile::TempDir::new().unwrap();
        let path = temp.path().join("app.tar.gz");
        std::fs::write(&path, b"not an archive").unwrap();

        assert_eq!(reusable_archive(&path).await, None);
        assert_eq!(std::fs::read(&path).unwrap(), b"not an archive");
    }

    #[tokio::test]
    async fn test_unusable_scratch_dir_is_a_fetch_error() {
        let fixture = WorkerFixture::new().unwrap();
        let mut config = (*fixture.config()).clone();
        config.scratch_dir = fixture.root().join("scratch-is-a-file");
        std::fs::write(&config.scratch_dir, b"").unwrap();
        let fetcher = GitFetcher::new(Arc::new(config));

        let url = file_url(&fixture.root().join("upstream.git"));
        let err = fetcher.fetch_source(&url, "main").await.unwrap_err();

        assert!(matches!(
            err.downcast_ref::<CachitoError>(),
            Some(CachitoError::SourceFetch(SourceFetchError::Archive { .. }))
        ));
        assert!(format!("{err:#}").contains("scratch directory"));
    }

    #[tokio::test]
    async fn test_unknown_reference_is_invalid_reference() {
        let fixture = WorkerFixture::new().unwrap();
        let (repo, _) =
            TestGit::create_repo(&fixture.root().join("upstream"), &[("README", "hello\n")]).unwrap();
        let fetcher = GitFetcher::new(fixture.config());

        let err = fetcher.fetch_source(&file_url(repo.repo_path()), "no-such-branch").await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<CachitoError>(),
            Some(CachitoError::SourceFetch(SourceFetchError::InvalidReference { .. }))
        ));
    }

    #[tokio::test]
    async fn test_missing_repository_is_not_found() {
        let fixture = WorkerFixture::new().unwrap();
        let fetcher = GitFetcher::new(fixture.config());
        let url = file_url(&fixture.root().join("does-not-exist.git"));

        let err = fetcher.fetch_source(&url, "main").await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<CachitoError>(),
            Some(CachitoError::SourceFetch(SourceFetchError::NotFound { .. }))
        ));
    }

    #[tokio::test]
    async fn test_unresponsive_remote_times_out() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        // Accept connections and never answer
        let server = tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                held.push(socket);
            }
        });

        let fixture = WorkerFixture::new().unwrap();
        let config = Arc::new((*fixture.config()).clone().with_fetch_timeout(Duration::from_secs(1)));
        let fetcher = GitFetcher::new(config);

        let err = fetcher
            .fetch_source(&format!("http://127.0.0.1:{port}/repo.git"), "main")
            .await
            .unwrap_err();
        server.abort();

        assert!(matches!(
            err.downcast_ref::<CachitoError>(),
            Some(CachitoError::SourceFetch(SourceFetchError::Timeout { .. }))
        ));
        assert!(!fetcher.archive_path(&format!("http://127.0.0.1:{port}/repo.git"), "main").unwrap().exists());
    }
}
