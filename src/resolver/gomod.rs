//! Go modules support.
//!
//! Runs the `go` tool against an extracted source tree with a private
//! `GOPATH`, so every module it downloads lands in the request's work
//! directory:
//!
//! ```text
//! go mod download
//! go list -m -json all
//! ```
//!
//! `go list` prints one JSON object per module; the main module is skipped
//! and every other module becomes a [`Dependency`] whose `source` is the
//! module proxy URL of its `.zip` (or the local path of a filesystem
//! replacement). The module download cache
//! (`$GOPATH/pkg/mod/cache/download`) is reported as the artifact directory,
//! which is a valid `GOPROXY=file://...` layout once staged.

use anyhow::Result;
use async_trait::async_trait;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;

use super::{Dependency, PackageManager, Replacement, Resolution};
use crate::config::GomodConfig;
use crate::core::{CachitoError, ResolutionError};

const KIND: &str = "gomod";

/// One entry of `go list -m -json` output.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct GoModule {
    path: String,
    #[serde(default)]
    version: Option<String>,
    #[serde(default)]
    main: bool,
    #[serde(default)]
    replace: Option<Box<GoModule>>,
}

/// Go modules package manager.
#[derive(Debug, Clone)]
pub struct Gomod {
    config: GomodConfig,
}

impl Gomod {
    /// Package manager using the given Go settings.
    pub fn new(config: GomodConfig) -> Self {
        Self {
            config,
        }
    }

    async fn run_go(&self, args: &[&str], source_dir: &Path, gopath: &Path, gocache: &Path) -> Result<String> {
        let command = format!("go {}", args.join(" "));
        tracing::debug!("Running '{}' in {}", command, source_dir.display());

        let output = Command::new(&self.config.go_binary)
            .args(args)
            .current_dir(source_dir)
            .env("GOPATH", gopath)
            .env("GOMODCACHE", gopath.join("pkg").join("mod"))
            .env("GOCACHE", gocache)
            .env("GO111MODULE", "on")
            .env("GOFLAGS", "-mod=mod -modcacherw")
            .env("GOPROXY", &self.config.goproxy)
            .env("GOTOOLCHAIN", "local")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| -> anyhow::Error {
                if e.kind() == std::io::ErrorKind::NotFound {
                    CachitoError::from(ResolutionError::ToolNotFound {
                        tool: self.config.go_binary.clone(),
                    })
                    .into()
                } else {
                    anyhow::Error::new(e).context(format!("Failed to execute '{command}'"))
                }
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            tracing::debug!("'{}' failed: {}", command, stderr);
            return Err(CachitoError::from(ResolutionError::ToolFailed {
                command,
                status: output.status.code(),
                stderr,
            })
            .into());
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    /// Turn `go list -m -json all` output into dependencies.
    fn parse_modules(&self, output: &str) -> Result<Vec<Dependency>> {
        let mut dependencies = Vec::new();
        for module in serde_json::Deserializer::from_str(output).into_iter::<GoModule>() {
            let module = module.map_err(|e| {
                CachitoError::from(ResolutionError::ToolFailed {
                    command: "go list -m -json all".to_string(),
                    status: Some(0),
                    stderr: format!("unparseable output: {e}"),
                })
            })?;
            if module.main {
                continue;
            }
            dependencies.push(self.dependency(module));
        }
        Ok(dependencies)
    }

    fn dependency(&self, module: GoModule) -> Dependency {
        let version = module.version.unwrap_or_default();
        let (source, replaced_by) = match module.replace {
            Some(replace) => {
                let source = match replace.version.as_deref() {
                    Some(v) => self.download_url(&replace.path, v),
                    // Filesystem replacement
                    None => replace.path.clone(),
                };
                (
                    source,
                    Some(Replacement {
                        name: replace.path,
                        version: replace.version,
                    }),
                )
            }
            None => (self.download_url(&module.path, &version), None),
        };

        Dependency {
            name: module.path,
            version,
            kind: KIND.to_string(),
            source,
            replaced_by,
        }
    }

    /// Proxy URL of a module's `.zip`, or `path@version` without an HTTP proxy.
    fn download_url(&self, path: &str, version: &str) -> String {
        match self.config.proxy_base() {
            Some(base) => format!(
                "{base}/{}/@v/{}.zip",
                escape_module_path(path),
                escape_module_path(version)
            ),
            None => format!("{path}@{version}"),
        }
    }
}

#[async_trait]
impl PackageManager for Gomod {
    fn name(&self) -> &'static str {
        KIND
    }

    async fn resolve(&self, source_dir: &Path, work_dir: &Path) -> Result<Resolution> {
        let module = read_module_path(source_dir).await?;
        tracing::debug!("Main module is {}", module);

        let gopath = work_dir.join("gopath");
        let gocache = work_dir.join("gocache");
        tokio::fs::create_dir_all(&gopath).await?;
        tokio::fs::create_dir_all(&gocache).await?;

        self.run_go(&["mod", "download"], source_dir, &gopath, &gocache).await?;
        let listing = self.run_go(&["list", "-m", "-json", "all"], source_dir, &gopath, &gocache).await?;
        let dependencies = self.parse_modules(&listing)?;

        let artifacts: PathBuf = gopath.join("pkg").join("mod").join("cache").join("download");
        Ok(Resolution {
            dependencies,
            artifacts: artifacts.is_dir().then_some(artifacts),
        })
    }
}

/// Read the `module` directive of `go.mod` in `source_dir`.
///
/// # Errors
///
/// [`ResolutionError::MalformedManifest`] if `go.mod` is missing or has no
/// module directive.
async fn read_module_path(source_dir: &Path) -> Result<String> {
    let manifest = source_dir.join("go.mod");
    let malformed = |reason: &str| -> anyhow::Error {
        CachitoError::from(ResolutionError::MalformedManifest {
            path: manifest.clone(),
            reason: reason.to_string(),
        })
        .into()
    };

    let content = match tokio::fs::read_to_string(&manifest).await {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(malformed("go.mod not found"));
        }
        Err(e) => return Err(malformed(&format!("unreadable: {e}"))),
    };

    content
        .lines()
        .map(|line| line.split("//").next().unwrap_or_default().trim())
        .find_map(|line| line.strip_prefix("module"))
        .filter(|rest| rest.starts_with(char::is_whitespace))
        .map(|rest| rest.trim().trim_matches('"').to_string())
        .filter(|path| !path.is_empty())
        .ok_or_else(|| malformed("no module directive"))
}

/// Case-encode a module path or version for proxy URLs.
///
/// Each uppercase letter becomes `!` followed by its lowercase form, so
/// `github.com/Masterminds/semver` becomes `github.com/!masterminds/semver`.
pub fn escape_module_path(path: &str) -> String {
    let mut escaped = String::with_capacity(path.len());
    for c in path.chars() {
        if c.is_ascii_uppercase() {
            escaped.push('!');
            escaped.push(c.to_ascii_lowercase());
        } else {
            escaped.push(c);
        }
    }
    escaped
}
