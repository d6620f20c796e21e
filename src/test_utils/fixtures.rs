//! Test fixtures for worker tests
//!
//! [`WorkerFixture`] lays out the three worker directories under one temporary
//! root. Helpers here also build source archives directly from file lists and
//! write stand-in `go` executables, so resolver tests run without a Go
//! toolchain or network access.

use anyhow::Result;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;

use crate::config::{GomodConfig, WorkerConfig};
use crate::source::archive::write_archive;

/// Temporary `shared/`, `sources/` and `scratch/` directories plus a config
/// pointing at them.
pub struct WorkerFixture {
    temp: TempDir,
    config: WorkerConfig,
}

impl WorkerFixture {
    /// Create the directory layout and a default config.
    pub fn new() -> Result<Self> {
        let temp = TempDir::new()?;
        let shared = temp.path().join("shared");
        let sources = temp.path().join("sources");
        let scratch = temp.path().join("scratch");
        for dir in [&shared, &sources, &scratch] {
            std::fs::create_dir_all(dir)?;
        }
        let config = WorkerConfig::new(shared, sources, scratch);
        Ok(Self {
            temp,
            config,
        })
    }

    /// Use `go_binary` for Go module resolution.
    #[must_use]
    pub fn with_go_binary(mut self, go_binary: &Path) -> Self {
        self.config = self.config.with_gomod(GomodConfig {
            go_binary: go_binary.display().to_string(),
            ..GomodConfig::default()
        });
        self
    }

    /// Root of the temporary tree; free space for test repositories.
    pub fn root(&self) -> &Path {
        self.temp.path()
    }

    /// Shared cache root.
    pub fn shared_dir(&self) -> &Path {
        &self.config.shared_dir
    }

    /// Archive directory.
    pub fn sources_dir(&self) -> &Path {
        &self.config.sources_dir
    }

    /// Scratch root.
    pub fn scratch_dir(&self) -> &Path {
        &self.config.scratch_dir
    }

    /// Shareable config for components under test.
    pub fn config(&self) -> Arc<WorkerConfig> {
        Arc::new(self.config.clone())
    }

    /// Pack `files` into a source archive named `name` under the root.
    pub fn archive_with(&self, name: &str, files: &[(&str, &str)]) -> Result<PathBuf> {
        let tree = self.temp.path().join(format!("{name}-tree"));
        for (file, content) in files {
            let path = tree.join(file);
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(path, content)?;
        }
        std::fs::create_dir_all(&tree)?;
        let archive = self.temp.path().join(format!("{name}.tar.gz"));
        write_archive(&tree, &archive, "0000000000000000000000000000000000000000")?;
        Ok(archive)
    }

    /// Whether the scratch root is empty (every request cleaned up).
    pub fn scratch_is_empty(&self) -> bool {
        std::fs::read_dir(self.scratch_dir()).map(|mut d| d.next().is_none()).unwrap_or(false)
    }
}

/// `go.mod` of a small module with one dependency.
pub const GO_MOD: &str = "module example.com/app\n\ngo 1.21\n\nrequire github.com/pkg/errors v0.9.1\n";

/// `go list -m -json all` output matching [`GO_MOD`], with a proxy
/// replacement and a filesystem replacement.
pub const GO_LIST_OUTPUT: &str = r#"{
	"Path": "example.com/app",
	"Main": true,
	"Dir": "/src/app",
	"GoVersion": "1.21"
}
{
	"Path": "github.com/Masterminds/semver",
	"Version": "v1.4.2",
	"Indirect": true
}
{
	"Path": "github.com/pkg/errors",
	"Version": "v0.9.1"
}
{
	"Path": "golang.org/x/text",
	"Version": "v0.3.0",
	"Replace": {
		"Path": "golang.org/x/text",
		"Version": "v0.3.2"
	}
}
{
	"Path": "example.com/lib",
	"Version": "v1.0.0",
	"Replace": {
		"Path": "./lib"
	}
}
"#;

/// Write an executable shell script standing in for `go`.
///
/// `go mod download` populates the module download cache under `$GOPATH` and
/// `go list -m -json all` prints [`GO_LIST_OUTPUT`]. With `fail` set, `go mod
/// download` exits 1 with a registry error instead.
#[cfg(unix)]
pub fn write_fake_go(dir: &Path, fail: bool) -> Result<PathBuf> {
    use std::os::unix::fs::PermissionsExt;

    let download = if fail {
        "echo 'go: github.com/pkg/errors@v0.9.1: reading https://proxy.golang.org/github.com/pkg/errors/@v/v0.9.1.zip: 404 Not Found' >&2\n    exit 1".to_string()
    } else {
        "d=\"$GOPATH/pkg/mod/cache/download/github.com/pkg/errors/@v\"\n    mkdir -p \"$d\"\n    printf 'module github.com/pkg/errors\\n' > \"$d/v0.9.1.mod\"\n    printf 'zip' > \"$d/v0.9.1.zip\"\n    chmod 0555 \"$d\"".to_string()
    };
    let script = format!(
        "#!/bin/sh\ncase \"$1 $2\" in\n  \"mod download\")\n    {download}\n    ;;\n  \"list -m\")\n    cat <<'EOF'\n{GO_LIST_OUTPUT}EOF\n    ;;\n  *)\n    echo \"unexpected invocation: $*\" >&2\n    exit 2\n    ;;\nesac\n"
    );

    let path = dir.join("fake-go");
    std::fs::write(&path, script)?;
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755))?;
    Ok(path)
}
