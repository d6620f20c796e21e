//! Git test helper utilities
//!
//! Provides a safe, testable wrapper around Git operations for unit tests.

use anyhow::{Context, Result, bail};
use std::path::{Path, PathBuf};
use std::process::Command;

/// Git command builder for tests
///
/// Builds throwaway upstream repositories for the fetcher to clone. Use this
/// instead of raw `std::process::Command` for git operations in tests.
pub struct TestGit {
    repo_path: PathBuf,
}

impl TestGit {
    fn run_git_command(&self, args: &[&str], action: &str) -> Result<std::process::Output> {
        let output = Command::new("git")
            .args(args)
            .current_dir(&self.repo_path)
            .env("GIT_TERMINAL_PROMPT", "0")
            .output()
            .with_context(|| action.to_string())?;

        if !output.status.success() {
            bail!("{} failed: {}", action, String::from_utf8_lossy(&output.stderr));
        }

        Ok(output)
    }

    /// Create a new TestGit instance for the given repository path
    pub fn new(repo_path: impl Into<PathBuf>) -> Self {
        Self {
            repo_path: repo_path.into(),
        }
    }

    /// Create a repository at `path` on branch `main` with one commit
    /// containing `files`. Returns the helper and the commit id.
    pub fn create_repo(path: &Path, files: &[(&str, &str)]) -> Result<(Self, String)> {
        std::fs::create_dir_all(path)
            .with_context(|| format!("Failed to create {}", path.display()))?;
        let repo = Self::new(path);
        repo.init()?;
        repo.set_head("main")?;
        repo.config_user()?;
        repo.write_files(files)?;
        repo.add_all()?;
        repo.commit("Initial commit")?;
        let commit = repo.rev_parse_head()?;
        Ok((repo, commit))
    }

    /// Initialize a new git repository
    pub fn init(&self) -> Result<()> {
        self.run_git_command(&["init", "--quiet"], "Failed to initialize git repository")?;
        Ok(())
    }

    /// Configure git user for tests
    pub fn config_user(&self) -> Result<()> {
        self.run_git_command(
            &["config", "user.email", "test@cachito.example"],
            "Failed to configure git user email",
        )?;

        self.run_git_command(
            &["config", "user.name", "Test User"],
            "Failed to configure git user name",
        )?;
        Ok(())
    }

    /// Write files relative to the repository root, creating directories
    pub fn write_files(&self, files: &[(&str, &str)]) -> Result<()> {
        for (name, content) in files {
            let path = self.repo_path.join(name);
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(&path, content)
                .with_context(|| format!("Failed to write {}", path.display()))?;
        }
        Ok(())
    }

    /// Add all files to staging
    pub fn add_all(&self) -> Result<()> {
        self.run_git_command(&["add", "."], "Failed to add files to git")?;
        Ok(())
    }

    /// Create a commit with the given message
    pub fn commit(&self, message: &str) -> Result<()> {
        self.run_git_command(
            &["commit", "--quiet", "--no-gpg-sign", "-m", message],
            "Failed to create git commit",
        )?;
        Ok(())
    }

    /// Create a tag
    pub fn tag(&self, tag_name: &str) -> Result<()> {
        self.run_git_command(&["tag", tag_name], &format!("Failed to create tag: {}", tag_name))?;
        Ok(())
    }

    /// Create and checkout a branch
    pub fn create_branch(&self, branch_name: &str) -> Result<()> {
        self.run_git_command(
            &["checkout", "--quiet", "-b", branch_name],
            &format!("Failed to create branch: {}", branch_name),
        )?;
        Ok(())
    }

    /// Get current commit SHA
    pub fn rev_parse_head(&self) -> Result<String> {
        let output =
            self.run_git_command(&["rev-parse", "HEAD"], "Failed to get current commit SHA")?;
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    /// Set HEAD to point to a branch (making it default branch)
    pub fn set_head(&self, branch_name: &str) -> Result<()> {
        self.run_git_command(
            &["symbolic-ref", "HEAD", &format!("refs/heads/{}", branch_name)],
            &format!("Failed to set HEAD to branch: {}", branch_name),
        )?;
        Ok(())
    }

    /// Return the repository path
    pub fn repo_path(&self) -> &Path {
        &self.repo_path
    }

    /// `file://` URL of the repository
    pub fn file_url(&self) -> String {
        format!("file://{}", self.repo_path.display())
    }
}
