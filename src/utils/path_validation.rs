//! Path validation and security utilities.
//!
//! Caller-supplied destinations are joined onto the shared cache root, so they
//! must be checked for traversal before anything touches the filesystem.

use anyhow::{Result, anyhow};
use std::path::{Component, Path, PathBuf};

/// Validates that a path doesn't contain dangerous components.
///
/// # Errors
/// Returns an error if the path contains:
/// - Parent directory references (..)
/// - A root, drive or UNC prefix (the path must be relative)
pub fn validate_no_traversal(path: &Path) -> Result<()> {
    for component in path.components() {
        match component {
            Component::ParentDir => {
                return Err(anyhow!(
                    "Path contains parent directory reference (..): {}",
                    path.display()
                ));
            }
            Component::RootDir | Component::Prefix(_) => {
                return Err(anyhow!("Path must be relative: {}", path.display()));
            }
            Component::CurDir | Component::Normal(_) => {}
        }
    }
    Ok(())
}

/// Normalizes a relative destination into a clean relative path.
///
/// `./` components are dropped. The result is guaranteed to be non-empty and
/// free of traversal, so joining it onto a root stays beneath that root.
pub fn normalize_relative(destination: &str) -> Result<PathBuf> {
    if destination.contains('\0') {
        return Err(anyhow!("Path contains a NUL byte"));
    }

    let path = Path::new(destination);
    validate_no_traversal(path)?;

    let normalized: PathBuf = path
        .components()
        .filter(|c| matches!(c, Component::Normal(_)))
        .collect();

    if normalized.as_os_str().is_empty() {
        return Err(anyhow!("Path is empty"));
    }
    Ok(normalized)
}

/// Joins a relative destination onto `root` after validating it.
///
/// If `root` exists, the deepest existing ancestor of the joined path is
/// canonicalized and must still lie within the canonical root; this rejects
/// destinations that traverse through a symlink pointing out of the root.
pub fn safe_join(root: &Path, destination: &str) -> Result<PathBuf> {
    let relative = normalize_relative(destination)?;
    let joined = root.join(&relative);

    if let Ok(canonical_root) = root.canonicalize() {
        let mut existing = joined.as_path();
        while !existing.exists() {
            match existing.parent() {
                Some(parent) => existing = parent,
                None => break,
            }
        }
        if let Ok(canonical) = existing.canonicalize()
            && !canonical.starts_with(&canonical_root)
        {
            return Err(anyhow!("Path '{}' escapes {}", destination, root.display()));
        }
    }

    Ok(joined)
}

/// Sanitizes a string for use as a single path component.
///
/// Characters outside `[A-Za-z0-9._-]` are replaced with `_`, and a leading
/// dot is replaced so the result is never hidden or a `.`/`..` entry.
pub fn sanitize_file_name(name: &str) -> String {
    let mut sanitized: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect();
    if sanitized.starts_with('.') {
        sanitized.replace_range(..1, "_");
    }
    if sanitized.is_empty() {
        sanitized.push('_');
    }
    sanitized
}
