//! Filesystem and platform utilities
//!
//! # Modules
//!
//! - [`fs`] - Atomic publish primitive, checksums and scratch directories
//! - [`path_validation`] - Traversal checks for caller-supplied destinations
//! - [`platform`] - Binary lookup, path expansion and default locations

pub mod fs;
pub mod path_validation;
pub mod platform;

pub use fs::{ScratchDir, atomic_copy, atomic_write, calculate_checksum, ensure_dir, publish_with};
pub use platform::{get_git_command, resolve_path};
