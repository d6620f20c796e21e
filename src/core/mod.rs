//! Core types for the Cachito worker
//!
//! This module holds the error taxonomy shared by every component. Each
//! component raises its own typed failure ([`SourceFetchError`],
//! [`CacheWriteError`], [`ResolutionError`]) wrapped in [`CachitoError`], and
//! the task layer folds any failure into an [`ErrorKind`] for the queue.
//!
//! # Error Handling Pattern
//!
//! ```rust
//! use cachito_worker::core::{CachitoError, ErrorKind};
//! use anyhow::{Context, Result};
//!
//! fn load() -> Result<()> {
//!     Err(CachitoError::Config { message: "shared_dir is missing".to_string() })
//!         .context("loading worker configuration")
//! }
//!
//! let err = load().unwrap_err();
//! assert_eq!(ErrorKind::of(&err), ErrorKind::Configuration);
//! ```

pub mod error;

pub use error::{
    CacheWriteError, CachitoError, ErrorContext, ErrorKind, ResolutionError, SourceFetchError,
    user_friendly_error,
};
