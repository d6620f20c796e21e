//! Integration test suite for cachito-worker
//!
//! End-to-end tests running the worker against real git repositories on
//! disk and stand-in `go` executables. No network access is needed.
//!
//! # Running Integration Tests
//!
//! ```bash
//! cargo test --test integration
//! ```
//!
//! # Test Organization
//!
//! - **app_source**: source fetches, archive layout and cache copies
//! - **gomod_source**: Go module resolution and staging
//! - **worker_loop**: the `run` message loop through the binary
//! - **cli**: one-shot commands and config validation

// Shared test utilities (from parent tests/ directory)
#[path = "../common/mod.rs"]
mod common;

mod app_source;
mod cli;
#[cfg(unix)]
mod gomod_source;
mod worker_loop;
