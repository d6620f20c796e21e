//! Worker configuration loading and validation.
//!
//! The lookup order is documented on [`WorkerConfig::load`].

mod worker;

pub use worker::{GomodConfig, GomodConfigFile, WorkerConfig, WorkerConfigFile};
