//! `validate-config`: check the worker configuration without starting work.

use anyhow::Result;
use clap::Args;
use colored::Colorize;
use serde::Serialize;
use std::path::Path;

use crate::config::WorkerConfig;
use crate::core::ErrorKind;

/// Output format for validation results.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text
    #[default]
    Text,
    /// JSON for scripts
    Json,
}

/// Load the worker configuration and run every startup check.
#[derive(Args, Debug)]
pub struct ValidateConfigCommand {
    /// Output format
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,
}

#[derive(Debug, Serialize)]
struct ValidationResult {
    valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    error_kind: Option<ErrorKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    shared_dir: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    sources_dir: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    scratch_dir: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    fetch_timeout_secs: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_parallel: Option<usize>,
}

impl ValidationResult {
    fn from_config(config: &WorkerConfig) -> Self {
        Self {
            valid: true,
            error_kind: None,
            error: None,
            shared_dir: Some(config.shared_dir.display().to_string()),
            sources_dir: Some(config.sources_dir.display().to_string()),
            scratch_dir: Some(config.scratch_dir.display().to_string()),
            fetch_timeout_secs: Some(config.fetch_timeout.as_secs()),
            max_parallel: Some(config.max_parallel),
        }
    }

    fn from_error(error: &anyhow::Error) -> Self {
        Self {
            valid: false,
            error_kind: Some(ErrorKind::of(error)),
            error: Some(format!("{error:#}")),
            shared_dir: None,
            sources_dir: None,
            scratch_dir: None,
            fetch_timeout_secs: None,
            max_parallel: None,
        }
    }
}

impl ValidateConfigCommand {
    /// Validate and report. Fails if the configuration is invalid.
    pub async fn execute(self, config_path: Option<&Path>) -> Result<()> {
        let outcome = match WorkerConfig::load(config_path).await {
            Ok(config) => config.validate().map(|()| config),
            Err(e) => Err(e),
        };

        match self.format {
            OutputFormat::Json => {
                let result = match &outcome {
                    Ok(config) => ValidationResult::from_config(config),
                    Err(e) => ValidationResult::from_error(e),
                };
                println!("{}", serde_json::to_string_pretty(&result)?);
            }
            OutputFormat::Text => {
                if let Ok(config) = &outcome {
                    println!("{} Worker configuration is valid", "✓".green());
                    println!("  Shared cache:  {}", config.shared_dir.display());
                    println!("  Sources:       {}", config.sources_dir.display());
                    println!("  Scratch:       {}", config.scratch_dir.display());
                    println!("  Fetch timeout: {}s", config.fetch_timeout.as_secs());
                    println!("  Parallelism:   {}", config.max_parallel);
                }
            }
        }

        outcome.map(|_| ())
    }
}
