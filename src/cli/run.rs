//! `run`: the long-running worker mode.

use anyhow::Result;
use clap::Args;
use std::path::Path;
use tokio::io::BufReader;

use crate::config::WorkerConfig;
use crate::worker::Worker;

/// Consume task messages from stdin, one JSON object per line.
///
/// One report line is written to stdout per message. The command exits when
/// stdin closes and every accepted task has finished, or on Ctrl-C.
#[derive(Args, Debug)]
pub struct RunCommand {
    /// Override the configured number of concurrent tasks
    #[arg(long, value_parser = clap::value_parser!(u16).range(1..))]
    max_parallel: Option<u16>,
}

impl RunCommand {
    /// Run the worker loop.
    pub async fn execute(self, config_path: Option<&Path>) -> Result<()> {
        let mut config = WorkerConfig::load(config_path).await?;
        if let Some(max_parallel) = self.max_parallel {
            config.max_parallel = usize::from(max_parallel);
        }
        config.validate()?;

        let broker_host = config
            .broker_url
            .as_deref()
            .and_then(|u| url::Url::parse(u).ok())
            .and_then(|u| u.host_str().map(str::to_string));
        if let Some(host) = broker_host {
            tracing::info!("Broker configured at {host}; reading messages from stdin");
        }

        let worker = Worker::new(std::sync::Arc::new(config));
        let summary = worker.run(BufReader::new(tokio::io::stdin()), tokio::io::stdout()).await?;
        tracing::debug!("{summary:?}");
        Ok(())
    }
}
