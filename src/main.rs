//! cachito-worker entry point
//!
//! Parses arguments, runs the selected command and turns failures into a
//! readable message with a non-zero exit status.

use anyhow::Result;
use cachito_worker::cli;
use cachito_worker::core::user_friendly_error;
use clap::Parser;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = cli::Cli::parse();

    #[cfg(windows)]
    colored::control::set_virtual_terminal(true).ok();

    match cli.execute().await {
        Ok(()) => Ok(()),
        Err(e) => {
            user_friendly_error(e).display();
            std::process::exit(1);
        }
    }
}
