//! grafana-fetch server
//!
//! # Usage
//! ```bash
//! # Start with $HOME/grafana-fetch.yaml
//! grafana-fetch server
//!
//! # Start with a custom config and cache directory
//! grafana-fetch --config /etc/grafana-fetch.yaml server --cache /var/cache/grafana-fetch
//! ```

use anyhow::Context;
use clap::Parser;
use grafana_fetch::cli::{Cli, Command};
use grafana_fetch::{server, telemetry};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    telemetry::init(cli.log_format)?;

    match &cli.command {
        Command::Server(_) => server::run(&cli).await.context("grafana-fetch server failed")?,
    }

    Ok(())
}
