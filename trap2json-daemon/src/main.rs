//! trap2json daemon entrypoint.
//!
//! Two modes:
//! - default: run the pipeline over stdin (fed by snmptrapd)
//! - `--generate <path>`: write the snmptrapd configuration and exit

use anyhow::{Context, Result};
use clap::Parser as _;

use trap2json_daemon::cli::Cli;
use trap2json_daemon::config::AppConfig;
use trap2json_daemon::{logging, metrics_server, supervisor};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // The subscriber can only be installed once, so the configuration
    // is loaded first; load errors still reach stderr through anyhow.
    let config =
        AppConfig::load(&cli.config).context("failed reading environment/configuration file")?;
    logging::init_tracing(&config.logger)?;

    if let Some(path) = &cli.generate {
        tracing::info!(path = %path.display(), "generating snmptrapd.conf file");
        config
            .snmptrapd
            .serialize(path)
            .context("failed generating snmptrapd.conf file")?;
        return Ok(());
    }

    if config.prometheus.enable {
        metrics_server::install_metrics_recorder(&config.prometheus)?;
    }
    supervisor::load_mibs();

    tracing::info!("starting trap2json");
    supervisor::run(config, tokio::io::stdin(), !cli.no_snmptrapd).await
}
