use std::path::PathBuf;

use clap::Parser;
use sink_telemetry::tracing::init_tracing;

use crate::config::load_target_config;
use crate::core::start_target;

mod config;
mod core;

/// Loads a stream of SCHEMA, RECORD and STATE messages read from stdin into PostgreSQL.
#[derive(Debug, Parser)]
#[command(version, about)]
struct Args {
    /// Configuration file in JSON or YAML format.
    ///
    /// Without it, `configuration/base.yaml` and `configuration/{APP_ENVIRONMENT}.yaml` are
    /// loaded from the working directory.
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let _log_flusher = init_tracing(env!("CARGO_BIN_NAME"))?;

    let config = load_target_config(args.config.as_deref())?;
    start_target(config).await?;

    Ok(())
}
