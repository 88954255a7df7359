use anyhow::{Context, Result};
use clap::Parser;
use config::ObservabilityConfig;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

mod commands;
mod output;

use commands::{Cli, Commands};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = config::load(cli.config.as_deref()).context("Failed to load configuration")?;
    init_tracing(&config.observability);

    let operator = commands::open_operator(&config).await?;
    match cli.command {
        Commands::Status(args) => commands::inspect::status(&operator, args).await,
        Commands::Quarantined(args) => commands::inspect::quarantined(&operator, args).await,
        Commands::DeadLetters(args) => commands::inspect::dead_letters(&operator, args).await,
        Commands::Reset(args) => commands::reset::run(&operator, args).await,
        Commands::Stats(args) => commands::inspect::stats(&operator, args).await
    }
}

/// Logs go to stderr so JSON output on stdout stays parseable. `RUST_LOG`
/// takes precedence over the configured level.
fn init_tracing(observability: &ObservabilityConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&observability.logging_level));
    let registry = tracing_subscriber::registry().with(filter);

    if observability.json_logs {
        registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}
