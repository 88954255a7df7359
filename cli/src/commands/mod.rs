pub mod inspect;
pub mod reset;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use config::PipelineConfig;
use pipeline::OperatorApi;
use storage::StagingLedger;

#[derive(Parser)]
#[command(
    name = "capture-ledger",
    author,
    version,
    about = "Inspect and repair the capture staging ledger",
    long_about = "Read-only queries over the staging ledger plus the one write an operator \
                  may perform: returning a quarantined or dead-lettered capture to the \
                  pending set.\n\nThe ledger location comes from the configuration file \
                  and CAPTURE_* environment variables."
)]
pub struct Cli {
    #[arg(
        long,
        short,
        global = true,
        env = "CAPTURE_CONFIG",
        help = "Configuration file (TOML or YAML)"
    )]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands
}

#[derive(Subcommand)]
pub enum Commands {
    #[command(about = "Show one capture with its exports and error history")]
    Status(inspect::StatusArgs),

    #[command(about = "List quarantined captures")]
    Quarantined(OutputArgs),

    #[command(name = "dead-letters", about = "List captures halted for manual action")]
    DeadLetters(OutputArgs),

    #[command(about = "Return a capture to the pending set")]
    Reset(reset::ResetArgs),

    #[command(about = "Count captures per status")]
    Stats(OutputArgs)
}

#[derive(Args)]
pub struct OutputArgs {
    #[arg(long, help = "Output as JSON")]
    pub json: bool
}

pub async fn open_operator(config: &PipelineConfig) -> Result<OperatorApi> {
    let ledger = StagingLedger::connect(
        &config.ledger.database_url,
        Duration::from_secs(config.ledger.busy_timeout_seconds)
    )
    .await
    .with_context(|| format!("Failed to open ledger at {}", config.ledger.database_url))?;
    Ok(OperatorApi::new(Arc::new(ledger)))
}
