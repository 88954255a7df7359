use anyhow::{Result, bail};
use capture_core::CaptureId;
use clap::Args;
use colored::Colorize;
use pipeline::OperatorApi;

use super::OutputArgs;
use crate::output;

#[derive(Args)]
pub struct StatusArgs {
    #[arg(help = "Capture id")]
    pub id: String,

    #[arg(long, help = "Output as JSON")]
    pub json: bool,

    #[arg(long, help = "Include stored content")]
    pub verbose: bool
}

pub async fn status(operator: &OperatorApi, args: StatusArgs) -> Result<()> {
    let id = CaptureId::new(args.id);
    let Some(report) = operator.status(&id).await? else {
        bail!("No capture with id {id}");
    };

    if args.json {
        return output::json(&report);
    }

    let capture = &report.capture;
    output::header(&format!("Capture {}", capture.id));
    output::field("status", output::status(capture.status));
    output::field("source", capture.source);
    output::field("external_id", &capture.external_id);
    output::field(
        "identity",
        capture
            .content_identity
            .as_ref()
            .map_or_else(|| "(unbound)".dimmed().to_string(), ToString::to_string)
    );
    output::field("discovered_at", output::timestamp(capture.discovered_at));
    output::field("updated_at", output::timestamp(capture.updated_at));
    if capture.is_placeholder {
        output::field("placeholder", "yes".yellow());
    }
    if let Some(reason) = &capture.quarantine_reason {
        output::field("quarantined", reason.red());
    }
    if report.dead_lettered {
        output::field("dead_lettered", "yes".red());
    }

    println!();
    output::subheader("Exports:");
    if report.exports.is_empty() {
        println!("  {}", "(none)".dimmed());
    }
    for record in &report.exports {
        let target = record.destination_path.as_deref().unwrap_or("-");
        match &record.duplicate_of {
            Some(owner) => println!("  {:<14} {target} (duplicate of {owner})", record.mode),
            None => println!("  {:<14} {target}", record.mode)
        }
    }

    println!();
    output::subheader("Errors:");
    if report.errors.is_empty() {
        println!("  {}", "(none)".dimmed());
    }
    for event in &report.errors {
        let escalation = event
            .escalation_action
            .map(|action| format!(" -> {action}"))
            .unwrap_or_default();
        println!(
            "  #{:<3} {:<10} {:<30} {}{}",
            event.attempt_number,
            event.stage,
            event.error_kind,
            event.message,
            escalation.yellow()
        );
    }

    if args.verbose {
        println!();
        output::subheader("Content:");
        println!("{}", capture.raw_content.as_deref().unwrap_or_default());
    }

    if report.dead_lettered || capture.quarantine_reason.is_some() {
        println!();
        output::hint(&format!("capture-ledger reset {} once the cause is fixed", capture.id));
    }
    Ok(())
}

pub async fn quarantined(operator: &OperatorApi, args: OutputArgs) -> Result<()> {
    let captures = operator.list_quarantined().await?;
    if args.json {
        return output::json(&captures);
    }

    output::header("Quarantined captures");
    if captures.is_empty() {
        println!("  {}", "(none)".dimmed());
    }
    for capture in &captures {
        println!(
            "  {}  {:<6} {}",
            capture.id.as_str().cyan(),
            capture.source,
            capture.quarantine_reason.as_deref().unwrap_or_default()
        );
    }
    Ok(())
}

pub async fn dead_letters(operator: &OperatorApi, args: OutputArgs) -> Result<()> {
    let letters = operator.list_dead_lettered().await?;
    if args.json {
        return output::json(&letters);
    }

    output::header("Dead-lettered captures");
    if letters.is_empty() {
        println!("  {}", "(none)".dimmed());
    }
    for letter in &letters {
        println!(
            "  {}  {:<10} {:<22} {}",
            letter.capture.id.as_str().cyan(),
            letter.event.stage,
            letter.event.error_kind,
            letter.event.message
        );
    }
    Ok(())
}

pub async fn stats(operator: &OperatorApi, args: OutputArgs) -> Result<()> {
    let stats = operator.ledger_stats().await?;
    if args.json {
        return output::json(&stats);
    }

    output::header("Ledger");
    for (status, count) in &stats.by_status {
        output::field(status, count);
    }
    println!();
    output::field("dead_lettered", stats.dead_lettered);
    output::field("export_records", stats.export_records);
    output::field("error_events", stats.error_events);
    Ok(())
}
