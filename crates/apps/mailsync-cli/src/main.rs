//! Mailsync - Declarative hosted mail reconciliation
//!
//! This is the main entry point for the mailsync command-line tool.

mod cli;

use anyhow::{Context, Result};
use clap::Parser;
use log::{error, info, warn};
use std::path::PathBuf;

use cli::{Cli, Commands};
use mailsync::{
    CandidateSet, DesiredState, Orchestrator, RackspaceClient, SplitLedger, StopSignal, SyncConfig,
    SyncOptions, SyncReport, hosted_mail_mappings,
};

/// Ledger filename inside the config directory
const LEDGER_FILE: &str = "ledger.json";

fn main() {
    // Initialize logging
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    // Bootstrap config directory
    if let Err(e) = config::init() {
        error!("Failed to initialize config directory: {}", e);
    }

    match run() {
        Ok(true) => {}
        Ok(false) => std::process::exit(1),
        Err(e) => {
            error!("{:#}", e);
            std::process::exit(2);
        }
    }
}

/// Run one pass; returns whether the report came back clean
fn run() -> Result<bool> {
    let cli = Cli::parse();

    let sync_config = SyncConfig::load(cli.config.as_deref())?;
    let mappings = hosted_mail_mappings().context("Invalid mapping tables")?;
    let desired = DesiredState::load(&sync_config, &mappings)?;
    info!(
        "Loaded {} desired resource(s) across {} domain(s)",
        desired.len(),
        desired.domains().len()
    );

    let ledger_path = cli.ledger.clone().unwrap_or_else(default_ledger_path);
    let mut ledger = SplitLedger::load(&ledger_path)
        .with_context(|| format!("Failed to load ledger {}", ledger_path.display()))?;

    let mut client = RackspaceClient::connect(&sync_config);
    let options = SyncOptions {
        dry_run: cli.dry_run,
    };
    let mut orchestrator = Orchestrator::new(&mut client, &mappings, options);
    install_interrupt_handler(orchestrator.stop_signal());

    let report = match &cli.command {
        Commands::Full => orchestrator.full_sync(&desired),
        Commands::Incremental { candidates } => {
            let candidates = if candidates.is_empty() {
                ledger.changed(&desired)
            } else {
                CandidateSet::parse(candidates.iter().map(String::as_str))
                    .context("Invalid candidate")?
            };
            if candidates.is_empty() {
                info!("Nothing changed since the last recorded run");
            }
            orchestrator.incremental_sync(&desired, &candidates)
        }
    };

    print_report(&report, cli.json)?;

    if !report.dry_run {
        ledger.record(&desired, &report);
        ledger
            .save(&ledger_path)
            .with_context(|| format!("Failed to save ledger {}", ledger_path.display()))?;
    }

    Ok(report.is_clean())
}

/// Ctrl+C ends the run after the resource in flight instead of killing it mid-write
fn install_interrupt_handler(stop: StopSignal) {
    let result = ctrlc::set_handler(move || {
        warn!("Interrupted, stopping after the current resource");
        stop.stop();
    });
    if let Err(e) = result {
        warn!("Failed to install interrupt handler: {}", e);
    }
}

fn default_ledger_path() -> PathBuf {
    config::config_path(LEDGER_FILE).unwrap_or_else(|| PathBuf::from(LEDGER_FILE))
}

fn print_report(report: &SyncReport, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
    } else {
        println!("{}", report);
    }
    Ok(())
}
