//! `ftp-fetch`: command-line front end for the station file fetcher.

use std::io::{self, Write};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use chrono::Local;
use clap::Parser;
use colored::*;
use log::{debug, info};
use rust_ftp_fetch::audit::{self, AuditLogger};
use rust_ftp_fetch::batch::{self, BatchSummary};
use rust_ftp_fetch::{
    api, ConnectionManager, DownloadJob, DownloadScheduler, FetchConfig, ProgressKind, ProgressSnapshot, RunControl,
};

mod cli;

use cli::{Args, Command};

fn main() -> Result<()> {
    // Parse first so --help works without logger setup
    let args = Args::parse();

    // RUST_LOG wins over -v
    let default_level = match args.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level)).init();
    debug!("CLI arguments parsed: {:?}", args);

    let config = FetchConfig::load(&args.config)
        .with_context(|| format!("failed to load config {}", args.config.display()))?;

    match args.command {
        Command::Download => download(&config),
        Command::Retry => retry(&config),
        Command::Test => test(&config),
        Command::List { path } => list(&config, &path),
        Command::Failures => failures(&config),
    }
}

fn rule() {
    println!("{}", "=".repeat(80).blue());
}

fn banner(config: &FetchConfig, mode: &str) {
    rule();
    println!(
        "🚀 {} - Station File Fetcher v{}",
        "FTP".bold().green(),
        env!("CARGO_PKG_VERSION")
    );
    rule();
    println!("🌐 Server: {}", config.target().address().cyan());
    println!("📁 Local folder: {}", config.local_folder.cyan());
    println!("📋 Mode: {}", mode.cyan());
    println!("🕐 Started at: {}", Local::now().format("%Y-%m-%d %H:%M:%S"));
    rule();
}

/// Ctrl-C cancels the run; workers stop at their next chunk.
fn install_shutdown_handler(control: &RunControl) -> Result<()> {
    let control = control.clone();
    ctrlc::set_handler(move || {
        println!("{} Received shutdown signal, cancelling downloads...", "🛑".red());
        control.cancel();
    })
    .context("Error setting Ctrl-C handler")
}

fn print_progress(station: &str, snapshot: &ProgressSnapshot) {
    if snapshot.kind != ProgressKind::Batch {
        return;
    }
    eprint!(
        "\r[{}] {}/{} files, {:.1} MB",
        station.cyan(),
        snapshot.processed,
        snapshot.total,
        snapshot.bytes_received as f64 / 1_048_576.0
    );
    if snapshot.processed >= snapshot.total {
        eprintln!();
    }
    let _ = io::stderr().flush();
}

fn run_jobs(config: &FetchConfig, jobs: Vec<DownloadJob>) -> Result<()> {
    let control = RunControl::new();
    install_shutdown_handler(&control)?;

    let scheduler = DownloadScheduler::new(Arc::new(ConnectionManager::ftp()))
        .with_audit_log(Arc::new(AuditLogger::new(config.audit_path())))
        .with_hints(config.hints());

    let summary = batch::run_stations(&scheduler, &config.target(), jobs, &control, &print_progress);
    print_summary(&summary);

    if summary.cancelled {
        bail!("run cancelled");
    }
    Ok(())
}

fn print_summary(summary: &BatchSummary) {
    rule();
    for run in &summary.stations {
        match &run.result {
            Ok(report) if report.nothing_found() => {
                println!("{} {}: no files found in range", "⚠️".yellow(), run.station_id.bold());
            }
            Ok(report) => {
                println!(
                    "📊 {}: {} matched, {} downloaded, {} failed, {} skipped",
                    run.station_id.bold(),
                    report.matched,
                    report.downloaded.len().to_string().green(),
                    report.failed.len().to_string().red(),
                    report.skipped()
                );
                for filename in &report.failed {
                    println!("    {} {}", "❌".red(), filename);
                }
            }
            Err(msg) => println!("{} {}: {}", "❌".red(), run.station_id.bold(), msg.red()),
        }
    }
    rule();

    if summary.all_present() {
        println!("{} All files in range are already downloaded", "✅".green());
    }
    println!(
        "🎯 Total: {} downloaded, {} failed, {} skipped",
        summary.downloaded.to_string().green(),
        summary.failed.to_string().red(),
        summary.skipped
    );
    if summary.failed > 0 {
        println!("💡 Run {} to try the failed files again", "ftp-fetch retry".cyan());
    }
}

fn download(config: &FetchConfig) -> Result<()> {
    let jobs = config.jobs().context("invalid download settings")?;
    if jobs.is_empty() {
        bail!("no stations configured");
    }
    banner(config, "download");
    run_jobs(config, jobs)
}

fn retry(config: &FetchConfig) -> Result<()> {
    let audit = AuditLogger::new(config.audit_path());
    let username = audit::log_username(&config.username);
    let jobs = batch::retry_jobs(&audit, username, |station| config.job_for(station).ok())
        .context("cannot read download history")?;

    if jobs.is_empty() {
        println!("{} No failed files to retry", "✅".green());
        return Ok(());
    }
    banner(config, "retry");
    run_jobs(config, jobs)
}

fn test(config: &FetchConfig) -> Result<()> {
    info!("Testing connection to {}", config.target().address());
    let check = api::test_connection(&config.target());
    if !check.ok {
        println!("{} {}", "❌".red(), check.message.red());
        bail!("connection test failed");
    }
    println!("{} {}", "✅".green(), check.message.green());
    Ok(())
}

fn list(config: &FetchConfig, path: &str) -> Result<()> {
    let listing = api::list_remote_directory(&config.target(), path);
    if !listing.ok {
        println!("{} {}", "❌".red(), listing.message.red());
        bail!("listing {} failed", path);
    }
    for name in &listing.names {
        println!("  {}", name);
    }
    println!("📁 {}", listing.message.cyan());
    Ok(())
}

fn failures(config: &FetchConfig) -> Result<()> {
    let audit = AuditLogger::new(config.audit_path());
    let failures = audit
        .current_failures(audit::log_username(&config.username))
        .context("cannot read download history")?;

    if failures.is_empty() {
        println!("{} No failed files recorded", "✅".green());
        return Ok(());
    }

    println!("{:<20} {:<12} {:<28} {}", "WHEN", "STATION", "FILE", "REASON");
    for entry in &failures {
        println!(
            "{:<20} {:<12} {:<28} {}",
            entry.timestamp,
            entry.station_id,
            entry.filename,
            entry.message.red()
        );
    }
    println!("{} {} file(s) currently failed", "❌".red(), failures.len());
    Ok(())
}
