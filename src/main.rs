//! Verify Conformance CLI
//!
//! Runs conformance PR verification once, on a schedule, or for a replayed
//! webhook event.

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;

use verify_conformance::error::{Error, Result};
use verify_conformance::search::parse_repo;
use verify_conformance::{
    Config, IssueCommentEvent, PassReport, PrRef, Processor, PullRequestEvent, ScanReport,
};

#[derive(Parser)]
#[command(name = "verify-conformance")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Verify Kubernetes conformance submission pull requests", long_about = None)]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(
        short,
        long,
        global = true,
        env = "VERIFY_CONFORMANCE_CONFIG",
        default_value = "verify-conformance.toml"
    )]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Process every open PR in scope
    Scan {
        /// Keep scanning every `scan.interval_secs`
        #[arg(long)]
        watch: bool,
    },

    /// Process a single PR
    Pr {
        /// Repository as org/repo
        repo: String,

        /// Pull request number
        number: u64,
    },

    /// Replay a webhook payload
    Event {
        /// Webhook event type
        #[arg(value_enum)]
        kind: EventKind,

        /// Path to the JSON payload
        payload: PathBuf,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum EventKind {
    PullRequest,
    IssueComment,
}

#[tokio::main]
async fn main() -> ExitCode {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    match run(cli).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            tracing::error!(error = %e, "verify-conformance failed");
            eprintln!("error: {}", e);
            ExitCode::FAILURE
        }
    }
}

/// Runs the requested command. `Ok(false)` means work completed but reported errors.
async fn run(cli: Cli) -> Result<bool> {
    // Load configuration
    let config = Config::load(&cli.config)?;
    let processor = Processor::from_config(&config)?;

    match cli.command {
        Commands::Scan { watch: false } => Ok(print_scan(&processor.handle_all().await?)),
        Commands::Scan { watch: true } => {
            // First tick fires immediately
            let mut interval = tokio::time::interval(config.scan.interval());
            loop {
                interval.tick().await;
                match processor.handle_all().await {
                    Ok(report) => {
                        print_scan(&report);
                    }
                    // Keep watching; the next tick retries
                    Err(e) => tracing::error!(error = %e, "scan failed"),
                }
            }
        }
        Commands::Pr { repo, number } => {
            let (org, repo) = parse_repo(&repo)
                .ok_or_else(|| Error::Config(format!("'{}' is not of the form org/repo", repo)))?;
            let report = processor.process_pr(&PrRef::new(org, repo, number)).await?;
            print_pass(&report);
            Ok(true)
        }
        Commands::Event { kind, payload } => {
            let report = match kind {
                EventKind::PullRequest => {
                    let event: PullRequestEvent = read_payload(&payload)?;
                    processor.handle_pull_request_event(&event).await?
                }
                EventKind::IssueComment => {
                    let event: IssueCommentEvent = read_payload(&payload)?;
                    processor.handle_issue_comment_event(&event).await?
                }
            };
            match report {
                Some(report) => print_pass(&report),
                None => println!("event ignored"),
            }
            Ok(true)
        }
    }
}

fn read_payload<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let contents = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&contents)?)
}

fn print_pass(report: &PassReport) {
    println!("{}: {}", report.pr, report.stage.as_str());
    if !report.delta.labels_added.is_empty() {
        println!("  labels added:   {}", report.delta.labels_added.join(", "));
    }
    if !report.delta.labels_removed.is_empty() {
        println!("  labels removed: {}", report.delta.labels_removed.join(", "));
    }
    if report.delta.comment_posted.is_some() {
        println!("  comment posted");
    }
    if let Some(state) = report.delta.status_set {
        println!("  status set:     {}", state.as_str());
    }
}

/// Prints a scan summary and returns true if no PR failed.
fn print_scan(report: &ScanReport) -> bool {
    println!("\n{}", "=".repeat(60));
    println!("Scan Complete: {}", report.run_id);
    println!("{}", "=".repeat(60));
    for pass in &report.processed {
        print_pass(pass);
    }
    for (pr, error) in &report.failed {
        println!("{}: error: {}", pr, error);
    }
    println!();
    println!(
        "Processed: {}  Failed: {}",
        report.processed.len(),
        report.failed.len()
    );
    report.is_clean()
}
