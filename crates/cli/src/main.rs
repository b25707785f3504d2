//! Runwright CLI - Main Entry Point
//!
//! Submits browser test runs to a Runwright daemon, follows their progress
//! and prints the resulting reports.

use anyhow::Result;
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

mod client;
mod output;

use client::{ApiClient, ReportFetch};
use output::OutputFormat;

/// Runwright CLI - browser end-to-end test runs on demand
#[derive(Parser)]
#[command(name = "runwright")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Daemon address
    #[arg(
        long,
        env = "RUNWRIGHT_SERVER",
        default_value_t = runwright_common::default_server_url(),
        global = true
    )]
    server: String,

    /// Output format
    #[arg(long, default_value = "table", global = true)]
    format: OutputFormat,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start a test run against a URL
    Submit {
        /// Target URL (http or https)
        url: String,

        /// Browser agent to run (chromium, firefox, webkit); repeatable, all when omitted
        #[arg(short, long = "agent")]
        agents: Vec<String>,

        /// Follow the run and print its report
        #[arg(short, long)]
        wait: bool,

        /// Poll interval while waiting, in milliseconds
        #[arg(long, default_value = "1000")]
        interval_ms: u64,
    },

    /// Show run progress
    Status { run_id: String },

    /// Show the report of a finished run
    Report { run_id: String },

    /// Cancel a running run
    Cancel { run_id: String },

    /// Follow a run until it finishes, then print its report
    Wait {
        run_id: String,

        /// Poll interval in milliseconds
        #[arg(long, default_value = "1000")]
        interval_ms: u64,
    },

    /// Check daemon health
    Health,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let client = ApiClient::new(&cli.server)?;
    let format = cli.format;

    let failed = match cli.command {
        Commands::Submit {
            url,
            agents,
            wait,
            interval_ms,
        } => {
            let agents = (!agents.is_empty()).then_some(agents);
            let resp = client.submit(&url, agents).await?;
            tracing::debug!("Submitted run {}", resp.run_id);

            if wait {
                if format == OutputFormat::Table {
                    output::print_info(&format!("Run {} started", resp.run_id));
                }
                follow(&client, &resp.run_id.to_string(), interval_ms, format).await?
            } else {
                output::print_item(&resp, format);
                false
            }
        }
        Commands::Status { run_id } => {
            let status = client.status(&run_id).await?;
            output::print_item(&status, format);
            false
        }
        Commands::Report { run_id } => match client.report(&run_id).await? {
            ReportFetch::Ready(report) => {
                output::print_report(&report, format);
                report.has_failures()
            }
            ReportFetch::StillRunning => {
                output::print_message("Test still running", format);
                false
            }
        },
        Commands::Cancel { run_id } => {
            let resp = client.cancel(&run_id).await?;
            match format {
                OutputFormat::Table => output::print_success(&resp.message),
                _ => output::print_message(&resp.message, format),
            }
            false
        }
        Commands::Wait {
            run_id,
            interval_ms,
        } => follow(&client, &run_id, interval_ms, format).await?,
        Commands::Health => match client.health().await {
            Ok(health) => {
                match format {
                    OutputFormat::Json => println!("{}", health),
                    _ => output::print_success(&format!(
                        "Daemon is {} at {}",
                        health["status"].as_str().unwrap_or("up"),
                        client.base()
                    )),
                }
                false
            }
            Err(e) => {
                output::print_error(&format!("{:#}", e));
                true
            }
        },
    };

    if failed {
        std::process::exit(1);
    }
    Ok(())
}

/// Poll a run until it finishes, then print its report. Returns whether the
/// report contains failures.
async fn follow(
    client: &ApiClient,
    run_id: &str,
    interval_ms: u64,
    format: OutputFormat,
) -> Result<bool> {
    let bar = if format == OutputFormat::Table {
        let bar = ProgressBar::new(100);
        bar.set_style(ProgressStyle::with_template(
            "{spinner:.green} [{bar:40.cyan/blue}] {pos:>3}% {msg}",
        )?);
        bar.enable_steady_tick(Duration::from_millis(120));
        bar
    } else {
        ProgressBar::hidden()
    };

    let interval = Duration::from_millis(interval_ms.max(50));
    loop {
        let status = client.status(run_id).await?;
        bar.set_position(u64::from(status.progress));
        bar.set_message(status.phase.to_string());
        if status.completed {
            break;
        }
        tokio::time::sleep(interval).await;
    }
    bar.finish_and_clear();

    match client.report(run_id).await? {
        ReportFetch::Ready(report) => {
            output::print_report(&report, format);
            Ok(report.has_failures())
        }
        ReportFetch::StillRunning => anyhow::bail!("run {} finished without a report", run_id),
    }
}
