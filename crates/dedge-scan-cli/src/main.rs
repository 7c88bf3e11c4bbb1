//! dedge-scan - DEDGE security scans from CI
//!
//! Run as a GitHub Action or a GitLab CI job step. Without a subcommand the
//! binary performs a full scan run for the current commit.
//!
//! ## Commands
//!
//! - `run`: trigger a scan, poll it, and report on the PR/MR (default)
//! - `payload`: print the scan request derived from the CI environment
//! - `status`: fetch the current status of a scan once

use std::process::ExitCode;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use dedge_scan_core::config::{API_TOKEN, HOST_URL};
use dedge_scan_core::{
    prepare, EnvSnapshot, HttpScanClient, PollPolicy, Provider, ScanBackend, ScanError, ScanId,
    ScanRun,
};
use tracing::{error, info, Level};

#[derive(Parser)]
#[command(name = "dedge-scan")]
#[command(author = "Stevedores Org")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Run DEDGE security scans from GitHub Actions or GitLab CI", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    /// CI provider to assume instead of detecting it
    #[arg(long, global = true, value_enum)]
    provider: Option<ProviderArg>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum ProviderArg {
    Github,
    Gitlab,
}

impl From<ProviderArg> for Provider {
    fn from(arg: ProviderArg) -> Self {
        match arg {
            ProviderArg::Github => Provider::GitHub,
            ProviderArg::Gitlab => Provider::GitLab,
        }
    }
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
enum Commands {
    /// Trigger a scan for the current commit and wait for its result
    Run {
        /// Seconds to wait after the first non-terminal status
        #[arg(long)]
        poll_interval: Option<u64>,

        /// Maximum number of status requests
        #[arg(long)]
        max_attempts: Option<u32>,

        /// Give up polling after this many seconds
        #[arg(long)]
        timeout: Option<u64>,
    },

    /// Print the scan request JSON without contacting the backend
    Payload,

    /// Fetch the current status of a scan
    Status {
        /// Scan ID returned when the scan was triggered
        scan_id: String,
    },
}

impl Default for Commands {
    fn default() -> Self {
        Commands::Run {
            poll_interval: None,
            max_attempts: None,
            timeout: None,
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    dedge_scan_core::init_tracing(cli.json, level);

    let env = EnvSnapshot::capture();
    let provider = cli.provider.map(Provider::from);

    let result = match cli.command.unwrap_or_default() {
        Commands::Run {
            poll_interval,
            max_attempts,
            timeout,
        } => cmd_run(&env, provider, poll_interval, max_attempts, timeout).await,
        Commands::Payload => cmd_payload(&env, provider),
        Commands::Status { scan_id } => cmd_status(&env, &scan_id).await,
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(error = %format!("{err:#}"), "dedge-scan failed");
            eprintln!("Action failed with error: {err:#}");
            ExitCode::from(exit_code(&err))
        }
    }
}

/// Exit status for a failed command; always non-zero.
fn exit_code(err: &anyhow::Error) -> u8 {
    match err.downcast_ref::<ScanError>() {
        Some(scan_err) if scan_err.is_fatal() => scan_err.exit_code(),
        _ => 1,
    }
}

/// Apply command-line overrides on top of the configured poll policy.
fn apply_poll_overrides(
    policy: &mut PollPolicy,
    poll_interval: Option<u64>,
    max_attempts: Option<u32>,
    timeout: Option<u64>,
) {
    if let Some(secs) = poll_interval {
        policy.interval = Duration::from_secs(secs);
    }
    if let Some(attempts) = max_attempts {
        policy.max_attempts = attempts;
    }
    if let Some(secs) = timeout {
        policy.timeout = Some(Duration::from_secs(secs));
    }
}

/// Trigger, poll and report
async fn cmd_run(
    env: &EnvSnapshot,
    provider: Option<Provider>,
    poll_interval: Option<u64>,
    max_attempts: Option<u32>,
    timeout: Option<u64>,
) -> Result<()> {
    let mut prepared = prepare(env, provider).context("Invalid CI configuration")?;
    apply_poll_overrides(&mut prepared.config.poll, poll_interval, max_attempts, timeout);
    info!(config = ?prepared.config, "starting scan run");

    let run = ScanRun::from_prepared(&prepared, env)?;
    let report = run.execute(&prepared.request).await?;

    info!(
        event = "run.completed",
        scan_id = %report.scan_id,
        result = %report.outcome.verdict,
        poll_attempts = report.poll_attempts,
        comments_posted = report.comments_posted,
    );
    Ok(())
}

/// Print the request that `run` would send
fn cmd_payload(env: &EnvSnapshot, provider: Option<Provider>) -> Result<()> {
    let prepared = prepare(env, provider).context("Invalid CI configuration")?;
    println!("{}", serde_json::to_string_pretty(&prepared.request)?);
    Ok(())
}

/// One status request, printed as JSON
async fn cmd_status(env: &EnvSnapshot, scan_id: &str) -> Result<()> {
    let api_token = env.require_input(API_TOKEN)?;
    let host_url = env.require_input(HOST_URL)?;

    let client = HttpScanClient::new(host_url, api_token)?;
    let snapshot = client
        .fetch_status(&ScanId(scan_id.to_string()))
        .await
        .with_context(|| format!("Failed to fetch status of scan {scan_id}"))?;

    println!("{}", serde_json::to_string_pretty(&snapshot)?);
    Ok(())
}
