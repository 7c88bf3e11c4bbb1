//! End-to-end scan run: trigger, announce, poll, report.
//!
//! A run moves strictly forward through
//! `Start -> Triggering -> Triggered -> Polling -> Finished -> Reported`.
//! A failure while triggering or polling ends the run with that error;
//! comment and output failures are logged and the run continues.

use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use tracing::{error, info, warn};

use crate::client::{HttpScanClient, PollPolicy, ScanBackend};
use crate::config::{ActionConfig, EnvSnapshot};
use crate::context::{Provider, ScmContext};
use crate::error::{Result, ScanError};
use crate::messages;
use crate::notifier::Notifier;
use crate::outputs::{self, OutputSink};
use crate::request::{ScanId, ScanOutcome, ScanRequest};

/// Where a run currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunPhase {
    Start,
    Triggering,
    Triggered,
    Polling,
    Finished,
    Reported,
}

impl fmt::Display for RunPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RunPhase::Start => "start",
            RunPhase::Triggering => "triggering",
            RunPhase::Triggered => "triggered",
            RunPhase::Polling => "polling",
            RunPhase::Finished => "finished",
            RunPhase::Reported => "reported",
        };
        f.write_str(name)
    }
}

/// Summary of a completed run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunReport {
    pub scan_id: ScanId,
    pub outcome: ScanOutcome,
    /// Status requests made, including the terminal one.
    pub poll_attempts: u32,
    /// The result message that was announced.
    pub message: String,
    pub comments_posted: u32,
}

/// Configuration and context resolved from the environment, before any
/// network call.
#[derive(Debug, Clone)]
pub struct PreparedRun {
    pub context: ScmContext,
    pub config: ActionConfig,
    pub request: ScanRequest,
}

/// Resolve provider, configuration and scan request from `env`.
///
/// `provider` overrides detection. Fails on missing configuration or an
/// incomplete request.
pub fn prepare(env: &EnvSnapshot, provider: Option<Provider>) -> Result<PreparedRun> {
    let provider = match provider {
        Some(provider) => provider,
        None => Provider::detect(env)?,
    };
    let config = ActionConfig::from_env(provider, env)?;
    let context = ScmContext::from_env(provider, env)?;
    let request = context.scan_request(config.asset_id.clone());
    request.validate()?;

    info!(
        event = "run.prepared",
        provider = %provider,
        branch = %request.branch,
        commit = %request.commit,
        review = context.is_review_event(),
    );
    Ok(PreparedRun {
        context,
        config,
        request,
    })
}

/// Orchestrates one scan.
pub struct ScanRun {
    backend: Arc<dyn ScanBackend>,
    notifier: Notifier,
    outputs: Box<dyn OutputSink>,
    policy: PollPolicy,
}

impl ScanRun {
    pub fn new(
        backend: Arc<dyn ScanBackend>,
        notifier: Notifier,
        outputs: Box<dyn OutputSink>,
        policy: PollPolicy,
    ) -> Self {
        Self {
            backend,
            notifier,
            outputs,
            policy,
        }
    }

    /// Wire the HTTP backend, PR/MR notifier and CI outputs for `prepared`.
    pub fn from_prepared(prepared: &PreparedRun, env: &EnvSnapshot) -> Result<Self> {
        let backend = HttpScanClient::from_config(&prepared.config)?;
        let notifier = Notifier::for_context(
            &prepared.context,
            prepared.config.platform_token.as_deref(),
        )?;
        let outputs = outputs::output_sink(prepared.context.provider, env);
        Ok(Self::new(
            Arc::new(backend),
            notifier,
            outputs,
            prepared.config.poll.clone(),
        ))
    }

    /// Run the scan for `request` to completion.
    pub async fn execute(&self, request: &ScanRequest) -> Result<RunReport> {
        enter(RunPhase::Start);
        request.validate()?;

        enter(RunPhase::Triggering);
        let scan_id = self
            .backend
            .trigger_scan(request)
            .await
            .map_err(|e| failed(RunPhase::Triggering, e))?;
        println!("Scan ID: {scan_id}");
        self.export(outputs::SCAN_ID, scan_id.as_str());

        enter(RunPhase::Triggered);
        let mut comments_posted = 0;
        if self.notifier.announce(messages::TRIGGERED).await {
            comments_posted += 1;
        }

        enter(RunPhase::Polling);
        let report = self
            .backend
            .poll_scan_results(&scan_id, &self.policy)
            .await
            .map_err(|e| failed(RunPhase::Polling, e))?;

        enter(RunPhase::Finished);
        let outcome = report.outcome;
        println!("Scan status: {}", outcome.verdict);
        self.output(outputs::SCAN_STATUS, outcome.verdict.as_str());
        self.output(
            outputs::REPORT_LINK,
            outcome.report_link.as_deref().unwrap_or_default(),
        );

        let message = messages::result_message(&outcome);
        if self.notifier.announce(&message).await {
            comments_posted += 1;
        }

        enter(RunPhase::Reported);
        Ok(RunReport {
            scan_id,
            outcome,
            poll_attempts: report.attempts,
            message,
            comments_posted,
        })
    }

    fn export(&self, name: &str, value: &str) {
        if let Err(e) = self.outputs.export_variable(name, value) {
            warn!(event = "output.failed", name = %name, error = %e);
        }
    }

    fn output(&self, name: &str, value: &str) {
        if let Err(e) = self.outputs.set_output(name, value) {
            warn!(event = "output.failed", name = %name, error = %e);
        }
    }
}

fn enter(phase: RunPhase) {
    info!(event = "run.phase", phase = %phase);
}

fn failed(phase: RunPhase, err: ScanError) -> ScanError {
    error!(event = "run.failed", phase = %phase, error = %err);
    err
}
