//! dedge-scan-core: DEDGE security scans from CI
//!
//! Reads the commit context of a GitHub Actions or GitLab CI job, starts a
//! scan on the DEDGE backend, polls it to completion, and reports the
//! result on the triggering pull/merge request.
//!
//! ## Flow
//!
//! [`prepare`] resolves configuration and the [`ScanRequest`] without
//! touching the network; [`ScanRun::execute`] then triggers, polls and
//! reports.

pub mod client;
pub mod config;
pub mod context;
pub mod error;
pub mod fakes;
pub mod messages;
pub mod notifier;
pub mod outputs;
pub mod request;
pub mod runner;
pub mod telemetry;

#[cfg(test)]
pub(crate) mod test_http;

pub use client::{poll_until_finished, HttpScanClient, PollPolicy, PollReport, ScanBackend};
pub use config::{ActionConfig, EnvSnapshot};
pub use context::{Provider, ReviewTarget, ScmContext};
pub use error::{Result, ScanError};
pub use notifier::{CommentSink, GitHubComments, GitLabNotes, Notifier};
pub use outputs::{DotenvOutputs, GitHubOutputs, OutputSink};
pub use request::{ScanId, ScanOutcome, ScanRequest, ScanSnapshot, ScanStatus, ScanVerdict};
pub use runner::{prepare, PreparedRun, RunPhase, RunReport, ScanRun};
pub use telemetry::init_tracing;
