//! Error types for dedge-scan-core

use std::time::Duration;

use thiserror::Error;

/// Errors that can occur while running a scan from CI
#[derive(Error, Debug)]
pub enum ScanError {
    /// A required CI or configuration variable is absent or blank
    #[error("Required variable {0} is not set")]
    MissingVariable(String),

    /// A variable is present but cannot be interpreted
    #[error("Invalid value for {name}: {reason}")]
    InvalidVariable { name: String, reason: String },

    /// Neither GitHub Actions nor GitLab CI was detected
    #[error("Unsupported CI environment: expected GITHUB_ACTIONS or GITLAB_CI to be \"true\"")]
    UnsupportedEnvironment,

    /// The scan request is missing a field the backend requires
    #[error("Invalid scan request: {0} must not be empty")]
    InvalidRequest(&'static str),

    /// The HTTP client could not be constructed
    #[error("HTTP client setup failed: {0}")]
    Client(String),

    /// The scan could not be started
    #[error("Failed to trigger scan: {0}")]
    Trigger(String),

    /// The scan status could not be retrieved
    #[error("Failed to poll scan results: {0}")]
    Poll(String),

    /// The backend never reported a terminal status within the poll policy
    #[error("Scan {scan_id} did not finish after {attempts} poll(s) in {elapsed:?}")]
    PollTimeout {
        scan_id: String,
        attempts: u32,
        elapsed: Duration,
    },

    /// Posting a PR/MR comment failed
    #[error("Failed to post comment: {0}")]
    Comment(String),

    /// Writing a CI output variable failed
    #[error("Failed to write output {name}: {reason}")]
    Output { name: String, reason: String },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing error
    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ScanError {
    /// Whether this error aborts the run.
    ///
    /// Comment and output failures are reported but never change the outcome.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, ScanError::Comment(_) | ScanError::Output { .. })
    }

    /// Process exit code for this error.
    pub fn exit_code(&self) -> u8 {
        if self.is_fatal() {
            1
        } else {
            0
        }
    }
}

/// Result type for scan operations.
pub type Result<T> = std::result::Result<T, ScanError>;
