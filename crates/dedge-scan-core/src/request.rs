//! Wire types exchanged with the scan backend.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Result, ScanError};

/// Body of `POST /integrations/scan-process/start`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanRequest {
    pub branch: String,
    pub commit: String,
    pub scm_provider: String,
    pub clone_url: String,
    pub url: String,
    pub scm_repository_id: i64,
    pub repository_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub asset_id: Option<String>,
}

impl ScanRequest {
    /// Check the fields the backend rejects when empty.
    pub fn validate(&self) -> Result<()> {
        let required = [
            ("branch", &self.branch),
            ("commit", &self.commit),
            ("scm_provider", &self.scm_provider),
            ("clone_url", &self.clone_url),
            ("url", &self.url),
            ("repository_name", &self.repository_name),
        ];
        for (field, value) in required {
            if value.trim().is_empty() {
                return Err(ScanError::InvalidRequest(field));
            }
        }
        Ok(())
    }
}

/// Identifier the backend assigns to a started scan.
///
/// Some backend versions return it as a number, others as a string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "RawScanId")]
pub struct ScanId(pub String);

#[derive(Deserialize)]
#[serde(untagged)]
enum RawScanId {
    Text(String),
    Number(serde_json::Number),
}

impl From<RawScanId> for ScanId {
    fn from(raw: RawScanId) -> Self {
        match raw {
            RawScanId::Text(s) => ScanId(s),
            RawScanId::Number(n) => ScanId(n.to_string()),
        }
    }
}

impl ScanId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ScanId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Response of the trigger endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct TriggerResponse {
    pub scan_id: ScanId,
}

/// Lifecycle status reported by the backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ScanStatus {
    InProgress,
    /// The only terminal status.
    Finished,
    Other(String),
}

impl ScanStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ScanStatus::Finished)
    }

    pub fn as_str(&self) -> &str {
        match self {
            ScanStatus::InProgress => "in-progress",
            ScanStatus::Finished => "finished",
            ScanStatus::Other(s) => s,
        }
    }
}

impl From<String> for ScanStatus {
    fn from(s: String) -> Self {
        match s.as_str() {
            "in-progress" => ScanStatus::InProgress,
            "finished" => ScanStatus::Finished,
            _ => ScanStatus::Other(s),
        }
    }
}

impl From<ScanStatus> for String {
    fn from(status: ScanStatus) -> Self {
        status.as_str().to_string()
    }
}

impl fmt::Display for ScanStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of a finished scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScanVerdict {
    Success,
    Failure,
    Unknown,
}

impl ScanVerdict {
    /// Anything other than `success`/`failure`, including no value, is `Unknown`.
    pub fn from_result(result: Option<&str>) -> Self {
        match result {
            Some("success") => ScanVerdict::Success,
            Some("failure") => ScanVerdict::Failure,
            _ => ScanVerdict::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ScanVerdict::Success => "success",
            ScanVerdict::Failure => "failure",
            ScanVerdict::Unknown => "unknown",
        }
    }
}

impl fmt::Display for ScanVerdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One response of `GET /integrations/scan-process/{scan_id}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanSnapshot {
    pub status: ScanStatus,
    #[serde(default)]
    pub result: Option<String>,
    #[serde(default)]
    pub report_link: Option<String>,
}

impl ScanSnapshot {
    /// The terminal outcome, if this snapshot is terminal.
    pub fn outcome(&self) -> Option<ScanOutcome> {
        self.status.is_terminal().then(|| ScanOutcome {
            verdict: ScanVerdict::from_result(self.result.as_deref()),
            report_link: self.report_link.clone(),
        })
    }
}

/// What a finished scan produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanOutcome {
    pub verdict: ScanVerdict,
    pub report_link: Option<String>,
}
