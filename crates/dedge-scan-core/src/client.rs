//! Scan backend client.
//!
//! Starts a scan with a single POST and follows it with status GETs until
//! the backend reports `finished`. Neither call is retried: a transport
//! failure or non-2xx response ends the run. The poll loop itself is
//! bounded by a [`PollPolicy`] and backs off geometrically between
//! non-terminal responses.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Url;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, info};

use crate::config::{ActionConfig, HOST_URL};
use crate::error::{Result, ScanError};
use crate::request::{ScanId, ScanOutcome, ScanRequest, ScanSnapshot, TriggerResponse};

/// Header carrying the backend API key.
pub const API_KEY_HEADER: &str = "X-API-Key";

const SCAN_PROCESS_PATH: [&str; 2] = ["integrations", "scan-process"];
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Bounds and pacing of the status poll loop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PollPolicy {
    /// Delay after the first non-terminal response.
    pub interval: Duration,
    /// Upper bound for the grown delay.
    pub max_interval: Duration,
    /// Growth factor applied per non-terminal response (values below 1 act as 1).
    pub multiplier: f64,
    /// Maximum number of status requests (at least 1 is always made).
    pub max_attempts: u32,
    /// Overall wall-clock bound for the loop.
    pub timeout: Option<Duration>,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(15),
            max_interval: Duration::from_secs(60),
            multiplier: 1.5,
            max_attempts: 240,
            timeout: None,
        }
    }
}

impl PollPolicy {
    /// Constant delay between polls.
    pub fn fixed(interval: Duration, max_attempts: u32) -> Self {
        Self {
            interval,
            max_interval: interval,
            multiplier: 1.0,
            max_attempts,
            timeout: None,
        }
    }

    /// Delay to wait after the `attempt`-th (1-based) non-terminal response.
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let cap = self.max_interval.max(self.interval).as_secs_f64();
        let exponent = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
        let grown = self.interval.as_secs_f64() * self.multiplier.max(1.0).powi(exponent);
        Duration::try_from_secs_f64(grown.min(cap)).unwrap_or(Duration::MAX)
    }
}

/// Terminal outcome plus the number of status requests it took.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollReport {
    pub outcome: ScanOutcome,
    pub attempts: u32,
}

/// Operations against the scan backend.
#[async_trait]
pub trait ScanBackend: Send + Sync {
    /// Start a scan, returning its id.
    async fn trigger_scan(&self, request: &ScanRequest) -> Result<ScanId>;

    /// Fetch the current status of a scan once.
    async fn fetch_status(&self, scan_id: &ScanId) -> Result<ScanSnapshot>;

    /// Poll until the scan finishes or `policy` is exhausted.
    async fn poll_scan_results(&self, scan_id: &ScanId, policy: &PollPolicy) -> Result<PollReport> {
        poll_until_finished(self, scan_id, policy).await
    }
}

/// Drive [`ScanBackend::fetch_status`] until a terminal status is observed.
pub async fn poll_until_finished<B>(
    backend: &B,
    scan_id: &ScanId,
    policy: &PollPolicy,
) -> Result<PollReport>
where
    B: ScanBackend + ?Sized,
{
    let started = Instant::now();
    // A timeout too large to represent as an instant means no deadline.
    let deadline = policy.timeout.and_then(|t| started.checked_add(t));
    let max_attempts = policy.max_attempts.max(1);
    let timed_out = |attempts: u32| ScanError::PollTimeout {
        scan_id: scan_id.to_string(),
        attempts,
        elapsed: started.elapsed(),
    };

    for attempt in 1..=max_attempts {
        let snapshot = match deadline {
            Some(deadline) => tokio::time::timeout_at(deadline, backend.fetch_status(scan_id))
                .await
                .map_err(|_| timed_out(attempt))??,
            None => backend.fetch_status(scan_id).await?,
        };

        if let Some(outcome) = snapshot.outcome() {
            info!(
                event = "scan.finished",
                scan_id = %scan_id,
                result = %outcome.verdict,
                attempts = attempt,
            );
            return Ok(PollReport {
                outcome,
                attempts: attempt,
            });
        }

        info!(event = "scan.status", scan_id = %scan_id, status = %snapshot.status, attempt = attempt);
        if attempt == max_attempts {
            break;
        }

        let delay = policy.delay_after(attempt);
        if let Some(deadline) = deadline {
            if deadline.saturating_duration_since(Instant::now()) <= delay {
                return Err(timed_out(attempt));
            }
        }
        debug!(scan_id = %scan_id, delay_ms = delay.as_millis() as u64, "waiting before next poll");
        tokio::time::sleep(delay).await;
    }

    Err(timed_out(max_attempts))
}

/// Build the HTTP client shared by the backend and comment clients.
pub(crate) fn build_http_client() -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .user_agent(concat!("dedge-scan/", env!("CARGO_PKG_VERSION")))
        .timeout(REQUEST_TIMEOUT)
        .build()
        .map_err(|e| ScanError::Client(e.to_string()))
}

/// Pull the most useful message out of an error response body.
pub(crate) fn upstream_error(status: reqwest::StatusCode, body: &str) -> String {
    let parsed = serde_json::from_str::<serde_json::Value>(body).ok();
    let field = parsed.as_ref().and_then(|v| {
        ["error", "message", "detail"]
            .iter()
            .find_map(|key| v.get(*key).and_then(serde_json::Value::as_str))
    });
    match field {
        Some(message) => message.to_string(),
        None if body.trim().is_empty() => status.to_string(),
        None => format!("{status}: {}", body.trim()),
    }
}

/// reqwest-backed [`ScanBackend`].
pub struct HttpScanClient {
    base_url: Url,
    api_token: String,
    http: reqwest::Client,
}

impl HttpScanClient {
    /// Create a client for the backend at `host_url`.
    pub fn new(host_url: &str, api_token: &str) -> Result<Self> {
        let base_url = Url::parse(host_url.trim_end_matches('/')).map_err(|e| {
            ScanError::InvalidVariable {
                name: HOST_URL.to_string(),
                reason: e.to_string(),
            }
        })?;
        if base_url.cannot_be_a_base() {
            return Err(ScanError::InvalidVariable {
                name: HOST_URL.to_string(),
                reason: format!("{host_url} cannot be used as a base URL"),
            });
        }
        Ok(Self {
            base_url,
            api_token: api_token.to_string(),
            http: build_http_client()?,
        })
    }

    pub fn from_config(config: &ActionConfig) -> Result<Self> {
        Self::new(&config.host_url, &config.api_token)
    }

    /// `{base}/integrations/scan-process/{last}`, with `last` percent-encoded
    /// as a single path segment.
    fn scan_process_url(&self, last: &str) -> Url {
        let mut url = self.base_url.clone();
        // Checked in `new`.
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.pop_if_empty().extend(SCAN_PROCESS_PATH).push(last);
        }
        url
    }

    fn start_url(&self) -> Url {
        self.scan_process_url("start")
    }

    fn status_url(&self, scan_id: &ScanId) -> Url {
        self.scan_process_url(scan_id.as_str())
    }
}

#[async_trait]
impl ScanBackend for HttpScanClient {
    async fn trigger_scan(&self, request: &ScanRequest) -> Result<ScanId> {
        debug!(payload = %serde_json::to_string(request)?, "triggering scan");

        let response = self
            .http
            .post(self.start_url())
            .header(API_KEY_HEADER, &self.api_token)
            .json(request)
            .send()
            .await
            .map_err(|e| ScanError::Trigger(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| ScanError::Trigger(e.to_string()))?;
        if !status.is_success() {
            return Err(ScanError::Trigger(upstream_error(status, &body)));
        }

        let parsed: TriggerResponse = serde_json::from_str(&body)
            .map_err(|e| ScanError::Trigger(format!("unexpected response body: {e}")))?;
        Ok(parsed.scan_id)
    }

    async fn fetch_status(&self, scan_id: &ScanId) -> Result<ScanSnapshot> {
        let response = self
            .http
            .get(self.status_url(scan_id))
            .header(API_KEY_HEADER, &self.api_token)
            .send()
            .await
            .map_err(|e| ScanError::Poll(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| ScanError::Poll(e.to_string()))?;
        if !status.is_success() {
            return Err(ScanError::Poll(upstream_error(status, &body)));
        }

        serde_json::from_str(&body)
            .map_err(|e| ScanError::Poll(format!("unexpected response body: {e}")))
    }
}
