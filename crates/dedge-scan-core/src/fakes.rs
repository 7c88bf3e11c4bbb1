//! In-memory fakes for the backend, comment and output seams (testing only)
//!
//! Provides `ScriptedBackend`, `RecordingComments` and `MemoryOutputs`
//! that satisfy the trait contracts without network or filesystem access.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::client::ScanBackend;
use crate::error::{Result, ScanError};
use crate::notifier::CommentSink;
use crate::outputs::OutputSink;
use crate::request::{ScanId, ScanRequest, ScanSnapshot, ScanStatus};

// ---------------------------------------------------------------------------
// ScriptedBackend
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct BackendState {
    requests: Vec<ScanRequest>,
    status_calls: u32,
}

/// Backend that replays a fixed sequence of status responses.
///
/// Once the script is exhausted the scan reports `in-progress` forever,
/// like a stalled backend.
#[derive(Debug)]
pub struct ScriptedBackend {
    scan_id: ScanId,
    trigger_error: Option<String>,
    script: Mutex<VecDeque<std::result::Result<ScanSnapshot, String>>>,
    state: Mutex<BackendState>,
}

impl ScriptedBackend {
    /// A backend that accepts the trigger and returns `scan_id`.
    pub fn new(scan_id: &str) -> Self {
        Self {
            scan_id: ScanId(scan_id.to_string()),
            trigger_error: None,
            script: Mutex::new(VecDeque::new()),
            state: Mutex::new(BackendState::default()),
        }
    }

    /// A backend whose trigger endpoint rejects the request with `message`.
    pub fn failing_trigger(message: &str) -> Self {
        let mut backend = Self::new("unused");
        backend.trigger_error = Some(message.to_string());
        backend
    }

    /// `in-progress`, `in-progress`, then `finished` with `result`.
    pub fn finishing_with(result: &str, report_link: Option<&str>) -> Self {
        Self::new("scan-1")
            .then_status("in-progress")
            .then_status("in-progress")
            .then_finished(result, report_link)
    }

    /// Queue a non-terminal (or arbitrary) status.
    pub fn then_status(self, status: &str) -> Self {
        self.push(Ok(ScanSnapshot {
            status: ScanStatus::from(status.to_string()),
            result: None,
            report_link: None,
        }))
    }

    /// Queue the terminal response.
    pub fn then_finished(self, result: &str, report_link: Option<&str>) -> Self {
        self.push(Ok(ScanSnapshot {
            status: ScanStatus::Finished,
            result: Some(result.to_string()),
            report_link: report_link.map(str::to_string),
        }))
    }

    /// Queue a transport failure.
    pub fn then_poll_error(self, message: &str) -> Self {
        self.push(Err(message.to_string()))
    }

    fn push(self, entry: std::result::Result<ScanSnapshot, String>) -> Self {
        self.script.lock().unwrap().push_back(entry);
        self
    }

    /// Requests received by the trigger endpoint.
    pub fn requests(&self) -> Vec<ScanRequest> {
        self.state.lock().unwrap().requests.clone()
    }

    pub fn trigger_calls(&self) -> usize {
        self.state.lock().unwrap().requests.len()
    }

    pub fn status_calls(&self) -> u32 {
        self.state.lock().unwrap().status_calls
    }
}

#[async_trait]
impl ScanBackend for ScriptedBackend {
    async fn trigger_scan(&self, request: &ScanRequest) -> Result<ScanId> {
        self.state.lock().unwrap().requests.push(request.clone());
        match &self.trigger_error {
            Some(message) => Err(ScanError::Trigger(message.clone())),
            None => Ok(self.scan_id.clone()),
        }
    }

    async fn fetch_status(&self, _scan_id: &ScanId) -> Result<ScanSnapshot> {
        self.state.lock().unwrap().status_calls += 1;
        match self.script.lock().unwrap().pop_front() {
            Some(Ok(snapshot)) => Ok(snapshot),
            Some(Err(message)) => Err(ScanError::Poll(message)),
            None => Ok(ScanSnapshot {
                status: ScanStatus::InProgress,
                result: None,
                report_link: None,
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// RecordingComments
// ---------------------------------------------------------------------------

/// Comment sink that records bodies; clones share the same record.
#[derive(Debug, Clone, Default)]
pub struct RecordingComments {
    bodies: Arc<Mutex<Vec<String>>>,
    fail: bool,
}

impl RecordingComments {
    /// A sink that records the attempt and then rejects it.
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    /// Every body passed to `post_comment`, including rejected ones.
    pub fn bodies(&self) -> Vec<String> {
        self.bodies.lock().unwrap().clone()
    }
}

#[async_trait]
impl CommentSink for RecordingComments {
    async fn post_comment(&self, body: &str) -> Result<()> {
        self.bodies.lock().unwrap().push(body.to_string());
        if self.fail {
            Err(ScanError::Comment("403 Forbidden".to_string()))
        } else {
            Ok(())
        }
    }

    fn target(&self) -> String {
        "memory".to_string()
    }
}

// ---------------------------------------------------------------------------
// MemoryOutputs
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OutputKind {
    Exported,
    Output,
}

/// Output sink that keeps values in memory; clones share the same store.
#[derive(Debug, Clone, Default)]
pub struct MemoryOutputs {
    entries: Arc<Mutex<Vec<(OutputKind, String, String)>>>,
}

impl MemoryOutputs {
    /// Last exported value of `name`.
    pub fn exported(&self, name: &str) -> Option<String> {
        self.last(OutputKind::Exported, name)
    }

    /// Last step output value of `name`.
    pub fn output(&self, name: &str) -> Option<String> {
        self.last(OutputKind::Output, name)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().unwrap().is_empty()
    }

    fn last(&self, kind: OutputKind, name: &str) -> Option<String> {
        self.entries
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|(k, n, _)| *k == kind && n == name)
            .map(|(_, _, v)| v.clone())
    }
}

impl OutputSink for MemoryOutputs {
    fn export_variable(&self, name: &str, value: &str) -> Result<()> {
        self.entries
            .lock()
            .unwrap()
            .push((OutputKind::Exported, name.to_string(), value.to_string()));
        Ok(())
    }

    fn set_output(&self, name: &str, value: &str) -> Result<()> {
        self.entries
            .lock()
            .unwrap()
            .push((OutputKind::Output, name.to_string(), value.to_string()));
        Ok(())
    }
}
