//! Human-readable status messages posted to the console and to PRs/MRs.

use crate::request::{ScanOutcome, ScanVerdict};

pub const TRIGGERED: &str =
    "🚀 A security scan has been triggered for this Pull Request. Stay tuned for updates! 🔍";
pub const UNKNOWN_RESULT: &str = "⚠️ Security scan finished, but the result is unknown.";

pub fn triggered() -> String {
    TRIGGERED.to_string()
}

pub fn success(report_link: &str) -> String {
    format!("✅ Security scan completed successfully! View the detailed report [here]({report_link}).")
}

pub fn failure(report_link: &str) -> String {
    format!("❌ Security scan failed. Review the report for more details [here]({report_link}).")
}

pub fn unknown() -> String {
    UNKNOWN_RESULT.to_string()
}

/// Message for a finished scan.
///
/// A missing report link renders as an empty link target.
pub fn result_message(outcome: &ScanOutcome) -> String {
    let link = outcome.report_link.as_deref().unwrap_or_default();
    match outcome.verdict {
        ScanVerdict::Success => success(link),
        ScanVerdict::Failure => failure(link),
        ScanVerdict::Unknown => unknown(),
    }
}

/// Console banner: the message between two dashed rules, padded by `| ` and ` |`.
///
/// Rule width counts UTF-16 code units, so an emoji outside the BMP takes two dashes.
pub fn framed(message: &str) -> String {
    let border = "-".repeat(message.encode_utf16().count() + 4);
    format!("{border}\n| {message} |\n{border}")
}
