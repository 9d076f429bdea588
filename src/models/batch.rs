use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{generate_id, ChangeSummary, ProductSnapshot};

/// Terminal failure classes for one scrape attempt.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// HTTP 403: the IP or session is flagged. Back off substantially.
    Blocked,
    /// An anti-bot interstitial was served. The session needs a manual warm-up.
    Challenge,
    /// Navigation exceeded the configured timeout. Safe to retry shortly.
    Timeout,
    /// Markup drift: the adapter's selectors no longer match. Needs maintenance.
    ParseError,
    /// Anything else, with the underlying message attached to the outcome.
    Unknown,
}

impl FailureKind {
    /// Status code a trigger layer should surface for this failure.
    pub fn http_status(self) -> u16 {
        match self {
            FailureKind::Blocked | FailureKind::Challenge => 403,
            FailureKind::Timeout => 504,
            FailureKind::ParseError => 422,
            FailureKind::Unknown => 500,
        }
    }
}

/// Result of one `scrape` call. Failures are values, never panics or errors.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ScrapeOutcome {
    Success {
        snapshot: ProductSnapshot,
        /// Present when the snapshot was persisted; says what actually changed.
        change: Option<ChangeSummary>,
    },
    /// Caller error: unknown site or invalid product URL. No network activity.
    Rejected { reason: String },
    Failed {
        kind: FailureKind,
        message: String,
        /// Captured page HTML, retained for offline diagnosis of parse failures.
        #[serde(skip_serializing_if = "Option::is_none")]
        raw_html: Option<String>,
    },
}

impl ScrapeOutcome {
    pub fn failed(kind: FailureKind, message: impl Into<String>) -> Self {
        ScrapeOutcome::Failed {
            kind,
            message: message.into(),
            raw_html: None,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, ScrapeOutcome::Success { .. })
    }

    /// Status code for trigger layers; 200 on success, 400 on rejection.
    pub fn http_status(&self) -> u16 {
        match self {
            ScrapeOutcome::Success { .. } => 200,
            ScrapeOutcome::Rejected { .. } => 400,
            ScrapeOutcome::Failed { kind, .. } => kind.http_status(),
        }
    }
}

/// Options for a single scrape attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScrapeOptions {
    pub headless: bool,
    /// Hand the snapshot to the storage gateway on success.
    pub persist: bool,
    pub timeout_secs: u64,
}

impl Default for ScrapeOptions {
    fn default() -> Self {
        Self {
            headless: true,
            persist: true,
            timeout_secs: 45,
        }
    }
}

/// Execution policy for a batch run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchOptions {
    pub scrape: ScrapeOptions,
    /// Uniform random inter-request delay, milliseconds (inclusive bounds).
    pub delay_range_ms: (u64, u64),
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            scrape: ScrapeOptions::default(),
            delay_range_ms: (3_000, 9_000),
        }
    }
}

/// An ordered multi-URL run and its accumulated per-URL outcomes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchJob {
    pub id: String,
    pub urls: Vec<String>,
    pub options: BatchOptions,
    pub outcomes: Vec<ScrapeOutcome>,
    pub started_at: DateTime<Utc>,
}

impl BatchJob {
    pub fn new(urls: Vec<String>, options: BatchOptions) -> Self {
        Self {
            id: generate_id(),
            urls,
            options,
            outcomes: Vec::new(),
            started_at: Utc::now(),
        }
    }

    pub fn record(&mut self, outcome: ScrapeOutcome) {
        self.outcomes.push(outcome);
    }

    pub fn is_complete(&self) -> bool {
        self.outcomes.len() == self.urls.len()
    }

    pub fn succeeded(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_success()).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_kind_status_mapping() {
        assert_eq!(FailureKind::Blocked.http_status(), 403);
        assert_eq!(FailureKind::Challenge.http_status(), 403);
        assert_eq!(FailureKind::Timeout.http_status(), 504);
        assert_eq!(FailureKind::ParseError.http_status(), 422);
        assert_eq!(FailureKind::Unknown.http_status(), 500);
    }

    #[test]
    fn test_outcome_status_mapping() {
        let rejected = ScrapeOutcome::Rejected {
            reason: "unknown site".to_string(),
        };
        assert_eq!(rejected.http_status(), 400);
        assert!(!rejected.is_success());

        let failed = ScrapeOutcome::failed(FailureKind::Timeout, "navigation timed out");
        assert_eq!(failed.http_status(), 504);
    }

    #[test]
    fn test_batch_job_accumulation() {
        let urls = vec!["a".to_string(), "b".to_string()];
        let mut job = BatchJob::new(urls, BatchOptions::default());

        assert!(!job.is_complete());
        job.record(ScrapeOutcome::failed(FailureKind::Unknown, "boom"));
        job.record(ScrapeOutcome::Rejected {
            reason: "bad url".to_string(),
        });
        assert!(job.is_complete());
        assert_eq!(job.succeeded(), 0);
    }

    #[test]
    fn test_outcome_serialization_tags() {
        let outcome = ScrapeOutcome::failed(FailureKind::Challenge, "interstitial");
        let json = serde_json::to_string(&outcome).unwrap();
        assert!(json.contains("\"outcome\":\"failed\""));
        assert!(json.contains("\"challenge\""));
        // raw_html is omitted when absent
        assert!(!json.contains("raw_html"));
    }
}
