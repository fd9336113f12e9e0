use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::transitions::{StateTransition, TransitionError};

/// Placeholder domain for urls without a host (`data:`, `about:`).
pub const UNKNOWN_DOMAIN: &str = "unknown";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Header {
    pub name: String,
    pub value: String,
}

impl Header {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

pub fn find_header<'a>(headers: &'a [Header], name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|h| h.name.eq_ignore_ascii_case(name))
        .map(|h| h.value.as_str())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LifecycleState {
    Created,
    ContextPending,
    Admitted,
    Rejected,
    HeadersMerged,
    Completed,
    Errored,
    HandedOff,
}

/// Per-phase durations in milliseconds. Fields the channel did not report
/// stay `None`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TimingBreakdown {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dns_ms: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tcp_ms: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls_ms: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttfb_ms: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub download_ms: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_ms: Option<f64>,
}

impl TimingBreakdown {
    /// Fills every field `other` reports. Telemetry is the more precise
    /// channel, so its values win.
    pub fn merge_from(&mut self, other: &TimingBreakdown) {
        fn take(dst: &mut Option<f64>, src: Option<f64>) {
            if src.is_some() {
                *dst = src;
            }
        }
        take(&mut self.dns_ms, other.dns_ms);
        take(&mut self.tcp_ms, other.tcp_ms);
        take(&mut self.tls_ms, other.tls_ms);
        take(&mut self.ttfb_ms, other.ttfb_ms);
        take(&mut self.download_ms, other.download_ms);
        take(&mut self.total_ms, other.total_ms);
    }

    pub fn is_empty(&self) -> bool {
        *self == TimingBreakdown::default()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapturedTransaction {
    pub id: String,
    pub url: String,
    pub method: String,
    pub resource_type: String,
    pub origin_tab_id: Option<i64>,
    pub origin_page_url: Option<String>,
    pub domain: Option<String>,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub status: Option<u16>,
    pub size_bytes: Option<u64>,
    #[serde(default)]
    pub request_headers: Vec<Header>,
    #[serde(default)]
    pub response_headers: Vec<Header>,
    #[serde(default)]
    pub timing: TimingBreakdown,
    pub error: Option<String>,
    pub lifecycle_state: LifecycleState,
    /// Every state the record passed through, oldest first.
    #[serde(default)]
    pub transitions: Vec<LifecycleState>,
}

impl CapturedTransaction {
    pub fn new(
        id: impl Into<String>,
        url: impl Into<String>,
        method: impl Into<String>,
        resource_type: impl Into<String>,
        origin_tab_id: Option<i64>,
        started_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            url: url.into(),
            method: method.into(),
            resource_type: resource_type.into(),
            origin_tab_id,
            origin_page_url: None,
            domain: None,
            started_at,
            ended_at: None,
            status: None,
            size_bytes: None,
            request_headers: Vec::new(),
            response_headers: Vec::new(),
            timing: TimingBreakdown::default(),
            error: None,
            lifecycle_state: LifecycleState::Created,
            transitions: vec![LifecycleState::Created],
        }
    }

    pub fn advance(&mut self, to: LifecycleState) -> Result<(), TransitionError> {
        StateTransition::validate(self.lifecycle_state, to)?;
        self.lifecycle_state = to;
        self.transitions.push(to);
        Ok(())
    }

    pub fn passed_through(&self, state: LifecycleState) -> bool {
        self.transitions.contains(&state)
    }

    /// `Completed` or `Errored` once the record was finalized.
    pub fn outcome_state(&self) -> Option<LifecycleState> {
        self.transitions
            .iter()
            .rev()
            .copied()
            .find(|s| matches!(s, LifecycleState::Completed | LifecycleState::Errored))
    }

    pub fn duration_ms(&self) -> Option<i64> {
        self.ended_at
            .map(|end| (end - self.started_at).num_milliseconds())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecyclePhase {
    Start,
    HeadersSent,
    HeadersReceived,
    Completed,
    Errored,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HeaderDirection {
    Request,
    Response,
}

/// One inbound lifecycle message; one per phase of a transaction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LifecycleEvent {
    pub id: String,
    pub url: String,
    #[serde(default = "default_method")]
    pub method: String,
    #[serde(default = "default_resource_type")]
    pub resource_type: String,
    #[serde(default)]
    pub tab_id: Option<i64>,
    pub phase: LifecyclePhase,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub headers: Option<Vec<Header>>,
    #[serde(default)]
    pub status: Option<u16>,
    #[serde(default)]
    pub error: Option<String>,
}

fn default_method() -> String {
    "GET".to_string()
}

fn default_resource_type() -> String {
    "other".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionOutcome {
    pub status: Option<u16>,
    pub ended_at: DateTime<Utc>,
}

/// An independently reported timing observation. `observed_at` is the start
/// of the sampled request as reported by the telemetry channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetrySample {
    #[serde(default)]
    pub transaction_id: Option<String>,
    pub url: String,
    pub observed_at: DateTime<Utc>,
    #[serde(default)]
    pub duration_breakdown: TimingBreakdown,
    #[serde(default)]
    pub size_bytes: Option<u64>,
}

/// Inbound message union for [`super::CaptureEngine::ingest`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "channel", rename_all = "snake_case")]
pub enum CaptureMessage {
    Lifecycle(LifecycleEvent),
    Telemetry(TelemetrySample),
}
