#![allow(dead_code)]

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use wiretap_core::capture::{Header, LifecycleEvent, LifecyclePhase};
use wiretap_core::error::{TransportError, TransportErrorKind};
use wiretap_core::runner::{PreparedRequest, ReplayTransport, TransportResponse};

pub fn event(id: &str, url: &str, phase: LifecyclePhase, at: DateTime<Utc>) -> LifecycleEvent {
    LifecycleEvent {
        id: id.to_string(),
        url: url.to_string(),
        method: "GET".to_string(),
        resource_type: "xmlhttprequest".to_string(),
        tab_id: None,
        phase,
        timestamp: at,
        headers: None,
        status: None,
        error: None,
    }
}

pub fn completed(id: &str, url: &str, status: u16, at: DateTime<Utc>) -> LifecycleEvent {
    LifecycleEvent {
        status: Some(status),
        headers: Some(vec![Header::new("Content-Type", "application/json")]),
        ..event(id, url, LifecyclePhase::Completed, at)
    }
}

/// Lets spawned context resolutions run on the current-thread runtime.
pub async fn settle() {
    for _ in 0..8 {
        tokio::task::yield_now().await;
    }
}

/// 200 for every url except hosts listed as unreachable.
pub struct ScriptedTransport {
    pub unreachable: Vec<String>,
}

impl ScriptedTransport {
    pub fn shared(unreachable: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            unreachable: unreachable.iter().map(|s| s.to_string()).collect(),
        })
    }
}

#[async_trait]
impl ReplayTransport for ScriptedTransport {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn send(&self, request: PreparedRequest) -> Result<TransportResponse, TransportError> {
        if self.unreachable.iter().any(|u| request.url.contains(u.as_str())) {
            return Err(TransportError::new(
                TransportErrorKind::Connect,
                request.url,
                "connection refused",
            ));
        }
        Ok(TransportResponse {
            status: 200,
            headers: vec![Header::new("content-length", "2")],
        })
    }
}
