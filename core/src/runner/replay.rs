use std::collections::HashMap;
use std::time::Instant;

use chrono::Utc;

use super::headers::{merge_headers, strip_headers};
use super::model::{ExecutionConfig, ReplayOutcome, ReplayTemplate};
use super::transport::{PreparedRequest, ReplayTransport};
use super::variables::{substitute, substitute_headers};
use crate::capture::find_header;

/// Headers the transport owns; never forwarded from a template.
pub const MANAGED_HEADERS: &[&str] = &["host", "content-length", "connection"];

fn method_carries_body(method: &str) -> bool {
    matches!(method, "POST" | "PUT" | "PATCH" | "DELETE")
}

pub(crate) fn prepare(
    template: &ReplayTemplate,
    cfg: &ExecutionConfig,
    variables: Option<&HashMap<String, String>>,
) -> PreparedRequest {
    let method = template.method.trim().to_ascii_uppercase();
    let mut headers = merge_headers(template.headers.as_slice(), cfg.header_overrides.as_slice());
    let mut url = template.url.clone();
    let mut body = template.body.clone();

    if let Some(vars) = variables {
        headers = substitute_headers(headers, vars);
        url = substitute(&url, vars);
        body = body.map(|b| substitute(&b, vars));
    }

    PreparedRequest {
        url,
        headers: strip_headers(headers, MANAGED_HEADERS),
        body: body.filter(|_| method_carries_body(&method)),
        method,
        follow_redirects: cfg.follow_redirects,
    }
}

/// Replays a single template. Never fails: transport errors become an
/// outcome with status 0.
pub async fn replay_one(
    transport: &dyn ReplayTransport,
    index: usize,
    template: &ReplayTemplate,
    cfg: &ExecutionConfig,
    variables: Option<&HashMap<String, String>>,
) -> ReplayOutcome {
    let request = prepare(template, cfg, variables);
    let url = request.url.clone();
    let method = request.method.clone();
    let started_at = Utc::now();
    let clock = Instant::now();

    tracing::debug!(
        target: "wiretap.runner",
        stage = "replay.send",
        index,
        method = %method,
        url = %url,
        transport = transport.name()
    );

    let result = transport.send(request).await;
    let duration_ms = clock.elapsed().as_millis() as u64;

    match result {
        Ok(resp) => {
            let success = !cfg.validate_status_range || (200..400).contains(&resp.status);
            let size_bytes =
                find_header(&resp.headers, "content-length").and_then(|v| v.trim().parse().ok());
            ReplayOutcome {
                index,
                url,
                method,
                status: resp.status,
                success,
                duration_ms,
                size_bytes,
                response_headers: resp.headers,
                error: None,
                started_at,
            }
        }
        Err(err) => {
            tracing::warn!(
                target: "wiretap.runner",
                stage = "replay.transport_error",
                index,
                kind = %err.kind,
                url = %url,
                error = %err.message
            );
            ReplayOutcome {
                index,
                url,
                method,
                status: 0,
                success: false,
                duration_ms,
                size_bytes: None,
                response_headers: Vec::new(),
                error: Some(err.to_string()),
                started_at,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::Header;
    use crate::error::{TransportError, TransportErrorKind};
    use crate::runner::model::TemplateHeaders;
    use crate::runner::transport::TransportResponse;
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use std::sync::Mutex;

    struct Recording {
        seen: Mutex<Vec<PreparedRequest>>,
        status: u16,
    }

    #[async_trait]
    impl ReplayTransport for Recording {
        fn name(&self) -> &str {
            "recording"
        }

        async fn send(&self, request: PreparedRequest) -> Result<TransportResponse, TransportError> {
            self.seen.lock().unwrap().push(request);
            Ok(TransportResponse {
                status: self.status,
                headers: vec![Header::new("Content-Length", "42")],
            })
        }
    }

    struct Refused;

    #[async_trait]
    impl ReplayTransport for Refused {
        fn name(&self) -> &str {
            "refused"
        }

        async fn send(&self, request: PreparedRequest) -> Result<TransportResponse, TransportError> {
            Err(TransportError::new(
                TransportErrorKind::Connect,
                request.url,
                "connection refused",
            ))
        }
    }

    fn template() -> ReplayTemplate {
        ReplayTemplate {
            url: "https://api.test/${PATH}".to_string(),
            method: "get".to_string(),
            headers: TemplateHeaders::from_pairs([
                ("Host", "api.test"),
                ("Authorization", "Bearer ${TOKEN}"),
                ("Connection", "keep-alive"),
            ]),
            body: Some("ignored".to_string()),
        }
    }

    #[test]
    fn test_prepare_merges_then_substitutes_and_strips() {
        let cfg = ExecutionConfig {
            header_overrides: TemplateHeaders::from_pairs([
                ("authorization", "Token ${TOKEN}"),
                ("Content-Length", "999"),
            ]),
            ..ExecutionConfig::default()
        };
        let vars: HashMap<String, String> = [("TOKEN", "t1"), ("PATH", "users")]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();

        let req = prepare(&template(), &cfg, Some(&vars));
        assert_eq!(req.method, "GET");
        assert_eq!(req.url, "https://api.test/users");
        assert_eq!(req.headers, vec![Header::new("Authorization", "Token t1")]);
        assert_eq!(req.body, None);
        assert!(req.follow_redirects);
    }

    #[test]
    fn test_prepare_without_variables_leaves_placeholders() {
        let mut t = template();
        t.method = "POST".to_string();
        let req = prepare(&t, &ExecutionConfig::default(), None);
        assert_eq!(req.url, "https://api.test/${PATH}");
        assert_eq!(req.body.as_deref(), Some("ignored"));
    }

    #[tokio::test]
    async fn test_status_range_only_when_validated() {
        let transport = Recording {
            seen: Mutex::new(Vec::new()),
            status: 500,
        };
        let lenient = replay_one(&transport, 0, &template(), &ExecutionConfig::default(), None).await;
        assert!(lenient.success);
        assert_eq!(lenient.status, 500);
        assert_eq!(lenient.size_bytes, Some(42));

        let strict_cfg = ExecutionConfig {
            validate_status_range: true,
            ..ExecutionConfig::default()
        };
        let strict = replay_one(&transport, 1, &template(), &strict_cfg, None).await;
        assert!(!strict.success);
        assert_eq!(strict.index, 1);
        assert_eq!(transport.seen.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_transport_error_yields_status_zero() {
        let out = replay_one(&Refused, 3, &template(), &ExecutionConfig::default(), None).await;
        assert_eq!(out.status, 0);
        assert!(!out.success);
        assert!(out.error.unwrap().contains("connection refused"));
    }
}
