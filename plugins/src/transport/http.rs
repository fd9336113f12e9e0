use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{redirect, Method};
use wiretap_core::capture::Header;
use wiretap_core::config::RunnerConfig;
use wiretap_core::error::{TransportError, TransportErrorKind};
use wiretap_core::runner::{PreparedRequest, ReplayTransport, TransportResponse};

fn classify(err: &reqwest::Error) -> TransportErrorKind {
    if err.is_timeout() {
        TransportErrorKind::Timeout
    } else if err.is_connect() {
        TransportErrorKind::Connect
    } else if err.is_redirect() {
        TransportErrorKind::Redirect
    } else if err.is_request() || err.is_builder() {
        TransportErrorKind::Request
    } else if err.is_body() || err.is_decode() {
        TransportErrorKind::Body
    } else {
        TransportErrorKind::Unknown
    }
}

fn from_reqwest(err: reqwest::Error, url: &str) -> TransportError {
    TransportError::new(classify(&err), url, err.to_string())
}

/// Replay transport over reqwest. Keeps one client per redirect policy so
/// connection pools are shared across runs.
#[derive(Clone)]
pub struct ReqwestTransport {
    follow: reqwest::Client,
    no_follow: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new(cfg: &RunnerConfig) -> anyhow::Result<Self> {
        let timeout = Duration::from_millis(cfg.request_timeout_ms);
        let follow = reqwest::Client::builder()
            .timeout(timeout)
            .redirect(redirect::Policy::limited(10))
            .build()?;
        let no_follow = reqwest::Client::builder()
            .timeout(timeout)
            .redirect(redirect::Policy::none())
            .build()?;
        Ok(Self { follow, no_follow })
    }

    fn header_map(headers: &[Header]) -> HeaderMap {
        let mut map = HeaderMap::with_capacity(headers.len());
        for h in headers {
            match (
                HeaderName::from_bytes(h.name.as_bytes()),
                HeaderValue::from_str(&h.value),
            ) {
                (Ok(name), Ok(value)) => {
                    map.append(name, value);
                }
                _ => {
                    tracing::warn!(
                        target: "wiretap.runner",
                        stage = "transport.header_skipped",
                        name = %h.name
                    );
                }
            }
        }
        map
    }
}

#[async_trait]
impl ReplayTransport for ReqwestTransport {
    fn name(&self) -> &str {
        "reqwest"
    }

    async fn send(&self, request: PreparedRequest) -> Result<TransportResponse, TransportError> {
        let url = request.url.as_str();
        let method = Method::from_bytes(request.method.as_bytes()).map_err(|err| {
            TransportError::new(TransportErrorKind::Request, url, err.to_string())
        })?;
        let client = if request.follow_redirects {
            &self.follow
        } else {
            &self.no_follow
        };

        let mut builder = client
            .request(method, url)
            .headers(Self::header_map(&request.headers));
        if let Some(body) = request.body {
            builder = builder.body(body);
        }

        let resp = builder.send().await.map_err(|err| from_reqwest(err, url))?;
        let status = resp.status().as_u16();
        let headers = resp
            .headers()
            .iter()
            .map(|(name, value)| {
                Header::new(
                    name.as_str(),
                    String::from_utf8_lossy(value.as_bytes()).into_owned(),
                )
            })
            .collect();

        // Drain so the connection goes back to the pool and the timing
        // covers the whole response.
        let body = resp.bytes().await.map_err(|err| from_reqwest(err, url))?;
        tracing::trace!(
            target: "wiretap.runner",
            stage = "transport.response",
            status,
            bytes = body.len()
        );

        Ok(TransportResponse { status, headers })
    }
}
