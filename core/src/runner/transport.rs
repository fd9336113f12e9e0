use async_trait::async_trait;

use crate::capture::Header;
use crate::error::TransportError;

/// A fully resolved request: headers merged, substituted and stripped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedRequest {
    pub url: String,
    pub method: String,
    pub headers: Vec<Header>,
    pub body: Option<String>,
    pub follow_redirects: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportResponse {
    pub status: u16,
    pub headers: Vec<Header>,
}

/// Issues one HTTP request. Timeouts are the transport's concern.
#[async_trait]
pub trait ReplayTransport: Send + Sync {
    fn name(&self) -> &str;

    async fn send(&self, request: PreparedRequest) -> Result<TransportResponse, TransportError>;
}
