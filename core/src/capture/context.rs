use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ContextError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageContext {
    pub page_url: String,
}

/// Looks up the page that currently owns a tab. Called once per
/// transaction; failures fall back to the transaction's own host.
#[async_trait]
pub trait ContextResolver: Send + Sync {
    async fn resolve_context(&self, tab_id: i64) -> Result<PageContext, ContextError>;
}

/// Resolver for hosts without tab context: every lookup misses.
pub struct NoContext;

#[async_trait]
impl ContextResolver for NoContext {
    async fn resolve_context(&self, tab_id: i64) -> Result<PageContext, ContextError> {
        Err(ContextError::NotFound(tab_id))
    }
}
