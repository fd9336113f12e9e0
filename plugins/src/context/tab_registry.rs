use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use wiretap_core::capture::{ContextResolver, LifecycleEvent, LifecyclePhase, PageContext};
use wiretap_core::error::ContextError;

const MAIN_FRAME: &str = "main_frame";

/// Remembers which page each tab is showing, learned from top-level
/// navigations on the lifecycle stream.
#[derive(Default)]
pub struct TabRegistry {
    pages: RwLock<HashMap<i64, String>>,
}

impl TabRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records the page for `event.tab_id` when the event starts a
    /// top-level navigation. Call before the engine sees the event.
    pub fn observe(&self, event: &LifecycleEvent) {
        if event.phase != LifecyclePhase::Start || event.resource_type != MAIN_FRAME {
            return;
        }
        if let Some(tab_id) = event.tab_id.filter(|t| *t >= 0) {
            self.set_page(tab_id, event.url.clone());
        }
    }

    pub fn set_page(&self, tab_id: i64, page_url: String) {
        self.pages
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(tab_id, page_url);
    }

    pub fn close_tab(&self, tab_id: i64) -> bool {
        self.pages
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&tab_id)
            .is_some()
    }

    pub fn len(&self) -> usize {
        self.pages.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl ContextResolver for TabRegistry {
    async fn resolve_context(&self, tab_id: i64) -> Result<PageContext, ContextError> {
        self.pages
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&tab_id)
            .map(|page_url| PageContext {
                page_url: page_url.clone(),
            })
            .ok_or(ContextError::NotFound(tab_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use pretty_assertions::assert_eq;

    fn start(tab: i64, url: &str, resource_type: &str) -> LifecycleEvent {
        LifecycleEvent {
            id: format!("{tab}-{url}"),
            url: url.to_string(),
            method: "GET".to_string(),
            resource_type: resource_type.to_string(),
            tab_id: Some(tab),
            phase: LifecyclePhase::Start,
            timestamp: Utc::now(),
            headers: None,
            status: None,
            error: None,
        }
    }

    #[tokio::test]
    async fn test_learns_pages_from_main_frame_only() {
        let registry = TabRegistry::new();
        registry.observe(&start(7, "https://shop.test/cart", "main_frame"));
        registry.observe(&start(7, "https://cdn.test/app.js", "script"));
        registry.observe(&start(-1, "https://bg.test/", "main_frame"));

        assert_eq!(
            registry.resolve_context(7).await.unwrap().page_url,
            "https://shop.test/cart"
        );
        assert_eq!(
            registry.resolve_context(9).await.unwrap_err(),
            ContextError::NotFound(9)
        );
        assert_eq!(registry.len(), 1);

        assert!(registry.close_tab(7));
        assert!(registry.is_empty());
    }
}
