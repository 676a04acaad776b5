//! Session bootstrap - puts a fresh browsing context into a usable state

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::time::Duration;

use browser::{BrowsingContext, ContextError, ContextResult};

#[async_trait]
pub trait SessionBootstrap: Send + Sync {
    /// Returns once the context is ready for route visits
    async fn bootstrap(&self, context: &dyn BrowsingContext) -> ContextResult<()>;
}

/// Anonymous crawl: nothing to set up
#[derive(Debug, Clone, Copy, Default)]
pub struct NoBootstrap;

#[async_trait]
impl SessionBootstrap for NoBootstrap {
    async fn bootstrap(&self, _context: &dyn BrowsingContext) -> ContextResult<()> {
        Ok(())
    }
}

/// Opens a landing page and seeds `localStorage` (auth token, user profile, ...)
#[derive(Debug, Clone)]
pub struct StorageBootstrap {
    pub landing_url: String,
    pub entries: BTreeMap<String, String>,
    pub timeout: Duration,
}

impl StorageBootstrap {
    pub fn new(landing_url: impl Into<String>, entries: BTreeMap<String, String>) -> Self {
        Self {
            landing_url: landing_url.into(),
            entries,
            timeout: Duration::from_millis(30_000),
        }
    }

    /// One `setItem` call per entry, values JSON-quoted
    pub fn script(&self) -> String {
        self.entries
            .iter()
            .map(|(key, value)| {
                format!(
                    "localStorage.setItem({}, {});",
                    serde_json::Value::from(key.as_str()),
                    serde_json::Value::from(value.as_str())
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[async_trait]
impl SessionBootstrap for StorageBootstrap {
    async fn bootstrap(&self, context: &dyn BrowsingContext) -> ContextResult<()> {
        tracing::info!(
            "[CrawlSession] Bootstrapping session via {} ({} storage entries)",
            self.landing_url,
            self.entries.len()
        );

        tokio::time::timeout(self.timeout, context.navigate(&self.landing_url))
            .await
            .map_err(|_| {
                ContextError::Navigation(format!(
                    "landing page {} did not load within {}ms",
                    self.landing_url,
                    self.timeout.as_millis()
                ))
            })??;

        if !self.entries.is_empty() {
            context.evaluate(&self.script()).await?;
        }
        Ok(())
    }
}
