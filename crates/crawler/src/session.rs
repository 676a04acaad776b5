//! Crawl session - sequential visits over one browsing context
//!
//! The session owns the context for the whole run. Visits never overlap and a
//! failed visit never stops the run. Only opening the context, the bootstrap
//! and the final report can end a run early, and even then the context is
//! closed and the sink receives a report.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

use browser::{BrowsingContext, ContextResult};

use crate::bootstrap::SessionBootstrap;
use crate::error::{CrawlError, Result};
use crate::governor::GovernorPolicy;
use crate::report::{aggregate, SessionSummary};
use crate::sink::ReportSink;
use crate::visitor::{PageVisitResult, PageVisitor, VisitTimings};

/// Everything a run needs besides the browser
#[derive(Debug, Clone)]
pub struct CrawlSettings {
    pub routes: Vec<String>,
    pub base_url: Option<Url>,
    pub policy: GovernorPolicy,
    pub timings: VisitTimings,
    /// Pause between two visits
    pub cooldown: Duration,
    /// Re-run the bootstrap before every visit instead of once
    pub reauthenticate_each_visit: bool,
}

impl Default for CrawlSettings {
    fn default() -> Self {
        Self {
            routes: Vec::new(),
            base_url: None,
            policy: GovernorPolicy::default(),
            timings: VisitTimings::default(),
            cooldown: Duration::from_millis(8_000),
            reauthenticate_each_visit: false,
        }
    }
}

pub struct CrawlSession {
    context: Arc<dyn BrowsingContext>,
    settings: CrawlSettings,
}

impl CrawlSession {
    pub fn new(context: Arc<dyn BrowsingContext>, settings: CrawlSettings) -> Self {
        Self { context, settings }
    }

    pub fn settings(&self) -> &CrawlSettings {
        &self.settings
    }

    /// Visit every route in order, one result per route
    pub async fn run(&self, bootstrap: &dyn SessionBootstrap) -> Result<Vec<PageVisitResult>> {
        let settings = &self.settings;

        if !settings.reauthenticate_each_visit {
            bootstrap
                .bootstrap(self.context.as_ref())
                .await
                .map_err(CrawlError::Bootstrap)?;
        }
        let reauth = settings.reauthenticate_each_visit.then_some(bootstrap);

        let visitor = PageVisitor::new(
            self.context.clone(),
            Arc::new(settings.policy.clone()),
            settings.timings,
            settings.base_url.clone(),
        );

        tracing::info!(
            "[CrawlSession] Crawling {} routes (budget {} API calls per page)",
            settings.routes.len(),
            settings.policy.api_call_budget
        );

        let mut results = Vec::with_capacity(settings.routes.len());
        for (index, route) in settings.routes.iter().enumerate() {
            if index > 0 && !settings.cooldown.is_zero() {
                tracing::debug!(
                    "[CrawlSession] Cooling down for {}ms",
                    settings.cooldown.as_millis()
                );
                tokio::time::sleep(settings.cooldown).await;
            }
            tracing::info!(
                "[CrawlSession] [{}/{}] {}",
                index + 1,
                settings.routes.len(),
                route
            );
            results.push(visitor.visit(route, reauth).await);
        }

        Ok(results)
    }
}

/// Result of a completed run
#[derive(Debug, Clone)]
pub struct CrawlOutcome {
    pub summary: SessionSummary,
    pub results: Vec<PageVisitResult>,
}

impl CrawlOutcome {
    pub fn exit_code(&self) -> u8 {
        self.summary.exit_code()
    }
}

/// Open a context, crawl, close it, publish the report.
///
/// The context is closed and the sink is flushed on every path. After a
/// session-fatal error the sink receives an empty report.
pub async fn crawl<F>(
    open: F,
    bootstrap: &dyn SessionBootstrap,
    settings: CrawlSettings,
    sink: &dyn ReportSink,
) -> Result<CrawlOutcome>
where
    F: Future<Output = ContextResult<Arc<dyn BrowsingContext>>>,
{
    let context = match open.await {
        Ok(context) => context,
        Err(e) => {
            tracing::error!("[CrawlSession] Could not open browsing context: {}", e);
            flush_empty(sink).await;
            return Err(CrawlError::Context(e));
        }
    };

    let session = CrawlSession::new(context.clone(), settings);
    let run = session.run(bootstrap).await;

    if let Err(e) = context.close().await {
        tracing::warn!("[CrawlSession] Failed to close browsing context: {}", e);
    }

    let results = match run {
        Ok(results) => results,
        Err(e) => {
            tracing::error!("[CrawlSession] {}", e);
            flush_empty(sink).await;
            return Err(e);
        }
    };

    let summary = aggregate(&results);
    sink.publish(&summary, &results).await?;

    Ok(CrawlOutcome { summary, results })
}

async fn flush_empty(sink: &dyn ReportSink) {
    if let Err(e) = sink.publish(&aggregate(&[]), &[]).await {
        tracing::error!("[CrawlSession] Could not flush empty report: {}", e);
    }
}
