//! Report sinks
//!
//! The aggregator never writes anything itself; it hands the summary and the
//! ordered visit results to a [`ReportSink`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::{Path, PathBuf};
use uuid::Uuid;

use crate::error::SinkError;
use crate::report::SessionSummary;
use crate::visitor::PageVisitResult;

#[async_trait]
pub trait ReportSink: Send + Sync {
    async fn publish(
        &self,
        summary: &SessionSummary,
        pages: &[PageVisitResult],
    ) -> Result<(), SinkError>;
}

/// On-disk report document
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportDocument<'a> {
    pub run_id: Uuid,
    pub generated_at: DateTime<Utc>,
    pub summary: &'a SessionSummary,
    pub pages: &'a [PageVisitResult],
}

/// Pretty JSON report at a fixed path
#[derive(Debug, Clone)]
pub struct JsonFileSink {
    path: PathBuf,
    run_id: Uuid,
}

impl JsonFileSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            run_id: Uuid::now_v7(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    fn io_error(&self, source: std::io::Error) -> SinkError {
        SinkError::Io {
            path: self.path.clone(),
            source,
        }
    }
}

#[async_trait]
impl ReportSink for JsonFileSink {
    async fn publish(
        &self,
        summary: &SessionSummary,
        pages: &[PageVisitResult],
    ) -> Result<(), SinkError> {
        let document = ReportDocument {
            run_id: self.run_id,
            generated_at: Utc::now(),
            summary,
            pages,
        };
        let json = serde_json::to_vec_pretty(&document)?;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| self.io_error(e))?;
        }
        tokio::fs::write(&self.path, json)
            .await
            .map_err(|e| self.io_error(e))?;

        tracing::info!(
            "[ReportSink] Report {} written to {}",
            self.run_id,
            self.path.display()
        );
        Ok(())
    }
}

/// Human-readable summary through the log
#[derive(Debug, Clone, Copy, Default)]
pub struct LogSink;

#[async_trait]
impl ReportSink for LogSink {
    async fn publish(
        &self,
        summary: &SessionSummary,
        _pages: &[PageVisitResult],
    ) -> Result<(), SinkError> {
        tracing::info!(
            "[ReportSink] {} pages: {} succeeded, {} failed, average {}ms",
            summary.total_pages,
            summary.successful,
            summary.failed,
            summary.average_duration_ms
        );
        tracing::info!(
            "[ReportSink] errors {}, structural {}, duplicate attributes {}, framework {}, warnings {}",
            summary.total_errors,
            summary.total_structural,
            summary.total_duplicate_attributes,
            summary.totals.framework_error,
            summary.totals.generic_warning
        );
        tracing::info!(
            "[ReportSink] requests: {} allowed, {} blocked by type, {} blocked by budget, {} expired; API {} ({} failed)",
            summary.requests.allowed,
            summary.requests.blocked_by_type,
            summary.requests.blocked_by_budget,
            summary.requests.expired,
            summary.api.total,
            summary.api.failed
        );
        for (rank, route) in summary.ranking.iter().enumerate() {
            tracing::info!(
                "[ReportSink] #{} {} - {} problems",
                rank + 1,
                route.route,
                route.problems
            );
        }
        Ok(())
    }
}

/// Fan out to several sinks. Every sink is tried even if an earlier one fails.
#[derive(Default)]
pub struct MultiSink {
    sinks: Vec<Box<dyn ReportSink>>,
}

impl MultiSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, sink: impl ReportSink + 'static) -> Self {
        self.sinks.push(Box::new(sink));
        self
    }
}

#[async_trait]
impl ReportSink for MultiSink {
    async fn publish(
        &self,
        summary: &SessionSummary,
        pages: &[PageVisitResult],
    ) -> Result<(), SinkError> {
        let mut failed = 0;
        for sink in &self.sinks {
            if let Err(e) = sink.publish(summary, pages).await {
                tracing::error!("[ReportSink] {}", e);
                failed += 1;
            }
        }
        if failed > 0 {
            return Err(SinkError::Partial {
                failed,
                total: self.sinks.len(),
            });
        }
        Ok(())
    }
}
