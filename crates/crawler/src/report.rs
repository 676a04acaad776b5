//! Report aggregation
//!
//! [`aggregate`] is a pure reduction over visit results. The summary is never
//! mutated on its own; recompute it instead.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::classifier::BucketCounts;
use crate::governor::RequestOutcome;
use crate::visitor::{PageVisitResult, VisitStatus};

/// Session-wide request decision totals
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestTotals {
    pub allowed: u64,
    pub blocked_by_type: u64,
    pub blocked_by_budget: u64,
    /// Throttled requests aborted because their visit ended first
    pub expired: u64,
    /// Highest number of API calls allowed on a single visit
    pub max_api_calls_per_visit: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointStats {
    pub total: u64,
    pub successful: u64,
    pub failed: u64,
}

impl EndpointStats {
    fn record(&mut self, failed: bool) {
        self.total += 1;
        if failed {
            self.failed += 1;
        } else {
            self.successful += 1;
        }
    }
}

/// API responses across the session
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiAnalysis {
    pub total: u64,
    pub successful: u64,
    pub failed: u64,
    pub by_endpoint: BTreeMap<String, EndpointStats>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RankedRoute {
    pub route: String,
    pub problems: u32,
    pub status: VisitStatus,
    pub counts: BucketCounts,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSummary {
    pub total_pages: u64,
    pub successful: u64,
    pub failed: u64,
    /// Sum of every visit's bucket counts
    pub totals: BucketCounts,
    pub total_errors: u64,
    pub total_structural: u64,
    pub total_duplicate_attributes: u64,
    pub requests: RequestTotals,
    pub api: ApiAnalysis,
    pub average_duration_ms: u64,
    /// Routes with problems, worst first
    pub ranking: Vec<RankedRoute>,
}

impl SessionSummary {
    /// Every visit succeeded and no structural defect was seen
    pub fn is_healthy(&self) -> bool {
        self.failed == 0 && self.total_structural == 0 && self.total_duplicate_attributes == 0
    }

    pub fn exit_code(&self) -> u8 {
        if self.is_healthy() {
            0
        } else {
            1
        }
    }
}

/// Reduce visit results into a summary
pub fn aggregate(results: &[PageVisitResult]) -> SessionSummary {
    let mut summary = SessionSummary {
        total_pages: results.len() as u64,
        ..SessionSummary::default()
    };
    let mut total_duration = 0u64;

    for result in results {
        match result.status {
            VisitStatus::Success => summary.successful += 1,
            VisitStatus::Failed => summary.failed += 1,
        }
        summary.totals.merge(&result.counts);
        total_duration += result.duration_ms;

        for request in &result.requests {
            match request.outcome {
                RequestOutcome::Allowed => summary.requests.allowed += 1,
                RequestOutcome::BlockedByType => summary.requests.blocked_by_type += 1,
                RequestOutcome::BlockedByBudget => summary.requests.blocked_by_budget += 1,
                RequestOutcome::Expired => summary.requests.expired += 1,
            }
        }
        summary.requests.max_api_calls_per_visit = summary
            .requests
            .max_api_calls_per_visit
            .max(result.allowed_api_requests() as u64);

        for call in &result.api_calls {
            let failed = call.failed();
            summary.api.total += 1;
            if failed {
                summary.api.failed += 1;
            } else {
                summary.api.successful += 1;
            }
            summary
                .api
                .by_endpoint
                .entry(normalize_endpoint(&call.url))
                .or_default()
                .record(failed);
        }
    }

    summary.total_errors = summary.totals.errors() as u64;
    summary.total_structural = summary.totals.structural_error as u64;
    summary.total_duplicate_attributes = summary.totals.duplicate_attribute as u64;
    if !results.is_empty() {
        summary.average_duration_ms = total_duration / results.len() as u64;
    }
    summary.ranking = rank(results);
    summary
}

/// Routes with at least one problem, descending. Ties keep route order.
fn rank(results: &[PageVisitResult]) -> Vec<RankedRoute> {
    let mut ranking: Vec<RankedRoute> = results
        .iter()
        .filter(|result| result.counts.problems() > 0)
        .map(|result| RankedRoute {
            route: result.route.clone(),
            problems: result.counts.problems(),
            status: result.status,
            counts: result.counts,
        })
        .collect();
    // sort_by is stable
    ranking.sort_by(|a, b| b.problems.cmp(&a.problems));
    ranking
}

/// Collapse ids in an API URL: `/api/users/42?page=2` -> `/api/users/:id?page=:id`.
///
/// Scheme, host and port are left alone.
pub fn normalize_endpoint(url: &str) -> String {
    let (origin, rest) = match url.find("://") {
        Some(scheme_end) => {
            let authority_start = scheme_end + 3;
            let path_start = url[authority_start..]
                .find(['/', '?', '#'])
                .map(|i| authority_start + i)
                .unwrap_or(url.len());
            url.split_at(path_start)
        }
        None => ("", url),
    };

    let mut normalized = String::with_capacity(url.len());
    normalized.push_str(origin);
    let mut in_digits = false;
    for c in rest.chars() {
        if c.is_ascii_digit() {
            if !in_digits {
                normalized.push_str(":id");
            }
            in_digits = true;
        } else {
            normalized.push(c);
            in_digits = false;
        }
    }
    normalized
}
