//! Page visitor - one route, one visit
//!
//! ```text
//! Idle -> Navigating -> Settling -> Collecting -> Completed
//!   \          \            \
//!    +----------+------------+----> Failed
//! ```
//!
//! The event stream is attached before navigation starts and detached on every
//! exit path, so collection runs alongside all phases. The log is read once,
//! after detach.

use serde::ser::SerializeStruct;
use serde::{Deserialize, Serialize, Serializer};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use url::Url;

use browser::BrowsingContext;

use crate::bootstrap::SessionBootstrap;
use crate::classifier::{BucketCounts, DiagnosticMessage};
use crate::collector::{Collector, IdleMonitor, VisitLog};
use crate::governor::{GovernorPolicy, RequestOutcome, RequestRecord};

/// Suspension points of a visit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VisitTimings {
    pub navigation_timeout: Duration,
    pub settle_delay: Duration,
    /// How long the network must stay quiet to count as idle
    pub idle_quiet: Duration,
    /// Requests still allowed in flight while "idle"
    pub idle_max_inflight: usize,
}

impl Default for VisitTimings {
    fn default() -> Self {
        Self {
            navigation_timeout: Duration::from_millis(30_000),
            settle_delay: Duration::from_millis(5_000),
            idle_quiet: Duration::from_millis(500),
            idle_max_inflight: 2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VisitState {
    Idle,
    Navigating,
    Settling,
    Collecting,
    Completed,
    Failed,
}

impl fmt::Display for VisitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            VisitState::Idle => "Idle",
            VisitState::Navigating => "Navigating",
            VisitState::Settling => "Settling",
            VisitState::Collecting => "Collecting",
            VisitState::Completed => "Completed",
            VisitState::Failed => "Failed",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VisitStatus {
    Success,
    Failed,
}

/// Why a visit failed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureReason {
    NavigationTimeout { timeout_ms: u64 },
    /// Unresolvable route or navigation-level error text
    Navigation(String),
    /// Crash, closed target, broken context or failed re-authentication
    Context(String),
}

impl FailureReason {
    pub fn category(&self) -> &'static str {
        match self {
            FailureReason::NavigationTimeout { .. } | FailureReason::Navigation(_) => "navigation",
            FailureReason::Context(_) => "context",
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            FailureReason::NavigationTimeout { .. } => "navigation-timeout",
            FailureReason::Navigation(_) => "navigation",
            FailureReason::Context(_) => "context",
        }
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::NavigationTimeout { timeout_ms } => {
                write!(f, "navigation timed out after {}ms", timeout_ms)
            }
            FailureReason::Navigation(message) => write!(f, "navigation failed: {}", message),
            FailureReason::Context(message) => write!(f, "{}", message),
        }
    }
}

impl Serialize for FailureReason {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("FailureReason", 3)?;
        state.serialize_field("category", self.category())?;
        state.serialize_field("kind", self.kind())?;
        state.serialize_field("message", &self.to_string())?;
        state.end()
    }
}

/// Response to a budgeted API request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiCall {
    pub url: String,
    pub status: u16,
}

impl ApiCall {
    pub fn failed(&self) -> bool {
        self.status >= 400
    }
}

/// Result of one visit. Built once, never mutated.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PageVisitResult {
    pub route: String,
    /// Resolved URL, absent when the route could not be resolved
    pub url: Option<String>,
    pub status: VisitStatus,
    pub duration_ms: u64,
    /// Time until the load event, absent when it never fired
    pub load_ms: Option<u64>,
    pub requests: Vec<RequestRecord>,
    pub counts: BucketCounts,
    pub diagnostics: Vec<DiagnosticMessage>,
    pub api_calls: Vec<ApiCall>,
    pub failure: Option<FailureReason>,
}

impl PageVisitResult {
    pub fn is_success(&self) -> bool {
        self.status == VisitStatus::Success
    }

    /// API requests the governor let through on this visit
    pub fn allowed_api_requests(&self) -> usize {
        self.requests
            .iter()
            .filter(|r| r.api && r.outcome == RequestOutcome::Allowed)
            .count()
    }
}

/// Resolve a route against the optional base URL
pub fn resolve_route(base: Option<&Url>, route: &str) -> Result<Url, String> {
    match Url::parse(route) {
        Ok(url) => Ok(url),
        Err(url::ParseError::RelativeUrlWithoutBase) => match base {
            Some(base) => base
                .join(route)
                .map_err(|e| format!("cannot resolve {} against {}: {}", route, base, e)),
            None => Err(format!("relative route {} needs a base URL", route)),
        },
        Err(e) => Err(format!("invalid route {}: {}", route, e)),
    }
}

/// Drives single visits on a shared browsing context
pub struct PageVisitor {
    context: Arc<dyn BrowsingContext>,
    policy: Arc<GovernorPolicy>,
    timings: VisitTimings,
    base_url: Option<Url>,
}

impl PageVisitor {
    pub fn new(
        context: Arc<dyn BrowsingContext>,
        policy: Arc<GovernorPolicy>,
        timings: VisitTimings,
        base_url: Option<Url>,
    ) -> Self {
        Self {
            context,
            policy,
            timings,
            base_url,
        }
    }

    /// Visit one route. Never fails: problems end up in the result.
    ///
    /// With `reauth`, the bootstrap runs again before anything is attached, so
    /// its traffic is neither recorded nor budgeted.
    pub async fn visit(
        &self,
        route: &str,
        reauth: Option<&dyn SessionBootstrap>,
    ) -> PageVisitResult {
        let started = Instant::now();
        tracing::info!("[PageVisitor] Visiting {}", route);

        let url = match resolve_route(self.base_url.as_ref(), route) {
            Ok(url) => url,
            Err(message) => {
                return self.failed_early(route, None, started, FailureReason::Navigation(message))
            }
        };

        if let Some(bootstrap) = reauth {
            if let Err(e) = bootstrap.bootstrap(self.context.as_ref()).await {
                let reason = FailureReason::Context(format!("re-authentication failed: {}", e));
                return self.failed_early(route, Some(&url), started, reason);
            }
        }

        let stream = match self.context.attach().await {
            Ok(stream) => stream,
            Err(e) => {
                let reason = FailureReason::Context(format!("cannot attach listener: {}", e));
                return self.failed_early(route, Some(&url), started, reason);
            }
        };
        let (events, listener) = stream.into_parts();
        let collector = Collector::spawn(self.context.clone(), events, self.policy.clone());

        let mut fault = collector.fault_monitor();
        let mut state = VisitState::Idle;
        let phases = self.run_phases(route, url.as_str(), collector.idle_monitor(), &mut state);
        let outcome = tokio::select! {
            biased;
            reason = fault.wait() => Err(FailureReason::Context(reason)),
            outcome = phases => outcome,
        };

        // Collecting: stop the stream, then read the log exactly once
        if outcome.is_ok() {
            advance(route, &mut state, VisitState::Collecting);
        }
        listener.detach();
        let log = match collector.finish().await {
            Ok(log) => log,
            Err(e) => {
                tracing::error!("[PageVisitor] Collector for {} died: {}", route, e);
                let reason = FailureReason::Context(format!("event collection failed: {}", e));
                return self.failed_early(route, Some(&url), started, reason);
            }
        };

        let outcome = outcome.and_then(|load| match log.document_status {
            Some(status) if status >= 400 => {
                Err(FailureReason::Navigation(format!("HTTP {}", status)))
            }
            _ => Ok(load),
        });

        let result = build_result(route, Some(&url), started, outcome, log);
        match &result.failure {
            None => {
                advance(route, &mut state, VisitState::Completed);
                tracing::info!(
                    "[PageVisitor] {} succeeded in {}ms ({} diagnostics, {} requests)",
                    route,
                    result.duration_ms,
                    result.diagnostics.len(),
                    result.requests.len()
                );
            }
            Some(reason) => {
                advance(route, &mut state, VisitState::Failed);
                tracing::warn!(
                    "[PageVisitor] {} failed after {}ms: {}",
                    route,
                    result.duration_ms,
                    reason
                );
            }
        }
        result
    }

    /// Navigating and Settling. Returns the load time.
    async fn run_phases(
        &self,
        route: &str,
        url: &str,
        mut idle: IdleMonitor,
        state: &mut VisitState,
    ) -> Result<Duration, FailureReason> {
        let started = Instant::now();
        let deadline = started + self.timings.navigation_timeout;

        advance(route, state, VisitState::Navigating);
        match tokio::time::timeout_at(deadline, self.context.navigate(url)).await {
            Err(_) => {
                return Err(FailureReason::NavigationTimeout {
                    timeout_ms: self.timings.navigation_timeout.as_millis() as u64,
                })
            }
            Ok(Err(e)) => return Err(FailureReason::Navigation(e.to_string())),
            Ok(Ok(())) => {}
        }
        let load = started.elapsed();

        // Idle network or the navigation deadline, whichever comes first
        let quiet = idle.wait(self.timings.idle_max_inflight, self.timings.idle_quiet);
        if tokio::time::timeout_at(deadline, quiet).await.is_err() {
            tracing::debug!("[PageVisitor] {} never went idle before the deadline", route);
        }

        advance(route, state, VisitState::Settling);
        tokio::time::sleep(self.timings.settle_delay).await;
        Ok(load)
    }

    fn failed_early(
        &self,
        route: &str,
        url: Option<&Url>,
        started: Instant,
        reason: FailureReason,
    ) -> PageVisitResult {
        advance(route, &mut VisitState::Idle, VisitState::Failed);
        tracing::warn!("[PageVisitor] {} failed: {}", route, reason);
        build_result(route, url, started, Err(reason), VisitLog::default())
    }
}

fn advance(route: &str, state: &mut VisitState, to: VisitState) {
    tracing::trace!("[PageVisitor] {}: {} -> {}", route, state, to);
    *state = to;
}

fn build_result(
    route: &str,
    url: Option<&Url>,
    started: Instant,
    outcome: Result<Duration, FailureReason>,
    log: VisitLog,
) -> PageVisitResult {
    let (status, load_ms, failure) = match outcome {
        Ok(load) => (VisitStatus::Success, Some(load.as_millis() as u64), None),
        Err(reason) => (VisitStatus::Failed, None, Some(reason)),
    };

    PageVisitResult {
        route: route.to_string(),
        url: url.map(Url::to_string),
        status,
        duration_ms: started.elapsed().as_millis() as u64,
        load_ms,
        counts: BucketCounts::from_messages(&log.diagnostics),
        requests: log.requests,
        diagnostics: log.diagnostics,
        api_calls: log.api_calls,
        failure,
    }
}
