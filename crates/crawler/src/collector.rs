//! Per-visit event collection
//!
//! One task per visit drains the attached [`PageEvent`] stream into an
//! append-only [`VisitLog`]. Paused requests are decided by the visit's
//! [`RequestGovernor`] as they arrive. The log is only handed out once the
//! stream has closed, so nothing is read mid-flight.
//!
//! Two signals leave the task while it runs: the in-flight request count
//! (network-idle detection) and the first fault (crash or closed target).

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::{JoinError, JoinHandle, JoinSet};

use browser::{BrowsingContext, PageEvent, ResourceType};

use crate::classifier::DiagnosticMessage;
use crate::governor::{BlockReason, Decision, GovernorPolicy, RequestGovernor, RequestRecord};
use crate::visitor::ApiCall;

/// Everything observed during one visit
#[derive(Debug, Default)]
pub(crate) struct VisitLog {
    pub requests: Vec<RequestRecord>,
    pub diagnostics: Vec<DiagnosticMessage>,
    pub api_calls: Vec<ApiCall>,
    /// Status of the first document response, the page itself
    pub document_status: Option<u16>,
}

pub(crate) struct Collector {
    handle: JoinHandle<VisitLog>,
    inflight: watch::Receiver<usize>,
    fault: watch::Receiver<Option<String>>,
}

impl Collector {
    pub fn spawn(
        context: Arc<dyn BrowsingContext>,
        events: mpsc::UnboundedReceiver<PageEvent>,
        policy: Arc<GovernorPolicy>,
    ) -> Self {
        let (inflight_tx, inflight) = watch::channel(0);
        let (fault_tx, fault) = watch::channel(None);

        let task = CollectorTask {
            governor: RequestGovernor::new(policy.clone()),
            policy,
            context,
            inflight: HashSet::new(),
            inflight_tx,
            fault_tx,
            delayed: JoinSet::new(),
            throttled: BTreeMap::new(),
            log: VisitLog::default(),
        };

        Self {
            handle: tokio::spawn(task.run(events)),
            inflight,
            fault,
        }
    }

    pub fn idle_monitor(&self) -> IdleMonitor {
        IdleMonitor {
            inflight: self.inflight.clone(),
        }
    }

    pub fn fault_monitor(&self) -> FaultMonitor {
        FaultMonitor {
            fault: self.fault.clone(),
        }
    }

    /// Wait for the stream to close and take the log.
    ///
    /// Call only after the listener has been detached.
    pub async fn finish(self) -> Result<VisitLog, JoinError> {
        self.handle.await
    }
}

struct CollectorTask {
    governor: RequestGovernor,
    policy: Arc<GovernorPolicy>,
    context: Arc<dyn BrowsingContext>,
    inflight: HashSet<String>,
    inflight_tx: watch::Sender<usize>,
    fault_tx: watch::Sender<Option<String>>,
    /// Throttled releases; each task yields its record index once released
    delayed: JoinSet<usize>,
    /// Throttled requests not yet released, by record index
    throttled: BTreeMap<usize, Throttled>,
    log: VisitLog,
}

struct Throttled {
    id: String,
    url: String,
}

impl CollectorTask {
    async fn run(mut self, mut events: mpsc::UnboundedReceiver<PageEvent>) -> VisitLog {
        loop {
            tokio::select! {
                event = events.recv() => match event {
                    Some(event) => self.handle(event).await,
                    None => break,
                },
                Some(joined) = self.delayed.join_next(), if !self.delayed.is_empty() => {
                    self.released(joined);
                }
            }
        }

        self.expire_throttled().await;
        self.log.requests = self.governor.into_records();
        self.log
    }

    fn released(&mut self, joined: Result<usize, JoinError>) {
        match joined {
            Ok(index) => {
                self.throttled.remove(&index);
            }
            Err(e) => tracing::debug!("[PageVisitor] Throttled release task failed: {}", e),
        }
    }

    /// The visit is over. Requests still waiting out their delay are aborted
    /// in the browser and recorded as expired.
    async fn expire_throttled(&mut self) {
        self.delayed.abort_all();
        while let Some(joined) = self.delayed.join_next().await {
            if !matches!(&joined, Err(e) if e.is_cancelled()) {
                self.released(joined);
            }
        }
        if self.throttled.is_empty() {
            return;
        }

        tracing::debug!(
            "[PageVisitor] Aborting {} throttled requests at visit end",
            self.throttled.len()
        );
        for (index, request) in std::mem::take(&mut self.throttled) {
            if let Err(e) = self.context.abort_request(&request.id).await {
                tracing::debug!("[PageVisitor] Could not abort {}: {}", request.url, e);
            }
            self.governor.expire(index);
        }
    }

    async fn handle(&mut self, event: PageEvent) {
        match event {
            PageEvent::RequestPaused {
                id,
                url,
                resource_type,
            } => match self.governor.decide(&url, resource_type) {
                Decision::AllowImmediately => {
                    if let Err(e) = self.context.continue_request(&id).await {
                        tracing::debug!("[PageVisitor] Could not continue {}: {}", url, e);
                    }
                }
                Decision::AllowAfterDelay(delay) => {
                    let index = self.governor.records().len() - 1;
                    self.release_after(index, id, url, delay);
                }
                Decision::Block(reason) => {
                    if let Err(e) = self.context.abort_request(&id).await {
                        tracing::debug!("[PageVisitor] Could not abort {}: {}", url, e);
                    }
                    if reason == BlockReason::Budget {
                        tracing::debug!("[PageVisitor] Aborted over-budget request {}", url);
                    }
                }
            },
            PageEvent::RequestStarted { id } => {
                self.inflight.insert(id);
                self.publish_inflight();
            }
            PageEvent::RequestFinished { id } => {
                self.inflight.remove(&id);
                self.publish_inflight();
            }
            PageEvent::RequestFailed { id, error } => {
                tracing::trace!("[PageVisitor] Request {} failed: {}", id, error);
                self.inflight.remove(&id);
                self.publish_inflight();
            }
            PageEvent::Response {
                url,
                status,
                resource_type,
                ..
            } => {
                if resource_type == ResourceType::Document && self.log.document_status.is_none() {
                    self.log.document_status = Some(status);
                }
                if self.policy.is_api(&url) {
                    if status >= 400 {
                        tracing::debug!("[PageVisitor] API call {} returned {}", url, status);
                    }
                    self.log.api_calls.push(ApiCall { url, status });
                }
            }
            PageEvent::Console { level, text } => {
                self.push_diagnostic(DiagnosticMessage::console(level.into(), text));
            }
            PageEvent::Exception { text } => {
                self.push_diagnostic(DiagnosticMessage::exception(text));
            }
            PageEvent::Crashed => self.raise_fault("page crashed".to_string()),
            PageEvent::TargetClosed { reason } => {
                self.raise_fault(format!("target closed: {}", reason));
            }
        }
    }

    /// The request stays paused until the delay has fully elapsed
    fn release_after(&mut self, index: usize, id: String, url: String, delay: Duration) {
        let context = self.context.clone();
        self.throttled.insert(
            index,
            Throttled {
                id: id.clone(),
                url: url.clone(),
            },
        );
        self.delayed.spawn(async move {
            tokio::time::sleep(delay).await;
            if let Err(e) = context.continue_request(&id).await {
                tracing::debug!("[PageVisitor] Could not release {}: {}", url, e);
            }
            index
        });
    }

    fn push_diagnostic(&mut self, message: DiagnosticMessage) {
        if message.is_blank() {
            return;
        }
        self.log.diagnostics.push(message);
    }

    fn publish_inflight(&self) {
        self.inflight_tx.send_replace(self.inflight.len());
    }

    /// Only the first fault of a visit is kept
    fn raise_fault(&self, reason: String) {
        self.fault_tx.send_if_modified(|fault| {
            if fault.is_some() {
                return false;
            }
            tracing::warn!("[PageVisitor] {}", reason);
            *fault = Some(reason);
            true
        });
    }
}

/// Watches the in-flight request count of a visit
pub(crate) struct IdleMonitor {
    inflight: watch::Receiver<usize>,
}

impl IdleMonitor {
    /// Resolve once at most `max_inflight` requests have been in flight for a
    /// continuous `quiet` period. Resolves right away if collection has ended.
    pub async fn wait(&mut self, max_inflight: usize, quiet: Duration) {
        loop {
            if self.inflight.wait_for(|n| *n <= max_inflight).await.is_err() {
                return;
            }
            let busy = tokio::time::timeout(quiet, self.inflight.wait_for(|n| *n > max_inflight)).await;
            match busy {
                // quiet period held
                Err(_) => return,
                Ok(Ok(_)) => continue,
                Ok(Err(_)) => return,
            }
        }
    }
}

/// Watches for a crash or closed target
pub(crate) struct FaultMonitor {
    fault: watch::Receiver<Option<String>>,
}

impl FaultMonitor {
    /// Resolve with the fault text. Never resolves if the visit ends cleanly.
    pub async fn wait(&mut self) -> String {
        let fault = match self.fault.wait_for(|fault| fault.is_some()).await {
            Ok(fault) => fault.clone(),
            Err(_) => None,
        };
        match fault {
            Some(reason) => reason,
            None => std::future::pending().await,
        }
    }
}
