//! Scripted browsing context for end-to-end crawl tests

#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use url::Url;

use browser::{
    BrowsingContext, ConsoleLevel, ContextError, ContextResult, EventStream, PageEvent,
    ResourceType,
};
use crawler::{
    CrawlSettings, GovernorPolicy, PageVisitResult, ReportSink, SessionBootstrap, SessionSummary,
    SinkError, VisitTimings,
};

pub const BASE: &str = "http://app.test";

/// How a scripted navigation ends
#[derive(Debug, Clone)]
pub enum Navigation {
    Load,
    /// The load event never fires
    Hang,
    Fail(String),
    /// Renderer dies during the load
    Crash,
}

/// What a page does when navigated to
#[derive(Debug, Clone)]
pub struct PageScript {
    pub events: Vec<PageEvent>,
    pub navigation: Navigation,
    pub load_after: Duration,
}

impl PageScript {
    pub fn loads() -> Self {
        Self {
            events: Vec::new(),
            navigation: Navigation::Load,
            load_after: Duration::from_millis(50),
        }
    }

    pub fn hangs() -> Self {
        Self {
            navigation: Navigation::Hang,
            ..Self::loads()
        }
    }

    pub fn fails(error: &str) -> Self {
        Self {
            navigation: Navigation::Fail(error.to_string()),
            ..Self::loads()
        }
    }

    pub fn crashes() -> Self {
        Self {
            navigation: Navigation::Crash,
            ..Self::loads()
        }
    }

    pub fn emit(mut self, event: PageEvent) -> Self {
        self.events.push(event);
        self
    }

    pub fn warn(self, text: &str) -> Self {
        self.emit(PageEvent::Console {
            level: ConsoleLevel::Warning,
            text: text.to_string(),
        })
    }

    pub fn error(self, text: &str) -> Self {
        self.emit(PageEvent::Console {
            level: ConsoleLevel::Error,
            text: text.to_string(),
        })
    }

    /// `count` paused XHRs under `/api/`
    pub fn api_requests(mut self, count: usize) -> Self {
        for i in 0..count {
            self.events.push(PageEvent::RequestPaused {
                id: format!("api-{}", i),
                url: format!("{}/api/items/{}", BASE, i),
                resource_type: ResourceType::Api,
            });
        }
        self
    }

    pub fn response(self, path: &str, status: u16, resource_type: ResourceType) -> Self {
        self.emit(PageEvent::Response {
            id: path.to_string(),
            url: format!("{}{}", BASE, path),
            status,
            resource_type,
        })
    }
}

type Slot = Arc<Mutex<Option<mpsc::UnboundedSender<PageEvent>>>>;

/// In-memory [`BrowsingContext`] that plays back a script per URL
#[derive(Default)]
pub struct ScriptedContext {
    pages: HashMap<String, PageScript>,
    listener: Slot,

    pub navigations: Mutex<Vec<String>>,
    pub continued: Mutex<Vec<String>>,
    pub aborted: Mutex<Vec<String>>,
    pub evaluated: Mutex<Vec<String>>,
    pub attaches: AtomicUsize,
    pub detaches: Arc<AtomicUsize>,
    pub close_calls: AtomicUsize,
}

impl ScriptedContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Script the page at `path` (relative to [`BASE`])
    pub fn page(mut self, path: &str, script: PageScript) -> Self {
        self.pages.insert(format!("{}{}", BASE, path), script);
        self
    }

    pub fn into_arc(self) -> Arc<Self> {
        Arc::new(self)
    }

    pub fn is_listening(&self) -> bool {
        self.listener.lock().unwrap().is_some()
    }

    pub fn navigations(&self) -> Vec<String> {
        self.navigations.lock().unwrap().clone()
    }

    fn send(&self, event: PageEvent) {
        if let Some(tx) = self.listener.lock().unwrap().as_ref() {
            let _ = tx.send(event);
        }
    }
}

#[async_trait]
impl BrowsingContext for ScriptedContext {
    async fn attach(&self) -> ContextResult<EventStream> {
        let (tx, rx) = mpsc::unbounded_channel();
        *self.listener.lock().unwrap() = Some(tx);
        self.attaches.fetch_add(1, Ordering::SeqCst);

        let slot = self.listener.clone();
        let detaches = self.detaches.clone();
        Ok(EventStream::new(rx, move || {
            slot.lock().unwrap().take();
            detaches.fetch_add(1, Ordering::SeqCst);
        }))
    }

    async fn navigate(&self, url: &str) -> ContextResult<()> {
        self.navigations.lock().unwrap().push(url.to_string());
        let script = self
            .pages
            .get(url)
            .cloned()
            .unwrap_or_else(PageScript::loads);

        for event in script.events {
            self.send(event);
        }

        match script.navigation {
            Navigation::Load => {
                tokio::time::sleep(script.load_after).await;
                Ok(())
            }
            Navigation::Hang => std::future::pending().await,
            Navigation::Fail(error) => Err(ContextError::Navigation(error)),
            Navigation::Crash => {
                self.send(PageEvent::Crashed);
                std::future::pending().await
            }
        }
    }

    async fn continue_request(&self, id: &str) -> ContextResult<()> {
        self.continued.lock().unwrap().push(id.to_string());
        Ok(())
    }

    async fn abort_request(&self, id: &str) -> ContextResult<()> {
        self.aborted.lock().unwrap().push(id.to_string());
        Ok(())
    }

    async fn evaluate(&self, expression: &str) -> ContextResult<serde_json::Value> {
        self.evaluated.lock().unwrap().push(expression.to_string());
        Ok(serde_json::Value::Null)
    }

    async fn close(&self) -> ContextResult<()> {
        self.close_calls.fetch_add(1, Ordering::SeqCst);
        self.listener.lock().unwrap().take();
        Ok(())
    }
}

/// Hand an already-built context to `crawl`
pub fn ready(
    context: Arc<ScriptedContext>,
) -> impl Future<Output = ContextResult<Arc<dyn BrowsingContext>>> {
    async move { Ok(context as Arc<dyn BrowsingContext>) }
}

/// Keeps every published report
#[derive(Default)]
pub struct MemorySink {
    pub reports: Mutex<Vec<(SessionSummary, Vec<PageVisitResult>)>>,
}

impl MemorySink {
    pub fn reports(&self) -> Vec<(SessionSummary, Vec<PageVisitResult>)> {
        self.reports.lock().unwrap().clone()
    }
}

#[async_trait]
impl ReportSink for MemorySink {
    async fn publish(
        &self,
        summary: &SessionSummary,
        pages: &[PageVisitResult],
    ) -> Result<(), SinkError> {
        self.reports
            .lock()
            .unwrap()
            .push((summary.clone(), pages.to_vec()));
        Ok(())
    }
}

/// Bootstrap that always fails
pub struct BrokenBootstrap;

#[async_trait]
impl SessionBootstrap for BrokenBootstrap {
    async fn bootstrap(&self, _context: &dyn BrowsingContext) -> ContextResult<()> {
        Err(ContextError::Navigation("net::ERR_CONNECTION_REFUSED".to_string()))
    }
}

pub fn settings(routes: &[&str]) -> CrawlSettings {
    CrawlSettings {
        routes: routes.iter().map(|r| r.to_string()).collect(),
        base_url: Some(Url::parse(BASE).unwrap()),
        policy: GovernorPolicy {
            api_call_budget: 20,
            ..GovernorPolicy::default()
        },
        timings: VisitTimings::default(),
        cooldown: Duration::from_millis(8000),
        reauthenticate_each_visit: false,
    }
}
