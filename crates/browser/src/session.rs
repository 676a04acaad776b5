//! Browser Session Management
//!
//! `CdpContext` is the CDP-backed [`BrowsingContext`]: one isolated browser
//! context, one page, request interception always on.
//!
//! All CDP subscriptions are installed once at open and route into a single
//! listener slot. Attaching a stream fills the slot, detaching empties it.
//! With the slot empty, page events are dropped and paused requests are
//! released immediately, so nothing leaks from one visit into the next and
//! nothing stalls between visits.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

use crate::cdp::client::DEFAULT_COMMAND_TIMEOUT;
use crate::cdp::{CDPClient, CDPEvent, CDPSession, ScopedSubscription};
use crate::context::{BrowsingContext, ContextError, ContextResult, EventStream};
use crate::events::{PageEvent, PAGE_EVENT_METHODS};

/// Session configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    pub id: String,
    /// Browser-level DevTools WebSocket endpoint
    pub cdp_url: String,
    pub user_agent: Option<String>,
    pub viewport: Option<(u32, u32)>,
    pub command_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            id: Uuid::now_v7().to_string(),
            cdp_url: "ws://localhost:9222".to_string(),
            user_agent: None,
            viewport: None,
            command_timeout: DEFAULT_COMMAND_TIMEOUT,
        }
    }
}

type ListenerSlot = Arc<Mutex<Option<(u64, mpsc::UnboundedSender<PageEvent>)>>>;

/// CDP-backed browsing context
pub struct CdpContext {
    pub config: SessionConfig,

    // CDP infrastructure
    client: Arc<CDPClient>,
    page: CDPSession,
    browser_context_id: String,

    listener: ListenerSlot,
    next_listener: AtomicU64,
    closed: AtomicBool,

    // Held for their Drop: removes the routing callbacks from the client
    _routes: Vec<ScopedSubscription>,
}

impl CdpContext {
    /// Connect, create an isolated context with a blank page, enable interception
    pub async fn open(config: SessionConfig) -> ContextResult<Self> {
        tracing::info!(
            "[CdpContext] Session {} connecting to {}",
            config.id,
            config.cdp_url
        );
        let client = CDPClient::connect_with_timeout(&config.cdp_url, config.command_timeout).await?;

        let created = client
            .send_request(
                "Target.createBrowserContext",
                Some(json!({ "disposeOnDetach": true })),
                None,
            )
            .await?;
        let browser_context_id = created["browserContextId"]
            .as_str()
            .ok_or(ContextError::MissingField("browserContextId"))?
            .to_string();

        let target = client
            .send_request(
                "Target.createTarget",
                Some(json!({
                    "url": "about:blank",
                    "browserContextId": browser_context_id,
                })),
                None,
            )
            .await?;
        let target_id = target["targetId"]
            .as_str()
            .ok_or(ContextError::MissingField("targetId"))?
            .to_string();

        let page = CDPSession::attach(client.clone(), target_id).await?;

        if let Some(user_agent) = &config.user_agent {
            page.set_user_agent(user_agent).await?;
        }
        if let Some((width, height)) = config.viewport {
            page.set_viewport(width, height).await?;
        }

        let listener: ListenerSlot = Arc::new(Mutex::new(None));
        let routes = Self::route_events(&client, &page, &listener);

        // Interception last: from here on every request needs an owner
        page.enable_interception().await?;

        tracing::info!(
            "[CdpContext] Ready: browser context {}, target {}",
            browser_context_id,
            page.target_id
        );

        Ok(Self {
            config,
            client,
            page,
            browser_context_id,
            listener,
            next_listener: AtomicU64::new(1),
            closed: AtomicBool::new(false),
            _routes: routes,
        })
    }

    /// Subscribe every page-event method, filtered to this page's session
    fn route_events(
        client: &Arc<CDPClient>,
        page: &CDPSession,
        listener: &ListenerSlot,
    ) -> Vec<ScopedSubscription> {
        PAGE_EVENT_METHODS
            .iter()
            .map(|method| {
                let listener = listener.clone();
                let page = page.clone();
                ScopedSubscription::new(
                    client.clone(),
                    *method,
                    Arc::new(move |event: CDPEvent| {
                        if event.session_id.as_deref() != Some(page.session_id.as_str()) {
                            return;
                        }
                        let Some(page_event) = PageEvent::from_cdp(&event) else {
                            return;
                        };
                        if let Some(unclaimed) = forward(&listener, page_event) {
                            release_unclaimed(&page, unclaimed);
                        }
                    }),
                )
            })
            .collect()
    }

    fn ensure_open(&self) -> ContextResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(ContextError::Closed);
        }
        Ok(())
    }
}

fn lock_slot(
    slot: &ListenerSlot,
) -> std::sync::MutexGuard<'_, Option<(u64, mpsc::UnboundedSender<PageEvent>)>> {
    slot.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Hand the event to the attached listener; give it back if nobody is listening
fn forward(slot: &ListenerSlot, event: PageEvent) -> Option<PageEvent> {
    let guard = lock_slot(slot);
    match guard.as_ref() {
        Some((_, tx)) => tx.send(event).err().map(|returned| returned.0),
        None => Some(event),
    }
}

/// Paused requests must never hang: without a listener they go straight through
fn release_unclaimed(page: &CDPSession, event: PageEvent) {
    if let PageEvent::RequestPaused { id, url, .. } = event {
        let page = page.clone();
        tokio::spawn(async move {
            if let Err(e) = page.continue_request(&id).await {
                tracing::debug!("[CdpContext] Could not release {}: {}", url, e);
            }
        });
    }
}

#[async_trait]
impl BrowsingContext for CdpContext {
    async fn attach(&self) -> ContextResult<EventStream> {
        self.ensure_open()?;
        let (tx, rx) = mpsc::unbounded_channel();
        let id = self.next_listener.fetch_add(1, Ordering::SeqCst);

        if lock_slot(&self.listener).replace((id, tx)).is_some() {
            tracing::warn!("[CdpContext] Replaced a listener that was never detached");
        }
        tracing::debug!("[CdpContext] Listener {} attached", id);

        let slot = self.listener.clone();
        Ok(EventStream::new(rx, move || {
            let mut guard = lock_slot(&slot);
            if matches!(guard.as_ref(), Some((current, _)) if *current == id) {
                *guard = None;
                tracing::debug!("[CdpContext] Listener {} detached", id);
            }
        }))
    }

    async fn navigate(&self, url: &str) -> ContextResult<()> {
        self.ensure_open()?;

        // Register before navigating so a fast load can't slip past
        let (tx, rx) = oneshot::channel();
        let tx = Mutex::new(Some(tx));
        let session_id = self.page.session_id.clone();
        let _load = ScopedSubscription::new(
            self.client.clone(),
            "Page.loadEventFired",
            Arc::new(move |event: CDPEvent| {
                if event.session_id.as_deref() == Some(session_id.as_str()) {
                    if let Some(tx) = tx.lock().unwrap_or_else(PoisonError::into_inner).take() {
                        let _ = tx.send(());
                    }
                }
            }),
        );

        let result = self.page.navigate(url).await?;
        if let Some(error) = result.failure() {
            return Err(ContextError::Navigation(error.to_string()));
        }
        if !result.loads_document() {
            tracing::debug!("[CdpContext] Same-document navigation to {}", url);
            return Ok(());
        }

        rx.await.map_err(|_| ContextError::Closed)
    }

    async fn continue_request(&self, id: &str) -> ContextResult<()> {
        self.page.continue_request(id).await?;
        Ok(())
    }

    async fn abort_request(&self, id: &str) -> ContextResult<()> {
        self.page.fail_request(id, "BlockedByClient").await?;
        Ok(())
    }

    async fn evaluate(&self, expression: &str) -> ContextResult<serde_json::Value> {
        self.ensure_open()?;
        let result = self.page.evaluate(expression).await?;
        if let Some(details) = result.get("exceptionDetails") {
            let text = details["exception"]["description"]
                .as_str()
                .or_else(|| details["text"].as_str())
                .unwrap_or("exception")
                .to_string();
            return Err(ContextError::Evaluation(text));
        }
        Ok(result["result"]["value"].clone())
    }

    async fn close(&self) -> ContextResult<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        lock_slot(&self.listener).take();

        if let Err(e) = self
            .client
            .send_request(
                "Target.disposeBrowserContext",
                Some(json!({ "browserContextId": self.browser_context_id })),
                None,
            )
            .await
        {
            tracing::warn!("[CdpContext] Failed to dispose browser context: {}", e);
        }

        self.client.clone().close().await?;
        tracing::info!("[CdpContext] Session {} closed", self.config.id);
        Ok(())
    }
}
