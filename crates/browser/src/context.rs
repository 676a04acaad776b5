//! Browsing context contract
//!
//! The crawler only ever talks to a browser through this trait. The CDP
//! implementation lives in [`crate::session`]; tests drive the crawler with
//! scripted implementations.

use async_trait::async_trait;
use std::fmt;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::cdp::CDPError;
use crate::events::PageEvent;

#[derive(Debug, Error)]
pub enum ContextError {
    #[error("CDP error: {0}")]
    Cdp(#[from] CDPError),

    #[error("Navigation failed: {0}")]
    Navigation(String),

    #[error("Script evaluation failed: {0}")]
    Evaluation(String),

    #[error("Missing field in CDP response: {0}")]
    MissingField(&'static str),

    #[error("Browsing context closed")]
    Closed,
}

pub type ContextResult<T> = std::result::Result<T, ContextError>;

/// Minimal browser capability set a crawl needs.
///
/// One context owns exactly one page. At most one [`EventStream`] is attached
/// at a time; while none is attached, intercepted requests are released
/// without inspection.
#[async_trait]
pub trait BrowsingContext: Send + Sync {
    /// Start delivering [`PageEvent`]s for this context
    async fn attach(&self) -> ContextResult<EventStream>;

    /// Load `url`, resolving once the load event fired.
    ///
    /// No timeout is applied here; callers bound the future themselves.
    async fn navigate(&self, url: &str) -> ContextResult<()>;

    /// Release an intercepted request
    async fn continue_request(&self, id: &str) -> ContextResult<()>;

    /// Fail an intercepted request as blocked-by-client
    async fn abort_request(&self, id: &str) -> ContextResult<()>;

    /// Run a script in the page and return its JSON value
    async fn evaluate(&self, expression: &str) -> ContextResult<serde_json::Value>;

    /// Dispose the context. Safe to call more than once.
    async fn close(&self) -> ContextResult<()>;
}

/// Detach guard for an attached stream.
///
/// Runs its detach hook exactly once, either through [`Listener::detach`] or on drop.
pub struct Listener {
    on_detach: Option<Box<dyn FnOnce() + Send>>,
}

impl Listener {
    pub fn new(on_detach: impl FnOnce() + Send + 'static) -> Self {
        Self {
            on_detach: Some(Box::new(on_detach)),
        }
    }

    pub fn detach(mut self) {
        self.run_hook();
    }

    fn run_hook(&mut self) {
        if let Some(hook) = self.on_detach.take() {
            hook();
        }
    }
}

impl Drop for Listener {
    fn drop(&mut self) {
        self.run_hook();
    }
}

impl fmt::Debug for Listener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Listener")
            .field("attached", &self.on_detach.is_some())
            .finish()
    }
}

/// Events of one attachment plus the guard that ends it.
///
/// Once detached, the producer side drops its sender: the receiver yields
/// whatever is still buffered and then `None`.
#[derive(Debug)]
pub struct EventStream {
    events: mpsc::UnboundedReceiver<PageEvent>,
    listener: Listener,
}

impl EventStream {
    pub fn new(
        events: mpsc::UnboundedReceiver<PageEvent>,
        on_detach: impl FnOnce() + Send + 'static,
    ) -> Self {
        Self {
            events,
            listener: Listener::new(on_detach),
        }
    }

    /// Split so the receiver can move into a consumer task while the caller keeps the guard
    pub fn into_parts(self) -> (mpsc::UnboundedReceiver<PageEvent>, Listener) {
        (self.events, self.listener)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_listener_hook_runs_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let listener = Listener::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        listener.detach();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_listener_detaches_on_drop() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        {
            let (_tx, rx) = mpsc::unbounded_channel();
            let _stream = EventStream::new(rx, move || {
                counter.fetch_add(1, Ordering::SeqCst);
            });
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_buffered_events_survive_detach() {
        let (tx, rx) = mpsc::unbounded_channel();
        let slot = Arc::new(std::sync::Mutex::new(Some(tx)));
        let hook_slot = slot.clone();
        let stream = EventStream::new(rx, move || {
            hook_slot.lock().unwrap().take();
        });

        if let Some(tx) = slot.lock().unwrap().as_ref() {
            tx.send(PageEvent::Crashed).unwrap();
        }

        let (mut events, listener) = stream.into_parts();
        listener.detach();

        assert_eq!(events.recv().await, Some(PageEvent::Crashed));
        assert_eq!(events.recv().await, None);
    }
}
