//! CDP Client - The Core Communication Layer
//!
//! Design decisions:
//! 1. Single WebSocket per browser connection (no per-session WS overhead)
//! 2. Async message passing - no locks on send/receive path
//! 3. Request/response matching via ID, events fanned out to subscribers
//! 4. Subscriptions are removable, so per-visit listeners never outlive the visit
//! 5. Fail fast - no retries, no queuing. Let the caller decide.

use dashmap::DashMap;
use futures_util::{stream::SplitSink, SinkExt, StreamExt};
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, RwLock};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use super::protocol::*;

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;

/// Default upper bound for a single command round-trip.
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Error, Debug)]
pub enum CDPError {
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("CDP protocol error: {code} - {message}")]
    Protocol { code: i32, message: String },

    #[error("Request timeout: {method}")]
    Timeout { method: String },

    #[error("Connection closed")]
    Closed,
}

/// Result type for CDP operations
pub type Result<T> = std::result::Result<T, CDPError>;

/// Event subscriber callback
pub type EventCallback = Arc<dyn Fn(CDPEvent) + Send + Sync>;

/// Handle returned by [`CDPClient::subscribe`], used to remove the callback again.
pub type SubscriptionId = u64;

/// CDP Client - manages single WebSocket connection to browser
pub struct CDPClient {
    /// Monotonic request ID counter
    next_id: AtomicU64,

    /// Monotonic subscription ID counter
    next_subscription: AtomicU64,

    /// Pending requests waiting for responses
    /// Key: request_id, Value: oneshot sender for response
    pending: Arc<DashMap<RequestId, oneshot::Sender<CDPResponse>>>,

    /// Event subscribers
    /// Key: method name (e.g., "Page.loadEventFired"), Value: (id, callback) pairs
    subscribers: Arc<DashMap<String, Vec<(SubscriptionId, EventCallback)>>>,

    /// Reverse index so unsubscribe doesn't scan every method
    subscription_methods: DashMap<SubscriptionId, String>,

    /// WebSocket write half (wrapped for concurrent sending)
    ws_sink: Arc<RwLock<WsSink>>,

    /// Stops the receiver task; held here so the channel lives as long as the client
    shutdown_tx: mpsc::Sender<()>,

    command_timeout: Duration,
}

impl CDPClient {
    /// Connect to Chrome DevTools Protocol endpoint
    pub async fn connect(ws_url: &str) -> Result<Arc<Self>> {
        Self::connect_with_timeout(ws_url, DEFAULT_COMMAND_TIMEOUT).await
    }

    /// Connect with a custom per-command timeout
    pub async fn connect_with_timeout(ws_url: &str, command_timeout: Duration) -> Result<Arc<Self>> {
        let (ws_stream, _) = connect_async(ws_url).await?;
        let (sink, mut stream) = ws_stream.split();
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);

        let client = Arc::new(Self {
            next_id: AtomicU64::new(1),
            next_subscription: AtomicU64::new(1),
            pending: Arc::new(DashMap::new()),
            subscribers: Arc::new(DashMap::new()),
            subscription_methods: DashMap::new(),
            ws_sink: Arc::new(RwLock::new(sink)),
            shutdown_tx,
            command_timeout,
        });

        // The receiver task only holds the maps it needs, not the client itself,
        // so dropping the last client handle still tears everything down.
        let pending = client.pending.clone();
        let subscribers = client.subscribers.clone();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    msg = stream.next() => {
                        match msg {
                            Some(Ok(Message::Text(text))) => {
                                if let Err(e) = Self::handle_message(&pending, &subscribers, &text) {
                                    tracing::error!("Failed to handle message: {}", e);
                                }
                            }
                            Some(Ok(Message::Close(_))) | None => {
                                tracing::info!("WebSocket closed");
                                break;
                            }
                            Some(Err(e)) => {
                                tracing::error!("WebSocket error: {}", e);
                                break;
                            }
                            _ => {}
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        tracing::info!("Shutdown signal received");
                        break;
                    }
                }
            }

            // Dropping the senders wakes every waiter with `Closed`
            pending.clear();
        });

        Ok(client)
    }

    /// Send CDP request and wait for response
    pub async fn send_request(
        &self,
        method: impl Into<String>,
        params: Option<Value>,
        session_id: Option<SessionId>,
    ) -> Result<Value> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let method = method.into();
        let request = CDPRequest {
            id,
            method: method.clone(),
            params,
            session_id,
        };

        let (tx, rx) = oneshot::channel();
        self.pending.insert(id, tx);

        // Serialize and send
        let json = serde_json::to_string(&request)?;
        let mut sink = self.ws_sink.write().await;
        if let Err(e) = sink.send(Message::Text(json)).await {
            self.pending.remove(&id);
            return Err(CDPError::WebSocket(e));
        }
        drop(sink); // Release lock immediately

        // Wait for response
        let response = match tokio::time::timeout(self.command_timeout, rx).await {
            Ok(Ok(response)) => response,
            Ok(Err(_)) => return Err(CDPError::Closed),
            Err(_) => {
                self.pending.remove(&id);
                return Err(CDPError::Timeout { method });
            }
        };

        if let Some(error) = response.error {
            return Err(CDPError::Protocol {
                code: error.code,
                message: error.message,
            });
        }

        Ok(response.result.unwrap_or(Value::Null))
    }

    /// Subscribe to CDP events
    pub fn subscribe(&self, method: impl Into<String>, callback: EventCallback) -> SubscriptionId {
        let method = method.into();
        let id = self.next_subscription.fetch_add(1, Ordering::SeqCst);
        self.subscription_methods.insert(id, method.clone());
        self.subscribers
            .entry(method)
            .or_default()
            .push((id, callback));
        id
    }

    /// Remove a callback registered with [`subscribe`](Self::subscribe).
    ///
    /// Unknown ids are ignored, so calling this twice is harmless.
    pub fn unsubscribe(&self, id: SubscriptionId) {
        let Some((_, method)) = self.subscription_methods.remove(&id) else {
            return;
        };
        if let Some(mut callbacks) = self.subscribers.get_mut(&method) {
            callbacks.retain(|(existing, _)| *existing != id);
        }
        self.subscribers.remove_if(&method, |_, callbacks| callbacks.is_empty());
    }

    /// Handle incoming WebSocket message
    fn handle_message(
        pending: &DashMap<RequestId, oneshot::Sender<CDPResponse>>,
        subscribers: &DashMap<String, Vec<(SubscriptionId, EventCallback)>>,
        text: &str,
    ) -> Result<()> {
        let msg: CDPMessage = serde_json::from_str(text)?;

        match msg {
            CDPMessage::Response(response) => {
                if let Some((_, tx)) = pending.remove(&response.id) {
                    let _ = tx.send(response); // Ignore send errors (receiver dropped)
                } else {
                    tracing::warn!("Received response for unknown request: {}", response.id);
                }
            }
            CDPMessage::Event(event) => {
                // Clone the callbacks out so none of them runs under the map's shard lock
                let callbacks: Vec<EventCallback> = match subscribers.get(&event.method) {
                    Some(entry) => entry.value().iter().map(|(_, cb)| cb.clone()).collect(),
                    None => return Ok(()),
                };
                for callback in callbacks {
                    callback(event.clone());
                }
            }
        }

        Ok(())
    }

    /// Close connection gracefully
    pub async fn close(self: Arc<Self>) -> Result<()> {
        let _ = self.shutdown_tx.try_send(());
        let mut sink = self.ws_sink.write().await;
        sink.close().await?;
        Ok(())
    }
}

/// Subscription that removes itself from the client when dropped
pub struct ScopedSubscription {
    client: Arc<CDPClient>,
    id: SubscriptionId,
}

impl ScopedSubscription {
    pub fn new(client: Arc<CDPClient>, method: impl Into<String>, callback: EventCallback) -> Self {
        let id = client.subscribe(method, callback);
        Self { client, id }
    }
}

impl Drop for ScopedSubscription {
    fn drop(&mut self) {
        self.client.unsubscribe(self.id);
    }
}
