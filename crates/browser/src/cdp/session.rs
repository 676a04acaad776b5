//! CDP Session - Represents a connection to a specific browser target
//!
//! Design: Lightweight wrapper around CDPClient with target-specific context.
//! All sessions share the same WebSocket - no per-session connection overhead.

use super::client::{CDPClient, CDPError, Result};
use super::protocol::{AttachToTargetResult, NavigateResult, SessionId, TargetId};
use serde_json::{json, Value};
use std::sync::Arc;

/// Domains a crawling session needs: navigation, console/exceptions, network
/// bookkeeping and crash notifications.
pub const CRAWL_DOMAINS: [&str; 4] = ["Page", "Runtime", "Network", "Inspector"];

/// CDP Session bound to a specific target
#[derive(Clone)]
pub struct CDPSession {
    /// Shared CDP client
    client: Arc<CDPClient>,

    /// Target this session is attached to
    pub target_id: TargetId,

    /// Session ID assigned by Chrome
    pub session_id: SessionId,
}

impl CDPSession {
    /// Attach to a target and create session
    pub async fn attach(client: Arc<CDPClient>, target_id: TargetId) -> Result<Self> {
        // Attach to target
        let result = client
            .send_request(
                "Target.attachToTarget",
                Some(json!({
                    "targetId": target_id,
                    "flatten": true,
                })),
                None,
            )
            .await?;

        let attach_result: AttachToTargetResult = serde_json::from_value(result)?;
        let session_id = attach_result.session_id;

        // Enable all domains in parallel
        let enable_futures: Vec<_> = CRAWL_DOMAINS
            .into_iter()
            .map(|domain| {
                let client = client.clone();
                let session_id = session_id.clone();
                async move {
                    client
                        .send_request(format!("{}.enable", domain), None, Some(session_id))
                        .await
                }
            })
            .collect();

        // A missing domain means missing signals, so this one is not best-effort
        let results = futures_util::future::join_all(enable_futures).await;
        let failures = results.iter().filter(|r| r.is_err()).count();
        if failures > 0 {
            tracing::warn!("Some domain enables failed: {}/{}", failures, results.len());
            if let Some(Err(e)) = results.into_iter().find(|r| r.is_err()) {
                return Err(e);
            }
        }

        tracing::debug!("Attached to target {} as session {}", target_id, session_id);

        Ok(Self {
            client,
            target_id,
            session_id,
        })
    }

    /// Send command within this session's context
    pub async fn send(&self, method: impl Into<String>, params: Option<Value>) -> Result<Value> {
        self.client
            .send_request(method, params, Some(self.session_id.clone()))
            .await
    }

    /// Navigate to URL
    pub async fn navigate(&self, url: impl Into<String>) -> Result<NavigateResult> {
        let result = self
            .send("Page.navigate", Some(json!({ "url": url.into() })))
            .await?;
        serde_json::from_value(result).map_err(CDPError::Json)
    }

    /// Evaluate JavaScript
    pub async fn evaluate(&self, expression: impl Into<String>) -> Result<Value> {
        self.send(
            "Runtime.evaluate",
            Some(json!({
                "expression": expression.into(),
                "returnByValue": true,
                "awaitPromise": true,
            })),
        )
        .await
    }

    /// Pause every outgoing request at the request stage so it can be
    /// released, delayed or failed explicitly.
    pub async fn enable_interception(&self) -> Result<()> {
        self.send(
            "Fetch.enable",
            Some(json!({
                "patterns": [{ "urlPattern": "*", "requestStage": "Request" }],
            })),
        )
        .await?;
        Ok(())
    }

    /// Release a paused request unchanged
    pub async fn continue_request(&self, request_id: &str) -> Result<()> {
        self.send(
            "Fetch.continueRequest",
            Some(json!({ "requestId": request_id })),
        )
        .await?;
        Ok(())
    }

    /// Fail a paused request; the page sees a network error
    pub async fn fail_request(&self, request_id: &str, reason: &str) -> Result<()> {
        self.send(
            "Fetch.failRequest",
            Some(json!({ "requestId": request_id, "errorReason": reason })),
        )
        .await?;
        Ok(())
    }

    pub async fn set_user_agent(&self, user_agent: &str) -> Result<()> {
        self.send(
            "Network.setUserAgentOverride",
            Some(json!({ "userAgent": user_agent })),
        )
        .await?;
        Ok(())
    }

    pub async fn set_viewport(&self, width: u32, height: u32) -> Result<()> {
        self.send(
            "Emulation.setDeviceMetricsOverride",
            Some(json!({
                "width": width,
                "height": height,
                "deviceScaleFactor": 1,
                "mobile": false,
            })),
        )
        .await?;
        Ok(())
    }
}
