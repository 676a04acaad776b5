//! CDP Protocol Types
//!
//! These are the fundamental types for CDP communication.
//! Keep them minimal - add domain-specific types only when needed.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Request ID - monotonically increasing
pub type RequestId = u64;

/// Target ID from Chrome
pub type TargetId = String;

/// Session ID for attached targets
pub type SessionId = String;

/// CDP Request sent to browser
#[derive(Debug, Clone, Serialize)]
pub struct CDPRequest {
    pub id: RequestId,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
    #[serde(rename = "sessionId", skip_serializing_if = "Option::is_none")]
    pub session_id: Option<SessionId>,
}

/// CDP Response from browser
#[derive(Debug, Clone, Deserialize)]
pub struct CDPResponse {
    pub id: RequestId,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<CDPError>,
}

/// CDP Error
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CDPError {
    pub code: i32,
    pub message: String,
    #[serde(default)]
    pub data: Option<Value>,
}

/// CDP Event from browser (no request ID)
#[derive(Debug, Clone, Deserialize)]
pub struct CDPEvent {
    pub method: String,
    #[serde(default)]
    pub params: Option<Value>,
    #[serde(rename = "sessionId", default)]
    pub session_id: Option<SessionId>,
}

impl CDPEvent {
    /// Decode the params into a typed payload, `None` if absent or malformed
    pub fn params_as<T: serde::de::DeserializeOwned>(&self) -> Option<T> {
        self.params
            .clone()
            .and_then(|params| serde_json::from_value(params).ok())
    }
}

/// Unified CDP Message (request, response, or event)
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum CDPMessage {
    Response(CDPResponse),
    Event(CDPEvent),
}

/// Result of Target.attachToTarget
#[derive(Debug, Clone, Deserialize)]
pub struct AttachToTargetResult {
    #[serde(rename = "sessionId")]
    pub session_id: SessionId,
}

/// Result of Page.navigate
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NavigateResult {
    #[serde(default)]
    pub frame_id: Option<String>,
    /// Absent for same-document navigations (fragment and history API changes)
    #[serde(default)]
    pub loader_id: Option<String>,
    /// Set when the navigation failed before commit (DNS, refused connection, ...)
    #[serde(default)]
    pub error_text: Option<String>,
}

impl NavigateResult {
    pub fn failure(&self) -> Option<&str> {
        self.error_text.as_deref().filter(|text| !text.is_empty())
    }

    /// Whether a new document is loading. Only then does `Page.loadEventFired` follow.
    pub fn loads_document(&self) -> bool {
        self.loader_id.is_some()
    }
}

/// Runtime.RemoteObject, only the parts needed to render console arguments
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteObject {
    #[serde(rename = "type", default)]
    pub object_type: Option<String>,
    #[serde(default)]
    pub value: Option<Value>,
    #[serde(default)]
    pub unserializable_value: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

impl RemoteObject {
    /// Render the object the way DevTools prints it in the console
    pub fn render(&self) -> String {
        match (&self.value, &self.unserializable_value, &self.description) {
            (Some(Value::String(s)), _, _) => s.clone(),
            (Some(Value::Null), _, _) => "null".to_string(),
            (Some(other), _, _) => other.to_string(),
            (None, Some(raw), _) => raw.clone(),
            (None, None, Some(description)) => description.clone(),
            (None, None, None) => self
                .object_type
                .clone()
                .unwrap_or_else(|| "undefined".to_string()),
        }
    }
}

/// Params of Runtime.consoleAPICalled
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsoleApiCalled {
    #[serde(rename = "type")]
    pub call_type: String,
    #[serde(default)]
    pub args: Vec<RemoteObject>,
}

/// Runtime.ExceptionDetails
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExceptionDetails {
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub exception: Option<RemoteObject>,
}

/// Params of Runtime.exceptionThrown
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExceptionThrown {
    pub exception_details: ExceptionDetails,
}

/// Network.Request, trimmed
#[derive(Debug, Clone, Deserialize)]
pub struct RequestData {
    pub url: String,
    #[serde(default)]
    pub method: String,
}

/// Params of Fetch.requestPaused
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestPaused {
    pub request_id: String,
    pub request: RequestData,
    pub resource_type: String,
    #[serde(default)]
    pub network_id: Option<String>,
}

/// Params of Network.requestWillBeSent
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestWillBeSent {
    pub request_id: String,
    pub request: RequestData,
}

/// Network.Response, trimmed
#[derive(Debug, Clone, Deserialize)]
pub struct ResponseData {
    pub url: String,
    pub status: u16,
}

/// Params of Network.responseReceived
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseReceived {
    pub request_id: String,
    /// Network.ResourceType of the request
    #[serde(rename = "type", default)]
    pub resource_type: String,
    pub response: ResponseData,
}

/// Params of Network.loadingFinished
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadingFinished {
    pub request_id: String,
}

/// Params of Network.loadingFailed
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadingFailed {
    pub request_id: String,
    #[serde(default)]
    pub error_text: String,
    #[serde(default)]
    pub canceled: bool,
}

/// Params of Inspector.detached
#[derive(Debug, Clone, Deserialize)]
pub struct InspectorDetached {
    #[serde(default)]
    pub reason: String,
}
