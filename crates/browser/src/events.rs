//! Page events - typed view of the CDP signals a page visit cares about
//!
//! Design: one flat enum, translated once at the CDP boundary.
//! Everything downstream matches on variants, never on method strings.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::cdp::protocol::{
    CDPEvent, ConsoleApiCalled, ExceptionThrown, InspectorDetached, LoadingFailed,
    LoadingFinished, RequestPaused, RequestWillBeSent, ResponseReceived,
};

/// Resource classes of outgoing requests.
///
/// XHR, fetch and event-source traffic collapse into `Api`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceType {
    Document,
    Script,
    Stylesheet,
    Image,
    Font,
    Media,
    Websocket,
    Api,
    Other,
}

impl ResourceType {
    /// Map a CDP `Network.ResourceType` name
    pub fn from_cdp(name: &str) -> Self {
        match name {
            "Document" => Self::Document,
            "Script" => Self::Script,
            "Stylesheet" => Self::Stylesheet,
            "Image" => Self::Image,
            "Font" => Self::Font,
            "Media" => Self::Media,
            "WebSocket" => Self::Websocket,
            "XHR" | "Fetch" | "EventSource" => Self::Api,
            _ => Self::Other,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Document => "document",
            Self::Script => "script",
            Self::Stylesheet => "stylesheet",
            Self::Image => "image",
            Self::Font => "font",
            Self::Media => "media",
            Self::Websocket => "websocket",
            Self::Api => "api",
            Self::Other => "other",
        }
    }
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResourceType {
    type Err = String;

    /// Parse the lowercase spelling used in configuration files
    fn from_str(name: &str) -> Result<Self, Self::Err> {
        let parsed = match name {
            "document" => Self::Document,
            "script" => Self::Script,
            "stylesheet" => Self::Stylesheet,
            "image" => Self::Image,
            "font" => Self::Font,
            "media" => Self::Media,
            "websocket" => Self::Websocket,
            "api" => Self::Api,
            "other" => Self::Other,
            unknown => return Err(format!("unknown resource type '{}'", unknown)),
        };
        Ok(parsed)
    }
}

/// Console levels worth reporting. log/info/debug never become events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConsoleLevel {
    Error,
    Warning,
}

/// Signals emitted by a browsing context while a listener is attached
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum PageEvent {
    /// `console.error` / `console.warn` (and failed `console.assert`)
    Console { level: ConsoleLevel, text: String },

    /// Uncaught exception in page script
    Exception { text: String },

    /// Outgoing request held by interception; must be continued or aborted
    RequestPaused {
        id: String,
        url: String,
        resource_type: ResourceType,
    },

    /// Request went on the wire
    RequestStarted { id: String },

    /// Response headers received
    Response {
        id: String,
        url: String,
        status: u16,
        resource_type: ResourceType,
    },

    RequestFinished { id: String },

    RequestFailed { id: String, error: String },

    /// Renderer crashed
    Crashed,

    /// Target went away (closed tab, detached inspector)
    TargetClosed { reason: String },
}

impl PageEvent {
    /// Translate a raw CDP event. Methods outside the crawl vocabulary give `None`.
    pub fn from_cdp(event: &CDPEvent) -> Option<Self> {
        match event.method.as_str() {
            "Runtime.consoleAPICalled" => {
                let call: ConsoleApiCalled = event.params_as()?;
                let level = match call.call_type.as_str() {
                    "error" | "assert" => ConsoleLevel::Error,
                    "warning" => ConsoleLevel::Warning,
                    _ => return None,
                };
                let text = call
                    .args
                    .iter()
                    .map(|arg| arg.render())
                    .collect::<Vec<_>>()
                    .join(" ");
                Some(Self::Console { level, text })
            }
            "Runtime.exceptionThrown" => {
                let thrown: ExceptionThrown = event.params_as()?;
                let details = thrown.exception_details;
                let text = details
                    .exception
                    .and_then(|exception| exception.description)
                    .unwrap_or(details.text);
                Some(Self::Exception { text })
            }
            "Fetch.requestPaused" => {
                let paused: RequestPaused = event.params_as()?;
                Some(Self::RequestPaused {
                    id: paused.request_id,
                    url: paused.request.url,
                    resource_type: ResourceType::from_cdp(&paused.resource_type),
                })
            }
            "Network.requestWillBeSent" => {
                let sent: RequestWillBeSent = event.params_as()?;
                Some(Self::RequestStarted {
                    id: sent.request_id,
                })
            }
            "Network.responseReceived" => {
                let received: ResponseReceived = event.params_as()?;
                Some(Self::Response {
                    id: received.request_id,
                    url: received.response.url,
                    status: received.response.status,
                    resource_type: ResourceType::from_cdp(&received.resource_type),
                })
            }
            "Network.loadingFinished" => {
                let finished: LoadingFinished = event.params_as()?;
                Some(Self::RequestFinished {
                    id: finished.request_id,
                })
            }
            "Network.loadingFailed" => {
                let failed: LoadingFailed = event.params_as()?;
                let error = if failed.canceled {
                    "canceled".to_string()
                } else {
                    failed.error_text
                };
                Some(Self::RequestFailed {
                    id: failed.request_id,
                    error,
                })
            }
            "Inspector.targetCrashed" => Some(Self::Crashed),
            "Inspector.detached" => {
                let reason = event
                    .params_as::<InspectorDetached>()
                    .map(|detached| detached.reason)
                    .unwrap_or_default();
                Some(Self::TargetClosed { reason })
            }
            _ => None,
        }
    }
}

/// CDP methods [`PageEvent::from_cdp`] understands
pub const PAGE_EVENT_METHODS: [&str; 9] = [
    "Runtime.consoleAPICalled",
    "Runtime.exceptionThrown",
    "Fetch.requestPaused",
    "Network.requestWillBeSent",
    "Network.responseReceived",
    "Network.loadingFinished",
    "Network.loadingFailed",
    "Inspector.targetCrashed",
    "Inspector.detached",
];
