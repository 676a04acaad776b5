//! Browser layer for page-health crawling
//!
//! Speaks the Chrome DevTools Protocol over a single WebSocket and exposes a
//! page as a [`BrowsingContext`]: navigate, intercept requests, stream
//! console/exception/network signals, close.
//!
//! # Architecture Philosophy
//!
//! 1. **Data structures first**: CDP JSON is decoded once into [`PageEvent`]
//! 2. **Zero special cases**: every signal goes through the same listener slot
//! 3. **Scoped lifetimes**: listeners and subscriptions detach on drop

pub mod cdp;
pub mod context;
pub mod events;
pub mod session;

pub use cdp::{CDPClient, CDPSession};
pub use context::{BrowsingContext, ContextError, ContextResult, EventStream, Listener};
pub use events::{ConsoleLevel, PageEvent, ResourceType};
pub use session::{CdpContext, SessionConfig};
