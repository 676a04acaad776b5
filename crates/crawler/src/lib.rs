//! Page-health crawler
//!
//! Visits a fixed list of application routes in one browsing context, one at
//! a time, and reports what each page logged while it loaded.
//!
//! ```text
//! CrawlSession ──> PageVisitor ──> Collector ──> RequestGovernor   (paused requests)
//!                      │                   └───> DiagnosticMessage (console, exceptions)
//!                      └──> PageVisitResult ──> aggregate() ──> ReportSink
//! ```
//!
//! The browser is only reached through [`browser::BrowsingContext`], so every
//! layer here runs against a scripted context in tests.

pub mod bootstrap;
pub mod classifier;
mod collector;
pub mod config;
pub mod error;
pub mod governor;
pub mod report;
pub mod session;
pub mod sink;
pub mod visitor;

pub use bootstrap::{NoBootstrap, SessionBootstrap, StorageBootstrap};
pub use classifier::{classify, is_duplicate_attribute, Bucket, BucketCounts, DiagnosticMessage, Severity};
pub use error::{ConfigError, CrawlError, SinkError};
pub use governor::{Decision, GovernorPolicy, RequestGovernor, RequestOutcome, RequestRecord};
pub use report::{aggregate, SessionSummary};
pub use session::{crawl, CrawlOutcome, CrawlSession, CrawlSettings};
pub use sink::{JsonFileSink, LogSink, MultiSink, ReportSink};
pub use visitor::{ApiCall, FailureReason, PageVisitResult, PageVisitor, VisitStatus, VisitTimings};
