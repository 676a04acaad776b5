//! Request governor - per-visit request policy
//!
//! Every intercepted request is decided exactly once:
//! - blocked resource types never reach the network
//! - API requests spend budget and are released after the throttle delay
//! - everything else goes through immediately
//!
//! A governor lives for one visit. Its budget counter is never reset, the
//! whole governor is dropped instead.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

use browser::ResourceType;

/// Request policy shared by every visit of a session
#[derive(Debug, Clone)]
pub struct GovernorPolicy {
    pub blocked_resource_types: HashSet<ResourceType>,
    /// Prefixes that make a request a budgeted API call
    pub api_path_prefixes: Vec<String>,
    pub api_call_budget: u32,
    pub throttle_delay: Duration,
}

impl Default for GovernorPolicy {
    fn default() -> Self {
        Self {
            blocked_resource_types: [
                ResourceType::Image,
                ResourceType::Font,
                ResourceType::Stylesheet,
                ResourceType::Media,
                ResourceType::Websocket,
            ]
            .into_iter()
            .collect(),
            api_path_prefixes: vec!["/api/".to_string()],
            api_call_budget: 10,
            throttle_delay: Duration::from_millis(3000),
        }
    }
}

impl GovernorPolicy {
    /// Whether `url` is a budgeted API call.
    ///
    /// A prefix containing `://` is matched against the full URL, any other
    /// prefix against the URL path.
    pub fn is_api(&self, url: &str) -> bool {
        let path = Url::parse(url).ok();
        self.api_path_prefixes.iter().any(|prefix| {
            if prefix.contains("://") {
                return url.starts_with(prefix.as_str());
            }
            match &path {
                Some(parsed) => parsed.path().starts_with(prefix.as_str()),
                None => url.starts_with(prefix.as_str()),
            }
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockReason {
    ResourceType,
    Budget,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    AllowImmediately,
    /// Release only once the delay has fully elapsed
    AllowAfterDelay(Duration),
    Block(BlockReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RequestOutcome {
    Allowed,
    BlockedByType,
    BlockedByBudget,
    /// Throttled, but the visit ended before its delay ran out; aborted
    Expired,
}

/// One decided request. Only a throttled record changes later, to `Expired`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestRecord {
    pub url: String,
    pub resource_type: ResourceType,
    pub outcome: RequestOutcome,
    /// Matched an API prefix
    pub api: bool,
}

impl From<Decision> for RequestOutcome {
    fn from(decision: Decision) -> Self {
        match decision {
            Decision::AllowImmediately | Decision::AllowAfterDelay(_) => RequestOutcome::Allowed,
            Decision::Block(BlockReason::ResourceType) => RequestOutcome::BlockedByType,
            Decision::Block(BlockReason::Budget) => RequestOutcome::BlockedByBudget,
        }
    }
}

/// Per-visit governor: sole owner of the API budget counter
#[derive(Debug)]
pub struct RequestGovernor {
    policy: Arc<GovernorPolicy>,
    api_calls: u32,
    records: Vec<RequestRecord>,
}

impl RequestGovernor {
    pub fn new(policy: Arc<GovernorPolicy>) -> Self {
        Self {
            policy,
            api_calls: 0,
            records: Vec::new(),
        }
    }

    /// Decide one request and record the outcome
    pub fn decide(&mut self, url: &str, resource_type: ResourceType) -> Decision {
        let api = self.policy.is_api(url);

        let decision = if self.policy.blocked_resource_types.contains(&resource_type) {
            Decision::Block(BlockReason::ResourceType)
        } else if api {
            if self.api_calls >= self.policy.api_call_budget {
                tracing::warn!(
                    "[RequestGovernor] Budget of {} API calls reached, blocking {}",
                    self.policy.api_call_budget,
                    url
                );
                Decision::Block(BlockReason::Budget)
            } else {
                self.api_calls += 1;
                Decision::AllowAfterDelay(self.policy.throttle_delay)
            }
        } else {
            Decision::AllowImmediately
        };

        tracing::debug!(
            "[RequestGovernor] {} {} -> {:?}",
            resource_type,
            url,
            decision
        );

        self.records.push(RequestRecord {
            url: url.to_string(),
            resource_type,
            outcome: decision.into(),
            api,
        });
        decision
    }

    /// API calls allowed so far in this visit
    pub fn api_calls(&self) -> u32 {
        self.api_calls
    }

    /// Mark the record at `index` as a throttled request that was never released.
    /// Its budget stays spent.
    pub fn expire(&mut self, index: usize) {
        if let Some(record) = self.records.get_mut(index) {
            if record.outcome == RequestOutcome::Allowed {
                record.outcome = RequestOutcome::Expired;
            }
        }
    }

    pub fn records(&self) -> &[RequestRecord] {
        &self.records
    }

    pub fn into_records(self) -> Vec<RequestRecord> {
        self.records
    }
}
