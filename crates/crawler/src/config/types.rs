use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Top-level run configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct Config {
    /// Routes to visit, in order
    pub routes: Vec<String>,

    /// Browser-level DevTools WebSocket endpoint
    pub cdp_url: String,

    /// Base for relative routes
    #[serde(default)]
    pub base_url: Option<String>,

    /// Maximum API calls released per page
    #[serde(default = "default_api_call_budget")]
    pub api_call_budget: u32,

    /// Resource types aborted before they reach the network
    #[serde(default = "default_blocked_resource_types")]
    pub blocked_resource_types: Vec<String>,

    /// URL or path prefixes that make a request a budgeted API call
    #[serde(default = "default_api_path_prefixes")]
    pub api_path_prefixes: Vec<String>,

    /// Delay before each API call is released (milliseconds)
    #[serde(default = "default_throttle_delay_ms")]
    pub throttle_delay_ms: u64,

    #[serde(default = "default_navigation_timeout_ms")]
    pub navigation_timeout_ms: u64,

    /// Wait after the network went idle, for late errors (milliseconds)
    #[serde(default = "default_settle_delay_ms")]
    pub settle_delay_ms: u64,

    /// Pause between two visits (milliseconds)
    #[serde(default = "default_inter_visit_cooldown_ms")]
    pub inter_visit_cooldown_ms: u64,

    #[serde(default = "default_idle_quiet_ms")]
    pub idle_quiet_ms: u64,

    #[serde(default = "default_idle_max_inflight")]
    pub idle_max_inflight: usize,

    #[serde(default = "default_report_path")]
    pub report_path: PathBuf,

    #[serde(default)]
    pub auth: Option<AuthConfig>,

    #[serde(default)]
    pub browser: BrowserConfig,
}

/// Session bootstrap through `localStorage`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct AuthConfig {
    /// Page opened before the storage entries are written
    pub landing_url: String,

    #[serde(default)]
    pub storage: BTreeMap<String, String>,

    /// Bootstrap again before every visit instead of once per run
    #[serde(default)]
    pub reauthenticate_each_visit: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct BrowserConfig {
    #[serde(default)]
    pub user_agent: Option<String>,

    #[serde(default)]
    pub viewport_width: Option<u32>,

    #[serde(default)]
    pub viewport_height: Option<u32>,
}

fn default_api_call_budget() -> u32 {
    10
}

fn default_blocked_resource_types() -> Vec<String> {
    ["image", "font", "stylesheet", "media", "websocket"]
        .into_iter()
        .map(String::from)
        .collect()
}

fn default_api_path_prefixes() -> Vec<String> {
    vec!["/api/".to_string()]
}

fn default_throttle_delay_ms() -> u64 {
    3000
}

fn default_navigation_timeout_ms() -> u64 {
    30_000
}

fn default_settle_delay_ms() -> u64 {
    5000
}

fn default_inter_visit_cooldown_ms() -> u64 {
    8000
}

fn default_idle_quiet_ms() -> u64 {
    500
}

fn default_idle_max_inflight() -> usize {
    2
}

fn default_report_path() -> PathBuf {
    PathBuf::from("reports/page-health.json")
}
