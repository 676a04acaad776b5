//! Configuration loading
//!
//! A run is described by one TOML file with kebab-case keys. Everything but
//! `routes` and `cdp-url` has a default.
//!
//! ```toml
//! routes = ["/dashboard", "/classes"]
//! cdp-url = "ws://127.0.0.1:9222/devtools/browser/<id>"
//! base-url = "http://localhost:5173"
//! api-call-budget = 10
//!
//! [auth]
//! landing-url = "http://localhost:5173/login"
//! storage = { token = "..." }
//! ```

mod parser;
mod types;
mod validation;

pub use parser::{load_config, parse_config};
pub use validation::validate;
pub use types::{AuthConfig, BrowserConfig, Config};

use std::sync::Arc;
use std::time::Duration;
use url::Url;

use browser::{ResourceType, SessionConfig};

use crate::bootstrap::{NoBootstrap, SessionBootstrap, StorageBootstrap};
use crate::error::ConfigError;
use crate::governor::GovernorPolicy;
use crate::session::CrawlSettings;
use crate::visitor::VisitTimings;

impl Config {
    /// Crawl settings for a validated configuration
    pub fn settings(&self) -> Result<CrawlSettings, ConfigError> {
        let blocked_resource_types = self
            .blocked_resource_types
            .iter()
            .map(|name| name.parse::<ResourceType>().map_err(ConfigError::Validation))
            .collect::<Result<_, _>>()?;
        let base_url = self
            .base_url
            .as_deref()
            .map(Url::parse)
            .transpose()
            .map_err(|e| ConfigError::Validation(format!("Invalid base-url: {}", e)))?;

        Ok(CrawlSettings {
            routes: self.routes.clone(),
            base_url,
            policy: GovernorPolicy {
                blocked_resource_types,
                api_path_prefixes: self.api_path_prefixes.clone(),
                api_call_budget: self.api_call_budget,
                throttle_delay: Duration::from_millis(self.throttle_delay_ms),
            },
            timings: VisitTimings {
                navigation_timeout: Duration::from_millis(self.navigation_timeout_ms),
                settle_delay: Duration::from_millis(self.settle_delay_ms),
                idle_quiet: Duration::from_millis(self.idle_quiet_ms),
                idle_max_inflight: self.idle_max_inflight,
            },
            cooldown: Duration::from_millis(self.inter_visit_cooldown_ms),
            reauthenticate_each_visit: self
                .auth
                .as_ref()
                .is_some_and(|auth| auth.reauthenticate_each_visit),
        })
    }

    pub fn session_config(&self) -> SessionConfig {
        let viewport = self
            .browser
            .viewport_width
            .zip(self.browser.viewport_height);
        SessionConfig {
            cdp_url: self.cdp_url.clone(),
            user_agent: self.browser.user_agent.clone(),
            viewport,
            ..SessionConfig::default()
        }
    }

    pub fn bootstrap(&self) -> Arc<dyn SessionBootstrap> {
        match &self.auth {
            Some(auth) => {
                let mut bootstrap =
                    StorageBootstrap::new(auth.landing_url.clone(), auth.storage.clone());
                bootstrap.timeout = Duration::from_millis(self.navigation_timeout_ms);
                Arc::new(bootstrap)
            }
            None => Arc::new(NoBootstrap),
        }
    }
}
