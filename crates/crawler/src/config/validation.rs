use std::collections::HashSet;
use url::Url;

use browser::ResourceType;

use crate::config::types::{AuthConfig, BrowserConfig, Config};
use crate::error::ConfigError;

/// Validates the entire configuration
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    validate_routes(&config.routes)?;
    validate_endpoints(config)?;
    validate_governor(config)?;
    validate_timings(config)?;
    if let Some(auth) = &config.auth {
        validate_auth(auth)?;
    }
    validate_browser(&config.browser)?;
    Ok(())
}

fn validate_routes(routes: &[String]) -> Result<(), ConfigError> {
    if routes.is_empty() {
        return Err(ConfigError::Validation(
            "routes cannot be empty".to_string(),
        ));
    }

    let mut seen = HashSet::new();
    for route in routes {
        if route.trim().is_empty() {
            return Err(ConfigError::Validation(
                "routes cannot contain an empty route".to_string(),
            ));
        }
        if !seen.insert(route.as_str()) {
            return Err(ConfigError::Validation(format!(
                "route '{}' is listed more than once",
                route
            )));
        }
    }
    Ok(())
}

fn validate_endpoints(config: &Config) -> Result<(), ConfigError> {
    let cdp = Url::parse(&config.cdp_url)
        .map_err(|e| ConfigError::Validation(format!("Invalid cdp-url: {}", e)))?;
    if !matches!(cdp.scheme(), "ws" | "wss") {
        return Err(ConfigError::Validation(format!(
            "cdp-url must be a ws:// or wss:// URL, got '{}'",
            config.cdp_url
        )));
    }

    if let Some(base) = &config.base_url {
        Url::parse(base)
            .map_err(|e| ConfigError::Validation(format!("Invalid base-url: {}", e)))?;
    }
    Ok(())
}

fn validate_governor(config: &Config) -> Result<(), ConfigError> {
    for name in &config.blocked_resource_types {
        name.parse::<ResourceType>()
            .map_err(|e| ConfigError::Validation(format!("blocked-resource-types: {}", e)))?;
    }

    if config.api_path_prefixes.iter().any(|p| p.trim().is_empty()) {
        return Err(ConfigError::Validation(
            "api-path-prefixes cannot contain an empty prefix".to_string(),
        ));
    }
    Ok(())
}

fn validate_timings(config: &Config) -> Result<(), ConfigError> {
    if config.navigation_timeout_ms == 0 {
        return Err(ConfigError::Validation(
            "navigation-timeout-ms must be > 0".to_string(),
        ));
    }
    Ok(())
}

fn validate_auth(auth: &AuthConfig) -> Result<(), ConfigError> {
    Url::parse(&auth.landing_url)
        .map_err(|e| ConfigError::Validation(format!("Invalid auth.landing-url: {}", e)))?;
    Ok(())
}

fn validate_browser(browser: &BrowserConfig) -> Result<(), ConfigError> {
    match (browser.viewport_width, browser.viewport_height) {
        (Some(0), _) | (_, Some(0)) => Err(ConfigError::Validation(
            "viewport dimensions must be > 0".to_string(),
        )),
        (Some(_), None) | (None, Some(_)) => Err(ConfigError::Validation(
            "viewport-width and viewport-height must be set together".to_string(),
        )),
        _ => Ok(()),
    }
}
