//! Effective configuration: TOML file, then command-line overrides.

use std::path::Path;

use tether_core::config::{ConfigError, LinkConfig, TetherConfig};

/// Values given on the command line (or their environment fallbacks).
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub base_url: Option<String>,
    pub telemetry_url: Option<String>,
}

/// Load `path` (or defaults when absent) and apply `overrides`.
///
/// Overriding only the base URL also moves the telemetry URL to the same
/// host, unless the file set a telemetry URL of its own.
pub fn load_config(path: Option<&Path>, overrides: &Overrides) -> Result<TetherConfig, ConfigError> {
    let mut config = match path {
        Some(path) => TetherConfig::load(path)?,
        None => TetherConfig::default(),
    };

    if let Some(base) = &overrides.base_url {
        let default_telemetry = config.link.telemetry_url == LinkConfig::default().telemetry_url;
        config.link.base_url = base.clone();
        if default_telemetry {
            if let Some(url) = telemetry_url_for(base) {
                config.link.telemetry_url = url;
            }
        }
    }
    if let Some(url) = &overrides.telemetry_url {
        config.link.telemetry_url = url.clone();
    }

    config.validate()?;
    tracing::debug!(base_url = %config.link.base_url, "configuration loaded");
    Ok(config)
}

/// `http://host:port` → `ws://host:port/api/state/ws/full`.
pub fn telemetry_url_for(base_url: &str) -> Option<String> {
    let (scheme, rest) = if let Some(rest) = base_url.strip_prefix("http://") {
        ("ws://", rest)
    } else if let Some(rest) = base_url.strip_prefix("https://") {
        ("wss://", rest)
    } else {
        return None;
    };
    Some(format!(
        "{scheme}{}/api/state/ws/full",
        rest.trim_end_matches('/')
    ))
}
