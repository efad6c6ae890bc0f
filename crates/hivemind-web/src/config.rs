//! Swarm configuration loaded from TOML.

use anyhow::{Context, Result};
use hivemind_core::config::SwarmConfig;
use std::path::Path;

/// Load and validate a swarm config. Every field is optional in the file.
pub fn load_config(path: &Path) -> Result<SwarmConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config: {}", path.display()))?;
    let config = parse_config(&content)
        .with_context(|| format!("Failed to parse config: {}", path.display()))?;
    Ok(config)
}

/// Parse and validate a swarm config from a TOML string.
pub fn parse_config(content: &str) -> Result<SwarmConfig> {
    let config: SwarmConfig = toml::from_str(content)?;
    config.validate().context("Invalid swarm configuration")?;
    Ok(config)
}

/// The default config as a TOML document.
pub fn default_toml() -> Result<String> {
    toml::to_string_pretty(&SwarmConfig::default()).context("Failed to serialize config")
}
