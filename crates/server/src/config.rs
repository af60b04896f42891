use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use gamenet::NetConfig;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolConfig {
    pub tick_rate: u32,
    /// How often the echo server logs its counters, in ticks. 0 disables it.
    pub stats_interval_ticks: u64,
    pub net: NetConfig,
}

impl Default for ToolConfig {
    fn default() -> Self {
        Self {
            tick_rate: 60,
            stats_interval_ticks: 600,
            net: NetConfig::default(),
        }
    }
}

impl ToolConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        let config: ToolConfig = toml::from_str(&contents)
            .with_context(|| format!("parsing config file {}", path.display()))?;
        log::info!("Loaded config from {}", path.display());
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config: ToolConfig = toml::from_str(
            r#"
            tick_rate = 30

            [net]
            forced_latency_ms = 120
            bind_ip = "127.0.0.1"
            "#,
        )
        .unwrap();

        assert_eq!(config.tick_rate, 30);
        assert_eq!(config.stats_interval_ticks, 600);
        assert_eq!(config.net.forced_latency_ms, 120);
        assert_eq!(config.net.base_port, gamenet::DEFAULT_PORT);
        assert_eq!(config.net.bind_ip.to_string(), "127.0.0.1");
    }

    #[test]
    fn test_empty_toml_is_default() {
        let config: ToolConfig = toml::from_str("").unwrap();
        assert_eq!(config.net, NetConfig::default());
    }
}
