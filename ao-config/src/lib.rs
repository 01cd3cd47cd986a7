use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Runtime configuration for the orchestration core.
///
/// Loaded once at host-process startup and passed by value (or behind an
/// `Arc`) to every component; nothing in this crate mutates global state.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CoreConfig {
    pub key_prefix: String,
    pub channel_prefix: String,
    pub visibility_timeout_s: u64,
    pub recover_poll_interval_s: u64,
    pub max_concurrent_workflows: u32,
    pub resource_monitoring_interval_s: u64,
    pub workflow_timeout_s: u64,
    pub cleanup_interval_s: u64,
    pub nack_backoff_base_ms: u64,
    pub nack_backoff_cap_ms: u64,
    pub redis_url: Option<String>,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            key_prefix: "ao".to_string(),
            channel_prefix: "ao:events".to_string(),
            visibility_timeout_s: 5,
            recover_poll_interval_s: 1,
            max_concurrent_workflows: 10,
            resource_monitoring_interval_s: 30,
            workflow_timeout_s: 7200,
            cleanup_interval_s: 600,
            nack_backoff_base_ms: 200,
            nack_backoff_cap_ms: 30_000,
            redis_url: None,
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to build configuration: {0}")]
    Build(#[from] config::ConfigError),
    #[error("failed to deserialize configuration: {0}")]
    Deserialize(String),
}

impl CoreConfig {
    /// Layers built-in defaults, an optional TOML file, then `AO_*`
    /// environment variables (e.g. `AO_VISIBILITY_TIMEOUT_S=10`).
    pub fn load(config_path: Option<&str>) -> Result<Self, ConfigError> {
        let defaults = CoreConfig::default();
        let defaults_value = config::Config::try_from(&defaults)?;

        let mut builder = config::Config::builder().add_source(defaults_value);

        if let Some(path) = config_path {
            builder = builder.add_source(config::File::with_name(path).required(false));
        }

        builder = builder.add_source(
            config::Environment::with_prefix("AO")
                .separator("__")
                .try_parsing(true),
        );

        let settings = builder.build()?;
        settings
            .try_deserialize()
            .map_err(|e| ConfigError::Deserialize(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec() {
        let cfg = CoreConfig::default();
        assert_eq!(cfg.key_prefix, "ao");
        assert_eq!(cfg.channel_prefix, "ao:events");
        assert_eq!(cfg.visibility_timeout_s, 5);
        assert_eq!(cfg.workflow_timeout_s, 7200);
        assert_eq!(cfg.cleanup_interval_s, 600);
        assert_eq!(cfg.nack_backoff_base_ms, 200);
        assert_eq!(cfg.nack_backoff_cap_ms, 30_000);
    }

    #[test]
    fn load_without_file_returns_defaults() {
        let cfg = CoreConfig::load(None).expect("config should build from defaults alone");
        assert_eq!(cfg, CoreConfig::default());
    }
}
