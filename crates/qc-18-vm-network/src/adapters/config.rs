use serde::Deserialize;
use std::fs;
use std::path::Path;

use crate::domain::NetworkConfig;
use crate::events::ConfigError;
use crate::ports::ConfigProvider;

// ============================================================================
// StaticConfigProvider - Hardcoded config for testing/development
// ============================================================================

/// Static configuration provider.
///
/// Useful for tests and embedding. For deployments, use `TomlConfigProvider`.
#[derive(Debug, Clone, Default)]
pub struct StaticConfigProvider {
    config: NetworkConfig,
}

impl StaticConfigProvider {
    /// Create with default limits.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create with the given config.
    #[must_use]
    pub fn with_config(mut self, config: NetworkConfig) -> Self {
        self.config = config;
        self
    }
}

impl ConfigProvider for StaticConfigProvider {
    fn network_config(&self) -> NetworkConfig {
        self.config.clone()
    }
}

// ============================================================================
// TomlConfigProvider - File-based config loading
// ============================================================================

#[derive(Debug, Deserialize)]
struct ConfigFile {
    #[serde(default)]
    network: NetworkConfigFile,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct NetworkConfigFile {
    max_handlers: Option<usize>,
    max_pending_requests_per_peer: Option<usize>,
}

/// TOML-based configuration provider.
///
/// # Config File Format
///
/// ```toml
/// [network]
/// max_handlers = 256
/// max_pending_requests_per_peer = 65536
/// ```
///
/// Missing keys fall back to [`NetworkConfig::default`].
#[derive(Debug, Clone)]
pub struct TomlConfigProvider {
    config: NetworkConfig,
}

impl TomlConfigProvider {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be read, parsed, or holds limits
    /// outside the valid range.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path.as_ref()).map_err(|e| ConfigError::Io {
            path: path.as_ref().display().to_string(),
            error: e.to_string(),
        })?;

        Self::parse(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let file: ConfigFile =
            toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))?;

        let defaults = NetworkConfig::default();
        let nc = file.network;
        let config = NetworkConfig {
            max_handlers: nc.max_handlers.unwrap_or(defaults.max_handlers),
            max_pending_requests_per_peer: nc
                .max_pending_requests_per_peer
                .unwrap_or(defaults.max_pending_requests_per_peer),
        };
        config.validate()?;

        Ok(Self { config })
    }
}

impl ConfigProvider for TomlConfigProvider {
    fn network_config(&self) -> NetworkConfig {
        self.config.clone()
    }
}
