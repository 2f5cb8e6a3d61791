//! Configuration file loading and management
//!
//! This module handles loading and parsing the host configuration from
//! `$XDG_CONFIG_HOME/scheme-host/config.toml`. If the configuration file doesn't
//! exist, a default configuration is created with documented comments.

use anyhow::{Context, Result};
use scheme_plugin_api::BootstrapOptions;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main host configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Config {
    /// Host process configuration
    #[serde(default)]
    pub host: HostConfig,
    /// Plugin loading configuration
    #[serde(default)]
    pub plugins: PluginsConfig,
}

/// Host process configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HostConfig {
    /// Log level (trace, debug, info, warn, error)
    /// Default: "info"
    pub log_level: String,
}

/// Plugin loading configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PluginsConfig {
    /// Directory scanned for scheme plugin executables
    /// If None, uses XDG_DATA_HOME/scheme-host/plugins
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dir: Option<PathBuf>,
    /// How long a plugin may take to print its handshake, in milliseconds
    /// Default: 10000
    #[serde(default = "default_handshake_timeout_ms")]
    pub handshake_timeout_ms: u64,
    /// Bound on dispense and on every scheme call, in milliseconds
    /// Default: 30000
    #[serde(default = "default_call_timeout_ms")]
    pub call_timeout_ms: u64,
}

fn default_handshake_timeout_ms() -> u64 {
    10_000
}

fn default_call_timeout_ms() -> u64 {
    30_000
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

impl Default for PluginsConfig {
    fn default() -> Self {
        Self {
            dir: None,
            handshake_timeout_ms: default_handshake_timeout_ms(),
            call_timeout_ms: default_call_timeout_ms(),
        }
    }
}

impl Config {
    /// Load configuration from the specified path
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from the default XDG config location
    ///
    /// If the configuration file doesn't exist, creates a default configuration
    /// file with documented comments.
    pub fn load_default() -> Result<Self> {
        let config_path = Self::default_config_path()?;

        if !config_path.exists() {
            Self::create_default_file(&config_path)?;
        }

        Self::load(&config_path)
    }

    /// Returns `$XDG_CONFIG_HOME/scheme-host/config.toml`
    pub fn default_config_path() -> Result<PathBuf> {
        let dirs = directories::ProjectDirs::from("org", "veraison", "scheme-host")
            .context("Failed to determine project directories")?;

        Ok(dirs.config_dir().join("config.toml"))
    }

    fn create_default_file(path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        fs::write(path, Self::default_config_content())
            .with_context(|| format!("Failed to write default config file: {}", path.display()))?;

        tracing::info!("Created default configuration file at: {}", path.display());
        Ok(())
    }

    fn default_config_content() -> &'static str {
        r#"# Scheme Host Configuration
# This file configures which attestation scheme plugins are loaded and how.

[host]
# Log level: trace, debug, info, warn, error
# RUST_LOG overrides this when set.
# Default: "info"
log_level = "info"

[plugins]
# Directory scanned for scheme plugin executables. Every regular file with an
# execute bit is started as a plugin; subdirectories are ignored.
# If not specified, defaults to $XDG_DATA_HOME/scheme-host/plugins
# dir = "/usr/libexec/veraison/schemes"

# How long a plugin may take to complete its handshake, in milliseconds
# Default: 10000
handshake_timeout_ms = 10000

# Bound on dispense and on each scheme call, in milliseconds
# Default: 30000
call_timeout_ms = 30000
"#
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&self.host.log_level.as_str()) {
            anyhow::bail!(
                "Invalid log_level: {}. Must be one of: {}",
                self.host.log_level,
                valid_log_levels.join(", ")
            );
        }

        if self.plugins.handshake_timeout_ms == 0 {
            anyhow::bail!("plugins.handshake_timeout_ms must be greater than 0");
        }
        if self.plugins.call_timeout_ms == 0 {
            anyhow::bail!("plugins.call_timeout_ms must be greater than 0");
        }

        if let Some(dir) = &self.plugins.dir {
            if dir.as_os_str().is_empty() {
                anyhow::bail!("plugins.dir must not be empty");
            }
        }

        Ok(())
    }

    /// Plugin directory, falling back to the XDG data location.
    pub fn plugins_dir(&self) -> Result<PathBuf> {
        match &self.plugins.dir {
            Some(dir) => Ok(dir.clone()),
            None => scheme_runtime::default_plugins_dir()
                .context("Failed to determine default plugin directory"),
        }
    }

    /// Bootstrap options derived from the `[plugins]` section.
    pub fn bootstrap_options(&self) -> BootstrapOptions {
        BootstrapOptions {
            handshake_timeout: Duration::from_millis(self.plugins.handshake_timeout_ms),
            call_timeout: Duration::from_millis(self.plugins.call_timeout_ms),
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.host.log_level, "info");
        assert!(config.plugins.dir.is_none());
        assert_eq!(config.plugins.handshake_timeout_ms, 10_000);
        assert_eq!(config.plugins.call_timeout_ms, 30_000);
    }

    #[test]
    fn test_load_valid_config() {
        let config_content = r#"
[host]
log_level = "debug"

[plugins]
dir = "/opt/schemes"
handshake_timeout_ms = 2500
call_timeout_ms = 5000
"#;

        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(config_content.as_bytes()).unwrap();

        let config = Config::load(temp_file.path()).unwrap();
        assert_eq!(config.host.log_level, "debug");
        assert_eq!(config.plugins_dir().unwrap(), PathBuf::from("/opt/schemes"));

        let options = config.bootstrap_options();
        assert_eq!(options.handshake_timeout, Duration::from_millis(2500));
        assert_eq!(options.call_timeout, Duration::from_secs(5));
    }

    #[test]
    fn test_load_minimal_config() {
        let config_content = r#"
[host]
log_level = "warn"
"#;

        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(config_content.as_bytes()).unwrap();

        let config = Config::load(temp_file.path()).unwrap();
        assert_eq!(config.host.log_level, "warn");
        assert_eq!(config.plugins, PluginsConfig::default());
    }

    #[test]
    fn test_load_rejects_malformed_file() {
        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(b"[plugins\ndir = 3").unwrap();

        let err = Config::load(temp_file.path()).unwrap_err();
        assert!(err.to_string().contains("Failed to parse config file"));
    }

    #[test]
    fn test_validate_valid_config() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn test_validate_invalid_log_level() {
        let mut config = Config::default();
        config.host.log_level = "verbose".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_zero_timeouts() {
        let mut config = Config::default();
        config.plugins.handshake_timeout_ms = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.plugins.call_timeout_ms = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_empty_dir() {
        let mut config = Config::default();
        config.plugins.dir = Some(PathBuf::new());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_default_config_content_parses() {
        let config: Config = toml::from_str(Config::default_config_content()).unwrap();
        assert_eq!(config, Config::default());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_roundtrip() {
        let mut config = Config::default();
        config.plugins.dir = Some(PathBuf::from("/srv/plugins"));

        let serialized = toml::to_string(&config).unwrap();
        let parsed: Config = toml::from_str(&serialized).unwrap();
        assert_eq!(parsed, config);
    }
}
