//! Configuration management module
//!
//! Handles loading, validation, and management of application configuration.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::Path;

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    /// Shell executable launched for each session
    pub shell_path: String,

    /// Logging level
    pub log_level: String,

    /// File-based logging configuration
    pub log: LogConfig,

    /// Shared history configuration
    pub history: HistoryConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LogConfig {
    /// Log file path; empty logs to stderr only
    pub file_path: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct HistoryConfig {
    /// Newline-delimited history file; empty keeps history in memory
    pub file_path: String,

    /// Entries retained before the oldest are dropped
    pub max_entries: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            shell_path: "/bin/sh".to_string(),
            log_level: "info".to_string(),
            log: LogConfig::default(),
            history: HistoryConfig::default(),
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            file_path: String::new(),
        }
    }
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            file_path: String::new(),
            max_entries: 1000,
        }
    }
}

impl Config {
    /// Load configuration from file with environment variable overrides
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;

        let mut config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.as_ref().display()))?;

        config.apply_env_overrides();

        config.validate()?;
        Ok(config)
    }

    /// Apply environment variable overrides to configuration
    pub fn apply_env_overrides(&mut self) {
        // TERMSESSION_SHELL_PATH - shell executable
        if let Ok(shell_path) = env::var("TERMSESSION_SHELL_PATH") {
            if !shell_path.trim().is_empty() {
                self.shell_path = shell_path;
            }
        }

        // TERMSESSION_LOG_LEVEL - logging level
        if let Ok(log_level) = env::var("TERMSESSION_LOG_LEVEL") {
            self.log_level = log_level;
        }

        // TERMSESSION_LOG_FILE_PATH - logging destination file
        if let Ok(file_path) = env::var("TERMSESSION_LOG_FILE_PATH") {
            self.log.file_path = file_path;
        }

        // TERMSESSION_HISTORY_FILE_PATH - persistent history file
        if let Ok(file_path) = env::var("TERMSESSION_HISTORY_FILE_PATH") {
            self.history.file_path = file_path;
        }

        // TERMSESSION_HISTORY_MAX_ENTRIES - history cap
        if let Ok(max_entries) = env::var("TERMSESSION_HISTORY_MAX_ENTRIES") {
            if let Ok(value) = max_entries.parse::<usize>() {
                self.history.max_entries = value;
            }
        }
    }

    /// Save configuration to file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize configuration")?;

        std::fs::write(&path, content)
            .with_context(|| format!("Failed to write config file: {}", path.as_ref().display()))?;

        Ok(())
    }

    /// Load configuration with fallback to default
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Self {
        Self::load_from_file(path).unwrap_or_else(|err| {
            tracing::warn!("Failed to load config: {}, using defaults", err);
            let mut config = Self::default();
            config.apply_env_overrides();
            config.validated_or_default()
        })
    }

    /// Keep this configuration if it is valid, otherwise use plain defaults
    fn validated_or_default(self) -> Self {
        match self.validate() {
            Ok(()) => self,
            Err(err) => {
                tracing::warn!("Invalid configuration overrides: {}, using defaults", err);
                Self::default()
            }
        }
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.shell_path.trim().is_empty() {
            anyhow::bail!("Shell path must not be empty");
        }

        if self.history.max_entries == 0 {
            anyhow::bail!("history.max_entries must be greater than 0");
        }

        Ok(())
    }

    /// Display formatted configuration
    pub fn display(&self) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize configuration")?;
        println!("Current configuration:");
        println!("{}", content);
        Ok(())
    }

    /// Display configuration management help
    pub fn display_help() -> Result<()> {
        println!("Configuration management commands:");
        println!("  termsession config show    - Show current configuration");
        println!("  termsession config reset   - Write the default configuration");
        Ok(())
    }

    /// Handle configuration command
    pub fn handle_command(
        action: &Option<crate::cli::ConfigAction>,
        config_file: impl AsRef<Path>,
    ) -> Result<()> {
        match action {
            Some(crate::cli::ConfigAction::Show) => {
                let config = Config::load_or_default(&config_file);
                config.display()?;
            }
            Some(crate::cli::ConfigAction::Reset) => {
                let default_config = Config::default();
                default_config.save_to_file(&config_file)?;
                println!(
                    "Default configuration written to {}",
                    config_file.as_ref().display()
                );
            }
            None => {
                Config::display_help()?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.shell_path, "/bin/sh");
        assert_eq!(config.history.max_entries, 1000);
    }

    #[test]
    fn test_config_serialization() {
        let config = Config::default();
        let serialized = toml::to_string(&config).unwrap();
        let deserialized: Config = toml::from_str(&serialized).unwrap();
        assert_eq!(config.shell_path, deserialized.shell_path);
        assert_eq!(config.history.max_entries, deserialized.history.max_entries);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let config: Config = toml::from_str("shell_path = \"/bin/zsh\"\n").unwrap();
        assert_eq!(config.shell_path, "/bin/zsh");
        assert_eq!(config.log_level, "info");
        assert_eq!(config.history.max_entries, 1000);
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let mut config = Config::default();
        config.shell_path = "  ".to_string();
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.history.max_entries = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_invalid_fallback_reverts_to_defaults() {
        let mut config = Config::default();
        config.history.max_entries = 0;
        config.log_level = "debug".to_string();

        let config = config.validated_or_default();
        assert_eq!(config.history.max_entries, 1000);
        assert_eq!(config.log_level, "info");

        let mut config = Config::default();
        config.shell_path = "/bin/zsh".to_string();
        assert_eq!(config.validated_or_default().shell_path, "/bin/zsh");
    }

    #[test]
    fn test_config_file_operations() {
        let mut config = Config::default();
        config.history.file_path = "/tmp/termsession_history".to_string();
        let temp_file = NamedTempFile::new().unwrap();

        config.save_to_file(temp_file.path()).unwrap();

        let loaded_config = Config::load_from_file(temp_file.path()).unwrap();
        assert_eq!(config.shell_path, loaded_config.shell_path);
    }
}
