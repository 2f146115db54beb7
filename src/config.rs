//! Configuration management for shellmux.
//!
//! This module provides TOML-based configuration file loading and saving.
//! The default configuration path is `~/.config/shellmux/config.toml`.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::session::shell;

/// Configuration validation errors.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("max_sessions must be between 1 and 64, got {0}")]
    InvalidMaxSessions(usize),

    #[error("poll_interval_ms must be between 10 and 5000, got {0}")]
    InvalidPollInterval(u64),

    #[error("shell program does not exist: {0}")]
    InvalidShellPath(String),

    #[error("log_level must be one of: trace, debug, info, warn, error; got {0}")]
    InvalidLogLevel(String),
}

/// Valid log level values for tracing configuration.
const VALID_LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// Main configuration structure for shellmux.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    /// Session manager configuration.
    pub manager: ManagerConfig,

    /// Shell invocation configuration.
    pub shell: ShellConfig,
}

/// Session manager configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ManagerConfig {
    /// Maximum number of concurrent sessions.
    pub max_sessions: usize,

    /// Working directory for sessions created without an explicit one.
    pub default_working_dir: PathBuf,

    /// Output poll cadence in milliseconds.
    pub poll_interval_ms: u64,

    /// Logging level (trace, debug, info, warn, error).
    pub log_level: String,
}

/// Shell invocation configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ShellConfig {
    /// Shell program to spawn for new sessions.
    pub program: String,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            max_sessions: 4,
            default_working_dir: PathBuf::from("."),
            poll_interval_ms: 100,
            log_level: "info".to_string(),
        }
    }
}

impl Default for ShellConfig {
    fn default() -> Self {
        Self {
            program: shell::default_shell(),
        }
    }
}

/// Returns the default configuration file path.
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("shellmux")
        .join("config.toml")
}

impl Config {
    /// Apply environment variable overrides to the configuration.
    ///
    /// Environment variables take precedence over config file values.
    /// Supported variables:
    /// - SHELLMUX_LOG_LEVEL: Override log level (trace, debug, info, warn, error)
    /// - SHELLMUX_SHELL: Override the shell program
    pub fn apply_env_overrides(&mut self) {
        if let Ok(level) = std::env::var("SHELLMUX_LOG_LEVEL") {
            if !level.is_empty() {
                tracing::info!("Overriding log_level from environment: {}", level);
                self.manager.log_level = level;
            }
        }

        if let Ok(program) = std::env::var("SHELLMUX_SHELL") {
            if !program.is_empty() {
                tracing::info!("Overriding shell program from environment: {}", program);
                self.shell.program = program;
            }
        }
    }

    /// Validate the configuration values.
    ///
    /// Returns an error if any configuration value is outside the valid range.
    pub fn validate(&self) -> Result<(), ConfigError> {
        // Validate max_sessions: 1-64
        if self.manager.max_sessions < 1 || self.manager.max_sessions > 64 {
            return Err(ConfigError::InvalidMaxSessions(self.manager.max_sessions));
        }

        // Validate poll_interval_ms: 10-5000
        if self.manager.poll_interval_ms < 10 || self.manager.poll_interval_ms > 5000 {
            return Err(ConfigError::InvalidPollInterval(
                self.manager.poll_interval_ms,
            ));
        }

        // Validate the shell program resolves to something runnable
        let shell_path = Path::new(&self.shell.program);

        // Check if it's an absolute path that exists
        if shell_path.is_absolute() {
            if !shell_path.exists() {
                return Err(ConfigError::InvalidShellPath(self.shell.program.clone()));
            }
        } else {
            // For non-absolute paths, try to find in PATH
            if which::which(&self.shell.program).is_err() {
                return Err(ConfigError::InvalidShellPath(self.shell.program.clone()));
            }
        }

        // Validate log_level is a known value
        let level = self.manager.log_level.to_lowercase();
        if !VALID_LOG_LEVELS.contains(&level.as_str()) {
            return Err(ConfigError::InvalidLogLevel(self.manager.log_level.clone()));
        }

        Ok(())
    }

    /// Load configuration from a file.
    ///
    /// If the file does not exist, returns the default configuration.
    /// If the file exists but is invalid TOML, returns an error with
    /// a helpful message.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            tracing::debug!("Config file not found at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::from_toml(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    /// Load configuration from the default path.
    ///
    /// The default path is `~/.config/shellmux/config.toml`.
    pub fn load_default() -> Result<Self> {
        Self::load(default_config_path())
    }

    /// Parse configuration from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        toml::from_str(toml_str)
            .map_err(|e| anyhow::anyhow!("Invalid TOML configuration: {}", format_toml_error(&e)))
    }

    /// Save configuration to a file.
    ///
    /// Creates parent directories if they don't exist.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();

        // Create parent directories if needed
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        let contents = self.to_toml()?;
        fs::write(path, contents)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        tracing::debug!("Configuration saved to {:?}", path);
        Ok(())
    }

    /// Save configuration to the default path.
    pub fn save_default(&self) -> Result<()> {
        self.save(default_config_path())
    }

    /// Serialize configuration to a TOML string.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize configuration to TOML")
    }
}

/// Format a TOML deserialization error for user-friendly display.
fn format_toml_error(error: &toml::de::Error) -> String {
    let mut msg = error.message().to_string();

    if let Some(span) = error.span() {
        msg.push_str(&format!(" (at position {}..{})", span.start, span.end));
    }

    msg
}
