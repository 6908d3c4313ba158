//! Configuration types mapping to the TOML schema.
//!
//! Top-level config:
//! ```toml
//! [pipeline]               # engine defaults and services file
//! [logging]                # log file output
//! ```

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{ConfigError, Result};

// ─────────────────────────────────────────────────────────────────────────────
// Top-level Config
// ─────────────────────────────────────────────────────────────────────────────

/// Root configuration structure.
///
/// All sections are optional so that partial configs (e.g., project-local
/// overrides) can be loaded and merged.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoomConfig {
    /// Pipeline engine configuration.
    pub pipeline: Option<PipelineSection>,

    /// Log output configuration.
    pub logging: Option<LoggingSection>,
}

impl LoomConfig {
    /// Create an empty config.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        let config: LoomConfig = toml::from_str(toml_str)?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize to a TOML string.
    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Merge another config on top of this one (other takes priority).
    pub fn merge(&mut self, other: LoomConfig) {
        if other.pipeline.is_some() {
            self.pipeline = other.pipeline;
        }

        if other.logging.is_some() {
            self.logging = other.logging;
        }
    }

    /// Effective pipeline settings (defaults when the section is absent).
    pub fn pipeline(&self) -> PipelineSection {
        self.pipeline.clone().unwrap_or_default()
    }

    /// Effective logging settings (defaults when the section is absent).
    pub fn logging(&self) -> LoggingSection {
        self.logging.clone().unwrap_or_default()
    }

    /// Reject values no component can work with.
    pub fn validate(&self) -> Result<()> {
        if let Some(ref pipeline) = self.pipeline {
            pipeline.validate()?;
        }
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Pipeline Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Pipeline engine configuration.
///
/// ```toml
/// [pipeline]
/// services_file = "config/services.yaml"
/// default_collection = "document_chunks"
/// default_top_k = 10
/// revalidate_before_run = true
/// max_bridge_hops = 2
/// default_timeout_secs = 300
/// default_retry_attempts = 3
/// default_retry_initial_interval_secs = 1
/// default_retry_max_interval_secs = 30
/// default_backoff_coefficient = 2.0
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineSection {
    /// Path to the services YAML declaring activities and pipelines.
    /// Relative paths are resolved from the working directory.
    pub services_file: Option<PathBuf>,
    /// Collection used by transforms when the run input names none.
    pub default_collection: String,
    /// Result count used for queries that do not set `top_k`.
    pub default_top_k: u64,
    /// Validate a pipeline again right before each run.
    pub revalidate_before_run: bool,
    /// Maximum intermediate activities a bridge suggestion may insert.
    pub max_bridge_hops: usize,
    /// Timeout for activities that declare none.
    pub default_timeout_secs: u64,
    /// Attempts for activities that declare none.
    pub default_retry_attempts: u32,
    /// First retry delay for activities that declare none.
    pub default_retry_initial_interval_secs: u64,
    /// Retry delay cap for activities that declare none.
    pub default_retry_max_interval_secs: u64,
    /// Backoff multiplier for activities that declare none.
    pub default_backoff_coefficient: f64,
}

impl Default for PipelineSection {
    fn default() -> Self {
        Self {
            services_file: None,
            default_collection: "document_chunks".to_string(),
            default_top_k: 10,
            revalidate_before_run: true,
            max_bridge_hops: 2,
            default_timeout_secs: 300,
            default_retry_attempts: 3,
            default_retry_initial_interval_secs: 1,
            default_retry_max_interval_secs: 30,
            default_backoff_coefficient: 2.0,
        }
    }
}

impl PipelineSection {
    pub fn default_timeout(&self) -> Duration {
        Duration::from_secs(self.default_timeout_secs)
    }

    pub fn default_retry_initial_interval(&self) -> Duration {
        Duration::from_secs(self.default_retry_initial_interval_secs)
    }

    pub fn default_retry_max_interval(&self) -> Duration {
        Duration::from_secs(self.default_retry_max_interval_secs)
    }

    fn validate(&self) -> Result<()> {
        if self.default_collection.trim().is_empty() {
            return Err(invalid("pipeline.default_collection", "must not be empty"));
        }
        if self.default_timeout_secs == 0 {
            return Err(invalid("pipeline.default_timeout_secs", "must be at least 1"));
        }
        if self.default_retry_attempts == 0 {
            return Err(invalid("pipeline.default_retry_attempts", "must be at least 1"));
        }
        if !self.default_backoff_coefficient.is_finite() || self.default_backoff_coefficient < 1.0
        {
            return Err(invalid(
                "pipeline.default_backoff_coefficient",
                "must be a number >= 1.0",
            ));
        }
        Ok(())
    }
}

fn invalid(field: &str, reason: &str) -> ConfigError {
    ConfigError::InvalidValue {
        field: field.to_string(),
        reason: reason.to_string(),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Logging Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Log output configuration.
///
/// ```toml
/// [logging]
/// directory = "/var/log/loom"
/// file_enabled = true
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSection {
    /// Directory for rolling JSON log files. Defaults to `<config dir>/logs`.
    pub directory: Option<PathBuf>,
    /// Whether to write the JSON log file at all.
    pub file_enabled: bool,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            directory: None,
            file_enabled: true,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
