//! Configuration module for SkySync.
//!
//! Typed configuration structs mapped to the YAML configuration file, with
//! loading, validation, defaults, and a builder for programmatic use.
//! Per-account settings (parallelism, interval) are clamped here and on
//! [`Account`](crate::domain::Account); the values in this file are the
//! defaults applied to new accounts.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::domain::account::{
    clamp_interval_minutes, clamp_max_parallel, DEFAULT_MAX_PARALLEL,
    DEFAULT_SYNC_INTERVAL_MINUTES, MAX_PARALLEL_RANGE, SYNC_INTERVAL_RANGE,
};
use crate::domain::ConflictStrategy;

/// Top-level configuration for SkySync.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub sync: SyncConfig,
    pub conflicts: ConflictsConfig,
    pub logging: LoggingConfig,
    pub database: DatabaseConfig,
}

/// How a path present on both sides without any persisted record is handled.
///
/// Identical content (equal hashes) is always adopted without a transfer;
/// this policy only decides the remaining cases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FirstSyncPolicy {
    /// Record a conflict and let the resolver decide
    #[default]
    Conflict,
    /// Download over the local file
    PreferRemote,
    /// Upload over the remote file
    PreferLocal,
    /// Transfer from the side with the later modification time
    PreferNewer,
}

/// Synchronization settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Concurrent transfers for new accounts (1-10).
    pub max_parallel: usize,
    /// Minutes between scheduled runs for new accounts (60-1440).
    pub interval_minutes: u32,
    /// Extra attempts for a transfer failing with a transient error.
    pub transfer_retries: u32,
    /// Delay before the first retry; doubled on each further attempt.
    pub retry_base_delay_ms: u64,
    /// Propagate deletions of previously synced files to the other side.
    pub propagate_deletions: bool,
    pub first_sync_policy: FirstSyncPolicy,
}

/// One glob rule of the conflict auto-resolution policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConflictRuleConfig {
    /// Glob matched against the relative path, e.g. `**/*.docx`.
    pub pattern: String,
    /// `none`, `keep_local`, `keep_remote` or `keep_both`.
    pub strategy: String,
}

/// Conflict resolution settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConflictsConfig {
    /// Strategy applied to new conflicts no rule matches; `none` leaves them
    /// for the user.
    pub default_strategy: String,
    /// First matching rule wins.
    pub rules: Vec<ConflictRuleConfig>,
}

/// Logging / tracing settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `trace`, `debug`, `info`, `warn` or `error`; `RUST_LOG` takes precedence.
    pub level: String,
    /// `pretty` or `json`.
    pub format: String,
}

/// Metadata database settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub path: PathBuf,
}

impl Config {
    /// Load configuration from a YAML file at `path`.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    /// Try to load from `path`; fall back to [`Config::default`] on any error.
    pub fn load_or_default(path: &Path) -> Self {
        Self::load(path).unwrap_or_default()
    }

    /// Platform-appropriate default path for the configuration file.
    ///
    /// Typically `$XDG_CONFIG_HOME/skysync/config.yaml` on Linux.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("~/.config"))
            .join("skysync")
            .join("config.yaml")
    }

    /// Serialize to YAML and write to `path`, creating parent directories.
    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_yaml::to_string(self)?)?;
        Ok(())
    }

    /// Parsed `conflicts.default_strategy`, `None` when invalid
    pub fn default_conflict_strategy(&self) -> ConflictStrategy {
        self.conflicts
            .default_strategy
            .parse()
            .unwrap_or(ConflictStrategy::None)
    }
}

impl SyncConfig {
    /// `max_parallel` clamped to 1..=10
    pub fn effective_max_parallel(&self) -> usize {
        clamp_max_parallel(self.max_parallel)
    }

    /// `interval_minutes` clamped to 60..=1440
    pub fn effective_interval_minutes(&self) -> u32 {
        clamp_interval_minutes(self.interval_minutes)
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            max_parallel: DEFAULT_MAX_PARALLEL,
            interval_minutes: DEFAULT_SYNC_INTERVAL_MINUTES,
            transfer_retries: 3,
            retry_base_delay_ms: 500,
            propagate_deletions: false,
            first_sync_policy: FirstSyncPolicy::Conflict,
        }
    }
}

impl Default for ConflictsConfig {
    fn default() -> Self {
        Self {
            default_strategy: "none".to_string(),
            rules: Vec::new(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: dirs::data_local_dir()
                .unwrap_or_else(|| PathBuf::from("~/.local/share"))
                .join("skysync")
                .join("skysync.db"),
        }
    }
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// A single validation error found in the configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Dotted path to the offending field, e.g. `"sync.max_parallel"`.
    pub field: String,
    /// Human-readable explanation.
    pub message: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

const VALID_LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

const VALID_LOG_FORMATS: &[&str] = &["pretty", "json"];

impl Config {
    /// Validate the configuration and return all errors found.
    ///
    /// An empty vector means the configuration is valid. Out-of-range
    /// parallelism and interval values are reported even though they
    /// would be clamped at use.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        if !MAX_PARALLEL_RANGE.contains(&self.sync.max_parallel) {
            errors.push(ValidationError {
                field: "sync.max_parallel".into(),
                message: format!(
                    "must be between {} and {}",
                    MAX_PARALLEL_RANGE.start(),
                    MAX_PARALLEL_RANGE.end()
                ),
            });
        }
        if !SYNC_INTERVAL_RANGE.contains(&self.sync.interval_minutes) {
            errors.push(ValidationError {
                field: "sync.interval_minutes".into(),
                message: format!(
                    "must be between {} and {}",
                    SYNC_INTERVAL_RANGE.start(),
                    SYNC_INTERVAL_RANGE.end()
                ),
            });
        }
        if self.sync.transfer_retries > 10 {
            errors.push(ValidationError {
                field: "sync.transfer_retries".into(),
                message: "must be at most 10".into(),
            });
        }

        if self
            .conflicts
            .default_strategy
            .parse::<ConflictStrategy>()
            .is_err()
        {
            errors.push(ValidationError {
                field: "conflicts.default_strategy".into(),
                message: format!("unknown strategy '{}'", self.conflicts.default_strategy),
            });
        }
        for (i, rule) in self.conflicts.rules.iter().enumerate() {
            if rule.pattern.trim().is_empty() {
                errors.push(ValidationError {
                    field: format!("conflicts.rules[{i}].pattern"),
                    message: "must not be empty".into(),
                });
            }
            if rule.strategy.parse::<ConflictStrategy>().is_err() {
                errors.push(ValidationError {
                    field: format!("conflicts.rules[{i}].strategy"),
                    message: format!("unknown strategy '{}'", rule.strategy),
                });
            }
        }

        if !VALID_LOG_LEVELS.contains(&self.logging.level.as_str()) {
            errors.push(ValidationError {
                field: "logging.level".into(),
                message: format!(
                    "must be one of {}",
                    VALID_LOG_LEVELS.join(", ")
                ),
            });
        }
        if !VALID_LOG_FORMATS.contains(&self.logging.format.as_str()) {
            errors.push(ValidationError {
                field: "logging.format".into(),
                message: format!("must be one of {}", VALID_LOG_FORMATS.join(", ")),
            });
        }

        errors
    }
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

/// Builder for [`Config`], starting from defaults.
#[derive(Debug, Clone, Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn max_parallel(mut self, n: usize) -> Self {
        self.config.sync.max_parallel = n;
        self
    }

    pub fn interval_minutes(mut self, minutes: u32) -> Self {
        self.config.sync.interval_minutes = minutes;
        self
    }

    pub fn transfer_retries(mut self, retries: u32) -> Self {
        self.config.sync.transfer_retries = retries;
        self
    }

    pub fn retry_base_delay_ms(mut self, ms: u64) -> Self {
        self.config.sync.retry_base_delay_ms = ms;
        self
    }

    pub fn propagate_deletions(mut self, enabled: bool) -> Self {
        self.config.sync.propagate_deletions = enabled;
        self
    }

    pub fn first_sync_policy(mut self, policy: FirstSyncPolicy) -> Self {
        self.config.sync.first_sync_policy = policy;
        self
    }

    pub fn default_conflict_strategy(mut self, strategy: impl Into<String>) -> Self {
        self.config.conflicts.default_strategy = strategy.into();
        self
    }

    pub fn conflict_rule(mut self, pattern: impl Into<String>, strategy: impl Into<String>) -> Self {
        self.config.conflicts.rules.push(ConflictRuleConfig {
            pattern: pattern.into(),
            strategy: strategy.into(),
        });
        self
    }

    pub fn logging_level(mut self, level: impl Into<String>) -> Self {
        self.config.logging.level = level.into();
        self
    }

    pub fn database_path(mut self, path: PathBuf) -> Self {
        self.config.database.path = path;
        self
    }

    pub fn build(self) -> Config {
        self.config
    }

    /// Build and validate; returns the errors if any
    pub fn build_validated(self) -> Result<Config, Vec<ValidationError>> {
        let errors = self.config.validate();
        if errors.is_empty() {
            Ok(self.config)
        } else {
            Err(errors)
        }
    }
}
