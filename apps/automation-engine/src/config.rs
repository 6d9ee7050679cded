//! Configuration for the automation engine.
//!
//! Provides YAML configuration loading with environment variable
//! interpolation (`${VAR}` / `${VAR:-default}`), serde defaults for every
//! field, and a validation pass.
//!
//! # Usage
//!
//! ```rust,ignore
//! use automation_engine::config::{Config, load_config};
//!
//! // Load from default path (config.yaml)
//! let config = load_config(None)?;
//!
//! // Access configuration values
//! println!("budget: {} ms", config.governor.budget_ms);
//! ```

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::analyzer::AnalyzerConfig;
use crate::governor::GovernorConfig;
use crate::resilience::{CircuitBreakerConfig, RecoveryPolicy};
use crate::tracker::engine::{MarketHoursConfig, PageSelectors, TrackerConfig};

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read configuration file.
    #[error("Failed to read config file '{path}': {source}")]
    ReadError {
        /// Path to the config file.
        path: String,
        /// The underlying IO error.
        source: std::io::Error,
    },

    /// Failed to parse YAML configuration.
    #[error("Failed to parse config YAML: {0}")]
    ParseError(#[from] serde_yaml_bw::Error),

    /// Configuration validation failed.
    #[error("Config validation failed: {0}")]
    ValidationError(String),
}

/// Root configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Engine instance settings.
    #[serde(default)]
    pub instance: InstanceConfig,
    /// Tracker timing and retention settings.
    #[serde(default)]
    pub tracker: TrackerSection,
    /// Governor settings.
    #[serde(default)]
    pub governor: GovernorSection,
    /// Retry and circuit-breaker settings.
    #[serde(default)]
    pub resilience: ResilienceSection,
    /// Snapshot persistence settings.
    #[serde(default)]
    pub persistence: PersistenceSection,
    /// Page selector bindings.
    #[serde(default)]
    pub selectors: PageSelectors,
    /// Market-hours advisory settings.
    #[serde(default)]
    pub market_hours: MarketHoursSection,
    /// Reconciliation analyzer thresholds.
    #[serde(default)]
    pub analyzer: AnalyzerSection,
    /// Metrics exporter settings.
    #[serde(default)]
    pub observability: ObservabilitySection,
}

/// Engine instance settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstanceConfig {
    /// Instance key; derives the snapshot file name.
    #[serde(default = "default_instance_key")]
    pub key: String,
}

impl Default for InstanceConfig {
    fn default() -> Self {
        Self {
            key: default_instance_key(),
        }
    }
}

/// Tracker settings (durations in milliseconds unless noted).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackerSection {
    /// Submission confirmation deadline.
    #[serde(default = "default_submission_timeout_ms")]
    pub submission_timeout_ms: u64,
    /// Confirmation/error scan cadence.
    #[serde(default = "default_confirmation_poll_ms")]
    pub confirmation_poll_ms: u64,
    /// Base status-poll interval.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Status-poll interval under a widened-polling flag.
    #[serde(default = "default_widened_poll_interval_ms")]
    pub widened_poll_interval_ms: u64,
    /// Multiplier applied after failed table reads.
    #[serde(default = "default_poll_error_backoff")]
    pub poll_error_backoff: u32,
    /// Retention window for settled orders, in seconds.
    #[serde(default = "default_retention_secs")]
    pub retention_secs: u64,
    /// Order-table column carrying the client id.
    #[serde(default = "default_table_id_field")]
    pub table_id_field: String,
    /// Order-table column carrying the status text.
    #[serde(default = "default_table_status_field")]
    pub table_status_field: String,
}

impl Default for TrackerSection {
    fn default() -> Self {
        Self {
            submission_timeout_ms: default_submission_timeout_ms(),
            confirmation_poll_ms: default_confirmation_poll_ms(),
            poll_interval_ms: default_poll_interval_ms(),
            widened_poll_interval_ms: default_widened_poll_interval_ms(),
            poll_error_backoff: default_poll_error_backoff(),
            retention_secs: default_retention_secs(),
            table_id_field: default_table_id_field(),
            table_status_field: default_table_status_field(),
        }
    }
}

impl TrackerSection {
    /// Build the tracker runtime configuration.
    #[must_use]
    pub fn to_tracker_config(&self, market_hours: MarketHoursConfig) -> TrackerConfig {
        TrackerConfig {
            submission_timeout: Duration::from_millis(self.submission_timeout_ms),
            confirmation_poll: Duration::from_millis(self.confirmation_poll_ms),
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            widened_poll_interval: Duration::from_millis(self.widened_poll_interval_ms),
            poll_error_backoff: self.poll_error_backoff,
            retention: Duration::from_secs(self.retention_secs),
            table_id_field: self.table_id_field.clone(),
            table_status_field: self.table_status_field.clone(),
            market_hours,
        }
    }
}

/// Governor settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GovernorSection {
    /// Per-validation latency budget in milliseconds.
    #[serde(default = "default_budget_ms")]
    pub budget_ms: u64,
    /// Violation window in seconds.
    #[serde(default = "default_violation_window_secs")]
    pub violation_window_secs: u64,
    /// Recovery evaluation interval in seconds.
    #[serde(default = "default_recovery_interval_secs")]
    pub recovery_interval_secs: u64,
    /// Latency sample ring capacity.
    #[serde(default = "default_max_samples")]
    pub max_samples: usize,
    /// Samples required before trusting the rolling average.
    #[serde(default = "default_min_samples_for_average")]
    pub min_samples_for_average: usize,
    /// Budget fraction triggering a proactive downgrade.
    #[serde(default = "default_proactive_threshold")]
    pub proactive_threshold: f64,
    /// Budget fraction the average must fall below to recover.
    #[serde(default = "default_recovery_threshold")]
    pub recovery_threshold: f64,
}

impl Default for GovernorSection {
    fn default() -> Self {
        Self {
            budget_ms: default_budget_ms(),
            violation_window_secs: default_violation_window_secs(),
            recovery_interval_secs: default_recovery_interval_secs(),
            max_samples: default_max_samples(),
            min_samples_for_average: default_min_samples_for_average(),
            proactive_threshold: default_proactive_threshold(),
            recovery_threshold: default_recovery_threshold(),
        }
    }
}

impl GovernorSection {
    /// Build the governor runtime configuration.
    #[must_use]
    pub fn to_governor_config(&self) -> GovernorConfig {
        GovernorConfig {
            budget: Duration::from_millis(self.budget_ms),
            violation_window: Duration::from_secs(self.violation_window_secs),
            recovery_interval: Duration::from_secs(self.recovery_interval_secs),
            max_samples: self.max_samples,
            min_samples_for_average: self.min_samples_for_average,
            proactive_threshold: self.proactive_threshold,
            recovery_threshold: self.recovery_threshold,
        }
    }
}

/// Retry and circuit-breaker settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResilienceSection {
    /// Retries after the first attempt.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Base backoff delay in milliseconds.
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
    /// Backoff cap in milliseconds.
    #[serde(default = "default_backoff_cap_ms")]
    pub backoff_cap_ms: u64,
    /// Add jitter to backoff delays.
    #[serde(default = "default_jitter")]
    pub jitter: bool,
    /// Consecutive failures that open a circuit.
    #[serde(default = "default_failure_threshold")]
    pub circuit_failure_threshold: u32,
    /// Circuit cooldown in seconds.
    #[serde(default = "default_circuit_cooldown_secs")]
    pub circuit_cooldown_secs: u64,
}

impl Default for ResilienceSection {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            backoff_base_ms: default_backoff_base_ms(),
            backoff_cap_ms: default_backoff_cap_ms(),
            jitter: default_jitter(),
            circuit_failure_threshold: default_failure_threshold(),
            circuit_cooldown_secs: default_circuit_cooldown_secs(),
        }
    }
}

impl ResilienceSection {
    /// Build the retry policy.
    #[must_use]
    pub fn to_recovery_policy(&self) -> RecoveryPolicy {
        RecoveryPolicy {
            max_retries: self.max_retries,
            backoff_base: Duration::from_millis(self.backoff_base_ms),
            backoff_cap: Duration::from_millis(self.backoff_cap_ms),
            jitter: self.jitter,
        }
    }

    /// Build the circuit breaker configuration.
    #[must_use]
    pub fn to_breaker_config(&self) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: self.circuit_failure_threshold,
            cooldown: Duration::from_secs(self.circuit_cooldown_secs),
        }
    }
}

/// Snapshot persistence settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistenceSection {
    /// Whether snapshots are written at all.
    #[serde(default = "default_persistence_enabled")]
    pub enabled: bool,
    /// Directory snapshot files live under.
    #[serde(default = "default_persistence_directory")]
    pub directory: PathBuf,
}

impl Default for PersistenceSection {
    fn default() -> Self {
        Self {
            enabled: default_persistence_enabled(),
            directory: default_persistence_directory(),
        }
    }
}

/// Market-hours advisory settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketHoursSection {
    /// Whether the advisory runs.
    #[serde(default = "default_market_hours_enabled")]
    pub enabled: bool,
    /// Session open, `HH:MM` UTC.
    #[serde(default = "default_market_open")]
    pub open_utc: String,
    /// Session close, `HH:MM` UTC.
    #[serde(default = "default_market_close")]
    pub close_utc: String,
    /// Warn on weekends.
    #[serde(default = "default_weekdays_only")]
    pub weekdays_only: bool,
}

impl Default for MarketHoursSection {
    fn default() -> Self {
        Self {
            enabled: default_market_hours_enabled(),
            open_utc: default_market_open(),
            close_utc: default_market_close(),
            weekdays_only: default_weekdays_only(),
        }
    }
}

impl MarketHoursSection {
    /// Build the runtime market-hours configuration.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError::ValidationError`] when a session boundary
    /// does not parse as `HH:MM`.
    pub fn to_market_hours(&self) -> Result<MarketHoursConfig, ConfigError> {
        let parse = |label: &str, value: &str| {
            chrono::NaiveTime::parse_from_str(value, "%H:%M").map_err(|e| {
                ConfigError::ValidationError(format!("market_hours.{label} '{value}': {e}"))
            })
        };
        Ok(MarketHoursConfig {
            enabled: self.enabled,
            open_utc: parse("open_utc", &self.open_utc)?,
            close_utc: parse("close_utc", &self.close_utc)?,
            weekdays_only: self.weekdays_only,
        })
    }
}

/// Reconciliation analyzer thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalyzerSection {
    /// Success rate below which a recommendation is raised.
    #[serde(default = "default_min_success_rate")]
    pub min_success_rate: f64,
    /// Discrepancy count above which a recommendation is raised.
    #[serde(default = "default_max_discrepancies")]
    pub max_discrepancies: usize,
    /// Error-category frequency at which a recommendation is raised.
    #[serde(default = "default_error_frequency_threshold")]
    pub error_frequency_threshold: usize,
}

impl Default for AnalyzerSection {
    fn default() -> Self {
        Self {
            min_success_rate: default_min_success_rate(),
            max_discrepancies: default_max_discrepancies(),
            error_frequency_threshold: default_error_frequency_threshold(),
        }
    }
}

impl AnalyzerSection {
    /// Build the analyzer runtime configuration.
    #[must_use]
    pub const fn to_analyzer_config(&self) -> AnalyzerConfig {
        AnalyzerConfig {
            min_success_rate: self.min_success_rate,
            max_discrepancies: self.max_discrepancies,
            error_frequency_threshold: self.error_frequency_threshold,
        }
    }
}

/// Metrics exporter settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilitySection {
    /// Whether the Prometheus exporter is started.
    #[serde(default)]
    pub metrics_enabled: bool,
    /// Exporter listen address.
    #[serde(default = "default_metrics_listen_addr")]
    pub metrics_listen_addr: String,
}

impl Default for ObservabilitySection {
    fn default() -> Self {
        Self {
            metrics_enabled: false,
            metrics_listen_addr: default_metrics_listen_addr(),
        }
    }
}

// ============================================================================
// Defaults
// ============================================================================

fn default_instance_key() -> String {
    "automation-engine".to_string()
}
const fn default_submission_timeout_ms() -> u64 {
    10_000
}
const fn default_confirmation_poll_ms() -> u64 {
    200
}
const fn default_poll_interval_ms() -> u64 {
    2_000
}
const fn default_widened_poll_interval_ms() -> u64 {
    6_000
}
const fn default_poll_error_backoff() -> u32 {
    2
}
const fn default_retention_secs() -> u64 {
    3_600
}
fn default_table_id_field() -> String {
    "id".to_string()
}
fn default_table_status_field() -> String {
    "status".to_string()
}
const fn default_budget_ms() -> u64 {
    10
}
const fn default_violation_window_secs() -> u64 {
    30
}
const fn default_recovery_interval_secs() -> u64 {
    60
}
const fn default_max_samples() -> usize {
    100
}
const fn default_min_samples_for_average() -> usize {
    5
}
const fn default_proactive_threshold() -> f64 {
    0.8
}
const fn default_recovery_threshold() -> f64 {
    0.5
}
const fn default_max_retries() -> u32 {
    3
}
const fn default_backoff_base_ms() -> u64 {
    250
}
const fn default_backoff_cap_ms() -> u64 {
    5_000
}
const fn default_jitter() -> bool {
    true
}
const fn default_failure_threshold() -> u32 {
    5
}
const fn default_circuit_cooldown_secs() -> u64 {
    60
}
const fn default_persistence_enabled() -> bool {
    true
}
fn default_persistence_directory() -> PathBuf {
    PathBuf::from(".automation-cache")
}
const fn default_market_hours_enabled() -> bool {
    true
}
fn default_market_open() -> String {
    "13:30".to_string()
}
fn default_market_close() -> String {
    "20:00".to_string()
}
const fn default_weekdays_only() -> bool {
    true
}
const fn default_min_success_rate() -> f64 {
    0.8
}
const fn default_max_discrepancies() -> usize {
    5
}
const fn default_error_frequency_threshold() -> usize {
    3
}
fn default_metrics_listen_addr() -> String {
    "127.0.0.1:9090".to_string()
}

// ============================================================================
// Loading
// ============================================================================

/// Load configuration from a YAML file.
///
/// # Errors
///
/// Returns a `ConfigError` if the file cannot be read, parsed, or validated.
pub fn load_config(path: Option<&str>) -> Result<Config, ConfigError> {
    let path = path.unwrap_or("config.yaml");

    let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
        path: path.to_string(),
        source: e,
    })?;

    load_config_from_string(&contents)
}

/// Load configuration from a YAML string (useful for testing).
///
/// # Errors
///
/// Returns a `ConfigError` if the YAML cannot be parsed or validated.
pub fn load_config_from_string(yaml: &str) -> Result<Config, ConfigError> {
    let interpolated = interpolate_env_vars(yaml);
    let config: Config = serde_yaml_bw::from_str(&interpolated)?;
    validate_config(&config)?;
    Ok(config)
}

/// Interpolate environment variables in a string.
///
/// Supports both `${VAR}` and `${VAR:-default}` syntax.
#[allow(clippy::expect_used)] // Regex is compile-time constant; expect() is safe here
fn interpolate_env_vars(input: &str) -> String {
    use std::sync::OnceLock;

    static ENV_VAR_REGEX: OnceLock<regex::Regex> = OnceLock::new();

    let re = ENV_VAR_REGEX.get_or_init(|| {
        regex::Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)(?::-([^}]*))?\}")
            .expect("env var regex is valid")
    });

    let mut result = input.to_string();
    for cap in re.captures_iter(input) {
        let Some(full_match) = cap.get(0) else {
            continue;
        };
        let Some(var_match) = cap.get(1) else {
            continue;
        };
        let default_value = cap.get(2).map(|m| m.as_str());

        let value = match std::env::var(var_match.as_str()) {
            Ok(v) if !v.is_empty() => v,
            _ => default_value.map_or_else(String::new, str::to_string),
        };

        result = result.replace(full_match.as_str(), &value);
    }

    result
}

fn validate_config(config: &Config) -> Result<(), ConfigError> {
    if config.instance.key.trim().is_empty() {
        return Err(ConfigError::ValidationError(
            "instance.key must not be empty".to_string(),
        ));
    }
    if config.tracker.submission_timeout_ms == 0 {
        return Err(ConfigError::ValidationError(
            "tracker.submission_timeout_ms must be positive".to_string(),
        ));
    }
    if config.tracker.confirmation_poll_ms >= config.tracker.submission_timeout_ms {
        return Err(ConfigError::ValidationError(
            "tracker.confirmation_poll_ms must be below the submission timeout".to_string(),
        ));
    }
    if config.governor.budget_ms == 0 {
        return Err(ConfigError::ValidationError(
            "governor.budget_ms must be positive".to_string(),
        ));
    }
    for (label, value) in [
        ("governor.proactive_threshold", config.governor.proactive_threshold),
        ("governor.recovery_threshold", config.governor.recovery_threshold),
        ("analyzer.min_success_rate", config.analyzer.min_success_rate),
    ] {
        if !(0.0..=1.0).contains(&value) {
            return Err(ConfigError::ValidationError(format!(
                "{label} must be within [0, 1], got {value}"
            )));
        }
    }
    if config.resilience.circuit_failure_threshold == 0 {
        return Err(ConfigError::ValidationError(
            "resilience.circuit_failure_threshold must be positive".to_string(),
        ));
    }

    // Session boundaries must parse.
    config.market_hours.to_market_hours()?;

    Ok(())
}
