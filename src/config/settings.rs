use serde::Deserialize;

use crate::utils::constants::{
    DEFAULT_COLLECT_INTERVAL_SECONDS, DEFAULT_METRICS_PATH, DEFAULT_REFRESH_INTERVAL_SECONDS,
};

/// ================================
/// Global service-wide settings
/// ================================
#[derive(Debug, Deserialize, Clone)]
pub struct SettingsConfig {
    /// seconds between two `RotateAndRefresh` ticks
    #[serde(default = "default_refresh_interval_seconds")]
    pub refresh_interval_seconds: u64,
    /// seconds between two collection cycles
    #[serde(default = "default_collect_interval_seconds")]
    pub collect_interval_seconds: u64,
    #[serde(default)]
    pub on_refresh_failure: RefreshFailurePolicy,
    #[serde(default)]
    pub on_collect_failure: CollectFailurePolicy,
    /// when an account is republished, drop its transaction groups upstream no longer reports
    #[serde(default = "default_true")]
    pub reset_transactions_each_cycle: bool,
    /// leave transactions with a decline reason out of the group sums
    #[serde(default)]
    pub skip_declined_transactions: bool,
    /// do not publish pots flagged as deleted
    #[serde(default)]
    pub skip_deleted_pots: bool,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub server: ServerConfig,
    pub logging: Option<LoggingConfig>,
}

impl Default for SettingsConfig {
    fn default() -> Self {
        Self {
            refresh_interval_seconds: DEFAULT_REFRESH_INTERVAL_SECONDS,
            collect_interval_seconds: DEFAULT_COLLECT_INTERVAL_SECONDS,
            on_refresh_failure: RefreshFailurePolicy::default(),
            on_collect_failure: CollectFailurePolicy::default(),
            reset_transactions_each_cycle: true,
            skip_declined_transactions: false,
            skip_deleted_pots: false,
            metrics: MetricsConfig::default(),
            server: ServerConfig::default(),
            logging: None,
        }
    }
}

/// What happens to the head token when its refresh fails.
#[derive(Debug, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RefreshFailurePolicy {
    /// token is removed from the store
    #[default]
    Drop,
    /// token goes back to the tail unchanged
    Requeue,
}

/// What happens to the rest of a collection cycle when one token fails.
#[derive(Debug, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CollectFailurePolicy {
    /// the remaining tokens are not attempted this cycle
    #[default]
    AbortCycle,
    /// the failing token is logged and the next one is attempted
    SkipToken,
}

#[derive(Debug, Deserialize, Clone)]
pub struct MetricsConfig {
    #[serde(default = "default_metrics_path")]
    pub path: String,
    #[serde(default = "default_true")]
    pub is_enabled: bool,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            path: default_metrics_path(),
            is_enabled: true,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// ================================
/// Logging
/// ================================
#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    pub level: String, // allowed: trace, debug, info, warn, error
    pub format: LogFormat,
}

impl LoggingConfig {
    pub fn new(level: String, format: LogFormat) -> Self {
        Self { level, format }
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Json,
    Compact,
}

fn default_metrics_path() -> String {
    DEFAULT_METRICS_PATH.to_string()
}

fn default_refresh_interval_seconds() -> u64 {
    DEFAULT_REFRESH_INTERVAL_SECONDS
}

fn default_collect_interval_seconds() -> u64 {
    DEFAULT_COLLECT_INTERVAL_SECONDS
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> String {
    "9036".to_string()
}

fn default_true() -> bool {
    true
}
