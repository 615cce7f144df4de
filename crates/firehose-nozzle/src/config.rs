// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use crate::errors::ConfigError;
use regex::Regex;
use std::env;
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_RUNTIME_METRIC_REGEX: &str = r"^(numCPUS|numGoRoutines|memoryStats\..*)$";

const VALID_LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Nozzle configuration
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Events held while the dispatcher is busy. Sized for 1k events/s over 30s.
    pub ingest_buffer_size: usize,
    /// Metrics accumulated before a batch is posted
    pub metrics_batch_size: usize,
    /// Longest time a metric waits in a partial batch
    pub metrics_buffer_duration: Duration,
    /// Idle time after which a counter series is forgotten
    pub counter_tracker_ttl: Duration,
    /// Heartbeat and self telemetry interval
    pub heartbeat_rate: Duration,
    /// Prepended to every metric name as `<prefix>/`
    pub metric_path_prefix: String,
    /// Value metrics matching this pattern carry the origin as a label
    pub runtime_metric_regex: String,
    /// Export counters as cumulative metrics instead of `.delta`/`.total` gauges
    pub enable_cumulative_counters: bool,
    /// Log level (e.g., trace, debug, info, warn, error)
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            ingest_buffer_size: 30_000,
            metrics_batch_size: 200,
            metrics_buffer_duration: Duration::from_secs(30),
            counter_tracker_ttl: Duration::from_secs(130),
            heartbeat_rate: Duration::from_secs(30),
            metric_path_prefix: "firehose".to_string(),
            runtime_metric_regex: DEFAULT_RUNTIME_METRIC_REGEX.to_string(),
            enable_cumulative_counters: false,
            log_level: "info".to_string(),
        }
    }
}

impl Config {
    /// Create configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Create configuration from any variable lookup. Unset variables keep
    /// their defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let config = Self {
            ingest_buffer_size: parse(&lookup, "INGEST_BUFFER_SIZE")?
                .unwrap_or(defaults.ingest_buffer_size),
            metrics_batch_size: parse(&lookup, "METRICS_BATCH_SIZE")?
                .unwrap_or(defaults.metrics_batch_size),
            metrics_buffer_duration: parse(&lookup, "METRICS_BUFFER_DURATION")?
                .map_or(defaults.metrics_buffer_duration, Duration::from_secs),
            counter_tracker_ttl: parse(&lookup, "COUNTER_TRACKER_TTL")?
                .map_or(defaults.counter_tracker_ttl, Duration::from_secs),
            heartbeat_rate: parse(&lookup, "HEARTBEAT_RATE")?
                .map_or(defaults.heartbeat_rate, Duration::from_secs),
            metric_path_prefix: lookup("METRIC_PATH_PREFIX")
                .unwrap_or(defaults.metric_path_prefix),
            runtime_metric_regex: lookup("RUNTIME_METRIC_REGEX")
                .unwrap_or(defaults.runtime_metric_regex),
            enable_cumulative_counters: lookup("ENABLE_CUMULATIVE_COUNTERS")
                .map_or(defaults.enable_cumulative_counters, |val| {
                    matches!(val.trim().to_lowercase().as_str(), "true" | "1")
                }),
            log_level: lookup("LOG_LEVEL")
                .map_or(defaults.log_level, |val| val.trim().to_lowercase()),
        };

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.ingest_buffer_size == 0 {
            return Err(ConfigError::Invalid(
                "INGEST_BUFFER_SIZE must be greater than 0".to_string(),
            ));
        }
        if self.metrics_batch_size == 0 {
            return Err(ConfigError::Invalid(
                "METRICS_BATCH_SIZE must be greater than 0".to_string(),
            ));
        }
        for (name, duration) in [
            ("METRICS_BUFFER_DURATION", self.metrics_buffer_duration),
            ("COUNTER_TRACKER_TTL", self.counter_tracker_ttl),
            ("HEARTBEAT_RATE", self.heartbeat_rate),
        ] {
            if duration.is_zero() {
                return Err(ConfigError::Invalid(format!(
                    "{name} must be greater than 0"
                )));
            }
        }

        self.runtime_metric_regex()?;

        if !VALID_LOG_LEVELS.contains(&self.log_level.as_str()) {
            return Err(ConfigError::Invalid(format!(
                "Invalid log level '{}'. Must be one of: trace, debug, info, warn, error",
                self.log_level
            )));
        }

        Ok(())
    }

    /// Compiled runtime metric pattern.
    pub fn runtime_metric_regex(&self) -> Result<Regex, ConfigError> {
        Regex::new(&self.runtime_metric_regex).map_err(|e| {
            ConfigError::Invalid(format!("RUNTIME_METRIC_REGEX is not a valid pattern: {e}"))
        })
    }
}

fn parse<T, F>(lookup: &F, name: &'static str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    match lookup(name) {
        None => Ok(None),
        Some(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::Parse { name, value }),
    }
}
