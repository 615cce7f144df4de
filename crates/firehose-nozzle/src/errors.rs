// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use crate::event::EventKind;
use std::fmt;

/// Raised when an event that is not a metric reaches the metric shaper.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ShapeError {
    #[error("unsupported event kind for metrics: {0}")]
    UnsupportedKind(EventKind),
}

/// Error returned by a backend wire client.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ClientError {
    #[error("request rejected by backend: {0}")]
    Rejected(String),

    #[error("backend unreachable: {0}")]
    Unavailable(String),
}

/// One series that could not be delivered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeriesFailure {
    pub series: String,
    pub reason: String,
}

/// Aggregated failures of a single `post_metrics` call, one entry per failing series.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostMetricsError {
    pub failures: Vec<SeriesFailure>,
}

impl PostMetricsError {
    #[must_use]
    pub fn new(failures: Vec<SeriesFailure>) -> Self {
        Self { failures }
    }

    /// Every series in the batch failed for the same reason.
    #[must_use]
    pub fn for_all<'a>(series: impl IntoIterator<Item = &'a str>, reason: &str) -> Self {
        Self {
            failures: series
                .into_iter()
                .map(|name| SeriesFailure {
                    series: name.to_string(),
                    reason: reason.to_string(),
                })
                .collect(),
        }
    }
}

impl fmt::Display for PostMetricsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} series failed to post", self.failures.len())?;
        for failure in &self.failures {
            write!(f, "; {}: {}", failure.series, failure.reason)?;
        }
        Ok(())
    }
}

impl std::error::Error for PostMetricsError {}

/// Errors from a sink handling one event. Local to that event.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SinkError {
    #[error(transparent)]
    Shape(#[from] ShapeError),

    #[error(transparent)]
    Post(#[from] PostMetricsError),

    #[error("failed to serialize event: {0}")]
    Serialize(String),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NozzleError {
    #[error("nozzle is already running")]
    AlreadyRunning,

    #[error("nozzle is not running")]
    NotRunning,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Invalid value for {name}: {value}")]
    Parse { name: &'static str, value: String },
}
