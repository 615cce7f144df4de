// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::collections::BTreeMap;
use std::fmt;
use std::time::SystemTime;

/// Label key to value. Ordered so two label sets compare and hash by value.
pub type Labels = BTreeMap<String, String>;

/// Point end time to value.
pub type Points = BTreeMap<SystemTime, f64>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MetricKind {
    #[default]
    Gauge,
    /// Running total since `start_time`; every point covers `[start_time, end_time]`.
    Cumulative { start_time: SystemTime },
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Metric {
    pub name: String,
    pub labels: Labels,
    pub points: Points,
    /// Empty means dimensionless.
    pub unit: String,
    pub kind: MetricKind,
}

impl Metric {
    /// A gauge with a single point.
    #[must_use]
    pub fn gauge(name: String, labels: Labels, event_time: SystemTime, value: f64) -> Self {
        Metric {
            name,
            labels,
            points: Points::from([(event_time, value)]),
            unit: String::new(),
            kind: MetricKind::Gauge,
        }
    }

    #[must_use]
    pub fn with_unit(mut self, unit: String) -> Self {
        self.unit = unit;
        self
    }

    /// Identity used for coalescing and counter tracking.
    #[must_use]
    pub fn series_key(&self) -> SeriesKey {
        SeriesKey::new(self.name.clone(), self.labels.clone())
    }
}

/// Metric name plus the full label set.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SeriesKey {
    pub name: String,
    pub labels: Labels,
}

impl SeriesKey {
    #[must_use]
    pub fn new(name: String, labels: Labels) -> Self {
        Self { name, labels }
    }
}

impl fmt::Display for SeriesKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{{", self.name)?;
        for (i, (key, value)) in self.labels.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, "{key}={value:?}")?;
        }
        f.write_str("}")
    }
}
