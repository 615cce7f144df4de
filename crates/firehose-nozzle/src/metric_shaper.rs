// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Turns metric events into named metric points.

use crate::counter_tracker::CounterTracker;
use crate::errors::ShapeError;
use crate::event::{ContainerMetric, CounterEvent, Event, Payload, ValueMetric};
use crate::labels::ORIGIN;
use crate::metric::{Labels, Metric, MetricKind, Points, SeriesKey};
use crate::units::UnitParser;
use regex::Regex;
use std::sync::Arc;
use std::time::SystemTime;
use tracing::debug;

/// How counter events are exported.
#[derive(Debug, Clone)]
pub enum CounterMode {
    /// Two gauges, `<name>.delta` and `<name>.total`, with the raw values.
    DualGauge,
    /// One cumulative metric reconstructed by the tracker.
    Cumulative(Arc<CounterTracker>),
}

pub struct MetricShaper {
    path_prefix: String,
    runtime_metric: Regex,
    unit_parser: Arc<dyn UnitParser>,
    counter_mode: CounterMode,
}

impl MetricShaper {
    #[must_use]
    pub fn new(
        path_prefix: String,
        runtime_metric: Regex,
        unit_parser: Arc<dyn UnitParser>,
        counter_mode: CounterMode,
    ) -> Self {
        Self {
            path_prefix,
            runtime_metric,
            unit_parser,
            counter_mode,
        }
    }

    /// A value metric whose name matches the runtime pattern. Runtime metrics
    /// carry the origin as a label instead of a name prefix.
    #[must_use]
    pub fn is_runtime_metric(&self, event: &Event) -> bool {
        match &event.payload {
            Payload::ValueMetric(metric) => self.runtime_metric.is_match(&metric.name),
            _ => false,
        }
    }

    fn name_prefix(&self, event: &Event, runtime: bool) -> String {
        let mut prefix = String::new();
        if !self.path_prefix.is_empty() {
            prefix.push_str(&self.path_prefix);
            prefix.push('/');
        }
        if !runtime {
            if let Some(origin) = event.origin.as_deref().filter(|o| !o.is_empty()) {
                prefix.push_str(origin);
                prefix.push('.');
            }
        }
        prefix
    }

    pub fn shape(&self, event: &Event, mut labels: Labels) -> Result<Vec<Metric>, ShapeError> {
        let runtime = self.is_runtime_metric(event);
        if runtime {
            if let Some(origin) = event.origin.as_deref().filter(|o| !o.is_empty()) {
                labels.insert(ORIGIN.to_string(), origin.to_string());
            }
        }
        let prefix = self.name_prefix(event, runtime);
        let event_time = event.event_time();

        match &event.payload {
            Payload::ValueMetric(metric) => {
                Ok(vec![self.value_metric(&prefix, labels, event_time, metric)])
            }
            Payload::ContainerMetric(metric) => {
                Ok(container_metrics(&prefix, &labels, event_time, metric))
            }
            Payload::CounterEvent(counter) => {
                Ok(self.counter_metrics(&prefix, labels, event_time, counter))
            }
            Payload::LogMessage(_) | Payload::HttpStartStop(_) | Payload::Error(_) => {
                Err(ShapeError::UnsupportedKind(event.kind()))
            }
        }
    }

    fn value_metric(
        &self,
        prefix: &str,
        labels: Labels,
        event_time: SystemTime,
        metric: &ValueMetric,
    ) -> Metric {
        Metric::gauge(format!("{prefix}{}", metric.name), labels, event_time, metric.value)
            .with_unit(self.unit_parser.parse(&metric.unit))
    }

    #[allow(clippy::cast_precision_loss)]
    fn counter_metrics(
        &self,
        prefix: &str,
        labels: Labels,
        event_time: SystemTime,
        counter: &CounterEvent,
    ) -> Vec<Metric> {
        match &self.counter_mode {
            CounterMode::DualGauge => vec![
                Metric::gauge(
                    format!("{prefix}{}.delta", counter.name),
                    labels.clone(),
                    event_time,
                    counter.delta as f64,
                ),
                Metric::gauge(
                    format!("{prefix}{}.total", counter.name),
                    labels,
                    event_time,
                    counter.total as f64,
                ),
            ],
            CounterMode::Cumulative(tracker) => {
                let key = SeriesKey::new(format!("{prefix}{}", counter.name), labels);
                let Some(cumulative) =
                    tracker.get_total(&key, counter.total as f64, event_time)
                else {
                    debug!(series = %key, "discarding first observation of counter");
                    return Vec::new();
                };
                vec![Metric {
                    name: key.name,
                    labels: key.labels,
                    points: Points::from([(event_time, cumulative.total)]),
                    unit: String::new(),
                    kind: MetricKind::Cumulative {
                        start_time: cumulative.start_time,
                    },
                }]
            }
        }
    }
}

#[allow(clippy::cast_precision_loss)]
fn container_metrics(
    prefix: &str,
    labels: &Labels,
    event_time: SystemTime,
    metric: &ContainerMetric,
) -> Vec<Metric> {
    [
        ("diskBytesQuota", metric.disk_bytes_quota as f64),
        ("instanceIndex", f64::from(metric.instance_index)),
        ("cpuPercentage", metric.cpu_percentage),
        ("diskBytes", metric.disk_bytes as f64),
        ("memoryBytes", metric.memory_bytes as f64),
        ("memoryBytesQuota", metric.memory_bytes_quota as f64),
    ]
    .into_iter()
    .map(|(name, value)| {
        Metric::gauge(format!("{prefix}{name}"), labels.clone(), event_time, value)
    })
    .collect()
}
