// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Boundaries to the telemetry backend.
//!
//! The wire clients that actually talk to the backend live outside this crate
//! and plug in through [`MetricClient`] and [`LogAdapter`]. The
//! [`DescriptorCachingAdapter`] sits between the metrics pipeline and a
//! [`MetricClient`] and makes sure a descriptor exists for every metric that
//! carries a unit before its points are written.

use crate::errors::{ClientError, PostMetricsError, SeriesFailure};
use crate::metric::{Labels, Metric, MetricKind};
use futures::stream::{self, StreamExt};
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::HashSet;
use std::io::Write;
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, error, info};

/// Upper bound on descriptor creations in flight for one batch.
const MAX_CONCURRENT_DESCRIPTOR_REQUESTS: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DescriptorKind {
    Gauge,
    Cumulative,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MetricDescriptor {
    pub name: String,
    pub label_keys: Vec<String>,
    pub unit: String,
    pub kind: DescriptorKind,
    pub description: String,
}

impl MetricDescriptor {
    #[must_use]
    pub fn for_metric(metric: &Metric) -> Self {
        let kind = match metric.kind {
            MetricKind::Gauge => DescriptorKind::Gauge,
            MetricKind::Cumulative { .. } => DescriptorKind::Cumulative,
        };
        Self {
            name: metric.name.clone(),
            label_keys: metric.labels.keys().cloned().collect(),
            unit: metric.unit.clone(),
            kind,
            description: "firehose-nozzle created custom metric.".to_string(),
        }
    }
}

/// Wire client for the backend's metrics API.
#[async_trait::async_trait]
pub trait MetricClient: Send + Sync {
    async fn post(&self, metrics: &[Metric]) -> Result<(), ClientError>;

    async fn create_metric_descriptor(
        &self,
        descriptor: &MetricDescriptor,
    ) -> Result<(), ClientError>;

    /// Names of the descriptors that already exist.
    async fn list_metric_descriptors(&self) -> Result<Vec<String>, ClientError>;
}

/// What the metrics pipeline posts batches to.
#[async_trait::async_trait]
pub trait MetricAdapter: Send + Sync {
    async fn post_metrics(&self, metrics: &[Metric]) -> Result<(), PostMetricsError>;
}

pub struct DescriptorCachingAdapter {
    client: Arc<dyn MetricClient>,
    descriptors: Mutex<HashSet<String>>,
}

impl DescriptorCachingAdapter {
    /// Fetches the existing descriptor names once. Failing here is fatal for
    /// the caller since nothing can be posted without the backend.
    pub async fn new(client: Arc<dyn MetricClient>) -> Result<Self, ClientError> {
        let existing = client.list_metric_descriptors().await?;
        info!("found {} existing metric descriptors", existing.len());
        Ok(Self {
            client,
            descriptors: Mutex::new(existing.into_iter().collect()),
        })
    }

    /// Claims the names of metrics that still need a descriptor.
    fn claim_missing(&self, metrics: &[Metric]) -> Vec<MetricDescriptor> {
        #[allow(clippy::expect_used)]
        let mut descriptors = self.descriptors.lock().expect("lock poisoned");
        metrics
            .iter()
            .filter(|metric| !metric.unit.is_empty())
            .filter(|metric| descriptors.insert(metric.name.clone()))
            .map(MetricDescriptor::for_metric)
            .collect()
    }

    fn release(&self, name: &str) {
        #[allow(clippy::expect_used)]
        self.descriptors.lock().expect("lock poisoned").remove(name);
    }

    async fn ensure_descriptors(&self, metrics: &[Metric]) -> Vec<(String, ClientError)> {
        let missing = self.claim_missing(metrics);
        if missing.is_empty() {
            return Vec::new();
        }
        debug!("creating {} metric descriptors", missing.len());

        let client = &self.client;
        let results: Vec<(MetricDescriptor, Result<(), ClientError>)> = stream::iter(missing)
            .map(|descriptor| async move {
                let result = client.create_metric_descriptor(&descriptor).await;
                (descriptor, result)
            })
            .buffer_unordered(MAX_CONCURRENT_DESCRIPTOR_REQUESTS)
            .collect()
            .await;

        let mut failed = Vec::new();
        for (descriptor, result) in results {
            if let Err(e) = result {
                error!("failed to create metric descriptor {}: {e}", descriptor.name);
                self.release(&descriptor.name);
                failed.push((descriptor.name, e));
            }
        }
        failed
    }
}

#[async_trait::async_trait]
impl MetricAdapter for DescriptorCachingAdapter {
    async fn post_metrics(&self, metrics: &[Metric]) -> Result<(), PostMetricsError> {
        let failed_descriptors = self.ensure_descriptors(metrics).await;

        let mut failures = Vec::new();
        let mut postable = Vec::with_capacity(metrics.len());
        for metric in metrics {
            match failed_descriptors.iter().find(|(name, _)| *name == metric.name) {
                Some((_, e)) => failures.push(SeriesFailure {
                    series: metric.series_key().to_string(),
                    reason: format!("descriptor: {e}"),
                }),
                None => postable.push(metric.clone()),
            }
        }

        if !postable.is_empty() {
            if let Err(e) = self.client.post(&postable).await {
                let reason = e.to_string();
                failures.extend(postable.iter().map(|metric| SeriesFailure {
                    series: metric.series_key().to_string(),
                    reason: reason.clone(),
                }));
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(PostMetricsError::new(failures))
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Severity {
    Default,
    Info,
    Error,
}

/// A log entry ready for the backend.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LogEntry {
    pub payload: Value,
    pub labels: Labels,
    pub severity: Severity,
}

/// Fire-and-forget log delivery. Batching and retries belong to the implementation.
pub trait LogAdapter: Send + Sync {
    fn post_log(&self, entry: LogEntry);
}

/// Writes log entries to stdout as JSON lines. Used when debugging a nozzle.
#[derive(Debug, Default, Clone, Copy)]
pub struct StdoutLogAdapter;

impl LogAdapter for StdoutLogAdapter {
    fn post_log(&self, entry: LogEntry) {
        match serde_json::to_string(&entry) {
            Ok(line) => write_line(&line),
            Err(e) => error!("failed to serialize log entry: {e}"),
        }
    }
}

/// Writes metrics to stdout as JSON lines. Knows no descriptors.
#[derive(Debug, Default, Clone, Copy)]
pub struct StdoutMetricClient;

#[async_trait::async_trait]
impl MetricClient for StdoutMetricClient {
    async fn post(&self, metrics: &[Metric]) -> Result<(), ClientError> {
        for metric in metrics {
            write_line(&metric_to_json(metric).to_string());
        }
        Ok(())
    }

    async fn create_metric_descriptor(
        &self,
        descriptor: &MetricDescriptor,
    ) -> Result<(), ClientError> {
        let line = serde_json::to_string(descriptor)
            .map_err(|e| ClientError::Rejected(e.to_string()))?;
        write_line(&line);
        Ok(())
    }

    async fn list_metric_descriptors(&self) -> Result<Vec<String>, ClientError> {
        Ok(Vec::new())
    }
}

fn write_line(line: &str) {
    let stdout = std::io::stdout();
    let mut handle = stdout.lock();
    if let Err(e) = writeln!(handle, "{line}") {
        error!("failed to write to stdout: {e}");
    }
}

fn unix_nanos(time: SystemTime) -> u64 {
    time.duration_since(UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_nanos()).unwrap_or(u64::MAX))
        .unwrap_or_default()
}

fn metric_to_json(metric: &Metric) -> Value {
    let start_time = match metric.kind {
        MetricKind::Gauge => None,
        MetricKind::Cumulative { start_time } => Some(unix_nanos(start_time)),
    };
    let points: Vec<Value> = metric
        .points
        .iter()
        .map(|(end_time, value)| {
            json!({
                "start_time": start_time.unwrap_or_else(|| unix_nanos(*end_time)),
                "end_time": unix_nanos(*end_time),
                "value": value,
            })
        })
        .collect();
    json!({
        "name": metric.name,
        "labels": metric.labels,
        "unit": metric.unit,
        "points": points,
    })
}
