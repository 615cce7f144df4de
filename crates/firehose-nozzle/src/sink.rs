// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use crate::adapter::{LogAdapter, LogEntry, Severity};
use crate::errors::SinkError;
use crate::event::{Event, MessageType, Payload};
use crate::labels::LabelBuilder;
use crate::metric_shaper::MetricShaper;
use crate::metrics_buffer::MetricsBuffer;
use async_trait::async_trait;
use std::sync::Arc;

/// Destination for one class of events.
#[async_trait]
pub trait Sink: Send + Sync {
    async fn receive(&self, event: &Event) -> Result<(), SinkError>;
}

/// Forwards events as structured log entries.
pub struct LogSink {
    labels: LabelBuilder,
    adapter: Arc<dyn LogAdapter>,
}

impl LogSink {
    #[must_use]
    pub fn new(labels: LabelBuilder, adapter: Arc<dyn LogAdapter>) -> Self {
        Self { labels, adapter }
    }
}

fn severity(event: &Event) -> Severity {
    match &event.payload {
        Payload::LogMessage(log) => match log.message_type {
            MessageType::Out => Severity::Info,
            MessageType::Err => Severity::Error,
        },
        Payload::Error(_) => Severity::Error,
        _ => Severity::Default,
    }
}

#[async_trait]
impl Sink for LogSink {
    async fn receive(&self, event: &Event) -> Result<(), SinkError> {
        let payload =
            serde_json::to_value(event).map_err(|e| SinkError::Serialize(e.to_string()))?;
        self.adapter.post_log(LogEntry {
            payload,
            labels: self.labels.build(event),
            severity: severity(event),
        });
        Ok(())
    }
}

/// Shapes metric events and hands the result to the batch buffer.
pub struct MetricSink {
    labels: LabelBuilder,
    shaper: MetricShaper,
    buffer: Arc<MetricsBuffer>,
}

impl MetricSink {
    #[must_use]
    pub fn new(labels: LabelBuilder, shaper: MetricShaper, buffer: Arc<MetricsBuffer>) -> Self {
        Self {
            labels,
            shaper,
            buffer,
        }
    }
}

#[async_trait]
impl Sink for MetricSink {
    async fn receive(&self, event: &Event) -> Result<(), SinkError> {
        let metrics = self.shaper.shape(event, self.labels.build(event))?;
        for metric in metrics {
            self.buffer.post_metric(metric).await;
        }
        Ok(())
    }
}
