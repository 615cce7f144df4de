// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Mock backend clients for testing

use firehose_nozzle::adapter::{LogAdapter, LogEntry, MetricClient, MetricDescriptor};
use firehose_nozzle::errors::ClientError;
use firehose_nozzle::metric::Metric;
use std::sync::Mutex;

/// Mock metric client that records every call
#[derive(Default)]
pub struct MockMetricClient {
    pub existing: Vec<String>,
    pub posted: Mutex<Vec<Metric>>,
    pub descriptors: Mutex<Vec<String>>,
}

impl MockMetricClient {
    pub fn with_existing(existing: &[&str]) -> Self {
        Self {
            existing: existing.iter().map(|name| (*name).to_string()).collect(),
            ..Default::default()
        }
    }

    pub fn posted(&self) -> Vec<Metric> {
        self.posted.lock().expect("lock poisoned").clone()
    }

    pub fn descriptors(&self) -> Vec<String> {
        self.descriptors.lock().expect("lock poisoned").clone()
    }
}

#[async_trait::async_trait]
impl MetricClient for MockMetricClient {
    async fn post(&self, metrics: &[Metric]) -> Result<(), ClientError> {
        self.posted
            .lock()
            .expect("lock poisoned")
            .extend_from_slice(metrics);
        Ok(())
    }

    async fn create_metric_descriptor(
        &self,
        descriptor: &MetricDescriptor,
    ) -> Result<(), ClientError> {
        self.descriptors
            .lock()
            .expect("lock poisoned")
            .push(descriptor.name.clone());
        Ok(())
    }

    async fn list_metric_descriptors(&self) -> Result<Vec<String>, ClientError> {
        Ok(self.existing.clone())
    }
}

/// Mock log adapter that keeps every entry
#[derive(Default)]
pub struct MockLogAdapter {
    pub entries: Mutex<Vec<LogEntry>>,
}

impl MockLogAdapter {
    pub fn entries(&self) -> Vec<LogEntry> {
        self.entries.lock().expect("lock poisoned").clone()
    }
}

impl LogAdapter for MockLogAdapter {
    fn post_log(&self, entry: LogEntry) {
        self.entries.lock().expect("lock poisoned").push(entry);
    }
}
