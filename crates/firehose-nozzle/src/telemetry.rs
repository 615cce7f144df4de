// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Counters describing the nozzle's own operation.
//!
//! A single [`Registry`] is created at startup and handed by `Arc` to every
//! component that counts something. Nothing here is global, so tests build
//! their own registry and read the counters back directly.
//!
//! The [`Reporter`] periodically hands a [`Registry::snapshot`] to a
//! [`TelemetrySink`], which is how the counters leave the process.

use crate::adapter::MetricAdapter;
use crate::metric::{Labels, Metric};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

/// Prefix under which the nozzle exports counters about itself.
pub const NOZZLE_PREFIX: &str = "nozzle";

pub const FIREHOSE_EVENTS_TOTAL: &str = "firehose_events.total";
pub const FIREHOSE_EVENTS_DROPPED: &str = "firehose_events.dropped";
pub const FIREHOSE_EVENTS_RECEIVED: &str = "firehose_events.received";
pub const FIREHOSE_ERRORS: &str = "firehose.errors";
pub const COUNTERS_EXPIRED: &str = "metrics.counters.expired.count";
pub const SINK_ERRORS: &str = "sink.errors";
pub const METRICS_BUFFER_FLUSHES: &str = "metrics_buffer.flushes";

/// A monotonically increasing counter.
#[derive(Debug, Default)]
pub struct Counter {
    value: AtomicI64,
}

impl Counter {
    pub fn increment(&self) {
        self.add(1);
    }

    pub fn add(&self, n: i64) {
        self.value.fetch_add(n, Ordering::Relaxed);
    }

    #[must_use]
    pub fn value(&self) -> i64 {
        self.value.load(Ordering::Relaxed)
    }
}

/// Related counters sharing the same label keys.
#[derive(Debug)]
pub struct CounterMap {
    label_keys: Vec<String>,
    counters: Mutex<BTreeMap<Vec<String>, Arc<Counter>>>,
}

impl CounterMap {
    fn new(label_keys: &[&str]) -> Self {
        Self {
            label_keys: label_keys.iter().map(|k| (*k).to_string()).collect(),
            counters: Mutex::new(BTreeMap::new()),
        }
    }

    /// Gets or creates the counter for `label_values`.
    ///
    /// Returns `None` when the number of values does not match the label keys.
    #[must_use]
    pub fn counter(&self, label_values: &[&str]) -> Option<Arc<Counter>> {
        if label_values.len() != self.label_keys.len() {
            error!(
                "want {} label values for counter map, got {}",
                self.label_keys.len(),
                label_values.len()
            );
            return None;
        }
        let key: Vec<String> = label_values.iter().map(|v| (*v).to_string()).collect();
        #[allow(clippy::expect_used)]
        let mut counters = self.counters.lock().expect("lock poisoned");
        Some(Arc::clone(counters.entry(key).or_default()))
    }

    fn entries(&self) -> Vec<(Labels, i64)> {
        #[allow(clippy::expect_used)]
        let counters = self.counters.lock().expect("lock poisoned");
        counters
            .iter()
            .map(|(values, counter)| {
                let labels = self
                    .label_keys
                    .iter()
                    .cloned()
                    .zip(values.iter().cloned())
                    .collect();
                (labels, counter.value())
            })
            .collect()
    }
}

enum Entry {
    Counter(Arc<Counter>),
    Map(Arc<CounterMap>),
}

/// One exported counter value.
#[derive(Debug, Clone, PartialEq)]
pub struct CounterValue {
    pub name: String,
    pub labels: Labels,
    pub value: i64,
}

#[derive(Default)]
pub struct Registry {
    entries: Mutex<BTreeMap<String, Entry>>,
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Registry")
    }
}

impl Registry {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Gets or registers the counter `name`.
    ///
    /// Asking for a name already registered as a counter map returns a
    /// detached counter and logs an error.
    pub fn counter(&self, name: &str) -> Arc<Counter> {
        #[allow(clippy::expect_used)]
        let mut entries = self.entries.lock().expect("lock poisoned");
        match entries
            .entry(name.to_string())
            .or_insert_with(|| Entry::Counter(Arc::new(Counter::default())))
        {
            Entry::Counter(counter) => Arc::clone(counter),
            Entry::Map(_) => {
                error!("telemetry name {name} is already registered as a counter map");
                Arc::new(Counter::default())
            }
        }
    }

    /// Gets or registers the counter map `name` with the given label keys.
    pub fn counter_map(&self, name: &str, label_keys: &[&str]) -> Arc<CounterMap> {
        #[allow(clippy::expect_used)]
        let mut entries = self.entries.lock().expect("lock poisoned");
        match entries
            .entry(name.to_string())
            .or_insert_with(|| Entry::Map(Arc::new(CounterMap::new(label_keys))))
        {
            Entry::Map(map) => Arc::clone(map),
            Entry::Counter(_) => {
                error!("telemetry name {name} is already registered as a counter");
                Arc::new(CounterMap::new(label_keys))
            }
        }
    }

    /// Current value of every registered counter, names qualified with [`NOZZLE_PREFIX`].
    #[must_use]
    pub fn snapshot(&self) -> Vec<CounterValue> {
        #[allow(clippy::expect_used)]
        let entries = self.entries.lock().expect("lock poisoned");
        let mut values = Vec::with_capacity(entries.len());
        for (name, entry) in entries.iter() {
            let name = qualify(name);
            match entry {
                Entry::Counter(counter) => values.push(CounterValue {
                    name,
                    labels: Labels::new(),
                    value: counter.value(),
                }),
                Entry::Map(map) => {
                    values.extend(map.entries().into_iter().map(|(labels, value)| {
                        CounterValue {
                            name: name.clone(),
                            labels,
                            value,
                        }
                    }));
                }
            }
        }
        values
    }
}

fn qualify(name: &str) -> String {
    format!("{NOZZLE_PREFIX}/{name}")
}

/// Destination for periodic telemetry reports.
#[async_trait::async_trait]
pub trait TelemetrySink: Send + Sync {
    /// Called once with the counters registered when reporting starts.
    async fn init(&self, registered: &[CounterValue]);

    async fn report(&self, values: &[CounterValue]);
}

/// Posts counters as gauges through the backend metric adapter.
pub struct MetricTelemetrySink {
    adapter: Arc<dyn MetricAdapter>,
    labels: Labels,
}

impl MetricTelemetrySink {
    /// `labels` are added to every exported counter, e.g. to identify this nozzle instance.
    pub fn new(adapter: Arc<dyn MetricAdapter>, labels: Labels) -> Self {
        Self { adapter, labels }
    }
}

#[async_trait::async_trait]
impl TelemetrySink for MetricTelemetrySink {
    async fn init(&self, registered: &[CounterValue]) {
        debug!(
            counters = registered.len(),
            "exporting nozzle telemetry as metrics"
        );
    }

    async fn report(&self, values: &[CounterValue]) {
        let now = SystemTime::now();
        let metrics: Vec<Metric> = values
            .iter()
            .map(|value| {
                let mut labels = self.labels.clone();
                labels.extend(value.labels.clone());
                #[allow(clippy::cast_precision_loss)]
                let point = value.value as f64;
                Metric::gauge(value.name.clone(), labels, now, point)
            })
            .collect();
        if let Err(e) = self.adapter.post_metrics(&metrics).await {
            error!("failed to report telemetry: {e}");
        }
    }
}

/// Periodically reports the registry to a sink until cancelled.
pub struct Reporter {
    registry: Arc<Registry>,
    interval: Duration,
    sink: Arc<dyn TelemetrySink>,
}

impl Reporter {
    pub fn new(registry: Arc<Registry>, interval: Duration, sink: Arc<dyn TelemetrySink>) -> Self {
        Self {
            registry,
            interval,
            sink,
        }
    }

    pub async fn run(self, cancel: CancellationToken) {
        self.sink.init(&self.registry.snapshot()).await;

        let mut ticker = tokio::time::interval(self.interval);
        ticker.tick().await; // first tick is immediate
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.sink.report(&self.registry.snapshot()).await;
                }
                () = cancel.cancelled() => {
                    debug!("telemetry reporter stopped");
                    return;
                }
            }
        }
    }
}
