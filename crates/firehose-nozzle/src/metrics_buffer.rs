// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Accumulates outbound metrics and posts them in batches.
//!
//! Points for a series already pending are merged into that entry, so a batch
//! holds at most one entry per series. A batch is posted when it reaches the
//! configured size, or by the flush loop when the batch duration elapses.
//! Post errors are offered to the error channel without waiting; when the
//! channel is full they are logged instead.

use crate::adapter::MetricAdapter;
use crate::errors::PostMetricsError;
use crate::metric::{Metric, SeriesKey};
use crate::telemetry::Counter;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

#[derive(Debug, Default)]
struct Pending {
    metrics: Vec<Metric>,
    index: HashMap<SeriesKey, usize>,
}

impl Pending {
    fn insert(&mut self, metric: Metric) {
        let key = metric.series_key();
        if let Some(&position) = self.index.get(&key) {
            let existing = &mut self.metrics[position];
            existing.points.extend(metric.points);
            existing.kind = metric.kind;
            return;
        }
        self.index.insert(key, self.metrics.len());
        self.metrics.push(metric);
    }

    fn take(&mut self) -> Vec<Metric> {
        self.index.clear();
        std::mem::take(&mut self.metrics)
    }
}

pub struct MetricsBuffer {
    size: usize,
    pending: Mutex<Pending>,
    adapter: Arc<dyn MetricAdapter>,
    errors: mpsc::Sender<PostMetricsError>,
    flushes: Arc<Counter>,
}

impl MetricsBuffer {
    /// `size` of 1 posts every metric as it arrives.
    #[must_use]
    pub fn new(
        size: usize,
        adapter: Arc<dyn MetricAdapter>,
        errors: mpsc::Sender<PostMetricsError>,
        flushes: Arc<Counter>,
    ) -> Self {
        Self {
            size: size.max(1),
            pending: Mutex::new(Pending::default()),
            adapter,
            errors,
            flushes,
        }
    }

    pub async fn post_metric(&self, metric: Metric) {
        let batch = {
            #[allow(clippy::expect_used)]
            let mut pending = self.pending.lock().expect("lock poisoned");
            pending.insert(metric);
            if pending.metrics.len() >= self.size {
                Some(pending.take())
            } else {
                None
            }
        };
        if let Some(batch) = batch {
            self.post_batch(batch).await;
        }
    }

    /// Posts whatever is pending, if anything.
    pub async fn flush(&self) {
        let batch = {
            #[allow(clippy::expect_used)]
            let mut pending = self.pending.lock().expect("lock poisoned");
            pending.take()
        };
        if !batch.is_empty() {
            self.post_batch(batch).await;
        }
    }

    #[must_use]
    pub fn pending_len(&self) -> usize {
        #[allow(clippy::expect_used)]
        let pending = self.pending.lock().expect("lock poisoned");
        pending.metrics.len()
    }

    async fn post_batch(&self, batch: Vec<Metric>) {
        debug!(entries = batch.len(), "posting metrics batch");
        self.flushes.increment();
        if let Err(e) = self.adapter.post_metrics(&batch).await {
            debug!("failed to post metrics batch: {e}");
            match self.errors.try_send(e) {
                Ok(()) => {}
                Err(TrySendError::Full(e) | TrySendError::Closed(e)) => {
                    warn!("error channel unavailable, dropping metrics post error: {e}");
                }
            }
        }
    }

    /// Flushes every `period` until cancelled, then once more.
    pub async fn run_flush_loop(self: Arc<Self>, period: Duration, cancel: CancellationToken) {
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await; // first tick fires immediately

        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    debug!("metrics buffer flush loop stopped");
                    self.flush().await;
                    return;
                }
                _ = ticker.tick() => self.flush().await,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::SeriesFailure;
    use crate::metric::{Labels, Points};
    use async_trait::async_trait;
    use std::time::{SystemTime, UNIX_EPOCH};
    use tracing_test::traced_test;

    #[derive(Default)]
    struct RecordingAdapter {
        batches: Mutex<Vec<Vec<Metric>>>,
        fail: bool,
    }

    impl RecordingAdapter {
        fn batches(&self) -> Vec<Vec<Metric>> {
            self.batches.lock().expect("lock poisoned").clone()
        }
    }

    #[async_trait]
    impl MetricAdapter for RecordingAdapter {
        async fn post_metrics(&self, metrics: &[Metric]) -> Result<(), PostMetricsError> {
            self.batches
                .lock()
                .expect("lock poisoned")
                .push(metrics.to_vec());
            if self.fail {
                return Err(PostMetricsError::for_all(
                    metrics.iter().map(|m| m.name.as_str()),
                    "backend said no",
                ));
            }
            Ok(())
        }
    }

    fn at(secs: u64) -> SystemTime {
        UNIX_EPOCH + Duration::from_secs(secs)
    }

    fn metric(name: &str, secs: u64, value: f64) -> Metric {
        Metric::gauge(
            name.to_string(),
            Labels::from([("job".to_string(), "router".to_string())]),
            at(secs),
            value,
        )
    }

    fn buffer(
        size: usize,
        adapter: &Arc<RecordingAdapter>,
    ) -> (Arc<MetricsBuffer>, mpsc::Receiver<PostMetricsError>) {
        let (tx, rx) = mpsc::channel(8);
        let buffer = MetricsBuffer::new(
            size,
            Arc::clone(adapter) as Arc<dyn MetricAdapter>,
            tx,
            Arc::new(Counter::default()),
        );
        (Arc::new(buffer), rx)
    }

    #[tokio::test]
    async fn test_size_one_is_passthrough() {
        let adapter = Arc::new(RecordingAdapter::default());
        let (buffer, _rx) = buffer(1, &adapter);

        buffer.post_metric(metric("a", 1, 1.0)).await;
        buffer.post_metric(metric("b", 1, 2.0)).await;

        let batches = adapter.batches();
        assert_eq!(batches.len(), 2);
        assert_eq!(batches[0], vec![metric("a", 1, 1.0)]);
        assert_eq!(batches[1], vec![metric("b", 1, 2.0)]);
    }

    #[tokio::test]
    async fn test_flushes_exactly_at_size() {
        let adapter = Arc::new(RecordingAdapter::default());
        let (buffer, _rx) = buffer(3, &adapter);

        buffer.post_metric(metric("a", 1, 1.0)).await;
        buffer.post_metric(metric("b", 1, 1.0)).await;
        assert!(adapter.batches().is_empty());
        assert_eq!(buffer.pending_len(), 2);

        buffer.post_metric(metric("c", 1, 1.0)).await;
        let batches = adapter.batches();
        assert_eq!(batches.len(), 1);
        let names: Vec<&str> = batches[0].iter().map(|m| m.name.as_str()).collect();
        assert_eq!(names, vec!["a", "b", "c"]);
        assert_eq!(buffer.pending_len(), 0);
    }

    #[tokio::test]
    async fn test_same_series_points_are_merged() {
        let adapter = Arc::new(RecordingAdapter::default());
        let (buffer, _rx) = buffer(2, &adapter);

        buffer.post_metric(metric("a", 1, 1.0)).await;
        buffer.post_metric(metric("a", 2, 2.0)).await;
        assert!(adapter.batches().is_empty());
        assert_eq!(buffer.pending_len(), 1);

        buffer.post_metric(metric("b", 1, 5.0)).await;
        let batches = adapter.batches();
        assert_eq!(batches.len(), 1);
        assert_eq!(
            batches[0][0].points,
            Points::from([(at(1), 1.0), (at(2), 2.0)])
        );
    }

    #[tokio::test]
    async fn test_different_labels_are_different_series() {
        let adapter = Arc::new(RecordingAdapter::default());
        let (buffer, _rx) = buffer(10, &adapter);

        let mut other = metric("a", 1, 1.0);
        other.labels.insert("index".to_string(), "1".to_string());
        buffer.post_metric(metric("a", 1, 1.0)).await;
        buffer.post_metric(other).await;
        assert_eq!(buffer.pending_len(), 2);
    }

    #[tokio::test]
    async fn test_post_errors_arrive_on_channel() {
        let adapter = Arc::new(RecordingAdapter {
            fail: true,
            ..Default::default()
        });
        let (buffer, mut rx) = buffer(1, &adapter);

        buffer.post_metric(metric("a", 1, 1.0)).await;

        let error = rx.recv().await.expect("error delivered");
        assert_eq!(
            error.failures,
            vec![SeriesFailure {
                series: "a".to_string(),
                reason: "backend said no".to_string(),
            }]
        );
    }

    #[tokio::test]
    #[traced_test]
    async fn test_unread_errors_do_not_pile_up() {
        let adapter = Arc::new(RecordingAdapter {
            fail: true,
            ..Default::default()
        });
        let (tx, mut rx) = mpsc::channel(1);
        let buffer = MetricsBuffer::new(
            1,
            Arc::clone(&adapter) as Arc<dyn MetricAdapter>,
            tx,
            Arc::new(Counter::default()),
        );

        for name in ["a", "b", "c"] {
            buffer.post_metric(metric(name, 1, 1.0)).await;
        }

        assert_eq!(adapter.batches().len(), 3);
        let first = rx.try_recv().expect("first error delivered");
        assert_eq!(first.failures[0].series, "a");
        assert!(rx.try_recv().is_err());
        assert!(logs_contain("dropping metrics post error"));
    }

    #[tokio::test]
    async fn test_flush_posts_partial_batch() {
        let adapter = Arc::new(RecordingAdapter::default());
        let (buffer, _rx) = buffer(10, &adapter);

        buffer.flush().await;
        assert!(adapter.batches().is_empty());

        buffer.post_metric(metric("a", 1, 1.0)).await;
        buffer.flush().await;
        assert_eq!(adapter.batches(), vec![vec![metric("a", 1, 1.0)]]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_flush_loop_posts_on_interval_and_on_cancel() {
        let adapter = Arc::new(RecordingAdapter::default());
        let (buffer, _rx) = buffer(10, &adapter);
        let cancel = CancellationToken::new();
        let task = tokio::spawn(
            Arc::clone(&buffer).run_flush_loop(Duration::from_secs(30), cancel.clone()),
        );

        buffer.post_metric(metric("a", 1, 1.0)).await;
        tokio::time::sleep(Duration::from_secs(31)).await;
        assert_eq!(adapter.batches().len(), 1);

        buffer.post_metric(metric("b", 1, 1.0)).await;
        cancel.cancel();
        task.await.expect("flush loop panicked");
        assert_eq!(adapter.batches().len(), 2);
    }
}
