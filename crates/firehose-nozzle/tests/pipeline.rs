// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

mod common;

use common::helpers::{container_metric, counter_event, eventually, log_message, value_metric};
use common::mocks::{MockLogAdapter, MockMetricClient};
use firehose_nozzle::adapter::{
    DescriptorCachingAdapter, LogAdapter, MetricAdapter, MetricClient, Severity,
};
use firehose_nozzle::app_info::{AppInfo, StaticAppInfoRepository};
use firehose_nozzle::counter_tracker::CounterTracker;
use firehose_nozzle::firehose::{ChannelSource, TransportError};
use firehose_nozzle::labels::LabelBuilder;
use firehose_nozzle::metric::MetricKind;
use firehose_nozzle::metric_shaper::{CounterMode, MetricShaper};
use firehose_nozzle::metrics_buffer::MetricsBuffer;
use firehose_nozzle::nozzle::Nozzle;
use firehose_nozzle::sink::{LogSink, MetricSink, Sink};
use firehose_nozzle::telemetry::{
    Registry, COUNTERS_EXPIRED, FIREHOSE_EVENTS_RECEIVED, METRICS_BUFFER_FLUSHES,
};
use firehose_nozzle::units::DefaultUnitParser;
use firehose_nozzle::Config;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, UNIX_EPOCH};
use tokio::sync::mpsc;

struct Pipeline {
    nozzle: Nozzle,
    registry: Arc<Registry>,
    buffer: Arc<MetricsBuffer>,
    client: Arc<MockMetricClient>,
    logs: Arc<MockLogAdapter>,
    events: mpsc::Sender<firehose_nozzle::Event>,
    errors: mpsc::Sender<Option<TransportError>>,
    fatal: tokio::sync::oneshot::Receiver<TransportError>,
}

async fn pipeline(existing_descriptors: &[&str]) -> Pipeline {
    let config = Config {
        enable_cumulative_counters: true,
        ..Default::default()
    };
    let registry = Registry::new();
    let client = Arc::new(MockMetricClient::with_existing(existing_descriptors));
    let adapter: Arc<dyn MetricAdapter> = Arc::new(
        DescriptorCachingAdapter::new(Arc::clone(&client) as Arc<dyn MetricClient>)
            .await
            .expect("descriptors listed"),
    );

    let apps = HashMap::from([(
        "app-1".to_string(),
        AppInfo {
            name: "billing".to_string(),
            space_name: "prod".to_string(),
            space_guid: "space-guid".to_string(),
            org_name: "acme".to_string(),
            org_guid: "org-guid".to_string(),
        },
    )]);
    let labels = LabelBuilder::new(Arc::new(StaticAppInfoRepository::new(apps)));

    let tracker = Arc::new(CounterTracker::new(
        config.counter_tracker_ttl,
        registry.counter(COUNTERS_EXPIRED),
    ));
    let shaper = MetricShaper::new(
        config.metric_path_prefix.clone(),
        config.runtime_metric_regex().expect("default pattern"),
        Arc::new(DefaultUnitParser),
        CounterMode::Cumulative(tracker),
    );
    let (metric_errors, _) = mpsc::channel(8);
    let buffer = Arc::new(MetricsBuffer::new(
        config.metrics_batch_size,
        adapter,
        metric_errors,
        registry.counter(METRICS_BUFFER_FLUSHES),
    ));

    let logs = Arc::new(MockLogAdapter::default());
    let log_sink: Arc<dyn Sink> = Arc::new(LogSink::new(
        labels.clone(),
        Arc::clone(&logs) as Arc<dyn LogAdapter>,
    ));
    let metric_sink: Arc<dyn Sink> =
        Arc::new(MetricSink::new(labels, shaper, Arc::clone(&buffer)));

    let (sink_errors, _) = mpsc::channel(8);
    let nozzle = Nozzle::new(
        log_sink,
        metric_sink,
        config.ingest_buffer_size,
        sink_errors,
        &registry,
    );

    let (events, events_rx) = mpsc::channel(64);
    let (errors, errors_rx) = mpsc::channel(64);
    let mut source = ChannelSource::new(events_rx, errors_rx);
    let fatal = nozzle.start(&mut source).expect("nozzle starts");

    Pipeline {
        nozzle,
        registry,
        buffer,
        client,
        logs,
        events,
        errors,
        fatal,
    }
}

fn received(registry: &Registry) -> i64 {
    registry
        .snapshot()
        .into_iter()
        .find(|value| value.name == format!("nozzle/{FIREHOSE_EVENTS_RECEIVED}"))
        .map_or(0, |value| value.value)
}

#[tokio::test]
async fn test_events_reach_backend_with_labels() {
    let p = pipeline(&["firehose/gorouter.existing"]).await;

    // The consumer handles events in order, so the log entry marks the end.
    for event in [
        container_metric("app-1"),
        value_metric("latency", "ms", 12.0),
        value_metric("existing", "ms", 1.0),
        value_metric("numCPUS", "", 4.0),
        log_message("app-1", "GET /health 200"),
    ] {
        p.events.send(event).await.expect("send");
    }
    assert!(eventually(|| p.logs.entries().len() == 1).await);
    assert_eq!(received(&p.registry), 5);
    p.buffer.flush().await;

    let entries = p.logs.entries();
    assert_eq!(entries.len(), 1);
    let entry = &entries[0];
    assert_eq!(entry.severity, Severity::Info);
    for (key, value) in [
        ("origin", "rep"),
        ("event_type", "LogMessage"),
        ("deployment", "cf"),
        ("job", "diego_cell"),
        ("index", "0"),
        ("application_id", "app-1"),
        ("app_name", "billing"),
        ("space_name", "prod"),
        ("org_guid", "org-guid"),
    ] {
        assert_eq!(entry.labels.get(key).map(String::as_str), Some(value), "{key}");
    }
    assert!(!entry.labels.contains_key("ip"));

    let posted = p.client.posted();
    let mut names: Vec<&str> = posted.iter().map(|m| m.name.as_str()).collect();
    names.sort_unstable();
    assert_eq!(
        names,
        vec![
            "firehose/gorouter.existing",
            "firehose/gorouter.latency",
            "firehose/numCPUS",
            "firehose/rep.cpuPercentage",
            "firehose/rep.diskBytes",
            "firehose/rep.diskBytesQuota",
            "firehose/rep.instanceIndex",
            "firehose/rep.memoryBytes",
            "firehose/rep.memoryBytesQuota",
        ]
    );
    let cpus = posted
        .iter()
        .find(|m| m.name == "firehose/numCPUS")
        .expect("runtime metric posted");
    assert_eq!(cpus.labels.get("origin").map(String::as_str), Some("gorouter"));
    let container = posted
        .iter()
        .find(|m| m.name == "firehose/rep.memoryBytes")
        .expect("container metric posted");
    assert_eq!(container.labels.get("app_name").map(String::as_str), Some("billing"));

    // Only metrics with a unit and no existing descriptor get one.
    assert_eq!(p.client.descriptors(), vec!["firehose/gorouter.latency".to_string()]);
    p.nozzle.stop().expect("nozzle stops");
}

#[tokio::test]
async fn test_counters_become_cumulative_series() {
    let p = pipeline(&[]).await;

    for (total, seconds) in [(10, 1), (15, 2), (25, 3), (40, 4), (10, 5), (20, 6)] {
        p.events
            .send(counter_event(total, seconds))
            .await
            .expect("send");
    }
    p.events
        .send(log_message("app-1", "done"))
        .await
        .expect("send");
    assert!(eventually(|| p.logs.entries().len() == 1).await);
    assert_eq!(received(&p.registry), 7);
    p.buffer.flush().await;

    let posted = p.client.posted();
    assert_eq!(posted.len(), 1, "one coalesced entry for the series");
    let series = &posted[0];
    assert_eq!(series.name, "firehose/gorouter.requests");
    assert_eq!(
        series.kind,
        MetricKind::Cumulative {
            start_time: UNIX_EPOCH + Duration::from_secs(1)
        }
    );
    let totals: Vec<f64> = series.points.values().copied().collect();
    assert_eq!(totals, vec![5.0, 15.0, 30.0, 40.0, 50.0]);
    p.nozzle.stop().expect("nozzle stops");
}

#[tokio::test]
async fn test_max_retries_is_fatal() {
    let p = pipeline(&[]).await;

    p.errors.send(None).await.expect("send");
    p.errors
        .send(Some(TransportError::MaxRetriesReached))
        .await
        .expect("send");

    let err = p.fatal.await.expect("fatal signal");
    assert_eq!(err, TransportError::MaxRetriesReached);
    p.nozzle.stop().expect("nozzle stops");
    assert!(p.nozzle.stop().is_err());
}
