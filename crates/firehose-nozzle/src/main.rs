// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

use std::process;
use std::sync::Arc;
use tokio::io::BufReader;
use tokio::sync::mpsc;
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use firehose_nozzle::{
    adapter::{DescriptorCachingAdapter, MetricAdapter, StdoutLogAdapter, StdoutMetricClient},
    app_info::{AppInfoRepository, NullAppInfoRepository},
    config::Config,
    counter_tracker::CounterTracker,
    errors::{PostMetricsError, SinkError},
    firehose::JsonLinesSource,
    heartbeat::{HeartbeatService, HeartbeatSink},
    labels::LabelBuilder,
    logger,
    metric::Labels,
    metric_shaper::{CounterMode, MetricShaper},
    metrics_buffer::MetricsBuffer,
    nozzle::Nozzle,
    sink::{LogSink, MetricSink, Sink},
    telemetry::{
        MetricTelemetrySink, Registry, Reporter, COUNTERS_EXPIRED, METRICS_BUFFER_FLUSHES,
    },
    units::DefaultUnitParser,
};
use tokio_util::sync::CancellationToken;

const ERROR_CHANNEL_CAPACITY: usize = 64;

#[tokio::main]
pub async fn main() {
    let config = Config::from_env();
    init_logging(config.as_ref().map_or("info", |c| c.log_level.as_str()));
    let config = match config {
        Ok(config) => config,
        Err(e) => {
            error!("Invalid configuration, shutting down nozzle: {e}");
            process::exit(1);
        }
    };
    debug!(?config, "Loaded configuration");

    let registry = Registry::new();
    let cancel = CancellationToken::new();

    let metric_adapter: Arc<dyn MetricAdapter> =
        match DescriptorCachingAdapter::new(Arc::new(StdoutMetricClient)).await {
            Ok(adapter) => Arc::new(adapter),
            Err(e) => {
                error!("Unable to list metric descriptors, shutting down nozzle: {e}");
                process::exit(1);
            }
        };

    let app_info: Arc<dyn AppInfoRepository> = Arc::new(NullAppInfoRepository);
    app_info.warm_up();
    let labels = LabelBuilder::new(app_info);

    let counter_mode = if config.enable_cumulative_counters {
        let tracker = Arc::new(CounterTracker::new(
            config.counter_tracker_ttl,
            registry.counter(COUNTERS_EXPIRED),
        ));
        tokio::spawn(Arc::clone(&tracker).run_expiry(cancel.clone()));
        CounterMode::Cumulative(tracker)
    } else {
        CounterMode::DualGauge
    };
    let runtime_metric = match config.runtime_metric_regex() {
        Ok(regex) => regex,
        Err(e) => {
            error!("{e}");
            process::exit(1);
        }
    };
    let shaper = MetricShaper::new(
        config.metric_path_prefix.clone(),
        runtime_metric,
        Arc::new(DefaultUnitParser),
        counter_mode,
    );

    let (metric_errors_tx, metric_errors) = mpsc::channel(ERROR_CHANNEL_CAPACITY);
    let metrics_buffer = Arc::new(MetricsBuffer::new(
        config.metrics_batch_size,
        Arc::clone(&metric_adapter),
        metric_errors_tx,
        registry.counter(METRICS_BUFFER_FLUSHES),
    ));
    let flush_loop = tokio::spawn(
        Arc::clone(&metrics_buffer).run_flush_loop(config.metrics_buffer_duration, cancel.clone()),
    );

    let (heartbeat, heartbeat_handle) = HeartbeatService::new(config.heartbeat_rate);
    let heartbeat_task = tokio::spawn(heartbeat.run());

    let instance_labels = Labels::from([(
        "nozzle_instance".to_string(),
        Uuid::new_v4().to_string(),
    )]);
    let reporter = Reporter::new(
        Arc::clone(&registry),
        config.heartbeat_rate,
        Arc::new(MetricTelemetrySink::new(Arc::clone(&metric_adapter), instance_labels)),
    );
    tokio::spawn(reporter.run(cancel.clone()));

    let log_sink: Arc<dyn Sink> = Arc::new(HeartbeatSink::new(
        Arc::new(LogSink::new(labels.clone(), Arc::new(StdoutLogAdapter))),
        heartbeat_handle.clone(),
    ));
    let metric_sink: Arc<dyn Sink> = Arc::new(HeartbeatSink::new(
        Arc::new(MetricSink::new(labels, shaper, metrics_buffer)),
        heartbeat_handle.clone(),
    ));

    let (sink_errors_tx, sink_errors) = mpsc::channel(ERROR_CHANNEL_CAPACITY);
    tokio::spawn(report_errors(sink_errors, metric_errors));

    let nozzle = Nozzle::new(
        log_sink,
        metric_sink,
        config.ingest_buffer_size,
        sink_errors_tx,
        &registry,
    );
    let mut source = JsonLinesSource::new(BufReader::new(tokio::io::stdin()));
    let fatal = match nozzle.start(&mut source) {
        Ok(fatal) => fatal,
        Err(e) => {
            error!("Unable to start nozzle: {e}");
            process::exit(1);
        }
    };
    info!("Nozzle reading events from stdin");

    tokio::select! {
        Ok(err) = fatal => {
            error!("Firehose connection lost, shutting down nozzle: {err}");
            process::exit(1);
        }
        result = tokio::signal::ctrl_c() => {
            if let Err(e) = result {
                error!("Unable to listen for shutdown signal: {e}");
            }
            info!("Shutting down nozzle");
        }
    }

    if let Err(e) = nozzle.stop() {
        error!("{e}");
    }
    cancel.cancel();
    if let Err(e) = heartbeat_handle.shutdown() {
        debug!("heartbeat already stopped: {e}");
    }
    for (name, task) in [("metrics flush", flush_loop), ("heartbeat", heartbeat_task)] {
        if let Err(e) = task.await {
            error!("{name} task failed: {e}");
        }
    }
}

fn init_logging(log_level: &str) {
    let env_filter = EnvFilter::try_new(log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = tracing_subscriber::fmt::Subscriber::builder()
        .with_env_filter(env_filter)
        .event_format(logger::Formatter)
        .with_writer(std::io::stderr)
        .finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("setting default subscriber failed: {e}");
    }
    debug!("Logging subsystem enabled");
}

async fn report_errors(
    mut sink_errors: mpsc::Receiver<SinkError>,
    mut metric_errors: mpsc::Receiver<PostMetricsError>,
) {
    loop {
        tokio::select! {
            Some(e) = sink_errors.recv() => error!("Failed to handle event: {e}"),
            Some(e) = metric_errors.recv() => error!("Failed to post metrics: {e}"),
            else => return,
        }
    }
}
