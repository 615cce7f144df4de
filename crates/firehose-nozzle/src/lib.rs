// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Firehose nozzle: forwards platform events to a telemetry backend.
//!
//! Events flow from an [`firehose::EventSource`] through the bounded
//! [`ingest_buffer::IngestBuffer`] to the [`nozzle::Nozzle`], which routes
//! metric kinds to the [`sink::MetricSink`] and everything else to the
//! [`sink::LogSink`]. The metric path builds labels, shapes the event into
//! metrics (reconstructing cumulative counters through the
//! [`counter_tracker::CounterTracker`]) and batches them in the
//! [`metrics_buffer::MetricsBuffer`] before they reach the backend adapter.

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

pub mod adapter;
pub mod app_info;
pub mod config;
pub mod counter_tracker;
pub mod errors;
pub mod event;
pub mod firehose;
pub mod heartbeat;
pub mod ingest_buffer;
pub mod labels;
pub mod logger;
pub mod metric;
pub mod metric_shaper;
pub mod metrics_buffer;
pub mod nozzle;
pub mod sink;
pub mod telemetry;
pub mod units;

pub use config::Config;
pub use errors::{ConfigError, NozzleError, PostMetricsError, ShapeError, SinkError};
pub use event::{Event, EventKind, Payload};
pub use metric::{Labels, Metric, MetricKind, SeriesKey};
pub use nozzle::Nozzle;
