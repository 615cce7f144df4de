// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! The dispatcher.
//!
//! [`Nozzle::start`] connects an [`EventSource`] and runs three tasks until
//! [`Nozzle::stop`]:
//!
//! * the error drain, which logs and counts transport errors and raises the
//!   fatal signal when the source gives up,
//! * the producer, which moves events from the source into the ingest buffer,
//! * the consumer, which pops events and routes them to the log or metric sink.
//!
//! The producer never waits on the sinks; when the consumer falls behind the
//! ingest buffer drops the oldest events.

use crate::errors::{NozzleError, SinkError};
use crate::event::Event;
use crate::firehose::{Disconnect, EventSource, TransportError};
use crate::ingest_buffer::IngestBuffer;
use crate::sink::Sink;
use crate::telemetry::{
    Counter, CounterMap, Registry, FIREHOSE_ERRORS, FIREHOSE_EVENTS_DROPPED,
    FIREHOSE_EVENTS_RECEIVED, FIREHOSE_EVENTS_TOTAL, SINK_ERRORS,
};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Error types exported under `firehose.errors`.
pub const FIREHOSE_ERROR_TYPES: [&str; 5] = [
    "empty",
    "unknown",
    "close_normal_closure",
    "close_policy_violation",
    "close_unknown",
];

#[derive(Debug, Clone)]
struct Counters {
    total: Arc<Counter>,
    dropped: Arc<Counter>,
    received: Arc<Counter>,
    sink_errors: Arc<Counter>,
    firehose_errors: Arc<CounterMap>,
}

impl Counters {
    fn register(registry: &Registry) -> Self {
        let firehose_errors = registry.counter_map(FIREHOSE_ERRORS, &["error_type"]);
        for error_type in FIREHOSE_ERROR_TYPES {
            let _ = firehose_errors.counter(&[error_type]);
        }
        Self {
            total: registry.counter(FIREHOSE_EVENTS_TOTAL),
            dropped: registry.counter(FIREHOSE_EVENTS_DROPPED),
            received: registry.counter(FIREHOSE_EVENTS_RECEIVED),
            sink_errors: registry.counter(SINK_ERRORS),
            firehose_errors,
        }
    }

    fn firehose_error(&self, error_type: &str) {
        if let Some(counter) = self.firehose_errors.counter(&[error_type]) {
            counter.increment();
        }
    }
}

#[derive(Debug)]
struct Session {
    cancel: CancellationToken,
    buffer: Arc<IngestBuffer>,
    disconnect: Disconnect,
}

pub struct Nozzle {
    log_sink: Arc<dyn Sink>,
    metric_sink: Arc<dyn Sink>,
    buffer_capacity: usize,
    sink_errors: mpsc::Sender<SinkError>,
    counters: Counters,
    session: Mutex<Option<Session>>,
}

impl Nozzle {
    /// Sink errors are offered to `sink_errors` without waiting; when the
    /// channel is full they are logged here instead.
    pub fn new(
        log_sink: Arc<dyn Sink>,
        metric_sink: Arc<dyn Sink>,
        buffer_capacity: usize,
        sink_errors: mpsc::Sender<SinkError>,
        registry: &Registry,
    ) -> Self {
        Self {
            log_sink,
            metric_sink,
            buffer_capacity,
            sink_errors,
            counters: Counters::register(registry),
            session: Mutex::new(None),
        }
    }

    /// Connects `source` and starts processing.
    ///
    /// The returned receiver resolves when the source reports an unrecoverable
    /// error. The caller is expected to terminate the process.
    pub fn start(
        &self,
        source: &mut dyn EventSource,
    ) -> Result<oneshot::Receiver<TransportError>, NozzleError> {
        #[allow(clippy::expect_used)]
        let mut session = self.session.lock().expect("lock poisoned");
        if session.is_some() {
            return Err(NozzleError::AlreadyRunning);
        }

        let connection = source.connect();
        let cancel = CancellationToken::new();
        let buffer = Arc::new(IngestBuffer::new(
            self.buffer_capacity,
            Arc::clone(&self.counters.dropped),
            Arc::clone(&self.counters.total),
        ));
        let (fatal_tx, fatal_rx) = oneshot::channel();

        tokio::spawn(drain_errors(
            connection.errors,
            self.counters.clone(),
            fatal_tx,
            cancel.clone(),
        ));
        tokio::spawn(produce(connection.events, Arc::clone(&buffer), cancel.clone()));
        tokio::spawn(
            Consumer {
                log_sink: Arc::clone(&self.log_sink),
                metric_sink: Arc::clone(&self.metric_sink),
                sink_errors: self.sink_errors.clone(),
                counters: self.counters.clone(),
            }
            .run(Arc::clone(&buffer), cancel.clone()),
        );

        info!(capacity = self.buffer_capacity, "nozzle started");
        *session = Some(Session {
            cancel,
            buffer,
            disconnect: connection.disconnect,
        });
        Ok(fatal_rx)
    }

    /// Disconnects the source and stops every task started by
    /// [`Nozzle::start`]. Events still buffered are discarded.
    pub fn stop(&self) -> Result<(), NozzleError> {
        #[allow(clippy::expect_used)]
        let mut session = self.session.lock().expect("lock poisoned");
        let Some(session) = session.take() else {
            return Err(NozzleError::NotRunning);
        };
        if let Err(e) = session.disconnect.disconnect() {
            debug!("{e}");
        }
        session.cancel.cancel();
        session.buffer.close();
        info!(discarded = session.buffer.len(), "nozzle stopped");
        Ok(())
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        #[allow(clippy::expect_used)]
        let session = self.session.lock().expect("lock poisoned");
        session.is_some()
    }
}

async fn drain_errors(
    mut errors: mpsc::Receiver<Option<TransportError>>,
    counters: Counters,
    fatal: oneshot::Sender<TransportError>,
    cancel: CancellationToken,
) {
    let mut fatal = Some(fatal);
    loop {
        let received = tokio::select! {
            () = cancel.cancelled() => return,
            received = errors.recv() => received,
        };
        match received {
            None => {
                debug!("firehose error stream closed");
                return;
            }
            Some(None) => counters.firehose_error("empty"),
            Some(Some(err)) => {
                if err == TransportError::MaxRetriesReached {
                    error!(fatal = true, "firehose: {err}");
                    if let Some(fatal) = fatal.take() {
                        let _ = fatal.send(err.clone());
                    }
                } else {
                    error!("firehose: {err}");
                }
                counters.firehose_error(err.error_type());
            }
        }
    }
}

async fn produce(
    mut events: mpsc::Receiver<Event>,
    buffer: Arc<IngestBuffer>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            () = cancel.cancelled() => return,
            event = events.recv() => match event {
                Some(event) => buffer.push(event),
                None => {
                    info!("firehose event stream closed");
                    return;
                }
            },
        }
    }
}

struct Consumer {
    log_sink: Arc<dyn Sink>,
    metric_sink: Arc<dyn Sink>,
    sink_errors: mpsc::Sender<SinkError>,
    counters: Counters,
}

impl Consumer {
    async fn run(self, buffer: Arc<IngestBuffer>, cancel: CancellationToken) {
        loop {
            let event = tokio::select! {
                () = cancel.cancelled() => return,
                event = buffer.pop() => event,
            };
            let Some(event) = event else {
                return;
            };
            self.handle_event(&event).await;
        }
    }

    async fn handle_event(&self, event: &Event) {
        self.counters.received.increment();
        self.counters.total.increment();

        let sink = if event.kind().is_metric() {
            &self.metric_sink
        } else {
            &self.log_sink
        };
        if let Err(e) = sink.receive(event).await {
            debug!(kind = %event.kind(), "sink failed to handle event: {e}");
            self.counters.sink_errors.increment();
            match self.sink_errors.try_send(e) {
                Ok(()) => {}
                Err(TrySendError::Full(e) | TrySendError::Closed(e)) => {
                    warn!(kind = %event.kind(), "sink failed to handle event: {e}");
                }
            }
        }
    }
}
