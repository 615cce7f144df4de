// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Periodic liveness log.
//!
//! The heartbeat counts named increments and logs the counts seen during each
//! interval, so an operator can tell from the log alone whether events are
//! still flowing.

use crate::errors::SinkError;
use crate::event::Event;
use crate::sink::Sink;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::fmt::Write;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("heartbeat is not running")]
pub struct HeartbeatStopped;

/// Counts accumulated since the last report. Keys are a fixed set of names,
/// so the map stays bounded however far the reporter lags.
#[derive(Debug, Default)]
struct Tally {
    counts: BTreeMap<&'static str, u64>,
    stopped: bool,
}

#[derive(Clone, Debug)]
pub struct HeartbeatHandle {
    tally: Arc<Mutex<Tally>>,
    shutdown: CancellationToken,
}

impl HeartbeatHandle {
    pub fn increment(&self, name: &'static str) {
        #[allow(clippy::expect_used)]
        let mut tally = self.tally.lock().expect("lock poisoned");
        if tally.stopped {
            error!("heartbeat is not running, dropping increment of {name}");
            return;
        }
        *tally.counts.entry(name).or_default() += 1;
    }

    pub fn shutdown(&self) -> Result<(), HeartbeatStopped> {
        #[allow(clippy::expect_used)]
        let tally = self.tally.lock().expect("lock poisoned");
        if tally.stopped {
            return Err(HeartbeatStopped);
        }
        self.shutdown.cancel();
        Ok(())
    }
}

pub struct HeartbeatService {
    period: Duration,
    tally: Arc<Mutex<Tally>>,
    shutdown: CancellationToken,
}

impl HeartbeatService {
    #[must_use]
    pub fn new(period: Duration) -> (Self, HeartbeatHandle) {
        let tally = Arc::new(Mutex::new(Tally::default()));
        let shutdown = CancellationToken::new();
        let handle = HeartbeatHandle {
            tally: Arc::clone(&tally),
            shutdown: shutdown.clone(),
        };
        let service = Self {
            period,
            tally,
            shutdown,
        };
        (service, handle)
    }

    pub async fn run(self) {
        debug!("heartbeat started");
        let mut ticker = interval(self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await; // first tick fires immediately

        loop {
            tokio::select! {
                () = self.shutdown.cancelled() => {
                    info!("heartbeat stopping: {}", self.take_report(true));
                    return;
                }
                _ = ticker.tick() => info!("heartbeat: {}", self.take_report(false)),
            }
        }
    }

    fn take_report(&self, stop: bool) -> String {
        let counts = {
            #[allow(clippy::expect_used)]
            let mut tally = self.tally.lock().expect("lock poisoned");
            tally.stopped |= stop;
            std::mem::take(&mut tally.counts)
        };
        if counts.is_empty() {
            return "no events".to_string();
        }
        let mut report = String::new();
        for (i, (name, count)) in counts.iter().enumerate() {
            if i > 0 {
                report.push_str(", ");
            }
            let _ = write!(report, "{name}={count}");
        }
        report
    }
}

impl Drop for HeartbeatService {
    fn drop(&mut self) {
        if let Ok(mut tally) = self.tally.lock() {
            tally.stopped = true;
        }
    }
}

/// Counts every event by kind before passing it on.
pub struct HeartbeatSink {
    inner: Arc<dyn Sink>,
    heartbeat: HeartbeatHandle,
}

impl HeartbeatSink {
    #[must_use]
    pub fn new(inner: Arc<dyn Sink>, heartbeat: HeartbeatHandle) -> Self {
        Self { inner, heartbeat }
    }
}

#[async_trait]
impl Sink for HeartbeatSink {
    async fn receive(&self, event: &Event) -> Result<(), SinkError> {
        self.heartbeat.increment(event.kind().as_str());
        self.inner.receive(event).await
    }
}
