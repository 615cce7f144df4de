// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Reconstructs cumulative counters from raw totals.
//!
//! Emitters reset their totals when they restart. The tracker keeps its own
//! running total per series so the exported value never goes backwards, and
//! pins a start time to the first observation of the series. Series idle for
//! longer than the TTL are forgotten and start over.

use crate::metric::SeriesKey;
use crate::telemetry::Counter;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};
use tokio::time::{interval, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CumulativeTotal {
    pub total: f64,
    pub start_time: SystemTime,
}

#[derive(Debug)]
struct CounterState {
    start_time: SystemTime,
    total_value: f64,
    last_value: f64,
    last_seen: Instant,
}

#[derive(Debug)]
pub struct CounterTracker {
    counters: Mutex<HashMap<SeriesKey, CounterState>>,
    ttl: Duration,
    expired: Arc<Counter>,
}

impl CounterTracker {
    #[must_use]
    pub fn new(ttl: Duration, expired: Arc<Counter>) -> Self {
        Self {
            counters: Mutex::new(HashMap::new()),
            ttl,
            expired,
        }
    }

    /// Records `value` for `key` and returns the running total.
    ///
    /// The first observation of a series only establishes the baseline and
    /// returns `None`. A value lower than the previous one is treated as a
    /// reset of the emitter and added in full.
    pub fn get_total(
        &self,
        key: &SeriesKey,
        value: f64,
        event_time: SystemTime,
    ) -> Option<CumulativeTotal> {
        #[allow(clippy::expect_used)]
        let mut counters = self.counters.lock().expect("lock poisoned");
        let now = Instant::now();

        let Some(state) = counters.get_mut(key) else {
            debug!(series = %key, "first observation of counter");
            counters.insert(
                key.clone(),
                CounterState {
                    start_time: event_time,
                    total_value: 0.0,
                    last_value: value,
                    last_seen: now,
                },
            );
            return None;
        };

        let increase = if value < state.last_value {
            debug!(series = %key, previous = state.last_value, value, "counter reset");
            value
        } else {
            value - state.last_value
        };
        state.total_value += increase;
        state.last_value = value;
        state.last_seen = now;

        Some(CumulativeTotal {
            total: state.total_value,
            start_time: state.start_time,
        })
    }

    /// Removes every series idle for longer than the TTL.
    pub fn expire(&self) -> usize {
        #[allow(clippy::expect_used)]
        let mut counters = self.counters.lock().expect("lock poisoned");
        let now = Instant::now();
        let before = counters.len();
        counters.retain(|key, state| {
            let keep = now.saturating_duration_since(state.last_seen) <= self.ttl;
            if !keep {
                debug!(series = %key, "expiring idle counter");
            }
            keep
        });
        let removed = before - counters.len();
        if removed > 0 {
            self.expired.add(i64::try_from(removed).unwrap_or(i64::MAX));
        }
        removed
    }

    #[must_use]
    pub fn len(&self) -> usize {
        #[allow(clippy::expect_used)]
        let counters = self.counters.lock().expect("lock poisoned");
        counters.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Sweeps expired series every `ttl / 2` until `cancel` fires.
    pub async fn run_expiry(self: Arc<Self>, cancel: CancellationToken) {
        let period = (self.ttl / 2).max(Duration::from_millis(1));
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await; // first tick fires immediately

        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    debug!("counter tracker expiry stopped");
                    return;
                }
                _ = ticker.tick() => {
                    let removed = self.expire();
                    if removed > 0 {
                        debug!(removed, "expired idle counters");
                    }
                }
            }
        }
    }
}
