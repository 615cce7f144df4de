// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Bounded queue between the event source and the dispatcher.
//!
//! Pushing never blocks: when the queue is full the oldest unconsumed event is
//! overwritten and counted as dropped. There is one producer and one consumer.

use crate::event::Event;
use crate::telemetry::Counter;
use crossbeam_queue::ArrayQueue;
use std::sync::Arc;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::debug;

#[derive(Debug)]
pub struct IngestBuffer {
    queue: ArrayQueue<Event>,
    ready: Notify,
    closed: CancellationToken,
    dropped: Arc<Counter>,
    total: Arc<Counter>,
}

impl IngestBuffer {
    /// `capacity` must be non-zero; config validation guarantees it.
    #[must_use]
    pub fn new(capacity: usize, dropped: Arc<Counter>, total: Arc<Counter>) -> Self {
        Self {
            queue: ArrayQueue::new(capacity.max(1)),
            ready: Notify::new(),
            closed: CancellationToken::new(),
            dropped,
            total,
        }
    }

    pub fn push(&self, event: Event) {
        if let Some(overwritten) = self.queue.force_push(event) {
            debug!(kind = %overwritten.kind(), "ingest buffer full, dropping oldest event");
            self.dropped.increment();
            self.total.increment();
        }
        self.ready.notify_one();
    }

    /// Waits for the next event. Returns `None` once the buffer is closed.
    pub async fn pop(&self) -> Option<Event> {
        loop {
            if self.closed.is_cancelled() {
                return None;
            }
            if let Some(event) = self.queue.pop() {
                return Some(event);
            }
            tokio::select! {
                () = self.ready.notified() => {}
                () = self.closed.cancelled() => return None,
            }
        }
    }

    #[must_use]
    pub fn try_pop(&self) -> Option<Event> {
        self.queue.pop()
    }

    /// Wakes a waiting consumer; every later `pop` returns `None`.
    pub fn close(&self) {
        self.closed.cancel();
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.queue.capacity()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{Payload, ValueMetric};
    use proptest::prelude::*;
    use std::time::Duration;

    fn numbered(n: usize) -> Event {
        #[allow(clippy::cast_precision_loss)]
        let value = n as f64;
        Event::new(Payload::ValueMetric(ValueMetric {
            name: "seq".to_string(),
            value,
            unit: String::new(),
        }))
    }

    fn number_of(event: &Event) -> usize {
        match &event.payload {
            #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
            Payload::ValueMetric(metric) => metric.value as usize,
            other => panic!("unexpected payload {other:?}"),
        }
    }

    fn buffer(capacity: usize) -> (IngestBuffer, Arc<Counter>, Arc<Counter>) {
        let dropped = Arc::new(Counter::default());
        let total = Arc::new(Counter::default());
        let buffer = IngestBuffer::new(capacity, Arc::clone(&dropped), Arc::clone(&total));
        (buffer, dropped, total)
    }

    #[test]
    fn test_overwrites_oldest_when_full() {
        let (buffer, dropped, total) = buffer(3);
        for n in 0..5 {
            buffer.push(numbered(n));
        }

        assert_eq!(dropped.value(), 2);
        assert_eq!(total.value(), 2);
        let remaining: Vec<usize> = std::iter::from_fn(|| buffer.try_pop())
            .map(|e| number_of(&e))
            .collect();
        assert_eq!(remaining, vec![2, 3, 4]);
    }

    #[tokio::test]
    async fn test_pop_waits_for_push() {
        let (buffer, _, _) = buffer(4);
        let buffer = Arc::new(buffer);

        let consumer = {
            let buffer = Arc::clone(&buffer);
            tokio::spawn(async move { buffer.pop().await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        buffer.push(numbered(7));

        let event = consumer.await.expect("consumer panicked");
        assert_eq!(event.as_ref().map(number_of), Some(7));
    }

    #[tokio::test]
    async fn test_close_wakes_waiting_consumer() {
        let (buffer, _, _) = buffer(4);
        let buffer = Arc::new(buffer);

        let consumer = {
            let buffer = Arc::clone(&buffer);
            tokio::spawn(async move { buffer.pop().await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!buffer.is_closed());
        buffer.close();
        assert!(buffer.is_closed());

        assert!(consumer.await.expect("consumer panicked").is_none());
        buffer.push(numbered(1));
        assert!(buffer.pop().await.is_none());
    }

    proptest! {
        #[test]
        fn prop_dropped_plus_delivered_equals_pushed(capacity in 1usize..64, pushed in 0usize..256) {
            let (buffer, dropped, _) = buffer(capacity);
            for n in 0..pushed {
                buffer.push(numbered(n));
            }
            let delivered: Vec<usize> = std::iter::from_fn(|| buffer.try_pop())
                .map(|e| number_of(&e))
                .collect();

            let dropped = usize::try_from(dropped.value()).unwrap_or_default();
            prop_assert_eq!(dropped + delivered.len(), pushed);
            let expected: Vec<usize> = (pushed.saturating_sub(capacity)..pushed).collect();
            prop_assert_eq!(delivered, expected);
        }
    }
}
