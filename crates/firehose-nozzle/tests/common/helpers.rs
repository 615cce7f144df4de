// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Helper functions for integration tests

use firehose_nozzle::event::{
    ContainerMetric, CounterEvent, Event, LogMessage, MessageType, Payload, ValueMetric,
};
use std::time::Duration;

/// Polls `condition` until it holds or two seconds pass.
pub async fn eventually<F>(mut condition: F) -> bool
where
    F: FnMut() -> bool,
{
    for _ in 0..200 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}

fn envelope(payload: Payload, origin: &str, seconds: i64) -> Event {
    let mut event = Event::new(payload);
    event.origin = Some(origin.to_string());
    event.deployment = Some("cf".to_string());
    event.job = Some("diego_cell".to_string());
    event.index = Some("0".to_string());
    event.timestamp = Some(seconds * 1_000_000_000);
    event
}

pub fn log_message(app_id: &str, message: &str) -> Event {
    envelope(
        Payload::LogMessage(LogMessage {
            message: message.to_string(),
            message_type: MessageType::Out,
            app_id: Some(app_id.to_string()),
            source_type: Some("APP/PROC/WEB".to_string()),
            source_instance: Some("0".to_string()),
        }),
        "rep",
        1,
    )
}

pub fn container_metric(app_id: &str) -> Event {
    envelope(
        Payload::ContainerMetric(ContainerMetric {
            application_id: app_id.to_string(),
            instance_index: 2,
            cpu_percentage: 12.5,
            memory_bytes: 1024,
            ..Default::default()
        }),
        "rep",
        1,
    )
}

pub fn value_metric(name: &str, unit: &str, value: f64) -> Event {
    envelope(
        Payload::ValueMetric(ValueMetric {
            name: name.to_string(),
            value,
            unit: unit.to_string(),
        }),
        "gorouter",
        1,
    )
}

pub fn counter_event(total: u64, seconds: i64) -> Event {
    envelope(
        Payload::CounterEvent(CounterEvent {
            name: "requests".to_string(),
            delta: 0,
            total,
        }),
        "gorouter",
        seconds,
    )
}
