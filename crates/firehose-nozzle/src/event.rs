// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Platform firehose events.
//!
//! An [`Event`] carries the envelope fields shared by every event kind plus a
//! kind-specific [`Payload`]. Events are built by the event source, handed to
//! the nozzle exactly once and never mutated afterwards.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use uuid::Uuid;

/// The closed set of event kinds the nozzle understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    LogMessage,
    HttpStartStop,
    Error,
    ValueMetric,
    ContainerMetric,
    CounterEvent,
}

impl EventKind {
    pub const ALL: [EventKind; 6] = [
        EventKind::LogMessage,
        EventKind::HttpStartStop,
        EventKind::Error,
        EventKind::ValueMetric,
        EventKind::ContainerMetric,
        EventKind::CounterEvent,
    ];

    /// Metric kinds go to the metric sink, everything else is a log.
    #[must_use]
    pub const fn is_metric(self) -> bool {
        matches!(
            self,
            EventKind::ValueMetric | EventKind::ContainerMetric | EventKind::CounterEvent
        )
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            EventKind::LogMessage => "LogMessage",
            EventKind::HttpStartStop => "HttpStartStop",
            EventKind::Error => "Error",
            EventKind::ValueMetric => "ValueMetric",
            EventKind::ContainerMetric => "ContainerMetric",
            EventKind::CounterEvent => "CounterEvent",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageType {
    Out,
    Err,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogMessage {
    pub message: String,
    pub message_type: MessageType,
    #[serde(default)]
    pub app_id: Option<String>,
    #[serde(default)]
    pub source_type: Option<String>,
    #[serde(default)]
    pub source_instance: Option<String>,
}

/// 128-bit UUID as it travels on the wire: two little-endian halves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireUuid {
    pub low: u64,
    pub high: u64,
}

impl WireUuid {
    #[must_use]
    pub fn to_uuid(self) -> Uuid {
        let mut bytes = [0u8; 16];
        bytes[..8].copy_from_slice(&self.low.to_le_bytes());
        bytes[8..].copy_from_slice(&self.high.to_le_bytes());
        Uuid::from_bytes(bytes)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HttpStartStop {
    pub start_timestamp: i64,
    pub stop_timestamp: i64,
    #[serde(default)]
    pub method: Option<String>,
    #[serde(default)]
    pub uri: Option<String>,
    #[serde(default)]
    pub status_code: Option<i32>,
    #[serde(default)]
    pub content_length: Option<i64>,
    #[serde(default)]
    pub application_id: Option<WireUuid>,
    #[serde(default)]
    pub instance_index: Option<i32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorEvent {
    pub source: String,
    pub code: i32,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValueMetric {
    pub name: String,
    pub value: f64,
    #[serde(default)]
    pub unit: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContainerMetric {
    #[serde(default)]
    pub application_id: String,
    #[serde(default)]
    pub instance_index: i32,
    #[serde(default)]
    pub cpu_percentage: f64,
    #[serde(default)]
    pub memory_bytes: u64,
    #[serde(default)]
    pub disk_bytes: u64,
    #[serde(default)]
    pub memory_bytes_quota: u64,
    #[serde(default)]
    pub disk_bytes_quota: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CounterEvent {
    pub name: String,
    #[serde(default)]
    pub delta: u64,
    pub total: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Payload {
    LogMessage(LogMessage),
    HttpStartStop(HttpStartStop),
    Error(ErrorEvent),
    ValueMetric(ValueMetric),
    ContainerMetric(ContainerMetric),
    CounterEvent(CounterEvent),
}

/// A single firehose event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deployment: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,
    /// Nanoseconds since the Unix epoch.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,
    pub payload: Payload,
}

impl Event {
    /// Builds an event with no envelope fields set.
    #[must_use]
    pub fn new(payload: Payload) -> Self {
        Event {
            origin: None,
            deployment: None,
            job: None,
            index: None,
            ip: None,
            timestamp: None,
            payload,
        }
    }

    #[must_use]
    pub fn kind(&self) -> EventKind {
        match self.payload {
            Payload::LogMessage(_) => EventKind::LogMessage,
            Payload::HttpStartStop(_) => EventKind::HttpStartStop,
            Payload::Error(_) => EventKind::Error,
            Payload::ValueMetric(_) => EventKind::ValueMetric,
            Payload::ContainerMetric(_) => EventKind::ContainerMetric,
            Payload::CounterEvent(_) => EventKind::CounterEvent,
        }
    }

    /// Event time; a missing or negative timestamp maps to the epoch.
    #[must_use]
    pub fn event_time(&self) -> SystemTime {
        let nanos = self.timestamp.unwrap_or_default().max(0);
        #[allow(clippy::cast_sign_loss)]
        let nanos = nanos as u64;
        UNIX_EPOCH + Duration::from_nanos(nanos)
    }

    /// Application id for the kinds that can carry one. Empty ids are `None`.
    #[must_use]
    pub fn application_id(&self) -> Option<String> {
        let id = match &self.payload {
            Payload::HttpStartStop(http) => {
                http.application_id.map(|id| id.to_uuid().to_string())
            }
            Payload::LogMessage(log) => log.app_id.clone(),
            Payload::ContainerMetric(container) => Some(container.application_id.clone()),
            Payload::Error(_)
            | Payload::ValueMetric(_)
            | Payload::CounterEvent(_) => None,
        };
        id.filter(|id| !id.is_empty())
    }
}
