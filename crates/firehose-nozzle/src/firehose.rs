// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Event source boundary.
//!
//! The platform client that authenticates against the event bus lives outside
//! this crate. Anything that can hand over a stream of events and a stream of
//! transport errors implements [`EventSource`].

use crate::event::Event;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

pub const CLOSE_NORMAL_CLOSURE: u16 = 1000;
pub const CLOSE_POLICY_VIOLATION: u16 = 1008;

const CHANNEL_CAPACITY: usize = 1024;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// The client gave up reconnecting. Nothing more will arrive.
    #[error("maximum number of retries reached")]
    MaxRetriesReached,

    #[error("connection closed with code {code}: {reason}")]
    Close { code: u16, reason: String },

    #[error("{0}")]
    Other(String),
}

impl TransportError {
    /// Counter label for this error.
    #[must_use]
    pub fn error_type(&self) -> &'static str {
        match self {
            TransportError::Close { code, .. } => match *code {
                CLOSE_NORMAL_CLOSURE => "close_normal_closure",
                CLOSE_POLICY_VIOLATION => "close_policy_violation",
                _ => "close_unknown",
            },
            TransportError::MaxRetriesReached | TransportError::Other(_) => "unknown",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("event source already disconnected")]
pub struct AlreadyDisconnected;

/// Tears down a connection. Only the first call succeeds.
#[derive(Debug, Clone, Default)]
pub struct Disconnect {
    token: CancellationToken,
    done: Arc<AtomicBool>,
}

impl Disconnect {
    pub fn disconnect(&self) -> Result<(), AlreadyDisconnected> {
        if self.done.swap(true, Ordering::AcqRel) {
            return Err(AlreadyDisconnected);
        }
        self.token.cancel();
        Ok(())
    }

    #[must_use]
    pub fn is_disconnected(&self) -> bool {
        self.done.load(Ordering::Acquire)
    }

    async fn disconnected(&self) {
        self.token.cancelled().await;
    }
}

/// Streams produced by a connected source.
///
/// `None` on the error stream is an empty error. Some clients emit them in
/// bulk; they carry no information.
#[derive(Debug)]
pub struct Connection {
    pub events: mpsc::Receiver<Event>,
    pub errors: mpsc::Receiver<Option<TransportError>>,
    pub disconnect: Disconnect,
}

impl Connection {
    #[must_use]
    pub fn new(
        events: mpsc::Receiver<Event>,
        errors: mpsc::Receiver<Option<TransportError>>,
    ) -> Self {
        Self {
            events,
            errors,
            disconnect: Disconnect::default(),
        }
    }

    /// A connection whose streams are already finished.
    #[must_use]
    pub fn closed() -> Self {
        let (_, events) = mpsc::channel(1);
        let (_, errors) = mpsc::channel(1);
        Self::new(events, errors)
    }
}

pub trait EventSource: Send {
    fn connect(&mut self) -> Connection;
}

/// Source fed by an external client through channels.
#[derive(Debug)]
pub struct ChannelSource {
    connection: Option<Connection>,
}

impl ChannelSource {
    #[must_use]
    pub fn new(
        events: mpsc::Receiver<Event>,
        errors: mpsc::Receiver<Option<TransportError>>,
    ) -> Self {
        Self {
            connection: Some(Connection::new(events, errors)),
        }
    }
}

impl EventSource for ChannelSource {
    fn connect(&mut self) -> Connection {
        self.connection.take().unwrap_or_else(|| {
            error!("channel source connected twice");
            Connection::closed()
        })
    }
}

/// Reads one JSON encoded [`Event`] per line.
///
/// Lines that do not parse are reported as transport errors and skipped. End
/// of input is reported as a normal closure.
pub struct JsonLinesSource<R> {
    reader: Option<R>,
}

impl<R> JsonLinesSource<R>
where
    R: AsyncBufRead + Unpin + Send + 'static,
{
    pub fn new(reader: R) -> Self {
        Self {
            reader: Some(reader),
        }
    }
}

impl<R> EventSource for JsonLinesSource<R>
where
    R: AsyncBufRead + Unpin + Send + 'static,
{
    fn connect(&mut self) -> Connection {
        let Some(reader) = self.reader.take() else {
            error!("json lines source connected twice");
            return Connection::closed();
        };
        let (events_tx, events) = mpsc::channel(CHANNEL_CAPACITY);
        let (errors_tx, errors) = mpsc::channel(CHANNEL_CAPACITY);
        let connection = Connection::new(events, errors);
        tokio::spawn(read_lines(
            reader,
            events_tx,
            errors_tx,
            connection.disconnect.clone(),
        ));
        connection
    }
}

async fn read_lines<R>(
    reader: R,
    events: mpsc::Sender<Event>,
    errors: mpsc::Sender<Option<TransportError>>,
    disconnect: Disconnect,
) where
    R: AsyncBufRead + Unpin,
{
    let mut lines = reader.lines();
    loop {
        let line = tokio::select! {
            () = disconnect.disconnected() => {
                debug!("json lines source disconnected");
                return;
            }
            line = lines.next_line() => line,
        };
        let report = match line {
            Ok(Some(line)) if line.trim().is_empty() => continue,
            Ok(Some(line)) => match serde_json::from_str::<Event>(&line) {
                Ok(event) => {
                    if events.send(event).await.is_err() {
                        debug!("event receiver dropped, stopping reader");
                        return;
                    }
                    continue;
                }
                Err(e) => {
                    warn!("skipping malformed event: {e}");
                    TransportError::Other(format!("malformed event: {e}"))
                }
            },
            Ok(None) => {
                let _ = errors
                    .send(Some(TransportError::Close {
                        code: CLOSE_NORMAL_CLOSURE,
                        reason: "end of input".to_string(),
                    }))
                    .await;
                return;
            }
            Err(e) => {
                let _ = errors
                    .send(Some(TransportError::Other(format!("read failed: {e}"))))
                    .await;
                return;
            }
        };
        if errors.send(Some(report)).await.is_err() {
            return;
        }
    }
}
