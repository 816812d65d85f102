// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Downstream sink contract.
//!
//! A [`Sink`] is anything the bridge fans the stream out to. The bridge only
//! ever calls the methods below; reconnect logic, buffering and drop
//! policies stay inside each implementation.

use crate::stats::{SinkStats, SinkStatsSnapshot};
use crate::transport::TransportError;
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;

/// Errors returned by [`Sink::connect`].
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SinkError {
    #[error("Connect timed out after {0:?}")]
    Timeout(Duration),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Sink disconnected")]
    Disconnected,
}

impl From<TransportError> for SinkError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::HandshakeTimeout(after) => SinkError::Timeout(after),
            other => SinkError::Transport(other.to_string()),
        }
    }
}

/// Terminal, sink-local failure. Never fatal to the bridge.
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
pub enum SinkFailure {
    #[error("Gave up reconnecting after {attempts} attempts")]
    ReconnectExhausted { attempts: u32 },
}

/// A downstream consumer of the stream.
#[async_trait]
pub trait Sink: Send + Sync {
    /// Stable identifier used in logs and events.
    fn name(&self) -> &str;

    /// How long the bridge waits for [`Sink::connect`], `None` for the
    /// bridge default.
    fn connect_timeout(&self) -> Option<Duration> {
        None
    }

    /// Become ready to receive.
    async fn connect(&self) -> Result<(), SinkError>;

    /// Deliver one chunk. Must not block: queue or drop internally.
    fn receive(&self, chunk: Bytes);

    /// Release resources. Idempotent.
    fn disconnect(&self);

    /// Resolves once the sink has failed for good.
    ///
    /// Sinks that cannot fail on their own never resolve.
    async fn terminated(&self) -> SinkFailure {
        std::future::pending().await
    }

    /// Delivery counters, if the sink keeps any.
    fn stats(&self) -> Option<SinkStatsSnapshot> {
        None
    }
}

/// In-process sink forwarding every chunk to a channel.
#[derive(Debug)]
pub struct LocalSink {
    name: String,
    tx: mpsc::UnboundedSender<Bytes>,
    connected: AtomicBool,
    stats: Arc<SinkStats>,
}

impl LocalSink {
    /// Create the sink and the receiving half of its channel.
    pub fn new(name: impl Into<String>) -> (Self, mpsc::UnboundedReceiver<Bytes>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let sink = Self {
            name: name.into(),
            tx,
            connected: AtomicBool::new(false),
            stats: Arc::new(SinkStats::new()),
        };
        (sink, rx)
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl Sink for LocalSink {
    fn name(&self) -> &str {
        &self.name
    }

    async fn connect(&self) -> Result<(), SinkError> {
        if self.tx.is_closed() {
            return Err(SinkError::Disconnected);
        }
        self.connected.store(true, Ordering::Relaxed);
        Ok(())
    }

    fn receive(&self, chunk: Bytes) {
        if !self.is_connected() {
            self.stats.record_dropped();
            return;
        }

        let len = chunk.len() as u64;
        if self.tx.send(chunk).is_ok() {
            self.stats.record_forwarded(len);
        } else {
            self.stats.record_dropped();
        }
    }

    fn disconnect(&self) {
        self.connected.store(false, Ordering::Relaxed);
    }

    fn stats(&self) -> Option<SinkStatsSnapshot> {
        Some(self.stats.snapshot(&self.name))
    }
}
