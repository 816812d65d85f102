// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Shared helpers for the integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use spectator_bridge::{BridgeEvent, Sink, SinkError, SinkFailure, UpstreamFeed};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};

pub fn ms(millis: u64) -> Duration {
    Duration::from_millis(millis)
}

/// Raw stream pieces: sizes table, game start, frames, game end.
pub fn message_sizes() -> Vec<u8> {
    vec![0x35, 10, 0x36, 0, 4, 0x38, 0, 2, 0x39, 0, 1]
}

pub fn game_start() -> Vec<u8> {
    vec![0x36, 1, 2, 3, 4]
}

pub fn frame(n: u8) -> Vec<u8> {
    vec![0x38, n, n]
}

pub fn game_end() -> Vec<u8> {
    vec![0x39, 0]
}

/// Wait until the bridge task has called `connect` on the upstream.
pub async fn wait_for_upstream(feed: &UpstreamFeed) {
    while feed.target().is_none() {
        tokio::task::yield_now().await;
    }
}

pub async fn next_event(events: &mut mpsc::UnboundedReceiver<BridgeEvent>) -> BridgeEvent {
    events.recv().await.expect("bridge event")
}

/// Drain events until the channel closes.
pub async fn remaining_events(
    events: &mut mpsc::UnboundedReceiver<BridgeEvent>,
) -> Vec<BridgeEvent> {
    let mut out = Vec::new();
    while let Some(event) = events.recv().await {
        out.push(event);
    }
    out
}

/// Sink whose connect takes a fixed time, recording what it is sent.
pub struct ScriptedSink {
    name: String,
    connect_delay: Duration,
    connect_timeout: Option<Duration>,
    tx: mpsc::UnboundedSender<Bytes>,
    connects: AtomicUsize,
    disconnects: AtomicUsize,
    failed: watch::Sender<bool>,
}

impl ScriptedSink {
    pub fn new(
        name: &str,
        connect_delay: Duration,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<Bytes>) {
        Self::build(name, connect_delay, None)
    }

    pub fn with_timeout(
        name: &str,
        connect_delay: Duration,
        timeout: Duration,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<Bytes>) {
        Self::build(name, connect_delay, Some(timeout))
    }

    fn build(
        name: &str,
        connect_delay: Duration,
        connect_timeout: Option<Duration>,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<Bytes>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let (failed, _) = watch::channel(false);
        let sink = Arc::new(Self {
            name: name.to_string(),
            connect_delay,
            connect_timeout,
            tx,
            connects: AtomicUsize::new(0),
            disconnects: AtomicUsize::new(0),
            failed,
        });
        (sink, rx)
    }

    /// Make `terminated` resolve.
    pub fn fail(&self) {
        self.failed.send_replace(true);
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn disconnects(&self) -> usize {
        self.disconnects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Sink for ScriptedSink {
    fn name(&self) -> &str {
        &self.name
    }

    fn connect_timeout(&self) -> Option<Duration> {
        self.connect_timeout
    }

    async fn connect(&self) -> Result<(), SinkError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.connect_delay).await;
        Ok(())
    }

    fn receive(&self, chunk: Bytes) {
        let _ = self.tx.send(chunk);
    }

    fn disconnect(&self) {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
    }

    async fn terminated(&self) -> SinkFailure {
        let mut failed = self.failed.subscribe();
        let fired = failed.wait_for(|failed| *failed).await.is_ok();
        if !fired {
            std::future::pending::<()>().await;
        }
        SinkFailure::ReconnectExhausted { attempts: 5 }
    }
}
