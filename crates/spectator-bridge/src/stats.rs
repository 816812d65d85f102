// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Per-sink delivery statistics.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Counters updated on a sink's delivery path.
#[derive(Debug)]
pub struct SinkStats {
    /// Chunks handed to the downstream transport.
    pub chunks_forwarded: AtomicU64,

    /// Bytes handed to the downstream transport.
    pub bytes_forwarded: AtomicU64,

    /// Chunks dropped while the sink was not connected.
    pub chunks_dropped: AtomicU64,

    /// Session replay payloads sent after a handshake.
    pub replays_sent: AtomicU64,

    /// Successful reconnects (first connect excluded).
    pub reconnects: AtomicU64,

    /// Creation time.
    pub created: Instant,
}

impl Default for SinkStats {
    fn default() -> Self {
        Self::new()
    }
}

impl SinkStats {
    /// Create zeroed stats.
    pub fn new() -> Self {
        Self {
            chunks_forwarded: AtomicU64::new(0),
            bytes_forwarded: AtomicU64::new(0),
            chunks_dropped: AtomicU64::new(0),
            replays_sent: AtomicU64::new(0),
            reconnects: AtomicU64::new(0),
            created: Instant::now(),
        }
    }

    pub fn record_forwarded(&self, bytes: u64) {
        self.chunks_forwarded.fetch_add(1, Ordering::Relaxed);
        self.bytes_forwarded.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn record_dropped(&self) {
        self.chunks_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_replay(&self) {
        self.replays_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_reconnect(&self) {
        self.reconnects.fetch_add(1, Ordering::Relaxed);
    }

    /// Get snapshot of current stats.
    pub fn snapshot(&self, name: &str) -> SinkStatsSnapshot {
        SinkStatsSnapshot {
            name: name.to_string(),
            chunks_forwarded: self.chunks_forwarded.load(Ordering::Relaxed),
            bytes_forwarded: self.bytes_forwarded.load(Ordering::Relaxed),
            chunks_dropped: self.chunks_dropped.load(Ordering::Relaxed),
            replays_sent: self.replays_sent.load(Ordering::Relaxed),
            reconnects: self.reconnects.load(Ordering::Relaxed),
            uptime_secs: self.created.elapsed().as_secs(),
        }
    }
}

/// Snapshot of sink statistics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SinkStatsSnapshot {
    pub name: String,
    pub chunks_forwarded: u64,
    pub bytes_forwarded: u64,
    pub chunks_dropped: u64,
    pub replays_sent: u64,
    pub reconnects: u64,
    pub uptime_secs: u64,
}

impl SinkStatsSnapshot {
    /// Calculate bytes per second.
    pub fn bytes_per_second(&self) -> f64 {
        if self.uptime_secs > 0 {
            self.bytes_forwarded as f64 / self.uptime_secs as f64
        } else {
            0.0
        }
    }
}
