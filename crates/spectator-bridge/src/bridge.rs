// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Core bridge implementation.
//!
//! The Bridge owns the upstream connection and the sink registry. Its
//! lifecycle is a one-way state machine:
//!
//! ```text
//! Initialized -> Connecting -> Connected -> Disconnecting -> Disconnected
//! ```
//!
//! Chunks arriving before `Connected` are buffered and flushed to every sink
//! as a single concatenated chunk once all sinks are ready. Any upstream
//! failure or sink connect failure tears the whole bridge down; sink-level
//! reconnects are the sinks' own business.

use crate::config::BridgeConfig;
use crate::decoder::EventCategory;
use crate::sink::{Sink, SinkError, SinkFailure};
use crate::stats::SinkStatsSnapshot;
use crate::tracker::ReplayTracker;
use crate::upstream::{Upstream, UpstreamEvent, UpstreamSender, UpstreamStatus};
use bytes::{Bytes, BytesMut};
use futures::stream::{FuturesUnordered, StreamExt};
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

/// Bound for the upstream connection.
pub const UPSTREAM_CONNECT_TIMEOUT: Duration = Duration::from_millis(3000);

/// Bound for sinks that do not declare their own.
pub const DEFAULT_SINK_TIMEOUT: Duration = Duration::from_millis(3000);

/// Bridge errors.
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    #[error("Sink '{0}' already registered")]
    DuplicateSink(String),
}

/// Bridge lifecycle state. Never moves backward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum BridgeState {
    Initialized,
    Connecting,
    Connected,
    Disconnecting,
    Disconnected,
}

/// Why the bridge closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DisconnectReason {
    /// Upstream did not connect in time.
    UpstreamTimeout,
    /// Upstream connection lost or refused.
    UpstreamDisconnect,
    /// A sink failed to connect in time.
    SinkConnectTimeout,
    /// Explicit quit.
    Quit,
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason = match self {
            DisconnectReason::UpstreamTimeout => "upstream timeout",
            DisconnectReason::UpstreamDisconnect => "upstream disconnect",
            DisconnectReason::SinkConnectTimeout => "sink connect timeout",
            DisconnectReason::Quit => "quit",
        };
        f.write_str(reason)
    }
}

/// Lifecycle notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BridgeEvent {
    /// Upstream reported connected.
    UpstreamConnected,
    /// One sink finished connecting.
    SinkConnected(String),
    /// All sinks connected and the pre-connect buffer was flushed.
    Open,
    /// A sink gave up on its own. The bridge keeps running.
    SinkFailed { name: String, failure: SinkFailure },
    /// Bridge closed. Emitted exactly once, always last.
    Closed(DisconnectReason),
}

enum BridgeCommand {
    Quit,
}

/// Bridge under construction.
pub struct Bridge {
    name: String,
    upstream: Box<dyn Upstream>,
    sinks: Vec<Arc<dyn Sink>>,
    upstream_timeout: Duration,
    default_sink_timeout: Duration,
    events: mpsc::UnboundedSender<BridgeEvent>,
}

impl Bridge {
    /// Create a bridge over `upstream`, returning its event stream.
    pub fn new(upstream: Box<dyn Upstream>) -> (Self, mpsc::UnboundedReceiver<BridgeEvent>) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let bridge = Self {
            name: "spectator-bridge".to_string(),
            upstream,
            sinks: Vec::new(),
            upstream_timeout: UPSTREAM_CONNECT_TIMEOUT,
            default_sink_timeout: DEFAULT_SINK_TIMEOUT,
            events: events_tx,
        };
        (bridge, events_rx)
    }

    /// Create a bridge using the name and timeouts from `config`.
    ///
    /// Sinks are not created here; register them with
    /// [`Bridge::register_sink`].
    pub fn from_config(
        upstream: Box<dyn Upstream>,
        config: &BridgeConfig,
    ) -> Result<(Self, mpsc::UnboundedReceiver<BridgeEvent>), BridgeError> {
        config.validate()?;
        let (bridge, events) = Self::new(upstream);
        let bridge = bridge
            .with_name(config.name.clone())
            .with_upstream_timeout(config.upstream.connect_timeout())
            .with_default_sink_timeout(config.default_sink_timeout());
        Ok((bridge, events))
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_upstream_timeout(mut self, timeout: Duration) -> Self {
        self.upstream_timeout = timeout;
        self
    }

    pub fn with_default_sink_timeout(mut self, timeout: Duration) -> Self {
        self.default_sink_timeout = timeout;
        self
    }

    /// Bridge name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Add a sink. Names must be unique.
    pub fn register_sink(&mut self, sink: Arc<dyn Sink>) -> Result<(), BridgeError> {
        if self.sinks.iter().any(|s| s.name() == sink.name()) {
            return Err(BridgeError::DuplicateSink(sink.name().to_string()));
        }
        debug!("Bridge '{}': registered sink '{}'", self.name, sink.name());
        self.sinks.push(sink);
        Ok(())
    }

    /// Start connecting to the upstream at `address:port`.
    ///
    /// Consumes the bridge: the sink registry is fixed from here on.
    pub fn connect(self, address: impl Into<String>, port: u16) -> BridgeHandle {
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(BridgeState::Initialized);
        let (closed_tx, closed_rx) = watch::channel(None);
        let (upstream_tx, upstream_rx) = mpsc::unbounded_channel();
        let tracker = Arc::new(Mutex::new(ReplayTracker::new()));

        let handle = BridgeHandle {
            commands: commands_tx,
            state: state_rx,
            closed: closed_rx,
            tracker: tracker.clone(),
            sinks: self.sinks.clone(),
        };

        let runner = BridgeRunner {
            name: self.name,
            upstream: self.upstream,
            sinks: self.sinks,
            upstream_timeout: self.upstream_timeout,
            default_sink_timeout: self.default_sink_timeout,
            events: self.events,
            commands: commands_rx,
            upstream_rx,
            state: BridgeState::Initialized,
            state_tx,
            closed_tx,
            tracker,
            buffer: Vec::new(),
        };
        tokio::spawn(runner.run(address.into(), port, upstream_tx));

        handle
    }
}

/// Handle to control a running bridge.
///
/// Dropping every handle quits the bridge.
#[derive(Clone)]
pub struct BridgeHandle {
    commands: mpsc::UnboundedSender<BridgeCommand>,
    state: watch::Receiver<BridgeState>,
    closed: watch::Receiver<Option<DisconnectReason>>,
    tracker: Arc<Mutex<ReplayTracker>>,
    sinks: Vec<Arc<dyn Sink>>,
}

impl BridgeHandle {
    /// Request shutdown. Idempotent.
    pub fn quit(&self) {
        let _ = self.commands.send(BridgeCommand::Quit);
    }

    /// Current lifecycle state.
    pub fn state(&self) -> BridgeState {
        *self.state.borrow()
    }

    /// Wait until the bridge has closed and return why.
    ///
    /// `None` only if the bridge task was lost without closing.
    pub async fn wait_closed(&self) -> Option<DisconnectReason> {
        let mut closed = self.closed.clone();
        let reason = closed.wait_for(Option::is_some).await.ok().and_then(|r| *r);
        reason
    }

    /// Replay payload of the stream seen so far.
    pub fn replay_payload(&self) -> Option<Bytes> {
        self.tracker.lock().replay_payload()
    }

    /// True while the upstream is inside a session.
    pub fn in_session(&self) -> bool {
        self.tracker.lock().session().in_session()
    }

    /// Statistics of every sink that keeps them.
    pub fn sink_stats(&self) -> Vec<SinkStatsSnapshot> {
        self.sinks.iter().filter_map(|sink| sink.stats()).collect()
    }
}

struct BridgeRunner {
    name: String,
    upstream: Box<dyn Upstream>,
    sinks: Vec<Arc<dyn Sink>>,
    upstream_timeout: Duration,
    default_sink_timeout: Duration,
    events: mpsc::UnboundedSender<BridgeEvent>,
    commands: mpsc::UnboundedReceiver<BridgeCommand>,
    upstream_rx: mpsc::UnboundedReceiver<UpstreamEvent>,
    state: BridgeState,
    state_tx: watch::Sender<BridgeState>,
    closed_tx: watch::Sender<Option<DisconnectReason>>,
    tracker: Arc<Mutex<ReplayTracker>>,
    buffer: Vec<Bytes>,
}

/// Outcome of one upstream notification.
enum UpstreamStep {
    Continue,
    Connected,
    Lost,
}

impl BridgeRunner {
    async fn run(mut self, address: String, port: u16, upstream_tx: UpstreamSender) {
        self.set_state(BridgeState::Connecting);
        info!(
            "Bridge '{}' connecting to upstream {}:{} ({} sinks)",
            self.name,
            address,
            port,
            self.sinks.len()
        );

        let reason = match self.upstream.connect(&address, port, upstream_tx) {
            Ok(()) => self.drive().await,
            Err(e) => {
                warn!("Bridge '{}': upstream connect failed: {}", self.name, e);
                DisconnectReason::UpstreamDisconnect
            }
        };

        self.disconnect(reason);
    }

    async fn drive(&mut self) -> DisconnectReason {
        if let Err(reason) = self.await_upstream().await {
            return reason;
        }
        let _ = self.events.send(BridgeEvent::UpstreamConnected);

        if let Err(reason) = self.connect_sinks().await {
            return reason;
        }
        self.open();

        self.forward().await
    }

    fn set_state(&mut self, state: BridgeState) {
        debug_assert!(state >= self.state);
        self.state = state;
        self.state_tx.send_replace(state);
    }

    fn on_upstream(&mut self, event: Option<UpstreamEvent>) -> UpstreamStep {
        match event {
            Some(UpstreamEvent::Data(chunk)) => {
                self.on_data(chunk);
                UpstreamStep::Continue
            }
            Some(UpstreamEvent::Status(UpstreamStatus::Connected)) => UpstreamStep::Connected,
            Some(UpstreamEvent::Status(UpstreamStatus::Disconnected)) | None => UpstreamStep::Lost,
            Some(UpstreamEvent::Status(_)) => UpstreamStep::Continue,
        }
    }

    fn on_data(&mut self, chunk: Bytes) {
        self.track(&chunk);

        if self.state == BridgeState::Connected {
            for sink in &self.sinks {
                sink.receive(chunk.clone());
            }
        } else {
            self.buffer.push(chunk);
        }
    }

    fn track(&self, chunk: &[u8]) {
        let boundaries = self.tracker.lock().write(chunk);
        for category in boundaries {
            match category {
                EventCategory::StreamMetadata => {
                    debug!("Bridge '{}': stream metadata received", self.name)
                }
                EventCategory::SessionStart => info!("Bridge '{}': session started", self.name),
                EventCategory::SessionEnd => info!("Bridge '{}': session ended", self.name),
                EventCategory::Other => {}
            }
        }
    }

    async fn await_upstream(&mut self) -> Result<(), DisconnectReason> {
        let deadline = tokio::time::sleep(self.upstream_timeout);
        tokio::pin!(deadline);

        loop {
            tokio::select! {
                _ = &mut deadline => {
                    warn!(
                        "Bridge '{}': upstream did not connect within {:?}",
                        self.name, self.upstream_timeout
                    );
                    return Err(DisconnectReason::UpstreamTimeout);
                }
                _ = self.commands.recv() => return Err(DisconnectReason::Quit),
                event = self.upstream_rx.recv() => match self.on_upstream(event) {
                    UpstreamStep::Continue => {}
                    UpstreamStep::Connected => {
                        info!("Bridge '{}': upstream connected", self.name);
                        return Ok(());
                    }
                    UpstreamStep::Lost => return Err(DisconnectReason::UpstreamDisconnect),
                },
            }
        }
    }

    async fn connect_sinks(&mut self) -> Result<(), DisconnectReason> {
        let default_timeout = self.default_sink_timeout;
        let mut pending: FuturesUnordered<_> = self
            .sinks
            .iter()
            .cloned()
            .map(|sink| async move {
                let bound = sink.connect_timeout().unwrap_or(default_timeout);
                let result = match tokio::time::timeout(bound, sink.connect()).await {
                    Ok(result) => result,
                    Err(_) => Err(SinkError::Timeout(bound)),
                };
                (sink, result)
            })
            .collect();

        while !pending.is_empty() {
            tokio::select! {
                Some((sink, result)) = pending.next() => match result {
                    Ok(()) => {
                        info!("Bridge '{}': sink '{}' connected", self.name, sink.name());
                        let _ = self
                            .events
                            .send(BridgeEvent::SinkConnected(sink.name().to_string()));
                    }
                    Err(e) => {
                        warn!(
                            "Bridge '{}': sink '{}' failed to connect: {}",
                            self.name,
                            sink.name(),
                            e
                        );
                        return Err(DisconnectReason::SinkConnectTimeout);
                    }
                },
                _ = self.commands.recv() => return Err(DisconnectReason::Quit),
                event = self.upstream_rx.recv() => match self.on_upstream(event) {
                    UpstreamStep::Continue | UpstreamStep::Connected => {}
                    UpstreamStep::Lost => return Err(DisconnectReason::UpstreamDisconnect),
                },
            }
        }

        Ok(())
    }

    fn open(&mut self) {
        self.set_state(BridgeState::Connected);

        if !self.buffer.is_empty() {
            let total = self.buffer.iter().map(Bytes::len).sum();
            let mut flush = BytesMut::with_capacity(total);
            for chunk in self.buffer.drain(..) {
                flush.extend_from_slice(&chunk);
            }
            let flush = flush.freeze();

            debug!(
                "Bridge '{}': flushing {} buffered bytes",
                self.name,
                flush.len()
            );
            for sink in &self.sinks {
                sink.receive(flush.clone());
            }
        }

        info!("Bridge '{}' open", self.name);
        let _ = self.events.send(BridgeEvent::Open);
    }

    async fn forward(&mut self) -> DisconnectReason {
        let mut failures: FuturesUnordered<_> = self
            .sinks
            .iter()
            .cloned()
            .map(|sink| async move {
                let failure = sink.terminated().await;
                (sink, failure)
            })
            .collect();

        loop {
            tokio::select! {
                _ = self.commands.recv() => return DisconnectReason::Quit,
                event = self.upstream_rx.recv() => match self.on_upstream(event) {
                    UpstreamStep::Continue | UpstreamStep::Connected => {}
                    UpstreamStep::Lost => {
                        warn!("Bridge '{}': upstream disconnected", self.name);
                        return DisconnectReason::UpstreamDisconnect;
                    }
                },
                Some((sink, failure)) = failures.next(), if !failures.is_empty() => {
                    warn!("Bridge '{}': sink '{}' failed: {}", self.name, sink.name(), failure);
                    let _ = self.events.send(BridgeEvent::SinkFailed {
                        name: sink.name().to_string(),
                        failure,
                    });
                }
            }
        }
    }

    fn disconnect(&mut self, reason: DisconnectReason) {
        if self.state >= BridgeState::Disconnecting {
            return;
        }

        self.set_state(BridgeState::Disconnecting);
        info!("Bridge '{}' disconnecting: {}", self.name, reason);

        self.upstream.disconnect();
        for sink in &self.sinks {
            sink.disconnect();
        }
        self.buffer.clear();

        self.set_state(BridgeState::Disconnected);
        self.closed_tx.send_replace(Some(reason));
        let _ = self.events.send(BridgeEvent::Closed(reason));
    }
}
