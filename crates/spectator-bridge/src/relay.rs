// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Reconnecting relay sink.
//!
//! A [`RelaySink`] owns one downstream link at a time. The link is served by a
//! worker task that:
//!
//! - opens the transport, appending the held reconnect token to the URL,
//! - waits for the handshake (first text message, JSON [`RelayHandshake`]),
//! - replays the current session prefix, then forwards live chunks,
//! - on an unrequested drop, retries with [`ReconnectPolicy`] backoff until
//!   the attempt ceiling is reached.
//!
//! Chunks received while no link is up still update the session tracker and
//! are counted as dropped.

use crate::backoff::ReconnectPolicy;
use crate::config::{ConfigError, RelaySinkConfig};
use crate::sink::{Sink, SinkError, SinkFailure};
use crate::stats::{SinkStats, SinkStatsSnapshot};
use crate::tracker::ReplayTracker;
use crate::transport::{LinkEvent, RelayConnector, RelayLink, TransportError};
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::Sleep;
use tracing::{debug, info, warn};
use url::Url;

/// Default bound for opening a relay link and completing its handshake.
pub const RELAY_CONNECT_TIMEOUT: Duration = Duration::from_millis(8000);

/// Query parameter carrying the reconnect token.
pub const RECONNECT_TOKEN_PARAM: &str = "reconnect_token";

/// First message sent by the relay on every new link.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayHandshake {
    pub bridge_id: String,
    pub reconnect_token: String,
}

/// Observable connection status of a relay sink.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayStatus {
    /// Never connected, or the last explicit connect failed.
    Idle,
    Connecting,
    Connected { bridge_id: String },
    /// Waiting before reconnect attempt `attempt` (1-based).
    Reconnecting { attempt: u32 },
    /// Attempt ceiling reached; stays here until `connect` is called again.
    Exhausted,
    /// Disconnected on request. Final.
    Disconnected,
}

/// Per-sink reconnect bookkeeping.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconnectState {
    /// Consecutive failed or pending attempts since the last handshake.
    pub attempt: u32,
    /// Token from the last handshake.
    pub token: Option<String>,
    /// Set by a local disconnect; suppresses reconnection.
    pub disconnect_requested: bool,
}

impl ReconnectState {
    /// Record a completed handshake. Returns true if it resumed an earlier
    /// session.
    pub fn on_handshake(&mut self, token: String) -> bool {
        let resumed = self.token.is_some();
        self.token = Some(token);
        self.attempt = 0;
        resumed
    }
}

/// Endpoint URL for the next attempt.
pub fn relay_url(base: &Url, token: Option<&str>) -> Url {
    let mut url = base.clone();
    if let Some(token) = token {
        url.query_pairs_mut().append_pair(RECONNECT_TOKEN_PARAM, token);
    }
    url
}

type ConnectReply = oneshot::Sender<Result<(), SinkError>>;

enum RelayCommand {
    Connect(ConnectReply),
    Chunk(Bytes),
    Disconnect,
}

/// Sink forwarding the stream to a remote relay.
pub struct RelaySink {
    name: String,
    connect_timeout: Duration,
    max_attempts: u32,
    commands: mpsc::UnboundedSender<RelayCommand>,
    status: watch::Receiver<RelayStatus>,
    stats: Arc<SinkStats>,
    worker: Mutex<Option<RelayWorker>>,
}

impl std::fmt::Debug for RelaySink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelaySink")
            .field("name", &self.name)
            .field("status", &*self.status.borrow())
            .finish_non_exhaustive()
    }
}

impl RelaySink {
    /// Create a relay sink for `url` with default timeout and policy.
    ///
    /// The worker starts on the first [`Sink::connect`].
    pub fn new(name: impl Into<String>, url: Url, connector: Arc<dyn RelayConnector>) -> Self {
        let name = name.into();
        let policy = ReconnectPolicy::default();
        let max_attempts = policy.max_attempts;
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (status_tx, status_rx) = watch::channel(RelayStatus::Idle);
        let stats = Arc::new(SinkStats::new());

        let worker = RelayWorker {
            name: name.clone(),
            url,
            connect_timeout: RELAY_CONNECT_TIMEOUT,
            policy,
            max_attempts,
            connector,
            commands: commands_rx,
            status: status_tx,
            stats: stats.clone(),
            tracker: ReplayTracker::new(),
            state: ReconnectState::default(),
            link: None,
        };

        Self {
            name,
            connect_timeout: RELAY_CONNECT_TIMEOUT,
            max_attempts,
            commands: commands_tx,
            status: status_rx,
            stats,
            worker: Mutex::new(Some(worker)),
        }
    }

    /// Create a relay sink from its configuration.
    pub fn from_config(
        config: &RelaySinkConfig,
        connector: Arc<dyn RelayConnector>,
    ) -> Result<Self, ConfigError> {
        let url = config.parsed_url()?;
        Ok(Self::new(config.name.clone(), url, connector)
            .with_connect_timeout(config.connect_timeout())
            .with_policy(config.reconnect.clone()))
    }

    /// Set the open + handshake bound.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        if let Some(worker) = self.worker.get_mut() {
            worker.connect_timeout = timeout;
        }
        self
    }

    /// Set the reconnect policy.
    pub fn with_policy(mut self, policy: ReconnectPolicy) -> Self {
        self.max_attempts = policy.max_attempts;
        if let Some(worker) = self.worker.get_mut() {
            worker.max_attempts = policy.max_attempts;
            worker.policy = policy;
        }
        self
    }

    /// Status updates.
    pub fn status(&self) -> watch::Receiver<RelayStatus> {
        self.status.clone()
    }

    fn start_worker(&self) {
        if let Some(worker) = self.worker.lock().take() {
            tokio::spawn(worker.run());
        }
    }
}

#[async_trait]
impl Sink for RelaySink {
    fn name(&self) -> &str {
        &self.name
    }

    fn connect_timeout(&self) -> Option<Duration> {
        Some(self.connect_timeout)
    }

    async fn connect(&self) -> Result<(), SinkError> {
        self.start_worker();

        let (reply_tx, reply_rx) = oneshot::channel();
        self.commands
            .send(RelayCommand::Connect(reply_tx))
            .map_err(|_| SinkError::Disconnected)?;
        reply_rx.await.unwrap_or(Err(SinkError::Disconnected))
    }

    fn receive(&self, chunk: Bytes) {
        if self.commands.send(RelayCommand::Chunk(chunk)).is_err() {
            self.stats.record_dropped();
        }
    }

    fn disconnect(&self) {
        // Never started: nothing to tear down but the status.
        if let Some(worker) = self.worker.lock().take() {
            worker.status.send_replace(RelayStatus::Disconnected);
        }
        let _ = self.commands.send(RelayCommand::Disconnect);
    }

    async fn terminated(&self) -> SinkFailure {
        let mut status = self.status.clone();
        loop {
            let exhausted = matches!(*status.borrow_and_update(), RelayStatus::Exhausted);
            if exhausted {
                return SinkFailure::ReconnectExhausted {
                    attempts: self.max_attempts,
                };
            }
            if status.changed().await.is_err() {
                return std::future::pending().await;
            }
        }
    }

    fn stats(&self) -> Option<SinkStatsSnapshot> {
        Some(self.stats.snapshot(&self.name))
    }
}

/// Open a link and wait for the handshake, bounded by `timeout`.
async fn handshake(
    connector: Arc<dyn RelayConnector>,
    url: Url,
    timeout: Duration,
) -> Result<(RelayLink, RelayHandshake), TransportError> {
    let attempt = async {
        let mut link = connector.open(&url).await?;
        match link.next_event().await {
            LinkEvent::Text(text) => {
                let handshake: RelayHandshake = serde_json::from_str(&text)?;
                Ok::<_, TransportError>((link, handshake))
            }
            LinkEvent::Binary(data) => Err(TransportError::UnexpectedFrame(format!(
                "{} binary bytes",
                data.len()
            ))),
            LinkEvent::Closed => Err(TransportError::ClosedBeforeHandshake),
            LinkEvent::Error(e) => Err(TransportError::Link(e)),
        }
    };

    tokio::time::timeout(timeout, attempt)
        .await
        .map_err(|_| TransportError::HandshakeTimeout(timeout))?
}

async fn next_link_event(link: &mut Option<RelayLink>) -> LinkEvent {
    match link {
        Some(link) => link.next_event().await,
        None => std::future::pending().await,
    }
}

async fn retry_elapsed(retry: &mut Option<Pin<Box<Sleep>>>) {
    match retry {
        Some(sleep) => sleep.as_mut().await,
        None => std::future::pending().await,
    }
}

struct RelayWorker {
    name: String,
    url: Url,
    connect_timeout: Duration,
    policy: ReconnectPolicy,
    max_attempts: u32,
    connector: Arc<dyn RelayConnector>,
    commands: mpsc::UnboundedReceiver<RelayCommand>,
    status: watch::Sender<RelayStatus>,
    stats: Arc<SinkStats>,
    tracker: ReplayTracker,
    state: ReconnectState,
    link: Option<RelayLink>,
}

impl RelayWorker {
    async fn run(mut self) {
        let mut retry: Option<Pin<Box<Sleep>>> = None;

        loop {
            tokio::select! {
                cmd = self.commands.recv() => match cmd {
                    Some(RelayCommand::Chunk(chunk)) => self.forward(chunk),
                    Some(RelayCommand::Connect(reply)) => {
                        if self.link.is_some() {
                            let _ = reply.send(Ok(()));
                            continue;
                        }

                        let resuming = retry.take().is_some();
                        self.status.send_replace(RelayStatus::Connecting);
                        if let Err(e) = self.establish(vec![reply]).await {
                            if self.state.disconnect_requested {
                                break;
                            }
                            warn!("[{}] Relay connect failed: {}", self.name, e);
                            if resuming {
                                retry = self.schedule_retry();
                            } else {
                                self.status.send_replace(RelayStatus::Idle);
                            }
                        }
                    }
                    Some(RelayCommand::Disconnect) | None => break,
                },
                event = next_link_event(&mut self.link), if self.link.is_some() => match event {
                    LinkEvent::Closed => {
                        warn!("[{}] Relay link closed by remote", self.name);
                        self.link = None;
                        retry = self.schedule_retry();
                    }
                    LinkEvent::Error(e) => {
                        warn!("[{}] Relay link error: {}", self.name, e);
                        self.link = None;
                        retry = self.schedule_retry();
                    }
                    LinkEvent::Text(text) => {
                        debug!(
                            "[{}] Ignoring relay text message ({} bytes)",
                            self.name,
                            text.len()
                        );
                    }
                    LinkEvent::Binary(data) => {
                        debug!(
                            "[{}] Ignoring relay binary message ({} bytes)",
                            self.name,
                            data.len()
                        );
                    }
                },
                _ = retry_elapsed(&mut retry), if retry.is_some() => {
                    retry = None;
                    self.state.attempt += 1;
                    info!(
                        "[{}] Reconnect attempt {}/{}",
                        self.name, self.state.attempt, self.max_attempts
                    );
                    if let Err(e) = self.establish(Vec::new()).await {
                        if self.state.disconnect_requested {
                            break;
                        }
                        warn!(
                            "[{}] Reconnect attempt {} failed: {}",
                            self.name, self.state.attempt, e
                        );
                        retry = self.schedule_retry();
                    }
                }
            }
        }

        self.shutdown();
    }

    fn forward(&mut self, chunk: Bytes) {
        self.tracker.write(&chunk);

        let len = chunk.len() as u64;
        match &self.link {
            Some(link) if link.send(chunk) => self.stats.record_forwarded(len),
            _ => self.stats.record_dropped(),
        }
    }

    /// One open + handshake. Chunks keep flowing into the tracker meanwhile;
    /// every `waiters` entry (plus connects arriving meanwhile) gets the
    /// outcome.
    async fn establish(&mut self, mut waiters: Vec<ConnectReply>) -> Result<(), SinkError> {
        let url = relay_url(&self.url, self.state.token.as_deref());
        let attempt = handshake(self.connector.clone(), url, self.connect_timeout);
        tokio::pin!(attempt);

        let outcome = loop {
            tokio::select! {
                result = &mut attempt => break result.map_err(SinkError::from),
                cmd = self.commands.recv() => match cmd {
                    Some(RelayCommand::Chunk(chunk)) => self.forward(chunk),
                    Some(RelayCommand::Connect(reply)) => waiters.push(reply),
                    Some(RelayCommand::Disconnect) | None => {
                        self.state.disconnect_requested = true;
                        break Err(SinkError::Disconnected);
                    }
                },
            }
        };

        let result = match outcome {
            Ok((link, handshake)) => {
                self.on_connected(link, handshake);
                Ok(())
            }
            Err(e) => Err(e),
        };

        for waiter in waiters {
            let _ = waiter.send(result.clone());
        }
        result
    }

    fn on_connected(&mut self, link: RelayLink, handshake: RelayHandshake) {
        if self.state.on_handshake(handshake.reconnect_token) {
            self.stats.record_reconnect();
        }

        if let Some(payload) = self.tracker.replay_payload() {
            let len = payload.len();
            if link.send(payload) {
                self.stats.record_replay();
                debug!("[{}] Replayed {} bytes of session state", self.name, len);
            }
        }

        info!(
            "[{}] Relay connected (bridge {})",
            self.name, handshake.bridge_id
        );
        self.link = Some(link);
        self.status.send_replace(RelayStatus::Connected {
            bridge_id: handshake.bridge_id,
        });
    }

    fn schedule_retry(&mut self) -> Option<Pin<Box<Sleep>>> {
        if self.state.disconnect_requested {
            return None;
        }

        if self.policy.exhausted(self.state.attempt) {
            warn!(
                "[{}] Giving up after {} reconnect attempts",
                self.name, self.state.attempt
            );
            self.status.send_replace(RelayStatus::Exhausted);
            return None;
        }

        let delay = self.policy.delay(self.state.attempt);
        let next = self.state.attempt + 1;
        debug!("[{}] Reconnect attempt {} in {:?}", self.name, next, delay);
        self.status
            .send_replace(RelayStatus::Reconnecting { attempt: next });
        Some(Box::pin(tokio::time::sleep(delay)))
    }

    fn shutdown(&mut self) {
        self.state.disconnect_requested = true;
        if let Some(mut link) = self.link.take() {
            link.close();
        }
        self.status.send_replace(RelayStatus::Disconnected);
        info!("[{}] Relay sink disconnected", self.name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoder::fixtures::*;
    use crate::transport::LinkPeer;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    struct RemoteEnd {
        url: Url,
        peer: LinkPeer,
    }

    impl RemoteEnd {
        fn handshake(&self, bridge_id: &str, token: &str) {
            let message = serde_json::to_string(&RelayHandshake {
                bridge_id: bridge_id.to_string(),
                reconnect_token: token.to_string(),
            })
            .expect("serialize");
            self.peer
                .events
                .send(LinkEvent::Text(message))
                .expect("send handshake");
        }

        async fn next(&mut self) -> Vec<u8> {
            self.peer
                .outbound
                .recv()
                .await
                .expect("message")
                .to_vec()
        }

        fn token(&self) -> Option<String> {
            self.url
                .query_pairs()
                .find(|(k, _)| k == RECONNECT_TOKEN_PARAM)
                .map(|(_, v)| v.into_owned())
        }
    }

    struct MemoryConnector {
        opens: AtomicUsize,
        refuse: AtomicBool,
        remotes: mpsc::UnboundedSender<RemoteEnd>,
    }

    impl MemoryConnector {
        fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<RemoteEnd>) {
            let (tx, rx) = mpsc::unbounded_channel();
            let connector = Arc::new(Self {
                opens: AtomicUsize::new(0),
                refuse: AtomicBool::new(false),
                remotes: tx,
            });
            (connector, rx)
        }

        fn opens(&self) -> usize {
            self.opens.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl RelayConnector for MemoryConnector {
        async fn open(&self, url: &Url) -> Result<RelayLink, TransportError> {
            self.opens.fetch_add(1, Ordering::SeqCst);
            if self.refuse.load(Ordering::SeqCst) {
                return Err(TransportError::Link("connection refused".into()));
            }
            let (link, peer) = RelayLink::channel();
            let _ = self.remotes.send(RemoteEnd {
                url: url.clone(),
                peer,
            });
            Ok(link)
        }
    }

    fn relay_sink(connector: Arc<MemoryConnector>) -> RelaySink {
        let url = Url::parse("ws://relay.test/bridge").expect("url");
        RelaySink::new("relay", url, connector)
            .with_policy(ReconnectPolicy::default().without_jitter())
    }

    async fn accept(
        remotes: &mut mpsc::UnboundedReceiver<RemoteEnd>,
        bridge_id: &str,
        token: &str,
    ) -> RemoteEnd {
        let remote = remotes.recv().await.expect("open");
        remote.handshake(bridge_id, token);
        remote
    }

    #[test]
    fn test_relay_url_token() {
        let base = Url::parse("wss://relay.test/bridge").expect("url");
        assert_eq!(relay_url(&base, None).as_str(), "wss://relay.test/bridge");
        assert_eq!(
            relay_url(&base, Some("abc 1")).as_str(),
            "wss://relay.test/bridge?reconnect_token=abc+1"
        );
    }

    #[test]
    fn test_reconnect_state_handshake() {
        let mut state = ReconnectState {
            attempt: 3,
            ..Default::default()
        };
        assert!(!state.on_handshake("t1".into()));
        assert_eq!(state.attempt, 0);
        assert!(state.on_handshake("t2".into()));
        assert_eq!(state.token.as_deref(), Some("t2"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_carries_token_and_replays_session() {
        let (connector, mut remotes) = MemoryConnector::new();
        let sink = relay_sink(connector.clone());
        let status = sink.status();

        let (result, mut remote) =
            tokio::join!(sink.connect(), accept(&mut remotes, "bridge-1", "token-1"));
        result.expect("connect");
        assert_eq!(remote.token(), None);
        assert_eq!(
            *status.borrow(),
            RelayStatus::Connected {
                bridge_id: "bridge-1".into()
            }
        );

        // Live stream: metadata, session start, one frame
        sink.receive(Bytes::from(message_sizes()));
        sink.receive(Bytes::from(game_start()));
        sink.receive(Bytes::from(frame(1)));
        assert_eq!(remote.next().await, message_sizes());
        assert_eq!(remote.next().await, game_start());
        assert_eq!(remote.next().await, frame(1));

        // Remote drops, one frame is lost while reconnecting
        remote.peer.events.send(LinkEvent::Closed).expect("close");
        drop(remote);
        sink.receive(Bytes::from(frame(2)));

        let mut remote = accept(&mut remotes, "bridge-1", "token-2").await;
        assert_eq!(remote.token().as_deref(), Some("token-1"));
        assert_eq!(remote.next().await, [message_sizes(), game_start()].concat());

        // Session ends; the next replay carries metadata only
        sink.receive(Bytes::from(game_end()));
        assert_eq!(remote.next().await, game_end());
        remote.peer.events.send(LinkEvent::Closed).expect("close");
        drop(remote);

        let mut remote = accept(&mut remotes, "bridge-1", "token-3").await;
        assert_eq!(remote.token().as_deref(), Some("token-2"));
        assert_eq!(remote.next().await, message_sizes());

        let stats = sink.stats().expect("stats");
        assert_eq!(stats.reconnects, 2);
        assert_eq!(stats.replays_sent, 2);
        assert_eq!(stats.chunks_dropped, 1);
        assert_eq!(stats.chunks_forwarded, 4);
        assert_eq!(connector.opens(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_link_error_recovers_with_replay() {
        let (connector, mut remotes) = MemoryConnector::new();
        let sink = relay_sink(connector.clone());

        let (result, mut remote) =
            tokio::join!(sink.connect(), accept(&mut remotes, "bridge-1", "token-1"));
        result.expect("connect");

        sink.receive(Bytes::from(message_sizes()));
        sink.receive(Bytes::from(game_start()));
        assert_eq!(remote.next().await, message_sizes());
        assert_eq!(remote.next().await, game_start());

        // Transport fault mid-stream takes the backoff path
        let failed_at = tokio::time::Instant::now();
        remote
            .peer
            .events
            .send(LinkEvent::Error("connection reset".into()))
            .expect("error");
        drop(remote);

        let mut remote = accept(&mut remotes, "bridge-1", "token-2").await;
        assert!(failed_at.elapsed() >= Duration::from_millis(500));
        assert_eq!(remote.token().as_deref(), Some("token-1"));
        assert_eq!(remote.next().await, [message_sizes(), game_start()].concat());

        sink.receive(Bytes::from(frame(1)));
        assert_eq!(remote.next().await, frame(1));

        let stats = sink.stats().expect("stats");
        assert_eq!(stats.reconnects, 1);
        assert_eq!(stats.replays_sent, 1);
        assert_eq!(connector.opens(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_exhausted_reported_once() {
        let (connector, mut remotes) = MemoryConnector::new();
        let sink = relay_sink(connector.clone());

        let (result, remote) =
            tokio::join!(sink.connect(), accept(&mut remotes, "bridge-1", "token-1"));
        result.expect("connect");

        connector.refuse.store(true, Ordering::SeqCst);
        remote.peer.events.send(LinkEvent::Closed).expect("close");

        let failure = sink.terminated().await;
        assert_eq!(failure, SinkFailure::ReconnectExhausted { attempts: 5 });
        assert_eq!(*sink.status().borrow(), RelayStatus::Exhausted);
        assert_eq!(connector.opens(), 6);

        // No further attempts are scheduled
        tokio::time::sleep(Duration::from_secs(300)).await;
        assert_eq!(connector.opens(), 6);
        assert_eq!(*sink.status().borrow(), RelayStatus::Exhausted);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_suppresses_reconnect() {
        let (connector, mut remotes) = MemoryConnector::new();
        let sink = relay_sink(connector.clone());

        let (result, mut remote) =
            tokio::join!(sink.connect(), accept(&mut remotes, "bridge-1", "token-1"));
        result.expect("connect");

        sink.disconnect();
        sink.disconnect();

        // Link is closed locally
        assert_eq!(remote.peer.outbound.recv().await, None);

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(connector.opens(), 1);
        assert_eq!(*sink.status().borrow(), RelayStatus::Disconnected);
        assert_eq!(sink.connect().await, Err(SinkError::Disconnected));
    }

    #[tokio::test(start_paused = true)]
    async fn test_binary_before_handshake_rejected() {
        let (connector, mut remotes) = MemoryConnector::new();
        let sink = relay_sink(connector.clone());

        let reject = async {
            let remote = remotes.recv().await.expect("open");
            remote
                .peer
                .events
                .send(LinkEvent::Binary(Bytes::from_static(b"\x00")))
                .expect("send");
            remote
        };
        let (result, _remote) = tokio::join!(sink.connect(), reject);
        assert!(matches!(result, Err(SinkError::Transport(_))));

        // Initial connect does not retry
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(connector.opens(), 1);
        assert_eq!(*sink.status().borrow(), RelayStatus::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_handshake_timeout() {
        let (connector, mut remotes) = MemoryConnector::new();
        let sink = relay_sink(connector.clone()).with_connect_timeout(Duration::from_secs(2));
        assert_eq!(sink.connect_timeout(), Some(Duration::from_secs(2)));

        // Remote accepts but never sends the handshake
        let (result, _remote) = tokio::join!(sink.connect(), async {
            remotes.recv().await.expect("open")
        });
        assert_eq!(result, Err(SinkError::Timeout(Duration::from_secs(2))));
    }

    #[tokio::test]
    async fn test_disconnect_before_connect() {
        let (connector, _remotes) = MemoryConnector::new();
        let sink = relay_sink(connector.clone());

        sink.disconnect();
        assert_eq!(*sink.status().borrow(), RelayStatus::Disconnected);
        assert_eq!(sink.connect().await, Err(SinkError::Disconnected));
        assert_eq!(connector.opens(), 0);
    }
}
