// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Local spectator server.
//!
//! A [`ServerSink`] serves any number of WebSocket clients on one listen
//! address. A client that joins mid-game is first sent the replay payload
//! (stream metadata, then game start), then every live chunk as one binary
//! message. Clients only listen; anything they send is ignored.

use crate::config::{ConfigError, ServerSinkConfig};
use crate::sink::{Sink, SinkError};
use crate::stats::{SinkStats, SinkStatsSnapshot};
use crate::tracker::ReplayTracker;
use async_trait::async_trait;
use axum::extract::ws::{Message, WebSocket};
use axum::extract::{ConnectInfo, State, WebSocketUpgrade};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Connected spectators and the session state they join into.
struct Spectators {
    name: String,
    stats: Arc<SinkStats>,
    hub: Mutex<Hub>,
}

struct Hub {
    tracker: ReplayTracker,
    clients: HashMap<u64, mpsc::UnboundedSender<Bytes>>,
    next_id: u64,
    open: bool,
}

impl Spectators {
    fn new(name: String) -> Self {
        Self {
            name,
            stats: Arc::new(SinkStats::new()),
            hub: Mutex::new(Hub {
                tracker: ReplayTracker::new(),
                clients: HashMap::new(),
                next_id: 0,
                open: false,
            }),
        }
    }

    fn open(&self) {
        self.hub.lock().open = true;
    }

    /// Register a client. The replay is queued under the same lock that
    /// orders live chunks, so a joiner sees every byte exactly once.
    fn join(&self) -> Option<(u64, mpsc::UnboundedReceiver<Bytes>, usize)> {
        let mut hub = self.hub.lock();
        if !hub.open {
            return None;
        }

        let (tx, rx) = mpsc::unbounded_channel();
        if let Some(payload) = hub.tracker.replay_payload() {
            if tx.send(payload).is_ok() {
                self.stats.record_replay();
            }
        }

        let id = hub.next_id;
        hub.next_id += 1;
        hub.clients.insert(id, tx);
        Some((id, rx, hub.clients.len()))
    }

    fn leave(&self, id: u64) -> usize {
        let mut hub = self.hub.lock();
        hub.clients.remove(&id);
        hub.clients.len()
    }

    fn broadcast(&self, chunk: Bytes) {
        let mut hub = self.hub.lock();
        hub.tracker.write(&chunk);

        if hub.clients.is_empty() {
            return;
        }
        hub.clients.retain(|_, tx| tx.send(chunk.clone()).is_ok());
        self.stats.record_forwarded(chunk.len() as u64);
    }

    /// Refuse new clients and drop the current ones.
    fn close(&self) {
        let mut hub = self.hub.lock();
        hub.open = false;
        hub.clients.clear();
    }
}

/// Sink serving the stream to local WebSocket clients.
pub struct ServerSink {
    name: String,
    bind: SocketAddr,
    spectators: Arc<Spectators>,
    server: Mutex<Option<JoinHandle<()>>>,
    local_addr: Mutex<Option<SocketAddr>>,
}

impl std::fmt::Debug for ServerSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerSink")
            .field("name", &self.name)
            .field("bind", &self.bind)
            .finish_non_exhaustive()
    }
}

impl ServerSink {
    /// Create a server sink listening on `bind` once connected.
    pub fn new(name: impl Into<String>, bind: SocketAddr) -> Self {
        let name = name.into();
        Self {
            spectators: Arc::new(Spectators::new(name.clone())),
            name,
            bind,
            server: Mutex::new(None),
            local_addr: Mutex::new(None),
        }
    }

    /// Create a server sink from its configuration.
    pub fn from_config(config: &ServerSinkConfig) -> Result<Self, ConfigError> {
        Ok(Self::new(config.name.clone(), config.bind_addr()?))
    }

    /// Address actually bound, once connected.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.local_addr.lock()
    }
}

#[async_trait]
impl Sink for ServerSink {
    fn name(&self) -> &str {
        &self.name
    }

    async fn connect(&self) -> Result<(), SinkError> {
        if self.server.lock().is_some() {
            return Ok(());
        }

        let listener = TcpListener::bind(self.bind)
            .await
            .map_err(|e| SinkError::Transport(format!("bind {}: {}", self.bind, e)))?;
        let addr = listener
            .local_addr()
            .map_err(|e| SinkError::Transport(e.to_string()))?;

        let app = Router::new()
            .route("/", get(ws_handler))
            .with_state(self.spectators.clone());

        self.spectators.open();
        let name = self.name.clone();
        let task = tokio::spawn(async move {
            let service = app.into_make_service_with_connect_info::<SocketAddr>();
            if let Err(e) = axum::serve(listener, service).await {
                warn!("[{}] Spectator server stopped: {}", name, e);
            }
        });

        *self.server.lock() = Some(task);
        *self.local_addr.lock() = Some(addr);
        info!("[{}] Serving spectators on ws://{}", self.name, addr);
        Ok(())
    }

    fn receive(&self, chunk: Bytes) {
        self.spectators.broadcast(chunk);
    }

    fn disconnect(&self) {
        self.spectators.close();
        if let Some(task) = self.server.lock().take() {
            task.abort();
            info!("[{}] Spectator server stopped", self.name);
        }
    }

    fn stats(&self) -> Option<SinkStatsSnapshot> {
        Some(self.spectators.stats.snapshot(&self.name))
    }
}

/// WebSocket upgrade handler
async fn ws_handler(
    ws: WebSocketUpgrade,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    State(spectators): State<Arc<Spectators>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| serve_spectator(socket, peer, spectators))
}

async fn serve_spectator(socket: WebSocket, peer: SocketAddr, spectators: Arc<Spectators>) {
    let Some((id, mut rx, watching)) = spectators.join() else {
        debug!("[{}] Rejected {}: server closing", spectators.name, peer);
        return;
    };
    info!(
        "[{}] Spectator {} connected ({} watching)",
        spectators.name, peer, watching
    );

    let (mut ws_tx, mut ws_rx) = socket.split();

    let name = spectators.name.clone();
    let mut forward = tokio::spawn(async move {
        while let Some(chunk) = rx.recv().await {
            if ws_tx.send(Message::Binary(chunk.to_vec())).await.is_err() {
                debug!("[{}] Spectator send failed, closing", name);
                return;
            }
        }
        let _ = ws_tx.send(Message::Close(None)).await;
    });

    loop {
        tokio::select! {
            _ = &mut forward => break,
            msg = ws_rx.next() => match msg {
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    debug!("[{}] Spectator {} error: {}", spectators.name, peer, e);
                    break;
                }
            },
        }
    }

    forward.abort();
    let watching = spectators.leave(id);
    info!(
        "[{}] Spectator {} left ({} watching)",
        spectators.name, peer, watching
    );
}
