// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Upstream source abstraction.
//!
//! The bridge drives exactly one [`Upstream`]. An upstream reports its
//! lifecycle and data on an [`UpstreamSender`] handed over at connect time;
//! the bridge only reacts to [`UpstreamStatus::Connected`] and
//! [`UpstreamStatus::Disconnected`].

use bytes::Bytes;
use parking_lot::Mutex;
use std::sync::Arc;
use thiserror::Error;
use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Upstream errors.
#[derive(Debug, Error)]
pub enum UpstreamError {
    #[error("Upstream already started")]
    AlreadyStarted,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Connection status reported by an upstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpstreamStatus {
    Disconnected,
    Connecting,
    Connected,
}

/// Notification emitted by an upstream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpstreamEvent {
    Status(UpstreamStatus),
    Data(Bytes),
}

/// Channel an upstream reports on.
pub type UpstreamSender = mpsc::UnboundedSender<UpstreamEvent>;

/// Producer of the live stream.
pub trait Upstream: Send + 'static {
    /// Start connecting to `address:port`.
    ///
    /// Must not block: progress is reported on `events`.
    fn connect(
        &mut self,
        address: &str,
        port: u16,
        events: UpstreamSender,
    ) -> Result<(), UpstreamError>;

    /// Stop the connection. Must be idempotent.
    fn disconnect(&mut self);
}

const READ_BUFFER: usize = 16 * 1024;

/// Upstream reading raw bytes from a TCP socket.
///
/// The source must already be writing the raw command stream: no console or
/// Dolphin handshake is performed. Every successful read becomes one chunk.
#[derive(Debug)]
pub struct TcpUpstream {
    task: Option<JoinHandle<()>>,
}

impl Default for TcpUpstream {
    fn default() -> Self {
        Self::new()
    }
}

impl TcpUpstream {
    /// Create an idle upstream.
    pub fn new() -> Self {
        Self { task: None }
    }

    async fn read_loop(addr: String, events: UpstreamSender) {
        let _ = events.send(UpstreamEvent::Status(UpstreamStatus::Connecting));

        let mut stream = match TcpStream::connect(&addr).await {
            Ok(stream) => stream,
            Err(e) => {
                warn!("Failed to connect to upstream {}: {}", addr, e);
                let _ = events.send(UpstreamEvent::Status(UpstreamStatus::Disconnected));
                return;
            }
        };

        info!("Connected to upstream {}", addr);
        if events
            .send(UpstreamEvent::Status(UpstreamStatus::Connected))
            .is_err()
        {
            return;
        }

        let mut buf = vec![0u8; READ_BUFFER];
        loop {
            match stream.read(&mut buf).await {
                Ok(0) => {
                    info!("Upstream {} closed the connection", addr);
                    break;
                }
                Ok(n) => {
                    let chunk = Bytes::copy_from_slice(&buf[..n]);
                    if events.send(UpstreamEvent::Data(chunk)).is_err() {
                        debug!("Upstream receiver gone, stopping reader");
                        return;
                    }
                }
                Err(e) => {
                    warn!("Upstream read error on {}: {}", addr, e);
                    break;
                }
            }
        }

        let _ = events.send(UpstreamEvent::Status(UpstreamStatus::Disconnected));
    }
}

impl Upstream for TcpUpstream {
    fn connect(
        &mut self,
        address: &str,
        port: u16,
        events: UpstreamSender,
    ) -> Result<(), UpstreamError> {
        if self.task.is_some() {
            return Err(UpstreamError::AlreadyStarted);
        }

        let addr = format!("{}:{}", address, port);
        self.task = Some(tokio::spawn(Self::read_loop(addr, events)));
        Ok(())
    }

    fn disconnect(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
            debug!("Upstream reader stopped");
        }
    }
}

impl Drop for TcpUpstream {
    fn drop(&mut self) {
        self.disconnect();
    }
}

/// In-process upstream driven through an [`UpstreamFeed`].
///
/// Used for embedding the bridge behind another producer, and in tests.
#[derive(Debug)]
pub struct ChannelUpstream {
    shared: Arc<Mutex<FeedState>>,
}

#[derive(Debug, Default)]
struct FeedState {
    events: Option<UpstreamSender>,
    target: Option<(String, u16)>,
    disconnects: usize,
}

/// Producer side of a [`ChannelUpstream`].
#[derive(Debug, Clone)]
pub struct UpstreamFeed {
    shared: Arc<Mutex<FeedState>>,
}

impl ChannelUpstream {
    pub fn new() -> (Self, UpstreamFeed) {
        let shared = Arc::new(Mutex::new(FeedState::default()));
        (
            Self {
                shared: shared.clone(),
            },
            UpstreamFeed { shared },
        )
    }
}

impl Upstream for ChannelUpstream {
    fn connect(
        &mut self,
        address: &str,
        port: u16,
        events: UpstreamSender,
    ) -> Result<(), UpstreamError> {
        let mut state = self.shared.lock();
        if state.target.is_some() {
            return Err(UpstreamError::AlreadyStarted);
        }
        state.target = Some((address.to_string(), port));
        state.events = Some(events);
        Ok(())
    }

    fn disconnect(&mut self) {
        let mut state = self.shared.lock();
        state.events = None;
        state.disconnects += 1;
    }
}

impl UpstreamFeed {
    fn emit(&self, event: UpstreamEvent) -> bool {
        match &self.shared.lock().events {
            Some(events) => events.send(event).is_ok(),
            None => false,
        }
    }

    /// Report the connection as established.
    pub fn connected(&self) -> bool {
        self.emit(UpstreamEvent::Status(UpstreamStatus::Connected))
    }

    /// Deliver one chunk.
    pub fn data(&self, chunk: impl Into<Bytes>) -> bool {
        self.emit(UpstreamEvent::Data(chunk.into()))
    }

    /// Report the connection as lost.
    pub fn disconnected(&self) -> bool {
        self.emit(UpstreamEvent::Status(UpstreamStatus::Disconnected))
    }

    /// Address and port passed to `connect`, if it was called.
    pub fn target(&self) -> Option<(String, u16)> {
        self.shared.lock().target.clone()
    }

    /// Number of `disconnect` calls received.
    pub fn disconnects(&self) -> usize {
        self.shared.lock().disconnects
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_tcp_upstream_reports_data_and_close() {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let port = listener.local_addr().expect("addr").port();

        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.expect("accept");
            socket.write_all(b"hello").await.expect("write");
            // Dropping the socket closes the stream
        });

        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut upstream = TcpUpstream::new();
        upstream.connect("127.0.0.1", port, tx).expect("connect");

        assert_eq!(
            rx.recv().await,
            Some(UpstreamEvent::Status(UpstreamStatus::Connecting))
        );
        assert_eq!(
            rx.recv().await,
            Some(UpstreamEvent::Status(UpstreamStatus::Connected))
        );

        let mut data = Vec::new();
        loop {
            match rx.recv().await.expect("event") {
                UpstreamEvent::Data(chunk) => data.extend_from_slice(&chunk),
                UpstreamEvent::Status(UpstreamStatus::Disconnected) => break,
                other => panic!("unexpected event {:?}", other),
            }
        }
        assert_eq!(data, b"hello");
    }

    #[tokio::test]
    async fn test_tcp_upstream_connect_refused() {
        // Bind then drop to get a port nobody listens on
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
            listener.local_addr().expect("addr").port()
        };

        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut upstream = TcpUpstream::new();
        upstream.connect("127.0.0.1", port, tx).expect("connect");

        assert_eq!(
            rx.recv().await,
            Some(UpstreamEvent::Status(UpstreamStatus::Connecting))
        );
        assert_eq!(
            rx.recv().await,
            Some(UpstreamEvent::Status(UpstreamStatus::Disconnected))
        );
    }

    #[tokio::test]
    async fn test_tcp_upstream_rejects_second_connect() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut upstream = TcpUpstream::new();
        upstream.connect("127.0.0.1", 1, tx.clone()).expect("connect");
        assert!(matches!(
            upstream.connect("127.0.0.1", 1, tx),
            Err(UpstreamError::AlreadyStarted)
        ));
        upstream.disconnect();
        upstream.disconnect();
    }

    #[tokio::test]
    async fn test_channel_upstream_feed() {
        let (mut upstream, feed) = ChannelUpstream::new();

        // Nothing to deliver to before connect
        assert!(!feed.connected());

        let (tx, mut rx) = mpsc::unbounded_channel();
        upstream.connect("10.0.0.2", 51441, tx).expect("connect");
        assert_eq!(feed.target(), Some(("10.0.0.2".to_string(), 51441)));

        assert!(feed.connected());
        assert!(feed.data(&b"abc"[..]));
        assert_eq!(
            rx.recv().await,
            Some(UpstreamEvent::Status(UpstreamStatus::Connected))
        );
        assert_eq!(
            rx.recv().await,
            Some(UpstreamEvent::Data(Bytes::from_static(b"abc")))
        );

        upstream.disconnect();
        assert!(!feed.data(&b"late"[..]));
        assert_eq!(feed.disconnects(), 1);
        assert_eq!(rx.recv().await, None);
    }
}
