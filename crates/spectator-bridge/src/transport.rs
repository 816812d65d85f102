// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Downstream message transport used by relay sinks.
//!
//! A [`RelayLink`] is an ordered, bidirectional message channel. Outbound
//! traffic is always binary; inbound traffic surfaces as [`LinkEvent`]s.
//! [`WsConnector`] backs links with a WebSocket connection, other
//! [`RelayConnector`]s can hand out in-process links via
//! [`RelayLink::channel`].

use async_trait::async_trait;
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::WebSocketStream;
use tracing::debug;
use url::Url;

/// Transport errors.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tungstenite::Error),

    #[error("Handshake timed out after {0:?}")]
    HandshakeTimeout(Duration),

    #[error("Invalid handshake: {0}")]
    Handshake(#[from] serde_json::Error),

    #[error("Unexpected frame before handshake: {0}")]
    UnexpectedFrame(String),

    #[error("Link error: {0}")]
    Link(String),

    #[error("Connection closed before handshake")]
    ClosedBeforeHandshake,
}

/// Inbound notification on a link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    Text(String),
    Binary(Bytes),
    /// Remote closed the link, or the link task ended.
    Closed,
    Error(String),
}

/// One open downstream connection.
#[derive(Debug)]
pub struct RelayLink {
    outbound: Option<mpsc::UnboundedSender<Bytes>>,
    inbound: mpsc::UnboundedReceiver<LinkEvent>,
}

/// Remote side of an in-process link.
#[derive(Debug)]
pub struct LinkPeer {
    /// Events delivered to the link owner.
    pub events: mpsc::UnboundedSender<LinkEvent>,
    /// Messages sent by the link owner. Yields `None` once the link closes.
    pub outbound: mpsc::UnboundedReceiver<Bytes>,
}

impl RelayLink {
    /// In-process link without a backing task.
    pub fn channel() -> (Self, LinkPeer) {
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (in_tx, in_rx) = mpsc::unbounded_channel();
        let link = Self {
            outbound: Some(out_tx),
            inbound: in_rx,
        };
        let peer = LinkPeer {
            events: in_tx,
            outbound: out_rx,
        };
        (link, peer)
    }

    /// Link pumping a WebSocket stream on a background task.
    ///
    /// The task ends once the link is closed or dropped and the outbound
    /// queue has drained, or when the remote side goes away.
    pub fn from_websocket<S>(ws: WebSocketStream<S>) -> Self
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (in_tx, in_rx) = mpsc::unbounded_channel();
        tokio::spawn(pump_websocket(ws, out_rx, in_tx));
        Self {
            outbound: Some(out_tx),
            inbound: in_rx,
        }
    }

    /// Queue a binary message. Returns false if the link is gone.
    pub fn send(&self, data: Bytes) -> bool {
        match &self.outbound {
            Some(tx) => tx.send(data).is_ok(),
            None => false,
        }
    }

    /// Next inbound event; [`LinkEvent::Closed`] once the link is gone.
    pub async fn next_event(&mut self) -> LinkEvent {
        self.inbound.recv().await.unwrap_or(LinkEvent::Closed)
    }

    /// Close the link. Queued messages are still flushed.
    pub fn close(&mut self) {
        self.outbound = None;
    }
}

async fn pump_websocket<S>(
    ws: WebSocketStream<S>,
    mut outbound: mpsc::UnboundedReceiver<Bytes>,
    inbound: mpsc::UnboundedSender<LinkEvent>,
) where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (mut ws_tx, mut ws_rx) = ws.split();

    loop {
        tokio::select! {
            out = outbound.recv() => match out {
                Some(data) => {
                    if let Err(e) = ws_tx.send(Message::Binary(data.to_vec())).await {
                        let _ = inbound.send(LinkEvent::Error(e.to_string()));
                        break;
                    }
                }
                None => {
                    debug!("Closing relay link");
                    let _ = ws_tx.send(Message::Close(None)).await;
                    break;
                }
            },
            msg = ws_rx.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    let _ = inbound.send(LinkEvent::Text(text));
                }
                Some(Ok(Message::Binary(data))) => {
                    let _ = inbound.send(LinkEvent::Binary(Bytes::from(data)));
                }
                Some(Ok(Message::Close(_))) | None => {
                    let _ = inbound.send(LinkEvent::Closed);
                    break;
                }
                Some(Ok(_)) => {} // Ping/Pong answered by tungstenite
                Some(Err(e)) => {
                    let _ = inbound.send(LinkEvent::Error(e.to_string()));
                    break;
                }
            },
        }
    }
}

/// Opens links to a relay endpoint.
#[async_trait]
pub trait RelayConnector: Send + Sync {
    async fn open(&self, url: &Url) -> Result<RelayLink, TransportError>;
}

/// WebSocket connector (`ws://` and `wss://`).
#[derive(Debug, Default, Clone, Copy)]
pub struct WsConnector;

#[async_trait]
impl RelayConnector for WsConnector {
    async fn open(&self, url: &Url) -> Result<RelayLink, TransportError> {
        let (ws, _response) = tokio_tungstenite::connect_async(url.as_str()).await?;
        debug!("WebSocket open to {}", url.host_str().unwrap_or("?"));
        Ok(RelayLink::from_websocket(ws))
    }
}
