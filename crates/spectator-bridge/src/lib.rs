// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Spectator Bridge
//!
//! Relays one live binary game stream to any number of downstream sinks,
//! each of which may drop and rejoin on its own. A sink that (re)joins
//! mid-game is sent the stream metadata and game start it missed before
//! live data resumes.
//!
//! The upstream is read as a raw byte stream over TCP. No console or Dolphin
//! handshake is performed, so the source must already be writing the raw
//! command stream.
//!
//! # Features
//!
//! - **Buffered connect**: data seen before every sink is ready is flushed
//!   once, in order
//! - **Fan-out**: each chunk goes to every sink in arrival order
//! - **Reconnecting relays**: WebSocket sinks with bounded exponential
//!   backoff and reconnect tokens
//! - **Spectator server**: local WebSocket clients joining mid-game get the
//!   same replay
//! - **Session replay**: mid-game joiners get the prefix they need
//!
//! # Quick Start
//!
//! ```bash
//! # Relay a raw stream served on localhost:51441
//! spectator-bridge run --relay wss://spectate.example.com/bridge
//!
//! # Custom upstream, plus a local log sink
//! spectator-bridge run --upstream 192.168.1.20:51441 --relay ws://localhost:9000 --log-sink
//!
//! # Using config file
//! spectator-bridge run --config bridge.toml
//! ```
//!
//! # Configuration File
//!
//! ```toml
//! name = "console-1"
//!
//! [upstream]
//! address = "127.0.0.1"
//! port = 51441
//!
//! [[sinks]]
//! type = "relay"
//! name = "spectate"
//! url = "wss://spectate.example.com/bridge"
//!
//! [sinks.reconnect]
//! max_attempts = 5
//!
//! [[sinks]]
//! type = "server"
//! name = "browsers"
//! bind = "0.0.0.0:9090"
//! ```

pub mod backoff;
pub mod bridge;
pub mod config;
pub mod decoder;
pub mod relay;
pub mod server;
pub mod sink;
pub mod stats;
pub mod tracker;
pub mod transport;
pub mod upstream;

pub use backoff::ReconnectPolicy;
pub use bridge::{Bridge, BridgeError, BridgeEvent, BridgeHandle, BridgeState, DisconnectReason};
pub use config::{
    BridgeConfig, ConfigError, LogSinkConfig, RelaySinkConfig, ServerSinkConfig, SinkConfig,
};
pub use decoder::{EventCategory, SlpDecoder, StreamDecoder};
pub use relay::{RelayHandshake, RelaySink, RelayStatus};
pub use server::ServerSink;
pub use sink::{LocalSink, Sink, SinkError, SinkFailure};
pub use stats::{SinkStats, SinkStatsSnapshot};
pub use tracker::{ReplayTracker, SessionTracker};
pub use transport::{RelayConnector, RelayLink, WsConnector};
pub use upstream::{ChannelUpstream, TcpUpstream, Upstream, UpstreamFeed};
