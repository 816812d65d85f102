// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Spectator Bridge CLI
//!
//! Command-line tool relaying a live game stream to spectator relays and
//! local WebSocket clients.
//!
//! The upstream must be a TCP source already writing the raw command stream.
//! No console or Dolphin handshake is performed: pointing it at a console
//! that waits for one yields no data.
//!
//! # Usage
//!
//! ```bash
//! # Relay a raw stream served on localhost:51441
//! spectator-bridge run --relay wss://spectate.example.com/bridge
//!
//! # Remote source, two relays and a local log sink
//! spectator-bridge run --upstream 192.168.1.20:51441 \
//!     --relay ws://a.example.com/bridge --relay ws://b.example.com/bridge --log-sink
//!
//! # Serve browsers on port 9090
//! spectator-bridge run --serve 0.0.0.0:9090
//!
//! # Using configuration file
//! spectator-bridge run --config bridge.toml
//! ```

use bytes::Bytes;
use clap::{Args as ClapArgs, Parser, Subcommand};
use spectator_bridge::config::UpstreamConfig;
use spectator_bridge::{
    Bridge, BridgeConfig, BridgeEvent, BridgeState, ConfigError, DisconnectReason, EventCategory,
    LocalSink, LogSinkConfig, ReconnectPolicy, RelayConnector, RelaySink, RelaySinkConfig,
    ReplayTracker, ServerSink, ServerSinkConfig, SinkConfig, SinkStatsSnapshot, TcpUpstream,
    WsConnector,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Spectator Bridge
#[derive(Parser, Debug)]
#[command(name = "spectator-bridge")]
#[command(about = "Spectator Bridge - Relay a live game stream to spectator servers")]
#[command(version)]
struct Args {
    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Connect to the upstream and relay its stream
    Run(RunArgs),

    /// Generate example configuration file
    GenConfig {
        /// Output file path
        #[arg(short, long, default_value = "bridge.toml")]
        output: PathBuf,
    },

    /// Validate a configuration file
    Validate {
        /// Configuration file path
        #[arg(short, long)]
        config: PathBuf,
    },
}

#[derive(ClapArgs, Debug)]
struct RunArgs {
    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Raw stream source (host or host:port, no console handshake)
    #[arg(short, long)]
    upstream: Option<String>,

    /// Relay URL (ws:// or wss://, can repeat)
    #[arg(short, long = "relay")]
    relays: Vec<String>,

    /// Reconnect attempts for --relay sinks before giving up
    #[arg(long)]
    max_reconnects: Option<u32>,

    /// Serve spectator WebSocket clients on this address (ip:port)
    #[arg(long)]
    serve: Option<String>,

    /// Add a local sink logging game boundaries
    #[arg(long)]
    log_sink: bool,

    /// Statistics reporting interval (seconds, 0 to disable)
    #[arg(long)]
    stats_interval: Option<u64>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    match args.command {
        Commands::Run(run) => cmd_run(run, args.log_level).await,
        Commands::GenConfig { output } => {
            init_logging(args.log_level.as_deref().unwrap_or("info"));
            cmd_gen_config(output)
        }
        Commands::Validate { config } => {
            init_logging(args.log_level.as_deref().unwrap_or("info"));
            cmd_validate(config)
        }
    }
}

fn init_logging(level: &str) {
    let filter = EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

async fn cmd_run(
    args: RunArgs,
    log_level: Option<String>,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = build_config(&args, log_level)?;
    init_logging(&config.log_level);

    let (mut bridge, mut events) = Bridge::from_config(Box::new(TcpUpstream::new()), &config)?;

    let connector: Arc<dyn RelayConnector> = Arc::new(WsConnector);
    let mut servers = Vec::new();
    for sink_config in &config.sinks {
        match sink_config {
            SinkConfig::Relay(relay) => {
                let sink = RelaySink::from_config(relay, connector.clone())?;
                bridge.register_sink(Arc::new(sink))?;
            }
            SinkConfig::Server(server) => {
                let sink = Arc::new(ServerSink::from_config(server)?);
                servers.push(sink.clone());
                bridge.register_sink(sink)?;
            }
            SinkConfig::Log(log) => {
                let (sink, rx) = LocalSink::new(log.name.clone());
                tokio::spawn(log_sessions(log.name.clone(), rx));
                bridge.register_sink(Arc::new(sink))?;
            }
        }
    }

    println!("Spectator Bridge v{}", env!("CARGO_PKG_VERSION"));
    println!("=====================================");
    println!();
    println!(
        "Upstream: {}:{}",
        config.upstream.address, config.upstream.port
    );
    for sink in &config.sinks {
        match sink {
            SinkConfig::Relay(relay) => println!("Sink: {} -> {}", relay.name, relay.url),
            SinkConfig::Server(server) => println!("Sink: {} <- ws://{}", server.name, server.bind),
            SinkConfig::Log(log) => println!("Sink: {} (log)", log.name),
        }
    }
    println!();
    println!("Press Ctrl+C to stop...");
    println!();

    let handle = bridge.connect(config.upstream.address.clone(), config.upstream.port);

    // Lifecycle logging task
    let events_task = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            match event {
                BridgeEvent::UpstreamConnected => info!("Upstream connected"),
                BridgeEvent::SinkConnected(name) => info!("Sink '{}' ready", name),
                BridgeEvent::Open => {
                    info!("Bridge open, relaying");
                    for server in &servers {
                        if let Some(addr) = server.local_addr() {
                            info!("Spectators can join at ws://{}", addr);
                        }
                    }
                }
                BridgeEvent::SinkFailed { name, failure } => {
                    warn!("Sink '{}' stopped: {}", name, failure)
                }
                BridgeEvent::Closed(reason) => info!("Bridge closed: {}", reason),
            }
        }
    });

    // Stats reporting task
    let stats_interval = config.stats_interval_secs;
    let stats_handle = handle.clone();
    if stats_interval > 0 {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(stats_interval));
            interval.tick().await;
            loop {
                interval.tick().await;
                if stats_handle.state() >= BridgeState::Disconnecting {
                    break;
                }
                print_stats(&stats_handle.sink_stats());
            }
        });
    }

    // Wait for Ctrl+C or a fatal close
    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result?;
            println!("\nShutting down...");
            handle.quit();
        }
        _ = handle.wait_closed() => {}
    }

    let reason = handle.wait_closed().await;
    let _ = events_task.await;

    println!("\nFinal Statistics:");
    print_stats(&handle.sink_stats());

    match reason {
        Some(DisconnectReason::Quit) => Ok(()),
        Some(reason) => {
            eprintln!("Bridge stopped: {}", reason);
            std::process::exit(1);
        }
        None => {
            eprintln!("Bridge stopped unexpectedly");
            std::process::exit(1);
        }
    }
}

fn build_config(args: &RunArgs, log_level: Option<String>) -> Result<BridgeConfig, ConfigError> {
    // Load from file if specified, validated once overrides are merged
    let mut config = match args.config {
        Some(ref path) => BridgeConfig::load(path)?,
        None => BridgeConfig::default(),
    };

    if let Some(ref upstream) = args.upstream {
        let parsed = UpstreamConfig::parse(upstream)?;
        config.upstream.address = parsed.address;
        config.upstream.port = parsed.port;
    }

    for (i, url) in args.relays.iter().enumerate() {
        let mut relay = RelaySinkConfig::new(format!("relay-{}", i + 1), url.clone());
        if let Some(attempts) = args.max_reconnects {
            relay = relay.reconnect(ReconnectPolicy::default().with_max_attempts(attempts));
        }
        config.add_sink(SinkConfig::Relay(relay));
    }

    if let Some(ref bind) = args.serve {
        config.add_sink(SinkConfig::Server(ServerSinkConfig::new("server", bind.clone())));
    }

    if args.log_sink {
        config.add_sink(SinkConfig::Log(LogSinkConfig::new("log")));
    }

    if let Some(interval) = args.stats_interval {
        config.stats_interval_secs = interval;
    }
    if let Some(level) = log_level {
        config.log_level = level;
    }

    if config.sinks.is_empty() {
        return Err(ConfigError::Invalid(
            "No sinks configured (use --relay, --serve, --log-sink or --config)".into(),
        ));
    }
    config.validate()?;

    Ok(config)
}

/// Local sink consumer: logs game boundaries.
async fn log_sessions(name: String, mut rx: mpsc::UnboundedReceiver<Bytes>) {
    let mut tracker = ReplayTracker::new();
    let mut received = 0u64;

    while let Some(chunk) = rx.recv().await {
        received += chunk.len() as u64;
        for category in tracker.write(&chunk) {
            match category {
                EventCategory::SessionStart => info!("[{}] Game started", name),
                EventCategory::SessionEnd => {
                    info!("[{}] Game ended ({} received)", name, format_bytes(received))
                }
                EventCategory::StreamMetadata | EventCategory::Other => {}
            }
        }
    }
}

fn cmd_gen_config(output: PathBuf) -> Result<(), Box<dyn std::error::Error>> {
    let config = BridgeConfig {
        name: "example-bridge".into(),
        upstream: UpstreamConfig::default(),
        sinks: vec![
            SinkConfig::Relay(
                RelaySinkConfig::new("spectate", "wss://spectate.example.com/bridge")
                    .reconnect(ReconnectPolicy::default()),
            ),
            SinkConfig::Server(ServerSinkConfig::new("browsers", "0.0.0.0:9090")),
            SinkConfig::Log(LogSinkConfig::new("console")),
        ],
        ..Default::default()
    };

    let toml_str = config.to_toml()?;

    // Add comments
    let content = format!(
        r#"# Spectator Bridge Configuration
# Generated by spectator-bridge gen-config

{}
"#,
        toml_str
    );

    std::fs::write(&output, content)?;
    println!("Generated configuration file: {}", output.display());
    Ok(())
}

fn cmd_validate(config_path: PathBuf) -> Result<(), Box<dyn std::error::Error>> {
    match BridgeConfig::from_file(&config_path) {
        Ok(config) => {
            println!("Configuration valid!");
            println!();
            println!("Bridge: {}", config.name);
            println!(
                "Upstream: {}:{} (timeout {} ms)",
                config.upstream.address, config.upstream.port, config.upstream.connect_timeout_ms
            );
            println!("Sinks: {}", config.sinks.len());
            for (i, sink) in config.sinks.iter().enumerate() {
                match sink {
                    SinkConfig::Relay(relay) => println!(
                        "  [{}] {} -> {} (timeout {} ms, {} reconnect attempts)",
                        i,
                        relay.name,
                        relay.url,
                        relay.connect_timeout_ms,
                        relay.reconnect.max_attempts
                    ),
                    SinkConfig::Server(server) => {
                        println!("  [{}] {} (server on {})", i, server.name, server.bind)
                    }
                    SinkConfig::Log(log) => println!("  [{}] {} (log)", i, log.name),
                }
            }
            Ok(())
        }
        Err(e) => {
            eprintln!("Configuration invalid: {}", e);
            std::process::exit(1);
        }
    }
}

fn print_stats(stats: &[SinkStatsSnapshot]) {
    println!("--- Sink Statistics ---");
    for stat in stats {
        println!(
            "  {}: {} chunks, {} ({}/s), {} dropped, {} replays, {} reconnects",
            stat.name,
            stat.chunks_forwarded,
            format_bytes(stat.bytes_forwarded),
            format_bytes(stat.bytes_per_second() as u64),
            stat.chunks_dropped,
            stat.replays_sent,
            stat.reconnects
        );
    }
}

fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.1} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}
