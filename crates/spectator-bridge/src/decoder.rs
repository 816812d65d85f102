// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Raw event framing for the upstream stream.
//!
//! The bridge never interprets game data. It only needs to know where the
//! stream metadata, session start and session end events sit so that a sink
//! joining mid-session can be handed the prefix it is missing.
//!
//! [`SlpDecoder`] understands the Slippi raw command framing:
//!
//! ```text
//! 0x35 len (cmd size_hi size_lo)*   message sizes, len counts itself
//! cmd  payload[size(cmd)]           every other command
//! ```

use bytes::{Buf, Bytes, BytesMut};
use std::collections::HashMap;
use thiserror::Error;

/// Message sizes table, announces the payload size of every other command.
pub const CMD_MESSAGE_SIZES: u8 = 0x35;

/// First event of a game.
pub const CMD_GAME_START: u8 = 0x36;

/// Last event of a game.
pub const CMD_GAME_END: u8 = 0x39;

/// Decoding errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("Unknown command 0x{0:02x} (size not announced)")]
    UnknownCommand(u8),

    #[error("Malformed message sizes table: {0}")]
    MalformedSizes(String),
}

/// The only event categories the bridge cares about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventCategory {
    /// Stream metadata (the message sizes table).
    StreamMetadata,
    /// Session start.
    SessionStart,
    /// Session end.
    SessionEnd,
    /// Anything else.
    Other,
}

impl EventCategory {
    /// Classify a raw command byte.
    pub fn from_command(command: u8) -> Self {
        match command {
            CMD_MESSAGE_SIZES => Self::StreamMetadata,
            CMD_GAME_START => Self::SessionStart,
            CMD_GAME_END => Self::SessionEnd,
            _ => Self::Other,
        }
    }

    /// True for the categories that move session state.
    pub fn is_boundary(self) -> bool {
        !matches!(self, Self::Other)
    }
}

/// One complete raw event, command byte included.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawEvent {
    pub command: u8,
    pub category: EventCategory,
    pub payload: Bytes,
}

/// Incremental decoder turning stream chunks into raw events.
///
/// Chunk boundaries carry no meaning: an event may span several chunks and a
/// chunk may hold several events.
pub trait StreamDecoder: Send {
    /// Feed one chunk, pushing every event it completes into `out`.
    ///
    /// On error the events decoded before the fault are kept in `out`.
    fn feed(&mut self, chunk: &[u8], out: &mut Vec<RawEvent>) -> Result<(), DecodeError>;

    /// Drop any partial event and learned framing.
    fn reset(&mut self);
}

/// Decoder for the Slippi raw command stream.
#[derive(Debug, Default)]
pub struct SlpDecoder {
    buffer: BytesMut,
    sizes: Option<HashMap<u8, u16>>,
}

impl SlpDecoder {
    /// Create a decoder waiting for the first message sizes command.
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    fn pending(&self) -> usize {
        self.buffer.len()
    }

    fn parse_sizes(event: &[u8]) -> Result<HashMap<u8, u16>, DecodeError> {
        let len = event.get(1).copied().map(usize::from).unwrap_or(0);
        if len == 0 || (len - 1) % 3 != 0 {
            return Err(DecodeError::MalformedSizes(format!(
                "length byte {} is not 1 + 3n",
                len
            )));
        }

        Ok(event[2..]
            .chunks_exact(3)
            .map(|entry| (entry[0], u16::from_be_bytes([entry[1], entry[2]])))
            .collect())
    }
}

impl StreamDecoder for SlpDecoder {
    fn feed(&mut self, chunk: &[u8], out: &mut Vec<RawEvent>) -> Result<(), DecodeError> {
        self.buffer.extend_from_slice(chunk);

        loop {
            let Some(&command) = self.buffer.first() else {
                return Ok(());
            };

            let total = if command == CMD_MESSAGE_SIZES {
                match self.buffer.get(1) {
                    Some(&len) => 1 + usize::from(len),
                    None => return Ok(()),
                }
            } else if let Some(sizes) = &self.sizes {
                match sizes.get(&command) {
                    Some(&size) => 1 + usize::from(size),
                    None => {
                        self.reset();
                        return Err(DecodeError::UnknownCommand(command));
                    }
                }
            } else {
                // Nothing is decodable until the sizes are announced.
                let skip = self
                    .buffer
                    .iter()
                    .position(|&b| b == CMD_MESSAGE_SIZES)
                    .unwrap_or(self.buffer.len());
                self.buffer.advance(skip);
                continue;
            };

            if self.buffer.len() < total {
                return Ok(());
            }

            let payload = self.buffer.split_to(total).freeze();

            if command == CMD_MESSAGE_SIZES {
                match Self::parse_sizes(&payload) {
                    Ok(sizes) => self.sizes = Some(sizes),
                    Err(err) => {
                        self.reset();
                        return Err(err);
                    }
                }
            } else if command == CMD_GAME_END {
                // The next game announces a fresh table.
                self.sizes = None;
            }

            out.push(RawEvent {
                command,
                category: EventCategory::from_command(command),
                payload,
            });
        }
    }

    fn reset(&mut self) {
        self.buffer.clear();
        self.sizes = None;
    }
}
