// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Session replay tracking.
//!
//! [`SessionTracker`] keeps the minimal prefix a sink needs to resume
//! interpreting an in-progress session: the last stream metadata event and,
//! while a session is running, its start event. [`ReplayTracker`] pairs it
//! with a [`StreamDecoder`] so it can be fed raw chunks.

use crate::decoder::{EventCategory, RawEvent, SlpDecoder, StreamDecoder};
use bytes::{Bytes, BytesMut};
use thiserror::Error;

/// Session tracking errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TrackerError {
    #[error("Session start received without stream metadata")]
    StartWithoutMetadata,
}

/// Replayable state of the current session.
///
/// `start` is never set while `metadata` is unset.
#[derive(Debug, Clone, Default)]
pub struct SessionTracker {
    metadata: Option<Bytes>,
    start: Option<Bytes>,
}

impl SessionTracker {
    /// Create an empty tracker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply one categorized event.
    ///
    /// A session start without metadata is rejected and leaves the state
    /// untouched.
    pub fn observe(&mut self, category: EventCategory, payload: Bytes) -> Result<(), TrackerError> {
        match category {
            EventCategory::StreamMetadata => {
                self.metadata = Some(payload);
                self.start = None;
            }
            EventCategory::SessionStart => {
                if self.metadata.is_none() {
                    return Err(TrackerError::StartWithoutMetadata);
                }
                self.start = Some(payload);
            }
            EventCategory::SessionEnd => {
                self.start = None;
            }
            EventCategory::Other => {}
        }
        Ok(())
    }

    /// Current stream metadata, if any.
    pub fn metadata(&self) -> Option<&Bytes> {
        self.metadata.as_ref()
    }

    /// Start event of the running session, if any.
    pub fn session_start(&self) -> Option<&Bytes> {
        self.start.as_ref()
    }

    /// True between a session start and its end.
    pub fn in_session(&self) -> bool {
        self.start.is_some()
    }

    /// Concatenation of the present fields, `None` if there is nothing to
    /// replay.
    pub fn replay_payload(&self) -> Option<Bytes> {
        match (&self.metadata, &self.start) {
            (None, _) => None,
            (Some(metadata), None) => Some(metadata.clone()),
            (Some(metadata), Some(start)) => {
                let mut payload = BytesMut::with_capacity(metadata.len() + start.len());
                payload.extend_from_slice(metadata);
                payload.extend_from_slice(start);
                Some(payload.freeze())
            }
        }
    }
}

/// Decoder plus session tracker, fed with raw chunks in arrival order.
pub struct ReplayTracker {
    decoder: Box<dyn StreamDecoder>,
    session: SessionTracker,
    scratch: Vec<RawEvent>,
}

impl Default for ReplayTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ReplayTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReplayTracker")
            .field("session", &self.session)
            .finish_non_exhaustive()
    }
}

impl ReplayTracker {
    /// Tracker using the Slippi raw framing.
    pub fn new() -> Self {
        Self::with_decoder(Box::new(SlpDecoder::new()))
    }

    /// Tracker using a custom decoder.
    pub fn with_decoder(decoder: Box<dyn StreamDecoder>) -> Self {
        Self {
            decoder,
            session: SessionTracker::new(),
            scratch: Vec::new(),
        }
    }

    /// Feed one chunk.
    ///
    /// Returns the boundary categories the chunk completed, in order. Decode
    /// and ordering faults are logged and do not stop tracking.
    pub fn write(&mut self, chunk: &[u8]) -> Vec<EventCategory> {
        if let Err(err) = self.decoder.feed(chunk, &mut self.scratch) {
            tracing::warn!("Stream decode error, resynchronizing: {}", err);
        }

        let mut boundaries = Vec::new();
        for event in self.scratch.drain(..) {
            if !event.category.is_boundary() {
                continue;
            }
            match self.session.observe(event.category, event.payload) {
                Ok(()) => boundaries.push(event.category),
                Err(err) => tracing::warn!("Ignoring event 0x{:02x}: {}", event.command, err),
            }
        }
        boundaries
    }

    /// Current session state.
    pub fn session(&self) -> &SessionTracker {
        &self.session
    }

    /// See [`SessionTracker::replay_payload`].
    pub fn replay_payload(&self) -> Option<Bytes> {
        self.session.replay_payload()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoder::fixtures::*;

    fn bytes(b: &[u8]) -> Bytes {
        Bytes::copy_from_slice(b)
    }

    #[test]
    fn test_empty_tracker_has_nothing_to_replay() {
        let tracker = SessionTracker::new();
        assert!(tracker.replay_payload().is_none());
        assert!(!tracker.in_session());
    }

    #[test]
    fn test_replay_sequence() {
        let mut tracker = SessionTracker::new();

        tracker
            .observe(EventCategory::StreamMetadata, bytes(b"m1"))
            .expect("metadata");
        tracker
            .observe(EventCategory::SessionStart, bytes(b"s1"))
            .expect("start");
        assert_eq!(tracker.replay_payload(), Some(bytes(b"m1s1")));
        assert!(tracker.in_session());

        // Session end keeps metadata for the idle period
        tracker
            .observe(EventCategory::SessionEnd, bytes(b"e1"))
            .expect("end");
        assert_eq!(tracker.replay_payload(), Some(bytes(b"m1")));

        // New metadata replaces the old one
        tracker
            .observe(EventCategory::StreamMetadata, bytes(b"m2"))
            .expect("metadata");
        assert_eq!(tracker.replay_payload(), Some(bytes(b"m2")));
    }

    #[test]
    fn test_metadata_clears_stale_start() {
        let mut tracker = SessionTracker::new();
        tracker
            .observe(EventCategory::StreamMetadata, bytes(b"m1"))
            .expect("metadata");
        tracker
            .observe(EventCategory::SessionStart, bytes(b"s1"))
            .expect("start");
        tracker
            .observe(EventCategory::StreamMetadata, bytes(b"m2"))
            .expect("metadata");

        assert!(tracker.session_start().is_none());
        assert_eq!(tracker.replay_payload(), Some(bytes(b"m2")));
    }

    #[test]
    fn test_start_without_metadata_rejected() {
        let mut tracker = SessionTracker::new();
        let err = tracker
            .observe(EventCategory::SessionStart, bytes(b"s1"))
            .unwrap_err();
        assert_eq!(err, TrackerError::StartWithoutMetadata);
        assert!(tracker.replay_payload().is_none());
    }

    #[test]
    fn test_other_events_ignored() {
        let mut tracker = SessionTracker::new();
        tracker
            .observe(EventCategory::Other, bytes(b"x"))
            .expect("other");
        assert!(tracker.metadata().is_none());
    }

    #[test]
    fn test_replay_tracker_from_raw_chunks() {
        let mut tracker = ReplayTracker::new();

        let boundaries = tracker.write(&[message_sizes(), game_start(), frame(1)].concat());
        assert_eq!(
            boundaries,
            vec![EventCategory::StreamMetadata, EventCategory::SessionStart]
        );

        let expected = [message_sizes(), game_start()].concat();
        assert_eq!(
            tracker.replay_payload().as_deref(),
            Some(expected.as_slice())
        );

        tracker.write(&[frame(2), game_end()].concat());
        assert_eq!(
            tracker.replay_payload().as_deref(),
            Some(message_sizes().as_slice())
        );
    }
}
