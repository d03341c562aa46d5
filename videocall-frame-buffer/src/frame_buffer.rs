/*
 * Copyright 2025 Security Union LLC
 *
 * Licensed under either of
 *
 * * Apache License, Version 2.0
 *   (http://www.apache.org/licenses/LICENSE-2.0)
 * * MIT license
 *   (http://opensource.org/licenses/MIT)
 *
 * at your option.
 *
 * Unless you explicitly state otherwise, any contribution intentionally
 * submitted for inclusion in the work by you, as defined in the Apache-2.0
 * license, shall be dual licensed as above, without any additional terms or
 * conditions.
 */

//! The FrameBuffer, which assembles the packets of one frame and tracks its
//! readiness for decoding.

use serde::{Deserialize, Serialize};

use crate::config::FrameBufferConfig;
use crate::encoded_frame::{EncodedFrame, EncodedVideoData};
use crate::packet::{FrameType, Packet};
use crate::session::{SessionAssembler, SessionInsert};
use crate::session_info::SessionInfo;
use crate::{FrameBufferError, Result};

/// Lifecycle of a pooled frame buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FrameBufferState {
    /// Owned by the pool, not assembling anything.
    Free,
    /// Claimed for a frame, no media packet yet.
    Empty,
    Incomplete,
    Complete,
    /// Not complete, but enough is present to attempt a decode.
    Decodable,
    /// Handed to the decoder. Accepts no further packets.
    Decoding,
}

impl FrameBufferState {
    /// Whether a request to move from `self` to `target` is legal.
    ///
    /// Same-state requests and `Complete -> Decodable` are legal no-ops.
    pub fn can_transition_to(self, target: FrameBufferState) -> bool {
        use FrameBufferState::*;

        if self == target {
            return true;
        }
        matches!(
            (self, target),
            (_, Free)
                | (Free, Empty)
                | (Empty | Decoding, Incomplete)
                | (Empty | Incomplete | Decodable, Complete)
                | (Empty | Incomplete | Complete, Decodable)
                | (Complete | Incomplete | Decodable, Decoding)
        )
    }
}

/// Successful outcome of [`FrameBuffer::insert_packet`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InsertOutcome {
    /// Packet accepted (or ignored while decoding); frame not complete.
    Incomplete,
    /// This packet completed the frame.
    CompleteSession,
}

/// Assembles one frame from its packets.
///
/// A `FrameBuffer` is a pooled, reusable object. It starts out [`Free`], is
/// claimed by moving it to [`Empty`], collects packets, is handed to the
/// decoder via [`Decoding`] and returns to the pool through
/// [`reset`](Self::reset).
///
/// There is no internal synchronization: the owning pool must make sure a
/// single thread mutates a buffer during an assembly epoch.
///
/// [`Free`]: FrameBufferState::Free
/// [`Empty`]: FrameBufferState::Empty
/// [`Decoding`]: FrameBufferState::Decoding
#[derive(Debug, Clone)]
pub struct FrameBuffer<S = SessionInfo> {
    frame: EncodedFrame,
    session: S,
    state: FrameBufferState,
    /// Whether the pool's statistics already include this frame
    frame_counted: bool,
    nack_count: u16,
    latest_packet_time_ms: Option<i64>,
    config: FrameBufferConfig,
}

impl FrameBuffer<SessionInfo> {
    /// Create a free buffer backed by the default session assembler.
    pub fn new(config: FrameBufferConfig) -> Result<Self> {
        let session = SessionInfo::new(&config);
        Self::with_session(config, session)
    }
}

impl<S: SessionAssembler> FrameBuffer<S> {
    /// Create a free buffer that delegates packet placement to `session`.
    pub fn with_session(config: FrameBufferConfig, session: S) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            frame: EncodedFrame::new(),
            session,
            state: FrameBufferState::Free,
            frame_counted: false,
            nack_count: 0,
            latest_packet_time_ms: None,
            config,
        })
    }

    pub fn config(&self) -> &FrameBufferConfig {
        &self.config
    }

    pub fn state(&self) -> FrameBufferState {
        self.state
    }

    /// State and frame timestamp, read together under the pool's lookup lock.
    pub fn state_with_timestamp(&self) -> (FrameBufferState, Option<u32>) {
        (self.state, self.frame.timestamp())
    }

    pub fn timestamp(&self) -> Option<u32> {
        self.frame.timestamp()
    }

    pub fn length(&self) -> usize {
        self.frame.length()
    }

    pub fn capacity(&self) -> usize {
        self.frame.capacity()
    }

    /// Assembled payload. After the `Decoding` transition this is the
    /// decode-ready byte range.
    pub fn data(&self) -> &[u8] {
        self.frame.data()
    }

    pub fn encoded_frame(&self) -> &EncodedFrame {
        &self.frame
    }

    pub fn encoded_frame_mut(&mut self) -> &mut EncodedFrame {
        &mut self.frame
    }

    pub fn session(&self) -> &S {
        &self.session
    }

    /// Request a lifecycle transition.
    ///
    /// Moving to `Free` resets the buffer; moving to `Decoding` prepares the
    /// payload for the decoder and finalizes the frame metadata. Requests
    /// outside the transition table fail with
    /// [`FrameBufferError::IllegalTransition`] and change nothing.
    pub fn set_state(&mut self, target: FrameBufferState) -> Result<()> {
        let current = self.state;
        if current == target {
            return Ok(());
        }
        if !current.can_transition_to(target) {
            log::warn!("Illegal frame buffer transition {current:?} -> {target:?}");
            debug_assert!(
                !self.config.strict_transitions,
                "illegal frame buffer transition {current:?} -> {target:?}"
            );
            return Err(FrameBufferError::IllegalTransition {
                from: current,
                to: target,
            });
        }

        match target {
            FrameBufferState::Free => {
                self.reset();
                return Ok(());
            }
            // Complete frames are decodable; keep the stronger state.
            FrameBufferState::Decodable if current == FrameBufferState::Complete => return Ok(()),
            FrameBufferState::Decoding => self.restructure_frame_information(),
            _ => {}
        }

        log::debug!(
            "Frame {:?}: {current:?} -> {target:?}",
            self.frame.timestamp()
        );
        self.state = target;
        Ok(())
    }

    /// Add one packet to the frame.
    ///
    /// Rejected packets leave the frame exactly as it was, apart from capacity
    /// that may already have been reserved for them.
    ///
    /// Returns [`InsertOutcome::CompleteSession`] when the session is complete
    /// after this packet. If the buffer is `Complete` and a later packet leaves
    /// the session incomplete (another layer of the same frame started), the
    /// buffer drops back to `Incomplete`. A pool that already started decode
    /// preparation on the earlier completion must not keep feeding packets for
    /// that frame.
    pub fn insert_packet(
        &mut self,
        packet: &Packet<'_>,
        receive_time_ms: i64,
    ) -> Result<InsertOutcome> {
        match self.state {
            FrameBufferState::Decoding => {
                log::trace!(
                    "Ignoring packet seq={} for frame already in decoding",
                    packet.sequence_number
                );
                return Ok(InsertOutcome::Incomplete);
            }
            FrameBufferState::Free => {
                return Err(FrameBufferError::InvalidState(FrameBufferState::Free));
            }
            _ => {}
        }

        if let Some(frame_timestamp) = self.frame.timestamp() {
            if frame_timestamp != packet.timestamp {
                return Err(FrameBufferError::TimestampMismatch {
                    frame: frame_timestamp,
                    packet: packet.timestamp,
                });
            }
        }

        let required = self.frame.length()
            + packet.contribution_bytes(self.config.start_code_length_bytes);
        if required > self.config.max_frame_size_bytes {
            log::warn!(
                "Packet seq={} would grow frame ts={} to {required} bytes",
                packet.sequence_number,
                packet.timestamp
            );
            return Err(FrameBufferError::FrameTooLarge {
                required,
                limit: self.config.max_frame_size_bytes,
            });
        }
        if packet.payload.is_none() && packet.size_bytes > 0 {
            return Err(FrameBufferError::MissingPayload(packet.size_bytes));
        }

        self.frame.ensure_capacity(required, &self.config)?;

        let length_before = self.frame.length();
        let appended = match self.session.insert_packet(packet, self.frame.data_mut()) {
            SessionInsert::Appended(bytes) => bytes,
            SessionInsert::Duplicate => {
                log::debug!(
                    "Discarding duplicate packet: seq={}, ts={}",
                    packet.sequence_number,
                    packet.timestamp
                );
                return Err(FrameBufferError::DuplicatePacket(packet.sequence_number));
            }
            SessionInsert::Rejected(reason) => {
                log::warn!(
                    "Session rejected packet seq={}: {reason}",
                    packet.sequence_number
                );
                return Err(FrameBufferError::SessionRejected {
                    sequence_number: packet.sequence_number,
                    reason,
                });
            }
        };
        debug_assert_eq!(self.frame.length(), length_before + appended);

        if packet.frame_type.is_media() && !self.session.have_start_sequence_number() {
            self.session
                .set_start_sequence_number(packet.sequence_number);
        }
        if packet.payload.is_some() {
            self.frame.set_payload_type(packet.payload_type);
        }
        if self.state == FrameBufferState::Empty {
            self.frame.set_timestamp(packet.timestamp);
            self.frame.set_codec(packet.codec);
            if packet.frame_type.is_media() {
                self.set_state(FrameBufferState::Incomplete)?;
            }
        }
        self.latest_packet_time_ms = Some(receive_time_ms);

        log::trace!(
            "Inserted packet seq={} ts={} (+{appended} bytes, length {})",
            packet.sequence_number,
            packet.timestamp,
            self.frame.length()
        );

        if self.session.is_session_complete() {
            log::debug!("Frame ts={} complete", packet.timestamp);
            return Ok(InsertOutcome::CompleteSession);
        }
        if self.state == FrameBufferState::Complete {
            self.demote_to_incomplete();
        }
        Ok(InsertOutcome::Incomplete)
    }

    /// The only state change outside the transition table: a complete layer
    /// followed by a packet of another, not yet complete, layer.
    fn demote_to_incomplete(&mut self) {
        debug_assert_eq!(self.state, FrameBufferState::Complete);
        log::debug!(
            "Frame {:?} waiting for remaining layers, back to Incomplete",
            self.frame.timestamp()
        );
        self.state = FrameBufferState::Incomplete;
    }

    /// Receive time of the most recently inserted packet
    pub fn latest_packet_time_ms(&self) -> Option<i64> {
        self.latest_packet_time_ms
    }

    pub fn increment_nack_count(&mut self) {
        self.nack_count = self.nack_count.saturating_add(1);
    }

    pub fn nack_count(&self) -> u16 {
        self.nack_count
    }

    pub fn set_frame_counted(&mut self, frame_counted: bool) {
        self.frame_counted = frame_counted;
    }

    pub fn frame_counted(&self) -> bool {
        self.frame_counted
    }

    /// Clear every entry of `list` up to and including this frame's lowest
    /// sequence number, along with packets the frame already holds.
    pub fn zero_out_seq_num(&mut self, list: &mut [Option<u16>]) -> Result<usize> {
        self.session.zero_out_seq_num(list)
    }

    /// Hybrid NACK/FEC variant of [`zero_out_seq_num`](Self::zero_out_seq_num).
    pub fn zero_out_seq_num_hybrid(
        &mut self,
        list: &mut [Option<u16>],
        rtt_score: f32,
    ) -> Result<usize> {
        self.session.zero_out_seq_num_hybrid(list, rtt_score)
    }

    pub fn frame_type(&self) -> FrameType {
        self.session.frame_type()
    }

    pub fn set_previous_frame_loss(&mut self) {
        self.session.set_previous_frame_loss();
    }

    pub fn low_sequence_number(&self) -> Option<u16> {
        self.session.low_sequence_number()
    }

    pub fn high_sequence_number(&self) -> Option<u16> {
        self.session.high_sequence_number()
    }

    pub fn is_session_complete(&self) -> bool {
        self.session.is_session_complete()
    }

    pub fn is_retransmitted(&self) -> bool {
        self.session.is_retransmitted()
    }

    pub fn have_last_packet(&self) -> bool {
        self.session.have_last_packet()
    }

    /// Treat the last packet as received. Returns whether the frame is now
    /// complete.
    pub fn force_set_have_last_packet(&mut self) -> bool {
        self.session.force_set_have_last_packet();
        self.session.is_session_complete()
    }

    /// Discard undecodable leading packets so a stalled frame can be decoded.
    /// Returns the bytes removed. Completeness may change; check it again.
    pub fn make_session_decodable(&mut self) -> usize {
        let length_before = self.frame.length();
        let trimmed = self.session.make_session_decodable(self.frame.data_mut());
        debug_assert_eq!(self.frame.length() + trimmed, length_before);
        trimmed
    }

    /// Populate the frame from a stored record, bypassing packet assembly.
    ///
    /// The replayed bytes no longer match any packets the session placed, so
    /// the session and the per-packet bookkeeping are cleared. The state is
    /// left as it is.
    pub fn extract_from_storage(&mut self, record: &EncodedVideoData) -> Result<()> {
        self.frame.copy_from_storage(record, &self.config)?;
        self.session.reset();
        self.nack_count = 0;
        self.latest_packet_time_ms = None;
        Ok(())
    }

    /// Return the buffer to `Free`, clearing the frame and the session.
    pub fn reset(&mut self) {
        log::debug!(
            "Resetting frame buffer ts={:?} state={:?}",
            self.frame.timestamp(),
            self.state
        );
        self.frame.reset();
        self.session.reset();
        self.frame_counted = false;
        self.nack_count = 0;
        self.latest_packet_time_ms = None;
        self.state = FrameBufferState::Free;
    }

    fn restructure_frame_information(&mut self) {
        let codec = self.frame.codec();
        let length = self
            .session
            .prepare_for_decode(self.frame.data_mut(), codec);
        self.frame.data_mut().truncate(length);

        let frame_type = self.session.frame_type();
        let complete = self.session.is_session_complete();
        let missing = self.session.previous_frame_loss();
        self.frame.set_decode_info(frame_type, complete, missing);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::packet::VideoCodec;
    use FrameBufferState::*;

    const ALL_STATES: [FrameBufferState; 6] =
        [Free, Empty, Incomplete, Complete, Decodable, Decoding];

    /// A scripted session assembler. Appends payloads in arrival order and
    /// reports whatever completeness the test sets.
    #[derive(Debug, Default, Clone)]
    struct MockSession {
        seen: Vec<u16>,
        start_sequence_number: Option<u16>,
        complete: bool,
        reject: bool,
        previous_frame_loss: bool,
        last_packet: bool,
        decode_length: Option<usize>,
        resets: usize,
    }

    impl SessionAssembler for MockSession {
        fn frame_type(&self) -> FrameType {
            FrameType::Key
        }
        fn set_previous_frame_loss(&mut self) {
            self.previous_frame_loss = true;
        }
        fn previous_frame_loss(&self) -> bool {
            self.previous_frame_loss
        }
        fn low_sequence_number(&self) -> Option<u16> {
            self.seen.iter().copied().min()
        }
        fn high_sequence_number(&self) -> Option<u16> {
            self.seen.iter().copied().max()
        }
        fn is_session_complete(&self) -> bool {
            self.complete
        }
        fn have_start_sequence_number(&self) -> bool {
            self.start_sequence_number.is_some()
        }
        fn set_start_sequence_number(&mut self, sequence_number: u16) {
            self.start_sequence_number = Some(sequence_number);
        }
        fn insert_packet(&mut self, packet: &Packet<'_>, buffer: &mut Vec<u8>) -> SessionInsert {
            if self.reject {
                return SessionInsert::Rejected("scripted".to_string());
            }
            if self.seen.contains(&packet.sequence_number) {
                return SessionInsert::Duplicate;
            }
            self.seen.push(packet.sequence_number);
            let payload = packet.payload.unwrap_or_default();
            buffer.extend_from_slice(payload);
            SessionInsert::Appended(payload.len())
        }
        fn zero_out_seq_num(&mut self, list: &mut [Option<u16>]) -> Result<usize> {
            let before = list.iter().flatten().count();
            list.iter_mut().for_each(|entry| *entry = None);
            Ok(before)
        }
        fn zero_out_seq_num_hybrid(
            &mut self,
            list: &mut [Option<u16>],
            _rtt_score: f32,
        ) -> Result<usize> {
            self.zero_out_seq_num(list)
        }
        fn have_last_packet(&self) -> bool {
            self.last_packet
        }
        fn force_set_have_last_packet(&mut self) {
            self.last_packet = true;
            self.complete = true;
        }
        fn is_retransmitted(&self) -> bool {
            false
        }
        fn make_session_decodable(&mut self, buffer: &mut Vec<u8>) -> usize {
            let trimmed = buffer.len().min(1);
            buffer.drain(..trimmed);
            trimmed
        }
        fn prepare_for_decode(&mut self, buffer: &mut Vec<u8>, _codec: VideoCodec) -> usize {
            if let Some(length) = self.decode_length {
                buffer.truncate(length);
            }
            buffer.len()
        }
        fn reset(&mut self) {
            *self = MockSession {
                resets: self.resets + 1,
                ..Default::default()
            };
        }
    }

    fn small_config() -> FrameBufferConfig {
        FrameBufferConfig {
            max_frame_size_bytes: 1000,
            buffer_increment_bytes: 100,
            ..Default::default()
        }
    }

    fn create_test_buffer() -> FrameBuffer<MockSession> {
        FrameBuffer::with_session(small_config(), MockSession::default()).unwrap()
    }

    fn claimed_buffer() -> FrameBuffer<MockSession> {
        let mut fb = create_test_buffer();
        fb.set_state(Empty).unwrap();
        fb
    }

    #[test]
    fn test_new_buffer_is_free() {
        let fb = FrameBuffer::new(FrameBufferConfig::default()).unwrap();
        assert_eq!(fb.state(), Free);
        assert_eq!(fb.length(), 0);
        assert_eq!(fb.nack_count(), 0);
        assert_eq!(fb.latest_packet_time_ms(), None);
        assert_eq!(fb.state_with_timestamp(), (Free, None));
    }

    #[test]
    fn test_new_rejects_invalid_config() {
        let config = FrameBufferConfig {
            buffer_increment_bytes: 0,
            ..Default::default()
        };
        assert!(matches!(
            FrameBuffer::new(config),
            Err(FrameBufferError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_insert_into_free_buffer_is_state_error() {
        let mut fb = create_test_buffer();
        let data = [1u8; 10];
        let err = fb
            .insert_packet(&Packet::new(1, 1000, FrameType::Key, &data), 5)
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::StateError);
        assert_eq!(fb.state(), Free);
        assert_eq!(fb.length(), 0);
        assert_eq!(fb.timestamp(), None);
        assert_eq!(fb.latest_packet_time_ms(), None);
        assert!(fb.session.seen.is_empty());
    }

    #[test]
    fn test_transition_table() {
        for from in ALL_STATES {
            for to in ALL_STATES {
                let mut fb = create_test_buffer();
                fb.state = from;
                let result = fb.set_state(to);

                let legal = from == to
                    || matches!(
                        (from, to),
                        (_, Free)
                            | (Free, Empty)
                            | (Empty, Incomplete)
                            | (Decoding, Incomplete)
                            | (Empty, Complete)
                            | (Incomplete, Complete)
                            | (Decodable, Complete)
                            | (Empty, Decodable)
                            | (Incomplete, Decodable)
                            | (Complete, Decodable)
                            | (Complete, Decoding)
                            | (Incomplete, Decoding)
                            | (Decodable, Decoding)
                    );
                assert_eq!(result.is_ok(), legal, "{from:?} -> {to:?}");
                assert_eq!(from.can_transition_to(to), legal, "{from:?} -> {to:?}");

                let expected = match (legal, from, to) {
                    (false, _, _) => from,
                    (true, Complete, Decodable) => Complete,
                    _ => to,
                };
                assert_eq!(fb.state(), expected, "{from:?} -> {to:?}");

                if let Err(err) = result {
                    assert_eq!(err.kind(), ErrorKind::ContractViolation);
                }
            }
        }
    }

    #[test]
    fn test_decoding_from_empty_is_contract_violation() {
        let mut fb = claimed_buffer();
        assert_eq!(
            fb.set_state(Decoding),
            Err(FrameBufferError::IllegalTransition {
                from: Empty,
                to: Decoding
            })
        );
        assert_eq!(fb.state(), Empty);
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "illegal frame buffer transition")]
    fn test_strict_mode_panics_in_debug() {
        let config = FrameBufferConfig {
            strict_transitions: true,
            ..small_config()
        };
        let mut fb = FrameBuffer::with_session(config, MockSession::default()).unwrap();
        let _ = fb.set_state(Decoding);
    }

    #[test]
    fn test_first_media_packet_claims_frame() {
        let mut fb = claimed_buffer();
        let data = [1u8; 10];
        let packet = Packet::new(100, 1000, FrameType::Key, &data)
            .with_codec(VideoCodec::VP8)
            .with_payload_type(96);

        assert_eq!(fb.insert_packet(&packet, 42), Ok(InsertOutcome::Incomplete));
        assert_eq!(fb.state(), Incomplete);
        assert_eq!(fb.timestamp(), Some(1000));
        assert_eq!(fb.encoded_frame().codec(), VideoCodec::VP8);
        assert_eq!(fb.encoded_frame().payload_type(), 96);
        assert_eq!(fb.length(), 10);
        assert_eq!(fb.latest_packet_time_ms(), Some(42));
        assert_eq!(fb.session.start_sequence_number, Some(100));
    }

    #[test]
    fn test_empty_packet_sets_timestamp_but_stays_empty() {
        let mut fb = claimed_buffer();
        assert_eq!(
            fb.insert_packet(&Packet::empty(7, 2000), 1),
            Ok(InsertOutcome::Incomplete)
        );
        assert_eq!(fb.state(), Empty);
        assert_eq!(fb.timestamp(), Some(2000));
        assert_eq!(fb.session.start_sequence_number, None);
        // No payload, so the payload type is left alone.
        assert_eq!(fb.encoded_frame().payload_type(), 0);

        let data = [1u8; 4];
        fb.insert_packet(&Packet::new(8, 2000, FrameType::Delta, &data), 2)
            .unwrap();
        assert_eq!(fb.state(), Incomplete);
        assert_eq!(fb.session.start_sequence_number, Some(8));
    }

    #[test]
    fn test_timestamp_mismatch_leaves_buffer_untouched() {
        let mut fb = claimed_buffer();
        let data = [1u8; 10];
        fb.insert_packet(&Packet::new(1, 1000, FrameType::Key, &data), 10)
            .unwrap();

        let err = fb
            .insert_packet(&Packet::new(2, 2000, FrameType::Key, &data), 20)
            .unwrap_err();
        assert_eq!(
            err,
            FrameBufferError::TimestampMismatch {
                frame: 1000,
                packet: 2000
            }
        );
        assert_eq!(err.kind(), ErrorKind::TimeStampError);
        assert_eq!(fb.length(), 10);
        assert_eq!(fb.latest_packet_time_ms(), Some(10));
        assert_eq!(fb.session.seen, vec![1]);
    }

    #[test]
    fn test_duplicate_packet() {
        let mut fb = claimed_buffer();
        let data = [1u8; 10];
        let packet = Packet::new(1, 1000, FrameType::Key, &data);
        fb.insert_packet(&packet, 10).unwrap();

        let err = fb.insert_packet(&packet, 20).unwrap_err();
        assert_eq!(err, FrameBufferError::DuplicatePacket(1));
        assert_eq!(err.kind(), ErrorKind::DuplicatePacket);
        assert_eq!(fb.length(), 10);
        assert_eq!(fb.latest_packet_time_ms(), Some(10));
    }

    #[test]
    fn test_missing_payload_is_size_error() {
        let mut fb = claimed_buffer();
        let packet = Packet {
            size_bytes: 20,
            ..Packet::empty(1, 1000)
        };
        let err = fb.insert_packet(&packet, 1).unwrap_err();
        assert_eq!(err, FrameBufferError::MissingPayload(20));
        assert_eq!(err.kind(), ErrorKind::SizeError);
        assert_eq!(fb.timestamp(), None);
    }

    #[test]
    fn test_oversized_frame_is_rejected() {
        let mut fb = claimed_buffer();
        let data = [1u8; 600];
        fb.insert_packet(&Packet::new(1, 1000, FrameType::Key, &data), 1)
            .unwrap();
        let capacity = fb.capacity();
        assert_eq!(capacity, 700);

        let err = fb
            .insert_packet(&Packet::new(2, 1000, FrameType::Key, &data), 2)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::SizeError);
        assert_eq!(fb.capacity(), capacity);
        assert_eq!(fb.length(), 600);
    }

    #[test]
    fn test_start_code_counts_towards_limit() {
        let mut fb = claimed_buffer();
        let data = [1u8; 998];
        let packet = Packet::new(1, 1000, FrameType::Key, &data).with_start_code();
        assert_eq!(
            fb.insert_packet(&packet, 1),
            Err(FrameBufferError::FrameTooLarge {
                required: 1002,
                limit: 1000
            })
        );
    }

    #[test]
    fn test_growth_past_max_capacity_is_rejected() {
        // 1000 bytes fit under the frame limit, but capacity must exceed the
        // projected length and 1100 is past the maximum.
        let mut fb = claimed_buffer();
        let data = [1u8; 1000];
        let err = fb
            .insert_packet(&Packet::new(1, 1000, FrameType::Key, &data), 1)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::SizeError);
        assert_eq!(fb.capacity(), 0);
        assert_eq!(fb.state(), Empty);
    }

    #[test]
    fn test_capacity_invariants_hold_while_growing() {
        let mut fb = claimed_buffer();
        let data = [1u8; 37];
        for seq in 0..40u16 {
            let result =
                fb.insert_packet(&Packet::new(seq, 1000, FrameType::Delta, &data), seq as i64);
            let capacity = fb.capacity();
            assert_eq!(capacity % 100, 0);
            assert!(capacity >= fb.length());
            assert!(capacity <= 1000);
            if let Err(err) = result {
                assert_eq!(err.kind(), ErrorKind::SizeError);
            }
        }
        assert_eq!(fb.length(), 37 * 27);
        assert_eq!(fb.capacity(), 1000);
    }

    #[test]
    fn test_session_rejection_commits_nothing() {
        let mut fb = claimed_buffer();
        fb.session.reject = true;
        let data = [1u8; 10];
        let err = fb
            .insert_packet(&Packet::new(1, 1000, FrameType::Key, &data).with_payload_type(96), 3)
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::SizeError);
        assert_eq!(fb.state(), Empty);
        assert_eq!(fb.timestamp(), None);
        assert_eq!(fb.encoded_frame().payload_type(), 0);
        assert_eq!(fb.latest_packet_time_ms(), None);
        assert_eq!(fb.session.start_sequence_number, None);
    }

    #[test]
    fn test_duplicate_does_not_record_start_sequence_number() {
        let mut fb = claimed_buffer();
        let data = [1u8; 10];
        fb.insert_packet(&Packet::empty(3, 1000), 1).unwrap();
        fb.session.seen.push(4);

        let err = fb
            .insert_packet(&Packet::new(4, 1000, FrameType::Key, &data), 2)
            .unwrap_err();
        assert_eq!(err, FrameBufferError::DuplicatePacket(4));
        assert_eq!(fb.session.start_sequence_number, None);
    }

    #[test]
    fn test_complete_session_then_layer_demotion() {
        let mut fb = claimed_buffer();
        let data = [1u8; 10];

        fb.insert_packet(&Packet::new(1, 1000, FrameType::Key, &data), 1)
            .unwrap();
        fb.session.complete = true;
        assert_eq!(
            fb.insert_packet(&Packet::new(2, 1000, FrameType::Key, &data), 2),
            Ok(InsertOutcome::CompleteSession)
        );
        fb.set_state(Complete).unwrap();

        // Another layer of the same frame begins.
        fb.session.complete = false;
        assert_eq!(
            fb.insert_packet(&Packet::new(3, 1000, FrameType::Key, &data), 3),
            Ok(InsertOutcome::Incomplete)
        );
        assert_eq!(fb.state(), Incomplete);

        fb.session.complete = true;
        assert_eq!(
            fb.insert_packet(&Packet::new(4, 1000, FrameType::Key, &data), 4),
            Ok(InsertOutcome::CompleteSession)
        );
    }

    #[test]
    fn test_decoding_buffer_ignores_packets() {
        let mut fb = claimed_buffer();
        let data = [1u8; 10];
        fb.insert_packet(&Packet::new(1, 1000, FrameType::Key, &data), 1)
            .unwrap();
        fb.set_state(Decoding).unwrap();

        assert_eq!(
            fb.insert_packet(&Packet::new(2, 1000, FrameType::Key, &data), 2),
            Ok(InsertOutcome::Incomplete)
        );
        // Even a packet from another frame is ignored rather than rejected.
        assert_eq!(
            fb.insert_packet(&Packet::new(3, 5000, FrameType::Key, &data), 3),
            Ok(InsertOutcome::Incomplete)
        );
        assert_eq!(fb.length(), 10);
        assert_eq!(fb.latest_packet_time_ms(), Some(1));
    }

    #[test]
    fn test_decoding_finalizes_frame_information() {
        let mut fb = claimed_buffer();
        let data = [1u8; 10];
        fb.insert_packet(&Packet::new(1, 1000, FrameType::Key, &data), 1)
            .unwrap();
        fb.set_previous_frame_loss();
        fb.session.decode_length = Some(6);

        fb.set_state(Decoding).unwrap();

        let frame = fb.encoded_frame();
        assert_eq!(frame.length(), 6);
        assert_eq!(frame.frame_type(), FrameType::Key);
        assert!(!frame.is_complete_frame());
        assert!(frame.is_missing_frame());
    }

    #[test]
    fn test_make_session_decodable_shrinks_length() {
        let mut fb = claimed_buffer();
        let data = [1u8; 10];
        fb.insert_packet(&Packet::new(1, 1000, FrameType::Key, &data), 1)
            .unwrap();
        assert_eq!(fb.make_session_decodable(), 1);
        assert_eq!(fb.length(), 9);
    }

    #[test]
    fn test_force_set_have_last_packet_reports_completeness() {
        let mut fb = claimed_buffer();
        assert!(!fb.have_last_packet());
        assert!(fb.force_set_have_last_packet());
        assert!(fb.have_last_packet());
    }

    #[test]
    fn test_nack_count() {
        let mut fb = claimed_buffer();
        for expected in 1..=5 {
            fb.increment_nack_count();
            assert_eq!(fb.nack_count(), expected);
        }
        fb.reset();
        assert_eq!(fb.nack_count(), 0);
    }

    #[test]
    fn test_nack_list_delegation() {
        let mut fb = claimed_buffer();
        let mut list = vec![Some(1), None, Some(3)];
        assert_eq!(fb.zero_out_seq_num(&mut list), Ok(2));
        assert!(list.iter().all(Option::is_none));
    }

    #[test]
    fn test_reset_clears_everything() {
        let mut fb = claimed_buffer();
        let data = [1u8; 10];
        fb.insert_packet(&Packet::new(1, 1000, FrameType::Key, &data), 1)
            .unwrap();
        fb.increment_nack_count();
        fb.set_frame_counted(true);

        fb.set_state(Free).unwrap();

        assert_eq!(fb.state(), Free);
        assert_eq!(fb.length(), 0);
        assert_eq!(fb.timestamp(), None);
        assert_eq!(fb.nack_count(), 0);
        assert!(!fb.frame_counted());
        assert_eq!(fb.latest_packet_time_ms(), None);
        assert_eq!(fb.session.resets, 1);
        assert!(fb.session.seen.is_empty());
    }

    #[test]
    fn test_extract_from_storage() {
        let mut fb = create_test_buffer();
        let record = EncodedVideoData {
            frame_type: FrameType::Key,
            timestamp: 3000,
            payload_type: 100,
            encoded_width: 320,
            encoded_height: 240,
            missing_frame: true,
            complete_frame: false,
            render_time_ms: 77,
            codec: VideoCodec::H264,
            payload: vec![9; 150],
        };

        fb.extract_from_storage(&record).unwrap();
        assert_eq!(fb.length(), 150);
        assert_eq!(fb.capacity(), 200);
        assert_eq!(fb.timestamp(), Some(3000));
        assert_eq!(fb.encoded_frame().render_time_ms(), 77);
        assert!(fb.encoded_frame().is_missing_frame());
        assert_eq!(fb.state(), Free);
        assert_eq!(fb.session.resets, 1);

        let huge = EncodedVideoData {
            payload: vec![0; 5000],
            ..record
        };
        let err = fb.extract_from_storage(&huge).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MemoryError);
        assert_eq!(fb.length(), 150);
        assert_eq!(fb.session.resets, 1);
    }

    #[test]
    fn test_extract_from_storage_clears_packet_bookkeeping() {
        let mut fb = claimed_buffer();
        let data = [1u8; 10];
        fb.insert_packet(&Packet::new(5, 3000, FrameType::Key, &data), 10)
            .unwrap();
        fb.increment_nack_count();

        let record = EncodedVideoData {
            timestamp: 3000,
            payload: vec![9],
            ..Default::default()
        };
        fb.extract_from_storage(&record).unwrap();

        assert_eq!(fb.state(), Incomplete);
        assert_eq!(fb.length(), 1);
        assert_eq!(fb.nack_count(), 0);
        assert_eq!(fb.latest_packet_time_ms(), None);
        assert!(fb.session.seen.is_empty());
    }

    #[test]
    fn test_clone_is_independent() {
        let mut fb = claimed_buffer();
        let data = [1u8; 10];
        fb.insert_packet(&Packet::new(1, 1000, FrameType::Key, &data), 1)
            .unwrap();

        let copy = fb.clone();
        fb.reset();

        assert_eq!(copy.state(), Incomplete);
        assert_eq!(copy.length(), 10);
        assert_eq!(copy.capacity(), 100);
        assert_eq!(copy.data(), &data[..]);
    }
}
