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

//! The interface between a frame buffer and the packet assembler it delegates to.

use crate::packet::{FrameType, Packet, VideoCodec};
use crate::Result;

/// Outcome of handing one packet to a session assembler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionInsert {
    /// Packet placed; this many bytes were added to the buffer.
    Appended(usize),
    /// The session already holds this packet. Buffer untouched.
    Duplicate,
    /// The packet cannot be placed. Buffer untouched.
    Rejected(String),
}

/// A missing in-frame packet that a hybrid NACK pass is deciding about.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NackCandidate {
    pub sequence_number: u16,
    /// Frame type of the session so far
    pub frame_type: FrameType,
    /// Packets the session has received
    pub packets_received: usize,
    /// Whether the last packet of the frame has arrived
    pub have_last_packet: bool,
}

/// Decides whether a missing packet is still worth a retransmission request.
pub trait NackPolicy {
    fn should_nack(&self, candidate: &NackCandidate, rtt_score: f32) -> bool;
}

impl<F> NackPolicy for F
where
    F: Fn(&NackCandidate, f32) -> bool,
{
    fn should_nack(&self, candidate: &NackCandidate, rtt_score: f32) -> bool {
        self(candidate, rtt_score)
    }
}

/// Policy that requests every missing media packet regardless of RTT.
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysNack;

impl NackPolicy for AlwaysNack {
    fn should_nack(&self, _candidate: &NackCandidate, _rtt_score: f32) -> bool {
        true
    }
}

/// Places packet bytes into a frame buffer and judges the completeness of the
/// frame they belong to.
///
/// Implementations own all packet-level knowledge of one frame. The frame
/// buffer owns the byte storage and hands it in for each call; an
/// implementation must only insert into or trim `buffer`, and must report the
/// exact number of bytes it added or removed.
pub trait SessionAssembler {
    fn frame_type(&self) -> FrameType;

    /// Mark that a frame this one depends on was lost.
    fn set_previous_frame_loss(&mut self);

    fn previous_frame_loss(&self) -> bool;

    /// Lowest sequence number held, `None` when empty
    fn low_sequence_number(&self) -> Option<u16>;

    /// Highest sequence number held, `None` when empty
    fn high_sequence_number(&self) -> Option<u16>;

    fn is_session_complete(&self) -> bool;

    fn have_start_sequence_number(&self) -> bool;

    fn set_start_sequence_number(&mut self, sequence_number: u16);

    /// Copy the packet's bytes into `buffer` at their position in the frame.
    fn insert_packet(&mut self, packet: &Packet<'_>, buffer: &mut Vec<u8>) -> SessionInsert;

    /// Clear NACK list entries this frame no longer needs. Returns how many
    /// entries were cleared.
    fn zero_out_seq_num(&mut self, list: &mut [Option<u16>]) -> Result<usize>;

    /// Like [`zero_out_seq_num`](Self::zero_out_seq_num), additionally
    /// dropping FEC packets and entries the session's NACK policy declines at
    /// this `rtt_score`.
    fn zero_out_seq_num_hybrid(&mut self, list: &mut [Option<u16>], rtt_score: f32)
        -> Result<usize>;

    fn have_last_packet(&self) -> bool;

    fn force_set_have_last_packet(&mut self);

    fn is_retransmitted(&self) -> bool;

    /// Drop leading packets that cannot be decoded. Returns bytes removed from
    /// the front of `buffer`.
    fn make_session_decodable(&mut self, buffer: &mut Vec<u8>) -> usize;

    /// Trim `buffer` to the range a decoder can consume. Returns the final
    /// length.
    fn prepare_for_decode(&mut self, buffer: &mut Vec<u8>, codec: VideoCodec) -> usize;

    fn reset(&mut self);
}
