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

//! Codec-agnostic session assembler.
//!
//! Packets are kept as slots ordered by their wrap-aware distance from the
//! first sequence number the session saw. A slot's bytes live in the frame
//! buffer directly after the bytes of every earlier slot, so inserting a late
//! packet shifts the tail of the buffer to make room.

use std::fmt;
use std::sync::Arc;

use crate::config::FrameBufferConfig;
use crate::packet::{sequence_offset, FrameType, Packet, VideoCodec};
use crate::session::{AlwaysNack, NackCandidate, NackPolicy, SessionAssembler, SessionInsert};
use crate::{FrameBufferError, Result};

#[derive(Debug, Clone, Copy, PartialEq)]
struct PacketSlot {
    sequence_number: u16,
    /// Distance from the session anchor
    offset: i32,
    /// Bytes this packet occupies in the buffer, start code included
    size_bytes: usize,
    frame_type: FrameType,
    is_first_packet: bool,
    marker_bit: bool,
}

/// Default [`SessionAssembler`].
#[derive(Clone)]
pub struct SessionInfo {
    slots: Vec<PacketSlot>,
    anchor: Option<u16>,
    /// First media sequence number the owner saw. Reported to the pool;
    /// completeness is judged from the slots' first-packet flags instead.
    start_sequence_number: Option<u16>,
    frame_type: FrameType,
    previous_frame_loss: bool,
    forced_last_packet: bool,
    retransmitted: bool,
    start_code_length: usize,
    max_packets: usize,
    nack_policy: Arc<dyn NackPolicy + Send + Sync>,
}

impl fmt::Debug for SessionInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionInfo")
            .field("packets", &self.slots.len())
            .field("low", &self.low_sequence_number())
            .field("high", &self.high_sequence_number())
            .field("frame_type", &self.frame_type)
            .field("complete", &self.is_session_complete())
            .finish()
    }
}

impl Default for SessionInfo {
    fn default() -> Self {
        Self::new(&FrameBufferConfig::default())
    }
}

impl SessionInfo {
    pub fn new(config: &FrameBufferConfig) -> Self {
        Self {
            slots: Vec::new(),
            anchor: None,
            start_sequence_number: None,
            frame_type: FrameType::Empty,
            previous_frame_loss: false,
            forced_last_packet: false,
            retransmitted: false,
            start_code_length: config.start_code_length_bytes,
            max_packets: config.max_packets_per_session,
            nack_policy: Arc::new(AlwaysNack),
        }
    }

    /// Use `policy` to decide on in-frame retransmissions during hybrid NACK
    /// passes.
    pub fn with_nack_policy<P>(mut self, policy: P) -> Self
    where
        P: NackPolicy + Send + Sync + 'static,
    {
        self.nack_policy = Arc::new(policy);
        self
    }

    pub fn packet_count(&self) -> usize {
        self.slots.len()
    }

    /// Sequence number recorded through
    /// [`SessionAssembler::set_start_sequence_number`]. Bookkeeping for the
    /// owning pool only; it plays no part in completeness or decodability.
    pub fn start_sequence_number(&self) -> Option<u16> {
        self.start_sequence_number
    }

    fn offset_of(&self, sequence_number: u16) -> Option<i32> {
        self.anchor
            .map(|anchor| sequence_offset(anchor, sequence_number))
    }

    fn find_slot(&self, offset: i32) -> std::result::Result<usize, usize> {
        self.slots.binary_search_by_key(&offset, |slot| slot.offset)
    }

    fn holds(&self, sequence_number: u16) -> bool {
        self.offset_of(sequence_number)
            .is_some_and(|offset| self.find_slot(offset).is_ok())
    }

    /// Whether `sequence_number` lies between the lowest and highest packet held
    fn spans(&self, sequence_number: u16) -> bool {
        match (self.offset_of(sequence_number), self.slots.first(), self.slots.last()) {
            (Some(offset), Some(first), Some(last)) => offset >= first.offset && offset <= last.offset,
            _ => false,
        }
    }

    fn marker_offset(&self) -> Option<i32> {
        self.slots
            .iter()
            .find(|slot| slot.marker_bit)
            .map(|slot| slot.offset)
    }

    fn bytes_before(&self, index: usize) -> usize {
        self.slots[..index].iter().map(|slot| slot.size_bytes).sum()
    }

    fn start_code(&self) -> Vec<u8> {
        let mut code = vec![0u8; self.start_code_length];
        if let Some(last) = code.last_mut() {
            *last = 1;
        }
        code
    }

    /// Index of the first slot that begins a decodable unit
    fn first_decodable_slot(&self) -> Option<usize> {
        self.slots
            .iter()
            .position(|slot| slot.is_first_packet && slot.frame_type.is_media())
    }

    /// Common pruning pass. Returns the cleared count.
    fn prune(&self, list: &mut [Option<u16>]) -> Result<usize> {
        let low = self
            .low_sequence_number()
            .ok_or(FrameBufferError::EmptySession)?;
        let mut cleared = 0;

        if let Some(end) = list.iter().position(|entry| *entry == Some(low)) {
            for entry in list[..=end].iter_mut() {
                if entry.take().is_some() {
                    cleared += 1;
                }
            }
        }

        for entry in list.iter_mut() {
            if entry.is_some_and(|seq| self.holds(seq)) {
                *entry = None;
                cleared += 1;
            }
        }
        Ok(cleared)
    }

    fn note_outstanding(&mut self, list: &[Option<u16>]) {
        if list.iter().flatten().any(|&seq| self.spans(seq)) {
            self.retransmitted = true;
        }
    }
}

impl SessionAssembler for SessionInfo {
    fn frame_type(&self) -> FrameType {
        self.frame_type
    }

    fn set_previous_frame_loss(&mut self) {
        self.previous_frame_loss = true;
    }

    fn previous_frame_loss(&self) -> bool {
        self.previous_frame_loss
    }

    fn low_sequence_number(&self) -> Option<u16> {
        self.slots.first().map(|slot| slot.sequence_number)
    }

    fn high_sequence_number(&self) -> Option<u16> {
        self.slots.last().map(|slot| slot.sequence_number)
    }

    fn is_session_complete(&self) -> bool {
        let Some(start) = self
            .slots
            .iter()
            .position(|slot| slot.frame_type.is_media())
        else {
            return false;
        };
        if !self.slots[start].is_first_packet {
            return false;
        }

        let end = match self.slots.iter().position(|slot| slot.marker_bit) {
            Some(end) => end,
            None if self.forced_last_packet => {
                match self.slots.iter().rposition(|slot| slot.frame_type.is_media()) {
                    Some(end) => end,
                    None => return false,
                }
            }
            None => return false,
        };
        if end < start {
            return false;
        }

        // Slots are unique and sorted, so equal spans mean no sequence gap.
        let span = self.slots[end].offset - self.slots[start].offset;
        span == (end - start) as i32
    }

    fn have_start_sequence_number(&self) -> bool {
        self.start_sequence_number.is_some()
    }

    fn set_start_sequence_number(&mut self, sequence_number: u16) {
        self.start_sequence_number = Some(sequence_number);
    }

    fn insert_packet(&mut self, packet: &Packet<'_>, buffer: &mut Vec<u8>) -> SessionInsert {
        let seq = packet.sequence_number;
        let anchor = self.anchor.unwrap_or(seq);
        let offset = sequence_offset(anchor, seq);

        let index = match self.find_slot(offset) {
            Ok(_) => return SessionInsert::Duplicate,
            Err(index) => index,
        };

        if self.slots.len() >= self.max_packets {
            return SessionInsert::Rejected(format!(
                "session already holds {} packets",
                self.slots.len()
            ));
        }
        let low = self.slots.first().map_or(offset, |slot| slot.offset.min(offset));
        let high = self.slots.last().map_or(offset, |slot| slot.offset.max(offset));
        if (high - low) as usize >= self.max_packets {
            return SessionInsert::Rejected(format!(
                "sequence number {seq} is too far from the rest of the frame"
            ));
        }

        let payload = match packet.payload {
            Some(payload) => match payload.get(..packet.size_bytes) {
                Some(payload) => payload,
                None => {
                    return SessionInsert::Rejected(format!(
                        "payload holds {} bytes, {} declared",
                        payload.len(),
                        packet.size_bytes
                    ))
                }
            },
            None => &[],
        };
        let start_code = if packet.insert_start_code && !payload.is_empty() {
            self.start_code()
        } else {
            Vec::new()
        };

        let old_len = buffer.len();
        let held = self.bytes_before(self.slots.len());
        if held != old_len {
            return SessionInsert::Rejected(format!(
                "buffer holds {old_len} bytes, session placed {held}"
            ));
        }

        let inserted = start_code.len() + payload.len();
        let at = self.bytes_before(index);
        buffer.resize(old_len + inserted, 0);
        buffer.copy_within(at..old_len, at + inserted);
        buffer[at..at + start_code.len()].copy_from_slice(&start_code);
        buffer[at + start_code.len()..at + inserted].copy_from_slice(payload);

        self.anchor = Some(anchor);
        self.slots.insert(
            index,
            PacketSlot {
                sequence_number: seq,
                offset,
                size_bytes: inserted,
                frame_type: packet.frame_type,
                is_first_packet: packet.is_first_packet,
                marker_bit: packet.marker_bit,
            },
        );

        if packet.frame_type == FrameType::Key {
            self.frame_type = FrameType::Key;
        } else if packet.frame_type.is_media() && self.frame_type == FrameType::Empty {
            self.frame_type = packet.frame_type;
        }

        SessionInsert::Appended(inserted)
    }

    fn zero_out_seq_num(&mut self, list: &mut [Option<u16>]) -> Result<usize> {
        let cleared = self.prune(list)?;
        self.note_outstanding(list);
        Ok(cleared)
    }

    fn zero_out_seq_num_hybrid(
        &mut self,
        list: &mut [Option<u16>],
        rtt_score: f32,
    ) -> Result<usize> {
        let mut cleared = self.prune(list)?;
        let marker = self.marker_offset();
        let have_last_packet = self.have_last_packet();

        for entry in list.iter_mut() {
            let Some(seq) = *entry else { continue };
            let Some(offset) = self.offset_of(seq) else { continue };
            if !self.spans(seq) {
                continue;
            }
            // Packets after the frame's last media packet are FEC.
            let is_fec = marker.is_some_and(|marker| offset > marker);
            let wanted = !is_fec
                && self.nack_policy.should_nack(
                    &NackCandidate {
                        sequence_number: seq,
                        frame_type: self.frame_type,
                        packets_received: self.slots.len(),
                        have_last_packet,
                    },
                    rtt_score,
                );
            if !wanted {
                *entry = None;
                cleared += 1;
            }
        }

        self.note_outstanding(list);
        Ok(cleared)
    }

    fn have_last_packet(&self) -> bool {
        self.forced_last_packet || self.slots.iter().any(|slot| slot.marker_bit)
    }

    fn force_set_have_last_packet(&mut self) {
        self.forced_last_packet = true;
    }

    fn is_retransmitted(&self) -> bool {
        self.retransmitted
    }

    fn make_session_decodable(&mut self, buffer: &mut Vec<u8>) -> usize {
        let keep_from = self.first_decodable_slot().unwrap_or(self.slots.len());
        if keep_from == 0 {
            return 0;
        }
        let trimmed = self.bytes_before(keep_from).min(buffer.len());
        buffer.drain(..trimmed);
        self.slots.drain(..keep_from);
        log::debug!("Dropped {keep_from} undecodable leading packets ({trimmed} bytes)");
        trimmed
    }

    fn prepare_for_decode(&mut self, buffer: &mut Vec<u8>, codec: VideoCodec) -> usize {
        self.make_session_decodable(buffer);

        let gap = self
            .slots
            .windows(2)
            .position(|pair| pair[1].offset != pair[0].offset + 1)
            .map(|index| index + 1);
        if let Some(cut) = gap {
            let keep = self.bytes_before(cut).min(buffer.len());
            log::debug!(
                "Truncating {codec:?} frame at sequence gap after seq={}: {} -> {keep} bytes",
                self.slots[cut - 1].sequence_number,
                buffer.len()
            );
            buffer.truncate(keep);
            self.slots.truncate(cut);
        }
        buffer.len()
    }

    fn reset(&mut self) {
        self.slots.clear();
        self.anchor = None;
        self.start_sequence_number = None;
        self.frame_type = FrameType::Empty;
        self.previous_frame_loss = false;
        self.forced_last_packet = false;
        self.retransmitted = false;
    }
}
