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

//! Frame assembly simulation.
//!
//! Feeds a small pool of frame buffers with a lossy, duplicated, reordered
//! packet stream and reports how many frames completed, how many had to be
//! forced through with missing packets, and how many were abandoned.
//!
//! Run with `RUST_LOG=debug` to see per-frame transitions.

use std::collections::HashSet;
use std::time::Instant;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};

use videocall_frame_buffer::{
    ErrorKind, FrameBuffer, FrameBufferConfig, FrameBufferState, FrameType, InsertOutcome, Packet,
    Result, VideoCodec,
};

const FRAMES: u32 = 300;
const POOL_SIZE: usize = 6;
const TIMESTAMP_STEP: u32 = 3000;
const KEYFRAME_INTERVAL: u32 = 30;
const LOSS_PROBABILITY: f64 = 0.03;
const DUPLICATE_PROBABILITY: f64 = 0.05;
/// Number of frames whose packets are shuffled together on the wire.
const REORDER_WINDOW: usize = 3;

struct WirePacket {
    sequence_number: u16,
    timestamp: u32,
    frame_type: FrameType,
    payload: Vec<u8>,
    is_first_packet: bool,
    marker_bit: bool,
}

impl WirePacket {
    fn as_packet(&self) -> Packet<'_> {
        let mut packet = Packet::new(
            self.sequence_number,
            self.timestamp,
            self.frame_type,
            &self.payload,
        )
        .with_codec(VideoCodec::VP8)
        .with_payload_type(96);
        packet.is_first_packet = self.is_first_packet;
        packet.marker_bit = self.marker_bit;
        packet
    }
}

#[derive(Debug, Default)]
struct Stats {
    complete: u32,
    forced: u32,
    abandoned: u32,
    duplicates: u32,
    late: u32,
    rejected: u32,
    bytes_decoded: usize,
    /// Timestamps whose buffers were already handed back to the pool
    released: HashSet<u32>,
}

fn packetize(rng: &mut StdRng, frame: u32, next_seq: &mut u16) -> Vec<WirePacket> {
    let frame_type = if frame % KEYFRAME_INTERVAL == 0 {
        FrameType::Key
    } else {
        FrameType::Delta
    };
    let count = if frame_type == FrameType::Key {
        rng.gen_range(6..=12)
    } else {
        rng.gen_range(1..=5)
    };

    (0..count)
        .map(|i| {
            let size = rng.gen_range(200..=1200);
            let packet = WirePacket {
                sequence_number: *next_seq,
                timestamp: frame * TIMESTAMP_STEP,
                frame_type,
                payload: vec![(frame % 256) as u8; size],
                is_first_packet: i == 0,
                marker_bit: i == count - 1,
            };
            *next_seq = next_seq.wrapping_add(1);
            packet
        })
        .collect()
}

fn find_or_claim(pool: &mut [FrameBuffer], timestamp: u32) -> Result<Option<usize>> {
    if let Some(index) = pool
        .iter()
        .position(|fb| fb.state_with_timestamp().1 == Some(timestamp))
    {
        return Ok(Some(index));
    }
    match pool.iter().position(|fb| fb.state() == FrameBufferState::Free) {
        Some(index) => {
            pool[index].set_state(FrameBufferState::Empty)?;
            Ok(Some(index))
        }
        None => Ok(None),
    }
}

/// Hand a frame to the "decoder" and recycle its buffer.
fn decode(fb: &mut FrameBuffer, stats: &mut Stats) -> Result<()> {
    fb.set_state(FrameBufferState::Decoding)?;
    if let Some(timestamp) = fb.timestamp() {
        stats.released.insert(timestamp);
    }
    stats.bytes_decoded += fb.length();
    log::debug!(
        "Decoded frame ts={:?} type={:?} complete={} ({} bytes, {} nacks)",
        fb.timestamp(),
        fb.encoded_frame().frame_type(),
        fb.encoded_frame().is_complete_frame(),
        fb.length(),
        fb.nack_count()
    );
    fb.reset();
    Ok(())
}

/// Force the oldest assembling frame through so its buffer can be reused.
fn flush_oldest(pool: &mut [FrameBuffer], stats: &mut Stats) -> Result<()> {
    let Some(index) = pool
        .iter()
        .enumerate()
        .filter(|(_, fb)| fb.state() != FrameBufferState::Free)
        .min_by_key(|(_, fb)| fb.latest_packet_time_ms())
        .map(|(index, _)| index)
    else {
        return Ok(());
    };
    let fb = &mut pool[index];

    if fb.force_set_have_last_packet() {
        fb.set_state(FrameBufferState::Complete)?;
        stats.complete += 1;
        return decode(fb, stats);
    }

    fb.make_session_decodable();
    if fb.length() > 0 && fb.state() != FrameBufferState::Empty {
        fb.set_state(FrameBufferState::Decodable)?;
        stats.forced += 1;
        decode(fb, stats)
    } else {
        log::debug!("Abandoning frame ts={:?}", fb.timestamp());
        if let Some(timestamp) = fb.timestamp() {
            stats.released.insert(timestamp);
        }
        stats.abandoned += 1;
        fb.reset();
        Ok(())
    }
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = FrameBufferConfig::default();
    let mut pool = (0..POOL_SIZE)
        .map(|_| FrameBuffer::new(config.clone()))
        .collect::<Result<Vec<_>>>()?;

    let mut rng = StdRng::seed_from_u64(2025);
    let mut next_seq: u16 = rng.gen();
    let mut stats = Stats::default();
    let started = Instant::now();

    let frames: Vec<u32> = (0..FRAMES).collect();
    for window in frames.chunks(REORDER_WINDOW) {
        let mut wire: Vec<WirePacket> = Vec::new();
        for &frame in window {
            for packet in packetize(&mut rng, frame, &mut next_seq) {
                if rng.gen_bool(LOSS_PROBABILITY) {
                    log::trace!("Dropping packet seq={}", packet.sequence_number);
                    continue;
                }
                if rng.gen_bool(DUPLICATE_PROBABILITY) {
                    wire.push(WirePacket {
                        payload: packet.payload.clone(),
                        ..packet
                    });
                }
                wire.push(packet);
            }
        }
        wire.shuffle(&mut rng);

        for wire_packet in &wire {
            let packet = wire_packet.as_packet();
            let now_ms = started.elapsed().as_millis() as i64;
            if stats.released.contains(&packet.timestamp) {
                stats.late += 1;
                continue;
            }

            let index = match find_or_claim(&mut pool, packet.timestamp)? {
                Some(index) => index,
                None => {
                    flush_oldest(&mut pool, &mut stats)?;
                    match find_or_claim(&mut pool, packet.timestamp)? {
                        Some(index) => index,
                        None => continue,
                    }
                }
            };

            let fb = &mut pool[index];
            match fb.insert_packet(&packet, now_ms) {
                Ok(InsertOutcome::CompleteSession) => {
                    fb.set_state(FrameBufferState::Complete)?;
                    stats.complete += 1;
                    decode(fb, &mut stats)?;
                }
                Ok(InsertOutcome::Incomplete) => {}
                Err(err) if err.kind() == ErrorKind::DuplicatePacket => stats.duplicates += 1,
                Err(err) => {
                    log::warn!("Packet seq={} rejected: {err}", packet.sequence_number);
                    stats.rejected += 1;
                }
            }
        }

        // Anything still assembling from this window is missing packets:
        // prune the NACK list, then push the frame through.
        for fb in pool.iter_mut() {
            if fb.state() == FrameBufferState::Free {
                continue;
            }
            fb.increment_nack_count();
            if let (Some(low), Some(high)) = (fb.low_sequence_number(), fb.high_sequence_number()) {
                let span = high.wrapping_sub(low);
                let mut nack_list: Vec<Option<u16>> =
                    (0..=span).map(|i| Some(low.wrapping_add(i))).collect();
                let cleared = fb.zero_out_seq_num_hybrid(&mut nack_list, 0.5)?;
                let outstanding = nack_list.iter().flatten().count();
                log::debug!(
                    "Frame ts={:?}: cleared {cleared} NACK entries, {outstanding} still missing",
                    fb.timestamp()
                );
            }
        }
        while pool.iter().any(|fb| fb.state() != FrameBufferState::Free) {
            flush_oldest(&mut pool, &mut stats)?;
        }
    }

    log::info!(
        "Frames: {} complete, {} forced, {} abandoned | {} duplicates, {} late, {} rejected | {} bytes decoded in {:?}",
        stats.complete,
        stats.forced,
        stats.abandoned,
        stats.duplicates,
        stats.late,
        stats.rejected,
        stats.bytes_decoded,
        started.elapsed()
    );
    Ok(())
}
