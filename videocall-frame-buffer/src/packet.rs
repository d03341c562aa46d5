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

//! Packet records produced by depacketization and the tags they carry.

use serde::{Deserialize, Serialize};

/// The type of a video frame, indicating its dependency on other frames.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FrameType {
    /// A KeyFrame (or I-frame) can be decoded independently of any other frame.
    Key,
    /// A DeltaFrame (or P-frame) can only be decoded if the preceding frame has been decoded.
    Delta,
    /// VP8 golden reference update.
    Golden,
    /// VP8 alternate reference update.
    AltRef,
    /// Carries no media, e.g. padding or FEC.
    #[default]
    Empty,
}

impl FrameType {
    pub fn is_media(&self) -> bool {
        !matches!(self, FrameType::Empty)
    }
}

/// An enumeration of the video codecs a frame can carry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VideoCodec {
    VP8,
    VP9,
    H264,
    /// Opaque payload with no codec-specific handling.
    Generic,
    #[default]
    Unknown,
}

/// One network-delivered fragment of a frame.
///
/// The payload is borrowed from the depacketizer's receive buffer and is never
/// mutated. `size_bytes` is carried separately from the payload so that a
/// malformed record (declared size, no bytes) can be detected and rejected.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Packet<'a> {
    /// RTP sequence number
    pub sequence_number: u16,
    /// RTP timestamp; identifies the frame
    pub timestamp: u32,
    pub payload_type: u8,
    pub codec: VideoCodec,
    pub frame_type: FrameType,
    /// Declared payload length
    pub size_bytes: usize,
    pub payload: Option<&'a [u8]>,
    /// Prepend a codec start code to the payload when assembling
    pub insert_start_code: bool,
    /// First packet of a decodable unit (frame, partition or NAL unit)
    pub is_first_packet: bool,
    /// Last packet of the frame
    pub marker_bit: bool,
}

impl<'a> Packet<'a> {
    /// Create a media packet carrying `payload`
    pub fn new(sequence_number: u16, timestamp: u32, frame_type: FrameType, payload: &'a [u8]) -> Self {
        Self {
            sequence_number,
            timestamp,
            frame_type,
            size_bytes: payload.len(),
            payload: Some(payload),
            ..Default::default()
        }
    }

    /// Create a packet with no media, as used for padding
    pub fn empty(sequence_number: u16, timestamp: u32) -> Self {
        Self {
            sequence_number,
            timestamp,
            frame_type: FrameType::Empty,
            ..Default::default()
        }
    }

    pub fn with_codec(mut self, codec: VideoCodec) -> Self {
        self.codec = codec;
        self
    }

    pub fn with_payload_type(mut self, payload_type: u8) -> Self {
        self.payload_type = payload_type;
        self
    }

    pub fn first(mut self) -> Self {
        self.is_first_packet = true;
        self
    }

    pub fn marker(mut self) -> Self {
        self.marker_bit = true;
        self
    }

    pub fn with_start_code(mut self) -> Self {
        self.insert_start_code = true;
        self
    }

    /// Bytes this packet adds to the frame, including an optional start code
    pub fn contribution_bytes(&self, start_code_length: usize) -> usize {
        if self.insert_start_code {
            self.size_bytes + start_code_length
        } else {
            self.size_bytes
        }
    }
}

/// Signed distance from `base` to `seq` on the 16-bit sequence circle
pub fn sequence_offset(base: u16, seq: u16) -> i32 {
    seq.wrapping_sub(base) as i16 as i32
}
