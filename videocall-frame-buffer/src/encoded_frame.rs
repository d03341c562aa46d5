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

//! Contains the owned byte buffer and metadata of one encoded frame.

use serde::{Deserialize, Serialize};

use crate::config::FrameBufferConfig;
use crate::packet::{FrameType, VideoCodec};
use crate::{FrameBufferError, Result};

/// A previously stored encoded frame, as kept by a storage/replay collaborator.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EncodedVideoData {
    pub frame_type: FrameType,
    pub timestamp: u32,
    pub payload_type: u8,
    pub encoded_width: u32,
    pub encoded_height: u32,
    pub missing_frame: bool,
    pub complete_frame: bool,
    pub render_time_ms: i64,
    pub codec: VideoCodec,
    pub payload: Vec<u8>,
}

impl EncodedVideoData {
    pub fn payload_size(&self) -> usize {
        self.payload.len()
    }
}

/// Exclusively owned, growable frame payload plus the frame's metadata.
///
/// `capacity` is the byte budget reserved for the frame. It only grows in
/// whole increments and never exceeds the configured maximum, so it is
/// tracked here rather than read back from the allocator.
#[derive(Debug, PartialEq)]
pub struct EncodedFrame {
    data: Vec<u8>,
    capacity: usize,
    timestamp: Option<u32>,
    payload_type: u8,
    codec: VideoCodec,
    frame_type: FrameType,
    encoded_width: u32,
    encoded_height: u32,
    render_time_ms: i64,
    complete_frame: bool,
    missing_frame: bool,
}

impl Default for EncodedFrame {
    fn default() -> Self {
        Self {
            data: Vec::new(),
            capacity: 0,
            timestamp: None,
            payload_type: 0,
            codec: VideoCodec::Unknown,
            frame_type: FrameType::Delta,
            encoded_width: 0,
            encoded_height: 0,
            render_time_ms: 0,
            complete_frame: false,
            missing_frame: false,
        }
    }
}

impl Clone for EncodedFrame {
    /// Deep copy that also reserves the source's capacity, so the copy can
    /// keep assembling without reallocating earlier than the source frame would.
    fn clone(&self) -> Self {
        let mut data = Vec::with_capacity(self.capacity);
        data.extend_from_slice(&self.data);
        Self {
            data,
            capacity: self.capacity,
            timestamp: self.timestamp,
            payload_type: self.payload_type,
            codec: self.codec,
            frame_type: self.frame_type,
            encoded_width: self.encoded_width,
            encoded_height: self.encoded_height,
            render_time_ms: self.render_time_ms,
            complete_frame: self.complete_frame,
            missing_frame: self.missing_frame,
        }
    }
}

impl EncodedFrame {
    pub fn new() -> Self {
        Self::default()
    }

    /// Populate a fresh frame directly from a stored record.
    pub fn from_storage(record: &EncodedVideoData, config: &FrameBufferConfig) -> Result<Self> {
        let mut frame = Self::new();
        frame.copy_from_storage(record, config)?;
        Ok(frame)
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Bytes logically used
    pub fn length(&self) -> usize {
        self.data.len()
    }

    /// Bytes reserved for the frame
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn timestamp(&self) -> Option<u32> {
        self.timestamp
    }

    pub fn payload_type(&self) -> u8 {
        self.payload_type
    }

    pub fn codec(&self) -> VideoCodec {
        self.codec
    }

    pub fn frame_type(&self) -> FrameType {
        self.frame_type
    }

    pub fn encoded_width(&self) -> u32 {
        self.encoded_width
    }

    pub fn encoded_height(&self) -> u32 {
        self.encoded_height
    }

    pub fn render_time_ms(&self) -> i64 {
        self.render_time_ms
    }

    pub fn is_complete_frame(&self) -> bool {
        self.complete_frame
    }

    pub fn is_missing_frame(&self) -> bool {
        self.missing_frame
    }

    pub fn set_encoded_size(&mut self, width: u32, height: u32) {
        self.encoded_width = width;
        self.encoded_height = height;
    }

    pub fn set_render_time_ms(&mut self, render_time_ms: i64) {
        self.render_time_ms = render_time_ms;
    }

    pub(crate) fn data_mut(&mut self) -> &mut Vec<u8> {
        &mut self.data
    }

    pub(crate) fn set_timestamp(&mut self, timestamp: u32) {
        self.timestamp = Some(timestamp);
    }

    pub(crate) fn set_payload_type(&mut self, payload_type: u8) {
        self.payload_type = payload_type;
    }

    pub(crate) fn set_codec(&mut self, codec: VideoCodec) {
        self.codec = codec;
    }

    pub(crate) fn set_decode_info(&mut self, frame_type: FrameType, complete: bool, missing: bool) {
        self.frame_type = frame_type;
        self.complete_frame = complete;
        self.missing_frame = missing;
    }

    /// Make room for `required` bytes.
    ///
    /// Once the projected length reaches the current capacity, capacity grows
    /// by whole increments until it exceeds `required`. Fails without touching
    /// the frame if that would pass the configured maximum or the allocator
    /// refuses. Capacity always stays ahead of the length, so a frame holds at
    /// most [`FrameBufferConfig::max_capacity_bytes`] minus one bytes.
    pub fn ensure_capacity(&mut self, required: usize, config: &FrameBufferConfig) -> Result<()> {
        if required < self.capacity {
            return Ok(());
        }
        let increment = config.buffer_increment_bytes;
        let new_capacity = (required / increment + 1) * increment;
        if new_capacity > config.max_frame_size_bytes {
            return Err(FrameBufferError::FrameTooLarge {
                required,
                limit: config.max_frame_size_bytes,
            });
        }
        self.data
            .try_reserve_exact(new_capacity - self.data.len())
            .map_err(|_| FrameBufferError::Allocation(new_capacity))?;
        log::debug!(
            "Grew frame capacity {} -> {new_capacity} bytes",
            self.capacity
        );
        self.capacity = new_capacity;
        Ok(())
    }

    /// Overwrite this frame with a stored record.
    ///
    /// On failure the frame keeps its previous content.
    pub fn copy_from_storage(
        &mut self,
        record: &EncodedVideoData,
        config: &FrameBufferConfig,
    ) -> Result<()> {
        let size = record.payload_size();
        if size > self.capacity {
            self.ensure_capacity(size, config)
                .map_err(|_| FrameBufferError::Memory(size))?;
        }
        self.frame_type = record.frame_type;
        self.timestamp = Some(record.timestamp);
        self.payload_type = record.payload_type;
        self.encoded_width = record.encoded_width;
        self.encoded_height = record.encoded_height;
        self.missing_frame = record.missing_frame;
        self.complete_frame = record.complete_frame;
        self.render_time_ms = record.render_time_ms;
        self.codec = record.codec;
        self.data.clear();
        self.data.extend_from_slice(&record.payload);
        log::debug!(
            "Replayed stored frame ts={} ({size} bytes)",
            record.timestamp
        );
        Ok(())
    }

    /// Snapshot this frame as a storage record. `None` until a timestamp is set.
    pub fn to_storage_record(&self) -> Option<EncodedVideoData> {
        let timestamp = self.timestamp?;
        Some(EncodedVideoData {
            frame_type: self.frame_type,
            timestamp,
            payload_type: self.payload_type,
            encoded_width: self.encoded_width,
            encoded_height: self.encoded_height,
            missing_frame: self.missing_frame,
            complete_frame: self.complete_frame,
            render_time_ms: self.render_time_ms,
            codec: self.codec,
            payload: self.data.clone(),
        })
    }

    /// Clear content and metadata. The reserved capacity is kept for reuse.
    pub fn reset(&mut self) {
        self.data.clear();
        self.timestamp = None;
        self.payload_type = 0;
        self.codec = VideoCodec::Unknown;
        self.frame_type = FrameType::Delta;
        self.encoded_width = 0;
        self.encoded_height = 0;
        self.render_time_ms = 0;
        self.complete_frame = false;
        self.missing_frame = false;
    }
}
