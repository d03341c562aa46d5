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

//! Tunable limits for frame assembly.

use serde::{Deserialize, Serialize};

use crate::{FrameBufferError, Result};

/// Largest frame the buffer will assemble. Bounds per-frame memory even when a
/// flood of packets claims the same timestamp.
pub const DEFAULT_MAX_FRAME_SIZE_BYTES: usize = 4_000_000;
/// Capacity grows in steps of this size to amortize reallocation.
pub const DEFAULT_BUFFER_INCREMENT_BYTES: usize = 30_000;
/// H.264 Annex B start code (`00 00 00 01`).
pub const DEFAULT_START_CODE_LENGTH_BYTES: usize = 4;
/// Upper bound on packets tracked for a single frame.
pub const DEFAULT_MAX_PACKETS_PER_SESSION: usize = 800;

/// Frame buffer configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FrameBufferConfig {
    /// Hard ceiling on frame length and reserved capacity
    pub max_frame_size_bytes: usize,
    /// Capacity growth step
    pub buffer_increment_bytes: usize,
    /// Bytes inserted ahead of payloads that request a start code
    pub start_code_length_bytes: usize,
    /// Maximum number of packets the default session will track
    pub max_packets_per_session: usize,
    /// Panic on illegal state transitions in debug builds instead of only
    /// returning the error
    pub strict_transitions: bool,
}

impl Default for FrameBufferConfig {
    fn default() -> Self {
        Self {
            max_frame_size_bytes: DEFAULT_MAX_FRAME_SIZE_BYTES,
            buffer_increment_bytes: DEFAULT_BUFFER_INCREMENT_BYTES,
            start_code_length_bytes: DEFAULT_START_CODE_LENGTH_BYTES,
            max_packets_per_session: DEFAULT_MAX_PACKETS_PER_SESSION,
            strict_transitions: false,
        }
    }
}

impl FrameBufferConfig {
    /// Parse a configuration from JSON. Missing fields keep their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| FrameBufferError::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.buffer_increment_bytes == 0 {
            return Err(FrameBufferError::InvalidConfig(
                "buffer_increment_bytes must be non-zero".to_string(),
            ));
        }
        if self.max_frame_size_bytes < self.buffer_increment_bytes {
            return Err(FrameBufferError::InvalidConfig(format!(
                "max_frame_size_bytes ({}) is smaller than one increment ({})",
                self.max_frame_size_bytes, self.buffer_increment_bytes
            )));
        }
        if self.max_packets_per_session == 0 {
            return Err(FrameBufferError::InvalidConfig(
                "max_packets_per_session must be non-zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Largest capacity the buffer can ever reserve: the biggest multiple of
    /// the increment that fits under the hard maximum.
    pub fn max_capacity_bytes(&self) -> usize {
        (self.max_frame_size_bytes / self.buffer_increment_bytes) * self.buffer_increment_bytes
    }
}
