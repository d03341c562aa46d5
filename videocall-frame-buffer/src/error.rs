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

use thiserror::Error;

use crate::frame_buffer::FrameBufferState;

/// Result type for frame buffer operations
pub type Result<T> = std::result::Result<T, FrameBufferError>;

/// Boundary result kinds reported to the owning pool.
///
/// Several error variants collapse onto the same kind; a pool that only keeps
/// per-kind statistics can match on this instead of the full error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    StateError,
    TimeStampError,
    SizeError,
    DuplicatePacket,
    MemoryError,
    /// Caller broke the state machine contract. Never expected under correct
    /// pool usage.
    ContractViolation,
    /// Bookkeeping request the session could not satisfy.
    SessionError,
    ConfigError,
}

/// Errors that can occur in frame buffer operations
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FrameBufferError {
    #[error("Frame buffer in state {0:?} does not accept packets")]
    InvalidState(FrameBufferState),

    #[error("Packet timestamp {packet} does not belong to frame {frame}")]
    TimestampMismatch { frame: u32, packet: u32 },

    #[error("Frame would grow to {required} bytes, limit is {limit}")]
    FrameTooLarge { required: usize, limit: usize },

    #[error("Packet declares {0} bytes but carries no payload")]
    MissingPayload(usize),

    #[error("Session rejected packet {sequence_number}: {reason}")]
    SessionRejected { sequence_number: u16, reason: String },

    #[error("Failed to reserve {0} bytes for frame")]
    Allocation(usize),

    #[error("Duplicate packet: seq={0}")]
    DuplicatePacket(u16),

    #[error("Illegal state transition {from:?} -> {to:?}")]
    IllegalTransition {
        from: FrameBufferState,
        to: FrameBufferState,
    },

    #[error("Out of memory: unable to hold {0} bytes")]
    Memory(usize),

    #[error("Session holds no packets")]
    EmptySession,

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl FrameBufferError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidState(_) => ErrorKind::StateError,
            Self::TimestampMismatch { .. } => ErrorKind::TimeStampError,
            Self::FrameTooLarge { .. }
            | Self::MissingPayload(_)
            | Self::SessionRejected { .. }
            | Self::Allocation(_) => ErrorKind::SizeError,
            Self::DuplicatePacket(_) => ErrorKind::DuplicatePacket,
            Self::IllegalTransition { .. } => ErrorKind::ContractViolation,
            Self::Memory(_) => ErrorKind::MemoryError,
            Self::EmptySession => ErrorKind::SessionError,
            Self::InvalidConfig(_) => ErrorKind::ConfigError,
        }
    }
}
