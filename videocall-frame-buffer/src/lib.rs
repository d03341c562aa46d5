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

//! Frame reassembly for a real-time video receiver.
//!
//! A [`FrameBuffer`] collects the RTP packets that share one timestamp into a
//! single contiguous payload, tracks the frame through its lifecycle and hands
//! a decodable byte range to the decoder. Packet placement and the
//! completeness judgment are delegated to a [`SessionAssembler`];
//! [`SessionInfo`] is the codec-agnostic implementation used by default.

pub mod config;
pub mod encoded_frame;
pub mod error;
pub mod frame_buffer;
pub mod packet;
pub mod session;
pub mod session_info;

pub use config::FrameBufferConfig;
pub use encoded_frame::{EncodedFrame, EncodedVideoData};
pub use error::{ErrorKind, FrameBufferError, Result};
pub use frame_buffer::{FrameBuffer, FrameBufferState, InsertOutcome};
pub use packet::{FrameType, Packet, VideoCodec};
pub use session::{AlwaysNack, NackCandidate, NackPolicy, SessionAssembler, SessionInsert};
pub use session_info::SessionInfo;
