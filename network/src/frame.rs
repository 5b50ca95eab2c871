// Copyright (c) Liftnet Contributors
// SPDX-License-Identifier: Apache-2.0

//! Fixed-size stream framing.
//!
//! Every application message occupies exactly [`FRAME_SIZE`] bytes on the
//! stream, zero-padded at the tail; readers consume exactly one frame per
//! read. The first frame each side sends is a HELLO carrying a magic word
//! and the sender's node id.

use liftnet_types::NodeId;

use crate::error::{NetworkError, Result};

/// Size of every frame on a peer stream.
pub const FRAME_SIZE: usize = 1024;

/// "HELO" in the first four bytes of a handshake frame.
pub const HELLO_MAGIC: u32 = 0x4845_4C4F;

/// Zero-pad a payload into a full frame.
pub fn encode_frame(payload: &[u8]) -> Result<[u8; FRAME_SIZE]> {
    if payload.len() > FRAME_SIZE {
        return Err(NetworkError::FrameTooLarge { got: payload.len(), max: FRAME_SIZE });
    }
    let mut frame = [0u8; FRAME_SIZE];
    frame[..payload.len()].copy_from_slice(payload);
    Ok(frame)
}

/// Strip the zero padding from a received frame.
pub fn trim_zeros(frame: &[u8]) -> &[u8] {
    let mut end = frame.len();
    while end > 0 && frame[end - 1] == 0 {
        end -= 1;
    }
    &frame[..end]
}

/// Build a HELLO frame announcing our id.
pub fn encode_hello(self_id: NodeId) -> [u8; FRAME_SIZE] {
    let mut frame = [0u8; FRAME_SIZE];
    frame[0..4].copy_from_slice(&HELLO_MAGIC.to_be_bytes());
    frame[4..8].copy_from_slice(&self_id.as_u32().to_be_bytes());
    frame
}

/// Parse a HELLO frame. `None` on bad magic or a non-positive id.
pub fn decode_hello(frame: &[u8]) -> Option<NodeId> {
    if frame.len() < 8 {
        return None;
    }
    let magic = u32::from_be_bytes(frame[0..4].try_into().ok()?);
    if magic != HELLO_MAGIC {
        return None;
    }
    let id = u32::from_be_bytes(frame[4..8].try_into().ok()?);
    if id == 0 {
        return None;
    }
    Some(NodeId(id))
}
