//! Length-prefixed framing
//!
//! Every frame is a 4-byte big-endian payload length followed by the JSON
//! encoding of one [`WireMessage`]. A socket read may end anywhere, so
//! [`split_frames`] only consumes complete frames from the front of the buffer
//! and leaves a trailing partial header or payload for the next read.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::message::WireMessage;
use crate::utils::error::{BroadcastError, Result};

pub const HEADER_SIZE: usize = 4;

/// Default upper bound for a single payload (16 MiB).
pub const DEFAULT_MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Encode `message` into a complete frame.
pub fn encode(message: &WireMessage) -> Result<Bytes> {
    let payload = message.to_vec()?;
    let len = u32::try_from(payload.len()).map_err(|_| BroadcastError::FrameTooLarge {
        size: payload.len(),
        max: u32::MAX as usize,
    })?;

    let mut frame = BytesMut::with_capacity(HEADER_SIZE + payload.len());
    frame.put_u32(len);
    frame.extend_from_slice(&payload);
    Ok(frame.freeze())
}

/// Split off every complete frame payload at the front of `buf`.
///
/// Incomplete data stays in `buf`. A header announcing more than `max_size`
/// bytes is an error; the buffer is left untouched in that case.
pub fn split_frames(buf: &mut BytesMut, max_size: usize) -> Result<Vec<Bytes>> {
    let mut frames = Vec::new();

    while buf.len() >= HEADER_SIZE {
        let len = (&buf[..HEADER_SIZE]).get_u32() as usize;
        if len > max_size {
            return Err(BroadcastError::FrameTooLarge {
                size: len,
                max: max_size,
            });
        }
        if buf.len() < HEADER_SIZE + len {
            break;
        }
        buf.advance(HEADER_SIZE);
        frames.push(buf.split_to(len).freeze());
    }

    Ok(frames)
}

/// Reassembly buffer for one connection.
#[derive(Debug)]
pub struct FrameBuffer {
    buf: BytesMut,
    max_frame_size: usize,
}

impl FrameBuffer {
    pub fn new(max_frame_size: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(8192),
            max_frame_size,
        }
    }

    /// Read target for `AsyncReadExt::read_buf`.
    pub fn buffer_mut(&mut self) -> &mut BytesMut {
        &mut self.buf
    }

    pub fn extend(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Bytes held back waiting for the rest of a frame.
    pub fn pending(&self) -> usize {
        self.buf.len()
    }

    pub fn frames(&mut self) -> Result<Vec<Bytes>> {
        split_frames(&mut self.buf, self.max_frame_size)
    }
}

impl Default for FrameBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FRAME_SIZE)
    }
}
