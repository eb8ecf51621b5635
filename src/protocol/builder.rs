//! Incremental frame parser
//!
//! Accumulates bytes as they arrive off the socket, in chunks of any size,
//! and yields complete frames. State machine: `AwaitingHeader` (needs the
//! 7-byte frame header) → `AwaitingBody` (needs payload plus the end-marker
//! byte) → frame yielded, state reset. Partial data is never discarded and
//! the parser never blocks.

use bytes::{Buf, BytesMut};
use tracing::trace;

use super::{DEFAULT_FRAME_MAX, Error, FRAME_END, FRAME_HEADER_SIZE, Frame, FrameKind, Result};

#[derive(Debug, Clone, Copy)]
enum State {
    AwaitingHeader,
    AwaitingBody {
        kind: FrameKind,
        channel: u16,
        size: usize,
    },
}

/// Stateful byte-stream-to-frame transformer.
///
/// The connection engine owns one of these and is the only mutator; each
/// socket read is fed in via [`FrameBuilder::feed`].
#[derive(Debug)]
pub struct FrameBuilder {
    buffer: BytesMut,
    state: State,
    max_payload: usize,
}

impl FrameBuilder {
    /// Create a builder with the default payload cap.
    #[must_use]
    pub fn new() -> Self {
        Self::with_max_payload(DEFAULT_FRAME_MAX)
    }

    /// Create a builder enforcing the given maximum payload size.
    #[must_use]
    pub fn with_max_payload(max_payload: usize) -> Self {
        Self {
            buffer: BytesMut::with_capacity(8 * 1024),
            state: State::AwaitingHeader,
            max_payload,
        }
    }

    /// Tighten or relax the payload cap (after tuning negotiation).
    pub fn set_max_payload(&mut self, max_payload: usize) {
        self.max_payload = max_payload;
    }

    /// Feed freshly received bytes, returning every frame completed by them.
    ///
    /// # Errors
    ///
    /// Fails on an unknown frame kind, an oversized payload declaration, or
    /// an end-marker mismatch. After an error the byte stream can no longer
    /// be trusted and the connection must be torn down.
    pub fn feed(&mut self, data: &[u8]) -> Result<Vec<Frame>> {
        self.buffer.extend_from_slice(data);

        let mut frames = Vec::new();
        while let Some(frame) = self.advance()? {
            trace!(channel = frame.channel(), kind = %frame.kind(), len = frame.payload().len(),
                   "frame assembled");
            frames.push(frame);
        }
        Ok(frames)
    }

    /// Bytes currently buffered but not yet part of a completed frame.
    #[must_use]
    pub fn pending_bytes(&self) -> usize {
        self.buffer.len()
    }

    fn advance(&mut self) -> Result<Option<Frame>> {
        match self.state {
            State::AwaitingHeader => {
                if self.buffer.len() < FRAME_HEADER_SIZE {
                    return Ok(None);
                }
                let kind = FrameKind::from_u8(self.buffer.get_u8())?;
                let channel = self.buffer.get_u16();
                let size = self.buffer.get_u32() as usize;
                if size > self.max_payload {
                    return Err(Error::FrameTooLarge {
                        size,
                        max: self.max_payload,
                    });
                }
                self.state = State::AwaitingBody {
                    kind,
                    channel,
                    size,
                };
                self.advance()
            }
            State::AwaitingBody {
                kind,
                channel,
                size,
            } => {
                // Payload plus the trailing end-marker byte.
                if self.buffer.len() < size + 1 {
                    return Ok(None);
                }
                let payload = self.buffer.split_to(size).freeze();
                let marker = self.buffer.get_u8();
                if marker != FRAME_END {
                    return Err(Error::BadFrameEnd { found: marker });
                }
                self.state = State::AwaitingHeader;
                Ok(Some(Frame::new(kind, channel, payload)))
            }
        }
    }
}

impl Default for FrameBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::encode_frame;

    fn frame_bytes(channel: u16, payload: &[u8]) -> Vec<u8> {
        encode_frame(&Frame::method(channel, payload.to_vec()))
    }

    #[test]
    fn whole_frame_in_one_feed() {
        let mut builder = FrameBuilder::new();
        let frames = builder.feed(&frame_bytes(1, b"hello")).unwrap();

        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].channel(), 1);
        assert_eq!(frames[0].payload().as_ref(), b"hello");
        assert_eq!(builder.pending_bytes(), 0);
    }

    #[test]
    fn byte_by_byte_matches_single_feed() {
        // Pad the payload so the whole frame is exactly 50 bytes on the wire.
        let payload = vec![0xAB; 50 - FRAME_HEADER_SIZE - 1];
        let wire = frame_bytes(3, &payload);
        assert_eq!(wire.len(), 50);

        let mut all_at_once = FrameBuilder::new();
        let expected = all_at_once.feed(&wire).unwrap();

        let mut one_at_a_time = FrameBuilder::new();
        let mut collected = Vec::new();
        for byte in &wire {
            collected.extend(one_at_a_time.feed(std::slice::from_ref(byte)).unwrap());
        }

        assert_eq!(collected.len(), 1);
        assert_eq!(collected, expected);
    }

    #[test]
    fn multiple_frames_in_one_feed() {
        let mut wire = frame_bytes(1, b"a");
        wire.extend(frame_bytes(2, b"bb"));
        wire.extend(frame_bytes(1, b"ccc"));

        let frames = FrameBuilder::new().feed(&wire).unwrap();
        let channels: Vec<_> = frames.iter().map(Frame::channel).collect();
        assert_eq!(channels, [1, 2, 1]);
    }

    #[test]
    fn partial_then_rest() {
        let wire = frame_bytes(5, b"fragmented payload");
        let mut builder = FrameBuilder::new();

        assert!(builder.feed(&wire[..4]).unwrap().is_empty());
        assert!(builder.feed(&wire[4..10]).unwrap().is_empty());
        let frames = builder.feed(&wire[10..]).unwrap();

        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].payload().as_ref(), b"fragmented payload");
    }

    #[test]
    fn bad_end_marker_rejected_without_emitting() {
        let mut wire = frame_bytes(1, b"x");
        let last = wire.len() - 1;
        wire[last] = 0x00;

        let mut builder = FrameBuilder::new();
        let err = builder.feed(&wire).unwrap_err();
        assert!(matches!(err, Error::BadFrameEnd { found: 0x00 }));
    }

    #[test]
    fn oversized_payload_declaration_rejected() {
        let mut builder = FrameBuilder::with_max_payload(16);
        let wire = frame_bytes(1, &[0u8; 32]);
        let err = builder.feed(&wire).unwrap_err();
        assert!(matches!(err, Error::FrameTooLarge { size: 32, max: 16 }));
    }

    #[test]
    fn empty_payload_frame() {
        let frames = FrameBuilder::new().feed(&frame_bytes(9, b"")).unwrap();
        assert_eq!(frames.len(), 1);
        assert!(frames[0].payload().is_empty());
    }
}
