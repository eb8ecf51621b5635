//! Frame serialization
//!
//! [`encode_frame`] is the pure one-shot transformer; [`FrameWriter`] wraps
//! the encoded bytes in a cursor for transports that accept only part of a
//! buffer per write call.

use bytes::{BufMut, Bytes};

use super::{FRAME_END, FRAME_HEADER_SIZE, Frame};

/// Serialize a frame into its exact wire layout.
#[must_use]
pub fn encode_frame(frame: &Frame) -> Vec<u8> {
    let payload = frame.payload();
    let mut out = Vec::with_capacity(FRAME_HEADER_SIZE + payload.len() + 1);
    out.put_u8(frame.kind().as_u8());
    out.put_u16(frame.channel());
    out.put_u32(payload.len() as u32);
    out.put_slice(payload);
    out.put_u8(FRAME_END);
    out
}

/// Write cursor over one outbound buffer.
///
/// The connection engine keeps at most one of these in flight; `remaining()`
/// exposes the unwritten tail and `advance()` consumes however many bytes
/// the transport actually accepted.
#[derive(Debug)]
pub struct FrameWriter {
    bytes: Bytes,
    written: usize,
}

impl FrameWriter {
    /// Cursor over the wire encoding of a frame.
    #[must_use]
    pub fn frame(frame: &Frame) -> Self {
        Self {
            bytes: Bytes::from(encode_frame(frame)),
            written: 0,
        }
    }

    /// Cursor over raw bytes (the protocol header preamble is not a frame).
    pub fn raw(bytes: impl Into<Bytes>) -> Self {
        Self {
            bytes: bytes.into(),
            written: 0,
        }
    }

    /// The bytes not yet accepted by the transport.
    #[must_use]
    pub fn remaining(&self) -> &[u8] {
        &self.bytes[self.written..]
    }

    /// Record that the transport accepted `n` more bytes.
    pub fn advance(&mut self, n: usize) {
        self.written += n;
        debug_assert!(self.written <= self.bytes.len());
    }

    /// Whether every byte has been written.
    #[must_use]
    pub fn is_done(&self) -> bool {
        self.written >= self.bytes.len()
    }

    /// Whether a prefix of this frame already reached the wire.
    ///
    /// A started frame must be finished even when discarding queued
    /// output, otherwise the byte stream desynchronizes.
    #[must_use]
    pub fn started(&self) -> bool {
        self.written > 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::FrameKind;

    #[test]
    fn exact_wire_layout() {
        let frame = Frame::new(FrameKind::Method, 0x0102, &b"ab"[..]);
        let wire = encode_frame(&frame);
        assert_eq!(wire, [1, 0x01, 0x02, 0, 0, 0, 2, b'a', b'b', FRAME_END]);
    }

    #[test]
    fn heartbeat_wire_layout() {
        let wire = encode_frame(&Frame::heartbeat());
        assert_eq!(wire, [8, 0, 0, 0, 0, 0, 0, FRAME_END]);
    }

    #[test]
    fn cursor_resumes_across_partial_writes() {
        let frame = Frame::method(1, &b"partial write"[..]);
        let wire = encode_frame(&frame);
        let mut writer = FrameWriter::frame(&frame);

        let mut sent = Vec::new();
        while !writer.is_done() {
            // Transport accepts at most 3 bytes per call.
            let chunk = &writer.remaining()[..writer.remaining().len().min(3)];
            sent.extend_from_slice(chunk);
            let n = chunk.len();
            writer.advance(n);
        }
        assert_eq!(sent, wire);
    }

    #[test]
    fn raw_cursor_carries_preamble() {
        let writer = FrameWriter::raw(crate::protocol::PROTOCOL_HEADER.to_vec());
        assert_eq!(writer.remaining(), crate::protocol::PROTOCOL_HEADER);
    }
}
