//! Protocol frames
//!
//! Wire layout: `kind (1) | channel (2) | payload size (4) | payload | 0xCE`.

use bytes::Bytes;
use std::fmt;

use super::{Error, Result};

/// Frame kind byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum FrameKind {
    /// Protocol method with class/method ids and arguments
    Method = 1,
    /// Content header preceding a body
    Header = 2,
    /// Content body fragment
    Body = 3,
    /// Connection keep-alive, empty payload
    Heartbeat = 8,
}

impl FrameKind {
    /// Convert from the wire byte.
    pub fn from_u8(kind: u8) -> Result<Self> {
        match kind {
            1 => Ok(Self::Method),
            2 => Ok(Self::Header),
            3 => Ok(Self::Body),
            8 => Ok(Self::Heartbeat),
            kind => Err(Error::UnknownFrameKind { kind }),
        }
    }

    /// Convert to the wire byte.
    #[must_use]
    pub const fn as_u8(self) -> u8 {
        self as u8
    }
}

impl fmt::Display for FrameKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Method => "Method",
            Self::Header => "Header",
            Self::Body => "Body",
            Self::Heartbeat => "Heartbeat",
        };
        write!(f, "{name}")
    }
}

/// One protocol frame: kind, owning channel, opaque payload.
///
/// Immutable once constructed, whether assembled by the
/// [`FrameBuilder`](super::FrameBuilder) from inbound bytes or composed by a
/// caller for the outbound queue.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    kind: FrameKind,
    channel: u16,
    payload: Bytes,
}

impl Frame {
    /// Compose a frame for the given channel.
    pub fn new(kind: FrameKind, channel: u16, payload: impl Into<Bytes>) -> Self {
        Self {
            kind,
            channel,
            payload: payload.into(),
        }
    }

    /// A method frame.
    pub fn method(channel: u16, payload: impl Into<Bytes>) -> Self {
        Self::new(FrameKind::Method, channel, payload)
    }

    /// A heartbeat frame (always channel 0, empty payload).
    #[must_use]
    pub fn heartbeat() -> Self {
        Self::new(FrameKind::Heartbeat, 0, Bytes::new())
    }

    /// Frame kind.
    #[must_use]
    pub const fn kind(&self) -> FrameKind {
        self.kind
    }

    /// Channel id this frame belongs to.
    #[must_use]
    pub const fn channel(&self) -> u16 {
        self.channel
    }

    /// Frame payload.
    #[must_use]
    pub const fn payload(&self) -> &Bytes {
        &self.payload
    }

    /// Take the payload out of the frame.
    #[must_use]
    pub fn into_payload(self) -> Bytes {
        self.payload
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_kind_roundtrip() {
        for kind in [
            FrameKind::Method,
            FrameKind::Header,
            FrameKind::Body,
            FrameKind::Heartbeat,
        ] {
            assert_eq!(FrameKind::from_u8(kind.as_u8()).unwrap(), kind);
        }
    }

    #[test]
    fn unknown_kind_rejected() {
        let err = FrameKind::from_u8(7).unwrap_err();
        assert!(matches!(err, Error::UnknownFrameKind { kind: 7 }));
    }

    #[test]
    fn heartbeat_is_empty_on_channel_zero() {
        let hb = Frame::heartbeat();
        assert_eq!(hb.kind(), FrameKind::Heartbeat);
        assert_eq!(hb.channel(), 0);
        assert!(hb.payload().is_empty());
    }
}
