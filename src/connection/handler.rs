//! Frame handler seam
//!
//! Every channel, the reserved control channel included, receives its
//! dispatched frames through [`FrameHandler`]. Handlers run synchronously on
//! the reactor thread and must not block; anything they want to send goes
//! into the [`Outbox`], never directly to the socket.

use std::collections::HashMap;

use crate::protocol::Frame;

use super::{ConnectionError, Result};

/// Sink for frames dispatched to one channel.
pub trait FrameHandler {
    /// Process one inbound frame.
    ///
    /// Called on the reactor thread, in wire arrival order for this channel.
    /// Responses are enqueued via `out`.
    fn process_frame(&mut self, frame: Frame, out: &mut Outbox) -> Result<()>;

    /// The connection died; no further frames will arrive.
    fn connection_lost(&mut self, _error: &ConnectionError) {}
}

/// Control-plane notifications a handler raises for the reactor to act on.
#[derive(Debug, PartialEq)]
pub enum ControlEvent {
    /// Tuning negotiation settled
    TuningAgreed {
        /// Agreed channel-id ceiling (0 = unlimited)
        channel_max: u16,
        /// Agreed frame payload ceiling (0 = unlimited)
        frame_max: u32,
        /// Agreed heartbeat interval in seconds (0 = disabled)
        heartbeat: u16,
    },
    /// Handshake finished; the connection is open for channel traffic
    ConnectionOpened,
    /// Broker acknowledged our connection close
    ConnectionCloseAcked,
    /// Broker closed the connection on us
    ConnectionClosedByBroker {
        /// Broker reply code
        code: u16,
        /// Broker reply text
        text: String,
    },
    /// Broker closed one channel; the connection survives
    ChannelClosedByBroker {
        /// Channel id
        id: u16,
    },
    /// Broker acknowledged a channel close we requested
    ChannelCloseAcked {
        /// Channel id
        id: u16,
    },
}

/// Collects the frames and events a handler produces while processing.
#[derive(Debug, Default)]
pub struct Outbox {
    frames: Vec<Frame>,
    events: Vec<ControlEvent>,
}

impl Outbox {
    /// Empty outbox.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a frame for transmission.
    pub fn push_frame(&mut self, frame: Frame) {
        self.frames.push(frame);
    }

    /// Raise a control event for the reactor.
    pub fn push_event(&mut self, event: ControlEvent) {
        self.events.push(event);
    }

    /// Drain produced frames and events.
    pub(crate) fn take(&mut self) -> (Vec<Frame>, Vec<ControlEvent>) {
        (
            std::mem::take(&mut self.frames),
            std::mem::take(&mut self.events),
        )
    }
}

/// Dispatch one frame into a registry by channel id.
///
/// A frame for an id with no registered handler is a protocol violation and
/// connection-fatal.
pub(crate) fn dispatch<H: FrameHandler>(
    registry: &mut HashMap<u16, H>,
    frame: Frame,
    out: &mut Outbox,
) -> Result<()> {
    let channel = frame.channel();
    match registry.get_mut(&channel) {
        Some(handler) => handler.process_frame(frame, out),
        None => Err(ConnectionError::UnknownChannel { channel }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Recording {
        seen: Vec<Frame>,
    }

    impl FrameHandler for Recording {
        fn process_frame(&mut self, frame: Frame, _out: &mut Outbox) -> Result<()> {
            self.seen.push(frame);
            Ok(())
        }
    }

    #[test]
    fn frames_reach_only_their_own_channel_in_wire_order() {
        let mut registry = HashMap::new();
        registry.insert(1, Recording::default());
        registry.insert(2, Recording::default());

        let wire_order = [
            Frame::method(1, &b"first"[..]),
            Frame::method(2, &b"other"[..]),
            Frame::method(1, &b"second"[..]),
        ];
        let mut out = Outbox::new();
        for frame in wire_order {
            dispatch(&mut registry, frame, &mut out).unwrap();
        }

        let one = &registry[&1].seen;
        assert_eq!(one.len(), 2);
        assert_eq!(one[0].payload().as_ref(), b"first");
        assert_eq!(one[1].payload().as_ref(), b"second");

        let two = &registry[&2].seen;
        assert_eq!(two.len(), 1);
        assert_eq!(two[0].payload().as_ref(), b"other");
    }

    #[test]
    fn unknown_channel_is_fatal() {
        let mut registry: HashMap<u16, Recording> = HashMap::new();
        let err = dispatch(&mut registry, Frame::method(9, &b""[..]), &mut Outbox::new())
            .unwrap_err();
        assert!(matches!(err, ConnectionError::UnknownChannel { channel: 9 }));
    }
}
