//! Channel handles and per-channel reactor state
//!
//! [`Channel`] is the caller-facing handle: it posts commands to the reactor
//! and never touches the socket or registry itself. [`ChannelState`] is the
//! reactor-owned side, registered by channel id and fed frames through the
//! [`FrameHandler`] seam. The engine alone owns channel lifetime; dropping a
//! handle deregisters the channel but leaves the shared socket untouched.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Sender;
use std::time::Duration;

use bytes::Bytes;
use tracing::{debug, trace};

use crate::protocol::{Frame, FrameKind, Method};

use super::handler::{ControlEvent, FrameHandler, Outbox};
use super::pending::{Promise, pending};
use super::reactor::Command;
use super::state::{ConnectionState, StateCell};
use super::{ConnectionError, Result};

/// Reply code sent with client-initiated closes.
const REPLY_SUCCESS: u16 = 200;

/// A live channel on an open connection.
///
/// Obtained from [`Connection::open_channel`](super::Connection::open_channel).
/// Safe to use from any thread; every operation is marshaled onto the
/// reactor. The command sender is held through an `Arc` so the reactor,
/// which keeps only a weak reference, can observe the last handle dropping.
#[derive(Debug)]
pub struct Channel {
    id: u16,
    commands: Arc<Sender<Command>>,
    closed: Arc<AtomicBool>,
    state: StateCell,
    reply_timeout: Duration,
}

impl Channel {
    pub(crate) fn new(
        id: u16,
        commands: Arc<Sender<Command>>,
        closed: Arc<AtomicBool>,
        state: StateCell,
        reply_timeout: Duration,
    ) -> Self {
        Self {
            id,
            commands,
            closed,
            state,
            reply_timeout,
        }
    }

    /// Channel id on the wire.
    #[must_use]
    pub const fn id(&self) -> u16 {
        self.id
    }

    /// Whether the channel has been closed, by either side.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Enqueue a method frame on this channel.
    ///
    /// The payload is the opaque method encoding from the layer above; the
    /// engine only frames it. Ordering follows enqueue order.
    pub fn send_method(&self, payload: impl Into<Bytes>) -> Result<()> {
        self.send_frame(Frame::method(self.id, payload))
    }

    /// Enqueue an arbitrary frame (method, content header, or body) on this
    /// channel.
    ///
    /// # Errors
    ///
    /// [`ConnectionError::ChannelClosed`] after the channel closed, or
    /// [`ConnectionError::InvalidState`] when the connection is not open;
    /// a frame is never silently discarded after an `Ok` return.
    pub fn send_frame(&self, frame: Frame) -> Result<()> {
        if self.is_closed() {
            return Err(ConnectionError::ChannelClosed);
        }
        let state = self.state.load();
        if state != ConnectionState::Open {
            return Err(ConnectionError::InvalidState { state });
        }
        self.commands
            .send(Command::Enqueue(frame))
            .map_err(|_| ConnectionError::ConnectionClosed)
    }

    /// Close the channel with the broker and deregister it.
    ///
    /// # Errors
    ///
    /// [`ConnectionError::Timeout`] if the broker's acknowledgment does not
    /// arrive within the reply timeout; the connection itself stays up.
    pub fn close(self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let (promise, reply) = pending();
        self.commands
            .send(Command::CloseChannel {
                id: self.id,
                promise: Some(promise),
            })
            .map_err(|_| ConnectionError::ConnectionClosed)?;
        reply.wait_timeout(self.reply_timeout)
    }
}

impl Drop for Channel {
    fn drop(&mut self) {
        // Deregister without waiting; never touches the socket directly.
        if !self.closed.swap(true, Ordering::AcqRel) {
            let _ = self.commands.send(Command::CloseChannel {
                id: self.id,
                promise: None,
            });
        }
    }
}

/// Reactor-owned state for one open channel.
#[derive(Debug)]
pub(crate) struct ChannelState {
    id: u16,
    closed: Arc<AtomicBool>,
    pending_close: Option<Promise<()>>,
}

impl ChannelState {
    pub(crate) fn new(id: u16) -> Self {
        Self {
            id,
            closed: Arc::new(AtomicBool::new(false)),
            pending_close: None,
        }
    }

    pub(crate) fn closed_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.closed)
    }

    /// Attach the promise for a caller-requested close.
    pub(crate) fn begin_close(&mut self, promise: Option<Promise<()>>) {
        self.pending_close = promise;
    }

    fn mark_closed(&self) {
        self.closed.store(true, Ordering::Release);
    }
}

impl FrameHandler for ChannelState {
    fn process_frame(&mut self, frame: Frame, out: &mut Outbox) -> Result<()> {
        match frame.kind() {
            FrameKind::Method => match Method::decode(frame.into_payload())? {
                Method::ChannelClose {
                    reply_code,
                    reply_text,
                    ..
                } => {
                    debug!(channel = self.id, code = reply_code, text = %reply_text,
                           "channel closed by broker");
                    self.mark_closed();
                    out.push_frame(Method::ChannelCloseOk.into_frame(self.id)?);
                    if let Some(promise) = self.pending_close.take() {
                        promise.fulfill(());
                    }
                    out.push_event(ControlEvent::ChannelClosedByBroker { id: self.id });
                }
                Method::ChannelCloseOk => {
                    debug!(channel = self.id, "channel close acknowledged");
                    self.mark_closed();
                    if let Some(promise) = self.pending_close.take() {
                        promise.fulfill(());
                    }
                    out.push_event(ControlEvent::ChannelCloseAcked { id: self.id });
                }
                // Domain methods belong to the layer above the engine.
                other => trace!(channel = self.id, ?other, "method left to the domain layer"),
            },
            FrameKind::Header | FrameKind::Body => {
                trace!(channel = self.id, kind = %frame.kind(), "content frame left to the domain layer");
            }
            // Heartbeats never reach per-channel dispatch.
            FrameKind::Heartbeat => {}
        }
        Ok(())
    }

    fn connection_lost(&mut self, _error: &ConnectionError) {
        self.mark_closed();
        if let Some(promise) = self.pending_close.take() {
            promise.fail(ConnectionError::ConnectionClosed);
        }
    }
}

/// Client-initiated channel close method.
pub(crate) fn channel_close_method() -> Method {
    Method::ChannelClose {
        reply_code: REPLY_SUCCESS,
        reply_text: "goodbye".to_string(),
        class_id: 0,
        method_id: 0,
    }
}
