//! The single-threaded I/O loop behind a [`super::Connection`].
//!
//! One reactor thread owns the socket, the frame builder, the write queue
//! and every channel's engine-side state. Handles never touch the socket;
//! they post [`Command`]s over an mpsc queue and wait on a reply. The loop
//! alternates between draining commands, pumping the nonblocking socket in
//! both directions and ticking heartbeats, then parks on the command queue
//! so an idle connection costs nothing but a timer wakeup.

use std::collections::{HashMap, VecDeque};
use std::io::{self, Read, Write};
use std::net::{Shutdown, TcpStream};
use std::sync::Weak;
use std::sync::mpsc::{Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::{debug, trace, warn};

use crate::protocol::{
    DEFAULT_FRAME_MAX, Frame, FrameBuilder, FrameKind, FrameWriter, Method, PROTOCOL_HEADER,
};

use super::channel::{Channel, ChannelState, channel_close_method};
use super::channel0::{ControlChannel, connection_close_method};
use super::config::{ClosePolicy, ConnectionConfig};
use super::error::{ConnectionError, Result};
use super::handler::{ControlEvent, FrameHandler, Outbox, dispatch};
use super::pending::Promise;
use super::state::{ConnectionState, StateCell};

/// How long the loop parks when nothing is happening.
const POLL_INTERVAL: Duration = Duration::from_millis(5);

/// Size of the reusable socket read buffer.
const READ_BUFFER_SIZE: usize = 16 * 1024;

/// A request marshaled from a handle thread onto the reactor.
#[derive(Debug)]
pub(crate) enum Command {
    /// Queue a fully built frame for writing.
    Enqueue(Frame),
    /// Allocate an id, send `channel.open` and resolve with a handle.
    OpenChannel(Promise<Channel>),
    /// Send `channel.close`; `promise` is absent when the handle was
    /// dropped rather than closed explicitly.
    CloseChannel {
        id: u16,
        promise: Option<Promise<()>>,
    },
    /// Begin an orderly connection shutdown.
    CloseConnection(Promise<()>),
}

pub(crate) struct Reactor {
    socket: TcpStream,
    commands: Receiver<Command>,
    // Weak: only handles hold the sender strongly, so the receiver
    // reports Disconnected the moment the last handle drops.
    command_tx: Weak<Sender<Command>>,
    state: StateCell,
    builder: FrameBuilder,
    write_queue: VecDeque<FrameWriter>,
    registry: HashMap<u16, ChannelState>,
    channel0: ControlChannel,
    pending_opens: HashMap<u16, Promise<Channel>>,
    channel_max: u16,
    heartbeat: Duration,
    reply_timeout: Duration,
    close_policy: ClosePolicy,
    close_promise: Option<Promise<()>>,
    close_deadline: Option<Instant>,
    commands_gone: bool,
    last_read: Instant,
    last_write: Instant,
    read_buf: Box<[u8]>,
}

/// Spawn the reactor thread for an already connected, nonblocking socket.
pub(crate) fn spawn(
    socket: TcpStream,
    commands: Receiver<Command>,
    command_tx: Weak<Sender<Command>>,
    state: StateCell,
    config: &ConnectionConfig,
    connect_promise: Promise<()>,
) -> io::Result<JoinHandle<()>> {
    let reactor = Reactor::new(socket, commands, command_tx, state, config, connect_promise);
    thread::Builder::new()
        .name("marling-reactor".into())
        .spawn(move || reactor.run())
}

impl Reactor {
    fn new(
        socket: TcpStream,
        commands: Receiver<Command>,
        command_tx: Weak<Sender<Command>>,
        state: StateCell,
        config: &ConnectionConfig,
        connect_promise: Promise<()>,
    ) -> Self {
        let mut write_queue = VecDeque::new();
        // The protocol header is raw bytes, not a frame.
        write_queue.push_back(FrameWriter::raw(PROTOCOL_HEADER.to_vec()));
        state.store(ConnectionState::HandshakeInFlight);
        let now = Instant::now();
        Self {
            socket,
            commands,
            command_tx,
            state,
            builder: FrameBuilder::with_max_payload(DEFAULT_FRAME_MAX),
            write_queue,
            registry: HashMap::new(),
            channel0: ControlChannel::new(config, connect_promise),
            pending_opens: HashMap::new(),
            channel_max: config.channel_max,
            heartbeat: Duration::ZERO,
            reply_timeout: config.reply_timeout,
            close_policy: config.close_policy,
            close_promise: None,
            close_deadline: None,
            commands_gone: false,
            last_read: now,
            last_write: now,
            read_buf: vec![0u8; READ_BUFFER_SIZE].into_boxed_slice(),
        }
    }

    pub(crate) fn run(mut self) {
        match self.run_loop() {
            Ok(()) => {
                debug!("reactor stopped");
                self.teardown(&ConnectionError::ConnectionClosed);
            }
            Err(error) => {
                warn!(%error, "connection failed");
                self.teardown(&error);
            }
        }
    }

    fn run_loop(&mut self) -> Result<()> {
        loop {
            self.drain_commands()?;
            self.pump_writes()?;
            self.pump_reads()?;
            self.heartbeat_tick()?;
            self.check_close_deadline();
            if self.state.load() == ConnectionState::Closed {
                return Ok(());
            }
            self.park()?;
        }
    }

    // -- command intake ------------------------------------------------

    fn drain_commands(&mut self) -> Result<()> {
        loop {
            match self.commands.try_recv() {
                Ok(command) => self.handle_command(command)?,
                Err(TryRecvError::Empty) => return Ok(()),
                Err(TryRecvError::Disconnected) => {
                    self.on_commands_gone();
                    return Ok(());
                }
            }
        }
    }

    fn park(&mut self) -> Result<()> {
        if self.commands_gone {
            thread::sleep(POLL_INTERVAL);
            return Ok(());
        }
        match self.commands.recv_timeout(POLL_INTERVAL) {
            Ok(command) => self.handle_command(command),
            Err(RecvTimeoutError::Timeout) => Ok(()),
            Err(RecvTimeoutError::Disconnected) => {
                self.on_commands_gone();
                Ok(())
            }
        }
    }

    /// Every handle (connection and channels) has been dropped. Shut
    /// down in an orderly fashion; nobody is left to observe the result.
    fn on_commands_gone(&mut self) {
        if self.commands_gone {
            return;
        }
        self.commands_gone = true;
        let state = self.state.load();
        if matches!(
            state,
            ConnectionState::Open | ConnectionState::HandshakeInFlight
        ) {
            debug!("all handles dropped, closing connection");
            self.begin_connection_close(None);
        }
    }

    fn handle_command(&mut self, command: Command) -> Result<()> {
        match command {
            Command::Enqueue(frame) => {
                let state = self.state.load();
                if state == ConnectionState::Open {
                    self.enqueue(frame);
                } else {
                    trace!(%state, "dropping frame posted outside Open");
                }
            }
            Command::OpenChannel(promise) => self.start_open_channel(promise),
            Command::CloseChannel { id, promise } => self.start_close_channel(id, promise)?,
            Command::CloseConnection(promise) => self.begin_connection_close(Some(promise)),
        }
        Ok(())
    }

    fn start_open_channel(&mut self, promise: Promise<Channel>) {
        let state = self.state.load();
        if state != ConnectionState::Open {
            promise.fail(ConnectionError::InvalidState { state });
            return;
        }
        let id = match next_free_channel_id(&self.registry, &self.pending_opens, self.channel_max) {
            Some(id) => id,
            None => {
                promise.fail(ConnectionError::ChannelsExhausted);
                return;
            }
        };
        match Method::ChannelOpen.into_frame(id) {
            Ok(frame) => {
                debug!(channel = id, "requesting channel open");
                self.pending_opens.insert(id, promise);
                self.enqueue(frame);
            }
            Err(error) => promise.fail(error.into()),
        }
    }

    fn start_close_channel(&mut self, id: u16, promise: Option<Promise<()>>) -> Result<()> {
        if !self.registry.contains_key(&id) {
            // Already torn down (broker-closed or duplicate request).
            if let Some(promise) = promise {
                promise.fulfill(());
            }
            return Ok(());
        }
        let frame = channel_close_method().into_frame(id)?;
        if let Some(state) = self.registry.get_mut(&id) {
            state.begin_close(promise);
        }
        debug!(channel = id, "closing channel");
        self.enqueue(frame);
        Ok(())
    }

    fn begin_connection_close(&mut self, promise: Option<Promise<()>>) {
        let state = self.state.load();
        if !matches!(
            state,
            ConnectionState::Open | ConnectionState::HandshakeInFlight
        ) {
            if let Some(promise) = promise {
                promise.fail(ConnectionError::InvalidState { state });
            }
            return;
        }
        if self.close_policy == ClosePolicy::Discard {
            // Drop queued output, but never truncate a frame that has
            // already put bytes on the wire.
            let keep_head = self
                .write_queue
                .front()
                .is_some_and(FrameWriter::started);
            if keep_head {
                self.write_queue.truncate(1);
            } else {
                self.write_queue.clear();
            }
        }
        match connection_close_method().into_frame(0) {
            Ok(frame) => self.enqueue(frame),
            Err(error) => warn!(%error, "failed to encode connection.close"),
        }
        self.channel0.begin_close();
        self.state.store(ConnectionState::Closing);
        self.close_promise = promise;
        self.close_deadline = Some(Instant::now() + self.reply_timeout);
        debug!("connection close sent");
    }

    fn check_close_deadline(&mut self) {
        if self.state.load() != ConnectionState::Closing {
            return;
        }
        if let Some(deadline) = self.close_deadline {
            if Instant::now() >= deadline {
                warn!("close acknowledgment timed out, shutting down anyway");
                self.finish_close();
            }
        }
    }

    fn finish_close(&mut self) {
        let _ = self.pump_writes();
        self.state.store(ConnectionState::Closed);
        if let Some(promise) = self.close_promise.take() {
            promise.fulfill(());
        }
    }

    // -- socket pumps --------------------------------------------------

    fn enqueue(&mut self, frame: Frame) {
        trace!(kind = %frame.kind(), channel = frame.channel(), "queueing frame");
        self.write_queue.push_back(FrameWriter::frame(&frame));
        // Anything queued counts as outbound liveness for heartbeats,
        // even if the socket accepts it a tick later.
        self.last_write = Instant::now();
    }

    fn pump_writes(&mut self) -> Result<()> {
        while let Some(writer) = self.write_queue.front_mut() {
            match self.socket.write(writer.remaining()) {
                Ok(0) => {
                    return Err(ConnectionError::Io(io::Error::new(
                        io::ErrorKind::WriteZero,
                        "socket accepted no bytes",
                    )));
                }
                Ok(n) => {
                    writer.advance(n);
                    self.last_write = Instant::now();
                    if writer.is_done() {
                        self.write_queue.pop_front();
                    }
                }
                Err(error) if error.kind() == io::ErrorKind::WouldBlock => return Ok(()),
                Err(error) if error.kind() == io::ErrorKind::Interrupted => continue,
                Err(error) => return Err(error.into()),
            }
        }
        Ok(())
    }

    fn pump_reads(&mut self) -> Result<()> {
        loop {
            match self.socket.read(&mut self.read_buf) {
                Ok(0) => {
                    if self.state.load() == ConnectionState::Closing {
                        // The broker may hang up right after close-ok.
                        self.finish_close();
                        return Ok(());
                    }
                    return Err(ConnectionError::Io(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        "broker closed the socket",
                    )));
                }
                Ok(n) => {
                    self.last_read = Instant::now();
                    let frames = self.builder.feed(&self.read_buf[..n])?;
                    for frame in frames {
                        self.dispatch_frame(frame)?;
                    }
                }
                Err(error) if error.kind() == io::ErrorKind::WouldBlock => return Ok(()),
                Err(error) if error.kind() == io::ErrorKind::Interrupted => continue,
                Err(error) => {
                    if self.state.load() == ConnectionState::Closing
                        && error.kind() == io::ErrorKind::ConnectionReset
                    {
                        self.finish_close();
                        return Ok(());
                    }
                    return Err(error.into());
                }
            }
        }
    }

    // -- inbound dispatch ----------------------------------------------

    fn dispatch_frame(&mut self, frame: Frame) -> Result<()> {
        if frame.kind() == FrameKind::Heartbeat {
            if frame.channel() != 0 {
                return Err(ConnectionError::UnexpectedMethod {
                    channel: frame.channel(),
                });
            }
            trace!("heartbeat received");
            return Ok(());
        }
        let mut out = Outbox::new();
        let channel = frame.channel();
        if channel == 0 {
            self.channel0.process_frame(frame, &mut out)?;
        } else if self.pending_opens.contains_key(&channel) {
            self.finish_open_channel(channel, frame, &mut out)?;
        } else {
            dispatch(&mut self.registry, frame, &mut out)?;
        }
        self.apply_outbox(out)
    }

    fn finish_open_channel(&mut self, id: u16, frame: Frame, out: &mut Outbox) -> Result<()> {
        if frame.kind() != FrameKind::Method {
            return Err(ConnectionError::UnexpectedMethod { channel: id });
        }
        let method = Method::decode(frame.into_payload())?;
        let Some(promise) = self.pending_opens.remove(&id) else {
            return Err(ConnectionError::UnknownChannel { channel: id });
        };
        match method {
            Method::ChannelOpenOk => {
                let Some(commands) = self.command_tx.upgrade() else {
                    // Every handle is gone; nobody is left to hold this
                    // channel. The disconnect path closes the connection.
                    promise.fail(ConnectionError::ConnectionClosed);
                    return Ok(());
                };
                let state = ChannelState::new(id);
                let handle = Channel::new(
                    id,
                    commands,
                    state.closed_flag(),
                    self.state.clone(),
                    self.reply_timeout,
                );
                self.registry.insert(id, state);
                debug!(channel = id, "channel open");
                promise.fulfill(handle);
            }
            Method::ChannelClose {
                reply_code,
                reply_text,
                ..
            } => {
                warn!(channel = id, code = reply_code, text = %reply_text, "channel open rejected");
                out.push_frame(Method::ChannelCloseOk.into_frame(id)?);
                promise.fail(ConnectionError::ChannelRejected {
                    code: reply_code,
                    text: reply_text,
                });
            }
            _ => {
                promise.fail(ConnectionError::UnexpectedMethod { channel: id });
                return Err(ConnectionError::UnexpectedMethod { channel: id });
            }
        }
        Ok(())
    }

    fn apply_outbox(&mut self, mut out: Outbox) -> Result<()> {
        let (frames, events) = out.take();
        for frame in frames {
            self.enqueue(frame);
        }
        for event in events {
            self.apply_event(event)?;
        }
        Ok(())
    }

    fn apply_event(&mut self, event: ControlEvent) -> Result<()> {
        match event {
            ControlEvent::TuningAgreed {
                channel_max,
                frame_max,
                heartbeat,
            } => {
                self.channel_max = channel_max;
                if frame_max > 0 {
                    self.builder.set_max_payload(frame_max as usize);
                }
                self.heartbeat = Duration::from_secs(u64::from(heartbeat));
            }
            ControlEvent::ConnectionOpened => {
                self.state.store(ConnectionState::Open);
                self.channel0.finish_connect();
            }
            ControlEvent::ConnectionCloseAcked => {
                self.finish_close();
            }
            ControlEvent::ConnectionClosedByBroker { code, text } => {
                // Flush the close-ok reply before tearing down.
                let _ = self.pump_writes();
                return Err(ConnectionError::Rejected { code, text });
            }
            ControlEvent::ChannelClosedByBroker { id } | ControlEvent::ChannelCloseAcked { id } => {
                self.registry.remove(&id);
            }
        }
        Ok(())
    }

    // -- liveness ------------------------------------------------------

    fn heartbeat_tick(&mut self) -> Result<()> {
        if self.heartbeat.is_zero() || self.state.load() != ConnectionState::Open {
            return Ok(());
        }
        let now = Instant::now();
        if now.duration_since(self.last_read) >= self.heartbeat * 2 {
            return Err(ConnectionError::HeartbeatTimeout);
        }
        if now.duration_since(self.last_write) >= self.heartbeat / 2 {
            trace!("sending heartbeat");
            self.enqueue(Frame::heartbeat());
        }
        Ok(())
    }

    // -- teardown ------------------------------------------------------

    /// Resolve every outstanding wait and release the socket. Runs
    /// exactly once, on loop exit, whatever the cause.
    fn teardown(&mut self, error: &ConnectionError) {
        self.state.store(ConnectionState::Closed);
        let _ = self.socket.shutdown(Shutdown::Both);
        self.channel0.connection_lost(error);
        for (_, mut state) in self.registry.drain() {
            state.connection_lost(error);
        }
        for (_, promise) in self.pending_opens.drain() {
            promise.fail(ConnectionError::ConnectionClosed);
        }
        if let Some(promise) = self.close_promise.take() {
            // The connection is down, which is what close asked for.
            promise.fulfill(());
        }
    }
}

/// Lowest id not currently in use or awaiting an open-ok. Reusing the
/// smallest free id keeps allocation deterministic and lets a rejected
/// open's id become available again immediately.
fn next_free_channel_id(
    registry: &HashMap<u16, ChannelState>,
    pending_opens: &HashMap<u16, Promise<Channel>>,
    channel_max: u16,
) -> Option<u16> {
    let max = if channel_max == 0 {
        u16::MAX
    } else {
        channel_max
    };
    (1..=max).find(|id| !registry.contains_key(id) && !pending_opens.contains_key(id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::pending::pending;

    #[test]
    fn channel_ids_fill_lowest_gap_first() {
        let mut registry = HashMap::new();
        let mut pending_opens = HashMap::new();
        assert_eq!(next_free_channel_id(&registry, &pending_opens, 0), Some(1));

        registry.insert(1, ChannelState::new(1));
        registry.insert(3, ChannelState::new(3));
        let (promise, _reply) = pending::<Channel>();
        pending_opens.insert(2, promise);
        assert_eq!(next_free_channel_id(&registry, &pending_opens, 0), Some(4));

        pending_opens.clear();
        assert_eq!(next_free_channel_id(&registry, &pending_opens, 0), Some(2));
    }

    #[test]
    fn channel_ids_respect_channel_max() {
        let mut registry = HashMap::new();
        let pending_opens = HashMap::new();
        registry.insert(1, ChannelState::new(1));
        registry.insert(2, ChannelState::new(2));
        assert_eq!(next_free_channel_id(&registry, &pending_opens, 2), None);
        assert_eq!(
            next_free_channel_id(&registry, &pending_opens, 3),
            Some(3)
        );
    }
}
