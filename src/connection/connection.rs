//! The public connection handle.

use std::io;
use std::net::{TcpStream, ToSocketAddrs};
use std::sync::Arc;
use std::sync::mpsc::{self, Sender};
use std::thread::JoinHandle;
use std::time::Duration;

use tracing::{debug, instrument};

use super::channel::Channel;
use super::config::ConnectionConfig;
use super::error::{ConnectionError, Result};
use super::pending::{PendingReply, pending};
use super::reactor::{self, Command};
use super::state::{ConnectionState, StateCell};

/// Extra slack granted to `close` beyond the reactor's own deadline, so
/// the reactor always times out first and gets to resolve the promise.
const CLOSE_GRACE: Duration = Duration::from_secs(1);

/// A live broker connection.
///
/// Owns nothing but a command queue into the reactor thread, so it is
/// cheap to move and safe to share behind an `Arc`. Dropping the handle
/// (and every [`Channel`] cloned off it) makes the reactor close the
/// connection on its own; call [`close`](Self::close) to observe the
/// shutdown instead.
#[derive(Debug)]
pub struct Connection {
    commands: Arc<Sender<Command>>,
    state: StateCell,
    reply_timeout: Duration,
    reactor: Option<JoinHandle<()>>,
}

impl Connection {
    /// Dial the broker and run the protocol handshake to completion.
    ///
    /// Blocks for at most `config.connect_timeout`; on failure the
    /// spawned reactor winds itself down in the background.
    #[instrument(skip(config), fields(host = %config.host, port = config.port, vhost = %config.vhost))]
    pub fn connect(config: ConnectionConfig) -> Result<Self> {
        let address = (config.host.as_str(), config.port)
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| {
                ConnectionError::Io(io::Error::new(
                    io::ErrorKind::NotFound,
                    "host resolved to no addresses",
                ))
            })?;
        let socket = TcpStream::connect_timeout(&address, config.connect_timeout)?;
        socket.set_nodelay(true)?;
        socket.set_nonblocking(true)?;

        let (command_tx, command_rx) = mpsc::channel();
        let command_tx = Arc::new(command_tx);
        let state = StateCell::new(ConnectionState::Connecting);
        let (connect_promise, connected) = pending();
        let handle = reactor::spawn(
            socket,
            command_rx,
            Arc::downgrade(&command_tx),
            state.clone(),
            &config,
            connect_promise,
        )?;

        let connection = Self {
            commands: command_tx,
            state,
            reply_timeout: config.reply_timeout,
            reactor: Some(handle),
        };
        connected.wait_timeout(config.connect_timeout)?;
        debug!("connection open");
        Ok(connection)
    }

    /// Current lifecycle state, as last published by the reactor.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.state.load()
    }

    /// Ask for a new channel without waiting for the answer.
    ///
    /// The returned [`PendingReply`] resolves once the broker confirms
    /// or rejects the open. Dropping it abandons the request; the
    /// reactor still installs the channel but nobody holds its handle,
    /// so it is closed again when the connection shuts down.
    pub fn request_channel(&self) -> Result<PendingReply<Channel>> {
        let state = self.state.load();
        if state != ConnectionState::Open {
            return Err(ConnectionError::InvalidState { state });
        }
        let (promise, reply) = pending();
        self.commands
            .send(Command::OpenChannel(promise))
            .map_err(|_| ConnectionError::ConnectionClosed)?;
        Ok(reply)
    }

    /// Open a channel, waiting as long as it takes.
    pub fn open_channel(&self) -> Result<Channel> {
        self.request_channel()?.wait()
    }

    /// Open a channel, giving up after `timeout`.
    pub fn open_channel_timeout(&self, timeout: Duration) -> Result<Channel> {
        self.request_channel()?.wait_timeout(timeout)
    }

    /// Close the connection and wait for the shutdown to complete.
    ///
    /// Sends `connection.close`, waits for the broker's acknowledgment
    /// (bounded by the configured reply timeout) and joins the reactor
    /// thread. Succeeds even when the broker never answers; the socket
    /// is shut down regardless.
    pub fn close(mut self) -> Result<()> {
        let (promise, reply) = pending();
        self.commands
            .send(Command::CloseConnection(promise))
            .map_err(|_| ConnectionError::ConnectionClosed)?;
        let result = reply.wait_timeout(self.reply_timeout + CLOSE_GRACE);
        if let Some(handle) = self.reactor.take() {
            let _ = handle.join();
        }
        result
    }
}
