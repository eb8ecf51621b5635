//! Connection-level error types

use thiserror::Error;

use super::ConnectionState;
use crate::protocol;

/// Errors surfaced by the connection engine and its channel handles.
///
/// Wire and I/O failures are connection-fatal: the reactor tears the socket
/// down and every pending promise fails. `ChannelRejected`/`ChannelClosed`
/// stay local to one channel.
#[derive(Error, Debug)]
pub enum ConnectionError {
    /// Wire format failure; the byte stream cannot be resynchronized
    #[error("wire format error: {0}")]
    Protocol(#[from] protocol::Error),

    /// Socket failure
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Operation not valid in the current connection state
    #[error("invalid connection state: {state}")]
    InvalidState {
        /// State the connection was in
        state: ConnectionState,
    },

    /// Inbound frame for a channel id that is neither open nor pending
    #[error("frame for unknown channel {channel}")]
    UnknownChannel {
        /// Offending channel id
        channel: u16,
    },

    /// Method that makes no sense given the channel's state
    #[error("unexpected method on channel {channel}")]
    UnexpectedMethod {
        /// Channel the method arrived on
        channel: u16,
    },

    /// Broker speaks an incompatible protocol version
    #[error("unsupported protocol version {major}.{minor}")]
    UnsupportedVersion {
        /// Broker major version
        major: u8,
        /// Broker minor version
        minor: u8,
    },

    /// Broker refused to open a channel
    #[error("channel rejected: {code} {text}")]
    ChannelRejected {
        /// Broker reply code
        code: u16,
        /// Broker reply text
        text: String,
    },

    /// Operation on a channel that has been closed
    #[error("channel closed")]
    ChannelClosed,

    /// Broker closed the connection
    #[error("connection rejected by broker: {code} {text}")]
    Rejected {
        /// Broker reply code
        code: u16,
        /// Broker reply text
        text: String,
    },

    /// Connection has been closed; all pending work failed
    #[error("connection closed")]
    ConnectionClosed,

    /// Caller-side wait expired; the request itself stays registered
    #[error("request timed out")]
    Timeout,

    /// Broker fell silent past the negotiated heartbeat window
    #[error("heartbeat timed out")]
    HeartbeatTimeout,

    /// Every channel id up to the negotiated maximum is in use
    #[error("no free channel ids")]
    ChannelsExhausted,
}

/// Result type alias
pub type Result<T> = std::result::Result<T, ConnectionError>;
