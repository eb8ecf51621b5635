//! Marling - a lightweight client engine for AMQP-style brokers
//!
//! This library implements the frame layer and connection engine of a
//! binary messaging protocol: wire primitives and field tables, the frame
//! codec, and a single-threaded reactor that multiplexes channels over one
//! TCP connection.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use marling::{Connection, ConnectionConfig};
//!
//! // Dial the broker and run the handshake
//! let connection = Connection::connect(ConnectionConfig::new("localhost", 5672))?;
//!
//! // Open a channel and use it from any thread
//! let channel = connection.open_channel()?;
//! println!("channel {} open", channel.id());
//!
//! // Orderly shutdown
//! channel.close()?;
//! connection.close()?;
//! # Ok::<(), marling::ConnectionError>(())
//! ```
//!
//! # Design
//!
//! - **Incremental frame codec** - feed arbitrary byte slices, get whole
//!   frames out; partial writes resume where they left off
//! - **Recursive field tables** - the full tagged value set, with strict
//!   length validation and a nesting cap
//! - **One reactor thread** - owns the socket and all channel state;
//!   handles post commands and wait on promised replies
//! - **Heartbeats** - sent when the connection is write-idle, fatal when
//!   the broker goes silent

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]

pub mod connection;
pub mod protocol;

pub use connection::{
    Channel, ClosePolicy, Connection, ConnectionConfig, ConnectionError, ConnectionState,
    PendingReply,
};
pub use protocol::{
    DEFAULT_FRAME_MAX, FRAME_END, FieldValue, Frame, FrameBuilder, FrameKind, FrameWriter, Method,
    PROTOCOL_HEADER, Table,
};

/// Protocol version spoken by this client (major, minor).
pub const PROTOCOL_VERSION: (u8, u8) = (0, 9);

/// Default broker port.
pub const DEFAULT_PORT: u16 = 5672;
