//! Broker connection engine.
//!
//! A [`Connection`] spawns one reactor thread that owns the socket and
//! drives the protocol handshake, frame multiplexing, heartbeats and the
//! close sequence. Application threads hold [`Connection`] and
//! [`Channel`] handles, which marshal requests onto the reactor and wait
//! on [`PendingReply`] values for the answers.

mod channel;
mod channel0;
mod config;
#[allow(clippy::module_inception)]
mod connection;
mod error;
mod handler;
mod pending;
mod reactor;
mod state;

pub use channel::Channel;
pub use config::{ClosePolicy, ConnectionConfig};
pub use connection::Connection;
pub use error::{ConnectionError, Result};
pub use handler::{ControlEvent, FrameHandler, Outbox};
pub use pending::{PendingReply, Promise, pending};
pub use state::ConnectionState;
