//! Connection lifecycle state

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};

/// Lifecycle of a connection.
///
/// `Open` is the only state in which channels may be opened or used; any
/// operation attempted outside it fails immediately with an invalid-state
/// error rather than being silently queued.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnectionState {
    /// No socket yet
    Disconnected = 0,
    /// TCP connect in progress
    Connecting = 1,
    /// Socket up, protocol handshake running on channel 0
    HandshakeInFlight = 2,
    /// Handshake complete; channels may be opened and used
    Open = 3,
    /// Close sent, waiting for the broker's acknowledgment
    Closing = 4,
    /// Socket shut down; every pending request has been resolved
    Closed = 5,
}

impl ConnectionState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Disconnected,
            1 => Self::Connecting,
            2 => Self::HandshakeInFlight,
            3 => Self::Open,
            4 => Self::Closing,
            _ => Self::Closed,
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Disconnected => "Disconnected",
            Self::Connecting => "Connecting",
            Self::HandshakeInFlight => "HandshakeInFlight",
            Self::Open => "Open",
            Self::Closing => "Closing",
            Self::Closed => "Closed",
        };
        write!(f, "{name}")
    }
}

/// Shared state indicator: written only by the reactor, readable anywhere.
#[derive(Debug, Clone)]
pub(crate) struct StateCell(Arc<AtomicU8>);

impl StateCell {
    pub(crate) fn new(state: ConnectionState) -> Self {
        Self(Arc::new(AtomicU8::new(state as u8)))
    }

    pub(crate) fn load(&self) -> ConnectionState {
        ConnectionState::from_u8(self.0.load(Ordering::Acquire))
    }

    pub(crate) fn store(&self, state: ConnectionState) {
        self.0.store(state as u8, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cell_roundtrips_every_state() {
        let cell = StateCell::new(ConnectionState::Disconnected);
        for state in [
            ConnectionState::Connecting,
            ConnectionState::HandshakeInFlight,
            ConnectionState::Open,
            ConnectionState::Closing,
            ConnectionState::Closed,
        ] {
            cell.store(state);
            assert_eq!(cell.load(), state);
        }
    }
}
