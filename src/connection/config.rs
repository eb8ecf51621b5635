//! Connection configuration

use std::time::Duration;

use crate::protocol::DEFAULT_FRAME_MAX;

/// What to do with frames still queued when the connection closes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ClosePolicy {
    /// Drain the write queue before sending the close method
    #[default]
    Flush,
    /// Drop queued frames and close immediately
    Discard,
}

/// Connection configuration options.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Broker hostname or address.
    pub host: String,
    /// Broker port.
    pub port: u16,
    /// Username for PLAIN authentication.
    pub username: String,
    /// Password for PLAIN authentication.
    pub password: String,
    /// Virtual host to open.
    pub vhost: String,
    /// Requested channel-id ceiling (0 = defer to the broker).
    pub channel_max: u16,
    /// Requested maximum frame payload size.
    pub frame_max: u32,
    /// Requested heartbeat interval in seconds (0 = disabled).
    pub heartbeat: u16,
    /// Timeout covering TCP connect plus the protocol handshake.
    pub connect_timeout: Duration,
    /// Default wait for request/response operations (channel open, close).
    pub reply_timeout: Duration,
    /// Write-queue disposition on close.
    pub close_policy: ClosePolicy,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5672,
            username: "guest".to_string(),
            password: "guest".to_string(),
            vhost: "/".to_string(),
            channel_max: 0,
            frame_max: DEFAULT_FRAME_MAX as u32,
            heartbeat: 60,
            connect_timeout: Duration::from_secs(10),
            reply_timeout: Duration::from_secs(10),
            close_policy: ClosePolicy::Flush,
        }
    }
}

impl ConnectionConfig {
    /// Config pointing at the given host and port, defaults elsewhere.
    #[must_use]
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            ..Self::default()
        }
    }
}
