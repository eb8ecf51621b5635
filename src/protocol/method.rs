//! Method frame payloads
//!
//! A method frame payload is `class-id (2) | method-id (2) | arguments`.
//! Only the connection and channel lifecycle methods are decoded into typed
//! variants; any other class/method pair passes through as [`Method::Other`]
//! with its argument bytes untouched, so domain traffic reaches channel
//! handlers without the engine having to understand it.

use bytes::Bytes;

use super::{Frame, Result, Table, wire};

/// Connection class id
pub const CLASS_CONNECTION: u16 = 10;
/// Channel class id
pub const CLASS_CHANNEL: u16 = 20;

/// `connection.start`
pub const CONNECTION_START: u16 = 10;
/// `connection.start-ok`
pub const CONNECTION_START_OK: u16 = 11;
/// `connection.tune`
pub const CONNECTION_TUNE: u16 = 30;
/// `connection.tune-ok`
pub const CONNECTION_TUNE_OK: u16 = 31;
/// `connection.open`
pub const CONNECTION_OPEN: u16 = 40;
/// `connection.open-ok`
pub const CONNECTION_OPEN_OK: u16 = 41;
/// `connection.close`
pub const CONNECTION_CLOSE: u16 = 50;
/// `connection.close-ok`
pub const CONNECTION_CLOSE_OK: u16 = 51;

/// `channel.open`
pub const CHANNEL_OPEN: u16 = 10;
/// `channel.open-ok`
pub const CHANNEL_OPEN_OK: u16 = 11;
/// `channel.close`
pub const CHANNEL_CLOSE: u16 = 40;
/// `channel.close-ok`
pub const CHANNEL_CLOSE_OK: u16 = 41;

/// A decoded method frame payload.
#[derive(Debug, Clone, PartialEq)]
pub enum Method {
    /// Broker greeting opening the tuning negotiation
    ConnectionStart {
        /// Protocol major version
        version_major: u8,
        /// Protocol minor version
        version_minor: u8,
        /// Broker-announced properties
        server_properties: Table,
        /// Space-separated auth mechanisms
        mechanisms: String,
        /// Space-separated locales
        locales: String,
    },
    /// Client reply carrying credentials
    ConnectionStartOk {
        /// Client-announced properties
        client_properties: Table,
        /// Chosen auth mechanism
        mechanism: String,
        /// Mechanism-specific response (PLAIN: `\0user\0pass`)
        response: String,
        /// Chosen locale
        locale: String,
    },
    /// Broker-proposed limits
    ConnectionTune {
        /// Maximum channel id (0 = no limit)
        channel_max: u16,
        /// Maximum frame payload size (0 = no limit)
        frame_max: u32,
        /// Heartbeat interval in seconds (0 = disabled)
        heartbeat: u16,
    },
    /// Client-accepted limits
    ConnectionTuneOk {
        /// Agreed maximum channel id
        channel_max: u16,
        /// Agreed maximum frame payload size
        frame_max: u32,
        /// Agreed heartbeat interval in seconds
        heartbeat: u16,
    },
    /// Open the virtual host
    ConnectionOpen {
        /// Virtual host path
        vhost: String,
    },
    /// Virtual host opened
    ConnectionOpenOk,
    /// Orderly or error-driven connection shutdown
    ConnectionClose {
        /// Reply code
        reply_code: u16,
        /// Human-readable reason
        reply_text: String,
        /// Class of the method that caused the close, if any
        class_id: u16,
        /// Method that caused the close, if any
        method_id: u16,
    },
    /// Shutdown acknowledged
    ConnectionCloseOk,
    /// Open a channel (sent on the channel's own id)
    ChannelOpen,
    /// Channel open acknowledged
    ChannelOpenOk,
    /// Channel-level shutdown or open rejection
    ChannelClose {
        /// Reply code
        reply_code: u16,
        /// Human-readable reason
        reply_text: String,
        /// Class of the method that caused the close, if any
        class_id: u16,
        /// Method that caused the close, if any
        method_id: u16,
    },
    /// Channel shutdown acknowledged
    ChannelCloseOk,
    /// Any method the engine does not interpret
    Other {
        /// Class id from the payload
        class_id: u16,
        /// Method id from the payload
        method_id: u16,
        /// Raw argument bytes
        arguments: Bytes,
    },
}

impl Method {
    /// Encode into a method frame payload.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        match self {
            Self::ConnectionStart {
                version_major,
                version_minor,
                server_properties,
                mechanisms,
                locales,
            } => {
                put_ids(&mut out, CLASS_CONNECTION, CONNECTION_START);
                wire::write_u8(&mut out, *version_major);
                wire::write_u8(&mut out, *version_minor);
                server_properties.encode(&mut out)?;
                wire::write_long_string(&mut out, mechanisms);
                wire::write_long_string(&mut out, locales);
            }
            Self::ConnectionStartOk {
                client_properties,
                mechanism,
                response,
                locale,
            } => {
                put_ids(&mut out, CLASS_CONNECTION, CONNECTION_START_OK);
                client_properties.encode(&mut out)?;
                wire::write_short_string(&mut out, mechanism)?;
                wire::write_long_string(&mut out, response);
                wire::write_short_string(&mut out, locale)?;
            }
            Self::ConnectionTune {
                channel_max,
                frame_max,
                heartbeat,
            } => {
                put_ids(&mut out, CLASS_CONNECTION, CONNECTION_TUNE);
                put_tuning(&mut out, *channel_max, *frame_max, *heartbeat);
            }
            Self::ConnectionTuneOk {
                channel_max,
                frame_max,
                heartbeat,
            } => {
                put_ids(&mut out, CLASS_CONNECTION, CONNECTION_TUNE_OK);
                put_tuning(&mut out, *channel_max, *frame_max, *heartbeat);
            }
            Self::ConnectionOpen { vhost } => {
                put_ids(&mut out, CLASS_CONNECTION, CONNECTION_OPEN);
                wire::write_short_string(&mut out, vhost)?;
                // Reserved: capabilities short string, insist octet.
                wire::write_short_string(&mut out, "")?;
                wire::write_u8(&mut out, 0);
            }
            Self::ConnectionOpenOk => {
                put_ids(&mut out, CLASS_CONNECTION, CONNECTION_OPEN_OK);
                wire::write_short_string(&mut out, "")?;
            }
            Self::ConnectionClose {
                reply_code,
                reply_text,
                class_id,
                method_id,
            } => {
                put_ids(&mut out, CLASS_CONNECTION, CONNECTION_CLOSE);
                put_close(&mut out, *reply_code, reply_text, *class_id, *method_id)?;
            }
            Self::ConnectionCloseOk => {
                put_ids(&mut out, CLASS_CONNECTION, CONNECTION_CLOSE_OK);
            }
            Self::ChannelOpen => {
                put_ids(&mut out, CLASS_CHANNEL, CHANNEL_OPEN);
                wire::write_short_string(&mut out, "")?;
            }
            Self::ChannelOpenOk => {
                put_ids(&mut out, CLASS_CHANNEL, CHANNEL_OPEN_OK);
                wire::write_long_string(&mut out, "");
            }
            Self::ChannelClose {
                reply_code,
                reply_text,
                class_id,
                method_id,
            } => {
                put_ids(&mut out, CLASS_CHANNEL, CHANNEL_CLOSE);
                put_close(&mut out, *reply_code, reply_text, *class_id, *method_id)?;
            }
            Self::ChannelCloseOk => {
                put_ids(&mut out, CLASS_CHANNEL, CHANNEL_CLOSE_OK);
            }
            Self::Other {
                class_id,
                method_id,
                arguments,
            } => {
                put_ids(&mut out, *class_id, *method_id);
                out.extend_from_slice(arguments);
            }
        }
        Ok(out)
    }

    /// Decode a method frame payload.
    pub fn decode(payload: Bytes) -> Result<Self> {
        let mut buf = payload;
        let class_id = wire::read_u16(&mut buf)?;
        let method_id = wire::read_u16(&mut buf)?;

        let method = match (class_id, method_id) {
            (CLASS_CONNECTION, CONNECTION_START) => Self::ConnectionStart {
                version_major: wire::read_u8(&mut buf)?,
                version_minor: wire::read_u8(&mut buf)?,
                server_properties: Table::decode(&mut buf)?,
                mechanisms: wire::read_long_string(&mut buf)?,
                locales: wire::read_long_string(&mut buf)?,
            },
            (CLASS_CONNECTION, CONNECTION_START_OK) => Self::ConnectionStartOk {
                client_properties: Table::decode(&mut buf)?,
                mechanism: wire::read_short_string(&mut buf)?,
                response: wire::read_long_string(&mut buf)?,
                locale: wire::read_short_string(&mut buf)?,
            },
            (CLASS_CONNECTION, CONNECTION_TUNE) => {
                let (channel_max, frame_max, heartbeat) = read_tuning(&mut buf)?;
                Self::ConnectionTune {
                    channel_max,
                    frame_max,
                    heartbeat,
                }
            }
            (CLASS_CONNECTION, CONNECTION_TUNE_OK) => {
                let (channel_max, frame_max, heartbeat) = read_tuning(&mut buf)?;
                Self::ConnectionTuneOk {
                    channel_max,
                    frame_max,
                    heartbeat,
                }
            }
            (CLASS_CONNECTION, CONNECTION_OPEN) => {
                let vhost = wire::read_short_string(&mut buf)?;
                let _reserved = wire::read_short_string(&mut buf)?;
                let _insist = wire::read_u8(&mut buf)?;
                Self::ConnectionOpen { vhost }
            }
            (CLASS_CONNECTION, CONNECTION_OPEN_OK) => {
                let _reserved = wire::read_short_string(&mut buf)?;
                Self::ConnectionOpenOk
            }
            (CLASS_CONNECTION, CONNECTION_CLOSE) => {
                let (reply_code, reply_text, class_id, method_id) = read_close(&mut buf)?;
                Self::ConnectionClose {
                    reply_code,
                    reply_text,
                    class_id,
                    method_id,
                }
            }
            (CLASS_CONNECTION, CONNECTION_CLOSE_OK) => Self::ConnectionCloseOk,
            (CLASS_CHANNEL, CHANNEL_OPEN) => {
                let _reserved = wire::read_short_string(&mut buf)?;
                Self::ChannelOpen
            }
            (CLASS_CHANNEL, CHANNEL_OPEN_OK) => {
                let _reserved = wire::read_long_string(&mut buf)?;
                Self::ChannelOpenOk
            }
            (CLASS_CHANNEL, CHANNEL_CLOSE) => {
                let (reply_code, reply_text, class_id, method_id) = read_close(&mut buf)?;
                Self::ChannelClose {
                    reply_code,
                    reply_text,
                    class_id,
                    method_id,
                }
            }
            (CLASS_CHANNEL, CHANNEL_CLOSE_OK) => Self::ChannelCloseOk,
            _ => Self::Other {
                class_id,
                method_id,
                arguments: buf.clone(),
            },
        };
        Ok(method)
    }

    /// Wrap the encoded payload into a method frame for the given channel.
    pub fn into_frame(self, channel: u16) -> Result<Frame> {
        Ok(Frame::method(channel, self.encode()?))
    }
}

fn put_ids(out: &mut Vec<u8>, class_id: u16, method_id: u16) {
    wire::write_u16(out, class_id);
    wire::write_u16(out, method_id);
}

fn put_tuning(out: &mut Vec<u8>, channel_max: u16, frame_max: u32, heartbeat: u16) {
    wire::write_u16(out, channel_max);
    wire::write_u32(out, frame_max);
    wire::write_u16(out, heartbeat);
}

fn read_tuning(buf: &mut Bytes) -> Result<(u16, u32, u16)> {
    Ok((
        wire::read_u16(buf)?,
        wire::read_u32(buf)?,
        wire::read_u16(buf)?,
    ))
}

fn put_close(
    out: &mut Vec<u8>,
    reply_code: u16,
    reply_text: &str,
    class_id: u16,
    method_id: u16,
) -> Result<()> {
    wire::write_u16(out, reply_code);
    wire::write_short_string(out, reply_text)?;
    wire::write_u16(out, class_id);
    wire::write_u16(out, method_id);
    Ok(())
}

fn read_close(buf: &mut Bytes) -> Result<(u16, String, u16, u16)> {
    Ok((
        wire::read_u16(buf)?,
        wire::read_short_string(buf)?,
        wire::read_u16(buf)?,
        wire::read_u16(buf)?,
    ))
}
