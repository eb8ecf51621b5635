//! Connection-control channel
//!
//! Channel 0 is reserved for connection-level methods. Its handler drives
//! the opening handshake (Start → StartOk → Tune → TuneOk → Open → OpenOk),
//! answers broker-initiated closes, and recognizes the acknowledgment of our
//! own close. It holds the connect promise and resolves it when the
//! handshake settles either way.

use tracing::{debug, warn};

use crate::protocol::{FieldValue, Frame, FrameKind, Method, Table};

use super::handler::{ControlEvent, FrameHandler, Outbox};
use super::pending::Promise;
use super::{ConnectionConfig, ConnectionError, Result};

/// Protocol version this client speaks.
const VERSION_MAJOR: u8 = 0;
const VERSION_MINOR: u8 = 9;

/// Reply code sent with client-initiated closes.
const REPLY_SUCCESS: u16 = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    AwaitingStart,
    AwaitingTune,
    AwaitingOpenOk,
    Steady,
    AwaitingCloseOk,
}

/// Handler for the reserved control channel.
pub(crate) struct ControlChannel {
    phase: Phase,
    username: String,
    password: String,
    vhost: String,
    requested_channel_max: u16,
    requested_frame_max: u32,
    requested_heartbeat: u16,
    connect_promise: Option<Promise<()>>,
}

impl ControlChannel {
    pub(crate) fn new(config: &ConnectionConfig, connect_promise: Promise<()>) -> Self {
        Self {
            phase: Phase::AwaitingStart,
            username: config.username.clone(),
            password: config.password.clone(),
            vhost: config.vhost.clone(),
            requested_channel_max: config.channel_max,
            requested_frame_max: config.frame_max,
            requested_heartbeat: config.heartbeat,
            connect_promise: Some(connect_promise),
        }
    }

    /// We sent Connection.Close; expect CloseOk next.
    pub(crate) fn begin_close(&mut self) {
        self.phase = Phase::AwaitingCloseOk;
    }

    fn client_properties(&self) -> Table {
        let mut props = Table::new();
        props.insert("product", FieldValue::LongString("marling".into()));
        props.insert(
            "version",
            FieldValue::LongString(env!("CARGO_PKG_VERSION").into()),
        );
        props.insert("platform", FieldValue::LongString("rust".into()));
        props
    }

    fn plain_response(&self) -> String {
        format!("\0{}\0{}", self.username, self.password)
    }

    fn on_start(&mut self, major: u8, minor: u8, out: &mut Outbox) -> Result<()> {
        if (major, minor) != (VERSION_MAJOR, VERSION_MINOR) {
            if let Some(promise) = self.connect_promise.take() {
                promise.fail(ConnectionError::UnsupportedVersion { major, minor });
            }
            return Err(ConnectionError::UnsupportedVersion { major, minor });
        }
        debug!("broker greeted, sending credentials");
        let start_ok = Method::ConnectionStartOk {
            client_properties: self.client_properties(),
            mechanism: "PLAIN".to_string(),
            response: self.plain_response(),
            locale: "en_US".to_string(),
        };
        out.push_frame(start_ok.into_frame(0)?);
        self.phase = Phase::AwaitingTune;
        Ok(())
    }

    fn on_tune(
        &mut self,
        channel_max: u16,
        frame_max: u32,
        heartbeat: u16,
        out: &mut Outbox,
    ) -> Result<()> {
        let agreed_channel_max = negotiate(u32::from(self.requested_channel_max), u32::from(channel_max)) as u16;
        let agreed_frame_max = negotiate(self.requested_frame_max, frame_max);
        let agreed_heartbeat = negotiate(u32::from(self.requested_heartbeat), u32::from(heartbeat)) as u16;
        debug!(
            channel_max = agreed_channel_max,
            frame_max = agreed_frame_max,
            heartbeat = agreed_heartbeat,
            "tuning agreed"
        );

        out.push_frame(
            Method::ConnectionTuneOk {
                channel_max: agreed_channel_max,
                frame_max: agreed_frame_max,
                heartbeat: agreed_heartbeat,
            }
            .into_frame(0)?,
        );
        out.push_frame(
            Method::ConnectionOpen {
                vhost: self.vhost.clone(),
            }
            .into_frame(0)?,
        );
        out.push_event(ControlEvent::TuningAgreed {
            channel_max: agreed_channel_max,
            frame_max: agreed_frame_max,
            heartbeat: agreed_heartbeat,
        });
        self.phase = Phase::AwaitingOpenOk;
        Ok(())
    }

    fn on_open_ok(&mut self, out: &mut Outbox) {
        debug!(vhost = %self.vhost, "connection open");
        self.phase = Phase::Steady;
        // The reactor fulfills the connect promise via finish_connect
        // once the shared state reads Open, so a waiter that wakes up
        // never observes a stale state.
        out.push_event(ControlEvent::ConnectionOpened);
    }

    /// Resolve the connect promise. Called after the open state is
    /// published.
    pub(crate) fn finish_connect(&mut self) {
        if let Some(promise) = self.connect_promise.take() {
            promise.fulfill(());
        }
    }

    fn on_broker_close(&mut self, code: u16, text: String, out: &mut Outbox) -> Result<()> {
        warn!(code, text = %text, "connection closed by broker");
        out.push_frame(Method::ConnectionCloseOk.into_frame(0)?);
        if let Some(promise) = self.connect_promise.take() {
            promise.fail(ConnectionError::Rejected {
                code,
                text: text.clone(),
            });
        }
        out.push_event(ControlEvent::ConnectionClosedByBroker { code, text });
        Ok(())
    }
}

impl FrameHandler for ControlChannel {
    fn process_frame(&mut self, frame: Frame, out: &mut Outbox) -> Result<()> {
        if frame.kind() != FrameKind::Method {
            return Err(ConnectionError::UnexpectedMethod { channel: 0 });
        }
        let method = Method::decode(frame.into_payload())?;
        match (self.phase, method) {
            (_, Method::ConnectionClose {
                reply_code,
                reply_text,
                ..
            }) => self.on_broker_close(reply_code, reply_text, out)?,
            (Phase::AwaitingStart, Method::ConnectionStart {
                version_major,
                version_minor,
                server_properties,
                ..
            }) => {
                debug!(
                    product = ?server_properties.get("product"),
                    "received broker greeting"
                );
                self.on_start(version_major, version_minor, out)?;
            }
            (Phase::AwaitingTune, Method::ConnectionTune {
                channel_max,
                frame_max,
                heartbeat,
            }) => self.on_tune(channel_max, frame_max, heartbeat, out)?,
            (Phase::AwaitingOpenOk, Method::ConnectionOpenOk) => self.on_open_ok(out),
            (Phase::AwaitingCloseOk, Method::ConnectionCloseOk) => {
                debug!("connection close acknowledged");
                out.push_event(ControlEvent::ConnectionCloseAcked);
            }
            (phase, method) => {
                warn!(?phase, ?method, "unexpected method on control channel");
                return Err(ConnectionError::UnexpectedMethod { channel: 0 });
            }
        }
        Ok(())
    }

    fn connection_lost(&mut self, _error: &ConnectionError) {
        if let Some(promise) = self.connect_promise.take() {
            promise.fail(ConnectionError::ConnectionClosed);
        }
    }
}

/// Client-initiated connection close method.
pub(crate) fn connection_close_method() -> Method {
    Method::ConnectionClose {
        reply_code: REPLY_SUCCESS,
        reply_text: "goodbye".to_string(),
        class_id: 0,
        method_id: 0,
    }
}

/// Tuning negotiation: 0 means "no preference", otherwise take the smaller.
fn negotiate(ours: u32, theirs: u32) -> u32 {
    match (ours, theirs) {
        (0, v) | (v, 0) => v,
        (a, b) => a.min(b),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::pending::pending;

    fn control() -> (ControlChannel, super::super::pending::PendingReply<()>) {
        let (promise, reply) = pending();
        let config = ConnectionConfig {
            username: "user".into(),
            password: "secret".into(),
            vhost: "/test".into(),
            channel_max: 128,
            frame_max: 4096,
            heartbeat: 30,
            ..ConnectionConfig::default()
        };
        (ControlChannel::new(&config, promise), reply)
    }

    fn feed(chan: &mut ControlChannel, method: Method) -> Result<Outbox> {
        let mut out = Outbox::new();
        chan.process_frame(method.into_frame(0).unwrap(), &mut out)?;
        Ok(out)
    }

    fn start_method() -> Method {
        Method::ConnectionStart {
            version_major: 0,
            version_minor: 9,
            server_properties: Table::new(),
            mechanisms: "PLAIN".into(),
            locales: "en_US".into(),
        }
    }

    #[test]
    fn full_handshake_fulfills_connect_promise() {
        let (mut chan, reply) = control();

        let mut out = feed(&mut chan, start_method()).unwrap();
        let (frames, _) = out.take();
        assert_eq!(frames.len(), 1);
        let Method::ConnectionStartOk {
            mechanism,
            response,
            ..
        } = Method::decode(frames[0].payload().clone()).unwrap()
        else {
            panic!("expected start-ok");
        };
        assert_eq!(mechanism, "PLAIN");
        assert_eq!(response, "\0user\0secret");

        let mut out = feed(
            &mut chan,
            Method::ConnectionTune {
                channel_max: 2047,
                frame_max: 131_072,
                heartbeat: 60,
            },
        )
        .unwrap();
        let (frames, events) = out.take();
        assert_eq!(frames.len(), 2);
        assert_eq!(
            events,
            [ControlEvent::TuningAgreed {
                channel_max: 128,
                frame_max: 4096,
                heartbeat: 30,
            }]
        );

        let mut out = feed(&mut chan, Method::ConnectionOpenOk).unwrap();
        let (_, events) = out.take();
        assert_eq!(events, [ControlEvent::ConnectionOpened]);

        chan.finish_connect();
        reply.wait().unwrap();
    }

    #[test]
    fn version_mismatch_is_fatal() {
        let (mut chan, _reply) = control();
        let bad = Method::ConnectionStart {
            version_major: 1,
            version_minor: 0,
            server_properties: Table::new(),
            mechanisms: "PLAIN".into(),
            locales: "en_US".into(),
        };
        let err = feed(&mut chan, bad).unwrap_err();
        assert!(matches!(
            err,
            ConnectionError::UnsupportedVersion { major: 1, minor: 0 }
        ));
    }

    #[test]
    fn broker_close_mid_handshake_rejects_connect() {
        let (mut chan, reply) = control();
        feed(&mut chan, start_method()).unwrap().take();

        let mut out = feed(
            &mut chan,
            Method::ConnectionClose {
                reply_code: 403,
                reply_text: "ACCESS_REFUSED".into(),
                class_id: 0,
                method_id: 0,
            },
        )
        .unwrap();

        let (frames, events) = out.take();
        assert_eq!(
            Method::decode(frames[0].payload().clone()).unwrap(),
            Method::ConnectionCloseOk
        );
        assert!(matches!(
            events[0],
            ControlEvent::ConnectionClosedByBroker { code: 403, .. }
        ));
        assert!(matches!(
            reply.wait(),
            Err(ConnectionError::Rejected { code: 403, .. })
        ));
    }

    #[test]
    fn close_ok_only_expected_while_closing() {
        let (mut chan, _reply) = control();
        let err = feed(&mut chan, Method::ConnectionCloseOk).unwrap_err();
        assert!(matches!(
            err,
            ConnectionError::UnexpectedMethod { channel: 0 }
        ));
    }

    #[test]
    fn negotiation_prefers_smaller_nonzero() {
        assert_eq!(negotiate(0, 2047), 2047);
        assert_eq!(negotiate(100, 0), 100);
        assert_eq!(negotiate(100, 60), 60);
        assert_eq!(negotiate(0, 0), 0);
    }
}
