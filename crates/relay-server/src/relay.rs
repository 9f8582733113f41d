//! Per-connection relay between one client channel and one session.
//!
//! Lifecycle: `Init → Connecting → Active → Closing → Closed`. Every path out
//! of `Connecting` or `Active` goes through [`RelaySession::close`], which
//! leaves the session first and then closes the client channel if it is still
//! open. Closing twice is a no-op. Losing the session closes the client the
//! same way a client close leaves the session.

use std::sync::Arc;

use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use relay_core::channel::{ChannelRead, DuplexChannel, NORMAL_CLOSURE};
use relay_core::engine::ReplyEngine;
use relay_core::errors::RelayError;
use relay_core::ids::{ConnectionId, Identity};
use relay_session::bridge::{BridgeEvent, SessionBridge};

/// Close reason sent when the client ends the connection itself.
pub const NORMAL_CLOSE_REASON: &str = "Normal closure";

/// Close reason sent when the session ends under a live client.
pub const SESSION_LOST_REASON: &str = "Session ended";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RelayPhase {
    Init,
    Connecting,
    Active,
    Closing,
    Closed,
}

/// Why a relay session ended.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RelayOutcome {
    /// Joining the session failed; the client never reached `Active`.
    JoinFailed(RelayError),
    /// The client closed or dropped the channel.
    ClientClosed { code: Option<u16>, reason: String },
    /// Reading from the client channel failed.
    ChannelFailed(RelayError),
    /// The session ended without the relay leaving it.
    SessionLost,
    /// The reply engine failed in a way retrying the next message cannot fix.
    EngineFailed(RelayError),
}

impl RelayOutcome {
    fn close_reason(&self) -> &'static str {
        match self {
            Self::JoinFailed(err) | Self::ChannelFailed(err) | Self::EngineFailed(err) => {
                err.close_reason()
            }
            Self::ClientClosed { .. } => NORMAL_CLOSE_REASON,
            Self::SessionLost => SESSION_LOST_REASON,
        }
    }
}

/// Per-connection relay settings.
#[derive(Clone, Debug)]
pub struct RelayOptions {
    pub room: String,
    pub identity: Identity,
    pub forward_session_replies_to_client: bool,
}

enum Step {
    Client(ChannelRead),
    SessionReply(String),
    SessionLost,
}

pub struct RelaySession<C: DuplexChannel> {
    connection_id: ConnectionId,
    channel: C,
    bridge: SessionBridge,
    engine: Arc<dyn ReplyEngine>,
    options: RelayOptions,
    phase: RelayPhase,
}

impl<C: DuplexChannel> RelaySession<C> {
    pub fn new(
        connection_id: ConnectionId,
        channel: C,
        bridge: SessionBridge,
        engine: Arc<dyn ReplyEngine>,
        options: RelayOptions,
    ) -> Self {
        Self {
            connection_id,
            channel,
            bridge,
            engine,
            options,
            phase: RelayPhase::Init,
        }
    }

    pub fn phase(&self) -> RelayPhase {
        self.phase
    }

    pub fn bridge(&self) -> &SessionBridge {
        &self.bridge
    }

    /// Drive the connection to completion. Always ends in `Closed`.
    pub async fn run(&mut self) -> RelayOutcome {
        self.phase = RelayPhase::Connecting;
        let joined = self
            .bridge
            .connect(&self.options.room, self.options.identity.clone())
            .await;

        let outcome = match joined {
            Ok(session) => {
                info!(
                    connection_id = %self.connection_id,
                    room = %session.name,
                    identity = %session.local_identity,
                    "relay active"
                );
                self.phase = RelayPhase::Active;
                self.relay_loop().await
            }
            Err(err) => {
                warn!(
                    connection_id = %self.connection_id,
                    error = %err,
                    kind = err.error_kind(),
                    "session join failed, closing client"
                );
                RelayOutcome::JoinFailed(err)
            }
        };

        self.close(outcome.close_reason()).await;
        outcome
    }

    /// Leave the session, then close the client channel if it is still open.
    pub async fn close(&mut self, reason: &str) {
        if matches!(self.phase, RelayPhase::Closing | RelayPhase::Closed) {
            debug!(connection_id = %self.connection_id, "relay already closed");
            return;
        }
        self.phase = RelayPhase::Closing;

        self.bridge.disconnect().await;
        if self.channel.is_open() {
            if let Err(err) = self.channel.close(NORMAL_CLOSURE, reason).await {
                debug!(connection_id = %self.connection_id, error = %err, "client close failed");
            }
        }

        self.phase = RelayPhase::Closed;
        info!(connection_id = %self.connection_id, reason, "relay closed");
    }

    async fn relay_loop(&mut self) -> RelayOutcome {
        let mut session_replies = self
            .options
            .forward_session_replies_to_client
            .then(|| self.bridge.subscribe());
        let session_ended = self
            .bridge
            .session_ended()
            .unwrap_or_else(CancellationToken::new);

        loop {
            let step = tokio::select! {
                read = self.channel.recv() => Step::Client(read),
                text = next_session_reply(&mut session_replies) => Step::SessionReply(text),
                _ = session_ended.cancelled() => Step::SessionLost,
            };

            match step {
                Step::Client(ChannelRead::Text(text)) => {
                    if let Err(err) = self.handle_client_message(&text).await {
                        return RelayOutcome::EngineFailed(err);
                    }
                }
                Step::Client(ChannelRead::Closed { code, reason }) => {
                    if reason.is_empty() {
                        info!(connection_id = %self.connection_id, ?code, "client disconnected");
                    } else {
                        info!(connection_id = %self.connection_id, ?code, reason = %reason, "client disconnected");
                    }
                    return RelayOutcome::ClientClosed { code, reason };
                }
                Step::Client(ChannelRead::Failed(err)) => {
                    warn!(connection_id = %self.connection_id, error = %err, "client channel failed");
                    return RelayOutcome::ChannelFailed(err);
                }
                Step::SessionReply(text) => {
                    if let Err(err) = self.channel.send_text(&text).await {
                        warn!(connection_id = %self.connection_id, error = %err, "failed to forward session reply");
                    }
                }
                Step::SessionLost => {
                    warn!(connection_id = %self.connection_id, "session lost, closing client");
                    return RelayOutcome::SessionLost;
                }
            }
        }
    }

    /// Generate a reply and write it to the client and the session. Both
    /// writes are attempted whatever the other's result. Only an engine
    /// error that is not scoped to this message is returned.
    async fn handle_client_message(&mut self, text: &str) -> Result<(), RelayError> {
        debug!(connection_id = %self.connection_id, len = text.len(), "client message");

        let reply = match self.engine.generate(text).await {
            Ok(reply) => reply,
            Err(err) if err.is_isolated() => {
                warn!(
                    connection_id = %self.connection_id,
                    engine = self.engine.name(),
                    error = %err,
                    "reply generation failed, message skipped"
                );
                return Ok(());
            }
            Err(err) => {
                warn!(
                    connection_id = %self.connection_id,
                    engine = self.engine.name(),
                    error = %err,
                    kind = err.error_kind(),
                    "reply engine unusable, closing relay"
                );
                return Err(err);
            }
        };

        let (to_client, to_session) = tokio::join!(
            self.channel.send_text(&reply),
            self.bridge.send_message(&reply),
        );

        if let Err(err) = to_client {
            warn!(connection_id = %self.connection_id, error = %err, "failed to write reply to client");
        }
        if !to_session {
            warn!(
                connection_id = %self.connection_id,
                kind = "publish_failure",
                "failed to publish reply to session"
            );
        }
        Ok(())
    }
}

/// Next reply the bridge published for session-originated data. Pending
/// forever when forwarding is off.
async fn next_session_reply(rx: &mut Option<broadcast::Receiver<BridgeEvent>>) -> String {
    loop {
        let Some(inner) = rx.as_mut() else {
            return std::future::pending().await;
        };
        match inner.recv().await {
            Ok(BridgeEvent::SessionReply { text }) => return text,
            Ok(BridgeEvent::Inbound(_) | BridgeEvent::SessionEnded) => {}
            Err(RecvError::Lagged(skipped)) => warn!(skipped, "session reply forwarding lagged"),
            Err(RecvError::Closed) => *rx = None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use async_trait::async_trait;
    use bytes::Bytes;
    use parking_lot::Mutex;
    use tokio::sync::mpsc;

    use relay_core::events::InboundEvent;
    use relay_core::security::ApiCredentials;
    use relay_engine::{EchoEngine, MockEngine, MockReply};
    use relay_session::grant::{GrantCapabilities, GrantIssuer, SessionGrant};
    use relay_session::local::LocalHub;
    use relay_session::transport::{RoomConnection, RoomHandle, SessionTransport};

    const HOST: &str = "local://test";
    const ROOM: &str = "demo-room";

    #[derive(Clone, Debug, PartialEq, Eq)]
    enum Frame {
        Text(String),
        Close(u16, String),
    }

    /// In-memory client channel. Reads come from a script; writes are recorded.
    struct MemoryChannel {
        inbound: mpsc::UnboundedReceiver<ChannelRead>,
        frames: Arc<Mutex<Vec<Frame>>>,
        fail_sends: bool,
        open: bool,
    }

    struct ChannelProbe {
        inbound: mpsc::UnboundedSender<ChannelRead>,
        frames: Arc<Mutex<Vec<Frame>>>,
    }

    impl ChannelProbe {
        fn send(&self, text: &str) {
            self.inbound.send(ChannelRead::Text(text.into())).unwrap();
        }

        fn client_close(&self, reason: &str) {
            self.inbound
                .send(ChannelRead::Closed {
                    code: Some(NORMAL_CLOSURE),
                    reason: reason.into(),
                })
                .unwrap();
        }

        fn frames(&self) -> Vec<Frame> {
            self.frames.lock().clone()
        }
    }

    fn memory_channel(fail_sends: bool) -> (MemoryChannel, ChannelProbe) {
        let (tx, rx) = mpsc::unbounded_channel();
        let frames = Arc::new(Mutex::new(Vec::new()));
        (
            MemoryChannel {
                inbound: rx,
                frames: Arc::clone(&frames),
                fail_sends,
                open: true,
            },
            ChannelProbe { inbound: tx, frames },
        )
    }

    #[async_trait]
    impl DuplexChannel for MemoryChannel {
        async fn recv(&mut self) -> ChannelRead {
            let read = self.inbound.recv().await.unwrap_or(ChannelRead::Closed {
                code: None,
                reason: String::new(),
            });
            if !matches!(read, ChannelRead::Text(_)) {
                self.open = false;
            }
            read
        }

        async fn send_text(&mut self, text: &str) -> Result<(), RelayError> {
            if self.fail_sends || !self.open {
                return Err(RelayError::Channel("broken pipe".into()));
            }
            self.frames.lock().push(Frame::Text(text.into()));
            Ok(())
        }

        async fn close(&mut self, code: u16, reason: &str) -> Result<(), RelayError> {
            if !self.open {
                return Ok(());
            }
            self.open = false;
            self.frames.lock().push(Frame::Close(code, reason.into()));
            Ok(())
        }

        fn is_open(&self) -> bool {
            self.open
        }
    }

    /// Transport whose rooms record every publish and can be told to fail.
    /// It keeps the event senders, so dropping them ends the session.
    #[derive(Default)]
    struct RecordingTransport {
        published: Arc<Mutex<Vec<String>>>,
        fail_publish: bool,
        disconnects: Arc<Mutex<usize>>,
        event_senders: Arc<Mutex<Vec<mpsc::UnboundedSender<InboundEvent>>>>,
    }

    struct RecordingRoom {
        identity: Identity,
        published: Arc<Mutex<Vec<String>>>,
        fail_publish: bool,
        disconnects: Arc<Mutex<usize>>,
    }

    #[async_trait]
    impl SessionTransport for RecordingTransport {
        async fn connect(&self, _host: &str, _grant: &SessionGrant) -> Result<RoomConnection, RelayError> {
            let (tx, events) = mpsc::unbounded_channel();
            self.event_senders.lock().push(tx);
            Ok(RoomConnection {
                room: Arc::new(RecordingRoom {
                    identity: Identity::new("user-1"),
                    published: Arc::clone(&self.published),
                    fail_publish: self.fail_publish,
                    disconnects: Arc::clone(&self.disconnects),
                }),
                events,
            })
        }
    }

    #[async_trait]
    impl RoomHandle for RecordingRoom {
        fn name(&self) -> &str {
            ROOM
        }

        fn local_identity(&self) -> &Identity {
            &self.identity
        }

        async fn publish_data(&self, payload: Bytes, _reliable: bool) -> Result<(), RelayError> {
            if self.fail_publish {
                return Err(RelayError::Publish("room unavailable".into()));
            }
            self.published
                .lock()
                .push(String::from_utf8(payload.to_vec()).unwrap());
            Ok(())
        }

        async fn disconnect(&self) {
            *self.disconnects.lock() += 1;
        }
    }

    fn creds() -> ApiCredentials {
        ApiCredentials::new("key", "secret")
    }

    fn issuer() -> Arc<GrantIssuer> {
        Arc::new(GrantIssuer::new(Ok(creds()), Duration::from_secs(60)))
    }

    fn options(forward: bool) -> RelayOptions {
        RelayOptions {
            room: ROOM.into(),
            identity: Identity::new("user-1"),
            forward_session_replies_to_client: forward,
        }
    }

    fn relay(
        channel: MemoryChannel,
        transport: Arc<dyn SessionTransport>,
        engine: Arc<dyn ReplyEngine>,
        issuer: Arc<GrantIssuer>,
        forward: bool,
    ) -> RelaySession<MemoryChannel> {
        let bridge = SessionBridge::new(issuer, transport, Arc::clone(&engine), HOST);
        RelaySession::new(ConnectionId::new(), channel, bridge, engine, options(forward))
    }

    #[tokio::test]
    async fn hello_is_echoed_to_client_and_session() {
        let transport = Arc::new(RecordingTransport::default());
        let published = Arc::clone(&transport.published);
        let (channel, probe) = memory_channel(false);
        let mut relay = relay(channel, transport, Arc::new(EchoEngine::default()), issuer(), false);

        probe.send("hello");
        probe.client_close("");
        let outcome = relay.run().await;

        assert_eq!(
            outcome,
            RelayOutcome::ClientClosed {
                code: Some(NORMAL_CLOSURE),
                reason: String::new()
            }
        );
        assert_eq!(probe.frames(), vec![Frame::Text("Echo: hello".into())]);
        assert_eq!(*published.lock(), vec!["Echo: hello".to_string()]);
        assert_eq!(relay.phase(), RelayPhase::Closed);
    }

    #[tokio::test]
    async fn each_message_gets_exactly_one_reply_each_way() {
        let transport = Arc::new(RecordingTransport::default());
        let published = Arc::clone(&transport.published);
        let (channel, probe) = memory_channel(false);
        let mut relay = relay(channel, transport, Arc::new(EchoEngine::default()), issuer(), false);

        for text in ["a", "b", ""] {
            probe.send(text);
        }
        probe.client_close("done");
        relay.run().await;

        let expected = ["Echo: a", "Echo: b", "Echo: "];
        assert_eq!(
            probe.frames(),
            expected.iter().map(|t| Frame::Text(t.to_string())).collect::<Vec<_>>()
        );
        assert_eq!(*published.lock(), expected.map(String::from).to_vec());
    }

    #[tokio::test]
    async fn publish_failure_does_not_block_client_reply() {
        let transport = Arc::new(RecordingTransport {
            fail_publish: true,
            ..Default::default()
        });
        let (channel, probe) = memory_channel(false);
        let mut relay = relay(channel, transport, Arc::new(EchoEngine::default()), issuer(), false);

        probe.send("hello");
        probe.send("again");
        probe.client_close("");
        relay.run().await;

        assert_eq!(
            probe.frames(),
            vec![Frame::Text("Echo: hello".into()), Frame::Text("Echo: again".into())]
        );
    }

    #[tokio::test]
    async fn client_write_failure_does_not_block_publish() {
        let transport = Arc::new(RecordingTransport::default());
        let published = Arc::clone(&transport.published);
        let (channel, probe) = memory_channel(true);
        let mut relay = relay(channel, transport, Arc::new(EchoEngine::default()), issuer(), false);

        probe.send("hello");
        probe.client_close("");
        relay.run().await;

        assert!(probe.frames().is_empty());
        assert_eq!(*published.lock(), vec!["Echo: hello".to_string()]);
    }

    #[tokio::test]
    async fn engine_failure_skips_message_and_keeps_relay() {
        let transport = Arc::new(RecordingTransport::default());
        let published = Arc::clone(&transport.published);
        let engine = Arc::new(MockEngine::new(vec![
            MockReply::Error(RelayError::Engine("model offline".into())),
            MockReply::text("second"),
        ]));
        let (channel, probe) = memory_channel(false);
        let mut relay = relay(channel, transport, engine, issuer(), false);

        probe.send("first");
        probe.send("second");
        probe.client_close("");
        let outcome = relay.run().await;

        assert!(matches!(outcome, RelayOutcome::ClientClosed { .. }));
        assert_eq!(probe.frames(), vec![Frame::Text("second".into())]);
        assert_eq!(*published.lock(), vec!["second".to_string()]);
    }

    #[tokio::test]
    async fn unusable_engine_closes_relay() {
        let transport = Arc::new(RecordingTransport::default());
        let published = Arc::clone(&transport.published);
        let disconnects = Arc::clone(&transport.disconnects);
        let engine = Arc::new(MockEngine::new(vec![MockReply::Error(RelayError::Config(
            "no model configured".into(),
        ))]));
        let (channel, probe) = memory_channel(false);
        let mut relay = relay(channel, transport, engine, issuer(), false);

        probe.send("hello");
        probe.send("never read");
        let outcome = relay.run().await;

        assert!(matches!(outcome, RelayOutcome::EngineFailed(RelayError::Config(_))));
        assert_eq!(
            probe.frames(),
            vec![Frame::Close(
                NORMAL_CLOSURE,
                RelayError::Config(String::new()).close_reason().into()
            )]
        );
        assert!(published.lock().is_empty());
        assert_eq!(*disconnects.lock(), 1);
    }

    #[tokio::test]
    async fn session_loss_closes_client() {
        let transport = Arc::new(RecordingTransport::default());
        let senders = Arc::clone(&transport.event_senders);
        let disconnects = Arc::clone(&transport.disconnects);
        let (channel, probe) = memory_channel(false);
        let mut relay = relay(channel, transport, Arc::new(EchoEngine::default()), issuer(), false);
        let task = tokio::spawn(async move {
            let outcome = relay.run().await;
            (outcome, relay.phase())
        });

        while senders.lock().is_empty() {
            tokio::task::yield_now().await;
        }
        senders.lock().clear();

        let (outcome, phase) = tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .expect("relay stayed active after the session ended")
            .unwrap();
        assert_eq!(outcome, RelayOutcome::SessionLost);
        assert_eq!(phase, RelayPhase::Closed);
        assert_eq!(
            probe.frames(),
            vec![Frame::Close(NORMAL_CLOSURE, SESSION_LOST_REASON.into())]
        );
        assert_eq!(*disconnects.lock(), 1);
    }

    #[tokio::test]
    async fn session_loss_is_watched_when_forwarding() {
        let transport = Arc::new(RecordingTransport::default());
        let senders = Arc::clone(&transport.event_senders);
        let (channel, probe) = memory_channel(false);
        let mut relay = relay(channel, transport, Arc::new(EchoEngine::default()), issuer(), true);
        let task = tokio::spawn(async move { relay.run().await });

        while senders.lock().is_empty() {
            tokio::task::yield_now().await;
        }
        probe.send("before");
        tokio::time::timeout(Duration::from_secs(2), async {
            while probe.frames().is_empty() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
        senders.lock().clear();

        let outcome = tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(outcome, RelayOutcome::SessionLost);
        assert_eq!(
            probe.frames(),
            vec![
                Frame::Text("Echo: before".into()),
                Frame::Close(NORMAL_CLOSURE, SESSION_LOST_REASON.into()),
            ]
        );
    }

    #[tokio::test]
    async fn missing_credentials_close_client_with_config_reason() {
        let transport = Arc::new(RecordingTransport::default());
        let disconnects = Arc::clone(&transport.disconnects);
        let issuer = Arc::new(GrantIssuer::new(
            Err(RelayError::Config("api key is not set".into())),
            Duration::from_secs(60),
        ));
        let (channel, probe) = memory_channel(false);
        let mut relay = relay(channel, transport, Arc::new(EchoEngine::default()), issuer, false);

        let outcome = relay.run().await;

        assert!(matches!(outcome, RelayOutcome::JoinFailed(RelayError::Config(_))));
        let frames = probe.frames();
        assert_eq!(frames.len(), 1);
        match &frames[0] {
            Frame::Close(code, reason) => {
                assert_eq!(*code, NORMAL_CLOSURE);
                assert!(reason.contains("configuration"));
            }
            other => panic!("expected close frame, got {other:?}"),
        }
        assert!(relay.bridge().session().is_none());
        assert_eq!(*disconnects.lock(), 0);
    }

    #[tokio::test]
    async fn join_failure_closes_client_with_connection_reason() {
        let hub: Arc<dyn SessionTransport> = Arc::new(LocalHub::new(None));
        let (channel, probe) = memory_channel(false);
        let mut relay = relay(channel, hub, Arc::new(EchoEngine::default()), issuer(), false);

        let outcome = relay.run().await;

        assert!(matches!(outcome, RelayOutcome::JoinFailed(RelayError::Connection(_))));
        assert_eq!(
            probe.frames(),
            vec![Frame::Close(
                NORMAL_CLOSURE,
                RelayError::Connection(String::new()).close_reason().into()
            )]
        );
    }

    #[tokio::test]
    async fn channel_failure_tears_down_session() {
        let transport = Arc::new(RecordingTransport::default());
        let disconnects = Arc::clone(&transport.disconnects);
        let (channel, probe) = memory_channel(false);
        let mut relay = relay(channel, transport, Arc::new(EchoEngine::default()), issuer(), false);

        probe
            .inbound
            .send(ChannelRead::Failed(RelayError::Channel("reset by peer".into())))
            .unwrap();
        let outcome = relay.run().await;

        assert!(matches!(outcome, RelayOutcome::ChannelFailed(_)));
        assert_eq!(*disconnects.lock(), 1);
        assert!(probe.frames().is_empty());
    }

    #[tokio::test]
    async fn teardown_is_idempotent() {
        let transport = Arc::new(RecordingTransport::default());
        let disconnects = Arc::clone(&transport.disconnects);
        let (channel, probe) = memory_channel(false);
        let mut relay = relay(channel, transport, Arc::new(EchoEngine::default()), issuer(), false);

        probe.client_close("navigating away");
        relay.run().await;
        relay.close("again").await;
        relay.close("and again").await;

        assert_eq!(*disconnects.lock(), 1);
        assert!(probe.frames().is_empty());
        assert_eq!(relay.phase(), RelayPhase::Closed);
    }

    #[tokio::test]
    async fn close_before_run_closes_open_channel_once() {
        let transport = Arc::new(RecordingTransport::default());
        let (channel, probe) = memory_channel(false);
        let mut relay = relay(channel, transport, Arc::new(EchoEngine::default()), issuer(), false);

        relay.close("server shutting down").await;
        relay.close("server shutting down").await;

        assert_eq!(
            probe.frames(),
            vec![Frame::Close(NORMAL_CLOSURE, "server shutting down".into())]
        );
    }

    #[tokio::test]
    async fn session_replies_reach_client_when_forwarding() {
        let hub = Arc::new(LocalHub::new(Some(creds())));
        let (channel, probe) = memory_channel(false);
        let mut relay = relay(
            channel,
            Arc::clone(&hub) as Arc<dyn SessionTransport>,
            Arc::new(EchoEngine::default()),
            issuer(),
            true,
        );
        let task = tokio::spawn(async move {
            relay.run().await;
        });

        while hub.participants(ROOM).is_empty() {
            tokio::task::yield_now().await;
        }
        let grant = issuer()
            .issue(&Identity::new("peer"), ROOM, GrantCapabilities::default())
            .unwrap();
        let peer = hub.connect(HOST, &grant).await.unwrap();
        peer.room.publish_data(Bytes::from_static(b"ping"), true).await.unwrap();

        tokio::time::timeout(Duration::from_secs(2), async {
            while probe.frames().is_empty() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
        assert_eq!(probe.frames(), vec![Frame::Text("Echo: ping".into())]);

        probe.client_close("");
        task.await.unwrap();
        assert_eq!(hub.participants(ROOM), vec![Identity::new("peer")]);
    }

    #[tokio::test]
    async fn session_replies_stay_in_session_by_default() {
        let hub = Arc::new(LocalHub::new(Some(creds())));
        let (channel, probe) = memory_channel(false);
        let mut relay = relay(
            channel,
            Arc::clone(&hub) as Arc<dyn SessionTransport>,
            Arc::new(EchoEngine::default()),
            issuer(),
            false,
        );
        let task = tokio::spawn(async move {
            relay.run().await;
        });

        while hub.participants(ROOM).is_empty() {
            tokio::task::yield_now().await;
        }
        let grant = issuer()
            .issue(&Identity::new("peer"), ROOM, GrantCapabilities::default())
            .unwrap();
        let mut peer = hub.connect(HOST, &grant).await.unwrap();
        peer.room.publish_data(Bytes::from_static(b"ping"), true).await.unwrap();

        let reply = tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                if let Some(InboundEvent::DataReceived { payload, .. }) = peer.events.recv().await {
                    return payload;
                }
            }
        })
        .await
        .unwrap();
        assert_eq!(&reply[..], b"Echo: ping");

        probe.client_close("");
        task.await.unwrap();
        assert!(probe.frames().is_empty());
    }
}
