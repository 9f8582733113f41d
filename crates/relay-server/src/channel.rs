use std::time::Duration;

use async_trait::async_trait;
use axum::extract::ws::{CloseFrame, Message as WsMessage, WebSocket};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use relay_core::channel::{clamp_close_reason, ChannelRead, DuplexChannel};
use relay_core::errors::RelayError;
use relay_core::ids::ConnectionId;

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

enum Outbound {
    Text(String),
    Close { code: u16, reason: String },
}

/// Server side of a client WebSocket.
///
/// Reads happen inline; writes go through a bounded queue to a writer task
/// that also sends heartbeat pings.
pub struct WsChannel {
    connection_id: ConnectionId,
    reader: SplitStream<WebSocket>,
    outbound: mpsc::Sender<Outbound>,
    writer: Option<JoinHandle<()>>,
    open: bool,
}

impl WsChannel {
    pub fn new(socket: WebSocket, connection_id: ConnectionId, send_queue: usize) -> Self {
        let (sink, reader) = socket.split();
        let (outbound, rx) = mpsc::channel(send_queue.max(1));
        let writer = tokio::spawn(run_writer(sink, rx, connection_id.clone()));
        Self {
            connection_id,
            reader,
            outbound,
            writer: Some(writer),
            open: true,
        }
    }
}

#[async_trait]
impl DuplexChannel for WsChannel {
    async fn recv(&mut self) -> ChannelRead {
        loop {
            match self.reader.next().await {
                Some(Ok(WsMessage::Text(text))) => return ChannelRead::Text(text.as_str().to_owned()),
                Some(Ok(WsMessage::Binary(data))) => {
                    warn!(
                        connection_id = %self.connection_id,
                        len = data.len(),
                        "ignoring binary frame"
                    );
                }
                Some(Ok(WsMessage::Close(frame))) => {
                    self.open = false;
                    let (code, reason) = frame
                        .map(|f| (Some(f.code), f.reason.as_str().to_owned()))
                        .unwrap_or((None, String::new()));
                    return ChannelRead::Closed { code, reason };
                }
                // Pings are answered by the socket itself.
                Some(Ok(WsMessage::Ping(_) | WsMessage::Pong(_))) => {}
                Some(Err(err)) => {
                    self.open = false;
                    return ChannelRead::Failed(RelayError::Channel(err.to_string()));
                }
                None => {
                    self.open = false;
                    return ChannelRead::Closed {
                        code: None,
                        reason: String::new(),
                    };
                }
            }
        }
    }

    async fn send_text(&mut self, text: &str) -> Result<(), RelayError> {
        if !self.open {
            return Err(RelayError::Channel("channel is closed".into()));
        }
        self.outbound
            .send(Outbound::Text(text.to_owned()))
            .await
            .map_err(|_| RelayError::Channel("writer stopped".into()))
    }

    async fn close(&mut self, code: u16, reason: &str) -> Result<(), RelayError> {
        if !self.open {
            return Ok(());
        }
        self.open = false;
        let close = Outbound::Close {
            code,
            reason: clamp_close_reason(reason).to_owned(),
        };
        if self.outbound.send(close).await.is_err() {
            debug!(connection_id = %self.connection_id, "writer already stopped before close");
        }
        if let Some(writer) = self.writer.take() {
            let _ = writer.await;
        }
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.open
    }
}

async fn run_writer(
    mut sink: SplitSink<WebSocket, WsMessage>,
    mut rx: mpsc::Receiver<Outbound>,
    connection_id: ConnectionId,
) {
    let mut ping_interval = tokio::time::interval(HEARTBEAT_INTERVAL);
    ping_interval.tick().await; // first tick is immediate

    loop {
        tokio::select! {
            msg = rx.recv() => match msg {
                Some(Outbound::Text(text)) => {
                    if let Err(err) = sink.send(WsMessage::Text(text.into())).await {
                        debug!(connection_id = %connection_id, error = %err, "write failed");
                        break;
                    }
                }
                Some(Outbound::Close { code, reason }) => {
                    let frame = CloseFrame {
                        code,
                        reason: reason.into(),
                    };
                    if let Err(err) = sink.send(WsMessage::Close(Some(frame))).await {
                        debug!(connection_id = %connection_id, error = %err, "close frame not delivered");
                    }
                    break;
                }
                None => break,
            },
            _ = ping_interval.tick() => {
                if sink.send(WsMessage::Ping(Default::default())).await.is_err() {
                    break;
                }
                trace!(connection_id = %connection_id, "sent ping");
            }
        }
    }
}
