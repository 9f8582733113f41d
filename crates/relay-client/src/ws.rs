use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, warn};

use relay_core::channel::{clamp_close_reason, ChannelRead, DuplexChannel};
use relay_core::errors::RelayError;

use crate::manager::ChannelConnector;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Connects to a relay WebSocket endpoint, e.g. `ws://127.0.0.1:8000/ws`.
#[derive(Clone, Debug)]
pub struct WsConnector {
    url: String,
}

impl WsConnector {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

#[async_trait]
impl ChannelConnector for WsConnector {
    type Channel = WsClientChannel;

    async fn connect(&self) -> Result<WsClientChannel, RelayError> {
        let (stream, _response) = connect_async(self.url.as_str())
            .await
            .map_err(|e| RelayError::Connection(format!("failed to connect to {}: {e}", self.url)))?;
        debug!(url = %self.url, "websocket connected");
        Ok(WsClientChannel { stream, open: true })
    }
}

/// Client side of a relay WebSocket.
pub struct WsClientChannel {
    stream: WsStream,
    open: bool,
}

#[async_trait]
impl DuplexChannel for WsClientChannel {
    async fn recv(&mut self) -> ChannelRead {
        loop {
            match self.stream.next().await {
                Some(Ok(Message::Text(text))) => return ChannelRead::Text(text.as_str().to_owned()),
                Some(Ok(Message::Binary(data))) => {
                    warn!(len = data.len(), "ignoring binary frame");
                }
                Some(Ok(Message::Close(frame))) => {
                    self.open = false;
                    let (code, reason) = frame
                        .map(|f| (Some(u16::from(f.code)), f.reason.as_str().to_owned()))
                        .unwrap_or((None, String::new()));
                    return ChannelRead::Closed { code, reason };
                }
                Some(Ok(_)) => {}
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
        self.stream
            .send(Message::Text(text.to_owned().into()))
            .await
            .map_err(|e| RelayError::Channel(e.to_string()))
    }

    async fn close(&mut self, code: u16, reason: &str) -> Result<(), RelayError> {
        if !self.open {
            return Ok(());
        }
        self.open = false;
        let frame = CloseFrame {
            code: CloseCode::from(code),
            reason: clamp_close_reason(reason).to_owned().into(),
        };
        match self.stream.close(Some(frame)).await {
            Ok(()) | Err(WsError::ConnectionClosed | WsError::AlreadyClosed) => Ok(()),
            Err(err) => Err(RelayError::Channel(err.to_string())),
        }
    }

    fn is_open(&self) -> bool {
        self.open
    }
}
