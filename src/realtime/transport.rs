//! Message transport for the duplex session
//!
//! The session only needs ordered text frames in both directions. The
//! WebSocket implementation lives here; tests substitute in-memory channels.

use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use secrecy::{ExposeSecret, SecretString};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use url::Url;

use crate::{Error, Result};

/// Kind of conversation requested from the remote side
///
/// Only the remote side's behavior differs; the engine treats both alike.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionMode {
    /// Regular coaching conversation
    #[default]
    Conversation,
    /// First-run onboarding interview
    Onboarding,
}

impl SessionMode {
    /// Whether this is the onboarding flow
    #[must_use]
    pub const fn is_onboarding(self) -> bool {
        matches!(self, Self::Onboarding)
    }
}

/// Parameters for opening a duplex connection
#[derive(Debug)]
pub struct ConnectRequest {
    /// WebSocket base URL (e.g. `ws://localhost:8000`)
    pub ws_url: Url,
    /// Bearer token for the voice endpoint
    pub token: SecretString,
    /// Conversation kind
    pub mode: SessionMode,
}

impl ConnectRequest {
    /// Full endpoint URL including credentials
    ///
    /// # Errors
    ///
    /// Returns `Config` if the base URL cannot carry a path
    pub fn endpoint(&self) -> Result<Url> {
        let mut url = self.ws_url.clone();
        if url.cannot_be_a_base() {
            return Err(Error::Config(format!("invalid websocket url: {}", self.ws_url)));
        }
        let path = format!("{}/ws/voice", url.path().trim_end_matches('/'));
        url.set_path(&path);
        url.query_pairs_mut()
            .clear()
            .append_pair("token", self.token.expose_secret())
            .append_pair(
                "onboarding",
                if self.mode.is_onboarding() { "true" } else { "false" },
            );
        Ok(url)
    }
}

/// Ordered, message-oriented duplex channel
#[async_trait]
pub trait Transport: Send {
    /// Send one text frame
    ///
    /// # Errors
    ///
    /// Returns `ConnectionDropped` if the connection is gone
    async fn send(&mut self, text: String) -> Result<()>;

    /// Receive the next text frame; `None` once the connection has closed
    async fn recv(&mut self) -> Option<Result<String>>;

    /// Close the connection; closing twice is a no-op
    ///
    /// # Errors
    ///
    /// Returns error if the close handshake fails
    async fn close(&mut self) -> Result<()>;
}

/// Opens transports for new sessions
#[async_trait]
pub trait Connector: Send + Sync {
    /// Complete the handshake and return an open transport
    ///
    /// # Errors
    ///
    /// Returns `ConnectionFailed` if the handshake fails
    async fn connect(&self, request: &ConnectRequest) -> Result<Box<dyn Transport>>;
}

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// WebSocket transport
pub struct WsTransport {
    stream: WsStream,
    closed: bool,
}

#[async_trait]
impl Transport for WsTransport {
    async fn send(&mut self, text: String) -> Result<()> {
        if self.closed {
            return Err(Error::ConnectionDropped("connection closed".to_string()));
        }
        self.stream
            .send(Message::Text(text))
            .await
            .map_err(|e| Error::ConnectionDropped(e.to_string()))
    }

    async fn recv(&mut self) -> Option<Result<String>> {
        if self.closed {
            return None;
        }
        loop {
            match self.stream.next().await? {
                Ok(Message::Text(text)) => return Some(Ok(text)),
                Ok(Message::Binary(bytes)) => {
                    return Some(
                        String::from_utf8(bytes)
                            .map_err(|e| Error::MalformedMessage(e.to_string())),
                    );
                }
                Ok(Message::Close(frame)) => {
                    tracing::debug!(?frame, "websocket closed by remote");
                    self.closed = true;
                    return None;
                }
                // Pings are answered by tungstenite on the next read/write
                Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_)) => {}
                Err(tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed) => {
                    self.closed = true;
                    return None;
                }
                Err(e) => {
                    self.closed = true;
                    return Some(Err(Error::ConnectionDropped(e.to_string())));
                }
            }
        }
    }

    async fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        match self.stream.close(None).await {
            Ok(())
            | Err(tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed) => {
                Ok(())
            }
            Err(e) => Err(Error::ConnectionDropped(e.to_string())),
        }
    }
}

/// Connects over WebSocket
#[derive(Debug, Clone)]
pub struct WsConnector {
    handshake_timeout: Duration,
}

impl Default for WsConnector {
    fn default() -> Self {
        Self::new(Duration::from_secs(10))
    }
}

impl WsConnector {
    /// Create a connector that gives up after `handshake_timeout`
    #[must_use]
    pub const fn new(handshake_timeout: Duration) -> Self {
        Self { handshake_timeout }
    }
}

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self, request: &ConnectRequest) -> Result<Box<dyn Transport>> {
        let endpoint = request.endpoint()?;

        tracing::debug!(
            host = endpoint.host_str().unwrap_or_default(),
            path = endpoint.path(),
            mode = ?request.mode,
            "opening voice connection"
        );

        let (stream, response) =
            tokio::time::timeout(self.handshake_timeout, connect_async(endpoint.as_str()))
                .await
                .map_err(|_| Error::ConnectionFailed("handshake timed out".to_string()))?
                .map_err(|e| Error::ConnectionFailed(e.to_string()))?;

        tracing::debug!(status = %response.status(), "voice connection open");

        Ok(Box::new(WsTransport {
            stream,
            closed: false,
        }))
    }
}
