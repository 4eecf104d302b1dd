//! STOMP over WebSocket transport
//!
//! Each [`WsTransport`] activation owns one connection task. The task opens
//! the socket, speaks STOMP through the `async-stomp` frame codec, and after
//! the socket drops waits `reconnect_delay` and connects again. Session calls
//! never block: they queue commands for the task and return.
//!
//! Subscription ids go on the wire as their `Display` form (`sub-N`) so
//! MESSAGE frames can be routed back to a [`SubscriptionId`].

use std::time::Duration;

use async_stomp::client::ClientCodec;
use async_stomp::{FromServer, Message as StompMessage, ToServer};
use bytes::{Buf, Bytes, BytesMut};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::http::Uri;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::codec::{Decoder, Encoder};
use tokio_util::sync::CancellationToken;

use crate::feed::ProviderConfig;

use super::{StompTransport, SubscriptionId, TransportError, TransportEvent, TransportFactory};

const STOMP_VERSION: &str = "1.2";

/// Connection options shared by every transport a factory creates
#[derive(Debug, Clone)]
pub struct WsTransportConfig {
    /// Wait between a dropped socket and the next connect attempt
    pub reconnect_delay: Duration,

    /// Consecutive drops without a STOMP CONNECTED before giving up (0 = never)
    pub max_reconnect_attempts: u32,

    /// Time allowed for the WebSocket handshake plus STOMP CONNECTED
    pub connect_timeout: Duration,

    /// STOMP `login` header
    pub login: Option<String>,

    /// STOMP `passcode` header
    pub passcode: Option<String>,

    /// STOMP `host` header. Defaults to the host part of the provider URL.
    pub virtual_host: Option<String>,
}

impl Default for WsTransportConfig {
    fn default() -> Self {
        Self {
            reconnect_delay: Duration::from_secs(5),
            max_reconnect_attempts: 0,
            connect_timeout: Duration::from_secs(10),
            login: None,
            passcode: None,
            virtual_host: None,
        }
    }
}

impl WsTransportConfig {
    /// Set the reconnect delay
    pub fn reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    /// Set the number of consecutive failed attempts before giving up
    pub fn max_reconnect_attempts(mut self, attempts: u32) -> Self {
        self.max_reconnect_attempts = attempts;
        self
    }

    /// Set the connect timeout
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set STOMP credentials
    pub fn credentials(mut self, login: impl Into<String>, passcode: impl Into<String>) -> Self {
        self.login = Some(login.into());
        self.passcode = Some(passcode.into());
        self
    }

    /// Override the STOMP virtual host
    pub fn virtual_host(mut self, host: impl Into<String>) -> Self {
        self.virtual_host = Some(host.into());
        self
    }
}

/// Factory for [`WsTransport`]s
#[derive(Debug, Clone, Default)]
pub struct WsTransportFactory {
    config: WsTransportConfig,
}

impl WsTransportFactory {
    pub fn new(config: WsTransportConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &WsTransportConfig {
        &self.config
    }
}

impl TransportFactory for WsTransportFactory {
    fn create(&self, config: &ProviderConfig) -> Result<Box<dyn StompTransport>, TransportError> {
        let uri: Uri = config
            .websocket_url
            .parse()
            .map_err(|e| TransportError::Init(format!("invalid url {}: {}", config.websocket_url, e)))?;

        match uri.scheme_str() {
            Some("ws") | Some("wss") => {}
            _ => {
                return Err(TransportError::Init(format!(
                    "unsupported url {}: expected ws:// or wss://",
                    config.websocket_url
                )))
            }
        }

        let host = match (&self.config.virtual_host, uri.host()) {
            (Some(host), _) => host.clone(),
            (None, Some(host)) => host.to_string(),
            (None, None) => {
                return Err(TransportError::Init(format!(
                    "url {} has no host",
                    config.websocket_url
                )))
            }
        };

        Ok(Box::new(WsTransport {
            provider_id: config.provider_id.clone(),
            url: config.websocket_url.clone(),
            host,
            settings: self.config.clone(),
            next_subscription: 0,
            link: None,
        }))
    }
}

/// Work queued by the session for the connection task
#[derive(Debug)]
enum Command {
    Subscribe {
        id: SubscriptionId,
        destination: String,
    },
    Send {
        destination: String,
        body: String,
    },
    Unsubscribe(SubscriptionId),
}

impl Command {
    fn into_frame(self) -> ToServer {
        match self {
            Command::Subscribe { id, destination } => ToServer::Subscribe {
                destination,
                id: id.to_string(),
                ack: None,
            },
            Command::Send { destination, body } => ToServer::Send {
                destination,
                transaction: None,
                headers: None,
                body: Some(body.into_bytes()),
            },
            Command::Unsubscribe(id) => ToServer::Unsubscribe { id: id.to_string() },
        }
    }
}

/// Handles to the running connection task
struct Link {
    commands: mpsc::UnboundedSender<Command>,
    cancel: CancellationToken,
}

/// STOMP client over a WebSocket, one per provider session
pub struct WsTransport {
    provider_id: String,
    url: String,
    host: String,
    settings: WsTransportConfig,
    next_subscription: u64,
    link: Option<Link>,
}

impl WsTransport {
    fn queue(&mut self, command: Command) -> Result<(), TransportError> {
        let link = self.link.as_ref().ok_or(TransportError::NotConnected)?;
        link.commands
            .send(command)
            .map_err(|_| TransportError::NotConnected)
    }
}

impl StompTransport for WsTransport {
    fn activate(&mut self, events: mpsc::UnboundedSender<TransportEvent>) {
        self.deactivate();

        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();

        let connection = Connection {
            provider_id: self.provider_id.clone(),
            url: self.url.clone(),
            host: self.host.clone(),
            settings: self.settings.clone(),
            events,
            commands: commands_rx,
            cancel: cancel.clone(),
            failures: 0,
        };
        tokio::spawn(connection.run());

        self.link = Some(Link {
            commands: commands_tx,
            cancel,
        });
    }

    fn subscribe(&mut self, topic: &str) -> Result<SubscriptionId, TransportError> {
        self.next_subscription += 1;
        let id = SubscriptionId(self.next_subscription);
        self.queue(Command::Subscribe {
            id,
            destination: topic.to_string(),
        })?;
        Ok(id)
    }

    fn publish(&mut self, destination: &str, body: &str) -> Result<(), TransportError> {
        self.queue(Command::Send {
            destination: destination.to_string(),
            body: body.to_string(),
        })
    }

    fn unsubscribe(&mut self, subscription: SubscriptionId) -> Result<(), TransportError> {
        self.queue(Command::Unsubscribe(subscription))
    }

    fn deactivate(&mut self) {
        if let Some(link) = self.link.take() {
            link.cancel.cancel();
        }
    }
}

impl Drop for WsTransport {
    fn drop(&mut self) {
        self.deactivate();
    }
}

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// WebSocket carrying STOMP frames in text messages
struct StompSocket {
    ws: WsStream,
    codec: ClientCodec,
    buffer: BytesMut,
}

impl StompSocket {
    async fn send(&mut self, frame: ToServer) -> Result<(), String> {
        let mut buf = BytesMut::new();
        self.codec
            .encode(StompMessage::from(frame), &mut buf)
            .map_err(|e| format!("encode failed: {e}"))?;
        let text = String::from_utf8(buf.to_vec()).map_err(|e| format!("encode failed: {e}"))?;
        self.ws
            .send(Message::Text(text))
            .await
            .map_err(|e| format!("send failed: {e}"))
    }

    /// Next frame from the server, `None` once the socket is closed
    async fn next(&mut self) -> Result<Option<FromServer>, String> {
        loop {
            // Heart-beat EOLs between frames
            while matches!(self.buffer.first(), Some(b'\n' | b'\r')) {
                self.buffer.advance(1);
            }
            if let Some(message) = self
                .codec
                .decode(&mut self.buffer)
                .map_err(|e| format!("bad STOMP frame: {e}"))?
            {
                return Ok(Some(message.content));
            }

            match self.ws.next().await {
                Some(Ok(Message::Text(text))) => self.buffer.extend_from_slice(text.as_bytes()),
                Some(Ok(Message::Binary(data))) => self.buffer.extend_from_slice(&data),
                Some(Ok(Message::Close(_))) | None => return Ok(None),
                Some(Ok(_)) => {}
                Some(Err(e)) => return Err(format!("read failed: {e}")),
            }
        }
    }

    async fn close(mut self) {
        let _ = self.send(ToServer::Disconnect { receipt: None }).await;
        let _ = self.ws.close(None).await;
    }
}

/// How a connected period ended
enum Exit {
    /// Deactivated or the session is gone
    Stopped,
    /// Socket closed or the server sent ERROR
    Dropped(String),
}

/// Connection task state for one activation
struct Connection {
    provider_id: String,
    url: String,
    host: String,
    settings: WsTransportConfig,
    events: mpsc::UnboundedSender<TransportEvent>,
    commands: mpsc::UnboundedReceiver<Command>,
    cancel: CancellationToken,
    failures: u32,
}

impl Connection {
    async fn run(mut self) {
        loop {
            // Commands for a dead socket are meaningless after a reconnect
            while self.commands.try_recv().is_ok() {}

            let reason = match self.connected_period().await {
                Ok(Exit::Stopped) => break,
                Ok(Exit::Dropped(reason)) => reason,
                Err(reason) => reason,
            };

            self.failures += 1;
            let reconnecting = self.settings.max_reconnect_attempts == 0
                || self.failures < self.settings.max_reconnect_attempts;

            if reconnecting {
                tracing::warn!(
                    provider = %self.provider_id,
                    reason = %reason,
                    attempt = self.failures,
                    delay_ms = self.settings.reconnect_delay.as_millis() as u64,
                    "STOMP connection lost, reconnecting"
                );
            } else {
                tracing::error!(
                    provider = %self.provider_id,
                    reason = %reason,
                    attempts = self.failures,
                    "Max reconnection attempts reached"
                );
            }

            if !self.emit(TransportEvent::Closed {
                reason,
                reconnecting,
            }) || !reconnecting
            {
                break;
            }

            tokio::select! {
                _ = tokio::time::sleep(self.settings.reconnect_delay) => {}
                _ = self.cancel.cancelled() => break,
            }
        }

        tracing::debug!(provider = %self.provider_id, "STOMP connection task stopped");
    }

    /// Connect, then pump frames and commands until the socket drops
    async fn connected_period(&mut self) -> Result<Exit, String> {
        let opening = tokio::time::timeout(self.settings.connect_timeout, self.open());
        let mut socket = tokio::select! {
            _ = self.cancel.cancelled() => return Ok(Exit::Stopped),
            opened = opening => match opened {
                Ok(socket) => socket?,
                Err(_) => return Err(format!("timed out connecting to {}", self.url)),
            },
        };

        self.failures = 0;
        if !self.emit(TransportEvent::Connected) {
            socket.close().await;
            return Ok(Exit::Stopped);
        }

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    socket.close().await;
                    return Ok(Exit::Stopped);
                }
                command = self.commands.recv() => match command {
                    Some(command) => {
                        tracing::trace!(provider = %self.provider_id, ?command, "STOMP send");
                        socket.send(command.into_frame()).await?;
                    }
                    None => {
                        socket.close().await;
                        return Ok(Exit::Stopped);
                    }
                },
                frame = socket.next() => match frame? {
                    Some(FromServer::Message { subscription, body, .. }) => {
                        let Some(id) = SubscriptionId::parse(&subscription) else {
                            tracing::debug!(provider = %self.provider_id, %subscription, "MESSAGE for foreign subscription");
                            continue;
                        };
                        let event = TransportEvent::Message {
                            subscription: id,
                            body: Bytes::from(body.unwrap_or_default()),
                        };
                        if !self.emit(event) {
                            socket.close().await;
                            return Ok(Exit::Stopped);
                        }
                    }
                    Some(FromServer::Error { message, body, .. }) => {
                        let reason = message
                            .or_else(|| body.map(|b| String::from_utf8_lossy(&b).into_owned()))
                            .unwrap_or_else(|| "ERROR frame".to_string());
                        self.emit(TransportEvent::Error(reason.clone()));
                        return Ok(Exit::Dropped(reason));
                    }
                    Some(_) => {}
                    None => return Ok(Exit::Dropped("socket closed by server".to_string())),
                },
            }
        }
    }

    /// WebSocket handshake followed by STOMP CONNECT/CONNECTED
    async fn open(&self) -> Result<StompSocket, String> {
        tracing::info!(provider = %self.provider_id, url = %self.url, "Opening STOMP connection");

        let (ws, _response) = connect_async(self.url.as_str())
            .await
            .map_err(|e| format!("connect to {} failed: {}", self.url, e))?;

        let mut socket = StompSocket {
            ws,
            codec: ClientCodec,
            buffer: BytesMut::new(),
        };

        socket
            .send(ToServer::Connect {
                accept_version: STOMP_VERSION.to_string(),
                host: self.host.clone(),
                login: self.settings.login.clone(),
                passcode: self.settings.passcode.clone(),
                heartbeat: None,
            })
            .await?;

        match socket.next().await? {
            Some(FromServer::Connected { version, .. }) => {
                tracing::info!(provider = %self.provider_id, version = %version, "STOMP session established");
                Ok(socket)
            }
            Some(FromServer::Error { message, .. }) => Err(format!(
                "CONNECT rejected: {}",
                message.unwrap_or_else(|| "no reason given".to_string())
            )),
            Some(other) => Err(format!("unexpected frame before CONNECTED: {:?}", other)),
            None => Err("socket closed during STOMP handshake".to_string()),
        }
    }

    /// Report an event. False once the session stopped listening.
    fn emit(&self, event: TransportEvent) -> bool {
        self.events.send(event).is_ok()
    }
}
