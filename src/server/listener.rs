//! Consumer WebSocket server
//!
//! Accepts consumer connections, upgrades them to WebSocket and bridges each
//! one onto its own gateway channel: text frames in are decoded as request
//! envelopes, responses and events out are encoded as text frames.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::{CloseFrame, WebSocketConfig};
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{accept_async_with_config, WebSocketStream};
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::gateway::{Envelope, Gateway, MessageType};
use crate::server::config::ServerConfig;

/// WebSocket front end for the consumer gateway
pub struct BrokerServer {
    config: ServerConfig,
    gateway: Arc<Gateway>,
    next_connection_id: AtomicU64,
    connection_semaphore: Option<Arc<Semaphore>>,
    shutdown: CancellationToken,
}

impl BrokerServer {
    /// Create a new server in front of `gateway`
    pub fn new(config: ServerConfig, gateway: Arc<Gateway>) -> Self {
        let connection_semaphore = if config.max_connections > 0 {
            Some(Arc::new(Semaphore::new(config.max_connections)))
        } else {
            None
        };

        Self {
            config,
            gateway,
            next_connection_id: AtomicU64::new(1),
            connection_semaphore,
            shutdown: CancellationToken::new(),
        }
    }

    /// Get the bind address
    pub fn bind_addr(&self) -> SocketAddr {
        self.config.bind_addr
    }

    /// Token that stops the accept loop and every open connection
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Run the server
    ///
    /// This method blocks until the shutdown token is cancelled.
    pub async fn run(&self) -> Result<()> {
        let listener = TcpListener::bind(self.config.bind_addr).await?;
        self.serve(listener).await
    }

    /// Run the server until `shutdown` completes
    pub async fn run_until<F>(&self, shutdown: F) -> Result<()>
    where
        F: std::future::Future<Output = ()>,
    {
        let listener = TcpListener::bind(self.config.bind_addr).await?;

        tokio::select! {
            _ = shutdown => {
                tracing::info!("Shutdown signal received");
                self.shutdown.cancel();
                Ok(())
            }
            result = self.serve(listener) => result,
        }
    }

    /// Serve consumers on an already bound listener
    pub async fn serve(&self, listener: TcpListener) -> Result<()> {
        let addr = listener.local_addr()?;
        tracing::info!(addr = %addr, "Broker server listening");

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    tracing::info!(addr = %addr, "Broker server stopped");
                    return Ok(());
                }
                accepted = listener.accept() => match accepted {
                    Ok((socket, peer_addr)) => self.handle_connection(socket, peer_addr),
                    Err(e) => {
                        tracing::error!(error = %e, "Failed to accept connection");
                    }
                },
            }
        }
    }

    fn handle_connection(&self, socket: TcpStream, peer_addr: SocketAddr) {
        // Check connection limit
        let permit = if let Some(ref sem) = self.connection_semaphore {
            match sem.clone().try_acquire_owned() {
                Ok(permit) => Some(permit),
                Err(_) => {
                    tracing::warn!(peer = %peer_addr, "Connection rejected: limit reached");
                    return;
                }
            }
        } else {
            None
        };

        let connection_id = self.next_connection_id.fetch_add(1, Ordering::Relaxed);

        tracing::debug!(
            connection_id = connection_id,
            peer = %peer_addr,
            "New connection"
        );

        if self.config.tcp_nodelay {
            if let Err(e) = socket.set_nodelay(true) {
                tracing::error!(error = %e, "Failed to configure socket");
                return;
            }
        }

        let connection = Connection {
            id: connection_id,
            config: self.config.clone(),
            gateway: Arc::clone(&self.gateway),
            shutdown: self.shutdown.child_token(),
            _permit: permit,
        };

        tokio::spawn(async move {
            if let Err(e) = connection.run(socket).await {
                tracing::debug!(
                    connection_id = connection_id,
                    error = %e,
                    "Connection error"
                );
            }

            tracing::debug!(connection_id = connection_id, "Connection closed");
        });
    }
}

/// One upgraded consumer connection
struct Connection {
    id: u64,
    config: ServerConfig,
    gateway: Arc<Gateway>,
    shutdown: CancellationToken,
    _permit: Option<OwnedSemaphorePermit>,
}

impl Connection {
    async fn run(self, socket: TcpStream) -> Result<()> {
        // Oversized frames are rejected by the protocol layer before buffering
        let ws_config = WebSocketConfig {
            max_message_size: Some(self.config.max_message_size),
            max_frame_size: Some(self.config.max_message_size),
            ..WebSocketConfig::default()
        };
        let handshake = accept_async_with_config(socket, Some(ws_config));

        let ws = match tokio::time::timeout(self.config.handshake_timeout, handshake).await {
            Ok(ws) => ws?,
            Err(_) => {
                tracing::debug!(connection_id = self.id, "WebSocket handshake timed out");
                return Ok(());
            }
        };

        self.bridge(ws).await
    }

    async fn bridge(&self, ws: WebSocketStream<TcpStream>) -> Result<()> {
        let (mut write, mut read) = ws.split();
        let mut channel = self.gateway.open();

        tracing::debug!(connection_id = self.id, consumer = %channel.id, "Consumer bound");

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    let _ = write.send(Message::Close(None)).await;
                    break;
                }
                outbound = channel.inbound.recv() => {
                    let Some(envelope) = outbound else { break };
                    write.send(Message::Text(envelope.to_json()?)).await?;
                }
                inbound = read.next() => {
                    let message = match inbound {
                        Some(Ok(message)) => message,
                        Some(Err(WsError::Capacity(e))) => {
                            tracing::warn!(
                                connection_id = self.id,
                                error = %e,
                                limit = self.config.max_message_size,
                                "Message too large, closing"
                            );
                            let close = CloseFrame {
                                code: CloseCode::Size,
                                reason: format!("message exceeds {} bytes", self.config.max_message_size).into(),
                            };
                            let _ = write.send(Message::Close(Some(close))).await;
                            break;
                        }
                        Some(Err(e)) => return Err(e.into()),
                        None => break,
                    };

                    match message {
                        Message::Text(text) => match self.decode(&text) {
                            Ok(request) => {
                                if channel.requests.send(request).await.is_err() {
                                    break;
                                }
                            }
                            Err(reply) => write.send(Message::Text(reply.to_json()?)).await?,
                        },
                        Message::Ping(data) => write.send(Message::Pong(data)).await?,
                        Message::Close(_) => break,
                        _ => {}
                    }
                }
            }
        }

        Ok(())
    }

    /// Decode a request frame, or build the error reply for it
    fn decode(&self, text: &str) -> std::result::Result<Envelope, Envelope> {
        Envelope::from_json(text).map_err(|e| {
            tracing::debug!(connection_id = self.id, error = %e, "Undecodable request");
            let id = serde_json::from_str::<Value>(text)
                .ok()
                .and_then(|v| v.get("id").and_then(Value::as_str).map(str::to_string));
            Envelope::failure(id, MessageType::Error, format!("invalid request: {e}"))
        })
    }
}
