//! Thin WebSocket adapter around the state tracker and calibration
//! controller, shaped the way the fusion backend's own `websocket::server`
//! broadcasts its sensor feed: a broadcast channel fans the current unified
//! map out to every subscriber, and each connection's incoming messages are
//! decoded and forwarded to an mpsc command channel.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use futures_util::{stream::SplitStream, SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio_tungstenite::{accept_async, tungstenite::Message, WebSocketStream};
use tracing::{debug, error, info, warn};

use crate::controller::{is_docked_state, parse_state_payload, MapFetcher};
use crate::errors::FetchError;
use crate::mapmodel::Map;
use crate::models::UnifiedMap;

/// A docking-flow command decoded off the wire, forwarded to whoever drives
/// the calibration controller.
#[derive(Debug, Clone)]
pub struct DockCommand {
    pub vacuum_id: String,
}

pub struct WebSocketServer {
    port: u16,
    map_tx: Arc<broadcast::Sender<UnifiedMap>>,
    cmd_tx: Arc<tokio::sync::mpsc::UnboundedSender<DockCommand>>,
}

impl WebSocketServer {
    pub fn new(
        port: u16,
        map_tx: Arc<broadcast::Sender<UnifiedMap>>,
        cmd_tx: Arc<tokio::sync::mpsc::UnboundedSender<DockCommand>>,
    ) -> Self {
        Self { port, map_tx, cmd_tx }
    }

    pub async fn run(self) -> Result<()> {
        let addr = format!("127.0.0.1:{}", self.port);
        let listener = TcpListener::bind(&addr).await.context(format!("failed to bind to {addr}"))?;

        info!("unified map feed listening on {}", addr);

        loop {
            match listener.accept().await {
                Ok((stream, peer_addr)) => {
                    info!("new connection from {}", peer_addr);
                    let map_tx = self.map_tx.clone();
                    let cmd_tx = self.cmd_tx.clone();
                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(stream, peer_addr, map_tx, cmd_tx).await {
                            warn!("connection error for {}: {}", peer_addr, e);
                        }
                        info!("client {} disconnected", peer_addr);
                    });
                }
                Err(e) => error!("failed to accept connection: {}", e),
            }
        }
    }
}

async fn handle_connection(
    stream: TcpStream,
    peer_addr: SocketAddr,
    map_tx: Arc<broadcast::Sender<UnifiedMap>>,
    cmd_tx: Arc<tokio::sync::mpsc::UnboundedSender<DockCommand>>,
) -> Result<()> {
    let ws_stream = accept_async(stream).await.context("websocket handshake failed")?;
    let (mut ws_sender, mut ws_receiver) = ws_stream.split();
    let mut map_rx = map_tx.subscribe();

    let mut receive_task = tokio::spawn(async move { handle_incoming_messages(&mut ws_receiver, peer_addr, cmd_tx).await });

    loop {
        tokio::select! {
            result = map_rx.recv() => {
                match result {
                    Ok(unified) => {
                        let collection = unified.to_feature_collection();
                        match serde_json::to_string(&collection) {
                            Ok(json) => {
                                if ws_sender.send(Message::Text(json)).await.is_err() {
                                    break;
                                }
                            }
                            Err(e) => error!("serialization error: {}", e),
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!("client {} lagged, skipped {} updates", peer_addr, skipped);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
            _ = &mut receive_task => {
                debug!("receive task completed for {}", peer_addr);
                break;
            }
        }
    }

    let _ = ws_sender.send(Message::Close(None)).await;
    Ok(())
}

async fn handle_incoming_messages(
    ws_receiver: &mut SplitStream<WebSocketStream<TcpStream>>,
    peer_addr: SocketAddr,
    cmd_tx: Arc<tokio::sync::mpsc::UnboundedSender<DockCommand>>,
) {
    while let Some(msg_result) = ws_receiver.next().await {
        match msg_result {
            Ok(Message::Text(text)) => {
                debug!("received from {}: {}", peer_addr, text);
                handle_client_message(&text, &cmd_tx);
            }
            Ok(Message::Close(frame)) => {
                info!("close frame from {}: {:?}", peer_addr, frame);
                break;
            }
            Ok(_) => {}
            Err(e) => {
                warn!("error receiving from {}: {}", peer_addr, e);
                break;
            }
        }
    }
}

/// Accepts `{"type": "docked", "vacuumId": "..."}` and
/// `{"type": "state", "vacuumId": "...", "value": "docked"}` (or a bare
/// string/plain-text `value`, per the three state-payload shapes).
fn handle_client_message(text: &str, cmd_tx: &tokio::sync::mpsc::UnboundedSender<DockCommand>) {
    let Ok(json) = serde_json::from_str::<serde_json::Value>(text) else { return };
    let Some(msg_type) = json.get("type").and_then(|v| v.as_str()) else { return };
    let Some(vacuum_id) = json.get("vacuumId").and_then(|v| v.as_str()) else { return };

    let docked = match msg_type {
        "docked" => true,
        "state" => json
            .get("value")
            .map(|v| if let Some(s) = v.as_str() { s.to_string() } else { v.to_string() })
            .map(|raw| is_docked_state(&parse_state_payload(&raw)))
            .unwrap_or(false),
        _ => false,
    };

    if docked {
        let _ = cmd_tx.send(DockCommand { vacuum_id: vacuum_id.to_string() });
    }
}

/// Default [`MapFetcher`] that fetches a robot's current map over HTTP.
pub struct HttpMapFetcher {
    client: reqwest::Client,
    base_url: String,
}

impl HttpMapFetcher {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self { client: reqwest::Client::new(), base_url: base_url.into() }
    }
}

#[async_trait::async_trait]
impl MapFetcher for HttpMapFetcher {
    async fn fetch(&self, robot_id: &str) -> Result<Map, FetchError> {
        let url = format!("{}/vacuums/{}/map", self.base_url, robot_id);
        let response = self.client.get(&url).send().await.map_err(|e| {
            if e.is_timeout() {
                FetchError::Timeout
            } else {
                FetchError::Transport(e.to_string())
            }
        })?;

        let status = response.status();
        if status.is_server_error() {
            return Err(FetchError::ServerError(status.as_u16()));
        }
        if status.is_client_error() {
            return Err(FetchError::ClientError(status.as_u16()));
        }

        let bytes = response.bytes().await.map_err(|e| FetchError::Transport(e.to_string()))?;
        crate::decode::decode(&bytes).map_err(FetchError::from)
    }
}
