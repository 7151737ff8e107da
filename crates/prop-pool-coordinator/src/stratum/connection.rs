use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, error, info};

use crate::error::{PoolError, Result};
use crate::types::Address;

const OUTBOUND_BUFFER: usize = 100;

pub struct MinerConnection {
    pub id: String,
    pub address: SocketAddr,
    worker: RwLock<Option<Address>>,
    sender: mpsc::Sender<Message>,
}

impl MinerConnection {
    pub fn new(id: String, address: SocketAddr, sender: mpsc::Sender<Message>) -> Self {
        Self {
            id,
            address,
            worker: RwLock::new(None),
            sender,
        }
    }

    /// Worker address this connection authorized as, if any.
    pub async fn worker(&self) -> Option<Address> {
        self.worker.read().await.clone()
    }

    pub async fn is_authorized(&self) -> bool {
        self.worker.read().await.is_some()
    }

    /// Returns the previous address when re-authorizing.
    pub async fn authorize(&self, address: Address) -> Option<Address> {
        self.worker.write().await.replace(address)
    }

    pub async fn send_message(&self, message: String) -> Result<()> {
        self.sender
            .send(Message::Text(message.into()))
            .await
            .map_err(|_| PoolError::WebSocket(format!("connection {} is gone", self.id)))
    }

    /// Queues a message without waiting for buffer space. A full buffer
    /// drops the message.
    pub fn try_send_message(&self, message: String) -> Result<()> {
        self.sender
            .try_send(Message::Text(message.into()))
            .map_err(|e| match e {
                TrySendError::Full(_) => {
                    PoolError::WebSocket(format!("connection {} is not keeping up", self.id))
                }
                TrySendError::Closed(_) => {
                    PoolError::WebSocket(format!("connection {} is gone", self.id))
                }
            })
    }
}

#[async_trait::async_trait]
pub trait ConnectionHandler: Send + Sync {
    async fn on_connect(&self, connection: Arc<MinerConnection>);
    async fn on_message(&self, connection: Arc<MinerConnection>, message: String) -> Result<()>;
    async fn on_disconnect(&self, connection: Arc<MinerConnection>);
}

pub async fn handle_websocket(
    ws: WebSocket,
    addr: SocketAddr,
    connection_id: String,
    handler: Arc<dyn ConnectionHandler>,
) {
    let (mut ws_sender, mut ws_receiver) = ws.split();
    let (tx, mut rx) = mpsc::channel(OUTBOUND_BUFFER);
    let connection = Arc::new(MinerConnection::new(connection_id.clone(), addr, tx));

    let writer = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if let Err(e) = ws_sender.send(msg).await {
                error!("WebSocket send error: {}", e);
                break;
            }
        }
    });

    handler.on_connect(connection.clone()).await;

    while let Some(msg) = ws_receiver.next().await {
        match msg {
            Ok(Message::Text(text)) => {
                if let Err(e) = handler.on_message(connection.clone(), text.to_string()).await {
                    error!("Error handling message from {}: {}", connection_id, e);
                }
            }
            Ok(Message::Close(_)) => {
                info!("Connection {} closed", connection_id);
                break;
            }
            Ok(_) => debug!("Ignoring non-text frame from {}", connection_id),
            Err(e) => {
                error!("WebSocket error on {}: {}", connection_id, e);
                break;
            }
        }
    }

    handler.on_disconnect(connection).await;
    writer.abort();
}
