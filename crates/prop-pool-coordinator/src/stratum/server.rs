use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use axum::{
    extract::{ws::WebSocketUpgrade, ConnectInfo, Path, Query, State},
    http::StatusCode,
    response::Response,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::connection::{handle_websocket, ConnectionHandler, MinerConnection};
use super::protocol::{
    StratumError, StratumMessage, StratumRequest, StratumResponse, INTERNAL_ERROR,
    INVALID_PARAMS, METHOD_NOTIFY, UNAUTHORIZED,
};
use crate::coordinator::{PoolConfig, PoolHandle};
use crate::database::{PoolStats, RoundRecord, RoundStore, WorkerRecord};
use crate::error::{PoolError, Result};
use crate::metrics::ACTIVE_WORKERS;
use crate::payout::RewardConfig;
use crate::shares::ShareSubmission;
use crate::transport::{Topic, Transport};
use crate::types::{Address, RoundId, Transaction};

const DEFAULT_ROUND_LIMIT: usize = 20;
const MAX_ROUND_LIMIT: usize = 100;

/// Live websocket connections. Doubles as the coordinator's outbound
/// transport: round templates go to every authorized worker.
#[derive(Clone, Default)]
pub struct ConnectionRegistry {
    connections: Arc<RwLock<HashMap<String, Arc<MinerConnection>>>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, connection: Arc<MinerConnection>) {
        self.connections
            .write()
            .await
            .insert(connection.id.clone(), connection);
    }

    pub async fn remove(&self, id: &str) -> Option<Arc<MinerConnection>> {
        self.connections.write().await.remove(id)
    }

    pub async fn authorized_count(&self) -> usize {
        let connections = self.connections.read().await;
        let mut count = 0;
        for connection in connections.values() {
            if connection.is_authorized().await {
                count += 1;
            }
        }
        count
    }

    /// Never waits on a slow worker: a connection whose outbound buffer is
    /// full misses this message.
    async fn notify_authorized(&self, message: String) -> usize {
        let connections: Vec<_> = self.connections.read().await.values().cloned().collect();
        let mut delivered = 0;
        for connection in connections {
            if !connection.is_authorized().await {
                continue;
            }
            match connection.try_send_message(message.clone()) {
                Ok(()) => delivered += 1,
                Err(e) => warn!("Failed to notify {}: {}", connection.id, e),
            }
        }
        delivered
    }
}

#[async_trait]
impl Transport for ConnectionRegistry {
    async fn broadcast(&self, topic: Topic, payload: Value) -> Result<()> {
        let method = match topic {
            Topic::NewPoolBlock => METHOD_NOTIFY,
        };
        let notification = StratumResponse::Notification {
            method: method.to_string(),
            params: payload,
        };
        let message = serde_json::to_string(&notification.to_message())?;
        let delivered = self.notify_authorized(message).await;
        debug!("Delivered {} to {} workers", topic, delivered);
        Ok(())
    }
}

#[derive(Clone)]
pub struct StratumServer {
    handle: PoolHandle,
    registry: ConnectionRegistry,
    store: Arc<dyn RoundStore>,
    pool_name: String,
    operator: Address,
    rewards: RewardConfig,
}

impl StratumServer {
    pub fn new(
        handle: PoolHandle,
        registry: ConnectionRegistry,
        store: Arc<dyn RoundStore>,
        config: &PoolConfig,
    ) -> Self {
        Self {
            handle,
            registry,
            store,
            pool_name: config.pool_name.clone(),
            operator: config.operator_address.clone(),
            rewards: config.rewards,
        }
    }

    pub fn router(self) -> Router {
        Router::new()
            .route("/", get(websocket_handler))
            .route("/stats", get(stats_handler))
            .route("/api/rounds", get(rounds_handler))
            .route("/api/rounds/{id}", get(round_handler))
            .route("/api/workers/{address}", get(worker_handler))
            .route("/api/transactions", post(transaction_handler))
            .with_state(Arc::new(self))
    }

    pub async fn pool_stats(&self) -> Result<PoolStats> {
        let status = self.handle.status();
        Ok(PoolStats {
            pool_name: self.pool_name.clone(),
            operator: self.operator.clone(),
            current_round: status.round_id,
            round_state: status.state,
            round_shares: status.total_shares,
            round_workers: status.workers,
            pending_transactions: self.handle.pending_transactions().await,
            connected_workers: self.registry.authorized_count().await,
            rounds_found: self.store.rounds_found().await?,
            total_reward: self.rewards.total_reward,
            operator_cut: self.rewards.operator_cut,
        })
    }

    async fn send_current_round(&self, connection: &MinerConnection) -> Result<()> {
        if let Some(template) = self.handle.current_round() {
            let notification = StratumResponse::notify(&template)?;
            connection
                .send_message(serde_json::to_string(&notification.to_message())?)
                .await?;
        }
        Ok(())
    }

    async fn handle_stratum_request(
        &self,
        connection: &MinerConnection,
        request: StratumRequest,
    ) -> Result<StratumResponse> {
        match request {
            StratumRequest::Subscribe { id, user_agent } => {
                debug!("Connection {} subscribing with {:?}", connection.id, user_agent);
                let subscription_id = format!("{:x}", rand::random::<u64>());
                Ok(StratumResponse::Result {
                    id,
                    result: json!([[METHOD_NOTIFY, subscription_id]]),
                })
            }

            StratumRequest::Authorize { id, address } => {
                if connection.authorize(address.clone()).await.is_none() {
                    ACTIVE_WORKERS.inc();
                }
                info!("Connection {} authorized as {}", connection.id, address);

                // The ack goes first so the worker knows it is authorized
                // before the template arrives.
                let ack = StratumResponse::Result {
                    id,
                    result: json!(true),
                };
                connection
                    .send_message(serde_json::to_string(&ack.to_message())?)
                    .await?;
                self.send_current_round(connection).await?;
                Ok(ack)
            }

            StratumRequest::Submit { id, params } => {
                let Some(worker_address) = connection.worker().await else {
                    return Ok(StratumResponse::Error {
                        id,
                        error: StratumError::new(UNAUTHORIZED, "not authorized"),
                    });
                };
                let submission = ShareSubmission {
                    worker_address,
                    round_id: params.round_id,
                    candidate: params.candidate,
                };
                // Outcomes are only visible in the pool logs.
                match self.handle.submit_share(submission).await {
                    Ok(()) => Ok(StratumResponse::Result {
                        id,
                        result: json!(true),
                    }),
                    Err(e) => Ok(StratumResponse::Error {
                        id,
                        error: StratumError::new(INTERNAL_ERROR, e.to_string()),
                    }),
                }
            }

            StratumRequest::GetStatus { id } => Ok(StratumResponse::Result {
                id,
                result: serde_json::to_value(self.pool_stats().await?)?,
            }),

            StratumRequest::SubmitTransaction { id, tx } => {
                match self.handle.queue_transaction(tx).await {
                    Ok(tx_id) => Ok(StratumResponse::Result {
                        id,
                        result: json!({ "tx_id": tx_id }),
                    }),
                    Err(e @ PoolError::InvalidTransaction(_)) => Ok(StratumResponse::Error {
                        id,
                        error: StratumError::new(INVALID_PARAMS, e.to_string()),
                    }),
                    Err(e) => Err(e),
                }
            }
        }
    }
}

#[async_trait]
impl ConnectionHandler for StratumServer {
    async fn on_connect(&self, connection: Arc<MinerConnection>) {
        info!("New worker connection from {}", connection.address);
        self.registry.insert(connection).await;
    }

    async fn on_message(&self, connection: Arc<MinerConnection>, message: String) -> Result<()> {
        debug!("Received message from {}: {}", connection.id, message);

        let stratum_msg: StratumMessage = serde_json::from_str(&message)?;
        let response = match stratum_msg.parse_request() {
            Ok(request) => {
                let acknowledged = matches!(request, StratumRequest::Authorize { .. });
                let response = self.handle_stratum_request(&connection, request).await?;
                if acknowledged {
                    return Ok(());
                }
                response
            }
            Err(error) => {
                warn!("Bad request from {}: {}", connection.id, error.message);
                StratumResponse::Error {
                    id: stratum_msg.id.unwrap_or_default(),
                    error,
                }
            }
        };

        connection
            .send_message(serde_json::to_string(&response.to_message())?)
            .await
    }

    async fn on_disconnect(&self, connection: Arc<MinerConnection>) {
        info!("Connection {} disconnected", connection.id);
        self.registry.remove(&connection.id).await;
        if connection.is_authorized().await {
            ACTIVE_WORKERS.dec();
        }
    }
}

async fn websocket_handler(
    ws: WebSocketUpgrade,
    State(server): State<Arc<StratumServer>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
) -> Response {
    let connection_id = Uuid::new_v4().to_string();
    ws.on_upgrade(move |socket| handle_websocket(socket, addr, connection_id, server))
}

async fn stats_handler(State(server): State<Arc<StratumServer>>) -> Result<Json<PoolStats>> {
    Ok(Json(server.pool_stats().await?))
}

#[derive(Debug, Deserialize)]
struct RoundsQuery {
    limit: Option<usize>,
}

async fn rounds_handler(
    State(server): State<Arc<StratumServer>>,
    Query(query): Query<RoundsQuery>,
) -> Result<Json<Vec<RoundRecord>>> {
    let limit = query.limit.unwrap_or(DEFAULT_ROUND_LIMIT).min(MAX_ROUND_LIMIT);
    Ok(Json(server.store.recent_rounds(limit).await?))
}

async fn round_handler(
    State(server): State<Arc<StratumServer>>,
    Path(id): Path<u64>,
) -> Result<Json<RoundRecord>> {
    let round_id = RoundId(id);
    server
        .store
        .get_round(round_id)
        .await?
        .map(Json)
        .ok_or(PoolError::RoundNotFound(round_id))
}

async fn worker_handler(
    State(server): State<Arc<StratumServer>>,
    Path(address): Path<String>,
) -> Result<Json<WorkerRecord>> {
    let address = Address::new(address);
    server
        .store
        .get_worker(&address)
        .await?
        .map(Json)
        .ok_or(PoolError::WorkerNotFound(address))
}

async fn transaction_handler(
    State(server): State<Arc<StratumServer>>,
    Json(tx): Json<Transaction>,
) -> Result<(StatusCode, Json<Value>)> {
    let tx_id = server.handle.queue_transaction(tx).await?;
    Ok((StatusCode::ACCEPTED, Json(json!({ "tx_id": tx_id }))))
}
