use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

use crate::types::{Address, RoundId};

#[derive(Error, Debug)]
pub enum PoolError {
    #[error("Invalid transaction: {0}")]
    InvalidTransaction(String),

    #[error("Round {0} is not open")]
    RoundClosed(RoundId),

    #[error("Invalid share: {0}")]
    InvalidShare(String),

    #[error("Payout to {address} failed: {reason}")]
    PayoutSubmissionFailed { address: Address, reason: String },

    #[error("Round {0} is not finalizing")]
    RoundNotFinalizing(RoundId),

    #[error("No round is open")]
    NoOpenRound,

    #[error("Round not found: {0}")]
    RoundNotFound(RoundId),

    #[error("Worker not found: {0}")]
    WorkerNotFound(Address),

    #[error("Chain error: {0}")]
    Chain(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Database error: {0}")]
    Database(#[from] redis::RedisError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Stratum protocol error: {0}")]
    StratumProtocol(String),

    #[error("WebSocket error: {0}")]
    WebSocket(String),

    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),

    #[error("Coordinator channel closed")]
    ChannelClosed,
}

pub type Result<T> = std::result::Result<T, PoolError>;

impl IntoResponse for PoolError {
    fn into_response(self) -> Response {
        let status = match &self {
            PoolError::InvalidTransaction(_)
            | PoolError::InvalidShare(_)
            | PoolError::StratumProtocol(_)
            | PoolError::Serialization(_) => StatusCode::BAD_REQUEST,
            PoolError::RoundNotFound(_) | PoolError::WorkerNotFound(_) => StatusCode::NOT_FOUND,
            PoolError::NoOpenRound | PoolError::ChannelClosed => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}
