//! # HTTP Query API
//!
//! Builds the axum router that exposes a node's chain and pool over HTTP.
//! All endpoints share application state through axum's `State` extractor.
//!
//! ## Endpoints
//!
//! | Method | Path          | Description                                  |
//! |--------|---------------|----------------------------------------------|
//! | GET    | `/health`     | Liveness probe                               |
//! | GET    | `/status`     | Node id, height, peer count, pool size       |
//! | GET    | `/block/:id`  | Block by decimal height or hex hash          |
//! | GET    | `/tx/:hash`   | Committed transaction by hex hash            |
//! | POST   | `/tx`         | Submit a bincode-encoded signed transaction  |
//! | GET    | `/metrics`    | Prometheus text format                       |
//!
//! Errors are JSON `{"error": "..."}` with `400` for malformed input and
//! `404` for unknown blocks or transactions.

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{Method, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use strata_protocol::network::{block_view, transaction_view, NodeError, NodeHandle, QueryError};
use strata_protocol::network::{BlockView, TransactionView};
use strata_protocol::transaction::Transaction;

use crate::metrics::{metrics_handler, SharedMetrics};

// ---------------------------------------------------------------------------
// Application State
// ---------------------------------------------------------------------------

/// Shared application state. Cheap to clone.
#[derive(Clone)]
pub struct AppState {
    /// Reported in `/status`.
    pub version: String,
    pub node: NodeHandle,
    pub metrics: SharedMetrics,
}

// ---------------------------------------------------------------------------
// Router Construction
// ---------------------------------------------------------------------------

/// Builds the full axum [`Router`] with all API routes, CORS, and tracing.
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_handler))
        .route("/status", get(status_handler))
        .route("/block/:id", get(block_handler))
        .route("/tx", axum::routing::post(submit_tx_handler))
        .route("/tx/:hash", get(transaction_handler))
        .route("/metrics", get(metrics_handler))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Response Types
// ---------------------------------------------------------------------------

/// Response payload for `GET /status`.
#[derive(Debug, Serialize, Deserialize)]
pub struct StatusResponse {
    pub id: String,
    pub version: String,
    pub height: u32,
    pub peer_count: usize,
    pub pool_size: usize,
}

/// Response payload for `POST /tx`.
#[derive(Debug, Serialize, Deserialize)]
pub struct SubmitResponse {
    /// Hex hash of the accepted transaction.
    pub hash: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

/// Handler failure, rendered as a status code plus [`ErrorResponse`].
#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    NotFound(String),
    /// The node's event loop has stopped.
    Unavailable,
}

impl From<QueryError> for ApiError {
    fn from(e: QueryError) -> Self {
        match e {
            QueryError::BadRequest(msg) => ApiError::BadRequest(msg),
            QueryError::NotFound(msg) => ApiError::NotFound(msg),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::Unavailable => (
                StatusCode::SERVICE_UNAVAILABLE,
                "node is shutting down".to_string(),
            ),
        };
        (status, Json(ErrorResponse { error })).into_response()
    }
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// `GET /health` — 200 while the process is up.
async fn health_handler() -> impl IntoResponse {
    (StatusCode::OK, Json(serde_json::json!({ "status": "ok" })))
}

async fn status_handler(State(state): State<AppState>) -> Json<StatusResponse> {
    Json(StatusResponse {
        id: state.node.id().to_string(),
        version: state.version.clone(),
        height: state.node.height(),
        peer_count: state.node.peers().len(),
        pool_size: state.node.pool().len(),
    })
}

async fn block_handler(
    Path(id): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<BlockView>, ApiError> {
    Ok(Json(block_view(state.node.chain(), &id)?))
}

async fn transaction_handler(
    Path(hash): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<TransactionView>, ApiError> {
    Ok(Json(transaction_view(state.node.chain(), &hash)?))
}

/// `POST /tx` — decode, check the signature, and hand the transaction to
/// the node. Acceptance into the pool happens asynchronously.
async fn submit_tx_handler(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<(StatusCode, Json<SubmitResponse>), ApiError> {
    let tx: Transaction = bincode::deserialize(&body)
        .map_err(|e| ApiError::BadRequest(format!("malformed transaction: {e}")))?;
    tx.verify()
        .map_err(|e| ApiError::BadRequest(e.to_string()))?;

    let hash = tx.hash();
    state.node.submit_transaction(tx).await.map_err(|e| match e {
        NodeError::Stopped => ApiError::Unavailable,
        other => ApiError::BadRequest(other.to_string()),
    })?;
    state.metrics.transactions_submitted_total.inc();
    tracing::debug!(tx = %hash, "transaction submitted over http");

    Ok((
        StatusCode::ACCEPTED,
        Json(SubmitResponse {
            hash: hash.to_hex(),
        }),
    ))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
