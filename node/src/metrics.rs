//! # Prometheus Metrics
//!
//! Gauges sampled from a [`NodeHandle`] at scrape time plus counters bumped
//! by the HTTP API. Everything lives in a dedicated registry with the `strata` prefix.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use prometheus::{Encoder, IntCounter, IntGauge, Registry, TextEncoder};

use strata_protocol::network::NodeHandle;

use crate::api::AppState;

#[derive(Clone)]
pub struct NodeMetrics {
    registry: Registry,
    /// Height of the local chain tip.
    pub block_height: IntGauge,
    pub connected_peers: IntGauge,
    /// Pending transactions in the pool.
    pub transactions_in_pool: IntGauge,
    /// Transactions accepted through `POST /tx`.
    pub transactions_submitted_total: IntCounter,
}

impl NodeMetrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new_custom(Some("strata".into()), None)?;

        let block_height = IntGauge::new("block_height", "Height of the local chain tip")?;
        registry.register(Box::new(block_height.clone()))?;

        let connected_peers =
            IntGauge::new("connected_peers", "Number of currently connected peers")?;
        registry.register(Box::new(connected_peers.clone()))?;

        let transactions_in_pool = IntGauge::new(
            "transactions_in_pool",
            "Current number of pending transactions in the pool",
        )?;
        registry.register(Box::new(transactions_in_pool.clone()))?;

        let transactions_submitted_total = IntCounter::new(
            "transactions_submitted_total",
            "Transactions accepted through the HTTP API",
        )?;
        registry.register(Box::new(transactions_submitted_total.clone()))?;

        Ok(Self {
            registry,
            block_height,
            connected_peers,
            transactions_in_pool,
            transactions_submitted_total,
        })
    }

    /// Copy the node's current height, peer count and pool size into the
    /// gauges.
    pub fn sample(&self, node: &NodeHandle) {
        self.block_height.set(i64::from(node.height()));
        self.connected_peers.set(node.peers().len() as i64);
        self.transactions_in_pool.set(node.pool().len() as i64);
    }

    /// Encodes all registered metrics into the Prometheus text exposition format.
    pub fn encode(&self) -> Result<String, prometheus::Error> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}

pub type SharedMetrics = Arc<NodeMetrics>;

/// Axum handler that renders `/metrics` in Prometheus text format. The
/// gauges are sampled from the node on every scrape.
pub async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    state.metrics.sample(&state.node);
    match state.metrics.encode() {
        Ok(body) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
            body,
        )
            .into_response(),
        Err(e) => {
            tracing::error!(error = %e, "failed to encode metrics");
            (StatusCode::INTERNAL_SERVER_ERROR, "metrics encoding failed").into_response()
        }
    }
}
