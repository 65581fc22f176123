//! Prometheus metrics for monitoring
//!
//! Exposes metrics for:
//! - Node connection phase
//! - Gateway operations by outcome
//! - Transaction submission and confirmation
//! - Receipt latency and timeouts

use crate::chain::ConnectionPhase;
use crate::error::ErrorKind;

use axum::{routing::get, Router};
use lazy_static::lazy_static;
use prometheus::{
    register_counter, register_counter_vec, register_gauge, register_histogram, Counter,
    CounterVec, Encoder, Gauge, Histogram, TextEncoder,
};
use std::net::SocketAddr;
use tracing::{error, info};

lazy_static! {
    pub static ref NODE_CONNECTION_PHASE: Gauge = register_gauge!(
        "evm_gateway_node_connection_phase",
        "Node connection phase (0=unconfigured, 1=connected, 2=degraded)"
    ).unwrap();

    pub static ref OPERATIONS: CounterVec = register_counter_vec!(
        "evm_gateway_operations_total",
        "Gateway operations by name and outcome",
        &["operation", "outcome"]
    ).unwrap();

    pub static ref TX_SUBMITTED: CounterVec = register_counter_vec!(
        "evm_gateway_transactions_submitted_total",
        "Transactions accepted by the node",
        &["chain_id"]
    ).unwrap();

    pub static ref TX_REJECTED: CounterVec = register_counter_vec!(
        "evm_gateway_transactions_rejected_total",
        "Transactions rejected by the node at broadcast",
        &["chain_id"]
    ).unwrap();

    pub static ref TX_CONFIRMED: CounterVec = register_counter_vec!(
        "evm_gateway_transactions_confirmed_total",
        "Mined transactions by receipt status",
        &["status"]
    ).unwrap();

    pub static ref RECEIPT_TIMEOUTS: Counter = register_counter!(
        "evm_gateway_receipt_timeouts_total",
        "Receipts not observed within their budget"
    ).unwrap();

    pub static ref RECEIPT_LATENCY: Histogram = register_histogram!(
        "evm_gateway_receipt_latency_seconds",
        "Time from broadcast to receipt",
        vec![0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0, 600.0]
    ).unwrap();

    pub static ref HEALTH_CHECKS: CounterVec = register_counter_vec!(
        "evm_gateway_health_checks_total",
        "Health checks by result",
        &["result"]
    ).unwrap();
}

/// Prometheus metrics server
pub struct MetricsServer {
    port: u16,
}

impl MetricsServer {
    pub fn new(port: u16) -> Self {
        Self { port }
    }

    pub async fn run(&self) -> std::io::Result<()> {
        let app = Router::new().route("/metrics", get(metrics_handler));

        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        info!("Starting metrics server on {}", addr);

        let listener = tokio::net::TcpListener::bind(&addr).await?;
        axum::serve(listener, app).await
    }
}

async fn metrics_handler() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        error!("Failed to encode metrics: {}", e);
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}

// Helper functions to record metrics

pub fn record_connection_phase(phase: ConnectionPhase) {
    let value = match phase {
        ConnectionPhase::Unconfigured => 0.0,
        ConnectionPhase::Connected => 1.0,
        ConnectionPhase::Degraded => 2.0,
    };
    NODE_CONNECTION_PHASE.set(value);
}

pub fn record_operation(operation: &str, outcome: Result<(), ErrorKind>) {
    let outcome = match outcome {
        Ok(()) => "success",
        Err(kind) => kind.as_str(),
    };
    OPERATIONS.with_label_values(&[operation, outcome]).inc();
}

pub fn record_tx_submitted(chain_id: u64) {
    TX_SUBMITTED
        .with_label_values(&[&chain_id.to_string()])
        .inc();
}

pub fn record_tx_rejected(chain_id: u64) {
    TX_REJECTED
        .with_label_values(&[&chain_id.to_string()])
        .inc();
}

pub fn record_tx_confirmed(success: bool) {
    let status = if success { "success" } else { "failure" };
    TX_CONFIRMED.with_label_values(&[status]).inc();
}

pub fn record_receipt_timeout() {
    RECEIPT_TIMEOUTS.inc();
}

pub fn record_receipt_latency(latency_secs: f64) {
    RECEIPT_LATENCY.observe(latency_secs);
}

pub fn record_health_check(healthy: bool) {
    let result = if healthy { "ok" } else { "failed" };
    HEALTH_CHECKS.with_label_values(&[result]).inc();
}
