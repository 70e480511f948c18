//! Status and Metrics Endpoint
//!
//! Local HTTP endpoint reporting the market data session, table and flush
//! counters, plus Prometheus metrics.
//!
//! # Endpoints
//!
//! - `GET /health` - Returns JSON status
//! - `GET /healthz` - Liveness probe (simple OK)
//! - `GET /readyz` - Readiness probe (ready while the feed is connected)
//! - `GET /metrics` - Prometheus metrics in text format

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::{Json, Router, extract::State, http::StatusCode, response::IntoResponse, routing::get};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::application::services::{FlushService, FlushStats};
use crate::domain::market::ConnectionState;
use crate::domain::subscription::{SubscriptionBook, UnavailableSymbol};
use crate::domain::table::{SymbolTable, TableStats};
use crate::infrastructure::metrics::get_metrics_handle;
use crate::infrastructure::primary::{ConnectionMonitor, ConnectionSnapshot};

// =============================================================================
// Health Response Types
// =============================================================================

/// Status response.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Overall status: "healthy", "degraded", or "unhealthy".
    pub status: HealthStatus,
    /// Build version.
    pub version: String,
    /// Process uptime in seconds.
    pub uptime_secs: u64,
    /// Current time.
    pub current_time: DateTime<Utc>,
    /// Market data session.
    pub connection: ConnectionSnapshot,
    /// Symbol table counters.
    pub ticks: TableStats,
    /// Flush counters.
    pub flush: FlushStats,
    /// Subscription summary.
    pub subscriptions: SubscriptionStatus,
}

/// Overall health status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Connected and the last flush cycle did not fail.
    Healthy,
    /// Reconnecting, or flushes are failing.
    Degraded,
    /// The market data client has stopped.
    Unhealthy,
}

/// Subscription summary.
#[derive(Debug, Clone, Serialize)]
pub struct SubscriptionStatus {
    /// Symbols listed.
    pub listed: usize,
    /// Symbols subscribed.
    pub active: usize,
    /// Symbols the broker does not serve.
    pub unavailable: Vec<UnavailableSymbol>,
}

// =============================================================================
// Health Server State
// =============================================================================

/// Shared state for the status server.
pub struct HealthServerState {
    version: String,
    started_at: Instant,
    monitor: Arc<ConnectionMonitor>,
    table: Arc<SymbolTable>,
    book: Arc<SubscriptionBook>,
    flush: Arc<FlushService>,
}

impl HealthServerState {
    /// Create new status server state.
    #[must_use]
    pub fn new(
        version: String,
        monitor: Arc<ConnectionMonitor>,
        table: Arc<SymbolTable>,
        book: Arc<SubscriptionBook>,
        flush: Arc<FlushService>,
    ) -> Self {
        Self {
            version,
            started_at: Instant::now(),
            monitor,
            table,
            book,
            flush,
        }
    }
}

// =============================================================================
// Health Server
// =============================================================================

/// Status HTTP server.
pub struct HealthServer {
    port: u16,
    state: Arc<HealthServerState>,
    cancel: CancellationToken,
}

impl HealthServer {
    /// Create a new status server.
    #[must_use]
    pub const fn new(port: u16, state: Arc<HealthServerState>, cancel: CancellationToken) -> Self {
        Self {
            port,
            state,
            cancel,
        }
    }

    /// Run the status server until cancelled.
    ///
    /// # Errors
    ///
    /// Returns `HealthServerError` if binding fails or the HTTP server
    /// encounters a fatal error while running.
    pub async fn run(self) -> Result<(), HealthServerError> {
        let app = router(self.state);

        let addr = SocketAddr::from(([127, 0, 0, 1], self.port));
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| HealthServerError::BindFailed(self.port, e.to_string()))?;

        tracing::info!(port = self.port, "Status server listening");

        axum::serve(listener, app)
            .with_graceful_shutdown(self.cancel.cancelled_owned())
            .await
            .map_err(|e| HealthServerError::ServerFailed(e.to_string()))?;

        tracing::info!("Status server stopped");
        Ok(())
    }
}

fn router(state: Arc<HealthServerState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/healthz", get(liveness_handler))
        .route("/readyz", get(readiness_handler))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
}

// =============================================================================
// HTTP Handlers
// =============================================================================

async fn health_handler(State(state): State<Arc<HealthServerState>>) -> impl IntoResponse {
    let response = build_health_response(&state);
    let status_code = match response.status {
        HealthStatus::Healthy | HealthStatus::Degraded => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };
    (status_code, Json(response))
}

async fn liveness_handler() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

async fn readiness_handler(State(state): State<Arc<HealthServerState>>) -> impl IntoResponse {
    if state.monitor.is_connected() {
        (StatusCode::OK, "READY")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "NOT READY")
    }
}

async fn metrics_handler() -> impl IntoResponse {
    get_metrics_handle().map_or_else(
        || {
            (
                StatusCode::SERVICE_UNAVAILABLE,
                [("content-type", "text/plain")],
                "Metrics not initialized".to_string(),
            )
        },
        |handle| {
            let body = handle.render();
            (
                StatusCode::OK,
                [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
                body,
            )
        },
    )
}

fn build_health_response(state: &HealthServerState) -> HealthResponse {
    let connection = state.monitor.snapshot();
    let flush = state.flush.stats();

    HealthResponse {
        status: determine_health_status(connection.state, &flush),
        version: state.version.clone(),
        uptime_secs: state.started_at.elapsed().as_secs(),
        current_time: Utc::now(),
        connection,
        ticks: state.table.stats(),
        flush,
        subscriptions: SubscriptionStatus {
            listed: state.book.len(),
            active: state.book.active().len(),
            unavailable: state.book.unavailable(),
        },
    }
}

fn determine_health_status(connection: ConnectionState, flush: &FlushStats) -> HealthStatus {
    match connection {
        ConnectionState::Failed => HealthStatus::Unhealthy,
        ConnectionState::Connected if !flush.last_cycle_failed => HealthStatus::Healthy,
        ConnectionState::Connected | ConnectionState::Connecting | ConnectionState::Disconnected => {
            HealthStatus::Degraded
        }
    }
}

// =============================================================================
// Errors
// =============================================================================

/// Status server errors.
#[derive(Debug, thiserror::Error)]
pub enum HealthServerError {
    /// Failed to bind to port.
    #[error("failed to bind to port {0}: {1}")]
    BindFailed(u16, String),

    /// Server error.
    #[error("server error: {0}")]
    ServerFailed(String),
}

// =============================================================================
// Tests
// =============================================================================
