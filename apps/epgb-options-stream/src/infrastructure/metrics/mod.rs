//! Prometheus Metrics Module
//!
//! Exposes application metrics via Prometheus format for monitoring.
//!
//! # Metrics Categories
//!
//! - **Messages**: frames received from the broker by kind
//! - **Ticks**: accepted and rejected ticks, with rejection reason
//! - **Connection**: session state, reconnect attempts, WebSocket errors
//! - **Subscriptions**: subscribed and unavailable symbol counts
//! - **Flush**: workbook writes by outcome and their duration
//!
//! # Integration
//!
//! Metrics are exposed at `/metrics` on the status server port.

use std::sync::OnceLock;
use std::time::Duration;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};

use crate::domain::market::ConnectionState;

// =============================================================================
// Global Metrics Handle
// =============================================================================

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Initialize the Prometheus metrics recorder.
///
/// Calling it again returns the handle installed by the first call.
///
/// # Errors
///
/// Returns [`BuildError`] if another global recorder is already installed.
pub fn init_metrics() -> Result<PrometheusHandle, BuildError> {
    if let Some(handle) = PROMETHEUS_HANDLE.get() {
        return Ok(handle.clone());
    }

    let handle = PrometheusBuilder::new().install_recorder()?;
    register_metrics();
    Ok(PROMETHEUS_HANDLE.get_or_init(|| handle).clone())
}

/// Get the Prometheus handle for rendering metrics.
///
/// Returns `None` if metrics have not been initialized.
#[must_use]
pub fn get_metrics_handle() -> Option<PrometheusHandle> {
    PROMETHEUS_HANDLE.get().cloned()
}

// =============================================================================
// Metric Registration
// =============================================================================

fn register_metrics() {
    describe_counter!(
        "epgb_messages_received_total",
        "Total frames received from the broker WebSocket"
    );

    describe_counter!("epgb_ticks_accepted_total", "Ticks written to the symbol table");
    describe_counter!(
        "epgb_ticks_rejected_total",
        "Ticks dropped by validation, by reason"
    );

    describe_gauge!(
        "epgb_connection_state",
        "Market data session state (0 disconnected, 1 connecting, 2 connected, 3 failed)"
    );
    describe_counter!(
        "epgb_reconnects_total",
        "Total WebSocket reconnection attempts"
    );
    describe_counter!(
        "epgb_websocket_errors_total",
        "Total WebSocket session errors by type"
    );

    describe_gauge!("epgb_subscribed_symbols", "Symbols subscribed on the feed");
    describe_gauge!(
        "epgb_unavailable_symbols",
        "Symbols not subscribed because the broker does not serve them"
    );

    describe_counter!("epgb_flushes_total", "Workbook flush cycles by outcome");
    describe_histogram!(
        "epgb_flush_duration_seconds",
        "Time to produce and replace the workbook"
    );
}

// =============================================================================
// Metric Recording Functions
// =============================================================================

/// Metric labels for inbound frame kinds.
#[derive(Debug, Clone, Copy)]
pub enum MessageKind {
    /// Market data push.
    MarketData,
    /// Error report.
    Error,
    /// Any other recognised frame.
    Other,
    /// Frame that could not be decoded.
    Malformed,
}

impl MessageKind {
    const fn as_str(self) -> &'static str {
        match self {
            Self::MarketData => "market_data",
            Self::Error => "error",
            Self::Other => "other",
            Self::Malformed => "malformed",
        }
    }
}

/// Metric labels for flush outcomes.
#[derive(Debug, Clone, Copy)]
pub enum FlushResult {
    /// Workbook replaced.
    Written,
    /// Target locked or closed.
    Skipped,
    /// Write error.
    Failed,
}

impl FlushResult {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Written => "written",
            Self::Skipped => "skipped",
            Self::Failed => "failed",
        }
    }
}

/// Record a frame received from the broker.
pub fn record_message_received(kind: MessageKind) {
    counter!(
        "epgb_messages_received_total",
        "message_type" => kind.as_str()
    )
    .increment(1);
}

/// Record a tick accepted into the table.
pub fn record_tick_accepted() {
    counter!("epgb_ticks_accepted_total").increment(1);
}

/// Record a tick dropped by validation.
pub fn record_tick_rejected(reason: &'static str) {
    counter!(
        "epgb_ticks_rejected_total",
        "reason" => reason
    )
    .increment(1);
}

/// Update the session state gauge.
pub fn set_connection_state(state: ConnectionState) {
    let value = match state {
        ConnectionState::Disconnected => 0.0,
        ConnectionState::Connecting => 1.0,
        ConnectionState::Connected => 2.0,
        ConnectionState::Failed => 3.0,
    };
    gauge!("epgb_connection_state").set(value);
}

/// Record a WebSocket reconnection attempt.
pub fn record_reconnect() {
    counter!("epgb_reconnects_total").increment(1);
}

/// Record a WebSocket session error.
pub fn record_websocket_error(error_type: &'static str) {
    counter!(
        "epgb_websocket_errors_total",
        "error_type" => error_type
    )
    .increment(1);
}

/// Update subscription gauges.
#[allow(clippy::cast_precision_loss)]
pub fn set_subscriptions(subscribed: usize, unavailable: usize) {
    gauge!("epgb_subscribed_symbols").set(subscribed as f64);
    gauge!("epgb_unavailable_symbols").set(unavailable as f64);
}

/// Record a flush cycle.
pub fn record_flush(result: FlushResult, duration: Option<Duration>) {
    counter!(
        "epgb_flushes_total",
        "outcome" => result.as_str()
    )
    .increment(1);
    if let Some(duration) = duration {
        histogram!("epgb_flush_duration_seconds").record(duration.as_secs_f64());
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_kind_as_str() {
        assert_eq!(MessageKind::MarketData.as_str(), "market_data");
        assert_eq!(MessageKind::Error.as_str(), "error");
        assert_eq!(MessageKind::Other.as_str(), "other");
        assert_eq!(MessageKind::Malformed.as_str(), "malformed");
    }

    #[test]
    fn flush_result_as_str() {
        assert_eq!(FlushResult::Written.as_str(), "written");
        assert_eq!(FlushResult::Skipped.as_str(), "skipped");
        assert_eq!(FlushResult::Failed.as_str(), "failed");
    }

    #[test]
    fn recording_without_recorder_is_a_no_op() {
        record_tick_accepted();
        record_tick_rejected("missing_price");
        set_connection_state(ConnectionState::Connected);
        record_flush(FlushResult::Written, Some(Duration::from_millis(5)));
    }
}
