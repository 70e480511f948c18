//! Infrastructure Layer - Adapters and external integrations.
//!
//! This layer contains the concrete implementations of the port interfaces
//! defined in the application layer.

/// Configuration loading and validation.
pub mod config;

/// `.xlsx` workbook sink.
pub mod excel;

/// Status HTTP endpoint.
pub mod health;

/// Prometheus metrics instrumentation.
pub mod metrics;

/// Primary API REST and WebSocket clients.
pub mod primary;

/// OpenTelemetry tracing integration.
pub mod telemetry;

/// Ticker list loading.
pub mod tickers;
