#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::needless_pass_by_value,
        clippy::items_after_statements
    )
)]

//! EPGB Options Stream - Broker Market Data to Excel
//!
//! Streams level-1 market data from a Primary API (Matba Rofex) broker over
//! WebSocket into an `.xlsx` workbook, refreshed with one bulk write per
//! flush interval.
//!
//! # Layers (inside → outside)
//!
//! - **Domain**: Symbols, ticks and the shared tick table
//!   - `symbol`: Broker symbol transformation
//!   - `market`: Tick decoding targets, validation and connection state
//!   - `table`: Last-write-wins tick store
//!   - `subscription`: Listed symbols and their availability
//!
//! - **Application**: Use cases and port definitions
//!   - `ports`: Sheet sink and instrument directory interfaces
//!   - `services`: Flush loop, workbook rendering, symbol pre-validation
//!
//! - **Infrastructure**: Adapters and external integrations
//!   - `primary`: REST auth, instrument listing and the market data client
//!   - `excel`: Workbook sink
//!   - `tickers`: Ticker list loading
//!   - `config`: Environment configuration
//!   - `health`: Status HTTP endpoint
//!
//! # Data Flow
//!
//! ```text
//! Primary WS ──► MarketDataClient ──mpsc──► event handler ──► SymbolTable
//!                                                                 │
//!                          .xlsx ◄── XlsxSink ◄── FlushService ◄──┘ (every interval)
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Core types with no I/O.
pub mod domain;

/// Application layer - Use cases and port definitions.
pub mod application;

/// Infrastructure layer - Adapters and external integrations.
pub mod infrastructure;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::market::{ConnectionState, MarketTick, PriceEntry, TickRejection, TickUpdate};
pub use domain::subscription::SubscriptionBook;
pub use domain::symbol::{InstrumentKind, InstrumentSymbol, transform};
pub use domain::table::SymbolTable;

// Application services
pub use application::services::{FlushOutcome, FlushService, prevalidate};

// Infrastructure config
pub use infrastructure::config::{AppConfig, ConfigError, ConfigErrors, Credentials, Profile};

// Health server
pub use infrastructure::health::{HealthServer, HealthServerError, HealthServerState};

// Metrics
pub use infrastructure::metrics::init_metrics;

// Telemetry
pub use infrastructure::telemetry::{TelemetryConfig, TelemetryGuard, init as init_telemetry};
