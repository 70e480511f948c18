//! EPGB Options Stream Binary
//!
//! Streams broker market data into the configured Excel workbook.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin epgb-options-stream
//! ```
//!
//! # Environment Variables
//!
//! ## Required
//! - `PYROFEX_USER`: Broker user
//! - `PYROFEX_PASSWORD`: Broker password
//! - `PYROFEX_ACCOUNT`: Broker account
//!
//! ## Optional
//! - `PYROFEX_ENVIRONMENT`: LIVE | REMARKET (default: LIVE)
//! - `PYROFEX_API_URL`, `PYROFEX_WS_URL`: Override the profile endpoints
//! - `PYROFEX_MAX_RECONNECT_ATTEMPTS`: 0 for unlimited (default: 0)
//! - `PYROFEX_RECONNECT_DELAYS_SECS`: Backoff schedule (default: 1,2,4,8,16,30)
//! - `PYROFEX_IDLE_TIMEOUT_SECS`: Reconnect after this long without data (default: 60)
//! - `EXCEL_FILE`, `EXCEL_PATH`: Target workbook
//! - `SHEET_HOMEBROKER`, `SHEET_TICKERS`: Sheet names
//! - `TICKERS_FILE`: Ticker lists CSV (default: tickers.csv)
//! - `FLUSH_INTERVAL_MS`: Workbook refresh interval (default: 2000)
//! - `VALIDATE_SYMBOLS`: Check symbols against the instrument list (default: true)
//! - `STATUS_PORT`: Status HTTP port, 0 disables (default: 0)
//! - `OTEL_ENABLED`: Enable OpenTelemetry export (default: false)
//! - `RUST_LOG`: Log level (default: info)

use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use epgb_options_stream::application::ports::SheetSink;
use epgb_options_stream::application::services::{FlushService, prevalidate};
use epgb_options_stream::domain::subscription::SubscriptionBook;
use epgb_options_stream::domain::table::SymbolTable;
use epgb_options_stream::infrastructure::config::AppConfig;
use epgb_options_stream::infrastructure::excel::XlsxSink;
use epgb_options_stream::infrastructure::health::{HealthServer, HealthServerState};
use epgb_options_stream::infrastructure::metrics::{self, init_metrics};
use epgb_options_stream::infrastructure::primary::{
    ClientError, ConnectionMonitor, InstrumentCache, InstrumentSource, MarketDataClient,
    MarketDataClientConfig, MarketDataEvent, PrimaryRestClient,
};
use epgb_options_stream::infrastructure::telemetry;
use epgb_options_stream::infrastructure::tickers::load_tickers;
use tokio::signal;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Time allowed for the final flush after shutdown starts.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

/// Buffered events between the client and the table writer.
const EVENT_CHANNEL_CAPACITY: usize = 4096;

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    if rustls::crypto::ring::default_provider()
        .install_default()
        .is_err()
    {
        eprintln!("rustls crypto provider was already installed");
    }

    load_dotenv();

    let config = match AppConfig::from_env() {
        Ok(config) => config,
        Err(errors) => {
            eprintln!("Invalid configuration ({} errors):", errors.len());
            for error in errors.iter() {
                eprintln!("  - {error}");
            }
            return Ok(ExitCode::FAILURE);
        }
    };

    // Initialize telemetry (tracing + optional OTLP export)
    let telemetry_guard = telemetry::init();

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        otlp_export = telemetry_guard.is_exporting(),
        "Starting EPGB options stream"
    );

    if let Err(e) = init_metrics() {
        tracing::warn!(error = %e, "Prometheus recorder not installed, metrics disabled");
    }

    log_config(&config);

    let symbols = load_tickers(&config.runtime.tickers_file).with_context(|| {
        format!(
            "loading ticker lists from {}",
            config.runtime.tickers_file.display()
        )
    })?;
    let book = Arc::new(SubscriptionBook::new(symbols));

    let rest = Arc::new(PrimaryRestClient::new(&config.broker).context("building REST client")?);

    // Fail fast on rejected credentials before touching the workbook
    if let Err(e) = rest.authenticate().await {
        if e.is_terminal() {
            tracing::error!(error = %e, "Authentication rejected");
            eprintln!("{e}");
            return Ok(ExitCode::FAILURE);
        }
        tracing::warn!(error = %e, "Initial authentication failed, the client will retry");
    }

    if config.runtime.validate_symbols {
        let cache = InstrumentCache::new(
            Arc::clone(&rest) as Arc<dyn InstrumentSource>,
            &config.runtime.instrument_cache_dir,
            config.runtime.instrument_cache_ttl,
        );
        prevalidate(&book, &cache).await;
    }

    let shutdown_token = CancellationToken::new();
    let flush_token = CancellationToken::new();

    let table = Arc::new(SymbolTable::new());
    let monitor = Arc::new(ConnectionMonitor::new());

    let sink: Arc<dyn SheetSink> = Arc::new(XlsxSink::new(&config.workbook));
    let flush_service = Arc::new(FlushService::new(
        Arc::clone(&table),
        Arc::clone(&book),
        sink,
        config.runtime.flush_interval,
    ));

    // Create event channel for the market data client
    let (event_tx, event_rx) = mpsc::channel::<MarketDataEvent>(EVENT_CHANNEL_CAPACITY);

    let client = Arc::new(MarketDataClient::new(
        MarketDataClientConfig::from_settings(&config.broker, &config.reconnect),
        Arc::clone(&rest),
        Arc::clone(&book),
        Arc::clone(&monitor),
        event_tx,
        shutdown_token.clone(),
    ));

    // Spawn market data client; a terminal error stops the process
    let client_shutdown = shutdown_token.clone();
    let client_task = tokio::spawn(async move {
        let result = client.run().await;
        if result.is_err() {
            client_shutdown.cancel();
        }
        result
    });

    // Spawn event handler
    let handler_task = tokio::spawn(handle_market_events(
        event_rx,
        Arc::clone(&table),
        Arc::clone(&book),
    ));

    // Spawn flush service
    let flush_task = tokio::spawn(Arc::clone(&flush_service).run(flush_token.clone()));

    // Spawn status server
    if config.runtime.status_port != 0 {
        let health_state = Arc::new(HealthServerState::new(
            env!("CARGO_PKG_VERSION").to_string(),
            Arc::clone(&monitor),
            Arc::clone(&table),
            Arc::clone(&book),
            Arc::clone(&flush_service),
        ));
        let health_server = HealthServer::new(
            config.runtime.status_port,
            health_state,
            shutdown_token.clone(),
        );
        tokio::spawn(async move {
            if let Err(e) = health_server.run().await {
                tracing::error!(error = %e, "Status server error");
            }
        });
    }

    tracing::info!(
        symbols = book.len(),
        workbook = %config.workbook.path().display(),
        "Stream ready"
    );

    await_shutdown(shutdown_token).await;

    let exit = match client_task.await {
        Ok(Ok(())) => ExitCode::SUCCESS,
        Ok(Err(e)) => {
            report_client_failure(&e);
            ExitCode::FAILURE
        }
        Err(e) => {
            tracing::error!(error = %e, "Market data client task failed");
            ExitCode::FAILURE
        }
    };

    // Drain pending ticks before the final flush
    if let Err(e) = handler_task.await {
        tracing::error!(error = %e, "Event handler task failed");
    }
    flush_token.cancel();
    if tokio::time::timeout(SHUTDOWN_TIMEOUT, flush_task).await.is_err() {
        tracing::warn!(
            timeout_secs = SHUTDOWN_TIMEOUT.as_secs(),
            "Final flush did not finish in time"
        );
    }

    tracing::info!(stats = ?flush_service.stats(), "EPGB options stream stopped");
    Ok(exit)
}

/// Apply events from the market data client to the table and book.
async fn handle_market_events(
    mut rx: mpsc::Receiver<MarketDataEvent>,
    table: Arc<SymbolTable>,
    book: Arc<SubscriptionBook>,
) {
    while let Some(event) = rx.recv().await {
        match event {
            MarketDataEvent::Tick(update) => match table.apply(update) {
                Ok(()) => metrics::record_tick_accepted(),
                Err(rejection) => {
                    metrics::record_tick_rejected(rejection.reason());
                    tracing::debug!(reason = %rejection, "Tick dropped");
                }
            },
            MarketDataEvent::SymbolRejected { symbol, reason } => {
                if book.mark_unavailable(&symbol, reason.as_str()) {
                    metrics::set_subscriptions(book.active().len(), book.unavailable().len());
                    tracing::warn!(symbol = %symbol, reason = %reason, "Symbol unavailable");
                }
            }
            MarketDataEvent::Connected { subscribed } => {
                tracing::info!(subscribed, "Market data feed connected");
            }
            MarketDataEvent::Disconnected => {
                tracing::warn!("Market data feed disconnected");
            }
            MarketDataEvent::Reconnecting { attempt, delay } => {
                tracing::info!(attempt, delay_ms = delay.as_millis(), "Market data feed reconnecting");
            }
            MarketDataEvent::Error(msg) => {
                tracing::error!(error = %msg, "Market data feed error");
            }
            MarketDataEvent::AuthenticationFailed(msg) => {
                tracing::error!(error = %msg, "Market data authentication failed");
            }
        }
    }
}

fn report_client_failure(error: &ClientError) {
    tracing::error!(error = %error, "Market data client stopped");
    match error {
        ClientError::Auth(e) => eprintln!("{e}"),
        ClientError::MaxReconnectAttemptsExceeded(attempts) => eprintln!(
            "Gave up after {attempts} reconnection attempts; check connectivity and PYROFEX_MAX_RECONNECT_ATTEMPTS"
        ),
        other => eprintln!("Market data client stopped: {other}"),
    }
}

/// Log the parsed configuration.
fn log_config(config: &AppConfig) {
    tracing::info!(
        profile = config.broker.profile.as_str(),
        workbook = %config.workbook.path().display(),
        flush_interval_ms = config.runtime.flush_interval.as_millis(),
        max_reconnect_attempts = config.reconnect.max_attempts,
        status_port = config.runtime.status_port,
        "Configuration loaded"
    );
    tracing::debug!(
        api_url = %config.broker.api_url,
        ws_url = %config.broker.ws_url,
        tickers_file = %config.runtime.tickers_file.display(),
        "Broker endpoints"
    );
}

/// Load .env file from current directory or any ancestor directory.
fn load_dotenv() {
    if dotenvy::dotenv().is_ok() {
        return;
    }

    if let Ok(cwd) = std::env::current_dir() {
        let mut dir = cwd.as_path();
        while let Some(parent) = dir.parent() {
            let env_path = parent.join(".env");
            if env_path.exists() {
                let _ = dotenvy::from_path(&env_path);
                return;
            }
            dir = parent;
        }
    }
}

/// Wait for SIGTERM, SIGINT, or a terminal client error, then cancel.
#[allow(clippy::expect_used)]
async fn await_shutdown(shutdown_token: CancellationToken) {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("signal handler installation is critical for graceful shutdown");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("SIGTERM handler installation is critical for graceful shutdown")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        }
        () = shutdown_token.cancelled() => {
            tracing::info!("Market data client stopped, initiating shutdown");
        }
    }

    shutdown_token.cancel();

    tracing::info!(
        timeout_secs = SHUTDOWN_TIMEOUT.as_secs(),
        "Graceful shutdown started"
    );
}
