//! Market Data WebSocket Client
//!
//! Holds one session against the Primary market data stream.
//!
//! # Session
//!
//! 1. Obtain a token over REST (cached across reconnects)
//! 2. Open the WebSocket with the `X-Auth-Token` header
//! 3. Send `smd` subscriptions for every active symbol, batched
//! 4. Forward market data as [`MarketDataEvent::Tick`] until the session drops
//!
//! Dropped sessions are retried on the [`ReconnectPolicy`] schedule. Rejected
//! credentials stop the client with [`ConnectionState::Failed`].

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures_util::{SinkExt, StreamExt};
use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{HeaderValue, StatusCode};
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_util::sync::CancellationToken;

use super::codec::{CodecError, DEFAULT_SUBSCRIBE_BATCH, PrimaryCodec, PrimaryMessage};
use super::reconnect::{ReconnectConfig, ReconnectPolicy};
use super::rest::{AUTH_TOKEN_HEADER, AuthError, PrimaryRestClient};
use crate::domain::market::{ConnectionState, TickUpdate};
use crate::domain::subscription::SubscriptionBook;
use crate::infrastructure::config::{BrokerSettings, ReconnectSettings};
use crate::infrastructure::metrics;

// =============================================================================
// Error Type
// =============================================================================

/// Errors that can end a market data session.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// Token could not be obtained.
    #[error(transparent)]
    Auth(#[from] AuthError),

    /// WebSocket error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tungstenite::Error),

    /// The upgrade request could not be built.
    #[error("invalid WebSocket request: {0}")]
    InvalidRequest(String),

    /// Codec error on an outbound frame.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// No frame arrived within the idle window.
    #[error("no data for {0:?}")]
    IdleTimeout(Duration),

    /// Connection closed by the server.
    #[error("connection closed")]
    ConnectionClosed,

    /// Event receiver dropped.
    #[error("event channel closed")]
    ChannelClosed,

    /// Maximum reconnection attempts exceeded.
    #[error("maximum reconnection attempts ({0}) exceeded")]
    MaxReconnectAttemptsExceeded(u32),
}

impl ClientError {
    /// Whether reconnecting can never fix this.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        match self {
            Self::Auth(e) => e.is_terminal(),
            Self::InvalidRequest(_) | Self::MaxReconnectAttemptsExceeded(_) => true,
            Self::WebSocket(_)
            | Self::Codec(_)
            | Self::IdleTimeout(_)
            | Self::ConnectionClosed
            | Self::ChannelClosed => false,
        }
    }

    const fn metric_label(&self) -> &'static str {
        match self {
            Self::Auth(_) => "auth",
            Self::WebSocket(_) => "websocket",
            Self::InvalidRequest(_) => "invalid_request",
            Self::Codec(_) => "codec",
            Self::IdleTimeout(_) => "idle_timeout",
            Self::ConnectionClosed => "closed",
            Self::ChannelClosed => "channel_closed",
            Self::MaxReconnectAttemptsExceeded(_) => "max_attempts",
        }
    }
}

// =============================================================================
// Client Events
// =============================================================================

/// Events emitted by the market data client.
#[derive(Debug, Clone)]
pub enum MarketDataEvent {
    /// Connected and subscriptions sent.
    Connected {
        /// Symbols subscribed.
        subscribed: usize,
    },
    /// Session dropped.
    Disconnected,
    /// Waiting before the next attempt.
    Reconnecting {
        /// Consecutive attempt number.
        attempt: u32,
        /// Wait before the attempt.
        delay: Duration,
    },
    /// Decoded market data.
    Tick(TickUpdate),
    /// The broker rejected a subscribed symbol.
    SymbolRejected {
        /// Broker symbol.
        symbol: String,
        /// Broker's reason.
        reason: String,
    },
    /// Broker error not tied to a symbol.
    Error(String),
    /// Credentials rejected; the client has stopped.
    AuthenticationFailed(String),
}

// =============================================================================
// Connection Monitor
// =============================================================================

/// Session state and counters shared with the status endpoint.
#[derive(Debug, Default)]
pub struct ConnectionMonitor {
    state: RwLock<ConnectionState>,
    reconnect_attempts: AtomicU32,
    total_reconnects: AtomicU64,
    messages_received: AtomicU64,
    last_message_at: RwLock<Option<DateTime<Utc>>>,
    connected_since: RwLock<Option<DateTime<Utc>>>,
    last_error: RwLock<Option<String>>,
}

/// Point-in-time view of a [`ConnectionMonitor`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectionSnapshot {
    /// Session state.
    pub state: ConnectionState,
    /// Current consecutive reconnect attempt (0 when connected).
    pub reconnect_attempts: u32,
    /// Reconnect attempts since start.
    pub total_reconnects: u64,
    /// Frames received since start.
    pub messages_received: u64,
    /// Time of the last frame.
    pub last_message_at: Option<DateTime<Utc>>,
    /// Start of the current session.
    pub connected_since: Option<DateTime<Utc>>,
    /// Last session error.
    pub last_error: Option<String>,
}

impl ConnectionMonitor {
    /// Create a monitor in the disconnected state.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.state.read()
    }

    /// Whether the session is subscribed and receiving.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Transition to `state`.
    pub fn set_state(&self, state: ConnectionState) {
        let previous = std::mem::replace(&mut *self.state.write(), state);
        if previous != state {
            tracing::debug!(from = previous.as_str(), to = state.as_str(), "Connection state changed");
        }
        match state {
            ConnectionState::Connected => {
                self.reconnect_attempts.store(0, Ordering::Relaxed);
                *self.connected_since.write() = Some(Utc::now());
            }
            ConnectionState::Disconnected | ConnectionState::Failed => {
                *self.connected_since.write() = None;
            }
            ConnectionState::Connecting => {}
        }
        metrics::set_connection_state(state);
    }

    fn record_reconnect(&self, attempt: u32) {
        self.reconnect_attempts.store(attempt, Ordering::Relaxed);
        self.total_reconnects.fetch_add(1, Ordering::Relaxed);
    }

    fn record_message(&self) {
        self.messages_received.fetch_add(1, Ordering::Relaxed);
        *self.last_message_at.write() = Some(Utc::now());
    }

    fn record_error(&self, error: &ClientError) {
        *self.last_error.write() = Some(error.to_string());
    }

    /// Snapshot for reporting.
    #[must_use]
    pub fn snapshot(&self) -> ConnectionSnapshot {
        ConnectionSnapshot {
            state: self.state(),
            reconnect_attempts: self.reconnect_attempts.load(Ordering::Relaxed),
            total_reconnects: self.total_reconnects.load(Ordering::Relaxed),
            messages_received: self.messages_received.load(Ordering::Relaxed),
            last_message_at: *self.last_message_at.read(),
            connected_since: *self.connected_since.read(),
            last_error: self.last_error.read().clone(),
        }
    }
}

// =============================================================================
// Client Configuration
// =============================================================================

/// Configuration for the market data client.
#[derive(Debug, Clone)]
pub struct MarketDataClientConfig {
    /// WebSocket URL.
    pub ws_url: String,
    /// Reconnection configuration.
    pub reconnect: ReconnectConfig,
    /// Drop the session when no frame arrives for this long.
    pub idle_timeout: Duration,
    /// Products per subscription frame.
    pub subscribe_batch: usize,
}

impl MarketDataClientConfig {
    /// Build from loaded settings.
    #[must_use]
    pub fn from_settings(broker: &BrokerSettings, reconnect: &ReconnectSettings) -> Self {
        Self {
            ws_url: broker.ws_url.clone(),
            reconnect: ReconnectConfig::from_settings(reconnect),
            idle_timeout: reconnect.idle_timeout,
            subscribe_batch: DEFAULT_SUBSCRIBE_BATCH,
        }
    }

    fn ping_interval(&self) -> Duration {
        (self.idle_timeout / 2).max(Duration::from_millis(100))
    }
}

// =============================================================================
// Market Data Client
// =============================================================================

/// WebSocket client for Primary market data.
pub struct MarketDataClient {
    config: MarketDataClientConfig,
    rest: Arc<PrimaryRestClient>,
    book: Arc<SubscriptionBook>,
    monitor: Arc<ConnectionMonitor>,
    codec: PrimaryCodec,
    event_tx: mpsc::Sender<MarketDataEvent>,
    cancel: CancellationToken,
}

impl MarketDataClient {
    /// Create a new client.
    #[must_use]
    pub fn new(
        config: MarketDataClientConfig,
        rest: Arc<PrimaryRestClient>,
        book: Arc<SubscriptionBook>,
        monitor: Arc<ConnectionMonitor>,
        event_tx: mpsc::Sender<MarketDataEvent>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            config,
            rest,
            book,
            monitor,
            codec: PrimaryCodec::new(),
            event_tx,
            cancel,
        }
    }

    /// Run the connection loop until cancelled or a terminal error.
    ///
    /// # Errors
    ///
    /// Returns the terminal [`ClientError`]: rejected credentials or an
    /// exhausted reconnect budget. The monitor is left in
    /// [`ConnectionState::Failed`].
    pub async fn run(self: Arc<Self>) -> Result<(), ClientError> {
        let mut reconnect_policy = ReconnectPolicy::new(self.config.reconnect.clone());

        loop {
            if self.cancel.is_cancelled() {
                tracing::info!("Market data client cancelled");
                self.monitor.set_state(ConnectionState::Disconnected);
                return Ok(());
            }

            self.monitor.set_state(ConnectionState::Connecting);

            match self.connect_and_run(&mut reconnect_policy).await {
                Ok(()) => {
                    tracing::info!("Market data session closed");
                    self.monitor.set_state(ConnectionState::Disconnected);
                    return Ok(());
                }
                Err(ClientError::ChannelClosed) => {
                    tracing::info!("Event receiver dropped, stopping market data client");
                    self.monitor.set_state(ConnectionState::Disconnected);
                    return Ok(());
                }
                Err(e) if e.is_terminal() => {
                    tracing::error!(error = %e, "Market data client stopped");
                    metrics::record_websocket_error(e.metric_label());
                    self.monitor.record_error(&e);
                    self.monitor.set_state(ConnectionState::Failed);
                    let event = match &e {
                        ClientError::Auth(auth) => {
                            MarketDataEvent::AuthenticationFailed(auth.to_string())
                        }
                        other => MarketDataEvent::Error(other.to_string()),
                    };
                    let _ = self.event_tx.send(event).await;
                    return Err(e);
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Market data session error");
                    metrics::record_websocket_error(e.metric_label());
                    self.monitor.record_error(&e);
                    self.monitor.set_state(ConnectionState::Disconnected);

                    let _ = self.event_tx.send(MarketDataEvent::Disconnected).await;

                    if let Some(delay) = reconnect_policy.next_delay() {
                        let attempt = reconnect_policy.attempt_count();
                        tracing::info!(
                            attempt,
                            delay_ms = delay.as_millis(),
                            "Reconnecting to market data stream"
                        );
                        self.monitor.record_reconnect(attempt);
                        metrics::record_reconnect();

                        let _ = self
                            .event_tx
                            .send(MarketDataEvent::Reconnecting { attempt, delay })
                            .await;

                        tokio::select! {
                            () = self.cancel.cancelled() => {
                                tracing::info!("Market data client cancelled during reconnect delay");
                                self.monitor.set_state(ConnectionState::Disconnected);
                                return Ok(());
                            }
                            () = tokio::time::sleep(delay) => {}
                        }
                    } else {
                        let e = ClientError::MaxReconnectAttemptsExceeded(
                            reconnect_policy.max_attempts(),
                        );
                        tracing::error!(error = %e, "Giving up on market data stream");
                        self.monitor.record_error(&e);
                        self.monitor.set_state(ConnectionState::Failed);
                        return Err(e);
                    }
                }
            }
        }
    }

    /// Connect, subscribe and forward frames until error or cancellation.
    async fn connect_and_run(&self, policy: &mut ReconnectPolicy) -> Result<(), ClientError> {
        let token = self.rest.token().await?;

        let mut request = self
            .config
            .ws_url
            .as_str()
            .into_client_request()
            .map_err(|e| ClientError::InvalidRequest(e.to_string()))?;
        let header =
            HeaderValue::from_str(&token).map_err(|e| ClientError::InvalidRequest(e.to_string()))?;
        request.headers_mut().insert(AUTH_TOKEN_HEADER, header);

        tracing::info!(url = %self.config.ws_url, "Connecting to market data stream");

        let ws_stream = match tokio_tungstenite::connect_async(request).await {
            Ok((stream, _response)) => stream,
            Err(tungstenite::Error::Http(response))
                if matches!(
                    response.status(),
                    StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN
                ) =>
            {
                tracing::warn!(status = %response.status(), "Token rejected on upgrade, renewing");
                self.rest.invalidate_token();
                return Err(ClientError::ConnectionClosed);
            }
            Err(e) => return Err(e.into()),
        };

        let (mut write, mut read) = ws_stream.split();

        let symbols = self.book.active();
        for frame in self
            .codec
            .encode_subscriptions(&symbols, self.config.subscribe_batch)?
        {
            write.send(Message::Text(frame.into())).await?;
        }
        metrics::set_subscriptions(symbols.len(), self.book.unavailable().len());

        tracing::info!(symbols = symbols.len(), "Subscribed to market data");
        self.monitor.set_state(ConnectionState::Connected);
        policy.reset();
        let _ = self
            .event_tx
            .send(MarketDataEvent::Connected {
                subscribed: symbols.len(),
            })
            .await;

        let idle_timeout = self.config.idle_timeout;
        let mut idle_deadline = Instant::now() + idle_timeout;
        let mut ping = tokio::time::interval(self.config.ping_interval());
        ping.tick().await;

        loop {
            tokio::select! {
                () = self.cancel.cancelled() => {
                    let _ = write.send(Message::Close(None)).await;
                    return Ok(());
                }
                () = tokio::time::sleep_until(idle_deadline) => {
                    tracing::warn!(timeout_secs = idle_timeout.as_secs(), "Market data stream idle");
                    return Err(ClientError::IdleTimeout(idle_timeout));
                }
                _ = ping.tick() => {
                    write.send(Message::Ping(Vec::new().into())).await?;
                }
                msg = read.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            idle_deadline = Instant::now() + idle_timeout;
                            self.handle_text_message(&text).await?;
                        }
                        Some(Ok(Message::Ping(data))) => {
                            idle_deadline = Instant::now() + idle_timeout;
                            write.send(Message::Pong(data)).await?;
                        }
                        Some(Ok(Message::Close(frame))) => {
                            tracing::info!(frame = ?frame, "Server sent close frame");
                            return Err(ClientError::ConnectionClosed);
                        }
                        Some(Ok(_)) => {
                            idle_deadline = Instant::now() + idle_timeout;
                        }
                        Some(Err(e)) => return Err(e.into()),
                        None => {
                            tracing::info!("WebSocket stream ended");
                            return Err(ClientError::ConnectionClosed);
                        }
                    }
                }
            }
        }
    }

    /// Handle a text frame. Undecodable frames are logged and skipped.
    async fn handle_text_message(&self, text: &str) -> Result<(), ClientError> {
        self.monitor.record_message();

        let msg = match self.codec.decode(text) {
            Ok(msg) => msg,
            Err(e) => {
                metrics::record_message_received(metrics::MessageKind::Malformed);
                tracing::warn!(error = %e, "Dropping undecodable frame");
                return Ok(());
            }
        };

        let event = match msg {
            PrimaryMessage::MarketData(md) => {
                metrics::record_message_received(metrics::MessageKind::MarketData);
                MarketDataEvent::Tick(self.codec.to_tick_update(*md, Utc::now()))
            }
            PrimaryMessage::Error(error) => {
                metrics::record_message_received(metrics::MessageKind::Error);
                let reason = error.reason().to_string();
                match self.book.find_in(&reason) {
                    Some(symbol) => MarketDataEvent::SymbolRejected { symbol, reason },
                    None => {
                        tracing::error!(reason = %reason, "Broker error");
                        MarketDataEvent::Error(reason)
                    }
                }
            }
            PrimaryMessage::Other(kind) => {
                metrics::record_message_received(metrics::MessageKind::Other);
                tracing::trace!(kind = %kind, "Ignoring unhandled message type");
                return Ok(());
            }
        };

        self.event_tx
            .send(event)
            .await
            .map_err(|_| ClientError::ChannelClosed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_errors() {
        assert!(ClientError::Auth(AuthError::InvalidCredentials { status: 401 }).is_terminal());
        assert!(ClientError::MaxReconnectAttemptsExceeded(3).is_terminal());
        assert!(!ClientError::Auth(AuthError::Transport("reset".into())).is_terminal());
        assert!(!ClientError::IdleTimeout(Duration::from_secs(60)).is_terminal());
        assert!(!ClientError::ConnectionClosed.is_terminal());
    }

    #[test]
    fn monitor_resets_attempts_on_connect() {
        let monitor = ConnectionMonitor::new();
        assert_eq!(monitor.state(), ConnectionState::Disconnected);

        monitor.record_reconnect(1);
        monitor.record_reconnect(2);
        assert_eq!(monitor.snapshot().reconnect_attempts, 2);

        monitor.set_state(ConnectionState::Connected);
        let snapshot = monitor.snapshot();
        assert_eq!(snapshot.reconnect_attempts, 0);
        assert_eq!(snapshot.total_reconnects, 2);
        assert!(snapshot.connected_since.is_some());

        monitor.set_state(ConnectionState::Failed);
        assert!(monitor.snapshot().connected_since.is_none());
        assert!(monitor.state().is_terminal());
    }

    #[test]
    fn ping_interval_is_half_the_idle_window() {
        let config = MarketDataClientConfig {
            ws_url: "wss://example.invalid/".into(),
            reconnect: ReconnectConfig::default(),
            idle_timeout: Duration::from_secs(60),
            subscribe_batch: DEFAULT_SUBSCRIBE_BATCH,
        };
        assert_eq!(config.ping_interval(), Duration::from_secs(30));
    }
}
