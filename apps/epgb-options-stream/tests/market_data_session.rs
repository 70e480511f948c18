//! Market Data Session Integration Tests
//!
//! Runs the market data client against a local WebSocket broker and a mock
//! REST endpoint: authentication header, subscription frames, tick and error
//! forwarding, reconnection and terminal failures.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::accept_hdr_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use epgb_options_stream::domain::market::{ConnectionState, PriceEntry};
use epgb_options_stream::domain::subscription::SubscriptionBook;
use epgb_options_stream::domain::symbol::{InstrumentKind, InstrumentSymbol};
use epgb_options_stream::infrastructure::config::{
    BrokerSettings, Credentials, Profile, ReconnectSettings,
};
use epgb_options_stream::infrastructure::primary::{
    AuthError, ClientError, ConnectionMonitor, MarketDataClient, MarketDataClientConfig,
    MarketDataEvent, PrimaryRestClient,
};

const GGAL: &str = "MERV - XMEV - GGAL - 24hs";
const XXXX: &str = "MERV - XMEV - XXXX - 24hs";

/// What the broker saw on one connection.
#[derive(Debug)]
struct SessionLog {
    token: Option<String>,
    subscription: Value,
}

/// Serve one scripted session per entry. Every session but the last is
/// closed by the broker once its frames are sent.
async fn spawn_broker(sessions: Vec<Vec<String>>) -> (String, mpsc::UnboundedReceiver<SessionLog>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (log_tx, log_rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        let total = sessions.len();
        for (index, frames) in sessions.into_iter().enumerate() {
            let (stream, _) = listener.accept().await.unwrap();

            let mut token = None;
            let callback = |req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
                token = req
                    .headers()
                    .get("X-Auth-Token")
                    .and_then(|v| v.to_str().ok())
                    .map(str::to_string);
                Ok(resp)
            };
            let mut ws = accept_hdr_async(stream, callback).await.unwrap();

            let subscription = loop {
                match ws.next().await {
                    Some(Ok(Message::Text(text))) => {
                        break serde_json::from_str::<Value>(text.as_str()).unwrap();
                    }
                    Some(Ok(_)) => {}
                    other => panic!("expected subscription, got {other:?}"),
                }
            };
            log_tx.send(SessionLog { token, subscription }).unwrap();

            for frame in frames {
                ws.send(Message::Text(frame.into())).await.unwrap();
            }

            if index + 1 < total {
                let _ = ws.close(None).await;
            } else {
                while let Some(Ok(msg)) = ws.next().await {
                    if msg.is_close() {
                        break;
                    }
                }
            }
        }
    });

    (format!("ws://{addr}/"), log_rx)
}

async fn mock_auth(status: u16) -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/auth/getToken"))
        .respond_with(ResponseTemplate::new(status).insert_header("X-Auth-Token", "tok-123"))
        .mount(&server)
        .await;
    server
}

fn market_data(symbol: &str, bid: f64, ask: f64, last: f64) -> String {
    json!({
        "type": "Md",
        "timestamp": 1_717_171_717_123_i64,
        "instrumentId": {"marketId": "ROFX", "symbol": symbol},
        "marketData": {
            "BI": [{"price": bid, "size": 100}],
            "OF": [{"price": ask, "size": 50}],
            "LA": {"price": last, "size": 5, "date": 1_717_171_717_000_i64},
            "CL": {"price": 1490.0},
            "NV": 8000
        }
    })
    .to_string()
}

struct Harness {
    client: Arc<MarketDataClient>,
    monitor: Arc<ConnectionMonitor>,
    events: mpsc::Receiver<MarketDataEvent>,
    cancel: CancellationToken,
}

fn harness(
    rest: &MockServer,
    ws_url: String,
    book: Arc<SubscriptionBook>,
    max_attempts: u32,
) -> Harness {
    let broker = BrokerSettings {
        profile: Profile::Remarket,
        api_url: format!("{}/", rest.uri()),
        ws_url,
        credentials: Credentials::new("trader".into(), "secret".into(), "REM1234".into()),
    };
    let reconnect = ReconnectSettings {
        delays: vec![Duration::from_millis(20)],
        max_attempts,
        idle_timeout: Duration::from_secs(30),
    };

    let monitor = Arc::new(ConnectionMonitor::new());
    let (event_tx, events) = mpsc::channel(64);
    let cancel = CancellationToken::new();
    let client = Arc::new(MarketDataClient::new(
        MarketDataClientConfig::from_settings(&broker, &reconnect),
        Arc::new(PrimaryRestClient::new(&broker).unwrap()),
        book,
        Arc::clone(&monitor),
        event_tx,
        cancel.clone(),
    ));

    Harness {
        client,
        monitor,
        events,
        cancel,
    }
}

fn book() -> Arc<SubscriptionBook> {
    Arc::new(SubscriptionBook::new([
        InstrumentSymbol::new("GGAL", InstrumentKind::Acciones),
        InstrumentSymbol::new("XXXX", InstrumentKind::Acciones),
    ]))
}

async fn next_event(events: &mut mpsc::Receiver<MarketDataEvent>) -> MarketDataEvent {
    timeout(Duration::from_secs(5), events.recv())
        .await
        .expect("event should arrive in time")
        .expect("event channel should be open")
}

fn subscribed_symbols(subscription: &Value) -> Vec<String> {
    subscription["products"]
        .as_array()
        .unwrap()
        .iter()
        .map(|p| p["symbol"].as_str().unwrap().to_string())
        .collect()
}

#[tokio::test]
async fn session_subscribes_and_forwards_ticks() {
    let rest = mock_auth(200).await;
    let (ws_url, mut sessions) = spawn_broker(vec![vec![
        market_data(GGAL, 1520.5, 1522.0, 1521.0),
        json!({"status": "ERROR", "description": format!("Instrument {XXXX} not found")})
            .to_string(),
    ]])
    .await;

    let mut h = harness(&rest, ws_url, book(), 0);
    let task = tokio::spawn(Arc::clone(&h.client).run());

    assert!(matches!(
        next_event(&mut h.events).await,
        MarketDataEvent::Connected { subscribed: 2 }
    ));

    let session = sessions.recv().await.unwrap();
    assert_eq!(session.token.as_deref(), Some("tok-123"));
    assert_eq!(session.subscription["type"], "smd");
    assert_eq!(session.subscription["level"], 1);
    assert_eq!(session.subscription["products"][0]["marketId"], "ROFX");
    assert_eq!(subscribed_symbols(&session.subscription), vec![GGAL, XXXX]);

    match next_event(&mut h.events).await {
        MarketDataEvent::Tick(tick) => {
            assert_eq!(tick.symbol, GGAL);
            assert_eq!(tick.bid, PriceEntry::Price("1520.5".parse().unwrap()));
            assert_eq!(tick.last, PriceEntry::Price("1521".parse().unwrap()));
        }
        other => panic!("expected tick, got {other:?}"),
    }

    match next_event(&mut h.events).await {
        MarketDataEvent::SymbolRejected { symbol, reason } => {
            assert_eq!(symbol, XXXX);
            assert!(reason.contains("not found"));
        }
        other => panic!("expected rejection, got {other:?}"),
    }

    assert!(h.monitor.is_connected());
    assert_eq!(h.monitor.snapshot().messages_received, 2);

    h.cancel.cancel();
    task.await.unwrap().unwrap();
    assert_eq!(h.monitor.state(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn dropped_session_is_resubscribed_without_unavailable_symbols() {
    let rest = mock_auth(200).await;
    let (ws_url, mut sessions) =
        spawn_broker(vec![vec![], vec![market_data(GGAL, 10.0, 11.0, 10.5)]]).await;

    let book = book();
    assert!(book.mark_unavailable(XXXX, "not listed by broker"));

    let mut h = harness(&rest, ws_url, book, 0);
    let task = tokio::spawn(Arc::clone(&h.client).run());

    let mut connects = 0;
    let mut reconnect_attempts = Vec::new();
    loop {
        match next_event(&mut h.events).await {
            MarketDataEvent::Connected { subscribed } => {
                assert_eq!(subscribed, 1);
                connects += 1;
            }
            MarketDataEvent::Reconnecting { attempt, delay } => {
                assert_eq!(delay, Duration::from_millis(20));
                reconnect_attempts.push(attempt);
            }
            MarketDataEvent::Tick(tick) => {
                assert_eq!(tick.symbol, GGAL);
                break;
            }
            _ => {}
        }
    }

    assert_eq!(connects, 2);
    assert_eq!(reconnect_attempts, vec![1]);
    for _ in 0..2 {
        let session = sessions.recv().await.unwrap();
        assert_eq!(subscribed_symbols(&session.subscription), vec![GGAL]);
    }

    // A successful session resets the consecutive attempt counter
    let snapshot = h.monitor.snapshot();
    assert_eq!(snapshot.reconnect_attempts, 0);
    assert_eq!(snapshot.total_reconnects, 1);

    h.cancel.cancel();
    task.await.unwrap().unwrap();
}

#[tokio::test]
async fn rejected_credentials_stop_the_client() {
    let rest = mock_auth(401).await;
    let mut h = harness(&rest, "ws://127.0.0.1:1/".into(), book(), 0);

    let err = Arc::clone(&h.client).run().await.unwrap_err();

    assert!(matches!(
        err,
        ClientError::Auth(AuthError::InvalidCredentials { status: 401 })
    ));
    assert!(err.is_terminal());
    assert_eq!(h.monitor.state(), ConnectionState::Failed);
    assert!(matches!(
        next_event(&mut h.events).await,
        MarketDataEvent::AuthenticationFailed(_)
    ));
}

#[tokio::test]
async fn reconnect_budget_is_enforced() {
    let rest = mock_auth(200).await;

    // Reserve a port and release it so connections are refused
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let mut h = harness(&rest, format!("ws://{addr}/"), book(), 2);
    let err = Arc::clone(&h.client).run().await.unwrap_err();

    assert!(matches!(err, ClientError::MaxReconnectAttemptsExceeded(2)));
    assert_eq!(h.monitor.state(), ConnectionState::Failed);

    let mut attempts = Vec::new();
    while let Ok(event) = h.events.try_recv() {
        if let MarketDataEvent::Reconnecting { attempt, .. } = event {
            attempts.push(attempt);
        }
    }
    assert_eq!(attempts, vec![1, 2]);
}
