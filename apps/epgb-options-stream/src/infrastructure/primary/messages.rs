//! Primary API Message Types
//!
//! Wire format types for the Primary (Matba Rofex) REST and WebSocket APIs.
//!
//! # Message Types
//!
//! ## Outbound (WebSocket)
//! - `SubscribeRequest`: market data subscription (`"type": "smd"`)
//!
//! ## Inbound (WebSocket)
//! - `MarketDataMessage`: market data push (`"type": "Md"`)
//! - `ErrorMessage`: rejected request (`"status": "ERROR"`)
//!
//! ## REST
//! - `InstrumentsResponse`: `GET rest/instruments/all`

use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serialize};

/// Market identifier used for every product on the primary market.
pub const MARKET_ID: &str = "ROFX";

/// Entry codes requested on every subscription.
///
/// | Code | Meaning |
/// |------|---------|
/// | `BI` | Bids (book levels) |
/// | `OF` | Offers (book levels) |
/// | `LA` | Last trade |
/// | `OP` | Opening price |
/// | `CL` | Previous close |
/// | `HI` | Session high |
/// | `LO` | Session low |
/// | `EV` | Effective traded volume (turnover) |
/// | `NV` | Nominal volume |
/// | `TC` | Trade count |
pub const SUBSCRIBED_ENTRIES: [&str; 10] = ["BI", "OF", "LA", "OP", "CL", "HI", "LO", "EV", "NV", "TC"];

// =============================================================================
// Shared
// =============================================================================

/// Instrument reference.
///
/// # Wire Format (JSON)
/// ```json
/// {"marketId": "ROFX", "symbol": "MERV - XMEV - GGAL - 24hs"}
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstrumentId {
    /// Market identifier.
    pub market_id: String,
    /// Broker symbol.
    pub symbol: String,
}

impl InstrumentId {
    /// Reference a symbol on the primary market.
    #[must_use]
    pub fn primary(symbol: impl Into<String>) -> Self {
        Self {
            market_id: MARKET_ID.to_string(),
            symbol: symbol.into(),
        }
    }
}

/// Error response, shared by the REST and WebSocket APIs.
///
/// # Wire Format (JSON)
/// ```json
/// {"status": "ERROR", "description": "Instrument MERV - XMEV - XXXX - 24hs not found"}
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorMessage {
    /// Always "ERROR".
    pub status: String,
    /// Human readable reason.
    #[serde(default)]
    pub description: Option<String>,
    /// Some endpoints use `message` instead of `description`.
    #[serde(default)]
    pub message: Option<String>,
}

impl ErrorMessage {
    /// Best available reason text.
    #[must_use]
    pub fn reason(&self) -> &str {
        self.description
            .as_deref()
            .or(self.message.as_deref())
            .unwrap_or("unspecified error")
    }
}

// =============================================================================
// Subscription
// =============================================================================

/// Market data subscription request.
///
/// # Wire Format (JSON)
/// ```json
/// {"type": "smd", "level": 1, "entries": ["BI", "OF", "LA"],
///  "products": [{"symbol": "MERV - XMEV - GGAL - 24hs", "marketId": "ROFX"}], "depth": 1}
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubscribeRequest {
    /// Always "smd".
    #[serde(rename = "type")]
    pub msg_type: &'static str,
    /// Subscription level.
    pub level: u8,
    /// Entry codes.
    pub entries: &'static [&'static str],
    /// Products to subscribe.
    pub products: Vec<InstrumentId>,
    /// Book depth.
    pub depth: u8,
}

impl SubscribeRequest {
    /// Top-of-book subscription for the given broker symbols.
    #[must_use]
    pub fn market_data<S: AsRef<str>>(symbols: &[S]) -> Self {
        Self {
            msg_type: "smd",
            level: 1,
            entries: &SUBSCRIBED_ENTRIES,
            products: symbols
                .iter()
                .map(|s| InstrumentId::primary(s.as_ref()))
                .collect(),
            depth: 1,
        }
    }
}

// =============================================================================
// Market Data
// =============================================================================

/// A market data entry that distinguishes an absent key from an explicit
/// `null`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Entry<T> {
    /// Key not present in the message.
    Absent,
    /// Key present with `null`.
    Empty,
    /// Key present with a value.
    Value(T),
}

impl<T> Default for Entry<T> {
    fn default() -> Self {
        Self::Absent
    }
}

impl<'de, T: Deserialize<'de>> Deserialize<'de> for Entry<T> {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(Option::<T>::deserialize(deserializer)?.map_or(Self::Empty, Self::Value))
    }
}

/// One book level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
pub struct BookLevel {
    /// Level price.
    #[serde(default)]
    pub price: Option<Decimal>,
    /// Level size.
    #[serde(default)]
    pub size: Option<Decimal>,
}

/// Last trade.
///
/// # Wire Format (JSON)
/// ```json
/// {"price": 1520.5, "size": 100, "date": 1717171717000}
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
pub struct LastTrade {
    /// Trade price.
    #[serde(default)]
    pub price: Option<Decimal>,
    /// Trade size.
    #[serde(default)]
    pub size: Option<Decimal>,
    /// Trade time (ms since epoch).
    #[serde(default)]
    pub date: Option<i64>,
}

/// A single price that the feed sends either bare or wrapped.
///
/// # Wire Format (JSON)
/// ```json
/// 1490.0
/// {"price": 1490.0, "size": null, "date": 1717171717000}
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum PriceValue {
    /// Bare number.
    Number(Decimal),
    /// Object with a `price` key.
    Wrapped {
        /// Price.
        #[serde(default)]
        price: Option<Decimal>,
    },
}

impl PriceValue {
    /// The price, if any.
    #[must_use]
    pub const fn price(self) -> Option<Decimal> {
        match self {
            Self::Number(price) => Some(price),
            Self::Wrapped { price } => price,
        }
    }
}

/// Market data entries keyed by entry code.
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
pub struct MarketDataEntries {
    /// Bids.
    #[serde(rename = "BI", default)]
    pub bids: Entry<Vec<BookLevel>>,
    /// Offers.
    #[serde(rename = "OF", default)]
    pub offers: Entry<Vec<BookLevel>>,
    /// Last trade.
    #[serde(rename = "LA", default)]
    pub last: Entry<LastTrade>,
    /// Opening price.
    #[serde(rename = "OP", default)]
    pub open: Option<PriceValue>,
    /// Previous close.
    #[serde(rename = "CL", default)]
    pub close: Option<PriceValue>,
    /// Session high.
    #[serde(rename = "HI", default)]
    pub high: Option<PriceValue>,
    /// Session low.
    #[serde(rename = "LO", default)]
    pub low: Option<PriceValue>,
    /// Effective traded volume.
    #[serde(rename = "EV", default)]
    pub effective_volume: Option<Decimal>,
    /// Nominal volume.
    #[serde(rename = "NV", default)]
    pub nominal_volume: Option<Decimal>,
    /// Trade count.
    #[serde(rename = "TC", default)]
    pub trade_count: Option<Decimal>,
}

/// Market data push.
///
/// # Wire Format (JSON)
/// ```json
/// {"type": "Md", "timestamp": 1717171717123,
///  "instrumentId": {"marketId": "ROFX", "symbol": "MERV - XMEV - GGAL - 24hs"},
///  "marketData": {"BI": [{"price": 1520, "size": 300}], "OF": [], "LA": null}}
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarketDataMessage {
    /// Always "Md".
    #[serde(rename = "type")]
    pub msg_type: String,
    /// Exchange timestamp (ms since epoch).
    #[serde(default)]
    pub timestamp: Option<i64>,
    /// Instrument the data belongs to.
    pub instrument_id: InstrumentId,
    /// Entries.
    #[serde(default)]
    pub market_data: MarketDataEntries,
}

// =============================================================================
// REST
// =============================================================================

/// One row of the instrument listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstrumentSummary {
    /// Instrument reference.
    pub instrument_id: InstrumentId,
    /// ISO 10962 classification code, when reported.
    #[serde(default)]
    pub cficode: Option<String>,
}

/// Response of `GET rest/instruments/all`.
///
/// # Wire Format (JSON)
/// ```json
/// {"status": "OK", "instruments": [{"instrumentId": {"marketId": "ROFX", "symbol": "..."}, "cficode": "ESXXXX"}]}
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstrumentsResponse {
    /// "OK" or "ERROR".
    pub status: String,
    /// Listed instruments.
    #[serde(default)]
    pub instruments: Vec<InstrumentSummary>,
    /// Failure reason when `status` is "ERROR".
    #[serde(default)]
    pub description: Option<String>,
}
