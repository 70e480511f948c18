//! Primary Stream Codec
//!
//! Decodes WebSocket text frames into [`PrimaryMessage`] values, encodes
//! subscription requests, and maps market data pushes onto the
//! codec-agnostic [`TickUpdate`].
//!
//! Price entries keep the difference between a key the broker never sent
//! and a key sent without a level:
//!
//! | Wire | [`PriceEntry`] |
//! |------|----------------|
//! | key absent | `Missing` |
//! | `null`, `[]`, `{}` | `NoLevel` |
//! | `[{"price": p}]`, `{"price": p}` | `Price(p)` |

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;

use crate::domain::market::{ExtendedFields, PriceEntry, TickUpdate};
use crate::infrastructure::primary::messages::{
    BookLevel, Entry, ErrorMessage, LastTrade, MarketDataMessage, PriceValue, SubscribeRequest,
};

/// Default number of products per subscription frame.
pub const DEFAULT_SUBSCRIBE_BATCH: usize = 50;

/// Codec errors.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// JSON encoding/decoding failed.
    #[error("JSON codec error: {0}")]
    Json(#[from] serde_json::Error),

    /// Frame was not a JSON object.
    #[error("invalid message format: {0}")]
    InvalidFormat(String),
}

/// A decoded inbound frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PrimaryMessage {
    /// Market data push.
    MarketData(Box<MarketDataMessage>),
    /// Error report.
    Error(ErrorMessage),
    /// Any other message type, kept by name for logging.
    Other(String),
}

/// JSON codec for the Primary market data stream.
#[derive(Debug, Clone, Copy, Default)]
pub struct PrimaryCodec;

impl PrimaryCodec {
    /// Create a new codec.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Decode a text frame.
    ///
    /// # Errors
    ///
    /// Returns an error if the frame is not a JSON object or a market data
    /// push does not match its schema.
    pub fn decode(&self, text: &str) -> Result<PrimaryMessage, CodecError> {
        let value: serde_json::Value = serde_json::from_str(text.trim())?;
        let Some(object) = value.as_object() else {
            return Err(CodecError::InvalidFormat(format!(
                "expected object, got {}",
                json_kind(&value)
            )));
        };

        if object
            .get("status")
            .and_then(serde_json::Value::as_str)
            .is_some_and(|s| s.eq_ignore_ascii_case("error"))
        {
            return Ok(PrimaryMessage::Error(serde_json::from_value(value)?));
        }

        match object.get("type").and_then(serde_json::Value::as_str) {
            Some(t) if t.eq_ignore_ascii_case("md") => Ok(PrimaryMessage::MarketData(Box::new(
                serde_json::from_value(value)?,
            ))),
            Some(t) => Ok(PrimaryMessage::Other(t.to_string())),
            None => Ok(PrimaryMessage::Other(String::from("unknown"))),
        }
    }

    /// Encode subscription frames, `batch_size` products each.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn encode_subscriptions<S: AsRef<str>>(
        &self,
        symbols: &[S],
        batch_size: usize,
    ) -> Result<Vec<String>, CodecError> {
        symbols
            .chunks(batch_size.max(1))
            .map(|chunk| {
                serde_json::to_string(&SubscribeRequest::market_data(chunk)).map_err(CodecError::from)
            })
            .collect()
    }

    /// Map a market data push onto a [`TickUpdate`].
    ///
    /// `received_at` is used when the message carries no usable timestamp.
    #[must_use]
    pub fn to_tick_update(&self, msg: MarketDataMessage, received_at: DateTime<Utc>) -> TickUpdate {
        let data = msg.market_data;
        let timestamp = msg
            .timestamp
            .and_then(DateTime::<Utc>::from_timestamp_millis)
            .unwrap_or(received_at);

        let best_bid = top_level(&data.bids);
        let best_offer = top_level(&data.offers);

        TickUpdate {
            symbol: msg.instrument_id.symbol,
            bid: book_price(&data.bids),
            ask: book_price(&data.offers),
            last: last_price(&data.last),
            bid_size: best_bid.and_then(|l| l.size),
            ask_size: best_offer.and_then(|l| l.size),
            volume: data.nominal_volume,
            timestamp,
            extended: ExtendedFields {
                open: data.open.and_then(PriceValue::price),
                high: data.high.and_then(PriceValue::price),
                low: data.low.and_then(PriceValue::price),
                previous_close: data.close.and_then(PriceValue::price),
                turnover: data.effective_volume,
                operations: data.trade_count.as_ref().and_then(Decimal::to_u64),
            },
        }
    }
}

fn top_level(entry: &Entry<Vec<BookLevel>>) -> Option<BookLevel> {
    match entry {
        Entry::Value(levels) => levels.first().copied(),
        Entry::Absent | Entry::Empty => None,
    }
}

fn book_price(entry: &Entry<Vec<BookLevel>>) -> PriceEntry {
    match entry {
        Entry::Absent => PriceEntry::Missing,
        Entry::Empty => PriceEntry::NoLevel,
        Entry::Value(_) => top_level(entry)
            .and_then(|l| l.price)
            .map_or(PriceEntry::NoLevel, PriceEntry::Price),
    }
}

fn last_price(entry: &Entry<LastTrade>) -> PriceEntry {
    match entry {
        Entry::Absent => PriceEntry::Missing,
        Entry::Empty => PriceEntry::NoLevel,
        Entry::Value(trade) => trade.price.map_or(PriceEntry::NoLevel, PriceEntry::Price),
    }
}

const fn json_kind(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "bool",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}
