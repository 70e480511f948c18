//! Market Data Types
//!
//! Codec-agnostic tick types. A [`TickUpdate`] is what the feed decoded;
//! [`TickUpdate::validate`] turns it into a [`MarketTick`] or a
//! [`TickRejection`] explaining why it was dropped.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;

// =============================================================================
// Connection State
// =============================================================================

/// Market-data session state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// No session and no attempt in progress.
    #[default]
    Disconnected,
    /// Authenticating or opening the WebSocket.
    Connecting,
    /// Subscribed and receiving data.
    Connected,
    /// Terminal: credentials rejected or reconnect budget exhausted.
    Failed,
}

impl ConnectionState {
    /// State name for logs and the status endpoint.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Failed => "failed",
        }
    }

    /// Whether no further transition is expected.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Failed)
    }
}

// =============================================================================
// Tick Update (decoded, unvalidated)
// =============================================================================

/// A price entry as reported by the feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PriceEntry {
    /// The entry was not in the message.
    #[default]
    Missing,
    /// The entry was present but carried no level (empty book side, no trades).
    NoLevel,
    /// A price.
    Price(Decimal),
}

impl PriceEntry {
    const fn value(self) -> Option<Decimal> {
        match self {
            Self::Price(price) => Some(price),
            Self::Missing | Self::NoLevel => None,
        }
    }
}

/// Optional session fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct ExtendedFields {
    /// Opening price.
    pub open: Option<Decimal>,
    /// Session high.
    pub high: Option<Decimal>,
    /// Session low.
    pub low: Option<Decimal>,
    /// Previous session close.
    pub previous_close: Option<Decimal>,
    /// Traded amount.
    pub turnover: Option<Decimal>,
    /// Number of trades.
    pub operations: Option<u64>,
}

/// A decoded tick before validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TickUpdate {
    /// Broker symbol.
    pub symbol: String,
    /// Best bid.
    pub bid: PriceEntry,
    /// Best offer.
    pub ask: PriceEntry,
    /// Last trade.
    pub last: PriceEntry,
    /// Size at best bid.
    pub bid_size: Option<Decimal>,
    /// Size at best offer.
    pub ask_size: Option<Decimal>,
    /// Session volume.
    pub volume: Option<Decimal>,
    /// Exchange timestamp.
    pub timestamp: DateTime<Utc>,
    /// Optional session fields.
    pub extended: ExtendedFields,
}

/// Why a tick was dropped.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TickRejection {
    /// Symbol was empty.
    #[error("tick has an empty symbol")]
    EmptySymbol,

    /// A required price entry was absent.
    #[error("{symbol}: missing {field}")]
    MissingPrice {
        /// Symbol of the tick.
        symbol: String,
        /// Price field name.
        field: &'static str,
    },

    /// A price or size was negative.
    #[error("{symbol}: negative {field} ({value})")]
    Negative {
        /// Symbol of the tick.
        symbol: String,
        /// Field name.
        field: &'static str,
        /// Offending value.
        value: Decimal,
    },
}

impl TickRejection {
    /// Short reason label for metrics.
    #[must_use]
    pub const fn reason(&self) -> &'static str {
        match self {
            Self::EmptySymbol => "empty_symbol",
            Self::MissingPrice { .. } => "missing_price",
            Self::Negative { .. } => "negative_value",
        }
    }
}

impl TickUpdate {
    /// Check the tick and produce the stored snapshot.
    ///
    /// # Errors
    ///
    /// Returns [`TickRejection`] if the symbol is empty, bid/ask/last is
    /// missing, or any price, size or volume is negative.
    pub fn validate(self) -> Result<MarketTick, TickRejection> {
        if self.symbol.trim().is_empty() {
            return Err(TickRejection::EmptySymbol);
        }

        for (field, entry) in [("bid", self.bid), ("ask", self.ask), ("last", self.last)] {
            match entry {
                PriceEntry::Missing => {
                    return Err(TickRejection::MissingPrice {
                        symbol: self.symbol,
                        field,
                    });
                }
                PriceEntry::Price(value) if value < Decimal::ZERO => {
                    return Err(TickRejection::Negative {
                        symbol: self.symbol,
                        field,
                        value,
                    });
                }
                PriceEntry::NoLevel | PriceEntry::Price(_) => {}
            }
        }

        let quantities = [
            ("bid_size", self.bid_size),
            ("ask_size", self.ask_size),
            ("volume", self.volume),
            ("open", self.extended.open),
            ("high", self.extended.high),
            ("low", self.extended.low),
            ("previous_close", self.extended.previous_close),
            ("turnover", self.extended.turnover),
        ];
        if let Some((field, value)) = quantities
            .into_iter()
            .find_map(|(field, value)| value.filter(|v| v < &Decimal::ZERO).map(|v| (field, v)))
        {
            return Err(TickRejection::Negative {
                symbol: self.symbol,
                field,
                value,
            });
        }

        Ok(MarketTick {
            bid: self.bid.value(),
            ask: self.ask.value(),
            last: self.last.value(),
            symbol: self.symbol,
            bid_size: self.bid_size,
            ask_size: self.ask_size,
            volume: self.volume,
            timestamp: self.timestamp,
            extended: self.extended,
        })
    }
}

// =============================================================================
// Market Tick (validated)
// =============================================================================

/// Latest validated snapshot for a symbol.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MarketTick {
    /// Broker symbol.
    pub symbol: String,
    /// Best bid, `None` when the book side is empty.
    pub bid: Option<Decimal>,
    /// Best offer, `None` when the book side is empty.
    pub ask: Option<Decimal>,
    /// Last trade, `None` before the first trade.
    pub last: Option<Decimal>,
    /// Size at best bid.
    pub bid_size: Option<Decimal>,
    /// Size at best offer.
    pub ask_size: Option<Decimal>,
    /// Session volume.
    pub volume: Option<Decimal>,
    /// Exchange timestamp.
    pub timestamp: DateTime<Utc>,
    /// Optional session fields.
    pub extended: ExtendedFields,
}

impl MarketTick {
    /// Session change as a fraction: `last / previous_close - 1`.
    #[must_use]
    pub fn change(&self) -> Option<Decimal> {
        let last = self.last?;
        let previous = self.extended.previous_close.filter(|p| !p.is_zero())?;
        last.checked_div(previous).map(|ratio| ratio - Decimal::ONE)
    }
}
