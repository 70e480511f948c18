//! Subscription Tracking
//!
//! Tracks which broker symbols the session subscribes to and which ones the
//! broker (or the instrument directory) reported as unavailable.
//!
//! # Design
//!
//! - Every broker symbol maps back to exactly one listed raw symbol: when two
//!   raw tickers transform to the same identifier the first one wins.
//! - Unavailable symbols are excluded from later subscription requests but
//!   stay listed so their sheet rows keep their position.

use std::collections::{BTreeMap, HashSet};

use parking_lot::RwLock;
use serde::Serialize;

use super::symbol::{InstrumentSymbol, restore_prefix};

// =============================================================================
// Types
// =============================================================================

/// A symbol the broker will not serve.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UnavailableSymbol {
    /// Broker symbol.
    pub symbol: String,
    /// Reason reported or inferred.
    pub reason: String,
}

#[derive(Debug, Default)]
struct BookState {
    symbols: Vec<InstrumentSymbol>,
    unavailable: BTreeMap<String, String>,
}

// =============================================================================
// Subscription Book
// =============================================================================

/// Listed symbols plus their availability.
#[derive(Debug, Default)]
pub struct SubscriptionBook {
    state: RwLock<BookState>,
}

impl SubscriptionBook {
    /// Build from listed symbols, dropping blanks and duplicate identifiers.
    #[must_use]
    pub fn new(symbols: impl IntoIterator<Item = InstrumentSymbol>) -> Self {
        let mut seen = HashSet::new();
        let mut unique = Vec::new();

        for symbol in symbols {
            if symbol.transformed().is_empty() {
                continue;
            }
            if seen.insert(symbol.transformed().to_string()) {
                unique.push(symbol);
            } else {
                tracing::debug!(
                    raw = symbol.raw(),
                    transformed = symbol.transformed(),
                    "Duplicate symbol ignored"
                );
            }
        }

        Self {
            state: RwLock::new(BookState {
                symbols: unique,
                unavailable: BTreeMap::new(),
            }),
        }
    }

    /// Every listed symbol in listing order.
    #[must_use]
    pub fn symbols(&self) -> Vec<InstrumentSymbol> {
        self.state.read().symbols.clone()
    }

    /// Number of listed symbols.
    #[must_use]
    pub fn len(&self) -> usize {
        self.state.read().symbols.len()
    }

    /// Whether nothing is listed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.state.read().symbols.is_empty()
    }

    /// Broker symbols to request, excluding unavailable ones.
    #[must_use]
    pub fn active(&self) -> Vec<String> {
        let state = self.state.read();
        state
            .symbols
            .iter()
            .map(InstrumentSymbol::transformed)
            .filter(|s| !state.unavailable.contains_key(*s))
            .map(str::to_string)
            .collect()
    }

    /// Whether the symbol is listed.
    #[must_use]
    pub fn contains(&self, symbol: &str) -> bool {
        self.state
            .read()
            .symbols
            .iter()
            .any(|s| s.transformed() == symbol)
    }

    /// Mark a listed symbol unavailable. Accepts the broker symbol or its
    /// display form without the market prefix.
    ///
    /// Returns `true` if the symbol was listed and not already marked.
    pub fn mark_unavailable(&self, symbol: &str, reason: impl Into<String>) -> bool {
        let symbol = restore_prefix(symbol.trim());
        let mut state = self.state.write();
        if !state.symbols.iter().any(|s| s.transformed() == symbol) {
            return false;
        }
        if state.unavailable.contains_key(&symbol) {
            return false;
        }
        state.unavailable.insert(symbol, reason.into());
        true
    }

    /// Find the listed symbol named in a broker error description.
    ///
    /// Prefers the longest match so `GGAL - 24hs` beats `GGAL`.
    #[must_use]
    pub fn find_in(&self, description: &str) -> Option<String> {
        self.state
            .read()
            .symbols
            .iter()
            .map(InstrumentSymbol::transformed)
            .filter(|s| description.contains(*s))
            .max_by_key(|s| s.len())
            .map(str::to_string)
    }

    /// Unavailable symbols with reasons, sorted by symbol.
    #[must_use]
    pub fn unavailable(&self) -> Vec<UnavailableSymbol> {
        self.state
            .read()
            .unavailable
            .iter()
            .map(|(symbol, reason)| UnavailableSymbol {
                symbol: symbol.clone(),
                reason: reason.clone(),
            })
            .collect()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::symbol::InstrumentKind;

    fn book() -> SubscriptionBook {
        SubscriptionBook::new([
            InstrumentSymbol::new("GGAL - 24hs", InstrumentKind::Acciones),
            InstrumentSymbol::new("YPFD - spot", InstrumentKind::Acciones),
            InstrumentSymbol::new("GFGC47566O - 24hs", InstrumentKind::Options),
        ])
    }

    #[test]
    fn duplicates_collapse_to_first() {
        let book = SubscriptionBook::new([
            InstrumentSymbol::new("GGAL - spot", InstrumentKind::Acciones),
            InstrumentSymbol::new("GGAL - CI", InstrumentKind::PanelGeneral),
            InstrumentSymbol::new("", InstrumentKind::Bonos),
        ]);
        assert_eq!(book.len(), 1);
        assert_eq!(book.symbols()[0].raw(), "GGAL - spot");
    }

    #[test]
    fn unavailable_symbols_leave_active_set() {
        let book = book();
        assert_eq!(book.active().len(), 3);

        assert!(book.mark_unavailable("MERV - XMEV - YPFD - CI", "not listed"));
        assert!(!book.mark_unavailable("MERV - XMEV - YPFD - CI", "again"));
        assert!(!book.mark_unavailable("UNKNOWN", "never listed"));

        let active = book.active();
        assert_eq!(active.len(), 2);
        assert!(!active.contains(&"MERV - XMEV - YPFD - CI".to_string()));
        assert_eq!(book.len(), 3);

        let unavailable = book.unavailable();
        assert_eq!(unavailable.len(), 1);
        assert_eq!(unavailable[0].reason, "not listed");
    }

    #[test]
    fn display_symbol_marks_broker_symbol() {
        let book = book();

        assert!(book.mark_unavailable(" GGAL - 24hs ", "halted"));
        assert!(!book.mark_unavailable("MERV - XMEV - GGAL - 24hs", "again"));
        assert!(!book.active().contains(&"MERV - XMEV - GGAL - 24hs".to_string()));
        assert_eq!(book.unavailable()[0].reason, "halted");
    }

    #[test]
    fn finds_symbol_in_description() {
        let book = book();
        let found = book.find_in("Product MERV - XMEV - GFGC47566O - 24hs is not valid");
        assert_eq!(found.as_deref(), Some("MERV - XMEV - GFGC47566O - 24hs"));
        assert_eq!(book.find_in("Unknown error"), None);
    }
}
