//! Symbol Table
//!
//! Latest tick per broker symbol, shared between the feed handler (writer)
//! and the flush service (reader). A single exclusive lock guards both the
//! upsert and the snapshot, so a flush never observes a half-written row.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use serde::Serialize;

use super::market::{MarketTick, TickRejection, TickUpdate};

/// Shared last-write-wins tick store.
#[derive(Debug, Default)]
pub struct SymbolTable {
    ticks: Mutex<HashMap<String, MarketTick>>,
    accepted: AtomicU64,
    rejected: AtomicU64,
}

/// Table counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct TableStats {
    /// Symbols with a current tick.
    pub symbols: usize,
    /// Ticks stored since startup.
    pub accepted: u64,
    /// Ticks dropped by validation since startup.
    pub rejected: u64,
}

impl SymbolTable {
    /// Create an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate a decoded tick and store it, replacing any previous tick for
    /// the same symbol.
    ///
    /// # Errors
    ///
    /// Returns the [`TickRejection`] when validation fails; the table is left
    /// untouched.
    pub fn apply(&self, update: TickUpdate) -> Result<(), TickRejection> {
        match update.validate() {
            Ok(tick) => {
                self.upsert(tick);
                Ok(())
            }
            Err(rejection) => {
                self.rejected.fetch_add(1, Ordering::Relaxed);
                Err(rejection)
            }
        }
    }

    /// Store an already validated tick.
    pub fn upsert(&self, tick: MarketTick) {
        self.ticks.lock().insert(tick.symbol.clone(), tick);
        self.accepted.fetch_add(1, Ordering::Relaxed);
    }

    /// Current tick for a symbol.
    #[must_use]
    pub fn get(&self, symbol: &str) -> Option<MarketTick> {
        self.ticks.lock().get(symbol).cloned()
    }

    /// Consistent copy of every current tick.
    #[must_use]
    pub fn snapshot(&self) -> HashMap<String, MarketTick> {
        self.ticks.lock().clone()
    }

    /// Number of symbols with a tick.
    #[must_use]
    pub fn len(&self) -> usize {
        self.ticks.lock().len()
    }

    /// Whether no tick has been stored yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ticks.lock().is_empty()
    }

    /// Current counters.
    #[must_use]
    pub fn stats(&self) -> TableStats {
        TableStats {
            symbols: self.len(),
            accepted: self.accepted.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
        }
    }
}
