//! Port Interfaces
//!
//! Contracts between the application services and the infrastructure
//! adapters, following the Hexagonal Architecture pattern.
//!
//! ## Driven Ports (Outbound)
//!
//! - [`SheetSink`]: bulk destination for the rendered workbook ranges
//! - [`InstrumentDirectory`]: list of instruments the broker currently serves

use std::collections::HashSet;

use async_trait::async_trait;

use crate::domain::symbol::InstrumentKind;

// =============================================================================
// Sheet Payload
// =============================================================================

/// A single cell value.
#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    /// Blank cell.
    Empty,
    /// Text.
    Text(String),
    /// Number.
    Number(f64),
}

impl Cell {
    /// Text cell from anything string-like.
    #[must_use]
    pub fn text(value: impl Into<String>) -> Self {
        Self::Text(value.into())
    }

    /// Number cell, blank when `None`.
    #[must_use]
    pub fn number(value: Option<f64>) -> Self {
        value.map_or(Self::Empty, Self::Number)
    }
}

/// A rectangular block anchored at a fixed cell: header row plus data rows.
#[derive(Debug, Clone, PartialEq)]
pub struct SheetRange {
    /// Defined name covering the block.
    pub name: &'static str,
    /// Zero-based anchor row.
    pub first_row: u32,
    /// Zero-based anchor column.
    pub first_col: u16,
    /// Header labels.
    pub header: &'static [&'static str],
    /// Data rows, each `header.len()` cells wide.
    pub rows: Vec<Vec<Cell>>,
}

impl SheetRange {
    /// Rows including the header.
    #[must_use]
    pub fn height(&self) -> u32 {
        u32::try_from(self.rows.len()).map_or(u32::MAX, |n| n.saturating_add(1))
    }

    /// Columns.
    #[must_use]
    pub fn width(&self) -> u16 {
        u16::try_from(self.header.len()).unwrap_or(u16::MAX)
    }
}

/// Raw symbols listed under one instrument class.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TickerColumn {
    /// Instrument class.
    pub kind: InstrumentKind,
    /// Raw symbols in listing order.
    pub symbols: Vec<String>,
}

/// Everything written in one flush.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkbookSnapshot {
    /// Main quote board.
    pub market_data: SheetRange,
    /// Repo rates side table on the same sheet.
    pub cauciones: SheetRange,
    /// Mirror of the listed raw symbols.
    pub tickers: Vec<TickerColumn>,
}

// =============================================================================
// Sheet Sink
// =============================================================================

/// Errors reported by a sheet sink.
#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    /// The target is locked or closed; retry next cycle.
    #[error("spreadsheet unavailable: {0}")]
    Unavailable(String),

    /// The workbook could not be produced.
    #[error("spreadsheet write failed: {0}")]
    Write(String),

    /// Filesystem error.
    #[error("spreadsheet I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Destination for bulk workbook writes.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SheetSink: Send + Sync {
    /// Check whether the target can be written right now.
    ///
    /// # Errors
    ///
    /// Returns [`SinkError::Unavailable`] when the target is locked or closed.
    async fn check_available(&self) -> Result<(), SinkError>;

    /// Write every range in one operation.
    ///
    /// # Errors
    ///
    /// Returns [`SinkError`] if the write fails; nothing is partially applied.
    async fn write(&self, snapshot: &WorkbookSnapshot) -> Result<(), SinkError>;
}

// =============================================================================
// Instrument Directory
// =============================================================================

/// Errors reported by an instrument directory.
#[derive(Debug, thiserror::Error)]
#[error("instrument directory unavailable: {0}")]
pub struct DirectoryError(pub String);

/// Source of the symbols the broker currently lists.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait InstrumentDirectory: Send + Sync {
    /// Every broker symbol currently listed.
    ///
    /// # Errors
    ///
    /// Returns [`DirectoryError`] if no fresh or cached list can be produced.
    async fn listed_symbols(&self) -> Result<HashSet<String>, DirectoryError>;
}
