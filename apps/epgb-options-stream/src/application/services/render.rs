//! Workbook Rendering
//!
//! Turns a table snapshot into the fixed ranges written on every flush.
//!
//! # Layout
//!
//! ```text
//!      A       B..O                                   R      S            T     U
//!  1   symbol  bid_size bid ask ... operations datetime   plazo  vencimiento  tasa  monto
//!  2   GGAL - 24hs ...                                     3D     2026-10-22   ...
//! ```
//!
//! One row per listed symbol, in listing order, whether or not a tick has
//! arrived yet. Rows without a tick show only the symbol.

use std::collections::HashMap;

use chrono::{Duration, Local};
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;

use crate::application::ports::{Cell, SheetRange, TickerColumn, WorkbookSnapshot};
use crate::domain::market::MarketTick;
use crate::domain::symbol::{InstrumentKind, InstrumentSymbol};

/// Defined name of the quote board.
pub const MARKET_DATA_RANGE: &str = "MarketData";

/// Defined name of the repo side table.
pub const CAUCIONES_RANGE: &str = "Cauciones";

/// Quote board header, columns `A:O`.
pub const MARKET_DATA_HEADER: &[&str] = &[
    "symbol",
    "bid_size",
    "bid",
    "ask",
    "ask_size",
    "last",
    "change",
    "open",
    "high",
    "low",
    "previous_close",
    "turnover",
    "volume",
    "operations",
    "datetime",
];

/// Repo side table header, columns `R:U`.
pub const CAUCIONES_HEADER: &[&str] = &["plazo", "vencimiento", "tasa", "monto"];

/// Zero-based column of the repo side table (`R`).
pub const CAUCIONES_FIRST_COL: u16 = 17;

const DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

fn num(value: Option<Decimal>) -> Cell {
    Cell::number(value.and_then(|v| v.to_f64()))
}

/// Render the full workbook payload.
#[must_use]
pub fn render(
    symbols: &[InstrumentSymbol],
    ticks: &HashMap<String, MarketTick>,
) -> WorkbookSnapshot {
    let market_rows = symbols
        .iter()
        .map(|symbol| market_row(symbol, ticks.get(symbol.transformed())))
        .collect();

    let cauciones_rows = symbols
        .iter()
        .filter(|s| s.kind() == InstrumentKind::Cauciones)
        .map(|symbol| caucion_row(symbol, ticks.get(symbol.transformed())))
        .collect();

    WorkbookSnapshot {
        market_data: SheetRange {
            name: MARKET_DATA_RANGE,
            first_row: 0,
            first_col: 0,
            header: MARKET_DATA_HEADER,
            rows: market_rows,
        },
        cauciones: SheetRange {
            name: CAUCIONES_RANGE,
            first_row: 0,
            first_col: CAUCIONES_FIRST_COL,
            header: CAUCIONES_HEADER,
            rows: cauciones_rows,
        },
        tickers: ticker_columns(symbols),
    }
}

fn market_row(symbol: &InstrumentSymbol, tick: Option<&MarketTick>) -> Vec<Cell> {
    let mut row = Vec::with_capacity(MARKET_DATA_HEADER.len());
    row.push(Cell::text(symbol.display()));

    let Some(tick) = tick else {
        row.resize(MARKET_DATA_HEADER.len(), Cell::Empty);
        return row;
    };

    let ext = &tick.extended;
    row.extend([
        num(tick.bid_size),
        num(tick.bid),
        num(tick.ask),
        num(tick.ask_size),
        num(tick.last),
        num(tick.change()),
        num(ext.open),
        num(ext.high),
        num(ext.low),
        num(ext.previous_close),
        num(ext.turnover),
        num(tick.volume),
        Cell::number(ext.operations.and_then(|n| n.to_f64())),
        Cell::text(
            tick.timestamp
                .with_timezone(&Local)
                .format(DATETIME_FORMAT)
                .to_string(),
        ),
    ]);
    row
}

/// Repo term in days from a symbol like `MERV - XMEV - PESOS - 3D`.
fn term_days(symbol: &InstrumentSymbol) -> Option<i64> {
    symbol
        .transformed()
        .rsplit(" - ")
        .next()
        .and_then(|term| term.strip_suffix('D'))
        .and_then(|days| days.parse().ok())
}

fn caucion_row(symbol: &InstrumentSymbol, tick: Option<&MarketTick>) -> Vec<Cell> {
    let days = term_days(symbol);
    let plazo = days.map_or_else(|| Cell::text(symbol.display()), |d| Cell::text(format!("{d}D")));

    let Some(tick) = tick else {
        return vec![plazo, Cell::Empty, Cell::Empty, Cell::Empty];
    };

    let maturity = days.map_or(Cell::Empty, |d| {
        let date = tick.timestamp.with_timezone(&Local).date_naive() + Duration::days(d);
        Cell::text(date.format("%Y-%m-%d").to_string())
    });
    let amount = tick
        .last
        .zip(tick.volume)
        .map(|(rate, volume)| rate * volume);

    vec![plazo, maturity, num(tick.last), num(amount)]
}

fn ticker_columns(symbols: &[InstrumentSymbol]) -> Vec<TickerColumn> {
    InstrumentKind::LISTED
        .into_iter()
        .map(|kind| TickerColumn {
            kind,
            symbols: symbols
                .iter()
                .filter(|s| s.kind() == kind)
                .map(|s| s.raw().to_string())
                .collect(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use super::*;
    use crate::domain::market::ExtendedFields;

    fn tick(symbol: &str, last: i64, previous_close: i64) -> MarketTick {
        MarketTick {
            symbol: symbol.to_string(),
            bid: Some(Decimal::from(last - 1)),
            ask: Some(Decimal::from(last + 1)),
            last: Some(Decimal::from(last)),
            bid_size: Some(Decimal::from(10)),
            ask_size: Some(Decimal::from(20)),
            volume: Some(Decimal::from(3)),
            timestamp: Utc.with_ymd_and_hms(2026, 3, 2, 15, 0, 0).unwrap(),
            extended: ExtendedFields {
                previous_close: Some(Decimal::from(previous_close)),
                operations: Some(7),
                ..ExtendedFields::default()
            },
        }
    }

    fn symbols() -> Vec<InstrumentSymbol> {
        vec![
            InstrumentSymbol::new("GGAL - 24hs", InstrumentKind::Acciones),
            InstrumentSymbol::new("GFGC47566O - 24hs", InstrumentKind::Options),
            InstrumentSymbol::new("MERV - XMEV - PESOS - 3D", InstrumentKind::Cauciones),
        ]
    }

    #[test]
    fn one_row_per_listed_symbol() {
        let mut ticks = HashMap::new();
        ticks.insert(
            "MERV - XMEV - GGAL - 24hs".to_string(),
            tick("MERV - XMEV - GGAL - 24hs", 110, 100),
        );

        let snapshot = render(&symbols(), &ticks);
        let rows = &snapshot.market_data.rows;

        assert_eq!(rows.len(), 3);
        assert!(rows.iter().all(|r| r.len() == MARKET_DATA_HEADER.len()));
        assert_eq!(rows[0][0], Cell::text("GGAL - 24hs"));
        assert_eq!(rows[0][2], Cell::Number(109.0));
        assert_eq!(rows[0][5], Cell::Number(110.0));
        assert_eq!(rows[0][13], Cell::Number(7.0));
        assert!(matches!(rows[0][6], Cell::Number(c) if (c - 0.1).abs() < 1e-9));

        // No tick yet: symbol only.
        assert_eq!(rows[1][0], Cell::text("GFGC47566O"));
        assert!(rows[1][1..].iter().all(|c| *c == Cell::Empty));
    }

    #[test]
    fn cauciones_side_table() {
        let mut ticks = HashMap::new();
        ticks.insert(
            "MERV - XMEV - PESOS - 3D".to_string(),
            tick("MERV - XMEV - PESOS - 3D", 35, 34),
        );

        let snapshot = render(&symbols(), &ticks);
        let table = &snapshot.cauciones;

        assert_eq!(table.first_col, CAUCIONES_FIRST_COL);
        assert_eq!(table.rows.len(), 1);
        assert_eq!(table.rows[0][0], Cell::text("3D"));
        assert_eq!(table.rows[0][2], Cell::Number(35.0));
        assert_eq!(table.rows[0][3], Cell::Number(105.0));
    }

    #[test]
    fn tickers_mirror_listing() {
        let snapshot = render(&symbols(), &HashMap::new());
        let acciones = snapshot
            .tickers
            .iter()
            .find(|c| c.kind == InstrumentKind::Acciones)
            .unwrap();
        assert_eq!(acciones.symbols, vec!["GGAL - 24hs".to_string()]);
        assert_eq!(snapshot.tickers.len(), InstrumentKind::LISTED.len());
    }

    #[test]
    fn range_dimensions() {
        let snapshot = render(&symbols(), &HashMap::new());
        assert_eq!(snapshot.market_data.height(), 4);
        assert_eq!(snapshot.market_data.width(), 15);
    }
}
