//! Workbook Flush Integration Tests
//!
//! Ticks flow through the symbol table and the flush service into a real
//! `.xlsx` file, including cycles skipped while Excel holds the workbook.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rust_decimal::Decimal;

use epgb_options_stream::application::ports::SheetSink;
use epgb_options_stream::application::services::{FlushOutcome, FlushService};
use epgb_options_stream::domain::market::{ExtendedFields, PriceEntry, TickRejection, TickUpdate};
use epgb_options_stream::domain::subscription::SubscriptionBook;
use epgb_options_stream::domain::table::SymbolTable;
use epgb_options_stream::infrastructure::config::WorkbookSettings;
use epgb_options_stream::infrastructure::excel::XlsxSink;
use epgb_options_stream::infrastructure::tickers::{CAUCIONES, parse_tickers};

fn settings(dir: &Path) -> WorkbookSettings {
    WorkbookSettings {
        file_name: "EPGB OC-DI.xlsx".into(),
        directory: dir.to_path_buf(),
        homebroker_sheet: "HomeBroker".into(),
        tickers_sheet: "Tickers".into(),
    }
}

fn tick(symbol: &str, bid: i64, ask: i64, last: i64) -> TickUpdate {
    TickUpdate {
        symbol: symbol.to_string(),
        bid: PriceEntry::Price(Decimal::from(bid)),
        ask: PriceEntry::Price(Decimal::from(ask)),
        last: PriceEntry::Price(Decimal::from(last)),
        bid_size: Some(Decimal::from(10)),
        ask_size: Some(Decimal::from(5)),
        volume: Some(Decimal::from(1_000)),
        timestamp: Utc::now(),
        extended: ExtendedFields::default(),
    }
}

struct Pipeline {
    table: Arc<SymbolTable>,
    sink: Arc<XlsxSink>,
    service: FlushService,
}

fn pipeline(dir: &Path) -> Pipeline {
    let symbols =
        parse_tickers("options,acciones\nGFGC1500OC,GGAL\n,YPFD - spot\n".as_bytes()).unwrap();
    let book = Arc::new(SubscriptionBook::new(symbols));
    let table = Arc::new(SymbolTable::new());
    let sink = Arc::new(XlsxSink::new(&settings(dir)));
    let service = FlushService::new(
        Arc::clone(&table),
        book,
        Arc::clone(&sink) as Arc<dyn SheetSink>,
        Duration::from_secs(2),
    );
    Pipeline {
        table,
        sink,
        service,
    }
}

#[tokio::test]
async fn ticks_reach_the_workbook() {
    let dir = tempfile::tempdir().unwrap();
    let p = pipeline(dir.path());

    p.table
        .apply(tick("MERV - XMEV - GGAL - 24hs", 1520, 1522, 1521))
        .unwrap();
    p.table
        .apply(tick("MERV - XMEV - YPFD - CI", 30_000, 30_100, 30_050))
        .unwrap();

    // One row per listed symbol, ticked or not; the repo terms are always listed
    assert_eq!(
        p.service.flush_once().await,
        FlushOutcome::Written {
            rows: 3 + CAUCIONES.len()
        }
    );

    let bytes = std::fs::read(p.sink.path()).unwrap();
    assert_eq!(&bytes[..2], b"PK");
    assert_eq!(p.service.stats().written, 1);
}

#[test]
fn rejected_tick_leaves_previous_value() {
    let dir = tempfile::tempdir().unwrap();
    let p = pipeline(dir.path());
    let symbol = "MERV - XMEV - GGAL - 24hs";

    p.table.apply(tick(symbol, 100, 101, 100)).unwrap();

    let mut bad = tick(symbol, 90, 91, 90);
    bad.bid = PriceEntry::Price(Decimal::from(-1));
    assert!(matches!(
        p.table.apply(bad),
        Err(TickRejection::Negative { .. })
    ));

    let mut partial = tick(symbol, 90, 91, 90);
    partial.last = PriceEntry::Missing;
    assert!(matches!(
        p.table.apply(partial),
        Err(TickRejection::MissingPrice { .. })
    ));

    let stored = p.table.get(symbol).unwrap();
    assert_eq!(stored.bid, Some(Decimal::from(100)));
    assert_eq!(p.table.stats().rejected, 2);
}

#[tokio::test]
async fn locked_workbook_skips_until_released() {
    let dir = tempfile::tempdir().unwrap();
    let p = pipeline(dir.path());

    p.table
        .apply(tick("MERV - XMEV - GGAL - 24hs", 1520, 1522, 1521))
        .unwrap();
    assert!(matches!(
        p.service.flush_once().await,
        FlushOutcome::Written { .. }
    ));
    let before = std::fs::read(p.sink.path()).unwrap();

    // Excel keeps an owner file next to an open workbook
    std::fs::write(p.sink.lock_file(), b"owner").unwrap();
    p.table
        .apply(tick("MERV - XMEV - GGAL - 24hs", 1530, 1532, 1531))
        .unwrap();

    assert!(matches!(
        p.service.flush_once().await,
        FlushOutcome::Skipped(_)
    ));
    assert_eq!(std::fs::read(p.sink.path()).unwrap(), before);

    std::fs::remove_file(p.sink.lock_file()).unwrap();
    assert!(matches!(
        p.service.flush_once().await,
        FlushOutcome::Written { .. }
    ));

    let stats = p.service.stats();
    assert_eq!(stats.written, 2);
    assert_eq!(stats.skipped, 1);
    assert_eq!(stats.failed, 0);
}
