//! Bulk Flush Service
//!
//! Periodically snapshots the [`SymbolTable`] and hands the rendered
//! workbook to a [`SheetSink`] in one write. The cadence is independent of
//! tick arrival.
//!
//! A cycle never fails its caller: an unavailable target skips the cycle
//! with zero writes, any other sink error is logged, and the next tick of the
//! interval tries again with whatever has accumulated.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use super::render::render;
use crate::application::ports::{SheetSink, SinkError};
use crate::domain::subscription::SubscriptionBook;
use crate::domain::table::SymbolTable;

/// Outcome of one flush cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlushOutcome {
    /// The workbook was written.
    Written {
        /// Data rows written.
        rows: usize,
    },
    /// The target was unavailable; nothing was written.
    Skipped(String),
    /// The sink reported an error; nothing was written.
    Failed(String),
}

/// Flush counters exposed on the status endpoint.
#[derive(Debug, Clone, Default, Serialize)]
pub struct FlushStats {
    /// Successful writes.
    pub written: u64,
    /// Cycles skipped because the target was unavailable.
    pub skipped: u64,
    /// Cycles that hit a sink error.
    pub failed: u64,
    /// Time of the last successful write.
    pub last_written_at: Option<DateTime<Utc>>,
    /// Whether the most recent cycle hit a sink error.
    pub last_cycle_failed: bool,
}

/// Periodic snapshot-and-write loop.
pub struct FlushService {
    table: Arc<SymbolTable>,
    book: Arc<SubscriptionBook>,
    sink: Arc<dyn SheetSink>,
    interval: Duration,
    written: AtomicU64,
    skipped: AtomicU64,
    failed: AtomicU64,
    last_cycle_failed: AtomicBool,
    last_written_at: RwLock<Option<DateTime<Utc>>>,
}

impl FlushService {
    /// Create a flush service.
    #[must_use]
    pub fn new(
        table: Arc<SymbolTable>,
        book: Arc<SubscriptionBook>,
        sink: Arc<dyn SheetSink>,
        interval: Duration,
    ) -> Self {
        Self {
            table,
            book,
            sink,
            interval,
            written: AtomicU64::new(0),
            skipped: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            last_cycle_failed: AtomicBool::new(false),
            last_written_at: RwLock::new(None),
        }
    }

    /// Run one cycle.
    pub async fn flush_once(&self) -> FlushOutcome {
        if let Err(e) = self.sink.check_available().await {
            return self.record_error(e);
        }

        let ticks = self.table.snapshot();
        let symbols = self.book.symbols();
        let snapshot = render(&symbols, &ticks);
        let rows = snapshot.market_data.rows.len();

        match self.sink.write(&snapshot).await {
            Ok(()) => {
                self.written.fetch_add(1, Ordering::Relaxed);
                self.last_cycle_failed.store(false, Ordering::Relaxed);
                *self.last_written_at.write() = Some(Utc::now());
                tracing::debug!(rows, ticks = ticks.len(), "Workbook flushed");
                FlushOutcome::Written { rows }
            }
            Err(e) => self.record_error(e),
        }
    }

    fn record_error(&self, error: SinkError) -> FlushOutcome {
        match error {
            SinkError::Unavailable(reason) => {
                self.skipped.fetch_add(1, Ordering::Relaxed);
                self.last_cycle_failed.store(false, Ordering::Relaxed);
                tracing::info!(reason = %reason, "Workbook unavailable, skipping flush");
                FlushOutcome::Skipped(reason)
            }
            other => {
                self.failed.fetch_add(1, Ordering::Relaxed);
                self.last_cycle_failed.store(true, Ordering::Relaxed);
                tracing::warn!(error = %other, "Workbook flush failed");
                FlushOutcome::Failed(other.to_string())
            }
        }
    }

    /// Flush every interval until cancelled, then flush once more.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval_at(
            tokio::time::Instant::now() + self.interval,
            self.interval,
        );
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tracing::info!(interval_ms = self.interval.as_millis(), "Flush service started");

        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    self.flush_once().await;
                }
            }
        }

        let outcome = self.flush_once().await;
        tracing::info!(?outcome, "Flush service stopped");
    }

    /// Current counters.
    #[must_use]
    pub fn stats(&self) -> FlushStats {
        FlushStats {
            written: self.written.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            last_written_at: *self.last_written_at.read(),
            last_cycle_failed: self.last_cycle_failed.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use chrono::Utc;
    use mockall::Sequence;
    use parking_lot::Mutex;
    use rust_decimal::Decimal;

    use super::*;
    use crate::application::ports::{MockSheetSink, WorkbookSnapshot};
    use crate::domain::market::{ExtendedFields, PriceEntry, TickUpdate};
    use crate::domain::symbol::{InstrumentKind, InstrumentSymbol};

    fn update(symbol: &str, last: i64) -> TickUpdate {
        TickUpdate {
            symbol: symbol.to_string(),
            bid: PriceEntry::Price(Decimal::from(last)),
            ask: PriceEntry::Price(Decimal::from(last)),
            last: PriceEntry::Price(Decimal::from(last)),
            bid_size: None,
            ask_size: None,
            volume: None,
            timestamp: Utc::now(),
            extended: ExtendedFields::default(),
        }
    }

    fn book() -> Arc<SubscriptionBook> {
        Arc::new(SubscriptionBook::new([
            InstrumentSymbol::new("GGAL - 24hs", InstrumentKind::Acciones),
            InstrumentSymbol::new("YPFD - 24hs", InstrumentKind::Acciones),
        ]))
    }

    #[tokio::test]
    async fn unavailable_target_skips_without_writing() {
        let mut sink = MockSheetSink::new();
        let mut seq = Sequence::new();
        sink.expect_check_available()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|| Err(SinkError::Unavailable("locked".into())));
        sink.expect_check_available()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|| Ok(()));
        sink.expect_write()
            .times(1)
            .in_sequence(&mut seq)
            .withf(|snapshot| snapshot.market_data.rows.len() == 2)
            .returning(|_| Ok(()));

        let table = Arc::new(SymbolTable::new());
        let service = FlushService::new(
            Arc::clone(&table),
            book(),
            Arc::new(sink),
            Duration::from_secs(2),
        );

        table.apply(update("MERV - XMEV - GGAL - 24hs", 100)).unwrap();
        assert_eq!(
            service.flush_once().await,
            FlushOutcome::Skipped("locked".into())
        );

        // Ticks keep accumulating while the target is locked.
        table.apply(update("MERV - XMEV - YPFD - 24hs", 50)).unwrap();
        assert_eq!(service.flush_once().await, FlushOutcome::Written { rows: 2 });

        let stats = service.stats();
        assert_eq!(stats.skipped, 1);
        assert_eq!(stats.written, 1);
        assert!(stats.last_written_at.is_some());
    }

    #[tokio::test]
    async fn write_error_is_contained() {
        let mut sink = MockSheetSink::new();
        sink.expect_check_available().returning(|| Ok(()));
        sink.expect_write()
            .returning(|_| Err(SinkError::Write("disk full".into())));

        let service = FlushService::new(
            Arc::new(SymbolTable::new()),
            book(),
            Arc::new(sink),
            Duration::from_secs(2),
        );

        assert!(matches!(service.flush_once().await, FlushOutcome::Failed(_)));
        let stats = service.stats();
        assert_eq!(stats.failed, 1);
        assert!(stats.last_cycle_failed);
    }

    /// Records what it was asked to write.
    #[derive(Default)]
    struct RecordingSink {
        locked: AtomicBool,
        writes: Mutex<Vec<WorkbookSnapshot>>,
    }

    #[async_trait]
    impl SheetSink for RecordingSink {
        async fn check_available(&self) -> Result<(), SinkError> {
            if self.locked.load(Ordering::SeqCst) {
                Err(SinkError::Unavailable("locked".into()))
            } else {
                Ok(())
            }
        }

        async fn write(&self, snapshot: &WorkbookSnapshot) -> Result<(), SinkError> {
            self.writes.lock().push(snapshot.clone());
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn run_flushes_on_interval_and_on_shutdown() {
        let sink = Arc::new(RecordingSink::default());
        let table = Arc::new(SymbolTable::new());
        let service = Arc::new(FlushService::new(
            Arc::clone(&table),
            book(),
            Arc::clone(&sink) as Arc<dyn SheetSink>,
            Duration::from_secs(2),
        ));
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(Arc::clone(&service).run(cancel.clone()));

        table.apply(update("MERV - XMEV - GGAL - 24hs", 100)).unwrap();
        tokio::time::sleep(Duration::from_millis(2_100)).await;
        assert_eq!(sink.writes.lock().len(), 1);

        sink.locked.store(true, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(sink.writes.lock().len(), 1);
        assert_eq!(service.stats().skipped, 1);

        sink.locked.store(false, Ordering::SeqCst);
        cancel.cancel();
        handle.await.unwrap();
        assert_eq!(sink.writes.lock().len(), 2);
    }
}
