//! Excel Workbook Sink
//!
//! [`SheetSink`] adapter for the `.xlsx` workbook. An existing workbook is
//! opened and only the `MarketData` and `Cauciones` blocks are rewritten.
//! Other sheets and cells are carried over as found, including formats and
//! formulas. A missing workbook is seeded with the board and ticker sheets.
//!
//! Either way the result is written next to the target and renamed over it,
//! so a reader never sees a half-written workbook.
//!
//! # Availability
//!
//! While Excel has the workbook open it keeps an owner file `~$<name>`
//! beside it and holds a share lock on the workbook. Either one makes the
//! target unavailable and the cycle is skipped.

use std::fmt::Display;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::time::Instant;

use async_trait::async_trait;
use rust_xlsxwriter::utility::column_number_to_name;
use rust_xlsxwriter::{Format, Workbook, Worksheet, XlsxError};
use umya_spreadsheet::Spreadsheet;

use crate::application::ports::{Cell, SheetRange, SheetSink, SinkError, WorkbookSnapshot};
use crate::infrastructure::config::WorkbookSettings;
use crate::infrastructure::metrics::{self, FlushResult};

impl From<XlsxError> for SinkError {
    fn from(e: XlsxError) -> Self {
        Self::Write(e.to_string())
    }
}

fn write_error(e: impl Display) -> SinkError {
    SinkError::Write(e.to_string())
}

/// Workbook sink writing an `.xlsx` file.
#[derive(Debug, Clone)]
pub struct XlsxSink {
    path: PathBuf,
    homebroker_sheet: String,
    tickers_sheet: String,
}

impl XlsxSink {
    /// Create a sink for the configured workbook.
    #[must_use]
    pub fn new(settings: &WorkbookSettings) -> Self {
        Self {
            path: settings.path(),
            homebroker_sheet: settings.homebroker_sheet.clone(),
            tickers_sheet: settings.tickers_sheet.clone(),
        }
    }

    /// Target workbook path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Excel's owner file for the target.
    #[must_use]
    pub fn lock_file(&self) -> PathBuf {
        self.sibling("~$")
    }

    fn temp_file(&self) -> PathBuf {
        self.sibling(".~tmp-")
    }

    fn sibling(&self, prefix: &str) -> PathBuf {
        let name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        self.path.with_file_name(format!("{prefix}{name}"))
    }

    /// Seed a new workbook: the board sheet plus the ticker mirror.
    fn create(&self, snapshot: &WorkbookSnapshot) -> Result<Vec<u8>, XlsxError> {
        let header = Format::new().set_bold();
        let mut workbook = Workbook::new();

        let mut board = Worksheet::new();
        board.set_name(&self.homebroker_sheet)?;
        write_range(&mut board, &snapshot.market_data, &header)?;
        write_range(&mut board, &snapshot.cauciones, &header)?;
        board.set_freeze_panes(1, 1)?;
        workbook.push_worksheet(board);

        let mut tickers = Worksheet::new();
        tickers.set_name(&self.tickers_sheet)?;
        for (col, column) in (0u16..).zip(&snapshot.tickers) {
            tickers.write_string_with_format(0, col, column.kind.as_str(), &header)?;
            for (row, raw) in (1u32..).zip(&column.symbols) {
                tickers.write_string(row, col, raw)?;
            }
        }
        workbook.push_worksheet(tickers);

        for range in [&snapshot.market_data, &snapshot.cauciones] {
            let reference = range_reference(&self.homebroker_sheet, range);
            workbook.define_name(range.name, &format!("={reference}"))?;
        }

        workbook.save_to_buffer()
    }

    /// Rewrite the data blocks of the existing workbook and nothing else.
    fn update(&self, snapshot: &WorkbookSnapshot) -> Result<Vec<u8>, SinkError> {
        let mut book = umya_spreadsheet::reader::xlsx::read(&self.path).map_err(write_error)?;

        if book.get_sheet_by_name(&self.homebroker_sheet).is_none() {
            book.new_sheet(self.homebroker_sheet.as_str())
                .map_err(write_error)?;
        }

        for range in [&snapshot.market_data, &snapshot.cauciones] {
            let previous_last_row = defined_last_row(&book, range.name);
            let Some(sheet) = book.get_sheet_by_name_mut(&self.homebroker_sheet) else {
                return Err(SinkError::Write(format!(
                    "sheet {} missing from {}",
                    self.homebroker_sheet,
                    self.path.display()
                )));
            };
            fill_range(sheet, range, previous_last_row);

            let reference = range_reference(&self.homebroker_sheet, range);
            replace_defined_name(&mut book, range.name, &reference)?;
        }

        let mut buffer = Cursor::new(Vec::new());
        umya_spreadsheet::writer::xlsx::write_writer(&book, &mut buffer).map_err(write_error)?;
        Ok(buffer.into_inner())
    }

    async fn encode(&self, snapshot: &WorkbookSnapshot) -> Result<Vec<u8>, SinkError> {
        if !tokio::fs::try_exists(&self.path).await? {
            return Ok(self.create(snapshot)?);
        }

        let sink = self.clone();
        let snapshot = snapshot.clone();
        tokio::task::spawn_blocking(move || sink.update(&snapshot))
            .await
            .map_err(write_error)?
    }

    async fn replace(&self, bytes: Vec<u8>) -> Result<(), SinkError> {
        let tmp = self.temp_file();
        tokio::fs::write(&tmp, bytes).await?;

        match tokio::fs::rename(&tmp, &self.path).await {
            Ok(()) => Ok(()),
            Err(e) => {
                let _ = tokio::fs::remove_file(&tmp).await;
                if e.kind() == std::io::ErrorKind::PermissionDenied {
                    Err(SinkError::Unavailable(format!(
                        "{} is locked: {e}",
                        self.path.display()
                    )))
                } else {
                    Err(e.into())
                }
            }
        }
    }
}

#[async_trait]
impl SheetSink for XlsxSink {
    async fn check_available(&self) -> Result<(), SinkError> {
        let directory_exists = match self.path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => tokio::fs::try_exists(dir).await?,
            _ => true,
        };
        if !directory_exists {
            metrics::record_flush(FlushResult::Skipped, None);
            return Err(SinkError::Unavailable(format!(
                "directory of {} does not exist",
                self.path.display()
            )));
        }

        if tokio::fs::try_exists(self.lock_file()).await? {
            metrics::record_flush(FlushResult::Skipped, None);
            return Err(SinkError::Unavailable(format!(
                "{} is open in Excel",
                self.path.display()
            )));
        }

        Ok(())
    }

    async fn write(&self, snapshot: &WorkbookSnapshot) -> Result<(), SinkError> {
        let started = Instant::now();

        let result = match self.encode(snapshot).await {
            Ok(bytes) => self.replace(bytes).await,
            Err(e) => Err(e),
        };

        match &result {
            Ok(()) => {
                metrics::record_flush(FlushResult::Written, Some(started.elapsed()));
                tracing::trace!(
                    path = %self.path.display(),
                    elapsed_ms = started.elapsed().as_millis(),
                    "Workbook written"
                );
            }
            Err(SinkError::Unavailable(_)) => metrics::record_flush(FlushResult::Skipped, None),
            Err(_) => metrics::record_flush(FlushResult::Failed, None),
        }
        result
    }
}

fn write_range(sheet: &mut Worksheet, range: &SheetRange, header: &Format) -> Result<(), XlsxError> {
    for (col, label) in (range.first_col..).zip(range.header) {
        sheet.write_string_with_format(range.first_row, col, *label, header)?;
    }

    for (row, cells) in (range.first_row + 1..).zip(&range.rows) {
        for (col, cell) in (range.first_col..).zip(cells) {
            match cell {
                Cell::Empty => {}
                Cell::Text(text) => {
                    sheet.write_string(row, col, text)?;
                }
                Cell::Number(value) => {
                    sheet.write_number(row, col, *value)?;
                }
            }
        }
    }
    Ok(())
}

/// Overwrite a block in place. Coordinates here are one-based.
///
/// Rows below the block that were part of the previous, longer block are
/// blanked. Cells outside the block's columns are never touched.
fn fill_range(
    sheet: &mut umya_spreadsheet::Worksheet,
    range: &SheetRange,
    previous_last_row: Option<u32>,
) {
    let first_col = u32::from(range.first_col) + 1;
    let header_row = range.first_row + 1;

    for (col, label) in (first_col..).zip(range.header) {
        sheet.get_cell_mut((col, header_row)).set_value_string(*label);
    }

    for (row, cells) in (header_row + 1..).zip(&range.rows) {
        for (col, cell) in (first_col..).zip(cells) {
            match cell {
                Cell::Empty => {
                    sheet.remove_cell((col, row));
                }
                Cell::Text(text) => {
                    sheet.get_cell_mut((col, row)).set_value_string(text.as_str());
                }
                Cell::Number(value) => {
                    sheet.get_cell_mut((col, row)).set_value_number(*value);
                }
            }
        }
    }

    let last_row = range.first_row + range.height();
    let last_col = first_col + u32::from(range.width());
    if let Some(previous) = previous_last_row {
        for row in last_row + 1..=previous {
            for col in first_col..last_col {
                sheet.remove_cell((col, row));
            }
        }
    }
}

/// Last row of a defined name's reference, workbook or sheet scoped.
fn defined_last_row(book: &Spreadsheet, name: &str) -> Option<u32> {
    let sheet_names = book
        .get_sheet_collection()
        .iter()
        .flat_map(|sheet| sheet.get_defined_names().iter());

    book.get_defined_names()
        .iter()
        .chain(sheet_names)
        .find(|defined| defined.get_name() == name)
        .and_then(|defined| last_row(&defined.get_address()))
}

fn replace_defined_name(book: &mut Spreadsheet, name: &str, reference: &str) -> Result<(), SinkError> {
    book.get_defined_names_mut()
        .retain(|defined| defined.get_name() != name);
    for sheet in book.get_sheet_collection_mut().iter_mut() {
        sheet
            .get_defined_names_mut()
            .retain(|defined| defined.get_name() != name);
    }
    // umya exposes no public workbook-level constructor; build the name via a
    // scratch worksheet (no local sheet id) and move it to the workbook list.
    let mut scratch = umya_spreadsheet::Worksheet::default();
    scratch.add_defined_name(name, reference).map_err(write_error)?;
    book.get_defined_names_mut()
        .extend(scratch.get_defined_names_mut().drain(..));
    Ok(())
}

/// Trailing row number of an `A1`-style reference such as `'Board'!$A$1:$O$12`.
fn last_row(reference: &str) -> Option<u32> {
    let digits_start = reference.trim_end_matches(|c: char| c.is_ascii_digit()).len();
    reference[digits_start..].parse().ok()
}

/// Absolute reference to a range block, header included.
fn range_reference(sheet: &str, range: &SheetRange) -> String {
    let last_row = range.first_row + range.height();
    let last_col = range.first_col + range.width().saturating_sub(1);
    format!(
        "'{}'!${}${}:${}${}",
        sheet.replace('\'', "''"),
        column_number_to_name(range.first_col),
        range.first_row + 1,
        column_number_to_name(last_col),
        last_row,
    )
}
