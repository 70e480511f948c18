//! Ticker Lists
//!
//! Loads the raw symbols to stream from a CSV file with one column per
//! instrument class, and appends the fixed list of peso repos.
//!
//! ```text
//! options,acciones,bonos,cedears,letras,ons,panel_general
//! GFGC1500OC,GGAL,AL30,AAPL,S31O5,YMCHO,AGRO
//! GFGV1500OC,YPFD - spot,GD30,,,,
//! ```
//!
//! Blank cells are skipped and unknown columns ignored. A symbol listed twice
//! is kept at its first position.

use std::collections::HashSet;
use std::path::Path;

use crate::domain::symbol::{InstrumentKind, InstrumentSymbol};

/// Peso repos offered by the broker (1D, 2D and 7D to 9D are not listed).
pub const CAUCIONES: [&str; 9] = [
    "MERV - XMEV - PESOS - 3D",
    "MERV - XMEV - PESOS - 4D",
    "MERV - XMEV - PESOS - 5D",
    "MERV - XMEV - PESOS - 6D",
    "MERV - XMEV - PESOS - 10D",
    "MERV - XMEV - PESOS - 11D",
    "MERV - XMEV - PESOS - 12D",
    "MERV - XMEV - PESOS - 13D",
    "MERV - XMEV - PESOS - 14D",
];

/// Errors loading the ticker lists.
#[derive(Debug, thiserror::Error)]
pub enum TickerSourceError {
    /// File could not be opened.
    #[error("cannot read tickers file {path}: {source}")]
    Io {
        /// File path.
        path: String,
        /// Underlying error.
        source: std::io::Error,
    },

    /// Malformed CSV.
    #[error("invalid tickers CSV: {0}")]
    Csv(#[from] csv::Error),

    /// No known column in the header.
    #[error("tickers file has none of the columns {expected:?}")]
    NoKnownColumns {
        /// Accepted column names.
        expected: Vec<&'static str>,
    },
}

/// Load the tickers file and append the repo list.
///
/// # Errors
///
/// Returns [`TickerSourceError`] if the file cannot be read, is not valid
/// CSV, or has no recognised column.
pub fn load_tickers(path: &Path) -> Result<Vec<InstrumentSymbol>, TickerSourceError> {
    let file = std::fs::File::open(path).map_err(|source| TickerSourceError::Io {
        path: path.display().to_string(),
        source,
    })?;
    let symbols = parse_tickers(file)?;

    tracing::info!(
        path = %path.display(),
        symbols = symbols.len(),
        "Loaded ticker lists"
    );
    Ok(symbols)
}

/// Parse ticker lists from any CSV reader and append the repo list.
///
/// Symbols are ordered by column (class order), then by row.
///
/// # Errors
///
/// Returns [`TickerSourceError`] on malformed CSV or when no column is recognised.
pub fn parse_tickers<R: std::io::Read>(
    reader: R,
) -> Result<Vec<InstrumentSymbol>, TickerSourceError> {
    let mut csv = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(reader);

    let columns: Vec<Option<InstrumentKind>> = csv
        .headers()?
        .iter()
        .map(InstrumentKind::from_column)
        .collect();
    if columns.iter().all(Option::is_none) {
        return Err(TickerSourceError::NoKnownColumns {
            expected: InstrumentKind::LISTED.iter().map(|k| k.as_str()).collect(),
        });
    }

    let mut by_kind: Vec<(InstrumentKind, Vec<String>)> = InstrumentKind::LISTED
        .iter()
        .map(|kind| (*kind, Vec::new()))
        .collect();

    for record in csv.records() {
        let record = record?;
        for (cell, kind) in record.iter().zip(&columns) {
            let Some(kind) = kind else { continue };
            if cell.is_empty() {
                continue;
            }
            if let Some((_, list)) = by_kind.iter_mut().find(|(k, _)| k == kind) {
                list.push(cell.to_string());
            }
        }
    }

    let mut seen = HashSet::new();
    let symbols = by_kind
        .into_iter()
        .flat_map(|(kind, raws)| raws.into_iter().map(move |raw| InstrumentSymbol::new(raw, kind)))
        .chain(
            CAUCIONES
                .iter()
                .map(|raw| InstrumentSymbol::new(*raw, InstrumentKind::Cauciones)),
        )
        .filter(|s| !s.transformed().is_empty() && seen.insert(s.transformed().to_string()))
        .collect();

    Ok(symbols)
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    const SAMPLE: &str = "\
options,acciones,bonos,cedears,letras,ons,panel_general,notes
GFGC1500OC,GGAL,AL30,AAPL,,,AGRO,ignored
GFGV1500OC,YPFD - spot,,,,,,
 ,GGAL,,,,,,
";

    #[test]
    fn columns_map_to_kinds_in_class_order() {
        let symbols = parse_tickers(SAMPLE.as_bytes()).unwrap();
        let listed: Vec<_> = symbols
            .iter()
            .filter(|s| s.kind() != InstrumentKind::Cauciones)
            .map(|s| (s.kind(), s.transformed().to_string()))
            .collect();

        assert_eq!(
            listed,
            vec![
                (InstrumentKind::Options, "MERV - XMEV - GFGC1500OC - 24hs".to_string()),
                (InstrumentKind::Options, "MERV - XMEV - GFGV1500OC - 24hs".to_string()),
                (InstrumentKind::Acciones, "MERV - XMEV - GGAL - 24hs".to_string()),
                (InstrumentKind::Acciones, "MERV - XMEV - YPFD - CI".to_string()),
                (InstrumentKind::Bonos, "MERV - XMEV - AL30 - 24hs".to_string()),
                (InstrumentKind::Cedears, "MERV - XMEV - AAPL - 24hs".to_string()),
                (InstrumentKind::PanelGeneral, "MERV - XMEV - AGRO - 24hs".to_string()),
            ]
        );
    }

    #[test]
    fn cauciones_are_appended() {
        let symbols = parse_tickers("acciones\nGGAL\n".as_bytes()).unwrap();
        let repos: Vec<_> = symbols
            .iter()
            .filter(|s| s.kind() == InstrumentKind::Cauciones)
            .map(InstrumentSymbol::transformed)
            .collect();
        assert_eq!(repos, CAUCIONES.to_vec());
    }

    #[test]
    fn header_without_known_columns_is_rejected() {
        let err = parse_tickers("foo,bar\n1,2\n".as_bytes()).unwrap_err();
        assert!(matches!(err, TickerSourceError::NoKnownColumns { .. }));
    }

    #[test]
    fn loads_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();

        let symbols = load_tickers(file.path()).unwrap();
        assert_eq!(symbols.len(), 7 + CAUCIONES.len());
    }

    #[test]
    fn missing_file_names_the_path() {
        let err = load_tickers(Path::new("/nonexistent/tickers.csv")).unwrap_err();
        assert!(err.to_string().contains("/nonexistent/tickers.csv"));
    }
}
