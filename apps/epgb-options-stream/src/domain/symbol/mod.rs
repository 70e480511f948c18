//! Instrument Symbol Transformation
//!
//! Maps user-entered tickers (as listed in the tickers source) to the
//! identifiers the Primary API expects for BYMA securities.
//!
//! # Format
//!
//! BYMA securities are addressed as `MERV - XMEV - <ticker> - <settlement>`:
//!
//! ```text
//! YPFD - 24hs   ->  MERV - XMEV - YPFD - 24hs
//! GGAL - spot   ->  MERV - XMEV - GGAL - CI
//! ALUA          ->  MERV - XMEV - ALUA - 24hs
//! DLR/DIC24     ->  DLR/DIC24              (futures code, untouched)
//! ```
//!
//! Classification is table-driven: [`CLASSIFICATION_RULES`] is an ordered
//! list of predicates and the first match decides how a symbol is treated.
//! Anything no rule matches takes the default BYMA path.

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// Market and segment prefix for BYMA securities.
pub const MARKET_PREFIX: &str = "MERV - XMEV - ";

/// Settlement suffix appended when a BYMA ticker carries none.
pub const DEFAULT_SETTLEMENT: &str = " - 24hs";

/// Canonical immediate-settlement suffix.
pub const IMMEDIATE_SETTLEMENT: &str = " - CI";

// =============================================================================
// Patterns
// =============================================================================

#[allow(clippy::expect_used)]
fn compile(pattern: &str) -> Regex {
    Regex::new(pattern).expect("static symbol pattern is valid")
}

static SPOT_SUFFIX: LazyLock<Regex> = LazyLock::new(|| compile(r"(?i) - spot$"));

static SETTLEMENT_SUFFIX: LazyLock<Regex> =
    LazyLock::new(|| compile(r"(?i) - (CI|24hs|48hs|72hs|\d{1,2}D)$"));

static MONTH_CODE: LazyLock<Regex> = LazyLock::new(|| {
    compile(r"\b(ENE|FEB|MAR|ABR|MAY|JUN|JUL|AGO|SEP|OCT|NOV|DIC)\d{2}\b")
});

static SECOND_EXCHANGE: LazyLock<Regex> =
    LazyLock::new(|| compile(r"^[A-Z]{2,4}\.(ROS|MIN|CME)\b"));

static FOREIGN_PREFIX: LazyLock<Regex> =
    LazyLock::new(|| compile(r"^[A-Z]{2,5} - [A-Z]{2,6} - "));

// =============================================================================
// Classification Rules
// =============================================================================

/// What a matching rule does with a symbol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleAction {
    /// Return the symbol unchanged.
    Exclude,
    /// Prepend the market prefix without touching the settlement suffix.
    PrefixOnly,
}

/// One entry of the ordered classification table.
#[derive(Debug, Clone, Copy)]
pub struct ClassificationRule {
    /// Rule name, used in logs and in [`SymbolClass::Excluded`].
    pub name: &'static str,
    /// Action applied when the predicate matches.
    pub action: RuleAction,
    /// Predicate over the trimmed symbol.
    pub matches: fn(&str) -> bool,
}

/// Ordered classification table. The first matching rule wins.
pub const CLASSIFICATION_RULES: &[ClassificationRule] = &[
    ClassificationRule {
        name: "merval_index",
        action: RuleAction::PrefixOnly,
        matches: |s| s == "I.MERVAL",
    },
    ClassificationRule {
        name: "dated_contract",
        action: RuleAction::Exclude,
        matches: |s| s.contains('/'),
    },
    ClassificationRule {
        name: "month_code_contract",
        action: RuleAction::Exclude,
        matches: |s| MONTH_CODE.is_match(s),
    },
    ClassificationRule {
        name: "index",
        action: RuleAction::Exclude,
        matches: |s| s.starts_with("I."),
    },
    ClassificationRule {
        name: "second_exchange_contract",
        action: RuleAction::Exclude,
        matches: |s| SECOND_EXCHANGE.is_match(s),
    },
    ClassificationRule {
        name: "foreign_market",
        action: RuleAction::Exclude,
        matches: |s| FOREIGN_PREFIX.is_match(s),
    },
];

/// Result of classifying a (trimmed) symbol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymbolClass {
    /// Blank input.
    Empty,
    /// Already carries [`MARKET_PREFIX`].
    Prefixed,
    /// Matched an exclusion rule.
    Excluded(&'static str),
    /// Named exception that only receives the prefix.
    PrefixOnly(&'static str),
    /// No rule matched: BYMA security.
    Merv,
}

/// Classify a symbol against [`CLASSIFICATION_RULES`].
#[must_use]
pub fn classify(symbol: &str) -> SymbolClass {
    let symbol = symbol.trim();

    if symbol.is_empty() {
        return SymbolClass::Empty;
    }
    if symbol.starts_with(MARKET_PREFIX) {
        return SymbolClass::Prefixed;
    }

    CLASSIFICATION_RULES
        .iter()
        .find(|rule| (rule.matches)(symbol))
        .map_or(SymbolClass::Merv, |rule| match rule.action {
            RuleAction::Exclude => SymbolClass::Excluded(rule.name),
            RuleAction::PrefixOnly => SymbolClass::PrefixOnly(rule.name),
        })
}

// =============================================================================
// Transformation
// =============================================================================

/// Transform a raw ticker into the broker-facing identifier.
///
/// Total over strings and idempotent: `transform(&transform(x)) == transform(x)`.
#[must_use]
pub fn transform(raw: &str) -> String {
    let symbol = raw.trim();

    match classify(symbol) {
        SymbolClass::Empty | SymbolClass::Prefixed | SymbolClass::Excluded(_) => symbol.to_string(),
        SymbolClass::PrefixOnly(_) => format!("{MARKET_PREFIX}{symbol}"),
        SymbolClass::Merv => format!("{MARKET_PREFIX}{}", normalize_settlement(symbol)),
    }
}

fn normalize_settlement(symbol: &str) -> String {
    if SPOT_SUFFIX.is_match(symbol) {
        return SPOT_SUFFIX
            .replace(symbol, IMMEDIATE_SETTLEMENT)
            .into_owned();
    }
    if SETTLEMENT_SUFFIX.is_match(symbol) {
        return symbol.to_string();
    }
    tracing::debug!(symbol, "No settlement suffix, using default");
    format!("{symbol}{DEFAULT_SETTLEMENT}")
}

/// Strip the market prefix for display.
#[must_use]
pub fn clean_for_display(symbol: &str) -> &str {
    symbol.strip_prefix(MARKET_PREFIX).unwrap_or(symbol)
}

/// Re-add the market prefix to a display symbol. No-op when already present.
#[must_use]
pub fn restore_prefix(display: &str) -> String {
    if display.is_empty() || display.starts_with(MARKET_PREFIX) {
        display.to_string()
    } else {
        format!("{MARKET_PREFIX}{display}")
    }
}

// =============================================================================
// Instrument Symbol
// =============================================================================

/// Instrument class a raw symbol was listed under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstrumentKind {
    /// Equity options.
    Options,
    /// Stocks.
    Acciones,
    /// Government bonds.
    Bonos,
    /// Foreign stock certificates.
    Cedears,
    /// Treasury bills.
    Letras,
    /// Corporate bonds.
    Ons,
    /// General panel stocks.
    PanelGeneral,
    /// Peso repos.
    Cauciones,
}

impl InstrumentKind {
    /// Kinds read from the tickers source, in column order.
    pub const LISTED: [Self; 7] = [
        Self::Options,
        Self::Acciones,
        Self::Bonos,
        Self::Cedears,
        Self::Letras,
        Self::Ons,
        Self::PanelGeneral,
    ];

    /// Column name in the tickers source.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Options => "options",
            Self::Acciones => "acciones",
            Self::Bonos => "bonos",
            Self::Cedears => "cedears",
            Self::Letras => "letras",
            Self::Ons => "ons",
            Self::PanelGeneral => "panel_general",
            Self::Cauciones => "cauciones",
        }
    }

    /// Parse a column name.
    #[must_use]
    pub fn from_column(name: &str) -> Option<Self> {
        let name = name.trim().to_lowercase();
        Self::LISTED
            .into_iter()
            .chain([Self::Cauciones])
            .find(|kind| kind.as_str() == name)
    }
}

impl fmt::Display for InstrumentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A raw ticker paired with its broker identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct InstrumentSymbol {
    raw: String,
    transformed: String,
    kind: InstrumentKind,
}

impl InstrumentSymbol {
    /// Build from a raw ticker, computing the broker identifier.
    #[must_use]
    pub fn new(raw: impl Into<String>, kind: InstrumentKind) -> Self {
        let raw = raw.into();
        let transformed = transform(&raw);
        Self {
            raw,
            transformed,
            kind,
        }
    }

    /// The ticker as listed.
    #[must_use]
    pub fn raw(&self) -> &str {
        &self.raw
    }

    /// The broker identifier.
    #[must_use]
    pub fn transformed(&self) -> &str {
        &self.transformed
    }

    /// Listing class.
    #[must_use]
    pub const fn kind(&self) -> InstrumentKind {
        self.kind
    }

    /// Label shown in the sheet's symbol column.
    ///
    /// Options drop the settlement suffix; everything else keeps it.
    #[must_use]
    pub fn display(&self) -> String {
        let cleaned = clean_for_display(&self.transformed);
        if self.kind == InstrumentKind::Options {
            SETTLEMENT_SUFFIX.replace(cleaned, "").into_owned()
        } else {
            cleaned.to_string()
        }
    }
}

impl fmt::Display for InstrumentSymbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.transformed)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use test_case::test_case;

    #[test_case("YPFD - 24hs", "MERV - XMEV - YPFD - 24hs" ; "keeps 24hs")]
    #[test_case("GGAL - spot", "MERV - XMEV - GGAL - CI" ; "spot becomes CI")]
    #[test_case("GGAL - SPOT", "MERV - XMEV - GGAL - CI" ; "spot is case insensitive")]
    #[test_case("BBAR - CI", "MERV - XMEV - BBAR - CI" ; "keeps CI")]
    #[test_case("AL30 - 48hs", "MERV - XMEV - AL30 - 48hs" ; "keeps 48hs")]
    #[test_case("ALUA", "MERV - XMEV - ALUA - 24hs" ; "appends default")]
    #[test_case("GFGC47566O", "MERV - XMEV - GFGC47566O - 24hs" ; "option gets default")]
    #[test_case("PESOS - 3D", "MERV - XMEV - PESOS - 3D" ; "repo term kept")]
    #[test_case("  TXAR - 24hs  ", "MERV - XMEV - TXAR - 24hs" ; "trims")]
    #[test_case("I.MERVAL", "MERV - XMEV - I.MERVAL" ; "named index exception")]
    fn merv_symbols_are_prefixed(raw: &str, expected: &str) {
        assert_eq!(transform(raw), expected);
    }

    #[test_case("DLR/DIC24" ; "dated future")]
    #[test_case("GGAL/FEB25 4500 C" ; "dated option")]
    #[test_case("SOJ.ROS MAY25" ; "month code")]
    #[test_case("I.RFX20" ; "index marker")]
    #[test_case("I.BURCAP" ; "another index")]
    #[test_case("TRI.ROS 240 P" ; "second exchange option")]
    #[test_case("ROFX - DDF - DLR" ; "foreign market prefix")]
    fn excluded_symbols_are_unchanged(raw: &str) {
        assert_eq!(transform(raw), raw);
        assert!(matches!(classify(raw), SymbolClass::Excluded(_)));
    }

    #[test]
    fn spot_never_survives() {
        let out = transform("GGAL - spot");
        assert!(out.starts_with(MARKET_PREFIX));
        assert!(out.ends_with(IMMEDIATE_SETTLEMENT));
        assert!(!out.to_lowercase().contains("spot"));
    }

    #[test]
    fn already_prefixed_is_unchanged() {
        let symbol = "MERV - XMEV - GGAL - 24hs";
        assert_eq!(classify(symbol), SymbolClass::Prefixed);
        assert_eq!(transform(symbol), symbol);
    }

    #[test]
    fn blank_input() {
        assert_eq!(transform(""), "");
        assert_eq!(transform("   "), "");
        assert_eq!(classify("  "), SymbolClass::Empty);
    }

    #[test]
    fn first_matching_rule_wins() {
        // I.MERVAL would also match the index rule further down.
        assert_eq!(classify("I.MERVAL"), SymbolClass::PrefixOnly("merval_index"));
        assert_eq!(classify("I.RFX20"), SymbolClass::Excluded("index"));
    }

    #[test]
    fn display_cleaning() {
        let stock = InstrumentSymbol::new("GGAL - 24hs", InstrumentKind::Acciones);
        assert_eq!(stock.display(), "GGAL - 24hs");

        let option = InstrumentSymbol::new("GFGV38566O - 24hs", InstrumentKind::Options);
        assert_eq!(option.transformed(), "MERV - XMEV - GFGV38566O - 24hs");
        assert_eq!(option.display(), "GFGV38566O");

        let repo = InstrumentSymbol::new("MERV - XMEV - PESOS - 3D", InstrumentKind::Cauciones);
        assert_eq!(repo.display(), "PESOS - 3D");
    }

    #[test]
    fn prefix_round_trip() {
        assert_eq!(clean_for_display("GGAL - 24hs"), "GGAL - 24hs");
        assert_eq!(restore_prefix("PESOS - 3D"), "MERV - XMEV - PESOS - 3D");
        assert_eq!(
            restore_prefix("MERV - XMEV - GGAL - 24hs"),
            "MERV - XMEV - GGAL - 24hs"
        );
    }

    #[test]
    fn kind_columns() {
        assert_eq!(InstrumentKind::from_column("Panel_General"), Some(InstrumentKind::PanelGeneral));
        assert_eq!(InstrumentKind::from_column("cauciones"), Some(InstrumentKind::Cauciones));
        assert_eq!(InstrumentKind::from_column("futuros"), None);
    }

    proptest! {
        #[test]
        fn transform_is_idempotent(raw in "\\PC{0,40}") {
            let once = transform(&raw);
            prop_assert_eq!(transform(&once), once);
        }

        #[test]
        fn bare_tickers_get_prefix_and_default(ticker in "[A-Z]{3,5}[0-9]{0,2}") {
            prop_assume!(!MONTH_CODE.is_match(&ticker));
            let out = transform(&ticker);
            prop_assert_eq!(out, format!("{MARKET_PREFIX}{ticker}{DEFAULT_SETTLEMENT}"));
        }

        #[test]
        fn dated_codes_are_untouched(root in "[A-Z]{3}", month in "(ENE|ABR|JUN|DIC)", year in "[0-9]{2}") {
            let raw = format!("{root}/{month}{year}");
            prop_assert_eq!(transform(&raw), raw);
        }
    }
}
