//! Subscription Pre-validation
//!
//! Checks listed symbols against the broker's instrument directory before
//! subscribing, so symbols the broker does not list are recorded as
//! unavailable up front instead of being rejected one by one.

use crate::application::ports::InstrumentDirectory;
use crate::domain::subscription::SubscriptionBook;

/// Result of a pre-validation pass.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PrevalidationReport {
    /// Symbols found in the directory.
    pub valid: usize,
    /// Symbols marked unavailable by this pass.
    pub unavailable: Vec<String>,
    /// Set when the directory could not be consulted.
    pub skipped: Option<String>,
}

/// Mark every listed symbol the directory does not know as unavailable.
///
/// When the directory cannot be loaded nothing is marked and every symbol is
/// still subscribed.
pub async fn prevalidate(
    book: &SubscriptionBook,
    directory: &dyn InstrumentDirectory,
) -> PrevalidationReport {
    let listed = match directory.listed_symbols().await {
        Ok(listed) => listed,
        Err(e) => {
            tracing::warn!(error = %e, "Instrument directory unavailable, subscribing to all symbols");
            return PrevalidationReport {
                valid: book.len(),
                unavailable: Vec::new(),
                skipped: Some(e.to_string()),
            };
        }
    };

    let mut report = PrevalidationReport::default();
    for symbol in book.active() {
        if listed.contains(&symbol) {
            report.valid += 1;
        } else if book.mark_unavailable(&symbol, "not listed by broker") {
            report.unavailable.push(symbol);
        }
    }

    if !report.unavailable.is_empty() {
        tracing::warn!(
            count = report.unavailable.len(),
            symbols = ?report.unavailable,
            "Symbols not listed by broker will not be subscribed"
        );
    }
    tracing::info!(valid = report.valid, "Symbols validated against instrument directory");

    report
}
