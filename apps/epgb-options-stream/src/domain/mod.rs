//! Domain Layer - Symbols, ticks and the shared tick table.
//!
//! Pure types with no I/O. Everything here is usable from tests without a
//! runtime.

/// Tick types, validation and connection state.
pub mod market;

/// Listed symbols and their availability.
pub mod subscription;

/// Broker symbol transformation.
pub mod symbol;

/// Latest tick per symbol.
pub mod table;
