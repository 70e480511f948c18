//! Application Services
//!
//! Services that orchestrate domain logic and coordinate between ports.
//!
//! - `availability`: pre-validates listed symbols against the instrument directory
//! - `flush`: periodic snapshot and bulk write to the sheet sink
//! - `render`: fixed workbook layout for a table snapshot

pub mod availability;
pub mod flush;
pub mod render;

pub use availability::{PrevalidationReport, prevalidate};
pub use flush::{FlushOutcome, FlushService, FlushStats};
pub use render::{
    CAUCIONES_HEADER, CAUCIONES_RANGE, MARKET_DATA_HEADER, MARKET_DATA_RANGE, render,
};
