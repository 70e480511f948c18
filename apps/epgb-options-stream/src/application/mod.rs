//! Application Layer - Use cases and port definitions.
//!
//! This layer contains the application services and port interfaces
//! that define how the domain interacts with external systems.

/// Port interfaces for the sheet sink and instrument directory.
pub mod ports;

/// Flush, rendering and pre-validation services.
pub mod services;
