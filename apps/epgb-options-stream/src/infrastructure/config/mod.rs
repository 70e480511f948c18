//! Configuration Module
//!
//! Configuration loading and validation for the stream process.

mod settings;

pub use settings::{
    ALLOWED_WORKBOOK_EXTENSIONS, AppConfig, BrokerSettings, ConfigError, ConfigErrors,
    Credentials, Profile, ReconnectSettings, RuntimeSettings, WorkbookSettings,
};
