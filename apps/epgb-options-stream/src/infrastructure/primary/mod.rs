//! Primary API Integration
//!
//! REST token authentication, instrument listing and the market data
//! WebSocket client for Primary (Matba Rofex) based brokers.

pub mod client;
pub mod codec;
pub mod instruments;
pub mod messages;
pub mod reconnect;
pub mod rest;

pub use client::{
    ClientError, ConnectionMonitor, ConnectionSnapshot, MarketDataClient,
    MarketDataClientConfig, MarketDataEvent,
};
pub use codec::{CodecError, PrimaryCodec, PrimaryMessage};
pub use instruments::{InstrumentCache, InstrumentCacheError, InstrumentSource};
pub use reconnect::{ReconnectConfig, ReconnectPolicy};
pub use rest::{AuthError, PrimaryRestClient, RestError};
