//! Instrument Directory Cache
//!
//! Lookup order for the broker's instrument listing:
//!
//! 1. memory, while younger than the TTL
//! 2. `instruments_cache.json` in the cache directory, while younger than the TTL
//! 3. the REST API, after which both levels are refreshed
//!
//! A stale file is ignored, not deleted; the next successful fetch overwrites it.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use super::messages::InstrumentSummary;
use super::rest::{PrimaryRestClient, RestError};
use crate::application::ports::{DirectoryError, InstrumentDirectory};

/// File name of the on-disk cache.
pub const CACHE_FILE_NAME: &str = "instruments_cache.json";

/// Default time to live.
pub const DEFAULT_TTL: Duration = Duration::from_secs(30 * 60);

/// Errors from the instrument cache.
#[derive(Debug, thiserror::Error)]
pub enum InstrumentCacheError {
    /// Fetch from the broker failed.
    #[error("instrument fetch failed: {0}")]
    Fetch(#[from] RestError),

    /// Cache file could not be read or written.
    #[error("instrument cache I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Cache file is not valid JSON.
    #[error("instrument cache is corrupt: {0}")]
    Json(#[from] serde_json::Error),
}

/// Where the instrument listing comes from when no cache level is fresh.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait InstrumentSource: Send + Sync {
    /// Fetch the full listing.
    async fn fetch_listing(&self) -> Result<Vec<InstrumentSummary>, RestError>;
}

#[async_trait]
impl InstrumentSource for PrimaryRestClient {
    async fn fetch_listing(&self) -> Result<Vec<InstrumentSummary>, RestError> {
        Ok(self.fetch_instruments().await?.instruments)
    }
}

/// On-disk cache layout.
#[derive(Debug, Serialize, Deserialize)]
struct CacheFile {
    timestamp: DateTime<Utc>,
    ttl_minutes: u64,
    count: usize,
    instruments: Vec<InstrumentSummary>,
}

#[derive(Debug, Clone)]
struct Listing {
    fetched_at: DateTime<Utc>,
    instruments: Arc<Vec<InstrumentSummary>>,
}

/// Which level answered the last lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheLevel {
    /// In-process copy.
    Memory,
    /// Cache file.
    File,
    /// Broker API.
    Api,
}

/// Multi-level instrument listing cache.
pub struct InstrumentCache {
    source: Arc<dyn InstrumentSource>,
    cache_file: PathBuf,
    ttl: Duration,
    memory: Mutex<Option<Listing>>,
}

impl std::fmt::Debug for InstrumentCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InstrumentCache")
            .field("cache_file", &self.cache_file)
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}

impl InstrumentCache {
    /// Create a cache storing its file in `cache_dir`.
    #[must_use]
    pub fn new(source: Arc<dyn InstrumentSource>, cache_dir: &Path, ttl: Duration) -> Self {
        Self {
            source,
            cache_file: cache_dir.join(CACHE_FILE_NAME),
            ttl,
            memory: Mutex::new(None),
        }
    }

    /// Path of the cache file.
    #[must_use]
    pub fn cache_file(&self) -> &Path {
        &self.cache_file
    }

    /// Current listing and the level that produced it.
    ///
    /// # Errors
    ///
    /// Returns [`InstrumentCacheError::Fetch`] when no cache level is fresh
    /// and the API call fails. A failure to write the cache file is logged,
    /// not returned.
    pub async fn instruments(
        &self,
    ) -> Result<(Arc<Vec<InstrumentSummary>>, CacheLevel), InstrumentCacheError> {
        let now = Utc::now();

        let cached = self.memory.lock().clone();
        if let Some(listing) = cached
            && self.is_fresh(listing.fetched_at, now)
        {
            return Ok((listing.instruments, CacheLevel::Memory));
        }

        match self.read_file(now).await {
            Ok(Some(listing)) => {
                tracing::info!(
                    count = listing.instruments.len(),
                    path = %self.cache_file.display(),
                    "Loaded instruments from cache file"
                );
                let instruments = Arc::clone(&listing.instruments);
                *self.memory.lock() = Some(listing);
                return Ok((instruments, CacheLevel::File));
            }
            Ok(None) => {}
            Err(e) => {
                tracing::warn!(error = %e, path = %self.cache_file.display(), "Ignoring unreadable instrument cache");
            }
        }

        let instruments = Arc::new(self.source.fetch_listing().await?);
        tracing::info!(count = instruments.len(), "Fetched instruments from broker");

        let listing = Listing {
            fetched_at: now,
            instruments: Arc::clone(&instruments),
        };
        if let Err(e) = self.write_file(&listing).await {
            tracing::warn!(error = %e, path = %self.cache_file.display(), "Could not write instrument cache");
        }
        *self.memory.lock() = Some(listing);

        Ok((instruments, CacheLevel::Api))
    }

    /// Drop both cache levels.
    #[cfg(test)]
    async fn clear(&self) -> Result<(), InstrumentCacheError> {
        *self.memory.lock() = None;
        match tokio::fs::remove_file(&self.cache_file).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn is_fresh(&self, fetched_at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        (now - fetched_at)
            .to_std()
            .map_or(true, |age| age <= self.ttl)
    }

    async fn read_file(&self, now: DateTime<Utc>) -> Result<Option<Listing>, InstrumentCacheError> {
        let bytes = match tokio::fs::read(&self.cache_file).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let file: CacheFile = serde_json::from_slice(&bytes)?;

        if !self.is_fresh(file.timestamp, now) {
            tracing::info!(
                cached_at = %file.timestamp,
                ttl_minutes = self.ttl.as_secs() / 60,
                "Instrument cache file expired"
            );
            return Ok(None);
        }

        Ok(Some(Listing {
            fetched_at: file.timestamp,
            instruments: Arc::new(file.instruments),
        }))
    }

    async fn write_file(&self, listing: &Listing) -> Result<(), InstrumentCacheError> {
        let file = CacheFile {
            timestamp: listing.fetched_at,
            ttl_minutes: self.ttl.as_secs() / 60,
            count: listing.instruments.len(),
            instruments: listing.instruments.as_ref().clone(),
        };
        let json = serde_json::to_vec_pretty(&file)?;

        if let Some(dir) = self.cache_file.parent() {
            tokio::fs::create_dir_all(dir).await?;
        }
        let tmp = self.cache_file.with_extension("json.tmp");
        tokio::fs::write(&tmp, json).await?;
        tokio::fs::rename(&tmp, &self.cache_file).await?;
        Ok(())
    }
}

#[async_trait]
impl InstrumentDirectory for InstrumentCache {
    async fn listed_symbols(&self) -> Result<HashSet<String>, DirectoryError> {
        let (instruments, level) = self
            .instruments()
            .await
            .map_err(|e| DirectoryError(e.to_string()))?;
        tracing::debug!(?level, count = instruments.len(), "Instrument listing ready");
        Ok(instruments
            .iter()
            .map(|i| i.instrument_id.symbol.clone())
            .collect())
    }
}
