//! Persisted per-series history cache.
//!
//! Every series owns the entries under `{entity}_{fingerprint}` (gzip
//! compressed) or `{entity}_{fingerprint}-raw` (stored as-is). The
//! fingerprint hashes every option that shapes the cached data, so a
//! configuration change never reads an old entry. Entries written by a
//! different crate version are discarded on read and by the startup sweep.
//!
//! | Condition | Read path | Sweep |
//! |-----------|-----------|-------|
//! | version mismatch | removed, full fetch | removed |
//! | covered span starts after the required start | removed, full fetch | kept |
//! | undecodable blob | removed, full fetch | removed |
//! | fetched longer ago than the span it covers | served | removed |

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use moka::future::Cache;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::io::{Read, Write};
use std::sync::Arc;

use crate::chart::{SeriesSpec, SpanSpec};
use crate::engine::ObservationPoint;
use crate::error::{AppError, AppResult};

/// Version stamped into every entry.
pub const FINGERPRINT_VERSION: &str = env!("CARGO_PKG_VERSION");

pub(crate) const RAW_SUFFIX: &str = "-raw";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntry {
    pub fingerprint_version: String,
    /// Earliest instant the stored data is known to cover.
    pub span_covered_from_ms: i64,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub last_fetched_at: DateTime<Utc>,
    pub data: Vec<ObservationPoint>,
}

impl CacheEntry {
    #[must_use]
    pub fn new(span_covered_from_ms: i64, data: Vec<ObservationPoint>) -> Self {
        Self {
            fingerprint_version: FINGERPRINT_VERSION.to_string(),
            span_covered_from_ms,
            last_fetched_at: Utc::now(),
            data,
        }
    }

    #[must_use]
    pub fn is_current_version(&self) -> bool {
        self.fingerprint_version == FINGERPRINT_VERSION
    }

    /// True once the entry was fetched longer ago than the span it covers.
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        let fetched = self.last_fetched_at.timestamp_millis();
        let span = fetched - self.span_covered_from_ms;
        fetched < now.timestamp_millis() - span
    }
}

/// Value as held by a [`PersistentCache`].
#[derive(Debug, Clone)]
pub enum StoredBlob {
    Raw(Arc<CacheEntry>),
    /// Gzip of the JSON-encoded entry.
    Compressed(Arc<Vec<u8>>),
    /// Raw entry read back from storage that did not parse.
    Unreadable(Arc<String>),
}

impl StoredBlob {
    /// Encode an entry in the requested storage form.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Internal` if compression fails.
    pub fn encode(entry: CacheEntry, compressed: bool) -> AppResult<Self> {
        if compressed {
            compress(&entry).map(|bytes| Self::Compressed(Arc::new(bytes)))
        } else {
            Ok(Self::Raw(Arc::new(entry)))
        }
    }

    /// Decode back into an entry.
    ///
    /// # Errors
    ///
    /// Returns `AppError::CacheInvalid` if the stored bytes cannot be read.
    pub fn decode(&self) -> AppResult<CacheEntry> {
        match self {
            Self::Raw(entry) => Ok(entry.as_ref().clone()),
            Self::Compressed(bytes) => decompress(bytes),
            Self::Unreadable(reason) => Err(AppError::CacheInvalid(reason.as_ref().clone())),
        }
    }

    /// Approximate in-memory size, used as the cache weight.
    #[must_use]
    pub fn approx_size(&self) -> usize {
        match self {
            Self::Raw(entry) => 64 + entry.data.len() * std::mem::size_of::<ObservationPoint>(),
            Self::Compressed(bytes) => bytes.len(),
            Self::Unreadable(reason) => reason.len(),
        }
    }
}

/// Asynchronous key/value store holding cache entries.
#[async_trait]
pub trait PersistentCache: Send + Sync {
    async fn get(&self, key: &str) -> AppResult<Option<StoredBlob>>;
    async fn set(&self, key: &str, blob: StoredBlob) -> AppResult<()>;
    async fn remove(&self, key: &str) -> AppResult<()>;
    /// Snapshot of every stored entry.
    async fn entries(&self) -> AppResult<Vec<(String, StoredBlob)>>;
}

/// In-process store weighted by approximate byte size.
#[derive(Clone)]
pub struct MokaStore {
    cache: Cache<String, StoredBlob>,
}

impl MokaStore {
    #[must_use]
    pub fn new(max_bytes: u64) -> Self {
        let cache = Cache::builder()
            .weigher(|_key: &String, value: &StoredBlob| -> u32 {
                value.approx_size().try_into().unwrap_or(u32::MAX)
            })
            .max_capacity(max_bytes)
            .build();
        Self { cache }
    }
}

#[async_trait]
impl PersistentCache for MokaStore {
    async fn get(&self, key: &str) -> AppResult<Option<StoredBlob>> {
        Ok(self.cache.get(key).await)
    }

    async fn set(&self, key: &str, blob: StoredBlob) -> AppResult<()> {
        let size = blob.approx_size();
        self.cache.insert(key.to_string(), blob).await;
        tracing::debug!(cache_key = %key, size_bytes = size, "cache_stored");
        Ok(())
    }

    async fn remove(&self, key: &str) -> AppResult<()> {
        self.cache.invalidate(key).await;
        tracing::debug!(cache_key = %key, "cache_invalidated");
        Ok(())
    }

    async fn entries(&self) -> AppResult<Vec<(String, StoredBlob)>> {
        Ok(self
            .cache
            .iter()
            .map(|(key, value)| (key.as_ref().clone(), value))
            .collect())
    }
}

/// Build the storage key of one series.
#[must_use]
pub fn cache_key(entity: &str, fingerprint: &str, compressed: bool) -> String {
    let suffix = if compressed { "" } else { RAW_SUFFIX };
    format!("{entity}_{fingerprint}{suffix}")
}

/// Hash of everything that shapes a series' cached data.
#[must_use]
pub fn fingerprint(graph_span_ms: i64, series: &SeriesSpec, span: &SpanSpec) -> String {
    let series_json = serde_json::to_string(series).unwrap_or_default();
    let span_json = serde_json::to_string(span).unwrap_or_default();

    let mut hasher = Sha256::new();
    hasher.update(format!("{graph_span_ms}{series_json}{span_json}").as_bytes());
    hex::encode(&hasher.finalize()[..16])
}

fn compress(entry: &CacheEntry) -> AppResult<Vec<u8>> {
    let json = serde_json::to_vec(entry)
        .map_err(|e| AppError::Internal(format!("Cache encoding failed: {e}")))?;

    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(&json)
        .map_err(|e| AppError::Internal(format!("Gzip compression failed: {e}")))?;
    encoder
        .finish()
        .map_err(|e| AppError::Internal(format!("Gzip finish failed: {e}")))
}

fn decompress(bytes: &[u8]) -> AppResult<CacheEntry> {
    let mut decoder = GzDecoder::new(bytes);
    let mut json = Vec::new();
    decoder
        .read_to_end(&mut json)
        .map_err(|e| AppError::CacheInvalid(format!("Gzip decompression failed: {e}")))?;

    serde_json::from_slice(&json)
        .map_err(|e| AppError::CacheInvalid(format!("Cache decoding failed: {e}")))
}

/// Remove undecodable, foreign-version and expired entries.
///
/// Returns the number of removed entries.
///
/// # Errors
///
/// Propagates store failures.
pub async fn sweep(store: &dyn PersistentCache, now: DateTime<Utc>) -> AppResult<usize> {
    let mut removed = 0;
    for (key, blob) in store.entries().await? {
        let reason = match blob.decode() {
            Err(_) => Some("undecodable"),
            Ok(entry) if !entry.is_current_version() => Some("version_mismatch"),
            Ok(entry) if entry.is_expired(now) => Some("expired"),
            Ok(_) => None,
        };
        if let Some(reason) = reason {
            store.remove(&key).await?;
            tracing::debug!(cache_key = %key, reason, "cache_swept");
            removed += 1;
        }
    }

    tracing::info!(removed, "Cache sweep completed");
    Ok(removed)
}
