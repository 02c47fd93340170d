//! Content-addressed cache of food recognition results
//!
//! Entries are keyed by a truncated SHA-256 of the encoded image payload and
//! expire after a fixed retention window. Expired or unreadable entries are
//! deleted when read.
//!
//! Only the first `HASH_PREFIX_LEN` bytes of the payload are hashed. Two
//! images that differ only after that prefix share a key; this is a known
//! limitation accepted for hashing speed on large photos.

use base64::{engine::general_purpose::STANDARD, Engine};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::clock::Clock;
use crate::error::BillingError;
use crate::storage::{KeyValueStore, SCAN_CACHE_PREFIX};

/// Bytes of the encoded payload that feed the hash
pub const HASH_PREFIX_LEN: usize = 8 * 1024;

/// Bytes of the digest kept in the key
const HASH_BYTES: usize = 8;

/// One recognised food item
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DetectedFood {
    pub name: String,
    pub calories: f64,
    pub protein_g: f64,
    pub carbs_g: f64,
    pub fat_g: f64,
    pub serving: Option<String>,
    /// 0.0 - 1.0
    pub confidence: f32,
}

/// Recognition result for one photo
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanResult {
    pub foods: Vec<DetectedFood>,
    pub total_calories: f64,
    /// Model or service that produced the result
    pub recognised_by: Option<String>,
}

impl ScanResult {
    pub fn new(foods: Vec<DetectedFood>, recognised_by: Option<String>) -> Self {
        let total_calories = foods.iter().map(|f| f.calories).sum();
        Self {
            foods,
            total_calories,
            recognised_by,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CacheEntry {
    result: ScanResult,
    cached_at: DateTime<Utc>,
}

/// Hash of an already-encoded (base64) image payload
pub fn image_hash(encoded_payload: &str) -> String {
    let bytes = encoded_payload.as_bytes();
    let prefix = &bytes[..bytes.len().min(HASH_PREFIX_LEN)];

    let mut hasher = Sha256::new();
    hasher.update(prefix);
    let hash = hasher.finalize();
    hex::encode(&hash[..HASH_BYTES])
}

/// Hash of raw image bytes, encoded the same way the recognition request is
pub fn image_hash_bytes(raw: &[u8]) -> String {
    // Only the prefix is hashed, so only encode enough input to cover it
    let needed = (HASH_PREFIX_LEN / 4) * 3;
    let encoded = STANDARD.encode(&raw[..raw.len().min(needed)]);
    image_hash(&encoded)
}

fn cache_key(hash: &str) -> String {
    format!("{}{}", SCAN_CACHE_PREFIX, hash)
}

/// Scan result cache over the key-value store
pub struct ScanCache {
    store: Arc<dyn KeyValueStore>,
    clock: Arc<dyn Clock>,
    retention: Duration,
}

impl ScanCache {
    pub fn new(store: Arc<dyn KeyValueStore>, clock: Arc<dyn Clock>, retention: Duration) -> Self {
        Self {
            store,
            clock,
            retention,
        }
    }

    /// Cached result for `hash`, or `None` if missing or expired
    pub async fn get(&self, hash: &str) -> Result<Option<ScanResult>, BillingError> {
        let key = cache_key(hash);
        let Some(raw) = self.store.get(&key).await? else {
            return Ok(None);
        };

        let entry = match serde_json::from_str::<CacheEntry>(&raw) {
            Ok(entry) => entry,
            Err(e) => {
                warn!(hash = hash, error = %e, "Dropping unreadable scan cache entry");
                self.store.remove(&key).await?;
                return Ok(None);
            }
        };

        let age = self.clock.now() - entry.cached_at;
        if age >= self.retention {
            debug!(hash = hash, age_hours = age.num_hours(), "Scan cache entry expired");
            self.store.remove(&key).await?;
            return Ok(None);
        }

        debug!(hash = hash, "Scan cache hit");
        Ok(Some(entry.result))
    }

    pub async fn put(&self, hash: &str, result: &ScanResult) -> Result<(), BillingError> {
        let entry = CacheEntry {
            result: result.clone(),
            cached_at: self.clock.now(),
        };
        let json = serde_json::to_string(&entry)?;
        self.store.set(&cache_key(hash), &json).await?;
        debug!(hash = hash, foods = result.foods.len(), "Cached scan result");
        Ok(())
    }

    pub async fn remove(&self, hash: &str) -> Result<(), BillingError> {
        self.store.remove(&cache_key(hash)).await?;
        Ok(())
    }
}
