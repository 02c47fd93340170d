//! Local key-value persistence
//!
//! The billing core persists a handful of string values (trial dates, trial
//! owner, cached status, scan cache entries). Backends implement
//! `KeyValueStore`; SQLite is used on device, the in-memory store in tests and
//! ephemeral sessions.

mod memory;
mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use async_trait::async_trait;
use std::sync::Arc;

/// Key holding the trial start instant (RFC 3339)
pub const KEY_TRIAL_START: &str = "trial_start_date";
/// Key holding the trial end instant (RFC 3339)
pub const KEY_TRIAL_END: &str = "trial_end_date";
/// Key holding the user id that owns the stored trial
pub const KEY_TRIAL_OWNER: &str = "trial_user_id";
/// Key holding the last reconciled status
pub const KEY_SUBSCRIPTION_STATUS: &str = "subscription_status";
/// Prefix for scan cache entries
pub const SCAN_CACHE_PREFIX: &str = "scan_cache:";

/// Storage backend error
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("storage backend error: {0}")]
    Backend(String),

    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

impl StorageError {
    #[inline]
    pub fn backend<E: std::fmt::Display>(err: E) -> Self {
        Self::Backend(err.to_string())
    }
}

impl From<rusqlite::Error> for StorageError {
    fn from(err: rusqlite::Error) -> Self {
        Self::backend(err)
    }
}

/// String-keyed persistent storage
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, StorageError>;

    async fn set(&self, key: &str, value: &str) -> Result<(), StorageError>;

    /// Remove a key. Removing a missing key is not an error.
    async fn remove(&self, key: &str) -> Result<(), StorageError>;

    /// Write several keys together.
    ///
    /// Default implementation writes one by one; backends with transactions
    /// override it to make the batch atomic.
    async fn set_many(&self, entries: &[(&str, String)]) -> Result<(), StorageError> {
        for (key, value) in entries {
            self.set(key, value).await?;
        }
        Ok(())
    }

    /// Remove several keys. Same atomicity caveat as `set_many`.
    async fn remove_many(&self, keys: &[&str]) -> Result<(), StorageError> {
        for key in keys {
            self.remove(key).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl<S: KeyValueStore + ?Sized> KeyValueStore for Arc<S> {
    #[inline]
    async fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        (**self).get(key).await
    }

    #[inline]
    async fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        (**self).set(key, value).await
    }

    #[inline]
    async fn remove(&self, key: &str) -> Result<(), StorageError> {
        (**self).remove(key).await
    }

    #[inline]
    async fn set_many(&self, entries: &[(&str, String)]) -> Result<(), StorageError> {
        (**self).set_many(entries).await
    }

    #[inline]
    async fn remove_many(&self, keys: &[&str]) -> Result<(), StorageError> {
        (**self).remove_many(keys).await
    }
}
