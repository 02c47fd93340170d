//! Persisted trial record
//!
//! The device holds at most one trial record, stored as three keys (start,
//! end, owner). A record is only ever handed out for its owner; records with
//! unparseable dates are discarded.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, warn};

use super::types::TrialRecord;
use crate::storage::{
    KeyValueStore, StorageError, KEY_TRIAL_END, KEY_TRIAL_OWNER, KEY_TRIAL_START,
};

const TRIAL_KEYS: [&str; 3] = [KEY_TRIAL_START, KEY_TRIAL_END, KEY_TRIAL_OWNER];

/// Reads and writes the trial record
pub struct TrialStore {
    store: Arc<dyn KeyValueStore>,
}

impl TrialStore {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    /// Owner of the stored trial, if any
    pub async fn owner(&self) -> Result<Option<String>, StorageError> {
        self.store.get(KEY_TRIAL_OWNER).await
    }

    /// Delete the stored trial if it belongs to someone other than `user_id`.
    ///
    /// Returns true when a record was removed.
    pub async fn clear_foreign(&self, user_id: &str) -> Result<bool, StorageError> {
        match self.owner().await? {
            Some(owner) if owner != user_id => {
                debug!(
                    previous_owner = owner.as_str(),
                    user_id = user_id,
                    "Clearing trial owned by another user"
                );
                self.delete().await?;
                Ok(true)
            }
            Some(_) => Ok(false),
            None => {
                // Dates without an owner cannot be attributed to anyone
                if self.store.get(KEY_TRIAL_END).await?.is_some() {
                    warn!("Found trial dates without an owner, discarding");
                    self.delete().await?;
                    return Ok(true);
                }
                Ok(false)
            }
        }
    }

    /// Trial record for `user_id`, or `None` if absent, foreign, or corrupt
    pub async fn read(&self, user_id: &str) -> Result<Option<TrialRecord>, StorageError> {
        let owner = match self.owner().await? {
            Some(owner) if owner == user_id => owner,
            _ => return Ok(None),
        };

        let start = self.store.get(KEY_TRIAL_START).await?;
        let end = self.store.get(KEY_TRIAL_END).await?;

        let (start, end) = match (start, end) {
            (Some(start), Some(end)) => (start, end),
            _ => {
                warn!(user_id = user_id, "Incomplete trial record, discarding");
                self.delete().await?;
                return Ok(None);
            }
        };

        match (parse_instant(&start), parse_instant(&end)) {
            (Some(start_time), Some(end_time)) => Ok(Some(TrialRecord {
                owner_user_id: owner,
                start_time,
                end_time,
            })),
            _ => {
                warn!(
                    user_id = user_id,
                    start = start.as_str(),
                    end = end.as_str(),
                    "Corrupt trial dates, discarding record"
                );
                self.delete().await?;
                Ok(None)
            }
        }
    }

    /// Entries that make up a persisted trial record
    pub fn entries(record: &TrialRecord) -> [(&'static str, String); 3] {
        [
            (KEY_TRIAL_START, record.start_time.to_rfc3339()),
            (KEY_TRIAL_END, record.end_time.to_rfc3339()),
            (KEY_TRIAL_OWNER, record.owner_user_id.clone()),
        ]
    }

    pub async fn write(&self, record: &TrialRecord) -> Result<(), StorageError> {
        self.store.set_many(&Self::entries(record)).await
    }

    pub async fn delete(&self) -> Result<(), StorageError> {
        self.store.remove_many(&TRIAL_KEYS).await
    }
}

fn parse_instant(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;
    use chrono::Duration;

    fn setup() -> (Arc<MemoryStore>, TrialStore) {
        let memory = Arc::new(MemoryStore::new());
        let trials = TrialStore::new(memory.clone());
        (memory, trials)
    }

    #[tokio::test]
    async fn test_write_then_read_for_owner_only() {
        let (_, trials) = setup();
        let record = TrialRecord::start("user_a", Utc::now(), Duration::days(3));
        trials.write(&record).await.unwrap();

        assert_eq!(trials.read("user_a").await.unwrap(), Some(record));
        assert_eq!(trials.read("user_b").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_clear_foreign_removes_other_owner() {
        let (memory, trials) = setup();
        let record = TrialRecord::start("user_a", Utc::now(), Duration::days(3));
        trials.write(&record).await.unwrap();

        assert!(!trials.clear_foreign("user_a").await.unwrap());
        assert!(memory.contains_key(KEY_TRIAL_OWNER));

        assert!(trials.clear_foreign("user_b").await.unwrap());
        assert!(!memory.contains_key(KEY_TRIAL_OWNER));
        assert!(!memory.contains_key(KEY_TRIAL_START));
        assert!(!memory.contains_key(KEY_TRIAL_END));
    }

    #[tokio::test]
    async fn test_ownerless_dates_are_discarded() {
        let (memory, trials) = setup();
        memory.set(KEY_TRIAL_END, "2026-01-04T00:00:00Z").await.unwrap();

        assert!(trials.clear_foreign("user_a").await.unwrap());
        assert!(!memory.contains_key(KEY_TRIAL_END));
    }

    #[tokio::test]
    async fn test_corrupt_dates_are_treated_as_absent() {
        let (memory, trials) = setup();
        memory.set(KEY_TRIAL_OWNER, "user_a").await.unwrap();
        memory.set(KEY_TRIAL_START, "not a date").await.unwrap();
        memory.set(KEY_TRIAL_END, "2026-01-04T00:00:00Z").await.unwrap();

        assert_eq!(trials.read("user_a").await.unwrap(), None);
        assert!(!memory.contains_key(KEY_TRIAL_OWNER));
        assert!(!memory.contains_key(KEY_TRIAL_START));
    }
}
