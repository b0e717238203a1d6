//! In-process attempt store backed by a concurrent map of JSON documents.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::{DashMap, mapref::entry::Entry};

use crate::{
    Error,
    error::StorageError,
    repositories::AttemptStore,
    storage::{AttemptRecord, FailureUpdate},
};

/// Attempt store that keeps serialized records in memory.
///
/// Records are held as JSON strings, so a value that does not decode is
/// handled exactly as a persisted one would be: it reads as absent.
/// [`record_failure`](AttemptStore::record_failure) holds the entry's lock for
/// the whole read-modify-write, which makes increments atomic within the process.
#[derive(Debug, Default)]
pub struct InMemoryAttemptStore {
    entries: DashMap<String, String>,
}

impl InMemoryAttemptStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn decode(key: &str, raw: &str) -> Option<AttemptRecord> {
    match serde_json::from_str(raw) {
        Ok(record) => Some(record),
        Err(e) => {
            tracing::warn!(key = key, error = %e, "Ignoring malformed attempt record");
            None
        }
    }
}

fn encode(record: &AttemptRecord) -> Result<String, Error> {
    serde_json::to_string(record).map_err(|e| {
        tracing::error!(error = %e, "Failed to serialize attempt record");
        StorageError::Serialization("Failed to serialize attempt record".to_string()).into()
    })
}

#[async_trait]
impl AttemptStore for InMemoryAttemptStore {
    async fn get(&self, key: &str) -> Result<Option<AttemptRecord>, Error> {
        Ok(self
            .entries
            .get(key)
            .and_then(|raw| decode(key, raw.value())))
    }

    async fn put(&self, key: &str, record: &AttemptRecord) -> Result<(), Error> {
        let raw = encode(record)?;
        self.entries.insert(key.to_string(), raw);
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), Error> {
        self.entries.remove(key);
        Ok(())
    }

    async fn record_failure(
        &self,
        key: &str,
        update: &FailureUpdate,
    ) -> Result<AttemptRecord, Error> {
        match self.entries.entry(key.to_string()) {
            Entry::Occupied(mut entry) => {
                let existing = decode(key, entry.get());
                let record = AttemptRecord::apply_failure(existing, update);
                entry.insert(encode(&record)?);
                Ok(record)
            }
            Entry::Vacant(entry) => {
                let record = AttemptRecord::apply_failure(None, update);
                entry.insert(encode(&record)?);
                Ok(record)
            }
        }
    }

    async fn purge_stale(&self, before: DateTime<Utc>, now: DateTime<Utc>) -> Result<u64, Error> {
        let mut purged = 0;
        self.entries.retain(|key, raw| {
            let keep = decode(key, raw)
                .is_some_and(|record| record.last_attempt_at >= before || record.is_locked_at(now));
            if !keep {
                purged += 1;
            }
            keep
        });
        Ok(purged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use std::sync::Arc;

    fn t0() -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000, 0).unwrap()
    }

    fn update(identifier: &str, at: DateTime<Utc>) -> FailureUpdate {
        FailureUpdate {
            identifier: identifier.to_string(),
            at,
            max_attempts: 5,
            lockout_duration: Duration::minutes(15),
            reset_after_lock_expiry: false,
        }
    }

    fn record(identifier: &str, failure_count: u32) -> AttemptRecord {
        AttemptRecord {
            identifier: identifier.to_string(),
            failure_count,
            last_attempt_at: t0(),
            locked_until: None,
        }
    }

    #[tokio::test]
    async fn test_put_get_remove() {
        let store = InMemoryAttemptStore::new();
        assert!(store.get("login_attempts_a@b.com").await.unwrap().is_none());

        let stored = record("a@b.com", 2);
        store.put("login_attempts_a@b.com", &stored).await.unwrap();
        assert_eq!(
            store.get("login_attempts_a@b.com").await.unwrap(),
            Some(stored)
        );

        store.remove("login_attempts_a@b.com").await.unwrap();
        assert!(store.get("login_attempts_a@b.com").await.unwrap().is_none());
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_remove_missing_key_is_ok() {
        let store = InMemoryAttemptStore::new();
        assert!(store.remove("login_attempts_nobody").await.is_ok());
    }

    #[tokio::test]
    async fn test_malformed_value_reads_as_absent() {
        let _ = tracing_subscriber::fmt().try_init();
        let store = InMemoryAttemptStore::new();

        for raw in ["not json", "{}", r#"{"identifier":"a@b.com","failureCount":-1}"#] {
            store
                .entries
                .insert("login_attempts_a@b.com".to_string(), raw.to_string());
            assert!(
                store.get("login_attempts_a@b.com").await.unwrap().is_none(),
                "{raw} should read as absent"
            );
        }
    }

    #[tokio::test]
    async fn test_record_failure_over_malformed_value_starts_fresh() {
        let store = InMemoryAttemptStore::new();
        store
            .entries
            .insert("login_attempts_a@b.com".to_string(), "garbage".to_string());

        let record = store
            .record_failure("login_attempts_a@b.com", &update("a@b.com", t0()))
            .await
            .unwrap();
        assert_eq!(record.failure_count, 1);
        assert_eq!(
            store.get("login_attempts_a@b.com").await.unwrap(),
            Some(record)
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_failures_are_not_lost() {
        let store = Arc::new(InMemoryAttemptStore::new());

        let tasks: Vec<_> = (0..50)
            .map(|_| {
                let store = Arc::clone(&store);
                tokio::spawn(async move {
                    store
                        .record_failure("login_attempts_a@b.com", &update("a@b.com", t0()))
                        .await
                        .unwrap();
                })
            })
            .collect();
        for task in tasks {
            task.await.unwrap();
        }

        let record = store.get("login_attempts_a@b.com").await.unwrap().unwrap();
        assert_eq!(record.failure_count, 50);
        assert!(record.locked_until.is_some());
    }

    #[tokio::test]
    async fn test_purge_stale_keeps_recent_and_locked_records() {
        let store = InMemoryAttemptStore::new();
        let now = t0() + Duration::days(10);

        store.put("k_old", &record("old", 1)).await.unwrap();
        store
            .put(
                "k_recent",
                &AttemptRecord {
                    last_attempt_at: now - Duration::hours(1),
                    ..record("recent", 1)
                },
            )
            .await
            .unwrap();
        store
            .put(
                "k_locked",
                &AttemptRecord {
                    locked_until: Some(now + Duration::minutes(5)),
                    ..record("locked", 5)
                },
            )
            .await
            .unwrap();
        store
            .entries
            .insert("k_garbage".to_string(), "garbage".to_string());

        let purged = store
            .purge_stale(now - Duration::days(7), now)
            .await
            .unwrap();

        assert_eq!(purged, 2);
        assert!(store.get("k_old").await.unwrap().is_none());
        assert!(store.get("k_recent").await.unwrap().is_some());
        assert!(store.get("k_locked").await.unwrap().is_some());
        assert_eq!(store.len(), 2);
    }
}
