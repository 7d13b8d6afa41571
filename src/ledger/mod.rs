//! Durable, thread-safe record of completed downloads.
//!
//! The ledger is the long-lived truth about what has been downloaded,
//! independent of any in-memory orchestration state. Every operation
//! serializes through one internal async mutex even though the SQLite pool
//! has locking of its own: read-then-compute sequences such as stats
//! aggregation are only atomic if the ledger itself scopes them, and
//! relying on storage-engine locking alone is how the predecessor of this
//! code raced.
//!
//! Lock waits are bounded. A caller that cannot take the ledger lock within
//! a few seconds gets [`LedgerError::Contended`] back, a retryable error,
//! instead of blocking a download worker forever.

use std::sync::Arc;
use std::time::Duration;

use sqlx::FromRow;
use tokio::sync::{Mutex, MutexGuard};
use tracing::instrument;

use crate::db::Database;

/// Upper bound on waiting for the ledger's internal lock.
const LOCK_WAIT: Duration = Duration::from_secs(5);

/// Error type for ledger operations.
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    /// The internal lock could not be acquired within [`LOCK_WAIT`].
    /// Retryable: the holder is another download finishing its bookkeeping.
    #[error("ledger busy: could not acquire write lock within {}s", LOCK_WAIT.as_secs())]
    Contended,

    /// Underlying database failure.
    #[error("ledger database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// A persisted completed-download row.
#[derive(Debug, Clone, FromRow)]
pub struct LedgerRecord {
    /// Canonical identity of the downloaded artifact.
    pub resource_url: String,
    /// Bundle the artifact belongs to.
    pub collection_key: String,
    /// Recorded filename.
    pub filename: String,
    /// Human-readable size, when known.
    pub file_size: Option<String>,
    /// Completion timestamp in `SQLite` datetime text format.
    pub completed_at: String,
    /// Local path the artifact was saved to, when known.
    pub local_path: Option<String>,
    /// Total items known to exist in the collection, cached at completion
    /// time so stats never re-query the source tool.
    pub collection_total_count: Option<i64>,
}

/// Insert payload for marking one download complete.
#[derive(Debug, Clone)]
pub struct CompletedDownload<'a> {
    /// Canonical identity of the downloaded artifact.
    pub resource_url: &'a str,
    /// Bundle the artifact belongs to.
    pub collection_key: &'a str,
    /// Filename to record.
    pub filename: &'a str,
    /// Human-readable size, when known.
    pub file_size: Option<&'a str>,
    /// Local path the artifact was saved to, when known.
    pub local_path: Option<&'a str>,
    /// Total items in the collection, when known.
    pub collection_total_count: Option<i64>,
}

/// Download statistics for one collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CollectionStats {
    /// Completed downloads recorded for the collection.
    pub completed: u64,
    /// Items not yet downloaded; `None` when no total was ever recorded.
    pub remaining: Option<u64>,
    /// Total items in the collection; `None` when never recorded.
    pub total: Option<u64>,
}

/// Durable completed-download store shared by all download workers.
///
/// Cloning is cheap and clones share both the storage handle and the
/// serializing lock. The storage backend is chosen at construction
/// ([`Database::new`] for a file, [`Database::new_in_memory`] for tests)
/// without any difference at call sites.
#[derive(Debug, Clone)]
pub struct Ledger {
    db: Database,
    guard: Arc<Mutex<()>>,
}

impl Ledger {
    /// Creates a ledger over the given database.
    #[must_use]
    pub fn new(db: Database) -> Self {
        Self {
            db,
            guard: Arc::new(Mutex::new(())),
        }
    }

    /// Records a completed download, overwriting any prior row with the
    /// same `resource_url`.
    ///
    /// Idempotent: repeating the upsert never duplicates a row.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::Contended`] if the ledger lock cannot be
    /// taken within the bounded wait, or [`LedgerError::Database`] on query
    /// failure.
    #[instrument(skip(self, download), fields(resource_url = %download.resource_url))]
    pub async fn upsert(&self, download: &CompletedDownload<'_>) -> Result<(), LedgerError> {
        let _guard = self.serialize().await?;

        sqlx::query(
            r"INSERT OR REPLACE INTO downloads
                (resource_url, collection_key, filename, file_size,
                 completed_at, local_path, collection_total_count)
              VALUES (?, ?, ?, ?, datetime('now'), ?, ?)",
        )
        .bind(download.resource_url)
        .bind(download.collection_key)
        .bind(download.filename)
        .bind(download.file_size)
        .bind(download.local_path)
        .bind(download.collection_total_count)
        .execute(self.db.pool())
        .await?;

        Ok(())
    }

    /// Returns `true` if a completed download is recorded for `resource_url`.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::Contended`] on bounded-wait expiry or
    /// [`LedgerError::Database`] on query failure.
    #[instrument(skip(self))]
    pub async fn is_completed(&self, resource_url: &str) -> Result<bool, LedgerError> {
        let _guard = self.serialize().await?;

        let row: Option<(i64,)> =
            sqlx::query_as("SELECT 1 FROM downloads WHERE resource_url = ?")
                .bind(resource_url)
                .fetch_optional(self.db.pool())
                .await?;

        Ok(row.is_some())
    }

    /// Returns completed/remaining/total statistics for one collection.
    ///
    /// `remaining` and `total` are `None` when no completion ever recorded
    /// the collection's total count. `remaining` clamps at zero: a stale
    /// total smaller than the completed count does not go negative.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::Contended`] on bounded-wait expiry or
    /// [`LedgerError::Database`] on query failure.
    #[instrument(skip(self))]
    pub async fn stats_for(&self, collection_key: &str) -> Result<CollectionStats, LedgerError> {
        let _guard = self.serialize().await?;

        let (completed, total): (i64, Option<i64>) = sqlx::query_as(
            r"SELECT COUNT(*), MAX(collection_total_count)
              FROM downloads WHERE collection_key = ?",
        )
        .bind(collection_key)
        .fetch_one(self.db.pool())
        .await?;

        let completed = u64::try_from(completed).unwrap_or(0);
        let total = total.and_then(|value| u64::try_from(value).ok());

        Ok(CollectionStats {
            completed,
            remaining: total.map(|total| total.saturating_sub(completed)),
            total,
        })
    }

    /// Returns the total number of completed downloads across all
    /// collections.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::Contended`] on bounded-wait expiry or
    /// [`LedgerError::Database`] on query failure.
    #[instrument(skip(self))]
    pub async fn total_completed(&self) -> Result<u64, LedgerError> {
        let _guard = self.serialize().await?;

        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM downloads")
            .fetch_one(self.db.pool())
            .await?;

        Ok(u64::try_from(count).unwrap_or(0))
    }

    /// Returns the sorted list of collection keys with recorded downloads.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::Contended`] on bounded-wait expiry or
    /// [`LedgerError::Database`] on query failure.
    #[instrument(skip(self))]
    pub async fn tracked_collections(&self) -> Result<Vec<String>, LedgerError> {
        let _guard = self.serialize().await?;

        let keys: Vec<(String,)> = sqlx::query_as(
            "SELECT DISTINCT collection_key FROM downloads ORDER BY collection_key",
        )
        .fetch_all(self.db.pool())
        .await?;

        Ok(keys.into_iter().map(|(key,)| key).collect())
    }

    /// Returns recorded downloads, optionally filtered to one collection.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::Contended`] on bounded-wait expiry or
    /// [`LedgerError::Database`] on query failure.
    #[instrument(skip(self))]
    pub async fn records(
        &self,
        collection_key: Option<&str>,
    ) -> Result<Vec<LedgerRecord>, LedgerError> {
        let _guard = self.serialize().await?;

        let records = sqlx::query_as::<_, LedgerRecord>(
            r"SELECT resource_url, collection_key, filename, file_size,
                     completed_at, local_path, collection_total_count
              FROM downloads
              WHERE (?1 IS NULL OR collection_key = ?1)
              ORDER BY completed_at DESC, resource_url",
        )
        .bind(collection_key)
        .fetch_all(self.db.pool())
        .await?;

        Ok(records)
    }

    async fn serialize(&self) -> Result<MutexGuard<'_, ()>, LedgerError> {
        tokio::time::timeout(LOCK_WAIT, self.guard.lock())
            .await
            .map_err(|_| LedgerError::Contended)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    async fn test_ledger() -> Ledger {
        let db = Database::new_in_memory().await.unwrap();
        Ledger::new(db)
    }

    fn record<'a>(resource_url: &'a str, collection: &'a str) -> CompletedDownload<'a> {
        CompletedDownload {
            resource_url,
            collection_key: collection,
            filename: "item_1.epub",
            file_size: None,
            local_path: None,
            collection_total_count: None,
        }
    }

    #[tokio::test]
    async fn test_upsert_then_is_completed() {
        let ledger = test_ledger().await;

        assert!(!ledger.is_completed("bundle_1_epub").await.unwrap());
        ledger.upsert(&record("bundle_1_epub", "bundle")).await.unwrap();
        assert!(ledger.is_completed("bundle_1_epub").await.unwrap());
    }

    #[tokio::test]
    async fn test_upsert_is_idempotent_and_overwrites() {
        let ledger = test_ledger().await;

        ledger.upsert(&record("bundle_1_epub", "bundle")).await.unwrap();
        ledger
            .upsert(&CompletedDownload {
                file_size: Some("3.47 MiB"),
                local_path: Some("/downloads/item_1.epub"),
                ..record("bundle_1_epub", "bundle")
            })
            .await
            .unwrap();

        let records = ledger.records(Some("bundle")).await.unwrap();
        assert_eq!(records.len(), 1, "repeat upsert must overwrite, not duplicate");
        assert_eq!(records[0].file_size.as_deref(), Some("3.47 MiB"));
        assert_eq!(records[0].local_path.as_deref(), Some("/downloads/item_1.epub"));
    }

    #[tokio::test]
    async fn test_stats_without_total_count() {
        let ledger = test_ledger().await;
        ledger.upsert(&record("bundle_1_epub", "bundle")).await.unwrap();
        ledger.upsert(&record("bundle_2_epub", "bundle")).await.unwrap();

        let stats = ledger.stats_for("bundle").await.unwrap();
        assert_eq!(stats.completed, 2);
        assert_eq!(stats.remaining, None);
        assert_eq!(stats.total, None);
    }

    #[tokio::test]
    async fn test_stats_with_total_count() {
        let ledger = test_ledger().await;
        ledger
            .upsert(&CompletedDownload {
                collection_total_count: Some(5),
                ..record("bundle_1_epub", "bundle")
            })
            .await
            .unwrap();

        let stats = ledger.stats_for("bundle").await.unwrap();
        assert_eq!(stats.completed, 1);
        assert_eq!(stats.remaining, Some(4));
        assert_eq!(stats.total, Some(5));
    }

    #[tokio::test]
    async fn test_stats_remaining_clamps_at_zero() {
        let ledger = test_ledger().await;
        for i in 0..3 {
            let url = format!("bundle_{i}_epub");
            ledger
                .upsert(&CompletedDownload {
                    collection_total_count: Some(2),
                    ..record(&url, "bundle")
                })
                .await
                .unwrap();
        }

        let stats = ledger.stats_for("bundle").await.unwrap();
        assert_eq!(stats.completed, 3);
        assert_eq!(stats.remaining, Some(0), "stale total must not go negative");
    }

    #[tokio::test]
    async fn test_stats_for_unknown_collection() {
        let ledger = test_ledger().await;
        let stats = ledger.stats_for("nothing-here").await.unwrap();
        assert_eq!(stats.completed, 0);
        assert_eq!(stats.total, None);
    }

    #[tokio::test]
    async fn test_tracked_collections_sorted_distinct() {
        let ledger = test_ledger().await;
        ledger.upsert(&record("b_1_epub", "zeta")).await.unwrap();
        ledger.upsert(&record("a_1_epub", "alpha")).await.unwrap();
        ledger.upsert(&record("a_2_epub", "alpha")).await.unwrap();

        let collections = ledger.tracked_collections().await.unwrap();
        assert_eq!(collections, vec!["alpha".to_string(), "zeta".to_string()]);
    }

    #[tokio::test]
    async fn test_records_filter_by_collection() {
        let ledger = test_ledger().await;
        ledger.upsert(&record("a_1_epub", "alpha")).await.unwrap();
        ledger.upsert(&record("b_1_epub", "beta")).await.unwrap();

        assert_eq!(ledger.records(Some("alpha")).await.unwrap().len(), 1);
        assert_eq!(ledger.records(None).await.unwrap().len(), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn test_concurrent_upserts_all_recorded() {
        let ledger = test_ledger().await;
        let mut handles = Vec::new();

        for i in 0..100 {
            let ledger = ledger.clone();
            handles.push(tokio::spawn(async move {
                let url = format!("bundle_{i}_epub");
                ledger.upsert(&record(&url, "bundle")).await
            }));
        }

        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert_eq!(ledger.total_completed().await.unwrap(), 100);
        let stats = ledger.stats_for("bundle").await.unwrap();
        assert_eq!(stats.completed, 100);
        assert_eq!(ledger.tracked_collections().await.unwrap(), vec!["bundle".to_string()]);
    }
}
