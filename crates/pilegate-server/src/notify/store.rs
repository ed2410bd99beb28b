//! Persistent retry queue.
//!
//! Failed deliveries are parked here until they come due. The store is
//! ordered by due time so the retry worker pops ripe records cheaply; the
//! redb implementation survives process restarts.

use std::{
    fmt,
    path::Path,
    sync::{Arc, Mutex},
};

use pilegate_core::Notification;
use redb::{Database, ReadableTable, ReadableTableMetadata, TableDefinition};
use serde::{Deserialize, Serialize};

/// Table: retry records.
/// Key: `next_attempt_secs (u64 BE)` + `event_id` + `0x00` + `endpoint`
/// Value: JSON-encoded `RetryRecord`
const RETRY: TableDefinition<&[u8], &[u8]> = TableDefinition::new("retry");

/// One parked delivery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryRecord {
    /// The event awaiting redelivery.
    pub notification: Notification,
    /// Endpoint name the delivery failed against.
    pub endpoint: String,
    /// Attempts made so far (the initial delivery counts as one).
    pub attempts: u32,
    /// Unix seconds when the record becomes due.
    pub next_attempt_secs: u64,
    /// Unix seconds of the first failure, for the age cap.
    pub first_failed_secs: u64,
}

impl RetryRecord {
    fn key(&self) -> Vec<u8> {
        let mut key =
            Vec::with_capacity(8 + self.notification.event_id.len() + 1 + self.endpoint.len());
        key.extend_from_slice(&self.next_attempt_secs.to_be_bytes());
        key.extend_from_slice(self.notification.event_id.as_bytes());
        key.push(0);
        key.extend_from_slice(self.endpoint.as_bytes());
        key
    }
}

/// Retry-store failures.
#[derive(Debug)]
pub enum StoreError {
    /// Underlying database or file I/O failed.
    Io(String),
    /// A record did not (de)serialize.
    Serde(String),
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(msg) => write!(f, "retry store I/O error: {msg}"),
            Self::Serde(msg) => write!(f, "retry store serialization error: {msg}"),
        }
    }
}

impl std::error::Error for StoreError {}

/// Ordered, restart-safe parking lot for failed deliveries.
///
/// Implementations share state across clones via `Arc`; all methods take
/// `&self` so the store can sit behind a trait object.
pub trait RetryStore: Send + Sync + 'static {
    /// Park a record.
    fn push(&self, record: &RetryRecord) -> Result<(), StoreError>;

    /// Remove and return up to `limit` records due at or before `now_secs`.
    fn pop_due(&self, now_secs: u64, limit: usize) -> Result<Vec<RetryRecord>, StoreError>;

    /// Number of parked records.
    fn len(&self) -> Result<usize, StoreError>;

    /// True when nothing is parked.
    fn is_empty(&self) -> Result<bool, StoreError> {
        Ok(self.len()? == 0)
    }
}

/// In-memory store for tests and persistence-free deployments.
#[derive(Debug, Clone, Default)]
pub struct MemoryRetryStore {
    inner: Arc<Mutex<Vec<RetryRecord>>>,
}

impl MemoryRetryStore {
    /// New empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<RetryRecord>> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl RetryStore for MemoryRetryStore {
    fn push(&self, record: &RetryRecord) -> Result<(), StoreError> {
        let mut records = self.lock();
        records.push(record.clone());
        records.sort_by_key(|r| r.next_attempt_secs);
        Ok(())
    }

    fn pop_due(&self, now_secs: u64, limit: usize) -> Result<Vec<RetryRecord>, StoreError> {
        let mut records = self.lock();
        let due = records.iter().take_while(|r| r.next_attempt_secs <= now_secs).count();
        Ok(records.drain(..due.min(limit)).collect())
    }

    fn len(&self) -> Result<usize, StoreError> {
        Ok(self.lock().len())
    }
}

/// Redb-backed store; records survive restarts.
#[derive(Clone)]
pub struct RedbRetryStore {
    db: Arc<Database>,
}

impl RedbRetryStore {
    /// Open or create the database at `path`.
    ///
    /// # Errors
    ///
    /// `Io` when the database cannot be opened or the table created.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let db = Database::create(path.as_ref()).map_err(|e| StoreError::Io(e.to_string()))?;

        let txn = db.begin_write().map_err(|e| StoreError::Io(e.to_string()))?;
        {
            let _ = txn.open_table(RETRY).map_err(|e| StoreError::Io(e.to_string()))?;
        }
        txn.commit().map_err(|e| StoreError::Io(e.to_string()))?;

        Ok(Self { db: Arc::new(db) })
    }
}

impl RetryStore for RedbRetryStore {
    fn push(&self, record: &RetryRecord) -> Result<(), StoreError> {
        let value = serde_json::to_vec(record).map_err(|e| StoreError::Serde(e.to_string()))?;
        let key = record.key();

        let txn = self.db.begin_write().map_err(|e| StoreError::Io(e.to_string()))?;
        {
            let mut table = txn.open_table(RETRY).map_err(|e| StoreError::Io(e.to_string()))?;
            table
                .insert(key.as_slice(), value.as_slice())
                .map_err(|e| StoreError::Io(e.to_string()))?;
        }
        txn.commit().map_err(|e| StoreError::Io(e.to_string()))?;

        Ok(())
    }

    fn pop_due(&self, now_secs: u64, limit: usize) -> Result<Vec<RetryRecord>, StoreError> {
        let upper = now_secs
            .checked_add(1)
            .map_or_else(|| vec![0xFF; 9], |t| t.to_be_bytes().to_vec());

        let txn = self.db.begin_write().map_err(|e| StoreError::Io(e.to_string()))?;
        let mut out = Vec::new();
        {
            let mut table = txn.open_table(RETRY).map_err(|e| StoreError::Io(e.to_string()))?;

            let mut keys: Vec<Vec<u8>> = Vec::new();
            for entry in table
                .range(..upper.as_slice())
                .map_err(|e| StoreError::Io(e.to_string()))?
            {
                if keys.len() >= limit {
                    break;
                }
                let (key, value) = entry.map_err(|e| StoreError::Io(e.to_string()))?;
                let record: RetryRecord = serde_json::from_slice(value.value())
                    .map_err(|e| StoreError::Serde(e.to_string()))?;
                keys.push(key.value().to_vec());
                out.push(record);
            }

            for key in keys {
                table.remove(key.as_slice()).map_err(|e| StoreError::Io(e.to_string()))?;
            }
        }
        txn.commit().map_err(|e| StoreError::Io(e.to_string()))?;

        Ok(out)
    }

    fn len(&self) -> Result<usize, StoreError> {
        let txn = self.db.begin_read().map_err(|e| StoreError::Io(e.to_string()))?;
        let table = txn.open_table(RETRY).map_err(|e| StoreError::Io(e.to_string()))?;
        let len = table.len().map_err(|e| StoreError::Io(e.to_string()))?;
        Ok(len as usize)
    }
}

impl fmt::Debug for RedbRetryStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedbRetryStore").finish_non_exhaustive()
    }
}
