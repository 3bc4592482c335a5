//! Execution log.
//!
//! One JSON document per finished run, named by its execution id. Recent
//! records are cached in memory; lookups that miss the cache fall back to
//! disk, so records from before a restart remain readable.

use crate::snapshot::{self, SnapshotError};
use indexmap::IndexMap;
use kiln_core::{ExecutionId, ExecutionRecord};
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;

/// Directory under the data root holding execution records
pub const EXECUTIONS_DIR: &str = "executions";

/// Default number of records kept in the read cache
pub const DEFAULT_CACHE_CAPACITY: usize = 1024;

/// Execution log error
#[derive(Debug, thiserror::Error)]
pub enum ExecutionLogError {
    /// No record with this id
    #[error("Execution not found: {id}")]
    NotFound {
        /// Requested id
        id: ExecutionId,
    },

    /// A record with this id was already persisted
    #[error("Execution already recorded: {id}")]
    AlreadyExists {
        /// Conflicting id
        id: ExecutionId,
    },

    /// Only finished runs are persisted
    #[error("Execution {id} is still running")]
    NotFinished {
        /// Offending id
        id: ExecutionId,
    },

    /// Record could not be read or written
    #[error("Execution log storage failure: {0}")]
    Storage(#[from] SnapshotError),
}

/// Append-only, file-per-record execution log with a bounded read cache
pub struct ExecutionLog {
    /// Record directory
    dir: PathBuf,
    /// Cache capacity
    capacity: usize,
    /// Recently saved or loaded records, oldest first
    cache: RwLock<IndexMap<ExecutionId, ExecutionRecord>>,
}

impl ExecutionLog {
    /// Open the log stored under `data_dir`
    ///
    /// # Errors
    ///
    /// Returns error if the record directory cannot be created
    pub async fn open(data_dir: &Path) -> Result<Self, ExecutionLogError> {
        Self::with_capacity(data_dir, DEFAULT_CACHE_CAPACITY).await
    }

    /// Open with a custom cache capacity
    ///
    /// # Errors
    ///
    /// Returns error if the record directory cannot be created
    pub async fn with_capacity(
        data_dir: &Path,
        capacity: usize,
    ) -> Result<Self, ExecutionLogError> {
        let dir = data_dir.join(EXECUTIONS_DIR);
        snapshot::ensure_dir(&dir).await?;
        Ok(Self {
            dir,
            capacity: capacity.max(1),
            cache: RwLock::new(IndexMap::new()),
        })
    }

    /// Persist a finished record. Each id is written at most once.
    ///
    /// # Errors
    ///
    /// Returns `NotFinished` for a `running` record, `AlreadyExists` if the
    /// id was already persisted, or `Storage` on IO failure
    pub async fn save(&self, record: &ExecutionRecord) -> Result<(), ExecutionLogError> {
        if !record.status.is_terminal() {
            return Err(ExecutionLogError::NotFinished {
                id: record.id.clone(),
            });
        }

        let path = self.record_path(&record.id);
        match snapshot::write_new(&path, record).await {
            Ok(()) => {}
            Err(SnapshotError::Io { source, .. })
                if source.kind() == std::io::ErrorKind::AlreadyExists =>
            {
                return Err(ExecutionLogError::AlreadyExists {
                    id: record.id.clone(),
                });
            }
            Err(e) => return Err(e.into()),
        }

        self.remember(record.clone()).await;
        tracing::debug!(execution_id = %record.id, status = %record.status, "execution recorded");
        Ok(())
    }

    /// Look up a record, consulting the cache before disk
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if no record exists, or `Storage` if the file
    /// cannot be read or decoded
    pub async fn get(&self, id: &ExecutionId) -> Result<ExecutionRecord, ExecutionLogError> {
        if let Some(record) = self.cache.read().await.get(id) {
            return Ok(record.clone());
        }

        let record: ExecutionRecord = snapshot::read_optional(&self.record_path(id))
            .await?
            .ok_or_else(|| ExecutionLogError::NotFound { id: id.clone() })?;

        self.remember(record.clone()).await;
        Ok(record)
    }

    /// Number of cached records
    pub async fn cached(&self) -> usize {
        self.cache.read().await.len()
    }

    /// File holding the record for `id`
    #[must_use]
    pub fn record_path(&self, id: &ExecutionId) -> PathBuf {
        self.dir.join(format!("{}.json", id))
    }

    async fn remember(&self, record: ExecutionRecord) {
        let mut cache = self.cache.write().await;
        cache.insert(record.id.clone(), record);
        while cache.len() > self.capacity {
            cache.shift_remove_index(0);
        }
    }
}
