//! Intermediate batch storage — JSON spool files keyed by sequence number.
//!
//! Batches are immutable once written and consumed exactly once during the
//! merge. Writes are idempotent per sequence number: the same sequence maps
//! to the same path, and a rewrite replaces the whole file.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::{Result, StorageError};
use crate::types::Record;

/// Handle to one spooled batch.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchHandle {
    /// Monotonic sequence number assigned by the sink
    pub sequence: u64,
    /// Spool file location
    pub path: PathBuf,
}

/// Abstraction over intermediate batch storage, enabling testability.
#[async_trait::async_trait]
pub trait BatchStore: Send + Sync {
    /// Persist a batch under the given sequence number.
    ///
    /// Writing the same sequence number twice must be idempotent.
    async fn write_batch(&self, sequence: u64, records: &[Record]) -> Result<BatchHandle>;

    /// Read a previously written batch back.
    async fn read_batch(&self, handle: &BatchHandle) -> Result<Vec<Record>>;

    /// Delete a merged batch.
    async fn delete_batch(&self, handle: &BatchHandle) -> Result<()>;
}

/// Production [`BatchStore`] spooling one JSON file per batch.
pub struct JsonBatchStore {
    spool_dir: PathBuf,
}

impl JsonBatchStore {
    /// Create a store over the given spool directory.
    ///
    /// The directory is created by [`crate::Harvester::new`]; the store
    /// itself assumes it exists.
    pub fn new(spool_dir: impl Into<PathBuf>) -> Self {
        Self {
            spool_dir: spool_dir.into(),
        }
    }

    fn batch_path(&self, sequence: u64) -> PathBuf {
        self.spool_dir.join(format!("batch_{sequence:06}.json"))
    }
}

#[async_trait::async_trait]
impl BatchStore for JsonBatchStore {
    async fn write_batch(&self, sequence: u64, records: &[Record]) -> Result<BatchHandle> {
        let path = self.batch_path(sequence);

        let bytes = serde_json::to_vec(records).map_err(|e| StorageError::WriteFailed {
            sequence,
            reason: e.to_string(),
        })?;

        tokio::fs::write(&path, bytes)
            .await
            .map_err(|e| StorageError::WriteFailed {
                sequence,
                reason: format!("{}: {e}", path.display()),
            })?;

        tracing::debug!(sequence = sequence, path = %path.display(), records = records.len(), "Spooled batch");

        Ok(BatchHandle { sequence, path })
    }

    async fn read_batch(&self, handle: &BatchHandle) -> Result<Vec<Record>> {
        let bytes =
            tokio::fs::read(&handle.path)
                .await
                .map_err(|e| StorageError::ReadFailed {
                    sequence: handle.sequence,
                    reason: format!("{}: {e}", handle.path.display()),
                })?;

        let records = serde_json::from_slice(&bytes).map_err(|e| StorageError::ReadFailed {
            sequence: handle.sequence,
            reason: format!("{}: {e}", handle.path.display()),
        })?;

        Ok(records)
    }

    async fn delete_batch(&self, handle: &BatchHandle) -> Result<()> {
        tokio::fs::remove_file(&handle.path)
            .await
            .map_err(|e| StorageError::DeleteFailed {
                sequence: handle.sequence,
                reason: format!("{}: {e}", handle.path.display()),
            })?;
        Ok(())
    }
}
