//! Checkpoint persistence for deposit reconciliation.
//!
//! The checkpoint is a single block number, the last block whose transfers have all been
//! applied. `CheckpointStore` abstracts where it lives; `FileCheckpointStore` keeps it in a
//! JSON file under the data directory. `CheckpointTracker` sits in front of the store and
//! keeps the persisted value from moving backwards when both ingestion paths advance it.

use crate::deposit::DepositError;
use crate::utils::with_timeout;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Durable storage for the last scanned block.
#[async_trait::async_trait]
pub trait CheckpointStore: Send + Sync {
    /// The stored block number, or `None` if no checkpoint was ever written.
    async fn read(&self) -> Result<Option<u64>, DepositError>;

    /// Replace the stored block number.
    async fn write(&self, block_number: u64) -> Result<(), DepositError>;
}

#[derive(Debug, Serialize, Deserialize)]
struct CheckpointFile {
    last_scanned_block: u64,
}

/// File-based implementation of `CheckpointStore`
pub struct FileCheckpointStore {
    data_dir: PathBuf,
}

impl FileCheckpointStore {
    pub fn new(data_dir: PathBuf) -> Self {
        Self { data_dir }
    }

    fn checkpoint_path(&self) -> PathBuf {
        self.data_dir.join("checkpoint.json")
    }
}

#[async_trait::async_trait]
impl CheckpointStore for FileCheckpointStore {
    async fn read(&self) -> Result<Option<u64>, DepositError> {
        let path = self.checkpoint_path();
        if !tokio::fs::try_exists(&path).await? {
            return Ok(None);
        }

        let content = tokio::fs::read_to_string(&path).await.map_err(|e| {
            DepositError::StoreError(format!("Failed to read checkpoint file: {}", e))
        })?;
        let checkpoint: CheckpointFile = serde_json::from_str(&content).map_err(|e| {
            DepositError::StoreError(format!("Failed to parse checkpoint file: {}", e))
        })?;

        Ok(Some(checkpoint.last_scanned_block))
    }

    async fn write(&self, block_number: u64) -> Result<(), DepositError> {
        tokio::fs::create_dir_all(&self.data_dir).await?;

        let content = serde_json::to_string_pretty(&CheckpointFile {
            last_scanned_block: block_number,
        })
        .map_err(|e| DepositError::StoreError(format!("Failed to serialize checkpoint: {}", e)))?;

        // Write then rename so a crash never leaves a truncated checkpoint behind
        let path = self.checkpoint_path();
        let tmp_path = path.with_extension("json.tmp");
        tokio::fs::write(&tmp_path, content).await.map_err(|e| {
            DepositError::StoreError(format!("Failed to write checkpoint file: {}", e))
        })?;
        tokio::fs::rename(&tmp_path, &path).await.map_err(|e| {
            DepositError::StoreError(format!("Failed to replace checkpoint file: {}", e))
        })?;

        debug!("Checkpoint saved at block {}", block_number);
        Ok(())
    }
}

/// Monotonic front for a [`CheckpointStore`].
///
/// Both the reconciler and the live watcher advance the checkpoint. Writes go through a
/// single lock so the stored value only ever increases; a live event from an older block
/// arriving after a backfill pass does not pull the watermark back. Only [`Self::reset`]
/// moves it down.
pub struct CheckpointTracker {
    store: Arc<dyn CheckpointStore>,
    /// Highest block known to be persisted. `None` until the store has been consulted.
    high_water: Mutex<Option<u64>>,
    call_timeout: Duration,
}

impl CheckpointTracker {
    pub fn new(store: Arc<dyn CheckpointStore>, call_timeout: Duration) -> Self {
        Self {
            store,
            high_water: Mutex::new(None),
            call_timeout,
        }
    }

    /// Read the persisted checkpoint.
    pub async fn read(&self) -> Result<Option<u64>, DepositError> {
        let stored = with_timeout(self.call_timeout, "checkpoint read", self.store.read()).await?;
        if let Some(block) = stored {
            let mut high_water = self.high_water.lock().await;
            *high_water = Some(high_water.map_or(block, |current| current.max(block)));
        }
        Ok(stored)
    }

    /// Persist `block_number` if it is ahead of the current checkpoint.
    ///
    /// Returns whether a write happened.
    pub async fn advance(&self, block_number: u64) -> Result<bool, DepositError> {
        let mut high_water = self.high_water.lock().await;

        if high_water.is_none() {
            *high_water =
                with_timeout(self.call_timeout, "checkpoint read", self.store.read()).await?;
        }

        if let Some(current) = *high_water {
            if block_number <= current {
                debug!(
                    "Checkpoint already at {}, not moving it to {}",
                    current, block_number
                );
                return Ok(false);
            }
        }

        with_timeout(
            self.call_timeout,
            "checkpoint write",
            self.store.write(block_number),
        )
        .await?;
        *high_water = Some(block_number);
        Ok(true)
    }

    /// Overwrite the checkpoint unconditionally, possibly moving it backwards.
    pub async fn reset(&self, block_number: u64) -> Result<(), DepositError> {
        let mut high_water = self.high_water.lock().await;
        if let Some(current) = *high_water {
            if block_number < current {
                warn!("Rewinding checkpoint from {} to {}", current, block_number);
            }
        }

        with_timeout(
            self.call_timeout,
            "checkpoint write",
            self.store.write(block_number),
        )
        .await?;
        *high_water = Some(block_number);
        info!("Checkpoint reset to block {}", block_number);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::RecordingCheckpointStore;
    use tempfile::TempDir;

    #[tokio::test]
    async fn file_store_starts_empty_and_persists() {
        let dir = TempDir::new().unwrap();
        let store = FileCheckpointStore::new(dir.path().join("nested"));

        assert_eq!(store.read().await.unwrap(), None);
        store.write(105).await.unwrap();
        assert_eq!(store.read().await.unwrap(), Some(105));

        let reopened = FileCheckpointStore::new(dir.path().join("nested"));
        assert_eq!(reopened.read().await.unwrap(), Some(105));
    }

    #[tokio::test]
    async fn file_store_reports_corrupt_checkpoint() {
        let dir = TempDir::new().unwrap();
        tokio::fs::write(dir.path().join("checkpoint.json"), "not json")
            .await
            .unwrap();
        let store = FileCheckpointStore::new(dir.path().to_path_buf());
        assert!(matches!(
            store.read().await,
            Err(DepositError::StoreError(_))
        ));
    }

    #[tokio::test]
    async fn tracker_never_moves_backwards() {
        let store = Arc::new(RecordingCheckpointStore::with_value(100));
        let tracker = CheckpointTracker::new(store.clone(), Duration::from_secs(1));

        assert!(!tracker.advance(90).await.unwrap());
        assert!(tracker.advance(105).await.unwrap());
        assert!(!tracker.advance(105).await.unwrap());
        assert!(!tracker.advance(101).await.unwrap());

        assert_eq!(store.value(), Some(105));
        assert_eq!(store.writes(), vec![105]);
    }

    #[tokio::test]
    async fn tracker_writes_first_checkpoint() {
        let store = Arc::new(RecordingCheckpointStore::default());
        let tracker = CheckpointTracker::new(store.clone(), Duration::from_secs(1));

        assert_eq!(tracker.read().await.unwrap(), None);
        assert!(tracker.advance(7).await.unwrap());
        assert_eq!(store.value(), Some(7));
    }

    #[tokio::test]
    async fn reset_rewinds_explicitly() {
        let store = Arc::new(RecordingCheckpointStore::with_value(500));
        let tracker = CheckpointTracker::new(store.clone(), Duration::from_secs(1));

        tracker.reset(200).await.unwrap();
        assert_eq!(store.value(), Some(200));
        assert!(tracker.advance(201).await.unwrap());
        assert_eq!(store.writes(), vec![200, 201]);
    }

    #[tokio::test]
    async fn failed_write_keeps_previous_checkpoint() {
        let store = Arc::new(RecordingCheckpointStore::with_value(10));
        let tracker = CheckpointTracker::new(store.clone(), Duration::from_secs(1));

        store.fail_writes(true);
        assert!(tracker.advance(20).await.is_err());
        store.fail_writes(false);

        assert_eq!(store.value(), Some(10));
        assert!(tracker.advance(15).await.unwrap());
    }
}
