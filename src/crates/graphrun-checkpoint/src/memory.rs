//! In-memory checkpoint storage.
//!
//! [`InMemoryCheckpointSaver`] keeps every record in an `Arc<RwLock<HashMap>>`
//! keyed by run id. It is the default saver for tests and for single-process
//! interactive sessions; nothing survives a restart.
//!
//! ```text
//! run_id: "session-1"
//!   ├─ [0] CheckpointRecord (step 0)
//!   └─ [1] CheckpointRecord (step 4)
//! run_id: "session-2"
//!   └─ [0] CheckpointRecord (step 1)
//! ```

use crate::{
    error::{CheckpointError, Result},
    record::CheckpointRecord,
    traits::CheckpointSaver,
};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

type CheckpointStorage = Arc<RwLock<HashMap<String, Vec<CheckpointRecord>>>>;

/// Thread-safe, process-local checkpoint store
#[derive(Debug, Clone)]
pub struct InMemoryCheckpointSaver {
    storage: CheckpointStorage,
}

impl InMemoryCheckpointSaver {
    pub fn new() -> Self {
        Self {
            storage: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Number of runs with at least one record
    pub async fn run_count(&self) -> usize {
        self.storage.read().await.len()
    }

    /// Total number of stored records
    pub async fn checkpoint_count(&self) -> usize {
        self.storage.read().await.values().map(Vec::len).sum()
    }

    pub async fn clear(&self) {
        self.storage.write().await.clear();
    }
}

impl Default for InMemoryCheckpointSaver {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CheckpointSaver for InMemoryCheckpointSaver {
    async fn put(&self, record: CheckpointRecord) -> Result<Uuid> {
        let mut storage = self.storage.write().await;
        let records = storage.entry(record.run_id.clone()).or_default();
        if let Some(last) = records.last() {
            if record.step < last.step {
                return Err(CheckpointError::Invalid(format!(
                    "step {} is older than the latest step {} of run {}",
                    record.step, last.step, record.run_id
                )));
            }
        }
        let id = record.id;
        records.push(record);
        Ok(id)
    }

    async fn get(&self, id: Uuid) -> Result<Option<CheckpointRecord>> {
        let storage = self.storage.read().await;
        Ok(storage
            .values()
            .flat_map(|records| records.iter())
            .find(|record| record.id == id)
            .cloned())
    }

    async fn list(&self, run_id: &str, limit: Option<usize>) -> Result<Vec<CheckpointRecord>> {
        let storage = self.storage.read().await;
        let records = match storage.get(run_id) {
            Some(records) => records,
            None => return Ok(Vec::new()),
        };
        let skip = match limit {
            Some(limit) => records.len().saturating_sub(limit),
            None => 0,
        };
        Ok(records[skip..].to_vec())
    }

    async fn delete_run(&self, run_id: &str) -> Result<()> {
        self.storage.write().await.remove(run_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(run: &str, step: u64) -> CheckpointRecord {
        CheckpointRecord::new(run, step, &json!({"step": step})).unwrap()
    }

    #[tokio::test]
    async fn test_put_and_get() {
        let saver = InMemoryCheckpointSaver::new();
        let id = saver.put(record("a", 0)).await.unwrap();

        let loaded = saver.get(id).await.unwrap().unwrap();
        assert_eq!(loaded.run_id, "a");
        assert!(saver.get(Uuid::new_v4()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_latest_and_list_limit() {
        let saver = InMemoryCheckpointSaver::new();
        for step in 0..4 {
            saver.put(record("a", step)).await.unwrap();
        }
        saver.put(record("b", 7)).await.unwrap();

        assert_eq!(saver.latest("a").await.unwrap().unwrap().step, 3);
        let tail = saver.list("a", Some(2)).await.unwrap();
        assert_eq!(tail.iter().map(|r| r.step).collect::<Vec<_>>(), vec![2, 3]);
        assert!(saver.list("missing", None).await.unwrap().is_empty());
        assert_eq!(saver.run_count().await, 2);
        assert_eq!(saver.checkpoint_count().await, 5);
    }

    #[tokio::test]
    async fn test_rejects_out_of_order_step() {
        let saver = InMemoryCheckpointSaver::new();
        saver.put(record("a", 5)).await.unwrap();
        let err = saver.put(record("a", 2)).await.unwrap_err();
        assert!(matches!(err, CheckpointError::Invalid(_)));
    }

    #[tokio::test]
    async fn test_delete_run_and_clear() {
        let saver = InMemoryCheckpointSaver::new();
        saver.put(record("a", 0)).await.unwrap();
        saver.put(record("b", 0)).await.unwrap();

        saver.delete_run("a").await.unwrap();
        assert!(saver.latest("a").await.unwrap().is_none());
        assert_eq!(saver.run_count().await, 1);

        saver.clear().await;
        assert_eq!(saver.checkpoint_count().await, 0);
    }
}
