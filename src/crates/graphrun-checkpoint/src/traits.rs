use crate::{error::Result, record::CheckpointRecord};
use async_trait::async_trait;
use uuid::Uuid;

/// Storage backend for run checkpoints.
///
/// Records are grouped by `run_id` and ordered by insertion. Implementations
/// must be safe to share across tasks.
#[async_trait]
pub trait CheckpointSaver: Send + Sync {
    /// Store a record, returning its id.
    async fn put(&self, record: CheckpointRecord) -> Result<Uuid>;

    /// Fetch a record by id.
    async fn get(&self, id: Uuid) -> Result<Option<CheckpointRecord>>;

    /// Most recent record of a run.
    async fn latest(&self, run_id: &str) -> Result<Option<CheckpointRecord>> {
        Ok(self.list(run_id, None).await?.pop())
    }

    /// Records of a run, oldest first, optionally keeping only the last `limit`.
    async fn list(&self, run_id: &str, limit: Option<usize>) -> Result<Vec<CheckpointRecord>>;

    /// Drop every record of a run.
    async fn delete_run(&self, run_id: &str) -> Result<()>;
}
