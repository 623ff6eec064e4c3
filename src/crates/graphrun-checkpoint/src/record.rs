//! Checkpoint records: one persisted suspension point of a run.

use crate::error::{CheckpointError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// A stored run snapshot.
///
/// `payload` holds the JSON encoding of the runner's stack snapshot. The
/// runner owns that schema; this crate only moves the bytes around.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointRecord {
    pub id: Uuid,
    pub run_id: String,
    /// Monotonic position of the snapshot within its run
    pub step: u64,
    pub created_at: DateTime<Utc>,
    pub metadata: BTreeMap<String, String>,
    pub payload: String,
}

impl CheckpointRecord {
    /// Encode `snapshot` into a fresh record.
    pub fn new<T: Serialize>(run_id: impl Into<String>, step: u64, snapshot: &T) -> Result<Self> {
        Ok(Self {
            id: Uuid::new_v4(),
            run_id: run_id.into(),
            step,
            created_at: Utc::now(),
            metadata: BTreeMap::new(),
            payload: serde_json::to_string(snapshot)?,
        })
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Decode the payload back into the snapshot type.
    pub fn snapshot<T: for<'de> Deserialize<'de>>(&self) -> Result<T> {
        serde_json::from_str(&self.payload).map_err(|e| {
            CheckpointError::Invalid(format!(
                "checkpoint {} of run {} has an unreadable payload: {}",
                self.id, self.run_id, e
            ))
        })
    }
}
