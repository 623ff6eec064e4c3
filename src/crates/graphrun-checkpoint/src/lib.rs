//! # graphrun-checkpoint - Resumable run snapshots
//!
//! A traversal run can be suspended at an input boundary, its invocation
//! stack snapshotted, and resumed later by a different runner instance,
//! possibly in another process. This crate stores those snapshots.
//!
//! - [`CheckpointRecord`] - one stored snapshot with run id, step and metadata
//! - [`CheckpointSaver`] - async storage backend trait
//! - [`InMemoryCheckpointSaver`] - process-local reference backend
//! - [`SerializerProtocol`] - byte encodings ([`JsonSerializer`], [`BincodeSerializer`]),
//!   and [`write_record`] / [`read_record`] for one record per file
//!
//! ```rust,no_run
//! use graphrun_checkpoint::{CheckpointRecord, CheckpointSaver, InMemoryCheckpointSaver};
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let saver = InMemoryCheckpointSaver::new();
//!     let record = CheckpointRecord::new("run-42", 0, &json!({"frames": []}))?;
//!     saver.put(record).await?;
//!
//!     let latest = saver.latest("run-42").await?.expect("stored above");
//!     let snapshot: serde_json::Value = latest.snapshot()?;
//!     println!("{snapshot}");
//!     Ok(())
//! }
//! ```

pub mod error;
pub mod memory;
pub mod record;
pub mod serializer;
pub mod traits;

pub use error::{CheckpointError, Result};
pub use memory::InMemoryCheckpointSaver;
pub use record::CheckpointRecord;
pub use serializer::{
    read_record, write_record, BincodeSerializer, JsonSerializer, RecordFormat, SerializerProtocol,
};
pub use traits::CheckpointSaver;
