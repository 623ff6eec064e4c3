//! Byte encodings for checkpoint records
//!
//! Backends that persist records outside the process (files, key-value
//! stores) go through a [`SerializerProtocol`]. [`RecordFormat`] picks one
//! from a file name, and [`write_record`] / [`read_record`] store a single
//! record per file, which is how the CLI hands a suspended run to a later
//! invocation.

use crate::error::{CheckpointError, Result};
use crate::record::CheckpointRecord;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::path::Path;

pub trait SerializerProtocol: Send + Sync {
    fn dumps<T: Serialize>(&self, value: &T) -> Result<Vec<u8>>;

    fn loads<T: DeserializeOwned>(&self, data: &[u8]) -> Result<T>;

    fn dump_record(&self, record: &CheckpointRecord) -> Result<Vec<u8>> {
        self.dumps(record)
    }

    /// Decode a record and check that its payload is readable JSON.
    fn load_record(&self, data: &[u8]) -> Result<CheckpointRecord> {
        let record: CheckpointRecord = self.loads(data)?;
        record.snapshot::<serde_json::Value>()?;
        Ok(record)
    }
}

/// Pretty-printed JSON, meant to be read and edited by hand.
#[derive(Debug, Clone, Default)]
pub struct JsonSerializer;

impl JsonSerializer {
    pub fn new() -> Self {
        Self
    }
}

impl SerializerProtocol for JsonSerializer {
    fn dumps<T: Serialize>(&self, value: &T) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec_pretty(value)?)
    }

    fn loads<T: DeserializeOwned>(&self, data: &[u8]) -> Result<T> {
        Ok(serde_json::from_slice(data)?)
    }
}

/// Compact binary encoding.
///
/// bincode is not self-describing, which is why records keep their snapshot
/// payload as a JSON string rather than a `serde_json::Value`.
#[derive(Debug, Clone, Default)]
pub struct BincodeSerializer;

impl BincodeSerializer {
    pub fn new() -> Self {
        Self
    }
}

impl SerializerProtocol for BincodeSerializer {
    fn dumps<T: Serialize>(&self, value: &T) -> Result<Vec<u8>> {
        Ok(bincode::serialize(value)?)
    }

    fn loads<T: DeserializeOwned>(&self, data: &[u8]) -> Result<T> {
        Ok(bincode::deserialize(data)?)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordFormat {
    #[default]
    Json,
    Bincode,
}

impl RecordFormat {
    /// `.bin` and `.bincode` files are binary, anything else is JSON.
    pub fn for_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some("bin") | Some("bincode") => Self::Bincode,
            _ => Self::Json,
        }
    }

    pub fn encode(self, record: &CheckpointRecord) -> Result<Vec<u8>> {
        match self {
            Self::Json => JsonSerializer.dump_record(record),
            Self::Bincode => BincodeSerializer.dump_record(record),
        }
    }

    pub fn decode(self, data: &[u8]) -> Result<CheckpointRecord> {
        match self {
            Self::Json => JsonSerializer.load_record(data),
            Self::Bincode => BincodeSerializer.load_record(data),
        }
    }
}

/// Store `record` alone in `path`, encoded by the file's extension.
pub fn write_record(path: &Path, record: &CheckpointRecord) -> Result<()> {
    let bytes = RecordFormat::for_path(path).encode(record)?;
    std::fs::write(path, bytes)?;
    Ok(())
}

pub fn read_record(path: &Path) -> Result<CheckpointRecord> {
    let bytes = std::fs::read(path)?;
    RecordFormat::for_path(path).decode(&bytes).map_err(|e| {
        CheckpointError::Invalid(format!("{} is not a checkpoint record: {}", path.display(), e))
    })
}
