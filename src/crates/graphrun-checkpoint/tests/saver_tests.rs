//! Checkpoint saver behaviour shared across tasks.

use graphrun_checkpoint::{
    read_record, write_record, BincodeSerializer, CheckpointError, CheckpointRecord,
    CheckpointSaver, InMemoryCheckpointSaver, SerializerProtocol,
};
use serde_json::json;
use std::sync::Arc;

#[tokio::test]
async fn concurrent_writers_keep_every_record() {
    let saver = Arc::new(InMemoryCheckpointSaver::new());
    let mut handles = Vec::new();
    for run in 0..8 {
        let saver = Arc::clone(&saver);
        handles.push(tokio::spawn(async move {
            for step in 0..5 {
                let record =
                    CheckpointRecord::new(format!("run-{run}"), step, &json!({"step": step}))
                        .unwrap();
                saver.put(record).await.unwrap();
            }
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    assert_eq!(saver.run_count().await, 8);
    assert_eq!(saver.checkpoint_count().await, 40);
    assert_eq!(saver.latest("run-3").await.unwrap().unwrap().step, 4);
}

#[tokio::test]
async fn record_survives_a_byte_round_trip_through_a_saver() {
    let saver = InMemoryCheckpointSaver::new();
    let serializer = BincodeSerializer::new();
    let original = CheckpointRecord::new("run", 1, &json!({"frames": [{"node": "ask"}]}))
        .unwrap()
        .with_metadata("reason", "input");

    let bytes = serializer.dumps(&original).unwrap();
    let restored: CheckpointRecord = serializer.loads(&bytes).unwrap();
    let id = saver.put(restored).await.unwrap();

    let loaded = saver.get(id).await.unwrap().unwrap();
    assert_eq!(loaded.metadata.get("reason").map(String::as_str), Some("input"));
    let snapshot: serde_json::Value = loaded.snapshot().unwrap();
    assert_eq!(snapshot["frames"][0]["node"], "ask");
}

#[test]
fn records_written_to_disk_read_back_in_either_format() {
    let dir = tempfile::TempDir::new().unwrap();
    let record = CheckpointRecord::new("run", 2, &json!({"frames": []}))
        .unwrap()
        .with_metadata("node", "ask");

    for name in ["snapshot.json", "snapshot.bin"] {
        let path = dir.path().join(name);
        write_record(&path, &record).unwrap();
        assert_eq!(read_record(&path).unwrap(), record, "{name}");
    }

    let text = std::fs::read_to_string(dir.path().join("snapshot.json")).unwrap();
    assert!(text.contains("\"run_id\": \"run\""));

    std::fs::write(dir.path().join("broken.json"), "{}").unwrap();
    assert!(matches!(
        read_record(&dir.path().join("broken.json")),
        Err(CheckpointError::Invalid(_))
    ));
}
