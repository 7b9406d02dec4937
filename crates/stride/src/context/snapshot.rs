//! Durable history snapshots.
//!
//! A snapshot is the full record list plus a timestamp, serialized as JSON.
//! Writes go through a temp file and rename so a crash mid-write leaves the
//! previous snapshot intact.

use crate::context::history::MessageRecord;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::debug;

/// A point-in-time copy of the message history, suitable for restoring a
/// [`MessageManager`](crate::context::MessageManager) via `from_records`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistorySnapshot {
    pub saved_at: DateTime<Utc>,
    pub records: Vec<MessageRecord>,
}

impl HistorySnapshot {
    pub fn new(records: Vec<MessageRecord>) -> Self {
        Self {
            saved_at: Utc::now(),
            records,
        }
    }
}

/// Write a snapshot to `path` atomically (temp file + rename).
pub fn save_snapshot(path: &Path, snapshot: &HistorySnapshot) -> Result<(), String> {
    let json = serde_json::to_string_pretty(snapshot)
        .map_err(|e| format!("Failed to serialize snapshot: {e}"))?;

    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)
            .map_err(|e| format!("Failed to create snapshot directory: {e}"))?;
    }

    let tmp_path = path.with_extension("json.tmp");
    std::fs::write(&tmp_path, &json)
        .map_err(|e| format!("Failed to write temp snapshot file: {e}"))?;
    std::fs::rename(&tmp_path, path).map_err(|e| format!("Failed to rename snapshot file: {e}"))?;

    debug!("saved snapshot with {} records", snapshot.records.len());
    Ok(())
}

/// Read a snapshot from `path`. A missing file is `Ok(None)`, not an error;
/// a present-but-unreadable file is an error.
pub fn load_snapshot(path: &Path) -> Result<Option<HistorySnapshot>, String> {
    if !path.exists() {
        return Ok(None);
    }
    let json =
        std::fs::read_to_string(path).map_err(|e| format!("Failed to read snapshot file: {e}"))?;
    let snapshot: HistorySnapshot =
        serde_json::from_str(&json).map_err(|e| format!("Failed to parse snapshot file: {e}"))?;
    Ok(Some(snapshot))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Message;
    use crate::context::history::{MessageKind, MessageMeta};

    fn sample_records() -> Vec<MessageRecord> {
        vec![
            MessageRecord {
                message: Message::system("init"),
                meta: MessageMeta::new(MessageKind::Init, 3),
            },
            MessageRecord {
                message: Message::user("do the thing"),
                meta: MessageMeta::new(MessageKind::Task, 5),
            },
        ]
    }

    #[test]
    fn round_trips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("history.json");

        let snapshot = HistorySnapshot::new(sample_records());
        save_snapshot(&path, &snapshot).unwrap();

        let loaded = load_snapshot(&path).unwrap().unwrap();
        assert_eq!(loaded.records.len(), 2);
        assert_eq!(loaded.records[1].meta.kind, MessageKind::Task);
        assert_eq!(loaded.records[1].meta.tokens, 5);
        assert_eq!(loaded.saved_at, snapshot.saved_at);
    }

    #[test]
    fn missing_file_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.json");
        assert!(load_snapshot(&path).unwrap().is_none());
    }

    #[test]
    fn corrupt_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.json");
        std::fs::write(&path, "{ not json").unwrap();
        assert!(load_snapshot(&path).is_err());
    }

    #[test]
    fn save_creates_missing_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/deeper/history.json");
        save_snapshot(&path, &HistorySnapshot::new(sample_records())).unwrap();
        assert!(path.exists());
    }
}
