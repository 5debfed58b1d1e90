//! Backup data model
//!
//! On-disk JSON keeps the field names of existing `metadata.json` files
//! (`did`, `filePath`, `recordTypes`, ...), so backups written by earlier
//! releases stay listable.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

/// Kind of backup. Only full repository snapshots exist today.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BackupKind {
    #[serde(rename = "full_repo")]
    FullRepo,
}

/// Summary counts extracted from a repository archive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepoStats {
    /// Every section in the archive, records and structural blocks alike
    pub total_blocks: u64,
    /// Sum of block payload sizes
    pub total_size: u64,
    /// Always equal to the sum of `record_types_by_tag`
    pub record_count: u64,
    #[serde(rename = "recordTypes")]
    pub record_types_by_tag: BTreeMap<String, u64>,
    #[serde(rename = "fileSize")]
    pub file_size_bytes: u64,
    #[serde(rename = "collections")]
    pub collection_tags: BTreeSet<String>,
    pub created_at: DateTime<Utc>,
}

/// Durable description of one completed backup, stored as `metadata.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupRecord {
    #[serde(rename = "did")]
    pub account_id: String,
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "backupType")]
    pub backup_kind: BackupKind,
    #[serde(rename = "filePath")]
    pub archive_path: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blobs_path: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blob_count: Option<u64>,
    /// Hex SHA-256 of the archive; absent in backups from older releases
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub archive_sha256: Option<String>,
    pub stats: RepoStats,
}

impl BackupRecord {
    /// `(timestamp, accountId)` uniquely identifies a backup on disk.
    pub fn same_backup(&self, other: &BackupRecord) -> bool {
        self.timestamp == other.timestamp && self.account_id == other.account_id
    }
}

/// Sidecar written next to each downloaded blob as `<cid>.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlobMetadata {
    pub cid: String,
    pub size: u64,
    pub downloaded_at: DateTime<Utc>,
}

/// One page of `com.atproto.sync.listBlobs`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlobPage {
    pub cids: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cursor: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_record() -> BackupRecord {
        let created = "2026-03-01T10:00:00Z".parse::<DateTime<Utc>>().unwrap();
        BackupRecord {
            account_id: "did:plc:abc123".to_string(),
            timestamp: created,
            backup_kind: BackupKind::FullRepo,
            archive_path: PathBuf::from("/tmp/ATBackup/2026-03-01_backup/repo.car"),
            blobs_path: None,
            blob_count: None,
            archive_sha256: None,
            stats: RepoStats {
                total_blocks: 10,
                total_size: 900,
                record_count: 3,
                record_types_by_tag: BTreeMap::from([
                    ("app.bsky.feed.post".to_string(), 2),
                    ("app.bsky.feed.like".to_string(), 1),
                ]),
                file_size_bytes: 1024,
                collection_tags: BTreeSet::from([
                    "app.bsky.feed.like".to_string(),
                    "app.bsky.feed.post".to_string(),
                ]),
                created_at: created,
            },
        }
    }

    #[test]
    fn test_record_uses_metadata_file_field_names() {
        let json = serde_json::to_value(sample_record()).unwrap();

        assert_eq!(json["did"], "did:plc:abc123");
        assert_eq!(json["backupType"], "full_repo");
        assert!(json["filePath"].is_string());
        assert_eq!(json["stats"]["recordTypes"]["app.bsky.feed.post"], 2);
        assert_eq!(json["stats"]["fileSize"], 1024);
        assert!(json["stats"]["collections"].is_array());
        assert!(json.get("blobsPath").is_none(), "unset blob fields are omitted");
        assert!(json.get("archiveSha256").is_none());
    }

    #[test]
    fn test_record_parses_legacy_metadata_file() {
        // metadata.json as written by the 0.1 desktop client
        let legacy = r#"{
          "did": "did:plc:abc123",
          "timestamp": "2025-06-01T08:30:00.000Z",
          "backupType": "full_repo",
          "filePath": "/home/u/Documents/ATBackup/2025-06-01_backup/repo.car",
          "stats": {
            "totalBlocks": 4,
            "totalSize": 0,
            "recordCount": 2,
            "recordTypes": { "app.bsky.feed.post": 2 },
            "fileSize": 512,
            "collections": ["app.bsky.feed.post"],
            "createdAt": "2025-06-01T08:30:00.000Z"
          },
          "blobsPath": "/home/u/Documents/ATBackup/2025-06-01_backup/blobs",
          "blobCount": 7
        }"#;

        let record: BackupRecord = serde_json::from_str(legacy).unwrap();
        assert_eq!(record.account_id, "did:plc:abc123");
        assert_eq!(record.blob_count, Some(7));
        assert!(record.archive_sha256.is_none());
        assert_eq!(record.stats.record_count, 2);
    }

    #[test]
    fn test_same_backup_compares_timestamp_and_account() {
        let a = sample_record();
        let mut b = sample_record();
        assert!(a.same_backup(&b));

        b.account_id = "did:plc:other".to_string();
        assert!(!a.same_backup(&b));

        let mut c = sample_record();
        c.timestamp = c.timestamp + chrono::Duration::seconds(1);
        assert!(!a.same_backup(&c));
    }
}
