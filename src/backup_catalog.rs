//! Backup catalog
//!
//! Discovers completed backups by scanning the immediate subdirectories of
//! the backup root for a parseable `metadata.json`. A directory without
//! valid metadata is logged and skipped, so one damaged backup never hides
//! the others.

use std::path::{Path, PathBuf};

use crate::backup::BackupError;
use crate::backup_common::{calculate_bytes_hash, is_safe_blob_id, log_and_skip_entry_err};
use crate::models::BackupRecord;
use crate::paths::{blob_file_name, ensure_backup_root, metadata_path};

/// A discovered backup and the directory it lives in
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogEntry {
    pub dir: PathBuf,
    pub record: BackupRecord,
}

/// Outcome of re-hashing a backup archive
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArchiveCheck {
    Valid,
    Mismatch { expected: String, actual: String },
    /// Record written before archive hashes were stored
    Unverifiable,
}

#[derive(Debug, Clone)]
pub struct BackupCatalog {
    root: PathBuf,
}

impl BackupCatalog {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// All valid backups, in directory discovery order.
    pub async fn list(&self) -> Result<Vec<BackupRecord>, BackupError> {
        Ok(self
            .entries()
            .await?
            .into_iter()
            .map(|entry| entry.record)
            .collect())
    }

    /// All valid backups, newest first.
    pub async fn list_sorted(&self) -> Result<Vec<BackupRecord>, BackupError> {
        let mut records = self.list().await?;
        records.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        Ok(records)
    }

    /// Valid backups together with their directories.
    pub async fn entries(&self) -> Result<Vec<CatalogEntry>, BackupError> {
        ensure_backup_root(&self.root)
            .await
            .map_err(|source| BackupError::Catalog {
                path: self.root.clone(),
                source,
            })?;

        let mut dir = tokio::fs::read_dir(&self.root)
            .await
            .map_err(|source| BackupError::Catalog {
                path: self.root.clone(),
                source,
            })?;

        let mut entries = Vec::new();
        loop {
            let entry = match log_and_skip_entry_err(dir.next_entry().await) {
                Some(Some(entry)) => entry,
                // end of directory, or a read error that was already logged
                Some(None) | None => break,
            };

            let is_dir = match entry.file_type().await {
                Ok(file_type) => file_type.is_dir(),
                Err(e) => {
                    tracing::warn!(
                        "[Catalog] Cannot stat {}: {}",
                        entry.path().display(),
                        e
                    );
                    false
                }
            };
            if !is_dir {
                continue;
            }

            let path = entry.path();
            if let Some(record) = read_record(&path).await {
                entries.push(CatalogEntry { dir: path, record });
            }
        }

        tracing::debug!(
            "[Catalog] {} backups under {}",
            entries.len(),
            self.root.display()
        );
        Ok(entries)
    }

    /// Directory holding `record`, matched on `(timestamp, accountId)`.
    pub async fn find_dir(&self, record: &BackupRecord) -> Result<Option<PathBuf>, BackupError> {
        Ok(self
            .entries()
            .await?
            .into_iter()
            .find(|entry| entry.record.same_backup(record))
            .map(|entry| entry.dir))
    }

    /// Delete the directory of `record`. Returns `false` if no directory matches.
    pub async fn delete(&self, record: &BackupRecord) -> Result<bool, BackupError> {
        let Some(dir) = self.find_dir(record).await? else {
            tracing::warn!(
                "[Catalog] No backup directory matches {} @ {}",
                record.account_id,
                record.timestamp
            );
            return Ok(false);
        };

        tokio::fs::remove_dir_all(&dir)
            .await
            .map_err(|source| BackupError::Catalog {
                path: dir.clone(),
                source,
            })?;
        tracing::info!("[Catalog] Deleted backup {}", dir.display());
        Ok(true)
    }

    /// Raw bytes of blob `cid` stored with `record`.
    ///
    /// `Ok(None)` when the backup has a blob directory but not this blob.
    pub async fn read_blob(
        &self,
        record: &BackupRecord,
        cid: &str,
    ) -> Result<Option<Vec<u8>>, BackupError> {
        let blobs_dir = record
            .blobs_path
            .as_ref()
            .ok_or_else(|| BackupError::NoBlobs(record.archive_path.clone()))?;
        if !is_safe_blob_id(cid) {
            return Err(BackupError::InvalidBlobId(cid.to_string()));
        }

        let path = blobs_dir.join(blob_file_name(cid));
        match tokio::fs::read(&path).await {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(source) => Err(BackupError::Catalog { path, source }),
        }
    }

    /// Re-hash the archive of `record` and compare with the stored digest.
    pub async fn verify_archive(&self, record: &BackupRecord) -> Result<ArchiveCheck, BackupError> {
        let Some(expected) = record.archive_sha256.as_deref() else {
            return Ok(ArchiveCheck::Unverifiable);
        };

        let data = tokio::fs::read(&record.archive_path)
            .await
            .map_err(|source| BackupError::Catalog {
                path: record.archive_path.clone(),
                source,
            })?;
        let actual = calculate_bytes_hash(&data);

        if actual.eq_ignore_ascii_case(expected) {
            Ok(ArchiveCheck::Valid)
        } else {
            tracing::warn!(
                "[Catalog] Archive {} hash mismatch",
                record.archive_path.display()
            );
            Ok(ArchiveCheck::Mismatch {
                expected: expected.to_string(),
                actual,
            })
        }
    }
}

/// Parse `<dir>/metadata.json`, logging why a directory is skipped.
async fn read_record(dir: &Path) -> Option<BackupRecord> {
    let path = metadata_path(dir);
    let content = match tokio::fs::read_to_string(&path).await {
        Ok(content) => content,
        Err(e) => {
            tracing::debug!("[Catalog] Skipping {}: {}", dir.display(), e);
            return None;
        }
    };

    match serde_json::from_str::<BackupRecord>(&content) {
        Ok(record) => Some(record),
        Err(e) => {
            tracing::warn!("[Catalog] Skipping {}: invalid metadata: {}", dir.display(), e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{BackupKind, RepoStats};
    use assert_matches::assert_matches;
    use chrono::{DateTime, Utc};
    use std::collections::{BTreeMap, BTreeSet};
    use tempfile::TempDir;

    fn record(dir: &Path, did: &str, timestamp: &str) -> BackupRecord {
        let timestamp: DateTime<Utc> = timestamp.parse().unwrap();
        BackupRecord {
            account_id: did.to_string(),
            timestamp,
            backup_kind: BackupKind::FullRepo,
            archive_path: dir.join("repo.car"),
            blobs_path: None,
            blob_count: None,
            archive_sha256: None,
            stats: RepoStats {
                total_blocks: 0,
                total_size: 0,
                record_count: 0,
                record_types_by_tag: BTreeMap::new(),
                file_size_bytes: 0,
                collection_tags: BTreeSet::new(),
                created_at: timestamp,
            },
        }
    }

    fn write_backup(root: &Path, name: &str, did: &str, timestamp: &str) -> BackupRecord {
        let dir = root.join(name);
        std::fs::create_dir_all(&dir).unwrap();
        let record = record(&dir, did, timestamp);
        std::fs::write(&record.archive_path, b"car").unwrap();
        std::fs::write(
            dir.join("metadata.json"),
            serde_json::to_vec_pretty(&record).unwrap(),
        )
        .unwrap();
        record
    }

    #[tokio::test]
    async fn test_list_creates_missing_root() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("ATBackup");
        let catalog = BackupCatalog::new(&root);

        assert!(catalog.list().await.unwrap().is_empty());
        assert!(root.is_dir());
    }

    #[tokio::test]
    async fn test_list_skips_damaged_directories_and_files() {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        write_backup(root, "2026-10-01_backup", "did:plc:a", "2026-10-01T10:00:00Z");
        std::fs::create_dir_all(root.join("no_metadata")).unwrap();
        std::fs::create_dir_all(root.join("corrupt")).unwrap();
        std::fs::write(root.join("corrupt").join("metadata.json"), "{ broken").unwrap();
        std::fs::write(root.join("stray.txt"), "not a backup").unwrap();

        let records = BackupCatalog::new(root).list().await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].account_id, "did:plc:a");
    }

    #[tokio::test]
    async fn test_list_sorted_is_newest_first() {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        write_backup(root, "b", "did:plc:a", "2026-10-02T10:00:00Z");
        write_backup(root, "c", "did:plc:a", "2026-10-03T10:00:00Z");
        write_backup(root, "a", "did:plc:a", "2026-10-01T10:00:00Z");

        let records = BackupCatalog::new(root).list_sorted().await.unwrap();
        let days: Vec<String> = records
            .iter()
            .map(|r| r.timestamp.format("%d").to_string())
            .collect();
        assert_eq!(days, vec!["03", "02", "01"]);
    }

    #[tokio::test]
    async fn test_find_dir_and_delete_match_timestamp_and_account() {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        let mine = write_backup(root, "one", "did:plc:a", "2026-10-01T10:00:00Z");
        let theirs = write_backup(root, "two", "did:plc:b", "2026-10-01T10:00:00Z");
        let catalog = BackupCatalog::new(root);

        assert_eq!(catalog.find_dir(&mine).await.unwrap(), Some(root.join("one")));
        assert!(catalog.delete(&mine).await.unwrap());
        assert!(!root.join("one").exists());
        assert!(root.join("two").exists());

        assert!(!catalog.delete(&mine).await.unwrap(), "already gone");
        assert_eq!(catalog.list().await.unwrap(), vec![theirs]);
    }

    #[tokio::test]
    async fn test_read_blob() {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        let mut rec = write_backup(root, "one", "did:plc:a", "2026-10-01T10:00:00Z");
        let catalog = BackupCatalog::new(root);

        assert_matches!(
            catalog.read_blob(&rec, "bafkreiaaaa").await,
            Err(BackupError::NoBlobs(_))
        );

        let blobs = root.join("one").join("blobs");
        std::fs::create_dir_all(&blobs).unwrap();
        std::fs::write(blobs.join("bafkreiaaaa.blob"), b"image bytes").unwrap();
        rec.blobs_path = Some(blobs);

        assert_eq!(
            catalog.read_blob(&rec, "bafkreiaaaa").await.unwrap(),
            Some(b"image bytes".to_vec())
        );
        assert_eq!(catalog.read_blob(&rec, "bafkreizzzz").await.unwrap(), None);
        assert_matches!(
            catalog.read_blob(&rec, "../metadata").await,
            Err(BackupError::InvalidBlobId(_))
        );
    }

    #[tokio::test]
    async fn test_verify_archive() {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        let mut rec = write_backup(root, "one", "did:plc:a", "2026-10-01T10:00:00Z");
        let catalog = BackupCatalog::new(root);

        assert_eq!(
            catalog.verify_archive(&rec).await.unwrap(),
            ArchiveCheck::Unverifiable
        );

        rec.archive_sha256 = Some(calculate_bytes_hash(b"car"));
        assert_eq!(catalog.verify_archive(&rec).await.unwrap(), ArchiveCheck::Valid);

        std::fs::write(&rec.archive_path, b"tampered").unwrap();
        assert_matches!(
            catalog.verify_archive(&rec).await.unwrap(),
            ArchiveCheck::Mismatch { .. }
        );
    }
}
