//! Shared helpers for the backup modules
//!
//! - Directory iteration that logs and skips bad entries
//! - SHA-256 of archive bytes, for verifiable metadata
//! - Atomic JSON writes (temp file + rename)
//! - Blob id validation before an id becomes a file name

use serde::Serialize;
use sha2::{Digest, Sha256};
use std::path::Path;

/// Log and skip an iteration error instead of silently dropping it with `.flatten()`.
pub fn log_and_skip_entry_err<T, E: std::fmt::Display>(
    result: std::result::Result<T, E>,
) -> Option<T> {
    match result {
        Ok(v) => Some(v),
        Err(e) => {
            tracing::warn!("[BackupCommon] Directory entry read error (skipped): {}", e);
            None
        }
    }
}

/// Hex SHA-256 of an in-memory byte slice.
pub fn calculate_bytes_hash(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// Serialize `value` as pretty JSON and write it to `path` atomically.
///
/// 1. write `<path>.tmp`
/// 2. fsync
/// 3. rename over the target
///
/// A crash mid-write leaves either the old file or the new one, never a torn one.
pub async fn write_json_atomic<T: Serialize + ?Sized>(
    path: &Path,
    value: &T,
) -> std::io::Result<()> {
    let json = serde_json::to_vec_pretty(value)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;

    let temp_path = path.with_extension("json.tmp");
    {
        use tokio::io::AsyncWriteExt;
        let mut file = tokio::fs::File::create(&temp_path).await?;
        file.write_all(&json).await?;
        file.sync_all().await?;
    }

    if let Err(e) = tokio::fs::rename(&temp_path, path).await {
        let _ = tokio::fs::remove_file(&temp_path).await;
        return Err(e);
    }
    Ok(())
}

/// Whether a blob id is safe to use as a file name.
///
/// CIDs are multibase strings (base32 `b...`, base58btc `Qm...`), so anything
/// outside ASCII alphanumerics is rejected. This also rules out `..` and path
/// separators coming from the server.
pub fn is_safe_blob_id(id: &str) -> bool {
    !id.is_empty() && id.len() <= 256 && id.bytes().all(|b| b.is_ascii_alphanumeric())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_log_and_skip_entry_err_ok() {
        let result: std::result::Result<&str, String> = Ok("value");
        assert_eq!(log_and_skip_entry_err(result), Some("value"));
    }

    #[test]
    fn test_log_and_skip_entry_err_err() {
        let result: std::result::Result<i32, String> = Err("fail".to_string());
        assert_eq!(log_and_skip_entry_err(result), None);
    }

    #[test]
    fn test_calculate_bytes_hash_known_value() {
        assert_eq!(
            calculate_bytes_hash(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_is_safe_blob_id() {
        assert!(is_safe_blob_id(
            "bafkreihdwdcefgh4dqkjv67uzcmw7ojee6xedzdetojuzjevtenxquvyku"
        ));
        assert!(is_safe_blob_id("QmYwAPJzv5CZsnA625s3Xf2nemtYgPpHdWEz79ojWnPbdG"));
        assert!(!is_safe_blob_id(""));
        assert!(!is_safe_blob_id("../etc/passwd"));
        assert!(!is_safe_blob_id("abc/def"));
        assert!(!is_safe_blob_id("abc.blob"));
    }

    #[tokio::test]
    async fn test_write_json_atomic_replaces_file_and_leaves_no_temp() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("metadata.json");

        write_json_atomic(&path, &serde_json::json!({ "n": 1 }))
            .await
            .unwrap();
        write_json_atomic(&path, &serde_json::json!({ "n": 2 }))
            .await
            .unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        let value: serde_json::Value = serde_json::from_str(&content).unwrap();
        assert_eq!(value["n"], 2);
        assert!(
            content.contains('\n'),
            "metadata should be pretty-printed: {}",
            content
        );
        assert!(!dir.path().join("metadata.json.tmp").exists());
    }
}
