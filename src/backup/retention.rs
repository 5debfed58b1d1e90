//! Retention policies
//!
//! - rotating: keep the newest `max_backups` records, delete the rest
//! - single-slot: wipe every backup directory before writing `current_backup/`
//!
//! Failures here are logged and never fail the backup that triggered them.

use std::path::Path;

use crate::backup_catalog::BackupCatalog;
use crate::backup_common::log_and_skip_entry_err;

/// Delete all but the newest `max_backups` backups. Returns how many were removed.
///
/// Only directories with readable metadata are candidates; anything the
/// catalog cannot identify is left alone.
pub(crate) async fn apply_rotating(catalog: &BackupCatalog, max_backups: usize) -> usize {
    let mut entries = match catalog.entries().await {
        Ok(entries) => entries,
        Err(e) => {
            tracing::warn!("[Backup] Retention skipped, cannot list backups: {}", e);
            return 0;
        }
    };

    // newest first
    entries.sort_by(|a, b| b.record.timestamp.cmp(&a.record.timestamp));

    let mut removed = 0;
    for entry in entries.iter().skip(max_backups) {
        tracing::info!(
            "[Backup] Deleting old backup {} ({})",
            entry.dir.display(),
            entry.record.timestamp
        );
        match tokio::fs::remove_dir_all(&entry.dir).await {
            Ok(()) => removed += 1,
            Err(e) => tracing::warn!(
                "[Backup] Failed to delete old backup {}: {}",
                entry.dir.display(),
                e
            ),
        }
    }
    removed
}

/// Remove every subdirectory of `root`. Returns how many were removed.
pub(crate) async fn purge_all(root: &Path) -> usize {
    let mut dir = match tokio::fs::read_dir(root).await {
        Ok(dir) => dir,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return 0,
        Err(e) => {
            tracing::warn!("[Backup] Cannot scan {} for purge: {}", root.display(), e);
            return 0;
        }
    };

    let mut removed = 0;
    while let Some(Some(entry)) = log_and_skip_entry_err(dir.next_entry().await) {
        let path = entry.path();
        match entry.file_type().await {
            Ok(file_type) if file_type.is_dir() => {}
            _ => continue,
        }

        match tokio::fs::remove_dir_all(&path).await {
            Ok(()) => {
                tracing::info!("[Backup] Removed previous backup {}", path.display());
                removed += 1;
            }
            Err(e) => tracing::warn!("[Backup] Failed to remove {}: {}", path.display(), e),
        }
    }
    removed
}
