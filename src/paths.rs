//! Backup root resolution and on-disk layout names
//!
//! ```text
//! ATBackup/
//!   <YYYY-MM-DD>_backup/     rotating retention
//!     repo.car
//!     metadata.json
//!     blobs/<cid>.blob, blobs/<cid>.json
//!   current_backup/          single-slot retention
//! ```

use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};

/// Root folder under the documents directory
pub const BACKUP_ROOT_DIR: &str = "ATBackup";
/// Fixed directory used by single-slot retention
pub const CURRENT_BACKUP_DIR: &str = "current_backup";
pub const ARCHIVE_FILENAME: &str = "repo.car";
pub const METADATA_FILENAME: &str = "metadata.json";
pub const BLOBS_DIR: &str = "blobs";

const SETTINGS_FILENAME: &str = "settings.json";
const APP_DIR: &str = "atbackup";

/// `<documents>/ATBackup`, falling back to `<home>/Documents/ATBackup`
/// where the platform has no documents directory (headless Linux).
pub fn default_backup_root() -> Option<PathBuf> {
    dirs::document_dir()
        .or_else(|| dirs::home_dir().map(|home| home.join("Documents")))
        .map(|docs| docs.join(BACKUP_ROOT_DIR))
}

/// `<config dir>/atbackup/settings.json`
pub fn default_settings_path() -> Option<PathBuf> {
    dirs::config_dir()
        .or_else(dirs::home_dir)
        .map(|dir| dir.join(APP_DIR).join(SETTINGS_FILENAME))
}

/// Create the backup root if it does not exist yet.
pub async fn ensure_backup_root(root: &Path) -> std::io::Result<()> {
    tokio::fs::create_dir_all(root).await
}

/// Directory name for a rotating backup created at `now`: `<YYYY-MM-DD>_backup`.
///
/// Day granularity in UTC, so at most one dated backup exists per calendar day.
pub fn dated_backup_dir_name(now: DateTime<Utc>) -> String {
    format!("{}_backup", now.format("%Y-%m-%d"))
}

pub fn metadata_path(backup_dir: &Path) -> PathBuf {
    backup_dir.join(METADATA_FILENAME)
}

pub fn blob_file_name(cid: &str) -> String {
    format!("{cid}.blob")
}

pub fn blob_metadata_file_name(cid: &str) -> String {
    format!("{cid}.json")
}
