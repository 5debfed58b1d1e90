//! # Backup orchestrator
//!
//! Produces one on-disk backup of an authenticated account and applies
//! retention afterwards.
//!
//! ## Stages
//!
//! | Stage      | Progress | Work                                             |
//! |------------|----------|--------------------------------------------------|
//! | `fetching` | 10       | `getRepo` for the whole repository archive       |
//! | `writing`  | 30       | stats, `repo.car`, `metadata.json`               |
//! | `blobs`    | 40-80    | list + download blobs, rewrite `metadata.json`   |
//! | `cleanup`  | 90       | rotating retention                               |
//! | `complete` | 100      |                                                  |
//!
//! Fetch and write failures abort the run (a final `failed` report is sent).
//! Blob and cleanup failures are logged and the run still completes.
//!
//! ## Retention
//!
//! - rotating (default): `<YYYY-MM-DD>_backup/`, same-day runs replace the
//!   day's directory, only the newest `max_backups` survive
//! - single-slot (`overwrite`): every backup directory is removed, then the
//!   backup is written to `current_backup/`

mod blobs;
mod progress;
mod retention;

pub use blobs::BlobSummary;
pub use progress::{BackupProgress, BackupStage, ProgressCallback};

use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};

use crate::backup_catalog::BackupCatalog;
use crate::backup_common::{calculate_bytes_hash, write_json_atomic};
use crate::models::{BackupKind, BackupRecord, RepoStats};
use crate::paths::{
    dated_backup_dir_name, ensure_backup_root, metadata_path, ARCHIVE_FILENAME, BLOBS_DIR,
    CURRENT_BACKUP_DIR,
};
use crate::repo_stats::StatsError;
use crate::session::{RepoSession, SessionError};
use progress::{
    ProgressReporter, BLOBS_DONE_PERCENT, CLEANUP_PERCENT, COMPLETE_PERCENT, FETCHING_PERCENT,
    WRITING_PERCENT,
};

#[derive(Debug, thiserror::Error)]
pub enum BackupError {
    #[error("not signed in: no account identifier available")]
    Unauthenticated,

    #[error("failed to fetch repository archive: {0}")]
    ArchiveFetch(#[source] SessionError),

    #[error("failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to read repository archive: {0}")]
    Stats(#[from] StatsError),

    #[error("cannot read backup location {path}: {source}")]
    Catalog {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("backup {0} was made without blobs")]
    NoBlobs(PathBuf),

    #[error("invalid blob identifier: {0}")]
    InvalidBlobId(String),
}

impl BackupError {
    fn write(path: &Path) -> impl FnOnce(std::io::Error) -> BackupError + '_ {
        move |source| BackupError::Write {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Per-run options
pub struct BackupOptions {
    pub download_blobs: bool,
    /// Single-slot retention instead of rotating dated backups
    pub overwrite: bool,
    pub on_progress: Option<ProgressCallback>,
}

impl Default for BackupOptions {
    fn default() -> Self {
        Self {
            download_blobs: true,
            overwrite: false,
            on_progress: None,
        }
    }
}

impl BackupOptions {
    pub fn with_progress(mut self, callback: impl Fn(BackupProgress) + Send + Sync + 'static) -> Self {
        self.on_progress = Some(Box::new(callback));
        self
    }
}

impl std::fmt::Debug for BackupOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackupOptions")
            .field("download_blobs", &self.download_blobs)
            .field("overwrite", &self.overwrite)
            .field("on_progress", &self.on_progress.is_some())
            .finish()
    }
}

/// Runs backups into one backup root
#[derive(Debug, Clone)]
pub struct BackupAgent {
    root: PathBuf,
    max_backups: usize,
    catalog: BackupCatalog,
}

impl BackupAgent {
    pub fn new(root: impl Into<PathBuf>, max_backups: usize) -> Self {
        let root = root.into();
        Self {
            catalog: BackupCatalog::new(root.clone()),
            root,
            max_backups: max_backups.max(1),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn max_backups(&self) -> usize {
        self.max_backups
    }

    pub fn catalog(&self) -> &BackupCatalog {
        &self.catalog
    }

    pub async fn run(
        &self,
        session: &dyn RepoSession,
        options: BackupOptions,
    ) -> Result<BackupRecord, BackupError> {
        self.run_at(session, options, Utc::now()).await
    }

    /// Run a backup stamped with `now` (record timestamp and directory name).
    pub async fn run_at(
        &self,
        session: &dyn RepoSession,
        options: BackupOptions,
        now: DateTime<Utc>,
    ) -> Result<BackupRecord, BackupError> {
        let progress = ProgressReporter::new(options.on_progress.as_ref());

        match self.execute(session, &options, now, &progress).await {
            Ok(record) => {
                progress.report(BackupStage::Complete, "Backup complete", COMPLETE_PERCENT);
                tracing::info!(
                    "[Backup] Backup of {} complete: {} records, {} blobs",
                    record.account_id,
                    record.stats.record_count,
                    record.blob_count.unwrap_or(0)
                );
                Ok(record)
            }
            Err(e) => {
                tracing::error!("[Backup] Backup failed: {}", e);
                progress.report(BackupStage::Failed, e.to_string(), 0);
                Err(e)
            }
        }
    }

    async fn execute(
        &self,
        session: &dyn RepoSession,
        options: &BackupOptions,
        now: DateTime<Utc>,
        progress: &ProgressReporter<'_>,
    ) -> Result<BackupRecord, BackupError> {
        let did = session
            .did()
            .filter(|did| !did.trim().is_empty())
            .ok_or(BackupError::Unauthenticated)?;
        tracing::info!(
            "[Backup] Starting backup of {} via {} (blobs: {}, overwrite: {})",
            did,
            session.provider_name(),
            options.download_blobs,
            options.overwrite
        );

        // 1. fetch
        progress.report(
            BackupStage::Fetching,
            "Fetching repository archive",
            FETCHING_PERCENT,
        );
        let car = session
            .get_repo(&did)
            .await
            .map_err(BackupError::ArchiveFetch)?;
        tracing::info!("[Backup] Fetched archive: {} bytes", car.len());

        // 2. write
        progress.report(BackupStage::Writing, "Writing backup files", WRITING_PERCENT);
        let stats = RepoStats::from_car(&car, now).await?;

        if options.overwrite {
            let removed = retention::purge_all(&self.root).await;
            tracing::info!("[Backup] Single-slot mode: removed {} previous backups", removed);
        }

        let dir_name = if options.overwrite {
            CURRENT_BACKUP_DIR.to_string()
        } else {
            dated_backup_dir_name(now)
        };
        let backup_dir = self.root.join(dir_name);

        let mut record = match self.write_backup(&backup_dir, &did, &car, stats, now).await {
            Ok(record) => record,
            Err(e) => {
                if let Err(cleanup) = tokio::fs::remove_dir_all(&backup_dir).await {
                    if cleanup.kind() != std::io::ErrorKind::NotFound {
                        tracing::warn!(
                            "[Backup] Could not remove partial backup {}: {}",
                            backup_dir.display(),
                            cleanup
                        );
                    }
                }
                return Err(e);
            }
        };

        // 3. blobs
        if options.download_blobs {
            let blobs_dir = backup_dir.join(BLOBS_DIR);
            if let Some(summary) = blobs::download_blobs(session, &did, &blobs_dir, progress).await {
                if summary.failed > 0 {
                    tracing::warn!(
                        "[Backup] {} of {} blobs could not be downloaded",
                        summary.failed,
                        summary.listed
                    );
                }
                record = self.attach_blobs(&backup_dir, record, &summary).await;
            }
        } else {
            progress.report(BackupStage::Blobs, "Skipping blob download", BLOBS_DONE_PERCENT);
        }

        // 4. cleanup
        progress.report(BackupStage::Cleanup, "Cleaning up old backups", CLEANUP_PERCENT);
        if !options.overwrite {
            let removed = retention::apply_rotating(&self.catalog, self.max_backups).await;
            if removed > 0 {
                tracing::info!("[Backup] Removed {} old backups", removed);
            }
        }

        Ok(record)
    }

    /// Write `repo.car` and `metadata.json` into a fresh `backup_dir`.
    async fn write_backup(
        &self,
        backup_dir: &Path,
        did: &str,
        car: &[u8],
        stats: RepoStats,
        now: DateTime<Utc>,
    ) -> Result<BackupRecord, BackupError> {
        ensure_backup_root(&self.root)
            .await
            .map_err(BackupError::write(&self.root))?;

        match tokio::fs::remove_dir_all(backup_dir).await {
            Ok(()) => tracing::info!("[Backup] Replacing existing backup {}", backup_dir.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(BackupError::write(backup_dir)(e)),
        }
        tokio::fs::create_dir_all(backup_dir)
            .await
            .map_err(BackupError::write(backup_dir))?;

        let archive_path = backup_dir.join(ARCHIVE_FILENAME);
        tokio::fs::write(&archive_path, car)
            .await
            .map_err(BackupError::write(&archive_path))?;

        let record = BackupRecord {
            account_id: did.to_string(),
            timestamp: now,
            backup_kind: BackupKind::FullRepo,
            archive_path,
            blobs_path: None,
            blob_count: None,
            archive_sha256: Some(calculate_bytes_hash(car)),
            stats,
        };

        let meta_path = metadata_path(backup_dir);
        write_json_atomic(&meta_path, &record)
            .await
            .map_err(BackupError::write(&meta_path))?;

        tracing::info!("[Backup] Wrote {}", backup_dir.display());
        Ok(record)
    }

    /// Rewrite `metadata.json` with blob fields. On failure the record on
    /// disk keeps its original content and is returned unchanged.
    async fn attach_blobs(
        &self,
        backup_dir: &Path,
        record: BackupRecord,
        summary: &BlobSummary,
    ) -> BackupRecord {
        let updated = BackupRecord {
            blobs_path: Some(summary.dir.clone()),
            blob_count: Some(summary.downloaded),
            ..record.clone()
        };

        let meta_path = metadata_path(backup_dir);
        match write_json_atomic(&meta_path, &updated).await {
            Ok(()) => updated,
            Err(e) => {
                tracing::warn!(
                    "[Backup] Failed to record blob stats in {}: {}",
                    meta_path.display(),
                    e
                );
                record
            }
        }
    }
}
