//! Blob download stage
//!
//! Lists every blob of the account, then downloads them one at a time in
//! listing order. Each blob is written as `<cid>.blob` with a `<cid>.json`
//! sidecar. A blob that cannot be fetched or written is skipped.

use chrono::Utc;
use std::path::{Path, PathBuf};

use super::progress::{
    BackupStage, ProgressReporter, BLOBS_DONE_PERCENT, BLOBS_LISTING_PERCENT,
    BLOBS_PREPARE_PERCENT,
};
use crate::backup_common::is_safe_blob_id;
use crate::models::BlobMetadata;
use crate::paths::{blob_file_name, blob_metadata_file_name};
use crate::session::RepoSession;

/// Outcome of the blob stage
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobSummary {
    pub dir: PathBuf,
    pub listed: u64,
    pub downloaded: u64,
    pub failed: u64,
}

/// Download all blobs of `did` into `blobs_dir`.
///
/// Returns `None` when the listing itself fails or the directory cannot be
/// created; the backup then simply carries no blob fields. The stage always
/// closes with its 80 % report.
pub(crate) async fn download_blobs(
    session: &dyn RepoSession,
    did: &str,
    blobs_dir: &Path,
    progress: &ProgressReporter<'_>,
) -> Option<BlobSummary> {
    progress.report(
        BackupStage::Blobs,
        "Preparing blob download",
        BLOBS_PREPARE_PERCENT,
    );

    if let Err(e) = tokio::fs::create_dir_all(blobs_dir).await {
        tracing::warn!(
            "[Backup] Failed to create blob directory {}: {}",
            blobs_dir.display(),
            e
        );
        progress.report(
            BackupStage::Blobs,
            "Blob directory unavailable, skipping blobs",
            BLOBS_DONE_PERCENT,
        );
        return None;
    }

    progress.report(
        BackupStage::Blobs,
        "Extracting blob references",
        BLOBS_LISTING_PERCENT,
    );
    let cids = match session.list_all_blobs(did).await {
        Ok(cids) => cids,
        Err(e) => {
            tracing::warn!("[Backup] Blob listing failed, continuing without blobs: {}", e);
            // only removes the directory if nothing was written into it
            let _ = tokio::fs::remove_dir(blobs_dir).await;
            progress.report(
                BackupStage::Blobs,
                "Blob listing failed, skipping blobs",
                BLOBS_DONE_PERCENT,
            );
            return None;
        }
    };

    let total = cids.len() as u64;
    tracing::info!("[Backup] {} blobs to download", total);

    let mut downloaded = 0u64;
    let mut failed = 0u64;
    for (index, cid) in cids.iter().enumerate() {
        let current = index as u64 + 1;
        progress.report_blob(current, total, format!("Downloading blob {current}/{total}"));

        match download_one(session, did, blobs_dir, cid).await {
            Ok(()) => downloaded += 1,
            Err(reason) => {
                failed += 1;
                tracing::warn!("[Backup] Skipping blob {}: {}", cid, reason);
            }
        }
    }

    progress.report(
        BackupStage::Blobs,
        format!("Downloaded {downloaded} of {total} blobs"),
        BLOBS_DONE_PERCENT,
    );

    Some(BlobSummary {
        dir: blobs_dir.to_path_buf(),
        listed: total,
        downloaded,
        failed,
    })
}

async fn download_one(
    session: &dyn RepoSession,
    did: &str,
    blobs_dir: &Path,
    cid: &str,
) -> Result<(), String> {
    if !is_safe_blob_id(cid) {
        return Err("identifier is not a valid CID".to_string());
    }

    let data = session
        .get_blob(did, cid)
        .await
        .map_err(|e| format!("fetch failed: {e}"))?;

    let blob_path = blobs_dir.join(blob_file_name(cid));
    tokio::fs::write(&blob_path, &data)
        .await
        .map_err(|e| format!("write {} failed: {e}", blob_path.display()))?;

    let sidecar = BlobMetadata {
        cid: cid.to_string(),
        size: data.len() as u64,
        downloaded_at: Utc::now(),
    };
    let sidecar_path = blobs_dir.join(blob_metadata_file_name(cid));
    let json = serde_json::to_vec_pretty(&sidecar).map_err(|e| e.to_string())?;
    if let Err(e) = tokio::fs::write(&sidecar_path, json).await {
        // no half-described blobs on disk
        let _ = tokio::fs::remove_file(&blob_path).await;
        return Err(format!("write {} failed: {e}", sidecar_path.display()));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backup::progress::{BackupProgress, ProgressCallback};
    use crate::test_utils::MockSession;
    use std::sync::{Arc, Mutex};
    use tempfile::TempDir;

    const DID: &str = "did:plc:blobtest";

    fn recorder() -> (ProgressCallback, Arc<Mutex<Vec<BackupProgress>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        (Box::new(move |p| sink.lock().unwrap().push(p)), seen)
    }

    #[tokio::test]
    async fn test_downloads_blobs_with_sidecars() {
        let dir = TempDir::new().unwrap();
        let blobs_dir = dir.path().join("blobs");
        let session = MockSession::new(DID, Vec::new())
            .with_blob("bafkreiaaaa", b"first")
            .with_blob("bafkreibbbb", b"second blob");

        let summary = download_blobs(&session, DID, &blobs_dir, &ProgressReporter::new(None))
            .await
            .unwrap();

        assert_eq!(summary.downloaded, 2);
        assert_eq!(summary.failed, 0);
        assert_eq!(
            std::fs::read(blobs_dir.join("bafkreibbbb.blob")).unwrap(),
            b"second blob"
        );
        let sidecar: BlobMetadata = serde_json::from_slice(
            &std::fs::read(blobs_dir.join("bafkreibbbb.json")).unwrap(),
        )
        .unwrap();
        assert_eq!(sidecar.cid, "bafkreibbbb");
        assert_eq!(sidecar.size, 11);
    }

    #[tokio::test]
    async fn test_failed_and_unsafe_blobs_are_skipped() {
        let dir = TempDir::new().unwrap();
        let blobs_dir = dir.path().join("blobs");
        let session = MockSession::new(DID, Vec::new())
            .with_blob("bafkreiaaaa", b"ok")
            .with_failing_blob("bafkreibroken")
            .with_blob("../escape", b"nope");

        let summary = download_blobs(&session, DID, &blobs_dir, &ProgressReporter::new(None))
            .await
            .unwrap();

        assert_eq!(summary.listed, 3);
        assert_eq!(summary.downloaded, 1);
        assert_eq!(summary.failed, 2);
        assert!(!blobs_dir.join("bafkreibroken.blob").exists());
        assert!(!dir.path().join("escape.blob").exists());
    }

    #[tokio::test]
    async fn test_listing_failure_yields_none() {
        let dir = TempDir::new().unwrap();
        let blobs_dir = dir.path().join("blobs");
        let session = MockSession::new(DID, Vec::new()).with_list_failure();
        let (callback, seen) = recorder();

        let summary =
            download_blobs(&session, DID, &blobs_dir, &ProgressReporter::new(Some(&callback)))
                .await;

        assert!(summary.is_none());
        assert!(!blobs_dir.exists(), "empty blob directory is removed");
        let percents: Vec<u8> = seen.lock().unwrap().iter().map(|p| p.progress).collect();
        assert_eq!(percents, vec![40, 45, 80]);
    }

    #[tokio::test]
    async fn test_uncreatable_blob_dir_still_closes_stage() {
        let dir = TempDir::new().unwrap();
        let occupied = dir.path().join("blobs");
        std::fs::write(&occupied, "a file where the blob directory should be").unwrap();
        let session = MockSession::new(DID, Vec::new()).with_blob("bafkreiaaaa", b"a");
        let (callback, seen) = recorder();

        let summary =
            download_blobs(&session, DID, &occupied, &ProgressReporter::new(Some(&callback)))
                .await;

        assert!(summary.is_none());
        assert_eq!(session.list_blobs_calls.load(std::sync::atomic::Ordering::SeqCst), 0);
        let seen = seen.lock().unwrap();
        let percents: Vec<u8> = seen.iter().map(|p| p.progress).collect();
        assert_eq!(percents, vec![40, 80]);
        assert!(seen.iter().all(|p| p.stage == BackupStage::Blobs));
    }

    #[tokio::test]
    async fn test_reports_one_progress_per_blob() {
        let dir = TempDir::new().unwrap();
        let session = MockSession::new(DID, Vec::new())
            .with_page_size(1)
            .with_blob("bafkreiaaaa", b"a")
            .with_blob("bafkreibbbb", b"b")
            .with_blob("bafkreicccc", b"c");
        let (callback, seen) = recorder();

        download_blobs(
            &session,
            DID,
            &dir.path().join("blobs"),
            &ProgressReporter::new(Some(&callback)),
        )
        .await
        .unwrap();

        let seen = seen.lock().unwrap();
        let percents: Vec<u8> = seen.iter().map(|p| p.progress).collect();
        assert_eq!(percents, vec![40, 45, 60, 70, 80, 80]);
        assert!(seen.iter().all(|p| p.stage == BackupStage::Blobs));
        assert_eq!(seen[4].current, Some(3));
    }
}
