//! Staged progress reports for a backup run

use serde::{Deserialize, Serialize};

/// Stage of a backup run, reported in this order.
/// `Failed` only appears as the last report of an aborted run.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BackupStage {
    Fetching,
    Writing,
    Blobs,
    Cleanup,
    Complete,
    Failed,
}

impl std::fmt::Display for BackupStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            BackupStage::Fetching => "fetching",
            BackupStage::Writing => "writing",
            BackupStage::Blobs => "blobs",
            BackupStage::Cleanup => "cleanup",
            BackupStage::Complete => "complete",
            BackupStage::Failed => "failed",
        };
        f.write_str(name)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct BackupProgress {
    pub stage: BackupStage,
    pub message: String,
    /// 0-100
    pub progress: u8,
    /// Blob being downloaded (1-based), per-blob reports only
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total: Option<u64>,
}

pub type ProgressCallback = Box<dyn Fn(BackupProgress) + Send + Sync>;

// Stage percentages
pub(crate) const FETCHING_PERCENT: u8 = 10;
pub(crate) const WRITING_PERCENT: u8 = 30;
pub(crate) const BLOBS_PREPARE_PERCENT: u8 = 40;
pub(crate) const BLOBS_LISTING_PERCENT: u8 = 45;
pub(crate) const BLOBS_FIRST_PERCENT: u8 = 50;
pub(crate) const BLOBS_DONE_PERCENT: u8 = 80;
pub(crate) const CLEANUP_PERCENT: u8 = 90;
pub(crate) const COMPLETE_PERCENT: u8 = 100;

/// Percentage for blob `current` of `total`, spread over 50..=80.
pub(crate) fn blob_percent(current: u64, total: u64) -> u8 {
    if total == 0 {
        return BLOBS_DONE_PERCENT;
    }
    let span = u64::from(BLOBS_DONE_PERCENT - BLOBS_FIRST_PERCENT);
    let offset = current.min(total) * span / total;
    BLOBS_FIRST_PERCENT + offset as u8
}

/// Forwards reports to the caller's callback, if any, and mirrors them to the log.
pub(crate) struct ProgressReporter<'a> {
    callback: Option<&'a ProgressCallback>,
}

impl<'a> ProgressReporter<'a> {
    pub(crate) fn new(callback: Option<&'a ProgressCallback>) -> Self {
        Self { callback }
    }

    pub(crate) fn report(&self, stage: BackupStage, message: impl Into<String>, progress: u8) {
        self.emit(BackupProgress {
            stage,
            message: message.into(),
            progress,
            current: None,
            total: None,
        });
    }

    pub(crate) fn report_blob(&self, current: u64, total: u64, message: impl Into<String>) {
        self.emit(BackupProgress {
            stage: BackupStage::Blobs,
            message: message.into(),
            progress: blob_percent(current, total),
            current: Some(current),
            total: Some(total),
        });
    }

    fn emit(&self, progress: BackupProgress) {
        tracing::debug!(
            "[Backup] {} {}%: {}",
            progress.stage,
            progress.progress,
            progress.message
        );
        if let Some(callback) = self.callback {
            callback(progress);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[test]
    fn test_blob_percent_spans_fifty_to_eighty() {
        assert_eq!(blob_percent(1, 1), 80);
        assert_eq!(blob_percent(1, 3), 60);
        assert_eq!(blob_percent(2, 3), 70);
        assert_eq!(blob_percent(3, 3), 80);
        assert_eq!(blob_percent(0, 0), 80);
        assert_eq!(blob_percent(10, 3), 80, "clamped to total");
    }

    #[test]
    fn test_blob_percent_is_monotonic() {
        let total = 997;
        let mut last = BLOBS_FIRST_PERCENT;
        for i in 1..=total {
            let p = blob_percent(i, total);
            assert!(p >= last);
            assert!((BLOBS_FIRST_PERCENT..=BLOBS_DONE_PERCENT).contains(&p));
            last = p;
        }
    }

    #[test]
    fn test_reporter_forwards_to_callback() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let callback: ProgressCallback = Box::new(move |p| sink.lock().unwrap().push(p));

        let reporter = ProgressReporter::new(Some(&callback));
        reporter.report(BackupStage::Fetching, "Fetching", FETCHING_PERCENT);
        reporter.report_blob(2, 4, "blob 2/4");

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0].stage, BackupStage::Fetching);
        assert_eq!(seen[1].current, Some(2));
        assert_eq!(seen[1].total, Some(4));
        assert_eq!(seen[1].progress, 65);
    }

    #[test]
    fn test_reporter_without_callback_is_silent() {
        ProgressReporter::new(None).report(BackupStage::Complete, "done", COMPLETE_PERCENT);
    }

    #[test]
    fn test_stage_serializes_snake_case() {
        assert_eq!(
            serde_json::to_value(BackupStage::Complete).unwrap(),
            serde_json::json!("complete")
        );
    }
}
