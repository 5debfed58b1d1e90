//! Automatic backup scheduler
//!
//! Two states: idle and armed. `start()` arms a tokio interval whose first
//! tick fires immediately; every tick runs one due-check against the stored
//! settings. `stop()` disarms. Both are idempotent. Disarming cancels the
//! timer only: a backup already running when `stop()` is called finishes and
//! records its date.
//!
//! Runs are single-flight: a check or `trigger()` arriving while a backup
//! is still running is skipped and logged.

use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::backup::{BackupAgent, BackupOptions};
use crate::models::BackupRecord;
use crate::session::RepoSession;
use crate::settings::SettingsManager;

/// Result of one due-check or trigger
#[derive(Debug)]
pub enum CheckOutcome {
    /// No signed-in session; nothing to do
    NoSession,
    NotDue,
    /// Another backup is still running
    AlreadyRunning,
    Completed(BackupRecord),
    Failed(String),
}

struct SchedulerInner {
    agent: Arc<BackupAgent>,
    settings: SettingsManager,
    session: RwLock<Option<Arc<dyn RepoSession>>>,
    interval: Duration,
    download_blobs: bool,
    running: AtomicBool,
    checks: AtomicUsize,
}

/// Resets the running flag when the backup finishes or unwinds
struct RunGuard<'a>(&'a AtomicBool);

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl SchedulerInner {
    async fn check(&self, now: DateTime<Utc>) -> CheckOutcome {
        self.checks.fetch_add(1, Ordering::SeqCst);

        let Some(session) = self.session.read().await.clone() else {
            tracing::debug!("[AutoBackup] No session, skipping due-check");
            return CheckOutcome::NoSession;
        };

        let settings = self.settings.settings().await;
        if !settings.is_backup_due(now) {
            tracing::debug!(
                "[AutoBackup] Not due (frequency={}, last={:?})",
                settings.backup_frequency,
                settings.last_backup_date
            );
            return CheckOutcome::NotDue;
        }

        tracing::info!(
            "[AutoBackup] {} backup is due, starting",
            settings.backup_frequency
        );
        self.run_backup(session, now).await
    }

    async fn run_backup(&self, session: Arc<dyn RepoSession>, now: DateTime<Utc>) -> CheckOutcome {
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            tracing::info!("[AutoBackup] Previous backup still running, skipping");
            return CheckOutcome::AlreadyRunning;
        }
        let _guard = RunGuard(&self.running);

        let options = BackupOptions {
            download_blobs: self.download_blobs,
            overwrite: false,
            on_progress: None,
        };
        match self.agent.run_at(session.as_ref(), options, now).await {
            Ok(record) => {
                // a failed save only means the next check retries early
                if let Err(e) = self.settings.set_last_backup_date(record.timestamp).await {
                    tracing::warn!("[AutoBackup] Failed to record backup time: {}", e);
                }
                tracing::info!(
                    "[AutoBackup] Backup complete: {}",
                    record.archive_path.display()
                );
                CheckOutcome::Completed(record)
            }
            Err(e) => {
                tracing::warn!("[AutoBackup] Backup failed, will retry on next check: {}", e);
                CheckOutcome::Failed(e.to_string())
            }
        }
    }
}

/// The spawned timer loop and the token that ends it
struct ArmedTimer {
    handle: JoinHandle<()>,
    cancel: CancellationToken,
}

/// Owned by the composition root; drop or `stop()` to disarm.
pub struct BackupScheduler {
    inner: Arc<SchedulerInner>,
    task: Mutex<Option<ArmedTimer>>,
}

impl BackupScheduler {
    pub fn new(agent: Arc<BackupAgent>, settings: SettingsManager, interval: Duration) -> Self {
        Self {
            inner: Arc::new(SchedulerInner {
                agent,
                settings,
                session: RwLock::new(None),
                interval: interval.max(Duration::from_secs(1)),
                download_blobs: true,
                running: AtomicBool::new(false),
                checks: AtomicUsize::new(0),
            }),
            task: Mutex::new(None),
        }
    }

    /// Whether scheduled backups download blobs (default true).
    /// Only takes effect before the scheduler is shared.
    pub fn with_blobs(mut self, download_blobs: bool) -> Self {
        if let Some(inner) = Arc::get_mut(&mut self.inner) {
            inner.download_blobs = download_blobs;
        }
        self
    }

    /// Supply (or clear) the session used by subsequent checks.
    pub async fn set_session(&self, session: Option<Arc<dyn RepoSession>>) {
        *self.inner.session.write().await = session;
    }

    /// idle -> armed. No-op when already armed. Must be called inside a tokio runtime.
    pub fn start(&self) {
        let mut task = self.task.lock().unwrap_or_else(PoisonError::into_inner);
        if task.as_ref().is_some_and(|timer| !timer.handle.is_finished()) {
            tracing::debug!("[AutoBackup] Scheduler already running");
            return;
        }

        let inner = self.inner.clone();
        let cancel = CancellationToken::new();
        let stopped = cancel.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(inner.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    biased;
                    _ = stopped.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                // the check itself is never raced against the token
                inner.check(Utc::now()).await;
            }
            tracing::debug!("[AutoBackup] Timer loop exited");
        });
        *task = Some(ArmedTimer { handle, cancel });
        tracing::info!(
            "[AutoBackup] Scheduler started, checking every {}s",
            self.inner.interval.as_secs()
        );
    }

    /// armed -> idle. No-op when idle. A backup already in progress runs to
    /// completion in the background.
    pub fn stop(&self) {
        if let Some(timer) = self.disarm() {
            drop(timer.handle);
            tracing::info!("[AutoBackup] Scheduler stopped");
        }
    }

    /// Like `stop()`, then waits for an in-progress backup to finish.
    pub async fn shutdown(&self) {
        let Some(timer) = self.disarm() else {
            return;
        };
        if self.is_backup_running() {
            tracing::info!("[AutoBackup] Waiting for the running backup to finish");
        }
        if let Err(e) = timer.handle.await {
            tracing::warn!("[AutoBackup] Timer task ended abnormally: {}", e);
        }
        tracing::info!("[AutoBackup] Scheduler stopped");
    }

    fn disarm(&self) -> Option<ArmedTimer> {
        let timer = self
            .task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()?;
        timer.cancel.cancel();
        Some(timer)
    }

    pub fn is_armed(&self) -> bool {
        self.task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|timer| !timer.handle.is_finished())
    }

    /// Run one due-check now, outside the timer.
    pub async fn check_now(&self) -> CheckOutcome {
        self.inner.check(Utc::now()).await
    }

    /// Due-check evaluated at `now`.
    pub async fn check_at(&self, now: DateTime<Utc>) -> CheckOutcome {
        self.inner.check(now).await
    }

    /// Backup requested by an external signal; skips the due-check.
    pub async fn trigger(&self) -> CheckOutcome {
        let Some(session) = self.inner.session.read().await.clone() else {
            tracing::info!("[AutoBackup] Trigger ignored, no session");
            return CheckOutcome::NoSession;
        };
        self.inner.run_backup(session, Utc::now()).await
    }

    /// Number of due-checks performed so far (timer and manual)
    pub fn checks_performed(&self) -> usize {
        self.inner.checks.load(Ordering::SeqCst)
    }

    pub fn is_backup_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }
}

impl Drop for BackupScheduler {
    fn drop(&mut self) {
        self.stop();
    }
}
