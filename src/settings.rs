//! User preferences
//!
//! Stored under the `"settings"` key as `{ backupFrequency, lastBackupDate }`.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::store::{self, KeyValueStore};

/// Store key of the settings record
const SETTINGS_KEY: &str = "settings";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackupFrequency {
    #[default]
    Daily,
    Weekly,
}

impl BackupFrequency {
    /// Minimum time between two automatic backups
    pub fn interval(self) -> Duration {
        match self {
            BackupFrequency::Daily => Duration::hours(24),
            BackupFrequency::Weekly => Duration::days(7),
        }
    }
}

impl std::fmt::Display for BackupFrequency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BackupFrequency::Daily => f.write_str("daily"),
            BackupFrequency::Weekly => f.write_str("weekly"),
        }
    }
}

impl std::str::FromStr for BackupFrequency {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "daily" => Ok(BackupFrequency::Daily),
            "weekly" => Ok(BackupFrequency::Weekly),
            other => Err(format!("unknown backup frequency '{other}' (expected daily or weekly)")),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppSettings {
    #[serde(default)]
    pub backup_frequency: BackupFrequency,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_backup_date: Option<DateTime<Utc>>,
}

impl AppSettings {
    /// Whether an automatic backup is due at `now`.
    ///
    /// Due when no backup was ever recorded, or when at least one full
    /// frequency interval has elapsed since the last one.
    pub fn is_backup_due(&self, now: DateTime<Utc>) -> bool {
        match self.last_backup_date {
            None => true,
            Some(last) => now.signed_duration_since(last) >= self.backup_frequency.interval(),
        }
    }
}

/// Partial update, `None` fields keep their current value
#[derive(Debug, Clone, Default)]
pub struct SettingsPatch {
    pub backup_frequency: Option<BackupFrequency>,
    pub last_backup_date: Option<DateTime<Utc>>,
}

/// Reads and writes `AppSettings` through an injected store
#[derive(Clone)]
pub struct SettingsManager {
    store: Arc<dyn KeyValueStore>,
}

impl SettingsManager {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    /// Current settings; defaults when nothing is stored or the record is unreadable.
    pub async fn settings(&self) -> AppSettings {
        match self.try_settings().await {
            Ok(settings) => settings,
            Err(e) => {
                tracing::warn!("[Settings] Failed to load settings, using defaults: {}", e);
                AppSettings::default()
            }
        }
    }

    async fn try_settings(&self) -> Result<AppSettings, String> {
        match self.store.get(SETTINGS_KEY).await.map_err(|e| e.to_string())? {
            Some(value) => serde_json::from_value(value).map_err(|e| e.to_string()),
            None => Ok(AppSettings::default()),
        }
    }

    pub async fn update(&self, patch: SettingsPatch) -> store::Result<AppSettings> {
        let mut settings = self.settings().await;
        if let Some(frequency) = patch.backup_frequency {
            settings.backup_frequency = frequency;
        }
        if let Some(date) = patch.last_backup_date {
            settings.last_backup_date = Some(date);
        }

        // AppSettings has only plain fields, serialization cannot fail
        let value = serde_json::to_value(&settings).unwrap_or_default();
        self.store.set(SETTINGS_KEY, value).await?;
        tracing::info!(
            "[Settings] Saved: frequency={}, last_backup={:?}",
            settings.backup_frequency,
            settings.last_backup_date
        );
        Ok(settings)
    }

    pub async fn set_backup_frequency(&self, frequency: BackupFrequency) -> store::Result<()> {
        self.update(SettingsPatch {
            backup_frequency: Some(frequency),
            ..Default::default()
        })
        .await
        .map(|_| ())
    }

    pub async fn set_last_backup_date(&self, date: DateTime<Utc>) -> store::Result<()> {
        self.update(SettingsPatch {
            last_backup_date: Some(date),
            ..Default::default()
        })
        .await
        .map(|_| ())
    }

    pub async fn last_backup_date(&self) -> Option<DateTime<Utc>> {
        self.settings().await.last_backup_date
    }

    pub async fn backup_frequency(&self) -> BackupFrequency {
        self.settings().await.backup_frequency
    }
}
