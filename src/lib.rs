// ATBackup library entry
// The `atbackup` binary wires these modules together; everything is usable as a library too.

pub mod backup;
pub mod backup_catalog;
pub mod backup_common;
pub mod backup_config;
pub mod backup_scheduler;
pub mod models;
pub mod paths;
pub mod repo_stats;
pub mod session;
pub mod settings;
pub mod store;
pub mod test_utils;

pub use backup::{BackupAgent, BackupError, BackupOptions, BackupProgress, BackupStage};
pub use backup_catalog::{ArchiveCheck, BackupCatalog};
pub use backup_config::AppConfig;
pub use backup_scheduler::{BackupScheduler, CheckOutcome};
pub use models::{BackupRecord, RepoStats};
pub use settings::{AppSettings, BackupFrequency, SettingsManager};
