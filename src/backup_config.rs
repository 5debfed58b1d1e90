//! Application configuration
//!
//! Sources, lowest to highest priority:
//! - built-in defaults
//! - `atbackup.toml` in the working directory, or the file given with `--config`
//! - `ATBACKUP__*` environment variables (after `.env` is loaded by dotenvy),
//!   e.g. `ATBACKUP__SERVICE__DID=did:plc:...`, `ATBACKUP__MAX_BACKUPS=5`

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Default number of dated backups kept by rotating retention
pub const DEFAULT_MAX_BACKUPS: usize = 3;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("invalid configuration: {0}")]
    Invalid(String),

    #[error("cannot resolve {0}: no home/documents directory on this platform")]
    NoPlatformDir(&'static str),
}

/// PDS connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub pds_url: String,
    /// Account to back up; `None` means not signed in
    pub did: Option<String>,
    /// Bearer token from the OAuth client, if the PDS requires one
    pub access_token: Option<String>,
    pub timeout_secs: u64,
    pub max_retries: u32,
    pub retry_initial_delay_ms: u64,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            pds_url: "https://bsky.social".to_string(),
            did: None,
            access_token: None,
            timeout_secs: 300,
            max_retries: 2,
            retry_initial_delay_ms: 200,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Seconds between due-checks, hourly by default
    pub check_interval_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            check_interval_secs: 3600,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Overrides `<documents>/ATBackup`
    pub backup_root: Option<PathBuf>,
    /// Overrides `<config dir>/atbackup/settings.json`
    pub settings_path: Option<PathBuf>,
    pub max_backups: usize,
    pub download_blobs: bool,
    /// Single-slot retention instead of rotating dated backups
    pub overwrite: bool,
    pub service: ServiceConfig,
    pub scheduler: SchedulerConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            backup_root: None,
            settings_path: None,
            max_backups: DEFAULT_MAX_BACKUPS,
            download_blobs: true,
            overwrite: false,
            service: ServiceConfig::default(),
            scheduler: SchedulerConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load configuration from file + environment.
    ///
    /// An explicit `path` must exist; the implicit `atbackup.toml` is optional.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let mut builder = config::Config::builder();
        builder = match path {
            Some(p) => builder.add_source(config::File::from(p).required(true)),
            None => builder.add_source(config::File::with_name("atbackup").required(false)),
        };
        builder = builder.add_source(
            config::Environment::with_prefix("ATBACKUP")
                .separator("__")
                .try_parsing(true),
        );

        let config: AppConfig = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_backups == 0 {
            return Err(ConfigError::Invalid(
                "max_backups must be at least 1".to_string(),
            ));
        }
        if self.scheduler.check_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "scheduler.check_interval_secs must be at least 1".to_string(),
            ));
        }
        if self.service.timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "service.timeout_secs must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Effective backup root: the configured override, else `<documents>/ATBackup`
    pub fn backup_root(&self) -> Result<PathBuf, ConfigError> {
        match &self.backup_root {
            Some(dir) => Ok(dir.clone()),
            None => crate::paths::default_backup_root()
                .ok_or(ConfigError::NoPlatformDir("backup directory")),
        }
    }

    /// Effective settings file path
    pub fn settings_path(&self) -> Result<PathBuf, ConfigError> {
        match &self.settings_path {
            Some(path) => Ok(path.clone()),
            None => crate::paths::default_settings_path()
                .ok_or(ConfigError::NoPlatformDir("settings file")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_app_config_default_values() {
        let config = AppConfig::default();
        assert!(config.backup_root.is_none(), "no custom backup root by default");
        assert_eq!(config.max_backups, 3, "keep three dated backups by default");
        assert!(config.download_blobs, "blobs are downloaded by default");
        assert!(!config.overwrite, "rotating retention by default");
        assert_eq!(config.scheduler.check_interval_secs, 3600);
        assert_eq!(config.service.pds_url, "https://bsky.social");
        assert!(config.service.did.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_from_toml_file_fills_missing_keys_with_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("atbackup.toml");
        std::fs::write(
            &path,
            r#"
max_backups = 5
download_blobs = false

[service]
did = "did:plc:abc123"

[scheduler]
check_interval_secs = 60
"#,
        )
        .unwrap();

        let config = AppConfig::load(Some(&path)).unwrap();
        assert_eq!(config.max_backups, 5);
        assert!(!config.download_blobs);
        assert_eq!(config.service.did.as_deref(), Some("did:plc:abc123"));
        assert_eq!(config.service.pds_url, "https://bsky.social");
        assert_eq!(config.scheduler.check_interval_secs, 60);
    }

    #[test]
    fn test_load_missing_explicit_file_fails() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("nope.toml");
        assert!(AppConfig::load(Some(&missing)).is_err());
    }

    #[test]
    fn test_validate_rejects_zero_values() {
        let config = AppConfig {
            max_backups: 0,
            ..AppConfig::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let mut config = AppConfig::default();
        config.scheduler.check_interval_secs = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_backup_root_prefers_override() {
        let config = AppConfig {
            backup_root: Some(PathBuf::from("/tmp/custom_root")),
            ..AppConfig::default()
        };
        assert_eq!(config.backup_root().unwrap(), PathBuf::from("/tmp/custom_root"));
    }
}
