use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

use atbackup_lib::backup_catalog::CatalogEntry;
use atbackup_lib::session::{create_session, RepoSession};
use atbackup_lib::store::JsonFileStore;
use atbackup_lib::{
    AppConfig, ArchiveCheck, BackupAgent, BackupFrequency, BackupOptions, BackupScheduler,
    SettingsManager,
};

#[derive(Parser)]
#[command(
    name = "atbackup",
    about = "Local backups of AT Protocol (Bluesky) accounts",
    version = concat!(env!("CARGO_PKG_VERSION"), " (", env!("GIT_HASH"), ")")
)]
struct Cli {
    /// Configuration file (defaults to ./atbackup.toml if present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Back up the configured account now
    Backup {
        /// Skip blob (image/media) download
        #[arg(long)]
        no_blobs: bool,
        /// Keep a single backup in current_backup/ instead of dated backups
        #[arg(long)]
        overwrite: bool,
    },
    /// List backups, newest first
    List {
        #[arg(long)]
        json: bool,
    },
    /// Re-hash archives and compare with their metadata
    Verify {
        /// Backup directory name; all backups when omitted
        backup: Option<String>,
    },
    /// Copy one blob out of a backup
    RestoreBlob {
        /// Backup directory name, e.g. 2026-10-16_backup
        backup: String,
        cid: String,
        #[arg(long)]
        out: PathBuf,
    },
    /// Show or change backup preferences
    Settings {
        #[command(subcommand)]
        action: Option<SettingsAction>,
    },
    /// Run the automatic backup scheduler until Ctrl-C
    Daemon,
}

#[derive(Subcommand)]
enum SettingsAction {
    Show,
    /// Set the automatic backup frequency (daily or weekly)
    Frequency { value: BackupFrequency },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .from_env_lossy(),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = AppConfig::load(cli.config.as_deref()).context("loading configuration")?;

    match cli.command {
        Command::Backup {
            no_blobs,
            overwrite,
        } => run_backup(&config, !no_blobs, overwrite).await,
        Command::List { json } => list_backups(&config, json).await,
        Command::Verify { backup } => verify_backups(&config, backup.as_deref()).await,
        Command::RestoreBlob { backup, cid, out } => {
            restore_blob(&config, &backup, &cid, &out).await
        }
        Command::Settings { action } => {
            manage_settings(&config, action.unwrap_or(SettingsAction::Show)).await
        }
        Command::Daemon => run_daemon(&config).await,
    }
}

async fn open_settings(config: &AppConfig) -> anyhow::Result<SettingsManager> {
    let path = config.settings_path()?;
    let store = JsonFileStore::open(&path)
        .await
        .with_context(|| format!("opening settings at {}", path.display()))?;
    Ok(SettingsManager::new(Arc::new(store)))
}

fn agent(config: &AppConfig) -> anyhow::Result<BackupAgent> {
    Ok(BackupAgent::new(config.backup_root()?, config.max_backups))
}

async fn run_backup(config: &AppConfig, blobs: bool, overwrite: bool) -> anyhow::Result<()> {
    let session = create_session(&config.service)?;
    let settings = open_settings(config).await?;
    let agent = agent(config)?;

    let options = BackupOptions {
        download_blobs: config.download_blobs && blobs,
        overwrite: config.overwrite || overwrite,
        on_progress: None,
    }
    .with_progress(|p| eprintln!("[{:>3}%] {}", p.progress, p.message));

    let record = agent.run(session.as_ref(), options).await?;
    settings.set_last_backup_date(record.timestamp).await?;

    println!("Backup written to {}", record.archive_path.display());
    println!(
        "  {} records in {} collections, archive {}",
        record.stats.record_count,
        record.stats.collection_tags.len(),
        format_bytes(record.stats.file_size_bytes)
    );
    if let Some(count) = record.blob_count {
        println!("  {count} blobs");
    }
    Ok(())
}

async fn list_backups(config: &AppConfig, json: bool) -> anyhow::Result<()> {
    let records = agent(config)?.catalog().list_sorted().await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&records)?);
        return Ok(());
    }
    if records.is_empty() {
        println!("No backups found");
        return Ok(());
    }

    for record in records {
        let dir = record
            .archive_path
            .parent()
            .and_then(|p| p.file_name())
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        println!(
            "{:<20} {}  {}  {:>6} records  {:>9}  {} blobs",
            dir,
            record.timestamp.format("%Y-%m-%d %H:%M"),
            record.account_id,
            record.stats.record_count,
            format_bytes(record.stats.file_size_bytes),
            record
                .blob_count
                .map(|n| n.to_string())
                .unwrap_or_else(|| "-".to_string())
        );
    }
    Ok(())
}

async fn find_entry(agent: &BackupAgent, name: &str) -> anyhow::Result<CatalogEntry> {
    let entries = agent.catalog().entries().await?;
    match entries
        .into_iter()
        .find(|entry| entry.dir.file_name().is_some_and(|n| n == name))
    {
        Some(entry) => Ok(entry),
        None => bail!("no backup named '{name}' under {}", agent.root().display()),
    }
}

async fn verify_backups(config: &AppConfig, name: Option<&str>) -> anyhow::Result<()> {
    let agent = agent(config)?;
    let entries = match name {
        Some(name) => vec![find_entry(&agent, name).await?],
        None => agent.catalog().entries().await?,
    };

    let mut bad = 0;
    for entry in &entries {
        let label = entry.dir.display();
        match agent.catalog().verify_archive(&entry.record).await {
            Ok(ArchiveCheck::Valid) => println!("ok          {label}"),
            Ok(ArchiveCheck::Unverifiable) => println!("no digest   {label}"),
            Ok(ArchiveCheck::Mismatch { expected, actual }) => {
                bad += 1;
                println!("MISMATCH    {label} (expected {expected}, got {actual})");
            }
            Err(e) => {
                bad += 1;
                println!("ERROR       {label}: {e}");
            }
        }
    }

    if bad > 0 {
        bail!("{bad} of {} backups failed verification", entries.len());
    }
    Ok(())
}

async fn restore_blob(
    config: &AppConfig,
    backup: &str,
    cid: &str,
    out: &Path,
) -> anyhow::Result<()> {
    let agent = agent(config)?;
    let entry = find_entry(&agent, backup).await?;
    let Some(data) = agent.catalog().read_blob(&entry.record, cid).await? else {
        bail!("blob {cid} is not part of backup {backup}");
    };

    tokio::fs::write(out, &data)
        .await
        .with_context(|| format!("writing {}", out.display()))?;
    println!("Restored {cid} ({}) to {}", format_bytes(data.len() as u64), out.display());
    Ok(())
}

async fn manage_settings(config: &AppConfig, action: SettingsAction) -> anyhow::Result<()> {
    let settings = open_settings(config).await?;
    if let SettingsAction::Frequency { value } = action {
        settings.set_backup_frequency(value).await?;
    }

    let current = settings.settings().await;
    println!("frequency:   {}", current.backup_frequency);
    match current.last_backup_date {
        Some(date) => println!("last backup: {}", date.to_rfc3339()),
        None => println!("last backup: never"),
    }
    println!(
        "due now:     {}",
        if current.is_backup_due(chrono::Utc::now()) { "yes" } else { "no" }
    );
    Ok(())
}

async fn run_daemon(config: &AppConfig) -> anyhow::Result<()> {
    let session = create_session(&config.service)?;
    let settings = open_settings(config).await?;
    let agent = Arc::new(agent(config)?);

    let scheduler = BackupScheduler::new(
        agent,
        settings,
        Duration::from_secs(config.scheduler.check_interval_secs),
    )
    .with_blobs(config.download_blobs);
    if session.did().is_none() {
        tracing::warn!("[AutoBackup] No account configured, due-checks will be skipped");
    }
    scheduler.set_session(signed_in(session)).await;
    scheduler.start();

    tokio::signal::ctrl_c().await?;
    tracing::info!("[AutoBackup] Shutting down");
    scheduler.shutdown().await;
    Ok(())
}

/// Only a session with a resolvable account is handed to the scheduler.
fn signed_in(session: Arc<dyn RepoSession>) -> Option<Arc<dyn RepoSession>> {
    session.did().is_some().then_some(session)
}

fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{value:.1} {}", UNITS[unit])
    }
}
