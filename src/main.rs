//! storj-uploader-rs: keeps a local photo and video library backed up to
//! Storj-backed storage.
//!
//! Each sync pass inventories the local directory and the remote bucket,
//! reconciles them by filename against a persistent upload ledger, admits
//! pending items under per-category quotas, and uploads them in batches.
//! `--watch` repeats passes on a schedule with linear backoff on failure.

#![warn(clippy::all)]

mod cli;
mod config;
mod lock;
mod media;
mod quota;
mod reconcile;
pub mod retry;
mod scheduler;
mod shutdown;
mod state;
mod sync;
mod transport;
mod types;
mod upload;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use cli::Command;
use config::Config;
use media::{DirectoryMediaSource, InventoryOptions, LocalMediaSource, MediaInventory, Origin};
use quota::QuotaTracker;
use state::{SqliteLedger, UploadLedger};
use sync::{PassVerdict, SyncOptions, SyncPass, SyncService};
use transport::{HttpTransport, Transport};
use types::OutputFormat;
use upload::{BatchOptions, UploadBatcher};

fn build_transport(api: &config::ApiConfig) -> anyhow::Result<Arc<dyn Transport>> {
    let transport = HttpTransport::new(&api.base_url, api.bucket.clone(), api.timeout)?;
    Ok(Arc::new(transport))
}

/// Open (creating if needed) the ledger inside `state_dir`.
async fn open_ledger(state_dir: &Path) -> anyhow::Result<Arc<SqliteLedger>> {
    tokio::fs::create_dir_all(state_dir)
        .await
        .with_context(|| format!("Failed to create state directory: {}", state_dir.display()))?;
    let path = state_dir.join(config::LEDGER_FILE_NAME);
    let ledger = SqliteLedger::open(&path).await?;
    tracing::debug!("Upload ledger opened at {}", ledger.path().display());
    Ok(Arc::new(ledger))
}

fn build_service(config: &Config, ledger: Arc<SqliteLedger>) -> anyhow::Result<SyncService> {
    if !config.media_dir.is_dir() {
        anyhow::bail!("Media directory does not exist: {}", config.media_dir.display());
    }
    let transport = build_transport(&config.api)?;
    let source: Arc<dyn LocalMediaSource> =
        Arc::new(DirectoryMediaSource::new(config.media_dir.clone()));
    let ledger: Arc<dyn UploadLedger> = ledger;

    let inventory = MediaInventory::new(
        source.clone(),
        transport.clone(),
        InventoryOptions {
            timeout: config.api.timeout,
            retry: config.api.retry.clone(),
            ..InventoryOptions::default()
        },
    );
    let batcher = UploadBatcher::new(
        transport,
        source,
        ledger.clone(),
        BatchOptions {
            concurrency: config.concurrency,
            call_timeout: config.api.timeout,
            no_progress_bar: config.no_progress_bar,
        },
    );

    Ok(SyncService::new(
        inventory,
        ledger,
        QuotaTracker::new(config.limits),
        batcher,
        SyncOptions {
            window: config.window,
            batch_size: config.batch_size,
            max_read_failures: config.max_read_failures,
            dry_run: config.dry_run,
        },
    ))
}

/// Run the sync command, once or under the scheduler.
async fn run_sync(state_dir: &str, args: cli::SyncArgs) -> anyhow::Result<()> {
    let config = Config::from_sync(state_dir, &args)?;
    let lock = lock::InstanceLock::acquire(&config.state_dir).await?;
    tracing::debug!("Holding instance lock {}", lock.path().display());

    let ledger = open_ledger(&config.state_dir).await?;
    let service = build_service(&config, ledger)?;
    tracing::info!(
        directory = %config.media_dir.display(),
        api = %config.api.base_url,
        batch_size = config.batch_size,
        concurrency = config.concurrency,
        "Starting storj-uploader-rs"
    );

    let shutdown_token = shutdown::install_signal_handler();

    if config.watch {
        let scheduler = scheduler::SyncScheduler::new(Arc::new(service), config.schedule.clone());
        let triggers = shutdown::install_trigger_handler();
        tracing::info!(pid = std::process::id(), "Send SIGUSR1 to sync immediately");
        tokio::join!(
            scheduler.run(shutdown_token.clone()),
            scheduler.listen_for_triggers(triggers, shutdown_token),
        );
        return Ok(());
    }

    let report = service.run_pass(&shutdown_token).await?;
    if report.verdict == PassVerdict::Failed {
        anyhow::bail!(
            "{} uploads failed{}",
            report.failed,
            report
                .last_error
                .map(|e| format!(" (last error: {})", e))
                .unwrap_or_default()
        );
    }
    Ok(())
}

/// Run the gallery command.
async fn run_gallery(state_dir: &str, args: cli::GalleryArgs) -> anyhow::Result<()> {
    let config = Config::from_pipeline(state_dir, &args.pipeline)?;
    let ledger = open_ledger(&config.state_dir).await?;
    let service = build_service(&config, ledger)?;
    let view = service.merged_gallery().await?;

    let items: Vec<_> = view
        .gallery
        .iter()
        .filter(|g| !args.pending || !g.is_uploaded)
        .collect();

    match args.format {
        OutputFormat::Json => {
            let rows: Vec<serde_json::Value> = items
                .iter()
                .map(|g| {
                    serde_json::json!({
                        "filename": g.record.filename,
                        "category": g.record.category().as_str(),
                        "origin": match g.record.origin {
                            Origin::Local => "local",
                            Origin::Remote => "remote",
                        },
                        "isUploaded": g.is_uploaded,
                        "sizeBytes": g.record.size_bytes,
                        "addedAt": g.record.added_at_epoch_sec,
                        "id": g.record.id,
                        "remotePath": g.record.remote_path,
                        "thumbnailUrl": g.record.thumbnail_url,
                    })
                })
                .collect();
            println!("{}", serde_json::to_string_pretty(&rows)?);
        }
        OutputFormat::Text => {
            for g in &items {
                let added = chrono::DateTime::from_timestamp(g.record.added_at_epoch_sec, 0)
                    .map(|d| d.format("%Y-%m-%d %H:%M").to_string())
                    .unwrap_or_else(|| "-".to_string());
                let marker = match (g.record.origin, g.is_uploaded) {
                    (Origin::Remote, _) => "remote ",
                    (Origin::Local, true) => "synced ",
                    (Origin::Local, false) => "pending",
                };
                println!(
                    "{}  {:5}  {}  {}",
                    marker,
                    g.record.category().as_str(),
                    added,
                    g.record.filename
                );
            }
            println!();
            println!(
                "{} items, {} uploaded, {} remote only{}",
                view.gallery.len(),
                view.uploaded_count(),
                view.remote_only_count(),
                if view.remote_available {
                    ""
                } else {
                    " (remote listing unavailable)"
                }
            );
        }
    }
    Ok(())
}

/// Run the quota command.
async fn run_quota(state_dir: &str, args: cli::PipelineArgs) -> anyhow::Result<()> {
    let config = Config::from_pipeline(state_dir, &args)?;
    let ledger = open_ledger(&config.state_dir).await?;
    let service = build_service(&config, ledger)?;
    let state = service.quota_state().await?;
    let limits = service.quota_limits();

    println!("Pending uploads:");
    for category in [media::MediaCategory::Image, media::MediaCategory::Video] {
        println!(
            "  {:6} {:>6} / {}",
            category.as_str(),
            state.pending(category),
            limits.limit(category)
        );
    }
    println!();
    println!(
        "Within limit: {}",
        if state.within_limit(limits) { "yes" } else { "no" }
    );
    for category in state.warnings(limits) {
        println!(
            "Warning: pending {}s at {}% of the limit",
            category.as_str(),
            state.pending(category) * 100 / limits.limit(category).max(1)
        );
    }
    Ok(())
}

/// Run the history command.
async fn run_history(state_dir: &str, args: cli::HistoryArgs) -> anyhow::Result<()> {
    let db_path = config::ledger_path(state_dir);
    if !db_path.exists() {
        println!("No upload ledger found at {}", db_path.display());
        println!("Run a sync first to create the ledger.");
        return Ok(());
    }

    let ledger = SqliteLedger::open(&db_path).await?;
    let items = ledger.history(args.limit).await?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&items)?);
        return Ok(());
    }

    if items.is_empty() {
        println!("No uploads recorded yet.");
        return Ok(());
    }
    for item in &items {
        let when = chrono::DateTime::from_timestamp_millis(item.upload_time)
            .map(|d| d.format("%Y-%m-%d %H:%M:%S UTC").to_string())
            .unwrap_or_else(|| "-".to_string());
        match &item.message {
            Some(message) => println!(
                "{}  {:7}  {}  ({})",
                when,
                item.status.as_str(),
                item.file_name,
                message
            ),
            None => println!("{}  {:7}  {}", when, item.status.as_str(), item.file_name),
        }
    }
    Ok(())
}

/// Run the status command.
async fn run_status(state_dir: &str) -> anyhow::Result<()> {
    let db_path = config::ledger_path(state_dir);
    if !db_path.exists() {
        println!("No upload ledger found at {}", db_path.display());
        println!("Run a sync first to create the ledger.");
        return Ok(());
    }

    let ledger = SqliteLedger::open(&db_path).await?;
    let summary = ledger.summary().await?;

    println!("Upload Ledger: {}", db_path.display());
    println!();
    println!("Items:");
    println!("  Uploaded:       {}", summary.uploaded);
    println!("  History:        {}", summary.history_entries);
    println!("  Read failures:  {}", summary.read_failures);
    println!();

    let stamp = |label: &str, at: Option<chrono::DateTime<chrono::Utc>>| {
        if let Some(at) = at {
            println!("{:<22} {}", label, at.format("%Y-%m-%d %H:%M:%S UTC"));
        }
    };
    stamp("Last sync started:", summary.last_sync_started);
    stamp("Last sync completed:", summary.last_sync_completed);
    stamp("Last successful sync:", summary.last_successful_sync);

    if summary.read_failures > 0 {
        println!();
        println!("Unreadable items:");
        for failure in ledger.read_failures().await? {
            let when = failure
                .last_failed_at
                .map(|at| at.format("%Y-%m-%d %H:%M").to_string())
                .unwrap_or_else(|| "-".to_string());
            println!(
                "  {} ({} attempts, last {}) - {}",
                failure.item_key,
                failure.attempts,
                when,
                failure.last_error.as_deref().unwrap_or("unknown error")
            );
        }
    }
    Ok(())
}

/// Run the health command.
async fn run_health(args: cli::ApiArgs) -> anyhow::Result<()> {
    let api = config::ApiConfig::from_args(&args)?;
    let transport = build_transport(&api)?;
    transport
        .health()
        .await
        .with_context(|| format!("Storage API at {} is not healthy", api.base_url))?;
    println!("Storage API at {} is healthy", api.base_url);
    Ok(())
}

/// Run the fetch command.
async fn run_fetch(args: cli::FetchArgs) -> anyhow::Result<()> {
    let api = config::ApiConfig::from_args(&args.api)?;
    let transport = build_transport(&api)?;
    let bytes = transport.fetch_media(&args.path, args.thumbnail).await?;

    let output = match &args.output {
        Some(path) => config::expand_tilde(path),
        None => {
            let name = Path::new(&args.path)
                .file_name()
                .ok_or_else(|| anyhow::anyhow!("Cannot derive a file name from '{}'", args.path))?;
            PathBuf::from(name)
        }
    };
    tokio::fs::write(&output, &bytes)
        .await
        .with_context(|| format!("Failed to write {}", output.display()))?;
    println!("Wrote {} bytes to {}", bytes.len(), output.display());
    Ok(())
}

/// Run the retry-failed command.
async fn run_retry_failed(state_dir: &str) -> anyhow::Result<()> {
    let state_dir = config::expand_tilde(state_dir);
    let _lock = lock::InstanceLock::acquire(&state_dir).await?;
    let ledger = open_ledger(&state_dir).await?;
    match ledger.reset_read_failures().await? {
        0 => println!("No failed items to retry."),
        n => println!("Cleared read failures for {} items; they will be retried on the next sync.", n),
    }
    Ok(())
}

/// Run the reset-state command.
async fn run_reset_state(state_dir: &str, args: cli::ResetStateArgs) -> anyhow::Result<()> {
    let state_dir = config::expand_tilde(state_dir);
    let db_path = state_dir.join(config::LEDGER_FILE_NAME);

    if !db_path.exists() {
        println!("No upload ledger found at {}", db_path.display());
        return Ok(());
    }
    let _lock = lock::InstanceLock::acquire(&state_dir).await?;

    if !args.yes {
        println!("This will delete the upload ledger at:");
        println!("  {}", db_path.display());
        println!("Every local item will be considered for upload again.");
        println!();
        print!("Are you sure? [y/N] ");
        use std::io::Write;
        std::io::stdout().flush()?;

        let mut input = String::new();
        std::io::stdin().read_line(&mut input)?;
        if !input.trim().eq_ignore_ascii_case("y") {
            println!("Cancelled.");
            return Ok(());
        }
    }

    std::fs::remove_file(&db_path)?;
    println!("Upload ledger deleted.");

    let _ = std::fs::remove_file(db_path.with_extension("db-wal"));
    let _ = std::fs::remove_file(db_path.with_extension("db-shm"));
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = cli::Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(cli.log_level.as_filter())),
        )
        .init();

    let state_dir = cli.state_dir.as_str();
    match cli.command {
        Command::Sync(args) => run_sync(state_dir, args).await,
        Command::Gallery(args) => run_gallery(state_dir, args).await,
        Command::Quota(args) => run_quota(state_dir, args).await,
        Command::History(args) => run_history(state_dir, args).await,
        Command::Status => run_status(state_dir).await,
        Command::Health(args) => run_health(args).await,
        Command::Fetch(args) => run_fetch(args).await,
        Command::RetryFailed => run_retry_failed(state_dir).await,
        Command::ResetState(args) => run_reset_state(state_dir, args).await,
    }
}
