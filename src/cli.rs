use clap::{Args, Parser, Subcommand};

use crate::config::{
    DEFAULT_API_URL, DEFAULT_BACKOFF_RETRIES, DEFAULT_BATCH_SIZE, DEFAULT_IMAGE_LIMIT,
    DEFAULT_MAX_READ_FAILURES, DEFAULT_TIMEOUT_SECS, DEFAULT_VIDEO_LIMIT,
};
use crate::types::{LogLevel, OutputFormat};

#[derive(Parser, Debug)]
#[command(
    name = "storj-uploader-rs",
    version,
    about = "Sync local photos and videos to Storj-backed storage"
)]
pub struct Cli {
    /// Log level (RUST_LOG takes precedence)
    #[arg(long, value_enum, default_value = "info", global = true)]
    pub log_level: LogLevel,

    /// Directory for the upload ledger and instance lock
    #[arg(long, default_value = "~/.storj-uploader-rs", global = true)]
    pub state_dir: String,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Upload new local media (once, or continuously with --watch)
    Sync(SyncArgs),

    /// Show local and remote media merged into one gallery
    Gallery(GalleryArgs),

    /// Show pending uploads per category against the quota
    Quota(PipelineArgs),

    /// Show recent upload history
    History(HistoryArgs),

    /// Show ledger contents and last sync times
    Status,

    /// Check that the storage API is reachable
    Health(ApiArgs),

    /// Download a remote object or its thumbnail
    Fetch(FetchArgs),

    /// Clear local read failure counters so skipped items are retried
    RetryFailed,

    /// Delete the upload ledger
    ResetState(ResetStateArgs),
}

/// Storage API connection.
#[derive(Args, Debug, Clone)]
pub struct ApiArgs {
    /// Base URL of the storage API
    #[arg(long, env = "STORJ_API_URL", default_value = DEFAULT_API_URL)]
    pub api_url: String,

    /// Bucket to list (server default when omitted)
    #[arg(long, env = "STORJ_BUCKET")]
    pub bucket: Option<String>,

    /// Timeout for each API call, in seconds
    #[arg(long, default_value_t = DEFAULT_TIMEOUT_SECS)]
    pub timeout: u64,

    /// Retries for a failed remote listing call
    #[arg(long, default_value_t = 2)]
    pub api_retries: u32,
}

/// Everything needed to inventory and reconcile media.
#[derive(Args, Debug, Clone)]
pub struct PipelineArgs {
    #[command(flatten)]
    pub api: ApiArgs,

    /// Local media directory
    #[arg(short = 'd', long)]
    pub directory: String,

    /// Only consider local items added within this window (e.g. 24h, 7d)
    #[arg(long)]
    pub recent: Option<String>,

    /// Maximum pending (not yet uploaded) images
    #[arg(long, default_value_t = DEFAULT_IMAGE_LIMIT)]
    pub image_limit: usize,

    /// Maximum pending (not yet uploaded) videos
    #[arg(long, default_value_t = DEFAULT_VIDEO_LIMIT)]
    pub video_limit: usize,

    /// Stop retrying an item after this many local read failures
    #[arg(long, default_value_t = DEFAULT_MAX_READ_FAILURES)]
    pub max_read_failures: u32,
}

#[derive(Args, Debug, Clone)]
pub struct SyncArgs {
    #[command(flatten)]
    pub pipeline: PipelineArgs,

    /// Files per upload request
    #[arg(long, default_value_t = DEFAULT_BATCH_SIZE)]
    pub batch_size: usize,

    /// Upload requests in flight at once
    #[arg(long, default_value_t = 1)]
    pub concurrency: usize,

    /// Log what would be uploaded without uploading
    #[arg(long)]
    pub dry_run: bool,

    /// Disable progress bar
    #[arg(long)]
    pub no_progress_bar: bool,

    /// Keep running, syncing periodically until interrupted (SIGUSR1 syncs immediately)
    #[arg(long)]
    pub watch: bool,

    /// Time between scheduled passes in watch mode (e.g. 15m, 1h)
    #[arg(long, default_value = "15m")]
    pub interval: String,

    /// Delay before the first pass in watch mode
    #[arg(long, default_value = "30s")]
    pub initial_delay: String,

    /// Base delay of the linear backoff after a failed pass
    #[arg(long, default_value = "10s")]
    pub backoff: String,

    /// Consecutive failed passes retried with backoff before waiting for the next interval
    #[arg(long, default_value_t = DEFAULT_BACKOFF_RETRIES)]
    pub backoff_retries: u32,
}

#[derive(Args, Debug, Clone)]
pub struct GalleryArgs {
    #[command(flatten)]
    pub pipeline: PipelineArgs,

    /// Only show items not yet uploaded
    #[arg(long)]
    pub pending: bool,

    #[arg(long, value_enum, default_value = "text")]
    pub format: OutputFormat,
}

#[derive(Args, Debug, Clone)]
pub struct HistoryArgs {
    /// Number of entries to show (at most 100 are retained)
    #[arg(long, default_value_t = 20)]
    pub limit: usize,

    /// Print entries as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Debug, Clone)]
pub struct FetchArgs {
    #[command(flatten)]
    pub api: ApiArgs,

    /// Remote object path as shown by `gallery`
    pub path: String,

    /// Fetch the thumbnail instead of the full-size object
    #[arg(long)]
    pub thumbnail: bool,

    /// Output file (defaults to the object's file name in the current directory)
    #[arg(short = 'o', long)]
    pub output: Option<String>,
}

#[derive(Args, Debug, Clone)]
pub struct ResetStateArgs {
    /// Skip confirmation prompt
    #[arg(long)]
    pub yes: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("storj-uploader-rs").chain(args.iter().copied()))
            .unwrap()
    }

    #[test]
    fn test_sync_defaults() {
        let cli = parse(&["sync", "-d", "/media"]);
        assert_eq!(cli.log_level, LogLevel::Info);
        let Command::Sync(args) = cli.command else {
            panic!("expected sync");
        };
        assert_eq!(args.batch_size, 10);
        assert_eq!(args.concurrency, 1);
        assert_eq!(args.pipeline.image_limit, 1000);
        assert_eq!(args.pipeline.video_limit, 100);
        assert_eq!(args.pipeline.api.timeout, 60);
        assert_eq!(args.interval, "15m");
        assert!(!args.watch);
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = parse(&["status", "--log-level", "debug", "--state-dir", "/tmp/s"]);
        assert_eq!(cli.log_level, LogLevel::Debug);
        assert_eq!(cli.state_dir, "/tmp/s");
        assert!(matches!(cli.command, Command::Status));
    }

    #[test]
    fn test_sync_requires_directory() {
        assert!(Cli::try_parse_from(["storj-uploader-rs", "sync"]).is_err());
    }

    #[test]
    fn test_fetch_args() {
        let cli = parse(&["fetch", "2024/a.jpg", "--thumbnail", "-o", "out.jpg"]);
        let Command::Fetch(args) = cli.command else {
            panic!("expected fetch");
        };
        assert_eq!(args.path, "2024/a.jpg");
        assert!(args.thumbnail);
        assert_eq!(args.output.as_deref(), Some("out.jpg"));
    }

    #[test]
    fn test_history_args() {
        let cli = parse(&["history", "--limit", "5", "--json"]);
        let Command::History(args) = cli.command else {
            panic!("expected history");
        };
        assert_eq!(args.limit, 5);
        assert!(args.json);
    }
}
