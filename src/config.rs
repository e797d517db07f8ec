use std::path::PathBuf;
use std::time::Duration;

use crate::cli::{ApiArgs, PipelineArgs, SyncArgs};
use crate::media::ListWindow;
use crate::quota::QuotaLimits;
use crate::retry::{BackoffPolicy, RetryConfig};
use crate::scheduler::ScheduleConfig;

pub const DEFAULT_API_URL: &str = "http://localhost:8010";
pub const DEFAULT_TIMEOUT_SECS: u64 = 60;
pub const DEFAULT_BATCH_SIZE: usize = 10;
pub const DEFAULT_IMAGE_LIMIT: usize = 1000;
pub const DEFAULT_VIDEO_LIMIT: usize = 100;
pub const DEFAULT_MAX_READ_FAILURES: u32 = 3;
pub const DEFAULT_BACKOFF_RETRIES: u32 = 5;

pub const LEDGER_FILE_NAME: &str = "ledger.db";

/// Storage API settings.
#[derive(Debug, Clone)]
pub struct ApiConfig {
    pub base_url: String,
    pub bucket: Option<String>,
    pub timeout: Duration,
    /// Retry policy for listing calls.
    pub retry: RetryConfig,
}

impl ApiConfig {
    pub fn from_args(args: &ApiArgs) -> anyhow::Result<Self> {
        if args.api_url.trim().is_empty() {
            anyhow::bail!("--api-url must not be empty");
        }
        if args.timeout == 0 {
            anyhow::bail!("--timeout must be at least 1 second");
        }
        Ok(Self {
            base_url: args.api_url.trim().to_string(),
            bucket: args.bucket.clone().filter(|b| !b.is_empty()),
            timeout: Duration::from_secs(args.timeout),
            retry: RetryConfig {
                max_retries: args.api_retries,
                base_delay_secs: 2,
                max_delay_secs: 30,
                policy: BackoffPolicy::Exponential,
                jitter: true,
            },
        })
    }
}

/// Application configuration for commands that inventory media.
#[derive(Debug, Clone)]
pub struct Config {
    pub state_dir: PathBuf,
    pub media_dir: PathBuf,
    pub api: ApiConfig,
    pub window: ListWindow,
    pub limits: QuotaLimits,
    pub max_read_failures: u32,

    pub batch_size: usize,
    pub concurrency: usize,
    pub schedule: ScheduleConfig,

    pub dry_run: bool,
    pub no_progress_bar: bool,
    pub watch: bool,
}

pub(crate) fn expand_tilde(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(stripped);
        }
    }
    PathBuf::from(path)
}

pub fn ledger_path(state_dir: &str) -> PathBuf {
    expand_tilde(state_dir).join(LEDGER_FILE_NAME)
}

impl Config {
    /// Configuration for read-only commands (`gallery`, `quota`).
    pub fn from_pipeline(state_dir: &str, args: &PipelineArgs) -> anyhow::Result<Self> {
        if args.directory.trim().is_empty() {
            anyhow::bail!("--directory must not be empty");
        }
        let window = match args.recent.as_deref() {
            Some(raw) => ListWindow::Recent(parse_interval(raw)?),
            None => ListWindow::All,
        };

        Ok(Self {
            state_dir: expand_tilde(state_dir),
            media_dir: expand_tilde(&args.directory),
            api: ApiConfig::from_args(&args.api)?,
            window,
            limits: QuotaLimits {
                images: args.image_limit,
                videos: args.video_limit,
                ..QuotaLimits::default()
            },
            max_read_failures: args.max_read_failures.max(1),
            batch_size: DEFAULT_BATCH_SIZE,
            concurrency: 1,
            schedule: ScheduleConfig::default(),
            dry_run: false,
            no_progress_bar: false,
            watch: false,
        })
    }

    pub fn from_sync(state_dir: &str, args: &SyncArgs) -> anyhow::Result<Self> {
        if args.batch_size == 0 {
            anyhow::bail!("--batch-size must be at least 1");
        }
        if args.concurrency == 0 {
            anyhow::bail!("--concurrency must be at least 1");
        }
        let interval = parse_interval(&args.interval)?;
        if interval.is_zero() {
            anyhow::bail!("--interval must be greater than zero");
        }
        let backoff_base = parse_interval(&args.backoff)?;

        let mut config = Self::from_pipeline(state_dir, &args.pipeline)?;
        config.batch_size = args.batch_size;
        config.concurrency = args.concurrency;
        config.schedule = ScheduleConfig {
            initial_delay: parse_interval(&args.initial_delay)?,
            interval,
            backoff: RetryConfig::sync_pass(args.backoff_retries, backoff_base.as_secs()),
        };
        config.dry_run = args.dry_run;
        config.no_progress_bar = args.no_progress_bar;
        config.watch = args.watch;
        Ok(config)
    }
}

/// Parse a human interval: `90s`, `15m`, `24h`, `7d`, or bare seconds.
pub(crate) fn parse_interval(s: &str) -> anyhow::Result<Duration> {
    let s = s.trim();
    let split = s
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(s.len());
    let (number, unit) = s.split_at(split);
    let value: u64 = number.parse().map_err(|_| {
        anyhow::anyhow!(
            "Cannot parse '{}' as an interval. Expected e.g. 90s, 15m, 24h or 7d",
            s
        )
    })?;
    let multiplier = match unit {
        "" | "s" => 1,
        "m" => 60,
        "h" => 3600,
        "d" => 86_400,
        other => anyhow::bail!("Unknown interval unit '{}' in '{}'", other, s),
    };
    value
        .checked_mul(multiplier)
        .map(Duration::from_secs)
        .ok_or_else(|| anyhow::anyhow!("Interval '{}' is too large", s))
}
