use std::time::Duration;

use clap::Parser;
use reqwest::Url;

use rsm_core::WatcherConfig;

fn parse_duration_secs(input: &str) -> Result<Duration, String> {
    let secs: f64 = input.parse().map_err(|_| format!("invalid duration (seconds): {input:?}"))?;
    if secs < 0.0 {
        return Err(format!("duration must not be negative: {input:?}"));
    }
    Ok(Duration::from_secs_f64(secs))
}

/// Connection settings and every watch tunable, each with an `env` fallback
/// alongside its flag.
#[derive(Debug, Clone, Parser)]
#[command(name = "rsm", version, about = "Registry change feed to search index mirror")]
pub struct Cli {
    /// Base URL of the upstream registry (long-poll change feed + document fetch).
    ///
    /// Falls back to the config file's `registry_url` if neither this flag
    /// nor `RSM_REGISTRY_URL` is set.
    #[arg(long, env = "RSM_REGISTRY_URL")]
    pub registry_url: Option<Url>,

    /// Base URL of the search index backend. Same config-file fallback as
    /// `--registry-url`.
    #[arg(long, env = "RSM_INDEX_URL")]
    pub index_url: Option<Url>,

    /// Primary index name.
    #[arg(long, env = "RSM_INDEX_NAME", default_value = "packages")]
    pub index_name: String,

    /// "Lost" index name for jobs that exhausted their retries.
    #[arg(long, env = "RSM_LOST_INDEX_NAME", default_value = "packages_lost")]
    pub lost_index_name: String,

    /// Path to the JSON state file. Defaults to `$XDG_STATE_HOME/rsm/watch-state.json`.
    #[arg(long, env = "RSM_STATE_PATH")]
    pub state_path: Option<std::path::PathBuf>,

    /// Queue length above which the feed pauses (`watchMaxPrefetch`).
    #[arg(
        long = "watch-max-prefetch",
        env = "RSM_WATCH_MAX_PREFETCH",
        default_value_t = WatcherConfig::DEFAULT_MAX_PREFETCH
    )]
    pub watch_max_prefetch: usize,

    /// Queue length below which the feed resumes (`watchMinUnpause`).
    #[arg(
        long = "watch-min-unpause",
        env = "RSM_WATCH_MIN_UNPAUSE",
        default_value_t = WatcherConfig::DEFAULT_MIN_UNPAUSE
    )]
    pub watch_min_unpause: usize,

    /// Per-job in-queue retry ceiling (`retryMax`).
    #[arg(long = "retry-max", env = "RSM_RETRY_MAX", default_value_t = WatcherConfig::DEFAULT_RETRY_MAX)]
    pub retry_max: u32,

    /// Base of the exponential retry backoff, in seconds (`retryBackoffBase`).
    #[arg(
        long = "retry-backoff-base",
        env = "RSM_RETRY_BACKOFF_BASE",
        default_value = "1",
        value_parser = parse_duration_secs
    )]
    pub retry_backoff_base: Duration,

    /// Exponent base of the retry backoff (`retryBackoffPow`).
    #[arg(
        long = "retry-backoff-pow",
        env = "RSM_RETRY_BACKOFF_POW",
        default_value_t = WatcherConfig::DEFAULT_BACKOFF_POW
    )]
    pub retry_backoff_pow: f64,

    /// Reaper period, in seconds (`retrySkipped`).
    #[arg(
        long = "reap-period",
        env = "RSM_REAP_PERIOD",
        default_value = "900",
        value_parser = parse_duration_secs
    )]
    pub reap_period: Duration,

    /// Refresh scanner period, in seconds (`refreshPeriod`). Set to `0` to disable.
    #[arg(
        long = "refresh-period",
        env = "RSM_REFRESH_PERIOD",
        default_value = "3600",
        value_parser = parse_duration_secs
    )]
    pub refresh_period: Duration,

    /// Facet field the refresh scanner walks for expired entries.
    #[arg(long = "refresh-field", env = "RSM_REFRESH_FIELD", default_value = WatcherConfig::DEFAULT_REFRESH_FIELD)]
    pub refresh_field: String,

    /// Page size for the refresh scanner's per-bucket facet search.
    #[arg(
        long = "refresh-hits-per-page",
        env = "RSM_REFRESH_HITS_PER_PAGE",
        default_value_t = WatcherConfig::DEFAULT_REFRESH_HITS_PER_PAGE
    )]
    pub refresh_hits_per_page: usize,
}

impl Cli {
    /// Whether the refresh scanner should run at all — a `0`-second period
    /// disables it (§4.H marks the scanner optional).
    pub fn refresh_enabled(&self) -> bool {
        !self.refresh_period.is_zero()
    }

    pub fn watcher_config(&self) -> WatcherConfig {
        WatcherConfig {
            retry_max: self.retry_max,
            backoff_base: self.retry_backoff_base,
            backoff_pow: self.retry_backoff_pow,
            reap_period: self.reap_period,
            refresh_period: if self.refresh_enabled() {
                self.refresh_period
            } else {
                Duration::from_secs(u64::MAX / 2)
            },
            refresh_field: self.refresh_field.clone(),
            refresh_hits_per_page: self.refresh_hits_per_page,
            max_prefetch: self.watch_max_prefetch,
            min_unpause: self.watch_min_unpause,
        }
    }
}
