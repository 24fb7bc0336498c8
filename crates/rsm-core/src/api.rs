//! Public surface of the ingestion engine: configuration, the event stream,
//! and the handle used to control a running watcher.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;

use rsm_index::IndexClient;
use rsm_registry::{ChangeFeed, RegistryClient};
use rsm_state::StateStore;

use crate::formatter::Formatter;
use crate::telemetry::Telemetry;
use crate::watcher::WatcherInner;

/// Tunables for a running watcher (§4.B, §4.E, §4.G, §4.H, §6).
#[derive(Debug, Clone)]
pub struct WatcherConfig {
    /// Maximum number of transient-failure retries before a job is parked.
    pub retry_max: u32,
    /// Base delay for the per-retry exponential backoff.
    pub backoff_base: Duration,
    /// Growth factor for the per-retry exponential backoff.
    pub backoff_pow: f64,
    /// How often the reaper drains the parked set and reinjects it.
    pub reap_period: Duration,
    /// How often the refresh scanner walks the expiry facet.
    pub refresh_period: Duration,
    /// Facet field the refresh scanner reads (e.g. `_searchInternal.expiresAt`).
    pub refresh_field: String,
    /// Page size used when pulling stale records out of the oldest expired
    /// bucket.
    pub refresh_hits_per_page: usize,
    /// Queue length at which the feed is paused.
    pub max_prefetch: usize,
    /// Queue length the feed must fall back below before it resumes.
    pub min_unpause: usize,
}

impl WatcherConfig {
    pub const DEFAULT_RETRY_MAX: u32 = 5;
    pub const DEFAULT_BACKOFF_BASE: Duration = Duration::from_secs(1);
    pub const DEFAULT_BACKOFF_POW: f64 = 2.0;
    pub const DEFAULT_REAP_PERIOD: Duration = Duration::from_secs(15 * 60);
    pub const DEFAULT_REFRESH_PERIOD: Duration = Duration::from_secs(60 * 60);
    pub const DEFAULT_REFRESH_FIELD: &'static str = "_searchInternal.expiresAt";
    pub const DEFAULT_REFRESH_HITS_PER_PAGE: usize = 20;
    pub const DEFAULT_MAX_PREFETCH: usize = 500;
    pub const DEFAULT_MIN_UNPAUSE: usize = 100;
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            retry_max: Self::DEFAULT_RETRY_MAX,
            backoff_base: Self::DEFAULT_BACKOFF_BASE,
            backoff_pow: Self::DEFAULT_BACKOFF_POW,
            reap_period: Self::DEFAULT_REAP_PERIOD,
            refresh_period: Self::DEFAULT_REFRESH_PERIOD,
            refresh_field: Self::DEFAULT_REFRESH_FIELD.to_string(),
            refresh_hits_per_page: Self::DEFAULT_REFRESH_HITS_PER_PAGE,
            max_prefetch: Self::DEFAULT_MAX_PREFETCH,
            min_unpause: Self::DEFAULT_MIN_UNPAUSE,
        }
    }
}

/// Ingestion event stream payload (§1, §6). The CLI turns these into log
/// lines; a library caller can subscribe directly instead.
#[derive(Debug, Clone)]
pub enum IngestEvent {
    /// The watcher started its main loop.
    Started,
    /// A graceful shutdown was requested; the watcher will stop once the
    /// queue and in-flight job drain.
    StopRequested,
    /// A job was handed to a spawned worker task.
    JobStarted { id: String, retry: u32 },
    /// A live change was translated into a job and queued.
    JobEnqueued { id: String, seq: i64 },
    /// A job completed successfully (upserted, deleted, or skipped).
    JobFinished { id: String },
    /// A job failed transiently and was requeued with an incremented retry.
    JobRetrying { id: String, retry: u32 },
    /// A job exhausted its retries and was moved to the parked set.
    JobParked { id: String },
    /// The periodic reaper reinjected this many parked jobs.
    Reaped { count: usize },
    /// The refresh scanner injected this many synthetic reinjection jobs.
    RefreshScanned { injected: usize },
    /// A non-fatal warning (feed hiccup, failed checkpoint write, etc).
    Warning { message: String },
    /// The watcher's main loop exited.
    Stopped,
}

/// Handle to a running watcher. Dropping it does not stop the watcher —
/// call [`WatcherHandle::request_stop`] and then [`WatcherHandle::wait`]
/// for a graceful shutdown.
pub struct WatcherHandle {
    inner: Arc<WatcherInner>,
    join: tokio::task::JoinHandle<anyhow::Result<()>>,
}

impl WatcherHandle {
    pub(crate) fn new(inner: Arc<WatcherInner>, join: tokio::task::JoinHandle<anyhow::Result<()>>) -> Self {
        Self { inner, join }
    }

    /// Subscribe to the ingestion event stream.
    pub fn subscribe(&self) -> broadcast::Receiver<IngestEvent> {
        self.inner.subscribe()
    }

    /// Request a graceful shutdown: stop leasing new live-feed jobs, finish
    /// whatever is already queued or in flight, then exit the main loop.
    pub fn request_stop(&self) {
        self.inner.request_stop();
    }

    /// Wait for the watcher to stop, returning the main loop's result.
    pub async fn wait(self) -> anyhow::Result<()> {
        match self.join.await {
            Ok(res) => res,
            Err(err) => Err(anyhow::anyhow!("watcher task join error: {err}")),
        }
    }
}

/// Start a new watcher. Loads the checkpoint from `state` before spawning
/// the main loop, so a failure to read the checkpoint store is returned
/// directly instead of surfacing only as a [`IngestEvent::Warning`].
pub async fn start_watcher<R, IC, S>(
    config: WatcherConfig,
    registry: R,
    index: IC,
    state: S,
    formatter: Arc<dyn Formatter>,
    telemetry: Arc<dyn Telemetry>,
) -> Result<WatcherHandle, rsm_state::StateError>
where
    R: RegistryClient + ChangeFeed + Send + Sync + 'static,
    IC: IndexClient + Send + Sync + 'static,
    S: StateStore + Send + Sync + 'static,
{
    crate::watcher::start_watcher(config, registry, index, state, formatter, telemetry).await
}
