use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::{broadcast, mpsc};

use rsm_index::IndexClient;
use rsm_registry::{ChangeFeed, ChangeFeedControl, RegistryClient};
use rsm_state::StateStore;

use crate::api::{IngestEvent, WatcherConfig, WatcherHandle};
use crate::backoff::Backoff;
use crate::checkpoint::Checkpointer;
use crate::formatter::Formatter;
use crate::pipeline::{JobCompletion, run_job};
use crate::queue::{JobQueue, Watermark};
use crate::reader::{LastSeen, Reader, ReaderEvent, on_job_drained, on_job_enqueued, unix_now};
use crate::reaper::{ParkedSet, Reaper};
use crate::refresh::RefreshScanner;
use crate::telemetry::Telemetry;

pub(crate) struct WatcherInner {
    event_tx: broadcast::Sender<IngestEvent>,
    stop_requested: AtomicBool,
    notify: tokio::sync::Notify,
}

impl WatcherInner {
    pub(crate) fn request_stop(&self) {
        if !self.stop_requested.swap(true, Ordering::SeqCst) {
            let _ = self.event_tx.send(IngestEvent::StopRequested);
            self.notify.notify_waiters();
        }
    }

    pub(crate) fn subscribe(&self) -> broadcast::Receiver<IngestEvent> {
        self.event_tx.subscribe()
    }

    fn should_stop(&self) -> bool {
        self.stop_requested.load(Ordering::SeqCst)
    }
}

/// Fixed 5-second period for the total-sequence gauge refresh (§4.I). Unlike
/// the reaper and refresh-scanner periods this isn't a [`WatcherConfig`]
/// tunable — the contract pins it.
const TOTAL_SEQUENCE_REFRESH_PERIOD: Duration = Duration::from_secs(5);

/// Self-scheduling tick for the total-sequence gauge (§3, §4.I), mirroring
/// [`Reaper::tick`]/[`RefreshScanner::tick`].
struct TotalSequenceTicker;

impl TotalSequenceTicker {
    async fn tick(&self) {
        tokio::time::sleep(TOTAL_SEQUENCE_REFRESH_PERIOD).await;
    }
}

/// The single-writer lifecycle controller (§4.I, §5): owns the queue,
/// parked set, last-seen map, and reader handle, and is the only thing that
/// mutates any of them. Per-job I/O runs in spawned tasks that report back
/// through `completions`; this struct never awaits a registry/index call
/// directly.
struct WatcherRuntime<R, IC, S> {
    registry: Arc<R>,
    index: Arc<IC>,
    checkpointer: Arc<Checkpointer<S>>,
    formatter: Arc<dyn Formatter>,
    telemetry: Arc<dyn Telemetry>,
    backoff: Backoff,
    retry_max: u32,

    reader: Reader,
    feed_control: ChangeFeedControl,
    queue: JobQueue,
    parked: ParkedSet,
    last_seen: LastSeen,
    watermark: Watermark,

    reaper: Reaper,
    refresh: RefreshScanner,
    total_seq_ticker: TotalSequenceTicker,

    completions_tx: mpsc::Sender<JobCompletion>,
    completions_rx: mpsc::Receiver<JobCompletion>,

    /// Set once the feed's long-poll task has been told to stop and its
    /// event channel has closed. Once true the reader is no longer polled
    /// (its future would just resolve to `None` forever).
    reader_done: bool,
    feed_stop_sent: bool,

    inner: Arc<WatcherInner>,
}

impl<R, IC, S> WatcherRuntime<R, IC, S>
where
    R: RegistryClient + ChangeFeed + Send + Sync + 'static,
    IC: IndexClient + Send + Sync + 'static,
    S: StateStore + Send + Sync + 'static,
{
    fn emit(&self, event: IngestEvent) {
        let _ = self.inner.event_tx.send(event);
    }

    fn maybe_spawn_next(&mut self) {
        if self.inner.should_stop() {
            return;
        }
        let Some(job) = self.queue.try_start() else {
            return;
        };

        self.emit(IngestEvent::JobStarted {
            id: job.id().to_string(),
            retry: job.retry,
        });

        let registry = self.registry.clone();
        let index = self.index.clone();
        let checkpointer = self.checkpointer.clone();
        let formatter = self.formatter.clone();
        let telemetry = self.telemetry.clone();
        let backoff = self.backoff;
        let retry_max = self.retry_max;
        let completions_tx = self.completions_tx.clone();

        tokio::spawn(async move {
            let completion = run_job(
                job,
                &backoff,
                retry_max,
                registry.as_ref(),
                index.as_ref(),
                checkpointer.as_ref(),
                formatter.as_ref(),
                telemetry.as_ref(),
            )
            .await;
            let _ = completions_tx.send(completion).await;
        });
    }

    fn handle_reader_event(&mut self, event: ReaderEvent) {
        match event {
            ReaderEvent::Heartbeat => {}
            ReaderEvent::FeedError(message) => {
                self.emit(IngestEvent::Warning { message });
            }
            ReaderEvent::Job(job) => {
                self.parked.evict(job.id());
                on_job_enqueued(
                    &mut self.last_seen,
                    &mut self.watermark,
                    &self.feed_control,
                    &job,
                    self.queue.len() + 1,
                );
                self.emit(IngestEvent::JobEnqueued {
                    id: job.id().to_string(),
                    seq: job.change.seq,
                });
                self.queue.push_back(job);
            }
        }
    }

    fn handle_completion(&mut self, completion: JobCompletion) {
        self.queue.finish();
        match completion {
            JobCompletion::Done { id } => {
                self.emit(IngestEvent::JobFinished { id });
            }
            JobCompletion::Retry { job } => {
                self.emit(IngestEvent::JobRetrying {
                    id: job.id().to_string(),
                    retry: job.retry,
                });
                self.queue.push_front(job);
            }
            JobCompletion::Parked { job } => {
                self.emit(IngestEvent::JobParked {
                    id: job.id().to_string(),
                });
                self.parked.park(job);
            }
        }
        on_job_drained(&mut self.watermark, &self.feed_control, self.queue.len());
    }

    async fn reap(&mut self) {
        let reinjected = self.parked.drain_for_reinjection();
        if reinjected.is_empty() {
            return;
        }
        let count = reinjected.len();
        for job in reinjected {
            self.queue.push_front(job);
        }
        self.emit(IngestEvent::Reaped { count });
    }

    /// Refresh the total-sequence gauge (§3, §4.I) from the registry's info
    /// endpoint. Runs in a spawned task since this struct never awaits a
    /// registry call directly; errors are reported and otherwise swallowed
    /// (§9) — this is telemetry, not ingestion, and must never stall the
    /// main loop or a job.
    fn refresh_total_sequence(&self) {
        let registry = self.registry.clone();
        let telemetry = self.telemetry.clone();
        tokio::spawn(async move {
            match registry.info().await {
                Ok(info) => telemetry.set_gauge("total_sequence", info.update_seq),
                Err(err) => telemetry.report_error("total sequence refresh", &format!("{err:#}")),
            }
        });
    }

    async fn scan_for_refresh(&mut self) {
        match self.refresh.scan(self.index.as_ref(), &self.last_seen, unix_now()).await {
            Ok(jobs) => {
                if jobs.is_empty() {
                    return;
                }
                let injected = jobs.len();
                for job in jobs {
                    self.queue.push_front(job);
                }
                self.emit(IngestEvent::RefreshScanned { injected });
            }
            Err(err) => {
                self.telemetry.report_error("refresh scan", &format!("{err:#}"));
                self.emit(IngestEvent::Warning {
                    message: format!("refresh scan failed: {err:#}"),
                });
            }
        }
    }

    async fn run(mut self) -> anyhow::Result<()> {
        self.emit(IngestEvent::Started);

        loop {
            if self.inner.should_stop() && self.queue.is_empty() && !self.queue.running() {
                break;
            }

            if self.inner.should_stop() && !self.feed_stop_sent {
                self.feed_control.stop();
                self.feed_stop_sent = true;
            }

            self.maybe_spawn_next();

            tokio::select! {
                event = self.reader.next_event(self.telemetry.as_ref()), if !self.reader_done => {
                    match event {
                        Some(event) => self.handle_reader_event(event),
                        None if self.inner.should_stop() => self.reader_done = true,
                        None => return Err(anyhow::anyhow!("change feed subscription ended unexpectedly")),
                    }
                }
                _ = self.reaper.tick() => {
                    if !self.inner.should_stop() {
                        self.reap().await;
                    }
                }
                _ = self.refresh.tick() => {
                    if !self.inner.should_stop() {
                        self.scan_for_refresh().await;
                    }
                }
                _ = self.total_seq_ticker.tick() => {
                    if !self.inner.should_stop() {
                        self.refresh_total_sequence();
                    }
                }
                Some(completion) = self.completions_rx.recv() => {
                    self.handle_completion(completion);
                }
                _ = self.inner.notify.notified() => {}
            }
        }

        self.emit(IngestEvent::Stopped);
        Ok(())
    }
}

pub(crate) async fn start_watcher<R, IC, S>(
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
    let checkpointer = Arc::new(Checkpointer::load(state).await?);
    let since = checkpointer.get().await.seq;

    let reader = Reader::start(&registry, since);
    let feed_control = reader.control();

    let (event_tx, _) = broadcast::channel(1024);
    let inner = Arc::new(WatcherInner {
        event_tx,
        stop_requested: AtomicBool::new(false),
        notify: tokio::sync::Notify::new(),
    });

    let (completions_tx, completions_rx) = mpsc::channel(config.max_prefetch.max(1));

    let runtime = WatcherRuntime {
        registry: Arc::new(registry),
        index: Arc::new(index),
        checkpointer,
        formatter,
        telemetry,
        backoff: Backoff::new(config.backoff_base, config.backoff_pow),
        retry_max: config.retry_max,
        reader,
        feed_control,
        queue: JobQueue::new(),
        parked: ParkedSet::new(),
        last_seen: LastSeen::new(),
        watermark: Watermark::new(config.max_prefetch, config.min_unpause),
        reaper: Reaper::new(config.reap_period),
        refresh: RefreshScanner::new(config.refresh_period, config.refresh_field, config.refresh_hits_per_page),
        total_seq_ticker: TotalSequenceTicker,
        completions_tx,
        completions_rx,
        reader_done: false,
        feed_stop_sent: false,
        inner: inner.clone(),
    };

    let join = tokio::spawn(runtime.run());

    Ok(WatcherHandle::new(inner, join))
}
