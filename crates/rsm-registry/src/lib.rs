//! The registry contract consumed by the ingestion engine: a long-polled
//! change feed, a per-revision document fetch, and an info endpoint used
//! only for telemetry.

mod http;

pub use http::HttpRegistryClient;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use serde::{Deserialize, Serialize};
use tokio::sync::{Notify, mpsc};

/// A single revision reference carried by a change event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeRev {
    pub rev: String,
}

/// A change-feed event. An empty `id` is a heartbeat and must be dropped by
/// the caller. `seq == -1` marks a synthetic change injected by the refresh
/// scanner, which must never be checkpointed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeDescriptor {
    #[serde(default)]
    pub id: String,
    pub seq: i64,
    #[serde(default)]
    pub deleted: bool,
    #[serde(default)]
    pub changes: Vec<ChangeRev>,
}

impl ChangeDescriptor {
    /// A heartbeat carries no id — the feed uses it purely to keep the
    /// long-poll connection alive.
    pub fn is_heartbeat(&self) -> bool {
        self.id.is_empty()
    }

    /// Synthetic changes (refresh scanner injections) must never advance
    /// the persisted checkpoint.
    pub fn is_synthetic(&self) -> bool {
        self.seq < 0
    }
}

/// A fetched document, as returned by [`RegistryClient::get_doc`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub rev: String,
    #[serde(default)]
    pub deleted: bool,
    #[serde(default)]
    pub raw: serde_json::Value,
}

/// Registry metadata, used only for progress telemetry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryInfo {
    pub update_seq: i64,
}

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    /// The document lookup failed — detected by a populated `error` field
    /// and absent `id` in the upstream response. The watcher treats this
    /// the same way it treats `change.deleted == true`.
    #[error("document lookup failed: {0}")]
    LookupFailure(String),
    #[error("transport error: {0}")]
    Transport(#[source] anyhow::Error),
}

/// Fetch the authoritative document and the registry's info endpoint.
pub trait RegistryClient: Send + Sync {
    async fn get_doc(&self, id: &str, rev: &str) -> Result<Document, RegistryError>;

    async fn info(&self) -> Result<RegistryInfo, RegistryError>;
}

/// Handle used by the change reader driver to pause/resume/stop the
/// underlying long-poll loop without tearing it down.
#[derive(Clone)]
pub struct ChangeFeedControl {
    paused: Arc<AtomicBool>,
    stopped: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl ChangeFeedControl {
    /// Exposed beyond this crate so other crates' test doubles can build a
    /// fake [`ChangeFeedSubscription`] without going through a real feed.
    pub fn new() -> Self {
        Self {
            paused: Arc::new(AtomicBool::new(false)),
            stopped: Arc::new(AtomicBool::new(false)),
            notify: Arc::new(Notify::new()),
        }
    }

    pub fn pause(&self) {
        self.paused.store(true, Ordering::SeqCst);
    }

    pub fn resume(&self) {
        self.paused.store(false, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    pub fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    pub(crate) fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    pub(crate) fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    pub(crate) fn notified(&self) -> Arc<Notify> {
        self.notify.clone()
    }
}

/// A live subscription to the change feed: an event stream, a side channel
/// for non-fatal feed errors (the feed reconnects on its own; these are
/// reported to the caller purely for telemetry), and a control handle to
/// pause/resume/stop it.
pub struct ChangeFeedSubscription {
    pub events: mpsc::Receiver<ChangeDescriptor>,
    pub errors: mpsc::UnboundedReceiver<String>,
    pub control: ChangeFeedControl,
}

/// Start a resumable, long-polled subscription to the upstream change feed.
pub trait ChangeFeed: Send + Sync {
    /// Start streaming changes with `seq > since`, in ascending order,
    /// `include_docs=false`, `batch_size=1`.
    fn subscribe(&self, since: i64) -> ChangeFeedSubscription;
}
