use std::collections::VecDeque;

use tokio::sync::oneshot;

use crate::job::Job;

/// The ordered worker (§4.D): a single-consumer FIFO with `push`/`unshift`,
/// `length`/`running` introspection, and a cooperative `drain`.
///
/// Concurrency is enforced by the caller: `try_start` hands out at most one
/// job at a time and refuses while `running()` is already `true`.
#[derive(Default)]
pub(crate) struct JobQueue {
    items: VecDeque<Job>,
    running: bool,
    drain_waiters: Vec<oneshot::Sender<()>>,
}

impl JobQueue {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Append to the back (new live-feed events).
    pub(crate) fn push_back(&mut self, job: Job) {
        self.items.push_back(job);
    }

    /// Prepend to the front (retries, reaper and refresh injections) so
    /// they preempt newly-arrived live events of other ids.
    pub(crate) fn push_front(&mut self, job: Job) {
        self.items.push_front(job);
    }

    pub(crate) fn len(&self) -> usize {
        self.items.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// `0` or `1` in-flight jobs.
    pub(crate) fn running(&self) -> bool {
        self.running
    }

    /// Hand out the next job to process, if none is already in flight.
    pub(crate) fn try_start(&mut self) -> Option<Job> {
        if self.running {
            return None;
        }
        let job = self.items.pop_front()?;
        self.running = true;
        Some(job)
    }

    /// Mark the in-flight job as finished, releasing any `drain` waiters if
    /// the queue is now empty.
    pub(crate) fn finish(&mut self) {
        self.running = false;
        self.wake_drain_waiters_if_idle();
    }

    fn wake_drain_waiters_if_idle(&mut self) {
        if self.running || !self.items.is_empty() {
            return;
        }
        for waiter in self.drain_waiters.drain(..) {
            let _ = waiter.send(());
        }
    }

    /// Await an empty queue with nothing in flight. Resolves immediately if
    /// already idle.
    pub(crate) async fn drain(&mut self) {
        if !self.running && self.items.is_empty() {
            return;
        }
        let (tx, rx) = oneshot::channel();
        self.drain_waiters.push(tx);
        let _ = rx.await;
    }
}

/// Tracks the saturated/desaturated transition used for backpressure (§4.E):
/// the feed pauses once the queue crosses `max_prefetch` and resumes only
/// once it falls back below `min_unpause`, with the crossing guarded so
/// pause/resume don't flap on every push/pop.
pub(crate) struct Watermark {
    max_prefetch: usize,
    min_unpause: usize,
    saturated: bool,
}

impl Watermark {
    pub(crate) fn new(max_prefetch: usize, min_unpause: usize) -> Self {
        debug_assert!(
            min_unpause < max_prefetch,
            "watchMinUnpause must be < watchMaxPrefetch to avoid flapping"
        );
        Self {
            max_prefetch,
            min_unpause,
            saturated: false,
        }
    }

    /// Call after a push. Returns `true` exactly on the transition into
    /// saturation (the caller should pause the feed).
    pub(crate) fn on_push(&mut self, len: usize) -> bool {
        if !self.saturated && len > self.max_prefetch {
            self.saturated = true;
            return true;
        }
        false
    }

    /// Call after a pop/drain of queue length. Returns `true` exactly on the
    /// transition out of saturation (the caller should resume the feed).
    pub(crate) fn on_drain(&mut self, len: usize) -> bool {
        if self.saturated && len < self.min_unpause {
            self.saturated = false;
            return true;
        }
        false
    }
}
