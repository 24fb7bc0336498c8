use std::collections::HashMap;
use std::time::Duration;

use crate::job::Job;

/// Jobs that exhausted their retries (§4.D/§4.G). Keyed by id so a fresh
/// live-feed arrival for the same package can evict the stale parked entry
/// (§4.D step 1) instead of the reaper eventually reinjecting work that's
/// already been superseded.
#[derive(Default)]
pub(crate) struct ParkedSet {
    entries: HashMap<String, Job>,
}

impl ParkedSet {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Park a job that exhausted `retry_max`. Replaces any existing parked
    /// entry for the same id.
    pub(crate) fn park(&mut self, job: Job) {
        self.entries.insert(job.id().to_string(), job);
    }

    /// Evict the parked entry for `id`, if any — called whenever a fresh
    /// change for that id arrives on the live feed.
    pub(crate) fn evict(&mut self, id: &str) -> Option<Job> {
        self.entries.remove(id)
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Take every parked job, resetting each for reinjection (§4.G): retry
    /// back to zero, `ignore_seq` forced, since its sequence is stale by
    /// the time the reaper gets to it.
    pub(crate) fn drain_for_reinjection(&mut self) -> Vec<Job> {
        self.entries
            .drain()
            .map(|(_, job)| job.reset_for_reinjection())
            .collect()
    }
}

/// Self-scheduling periodic timer (§4.G): sleeps for `period`, then the
/// caller drains the parked set and reinjects, then calls [`Reaper::tick`]
/// again. A sleep (rather than a fixed-cadence `interval`) means a slow
/// reinjection round can never overlap with the next one.
pub(crate) struct Reaper {
    period: Duration,
}

impl Reaper {
    pub(crate) fn new(period: Duration) -> Self {
        Self { period }
    }

    pub(crate) async fn tick(&self) {
        tokio::time::sleep(self.period).await;
    }
}
