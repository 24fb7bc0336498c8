use rsm_registry::ChangeDescriptor;

/// A unit of work: a change descriptor plus retry metadata.
///
/// Invariants (enforced by [`Job::new`] and the ordered worker):
/// - `0 <= retry <= retry_max + 1`; once `retry > retry_max` the job leaves
///   the active queue and enters the parked set.
/// - `ignore_seq == true` means a successful completion must not advance
///   the persisted sequence (the seq is stale or synthetic).
/// - a job whose `change.id` is empty is rejected at construction.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Job {
    pub(crate) change: ChangeDescriptor,
    pub(crate) retry: u32,
    pub(crate) ignore_seq: bool,
}

impl Job {
    /// Construct a fresh job for a live (or synthetic) change. Returns
    /// `None` for heartbeats — an empty `id` is rejected at queue entry.
    pub(crate) fn new(change: ChangeDescriptor, ignore_seq: bool) -> Option<Self> {
        if change.is_heartbeat() {
            return None;
        }
        Some(Self {
            change,
            retry: 0,
            ignore_seq,
        })
    }

    pub(crate) fn id(&self) -> &str {
        &self.change.id
    }

    /// `true` once a successful completion of this attempt must not advance
    /// the checkpoint — either because the job was constructed that way, or
    /// because this is a retry (earlier attempts may already have advanced
    /// the checkpoint, so a later retry must not regress or re-advance it).
    pub(crate) fn effective_ignore_seq(&self) -> bool {
        self.ignore_seq || self.retry > 0
    }

    /// Produce the next retry attempt of this job.
    pub(crate) fn retried(mut self) -> Self {
        self.retry += 1;
        self
    }

    /// Produce a reaped/refreshed copy: retry reset to zero, `ignore_seq`
    /// forced true (the job's seq is now known-stale).
    pub(crate) fn reset_for_reinjection(mut self) -> Self {
        self.retry = 0;
        self.ignore_seq = true;
        self
    }
}
