use std::time::Duration;

use rsm_index::{FacetQuery, FacetSort, IndexClient, IndexError, StaleRecord};
use rsm_registry::{ChangeDescriptor, ChangeRev};

use crate::job::Job;
use crate::reader::LastSeen;

/// The periodic refresh scanner (§4.H): each tick, reads only the oldest
/// expiry bucket and, if it has already expired, reinjects a synthetic job
/// for every record in it that the live feed hasn't refreshed more recently
/// than the record's own `modified` timestamp and whose `rev` is known.
///
/// Buckets are unix-epoch-second strings, compared lexically because that's
/// what [`rsm_index::IndexClient::facet_values`] sorts by (§9 — the index
/// backend sorts facet values as strings). This only yields the true oldest
/// bucket when every bucket is rendered at the same width; the scanner's
/// caller is responsible for writing `_searchInternal.expiresAt` as a
/// fixed-width, zero-padded string so the two orders coincide.
pub(crate) struct RefreshScanner {
    period: Duration,
    field: String,
    hits_per_page: usize,
}

impl RefreshScanner {
    pub(crate) fn new(period: Duration, field: impl Into<String>, hits_per_page: usize) -> Self {
        Self {
            period,
            field: field.into(),
            hits_per_page,
        }
    }

    pub(crate) async fn tick(&self) {
        tokio::time::sleep(self.period).await;
    }

    /// Scan the single oldest bucket and, if it has already expired
    /// (`value <= now_key`), return synthetic reinjection jobs for its stale
    /// records. Returns an empty list without querying anything if there are
    /// no buckets or the oldest one hasn't expired yet.
    pub(crate) async fn scan<IC: IndexClient>(
        &self,
        index: &IC,
        last_seen: &LastSeen,
        now_unix: i64,
    ) -> Result<Vec<Job>, IndexError> {
        let now_key = format!("{now_unix:010}");
        let buckets = index
            .facet_values(FacetQuery {
                field: self.field.clone(),
                sort: FacetSort::Alphabetical,
            })
            .await?;

        let Some(oldest) = buckets.into_iter().next() else {
            return Ok(Vec::new());
        };
        if oldest.value.as_str() > now_key.as_str() {
            return Ok(Vec::new());
        }

        let stale = index
            .search_by_facet(&self.field, &oldest.value, self.hits_per_page)
            .await?;

        let mut jobs = Vec::new();
        for record in stale {
            if last_seen.seen_since(&record.id, record.modified) {
                continue;
            }
            if let Some(job) = synthetic_job(&record) {
                jobs.push(job);
            }
        }
        Ok(jobs)
    }
}

/// A synthetic reinjection job (§4.H, §4.B): `seq = -1` so it can never be
/// checkpointed, `ignore_seq = true` so the wrapper never tries to, and the
/// record's own known `rev` pinned just like a live change would be.
/// Records with no known `rev` are skipped — `None` means the caller should
/// drop the candidate rather than reinject it with a guessed revision.
fn synthetic_job(record: &StaleRecord) -> Option<Job> {
    let rev = record.rev.clone()?;
    Job::new(
        ChangeDescriptor {
            id: record.id.clone(),
            seq: -1,
            deleted: false,
            changes: vec![ChangeRev { rev }],
        },
        true,
    )
}
