use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

use rsm_registry::{ChangeDescriptor, ChangeFeed, ChangeFeedControl, ChangeFeedSubscription};
use tokio::sync::mpsc;

use crate::job::Job;
use crate::queue::Watermark;
use crate::telemetry::Telemetry;

/// The change reader driver (§4.E): owns the feed subscription, turns each
/// [`ChangeDescriptor`] into a [`Job`] (dropping heartbeats), records
/// last-seen timestamps for the refresh scanner, and pauses/resumes the
/// upstream feed as the queue crosses the prefetch watermark.
///
/// This struct itself does not own the queue — [`Reader::next_event`] hands
/// a translated job back to the caller (the lifecycle controller), which
/// owns queue/watermark/last-seen mutation, mirroring the single-writer
/// discipline in §5.
pub(crate) struct Reader {
    subscription: ChangeFeedSubscription,
}

impl Reader {
    pub(crate) fn start<F: ChangeFeed>(feed: &F, since: i64) -> Self {
        Self {
            subscription: feed.subscribe(since),
        }
    }

    pub(crate) fn control(&self) -> ChangeFeedControl {
        self.subscription.control.clone()
    }

    /// Await the next live change, translating it into a job. Returns
    /// `None` for heartbeats (the caller should loop again) and also
    /// surfaces feed-level errors (telemetry only; the feed retries on its
    /// own, per §4.E).
    pub(crate) async fn next_event(&mut self, telemetry: &dyn Telemetry) -> Option<ReaderEvent> {
        tokio::select! {
            change = self.subscription.events.recv() => {
                let change = change?;
                if change.is_heartbeat() {
                    return Some(ReaderEvent::Heartbeat);
                }
                Some(ReaderEvent::Job(Job::new(change, false)?))
            }
            Some(message) = self.subscription.errors.recv() => {
                telemetry.report_error("change feed", &message);
                Some(ReaderEvent::FeedError(message))
            }
        }
    }
}

pub(crate) enum ReaderEvent {
    Job(Job),
    Heartbeat,
    FeedError(String),
}

/// Tracks the most recent time each id was seen on the live feed, consulted
/// by the refresh scanner (§4.H) to discard stale candidates the feed has
/// already produced a fresher update for.
#[derive(Default)]
pub(crate) struct LastSeen {
    seen: HashMap<String, i64>,
}

impl LastSeen {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record(&mut self, id: &str, now_unix: i64) {
        self.seen.insert(id.to_string(), now_unix);
    }

    /// `true` if `id` was observed on the live feed at or after `since`.
    pub(crate) fn seen_since(&self, id: &str, since: i64) -> bool {
        self.seen.get(id).is_some_and(|&seen| seen >= since)
    }
}

pub(crate) fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock before unix epoch")
        .as_secs() as i64
}

/// Applies a change to the queue-facing state the lifecycle controller
/// owns: records `last_seen`, checks the watermark, and pauses the feed
/// control on the saturation transition. The inverse resume (on drain) is
/// the caller's responsibility once the queue falls back below
/// `min_unpause`, since that happens on completion rather than arrival.
pub(crate) fn on_job_enqueued(
    last_seen: &mut LastSeen,
    watermark: &mut Watermark,
    control: &ChangeFeedControl,
    job: &Job,
    queue_len: usize,
) {
    last_seen.record(job.id(), unix_now());
    if watermark.on_push(queue_len) {
        control.pause();
    }
}

pub(crate) fn on_job_drained(watermark: &mut Watermark, control: &ChangeFeedControl, queue_len: usize) {
    if watermark.on_drain(queue_len) {
        control.resume();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn last_seen_tracks_recency() {
        let mut last_seen = LastSeen::new();
        last_seen.record("left-pad", 1_000);
        assert!(last_seen.seen_since("left-pad", 900));
        assert!(!last_seen.seen_since("left-pad", 1_001));
        assert!(!last_seen.seen_since("right-pad", 0));
    }

    #[tokio::test]
    async fn reader_translates_changes_and_drops_heartbeats() {
        let (events_tx, events_rx) = mpsc::channel(8);
        let (_errors_tx, errors_rx) = mpsc::unbounded_channel();
        let mut reader = Reader {
            subscription: ChangeFeedSubscription {
                events: events_rx,
                errors: errors_rx,
                control: ChangeFeedControl::new(),
            },
        };

        events_tx
            .send(ChangeDescriptor {
                id: String::new(),
                seq: 1,
                deleted: false,
                changes: vec![],
            })
            .await
            .unwrap();
        events_tx
            .send(ChangeDescriptor {
                id: "left-pad".to_string(),
                seq: 2,
                deleted: false,
                changes: vec![rsm_registry::ChangeRev { rev: "1-a".to_string() }],
            })
            .await
            .unwrap();

        let telemetry = crate::telemetry::NoopTelemetry;
        assert!(matches!(
            reader.next_event(&telemetry).await,
            Some(ReaderEvent::Heartbeat)
        ));
        match reader.next_event(&telemetry).await {
            Some(ReaderEvent::Job(job)) => assert_eq!(job.id(), "left-pad"),
            _ => panic!("expected a job"),
        }
    }
}
