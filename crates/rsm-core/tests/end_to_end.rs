//! End-to-end scenarios against the public `start_watcher` API, driven by
//! in-memory fakes for every collaborator trait. These pin down the literal
//! scenarios and invariants from the testable-properties section: ordered
//! update-then-delete, heartbeat tolerance, retry/ignore-seq interaction,
//! exhaustion + reaper reinjection, parked supersession, and backpressure.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rsm_core::{DefaultFormatter, Formatter, NoopTelemetry, Telemetry, WatcherConfig, start_watcher};
use rsm_index::{FacetQuery, FacetValue, IndexClient, IndexError, LostEntry, Record, StaleRecord};
use rsm_registry::{
    ChangeDescriptor, ChangeFeed, ChangeFeedControl, ChangeFeedSubscription, ChangeRev, Document,
    RegistryClient, RegistryError, RegistryInfo,
};
use rsm_state::{State, StateError, StatePatch, StateStore};
use tokio::sync::{broadcast, mpsc};

fn change(id: &str, seq: i64, deleted: bool, rev: Option<&str>) -> ChangeDescriptor {
    ChangeDescriptor {
        id: id.to_string(),
        seq,
        deleted,
        changes: rev.map(|r| vec![ChangeRev { rev: r.to_string() }]).unwrap_or_default(),
    }
}

fn heartbeat(seq: i64) -> ChangeDescriptor {
    ChangeDescriptor { id: String::new(), seq, deleted: false, changes: vec![] }
}

/// Drives a feed the test can push events into after the watcher has
/// started, and a registry whose per-id failure count the test can set up
/// front (decremented on each `get_doc`, failing with a transport error
/// while nonzero).
struct FakeRegistry {
    feed_rx: Mutex<Option<mpsc::Receiver<ChangeDescriptor>>>,
    fail_remaining: Arc<Mutex<HashMap<String, u32>>>,
}

impl ChangeFeed for FakeRegistry {
    fn subscribe(&self, _since: i64) -> ChangeFeedSubscription {
        let events = self.feed_rx.lock().unwrap().take().expect("subscribe called once");
        let (_errors_tx, errors_rx) = mpsc::unbounded_channel();
        ChangeFeedSubscription { events, errors: errors_rx, control: ChangeFeedControl::new() }
    }
}

impl RegistryClient for FakeRegistry {
    async fn get_doc(&self, id: &str, rev: &str) -> Result<Document, RegistryError> {
        let mut fails = self.fail_remaining.lock().unwrap();
        if let Some(n) = fails.get_mut(id) {
            if *n > 0 {
                *n -= 1;
                return Err(RegistryError::Transport(anyhow::anyhow!("simulated fetch failure")));
            }
        }
        Ok(Document {
            id: id.to_string(),
            rev: rev.to_string(),
            deleted: false,
            raw: serde_json::json!({"name": id}),
        })
    }

    async fn info(&self) -> Result<RegistryInfo, RegistryError> {
        Ok(RegistryInfo { update_seq: 0 })
    }
}

fn fake_registry() -> (FakeRegistry, mpsc::Sender<ChangeDescriptor>, Arc<Mutex<HashMap<String, u32>>>) {
    let (tx, rx) = mpsc::channel(64);
    let fail_remaining = Arc::new(Mutex::new(HashMap::new()));
    let registry = FakeRegistry { feed_rx: Mutex::new(Some(rx)), fail_remaining: fail_remaining.clone() };
    (registry, tx, fail_remaining)
}

#[derive(Clone, Default)]
struct FakeIndex {
    upserts: Arc<Mutex<Vec<String>>>,
    deletes: Arc<Mutex<Vec<String>>>,
    lost: Arc<Mutex<Vec<LostEntry>>>,
}

impl IndexClient for FakeIndex {
    async fn upsert(&self, record: Record) -> Result<(), IndexError> {
        self.upserts.lock().unwrap().push(record.object_id);
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<(), IndexError> {
        self.deletes.lock().unwrap().push(id.to_string());
        Ok(())
    }

    async fn facet_values(&self, _query: FacetQuery) -> Result<Vec<FacetValue>, IndexError> {
        Ok(vec![])
    }

    async fn search_by_facet(
        &self,
        _field: &str,
        _value: &str,
        _hits_per_page: usize,
    ) -> Result<Vec<StaleRecord>, IndexError> {
        Ok(vec![])
    }

    async fn upsert_lost(&self, entry: LostEntry) -> Result<(), IndexError> {
        self.lost.lock().unwrap().push(entry);
        Ok(())
    }
}

#[derive(Clone, Default)]
struct FakeStateStore {
    state: Arc<Mutex<State>>,
}

impl StateStore for FakeStateStore {
    async fn get(&self) -> Result<State, StateError> {
        Ok(self.state.lock().unwrap().clone())
    }

    async fn save(&self, patch: StatePatch) -> Result<(), StateError> {
        let mut state = self.state.lock().unwrap();
        if let Some(stage) = patch.stage {
            state.stage = stage;
        }
        if let Some(seq) = patch.seq {
            state.seq = seq;
        }
        Ok(())
    }
}

fn base_config() -> WatcherConfig {
    WatcherConfig {
        retry_max: 5,
        backoff_base: Duration::from_millis(1),
        backoff_pow: 2.0,
        reap_period: Duration::from_secs(3600),
        refresh_period: Duration::from_secs(3600),
        refresh_field: "_searchInternal.expiresAt".to_string(),
        refresh_hits_per_page: 100,
        max_prefetch: 500,
        min_unpause: 100,
    }
}

async fn recv_until(
    events: &mut broadcast::Receiver<rsm_core::IngestEvent>,
    mut pred: impl FnMut(&rsm_core::IngestEvent) -> bool,
) -> rsm_core::IngestEvent {
    loop {
        let evt = tokio::time::timeout(Duration::from_secs(5), events.recv())
            .await
            .expect("timed out waiting for expected event")
            .expect("event stream closed unexpectedly");
        if pred(&evt) {
            return evt;
        }
    }
}

fn is_job_finished(evt: &rsm_core::IngestEvent, id: &str) -> bool {
    matches!(evt, rsm_core::IngestEvent::JobFinished { id: got } if got == id)
}

#[tokio::test]
async fn ordered_update_then_delete_on_same_id() {
    let (registry, tx, _fails) = fake_registry();
    let index = FakeIndex::default();
    let state = FakeStateStore::default();
    let state_handle = state.state.clone();

    let handle = start_watcher(
        base_config(),
        registry,
        index.clone(),
        state,
        Arc::new(DefaultFormatter) as Arc<dyn Formatter>,
        Arc::new(NoopTelemetry) as Arc<dyn Telemetry>,
    )
    .await
    .unwrap();
    let mut events = handle.subscribe();

    tx.send(change("x", 10, false, Some("1-a"))).await.unwrap();
    tx.send(change("x", 11, true, None)).await.unwrap();

    recv_until(&mut events, |e| is_job_finished(e, "x")).await;
    recv_until(&mut events, |e| is_job_finished(e, "x")).await;

    assert_eq!(index.upserts.lock().unwrap().as_slice(), ["x"]);
    assert_eq!(index.deletes.lock().unwrap().as_slice(), ["x"]);
    assert_eq!(state_handle.lock().unwrap().seq, 11);

    handle.request_stop();
    handle.wait().await.unwrap();
}

#[tokio::test]
async fn heartbeat_causes_no_mutation_and_seq_advances_on_next_real_change() {
    let (registry, tx, _fails) = fake_registry();
    let index = FakeIndex::default();
    let state = FakeStateStore::default();
    let state_handle = state.state.clone();

    let handle = start_watcher(
        base_config(),
        registry,
        index.clone(),
        state,
        Arc::new(DefaultFormatter) as Arc<dyn Formatter>,
        Arc::new(NoopTelemetry) as Arc<dyn Telemetry>,
    )
    .await
    .unwrap();
    let mut events = handle.subscribe();

    tx.send(heartbeat(12)).await.unwrap();
    tx.send(change("z", 13, false, Some("1-a"))).await.unwrap();

    recv_until(&mut events, |e| is_job_finished(e, "z")).await;

    assert_eq!(index.upserts.lock().unwrap().as_slice(), ["z"]);
    assert!(index.deletes.lock().unwrap().is_empty());
    assert_eq!(state_handle.lock().unwrap().seq, 13);

    handle.request_stop();
    handle.wait().await.unwrap();
}

#[tokio::test]
async fn transient_failures_retry_then_succeed_without_advancing_seq_until_a_first_try_success() {
    let (registry, tx, fails) = fake_registry();
    fails.lock().unwrap().insert("x".to_string(), 2);
    let index = FakeIndex::default();
    let state = FakeStateStore::default();
    let state_handle = state.state.clone();

    let handle = start_watcher(
        WatcherConfig { retry_max: 2, ..base_config() },
        registry,
        index.clone(),
        state,
        Arc::new(DefaultFormatter) as Arc<dyn Formatter>,
        Arc::new(NoopTelemetry) as Arc<dyn Telemetry>,
    )
    .await
    .unwrap();
    let mut events = handle.subscribe();

    tx.send(change("x", 10, false, Some("1-a"))).await.unwrap();

    recv_until(
        &mut events,
        |e| matches!(e, rsm_core::IngestEvent::JobRetrying { id, retry } if id == "x" && *retry == 1),
    )
    .await;
    recv_until(
        &mut events,
        |e| matches!(e, rsm_core::IngestEvent::JobRetrying { id, retry } if id == "x" && *retry == 2),
    )
    .await;
    recv_until(&mut events, |e| is_job_finished(e, "x")).await;

    assert_eq!(index.upserts.lock().unwrap().as_slice(), ["x"]);
    assert_eq!(state_handle.lock().unwrap().seq, 0, "a retried success must not advance seq");

    tx.send(change("y", 20, false, Some("1-a"))).await.unwrap();
    recv_until(&mut events, |e| is_job_finished(e, "y")).await;

    assert_eq!(index.upserts.lock().unwrap().as_slice(), ["x", "y"]);
    assert_eq!(state_handle.lock().unwrap().seq, 20, "next first-try success advances seq");

    handle.request_stop();
    handle.wait().await.unwrap();
}

#[tokio::test]
async fn exhaustion_parks_the_job_and_writes_a_lost_entry_without_advancing_seq() {
    let (registry, tx, fails) = fake_registry();
    fails.lock().unwrap().insert("y".to_string(), 100);
    let index = FakeIndex::default();
    let state = FakeStateStore::default();
    let state_handle = state.state.clone();

    let handle = start_watcher(
        WatcherConfig { retry_max: 1, ..base_config() },
        registry,
        index.clone(),
        state,
        Arc::new(DefaultFormatter) as Arc<dyn Formatter>,
        Arc::new(NoopTelemetry) as Arc<dyn Telemetry>,
    )
    .await
    .unwrap();
    let mut events = handle.subscribe();

    tx.send(change("y", 20, false, Some("1-a"))).await.unwrap();

    recv_until(&mut events, |e| matches!(e, rsm_core::IngestEvent::JobParked { id } if id == "y")).await;

    assert_eq!(index.lost.lock().unwrap().len(), 1);
    assert_eq!(index.lost.lock().unwrap()[0].id, "y");
    assert_eq!(state_handle.lock().unwrap().seq, 0);

    handle.request_stop();
    handle.wait().await.unwrap();
}

#[tokio::test]
async fn reaper_reinjects_a_parked_job_with_retry_reset_to_zero() {
    let (registry, tx, fails) = fake_registry();
    fails.lock().unwrap().insert("w".to_string(), 2);
    let index = FakeIndex::default();
    let state = FakeStateStore::default();
    let state_handle = state.state.clone();

    let handle = start_watcher(
        WatcherConfig { retry_max: 1, reap_period: Duration::from_millis(60), ..base_config() },
        registry,
        index.clone(),
        state,
        Arc::new(DefaultFormatter) as Arc<dyn Formatter>,
        Arc::new(NoopTelemetry) as Arc<dyn Telemetry>,
    )
    .await
    .unwrap();
    let mut events = handle.subscribe();

    tx.send(change("w", 30, false, Some("1-a"))).await.unwrap();

    recv_until(&mut events, |e| matches!(e, rsm_core::IngestEvent::JobParked { id } if id == "w")).await;
    // Let the reinjected attempt succeed once the reaper reruns it.
    fails.lock().unwrap().insert("w".to_string(), 0);

    recv_until(&mut events, |e| matches!(e, rsm_core::IngestEvent::Reaped { count } if *count == 1)).await;
    recv_until(
        &mut events,
        |e| matches!(e, rsm_core::IngestEvent::JobStarted { id, retry } if id == "w" && *retry == 0),
    )
    .await;
    recv_until(&mut events, |e| is_job_finished(e, "w")).await;

    assert_eq!(index.upserts.lock().unwrap().as_slice(), ["w"]);
    assert_eq!(state_handle.lock().unwrap().seq, 0, "reinjected jobs always carry ignore_seq");

    handle.request_stop();
    handle.wait().await.unwrap();
}

#[tokio::test]
async fn a_fresh_live_change_supersedes_its_own_parked_entry() {
    let (registry, tx, fails) = fake_registry();
    fails.lock().unwrap().insert("y".to_string(), 100);
    let index = FakeIndex::default();
    let state = FakeStateStore::default();
    let state_handle = state.state.clone();

    let handle = start_watcher(
        WatcherConfig { retry_max: 1, reap_period: Duration::from_secs(3600), ..base_config() },
        registry,
        index.clone(),
        state,
        Arc::new(DefaultFormatter) as Arc<dyn Formatter>,
        Arc::new(NoopTelemetry) as Arc<dyn Telemetry>,
    )
    .await
    .unwrap();
    let mut events = handle.subscribe();

    tx.send(change("y", 20, false, Some("1-a"))).await.unwrap();
    recv_until(&mut events, |e| matches!(e, rsm_core::IngestEvent::JobParked { id } if id == "y")).await;

    fails.lock().unwrap().insert("y".to_string(), 0);
    tx.send(change("y", 25, false, Some("1-b"))).await.unwrap();
    recv_until(&mut events, |e| is_job_finished(e, "y")).await;

    assert_eq!(index.upserts.lock().unwrap().as_slice(), ["y"]);
    assert_eq!(state_handle.lock().unwrap().seq, 25);

    handle.request_stop();
    handle.wait().await.unwrap();
}

#[tokio::test]
async fn rapid_events_all_process_in_order_under_backpressure() {
    let (registry, tx, _fails) = fake_registry();
    let index = FakeIndex::default();
    let state = FakeStateStore::default();
    let state_handle = state.state.clone();

    let handle = start_watcher(
        WatcherConfig { max_prefetch: 3, min_unpause: 1, ..base_config() },
        registry,
        index.clone(),
        state,
        Arc::new(DefaultFormatter) as Arc<dyn Formatter>,
        Arc::new(NoopTelemetry) as Arc<dyn Telemetry>,
    )
    .await
    .unwrap();
    let mut events = handle.subscribe();

    let ids: Vec<String> = (0..10).map(|i| format!("p{i}")).collect();
    for (i, id) in ids.iter().enumerate() {
        tx.send(change(id, (i + 1) as i64, false, Some("1-a"))).await.unwrap();
    }

    for id in &ids {
        recv_until(&mut events, |e| is_job_finished(e, id)).await;
    }

    assert_eq!(index.upserts.lock().unwrap().as_slice(), ids.as_slice());
    assert_eq!(state_handle.lock().unwrap().seq, 10, "final seq is the last event's seq");

    handle.request_stop();
    handle.wait().await.unwrap();
}
