//! Integration tests for the job dispatcher.
//!
//! These tests drive the dispatcher against a scripted upstream and cover:
//! - Due-key selection and busy-key skipping
//! - Live collection priority over backfill for the same series
//! - Idempotent backfill with no refetch of filled slots
//! - Unresolved gap persistence and re-offer on the next full pass
//! - Fatal storage failures and per-cycle collection failures
//! - Signal delivery to sinks and the persistent loop

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tempfile::TempDir;
use tokio::sync::{mpsc, Semaphore};

use chokepoint_core::{
    AppendOutcome, CollectionError, Collector, Observation, ObservationValue, ProcessError,
    Processor, RawPayload, SeriesKey, SeriesStore, SignalType, StorageError, TimeRange,
};
use chokepoint_data::{InMemorySeriesStore, UnresolvedGapStore};
use chokepoint_scheduler::{
    CollectionPipeline, DispatchError, DispatcherCommand, GapDetector, JobDispatcher, RetryPolicy,
    ScheduleRegistry,
};
use chokepoint_signals::{build_registry, ChannelSink, SignalEngine};

// =============================================================================
// Helper Functions
// =============================================================================

fn day(d: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, d, 0, 0, 0).unwrap()
}

fn arrivals() -> SeriesKey {
    SeriesKey::new("suez-canal", "vessel_arrivals")
}

fn wait_time() -> SeriesKey {
    SeriesKey::new("suez-canal", "wait_time_hours")
}

/// Upstream with a fixed history per series. Records every fetch.
#[derive(Default)]
struct ScriptedSource {
    world: Mutex<HashMap<SeriesKey, BTreeMap<DateTime<Utc>, f64>>>,
    fetches: Mutex<Vec<(SeriesKey, Option<TimeRange>)>>,
    transient_failures: Mutex<HashMap<SeriesKey, u32>>,
    gate: Mutex<Option<(SeriesKey, Arc<Semaphore>)>>,
}

impl ScriptedSource {
    fn with_days(key: &SeriesKey, days: impl IntoIterator<Item = u32>) -> Self {
        let source = Self::default();
        source.publish(key, days.into_iter().map(|d| (day(d), f64::from(d))));
        source
    }

    fn publish(&self, key: &SeriesKey, points: impl IntoIterator<Item = (DateTime<Utc>, f64)>) {
        self.world
            .lock()
            .entry(key.clone())
            .or_default()
            .extend(points);
    }

    fn fail_next(&self, key: &SeriesKey, times: u32) {
        self.transient_failures.lock().insert(key.clone(), times);
    }

    fn fetch_count(&self, key: &SeriesKey) -> usize {
        self.fetches.lock().iter().filter(|(k, _)| k == key).count()
    }
}

#[async_trait]
impl Collector for ScriptedSource {
    async fn fetch(
        &self,
        key: &SeriesKey,
        range: Option<TimeRange>,
    ) -> Result<RawPayload, CollectionError> {
        self.fetches.lock().push((key.clone(), range));

        let gate = self
            .gate
            .lock()
            .as_ref()
            .filter(|(gated, _)| gated == key)
            .map(|(_, sem)| Arc::clone(sem));
        if let Some(sem) = gate {
            let _permit = sem.acquire().await;
        }

        {
            let mut failures = self.transient_failures.lock();
            if let Some(remaining) = failures.get_mut(key) {
                if *remaining > 0 {
                    *remaining -= 1;
                    return Err(CollectionError::Network("connection reset".to_string()));
                }
            }
        }

        let points: Vec<serde_json::Value> = self
            .world
            .lock()
            .get(key)
            .map(|series| {
                series
                    .iter()
                    .filter(|(ts, _)| range.map_or(true, |r| r.contains(**ts)))
                    .map(|(ts, v)| serde_json::json!([ts.to_rfc3339(), v]))
                    .collect()
            })
            .unwrap_or_default();
        Ok(RawPayload::new(
            key.clone(),
            serde_json::json!({ "points": points }),
        ))
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

struct PointsProcessor;

impl Processor for PointsProcessor {
    fn transform(&self, payload: &RawPayload) -> Result<Vec<Observation>, ProcessError> {
        let points = payload.body["points"]
            .as_array()
            .ok_or_else(|| ProcessError::MissingField("points".to_string()))?;
        points
            .iter()
            .map(|p| {
                let ts = p[0]
                    .as_str()
                    .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
                    .ok_or_else(|| ProcessError::Malformed("bad timestamp".to_string()))?;
                let value = p[1]
                    .as_f64()
                    .ok_or_else(|| ProcessError::Malformed("bad value".to_string()))?;
                Ok(Observation::new(
                    payload.key.clone(),
                    ts.with_timezone(&Utc),
                    ObservationValue::Number(value),
                ))
            })
            .collect()
    }
}

/// Store whose appends always fail.
struct BrokenStore;

impl SeriesStore for BrokenStore {
    fn append(&self, _key: &SeriesKey, _obs: &Observation) -> Result<AppendOutcome, StorageError> {
        Err(StorageError::Io(std::io::Error::new(
            std::io::ErrorKind::Other,
            "disk full",
        )))
    }

    fn query_range(
        &self,
        _key: &SeriesKey,
        _start: DateTime<Utc>,
        _end: DateTime<Utc>,
    ) -> Result<Vec<Observation>, StorageError> {
        Ok(Vec::new())
    }

    fn exists(&self, _key: &SeriesKey, _timestamp: DateTime<Utc>) -> Result<bool, StorageError> {
        Ok(false)
    }

    fn latest(&self, _key: &SeriesKey) -> Result<Option<Observation>, StorageError> {
        Ok(None)
    }

    fn earliest(&self, _key: &SeriesKey) -> Result<Option<Observation>, StorageError> {
        Ok(None)
    }

    fn count(&self, _key: &SeriesKey) -> Result<usize, StorageError> {
        Ok(0)
    }
}

fn registry(keys: &[(SeriesKey, u32, u32)]) -> ScheduleRegistry {
    let mut registry = ScheduleRegistry::new();
    for (key, hour, minute) in keys {
        registry
            .register_raw(key.clone(), "daily", *hour, *minute)
            .unwrap();
    }
    registry
}

fn seed(store: &InMemorySeriesStore, key: &SeriesKey, days: &[u32]) {
    for &d in days {
        store
            .append(
                key,
                &Observation::new(key.clone(), day(d), ObservationValue::Number(f64::from(d))),
            )
            .unwrap();
    }
}

fn dispatcher(
    registry: ScheduleRegistry,
    source: Arc<ScriptedSource>,
    store: Arc<dyn SeriesStore>,
) -> JobDispatcher {
    let pipeline = CollectionPipeline::new(source, Arc::new(PointsProcessor), store)
        .with_retry(RetryPolicy::immediate(3));
    let engine = SignalEngine::new(build_registry(None).unwrap());
    JobDispatcher::new(registry, Arc::new(pipeline), engine)
        .with_detector(GapDetector::default().with_epoch(day(1)))
}

// =============================================================================
// Tick Tests
// =============================================================================

#[tokio::test]
async fn test_tick_runs_only_due_keys() {
    let store = Arc::new(InMemorySeriesStore::new());
    let source = Arc::new(ScriptedSource::with_days(&arrivals(), 1..=3));
    source.publish(&wait_time(), [(day(1), 5.0), (day(2), 6.0)]);
    let dispatcher = Arc::new(dispatcher(
        registry(&[(arrivals(), 2, 0), (wait_time(), 2, 5)]),
        Arc::clone(&source),
        store.clone(),
    ));

    let at_two = day(3) + Duration::hours(2);
    let report = dispatcher.tick(at_two).await.unwrap();
    assert_eq!(report.due, 1);
    assert_eq!(report.succeeded, 1);
    assert_eq!(store.count(&arrivals()).unwrap(), 3);
    assert_eq!(source.fetch_count(&wait_time()), 0);

    let report = dispatcher.tick(at_two + Duration::minutes(5)).await.unwrap();
    assert_eq!(report.due, 1);
    assert_eq!(store.count(&wait_time()).unwrap(), 2);

    // nothing fires between 02:05 and 02:06
    let report = dispatcher.tick(at_two + Duration::minutes(6)).await.unwrap();
    assert_eq!(report.due, 0);
}

#[tokio::test]
async fn test_busy_key_is_skipped() {
    let store = Arc::new(InMemorySeriesStore::new());
    let source = Arc::new(ScriptedSource::with_days(&arrivals(), 1..=3));
    let dispatcher = Arc::new(dispatcher(
        registry(&[(arrivals(), 2, 0)]),
        Arc::clone(&source),
        store.clone(),
    ));

    let guard = dispatcher.locks().try_acquire(&arrivals()).unwrap();
    let report = dispatcher.run_once(day(4)).await.unwrap();
    assert_eq!(report.skipped_busy, 1);
    assert_eq!(report.started, 0);
    assert_eq!(source.fetch_count(&arrivals()), 0);

    drop(guard);
    let report = dispatcher.run_once(day(4)).await.unwrap();
    assert_eq!(report.succeeded, 1);
}

#[tokio::test]
async fn test_slow_key_does_not_block_other_keys() {
    let store = Arc::new(InMemorySeriesStore::new());
    let source = Arc::new(ScriptedSource::with_days(&arrivals(), 1..=3));
    source.publish(&wait_time(), [(day(1), 5.0)]);
    let gate = Arc::new(Semaphore::new(0));
    *source.gate.lock() = Some((arrivals(), Arc::clone(&gate)));

    let dispatcher = Arc::new(dispatcher(
        registry(&[(arrivals(), 2, 0), (wait_time(), 2, 0)]),
        Arc::clone(&source),
        store.clone(),
    ));

    let run = {
        let dispatcher = Arc::clone(&dispatcher);
        tokio::spawn(async move { dispatcher.run_once(day(4)).await })
    };

    let mut waited = 0;
    while store.count(&wait_time()).unwrap() == 0 && waited < 200 {
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        waited += 1;
    }
    assert_eq!(store.count(&wait_time()).unwrap(), 1);
    assert_eq!(store.count(&arrivals()).unwrap(), 0);
    assert!(dispatcher.locks().is_held(&arrivals()));

    gate.add_permits(1);
    let report = run.await.unwrap().unwrap();
    assert_eq!(report.succeeded, 2);
    assert_eq!(store.count(&arrivals()).unwrap(), 3);
}

#[tokio::test]
async fn test_transient_failures_retry_within_cycle() {
    let store = Arc::new(InMemorySeriesStore::new());
    let source = Arc::new(ScriptedSource::with_days(&arrivals(), 1..=2));
    let dispatcher = Arc::new(dispatcher(
        registry(&[(arrivals(), 2, 0)]),
        Arc::clone(&source),
        store.clone(),
    ));

    source.fail_next(&arrivals(), 2);
    let report = dispatcher.run_once(day(3)).await.unwrap();
    assert_eq!(report.succeeded, 1);
    assert_eq!(source.fetch_count(&arrivals()), 3);
}

#[tokio::test]
async fn test_exhausted_retries_fail_cycle_only() {
    let store = Arc::new(InMemorySeriesStore::new());
    let source = Arc::new(ScriptedSource::with_days(&arrivals(), 1..=2));
    let dispatcher = Arc::new(dispatcher(
        registry(&[(arrivals(), 2, 0)]),
        Arc::clone(&source),
        store.clone(),
    ));

    source.fail_next(&arrivals(), 5);
    let report = dispatcher.run_once(day(3)).await.unwrap();
    assert_eq!(report.failed, 1);
    assert_eq!(store.count(&arrivals()).unwrap(), 0);
    assert!(!dispatcher.locks().is_held(&arrivals()));

    // next fire tries again independently
    source.fail_next(&arrivals(), 0);
    let report = dispatcher.run_once(day(3)).await.unwrap();
    assert_eq!(report.succeeded, 1);
    assert_eq!(store.count(&arrivals()).unwrap(), 2);
}

#[tokio::test]
async fn test_storage_failure_is_fatal() {
    let source = Arc::new(ScriptedSource::with_days(&arrivals(), 1..=2));
    let dispatcher = Arc::new(dispatcher(
        registry(&[(arrivals(), 2, 0)]),
        source,
        Arc::new(BrokenStore),
    ));

    let err = dispatcher.run_once(day(3)).await.unwrap_err();
    assert!(matches!(err, DispatchError::Storage(_)));
}

#[tokio::test]
async fn test_live_fetch_is_incremental() {
    let store = Arc::new(InMemorySeriesStore::new());
    seed(&store, &arrivals(), &[1, 2, 3]);
    let source = Arc::new(ScriptedSource::with_days(&arrivals(), 1..=5));
    let dispatcher = Arc::new(dispatcher(
        registry(&[(arrivals(), 2, 0)]),
        Arc::clone(&source),
        store.clone(),
    ));

    let report = dispatcher.run_once(day(5) + Duration::hours(3)).await.unwrap();
    assert_eq!(report.appended, 2);

    let fetches = source.fetches.lock();
    let range = fetches[0].1.unwrap();
    assert_eq!(range.start, day(4));
    assert_eq!(range.end, day(6));
}

// =============================================================================
// Backfill Tests
// =============================================================================

#[tokio::test]
async fn test_backfill_is_idempotent() {
    let store = Arc::new(InMemorySeriesStore::new());
    seed(&store, &arrivals(), &[1, 2, 5]);
    let source = Arc::new(ScriptedSource::with_days(&arrivals(), 1..=9));
    let dispatcher = Arc::new(dispatcher(
        registry(&[(arrivals(), 2, 0)]),
        Arc::clone(&source),
        store.clone(),
    ));

    // slots through Mar 9 are expected at Mar 10 with one day of grace
    let first = dispatcher.full_backfill_pass(day(10)).await.unwrap();
    assert_eq!(first.gaps, 2);
    assert_eq!(first.filled, 6);
    assert_eq!(first.fetches, 2);
    assert_eq!(first.unresolved, 0);
    assert_eq!(store.count(&arrivals()).unwrap(), 9);

    let fetches_before = source.fetch_count(&arrivals());
    let second = dispatcher.full_backfill_pass(day(10)).await.unwrap();
    assert_eq!(second.gaps, 0);
    assert_eq!(second.fetches, 0);
    assert_eq!(source.fetch_count(&arrivals()), fetches_before);
    assert_eq!(store.count(&arrivals()).unwrap(), 9);
}

#[tokio::test]
async fn test_live_collection_has_priority_over_backfill() {
    let store = Arc::new(InMemorySeriesStore::new());
    seed(&store, &arrivals(), &[1, 5]);
    let source = Arc::new(ScriptedSource::with_days(&arrivals(), 1..=9));
    let dispatcher = Arc::new(dispatcher(
        registry(&[(arrivals(), 2, 0)]),
        Arc::clone(&source),
        store.clone(),
    ));

    let at = day(9) + Duration::hours(2);
    let report = dispatcher.run_once(at).await.unwrap();
    assert_eq!(report.appended, 4);
    // the live job planned Mar 2-4 but left it for a later tick
    assert_eq!(dispatcher.pending_backfill(), 1);
    assert_eq!(report.backfill.gaps, 0);

    let report = dispatcher.run_once(at).await.unwrap();
    assert_eq!(report.backfill.gaps, 0);
    assert_eq!(dispatcher.pending_backfill(), 1);

    // not due at noon, so the pending backfill runs
    let report = dispatcher.tick(day(9) + Duration::hours(12)).await.unwrap();
    assert_eq!(report.due, 0);
    assert_eq!(report.backfill.gaps, 1);
    assert_eq!(report.backfill.filled, 3);
    assert_eq!(store.count(&arrivals()).unwrap(), 9);
}

#[tokio::test]
async fn test_unresolved_gap_is_persisted_and_reoffered() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("unresolved_gaps.json");

    let store = Arc::new(InMemorySeriesStore::new());
    seed(&store, &arrivals(), &[1, 2]);
    // upstream has no record for Mar 3
    let source = Arc::new(ScriptedSource::with_days(&arrivals(), [1, 2, 4, 5]));
    let unresolved = Arc::new(UnresolvedGapStore::load(path.clone()));
    let dispatcher = Arc::new(
        dispatcher(
            registry(&[(arrivals(), 2, 0)]),
            Arc::clone(&source),
            store.clone(),
        )
        .with_unresolved(Arc::clone(&unresolved)),
    );

    let report = dispatcher.full_backfill_pass(day(6)).await.unwrap();
    assert_eq!(report.filled, 2);
    assert_eq!(report.unresolved, 1);

    let reloaded = UnresolvedGapStore::load(path.clone());
    let records = reloaded.for_key(&arrivals());
    assert_eq!(records.len(), 1);
    assert_eq!((records[0].start, records[0].end), (day(3), day(3)));
    assert_eq!(records[0].attempts, 1);

    // a live job does not retry the parked slot every tick
    dispatcher.run_once(day(6) + Duration::hours(2)).await.unwrap();
    assert_eq!(dispatcher.pending_backfill(), 0);

    let summary = dispatcher.check(day(6)).unwrap();
    assert_eq!(summary[0].missing_slots, 1);
    assert_eq!(summary[0].unresolved.len(), 1);

    // the next full pass re-offers it
    let report = dispatcher.full_backfill_pass(day(6)).await.unwrap();
    assert_eq!(report.unresolved, 1);
    assert_eq!(unresolved.for_key(&arrivals())[0].attempts, 2);

    source.publish(&arrivals(), [(day(3), 3.0)]);
    let report = dispatcher.full_backfill_pass(day(6)).await.unwrap();
    assert_eq!(report.filled, 1);
    assert_eq!(report.unresolved, 0);
    assert!(UnresolvedGapStore::load(path).is_empty());
}

#[tokio::test]
async fn test_check_does_not_fetch() {
    let store = Arc::new(InMemorySeriesStore::new());
    seed(&store, &arrivals(), &[1, 4]);
    let source = Arc::new(ScriptedSource::with_days(&arrivals(), 1..=9));
    let dispatcher = Arc::new(dispatcher(
        registry(&[(arrivals(), 2, 0)]),
        Arc::clone(&source),
        store.clone(),
    ));

    let summary = dispatcher.check(day(6)).unwrap();
    assert_eq!(summary.len(), 1);
    assert_eq!(summary[0].missing_slots, 3);
    assert_eq!(summary[0].gaps.len(), 2);
    assert_eq!(source.fetch_count(&arrivals()), 0);
    assert_eq!(dispatcher.pending_backfill(), 0);
}

#[tokio::test]
async fn test_collect_key_returns_stored_observations() {
    let store = Arc::new(InMemorySeriesStore::new());
    seed(&store, &arrivals(), &[1]);
    let source = Arc::new(ScriptedSource::with_days(&arrivals(), 1..=3));
    let dispatcher = Arc::new(dispatcher(
        registry(&[(arrivals(), 2, 0)]),
        Arc::clone(&source),
        store.clone(),
    ));

    let (report, stored) = dispatcher.collect_key(&arrivals(), day(4)).await.unwrap();
    assert_eq!(report.appended, 2);
    assert_eq!(
        stored.iter().map(|o| o.timestamp).collect::<Vec<_>>(),
        vec![day(2), day(3)]
    );

    let unknown = SeriesKey::new("bab-el-mandeb", "vessel_arrivals");
    assert!(matches!(
        dispatcher.collect_key(&unknown, day(4)).await,
        Err(DispatchError::Config(_))
    ));

    let _guard = dispatcher.locks().try_acquire(&arrivals()).unwrap();
    assert!(matches!(
        dispatcher.collect_key(&arrivals(), day(4)).await,
        Err(DispatchError::Busy(_))
    ));
}

// =============================================================================
// Signal Tests
// =============================================================================

#[tokio::test]
async fn test_signals_are_delivered_after_collection() {
    let store = Arc::new(InMemorySeriesStore::new());
    let source = Arc::new(ScriptedSource::default());
    source.publish(&wait_time(), [(day(1), 10.0), (day(2), 50.0), (day(3), 60.0)]);
    let (sink, mut rx) = ChannelSink::channel(8);
    let dispatcher = Arc::new(
        dispatcher(
            registry(&[(wait_time(), 2, 0)]),
            Arc::clone(&source),
            store.clone(),
        )
        .with_sink(Arc::new(sink)),
    );

    let report = dispatcher.run_once(day(3) + Duration::hours(2)).await.unwrap();
    assert_eq!(report.signals, 1);

    let event = rx.recv().await.unwrap();
    assert_eq!(event.signal_type, SignalType::CongestionSpike);
    assert_eq!(event.trigger.timestamp, day(2));
    assert!(rx.try_recv().is_err());

    // collecting again appends nothing and emits nothing
    let report = dispatcher.run_once(day(3) + Duration::hours(3)).await.unwrap();
    assert_eq!(report.signals, 0);
}

// =============================================================================
// Persistent Loop Tests
// =============================================================================

#[tokio::test]
async fn test_run_loop_handles_commands_and_shuts_down() {
    let store = Arc::new(InMemorySeriesStore::new());
    let source = Arc::new(ScriptedSource::default());
    source.publish(&arrivals(), [(Utc::now() - Duration::days(1), 1.0)]);
    let dispatcher = Arc::new(dispatcher(
        registry(&[(arrivals(), 2, 0)]),
        Arc::clone(&source),
        store.clone(),
    ));

    let (tx, rx) = mpsc::channel(4);
    let handle = tokio::spawn(Arc::clone(&dispatcher).run(rx));

    tx.send(DispatcherCommand::RunNow).await.unwrap();
    let mut waited = 0;
    while store.count(&arrivals()).unwrap() == 0 && waited < 200 {
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        waited += 1;
    }
    assert_eq!(store.count(&arrivals()).unwrap(), 1);

    tx.send(DispatcherCommand::Shutdown).await.unwrap();
    handle.await.unwrap().unwrap();
}
