//! The job dispatcher.
//!
//! One coordinating loop ticks at a fixed granularity. Each tick collects the
//! series whose fire time elapsed since the previous tick and spawns one task
//! per series. A series whose previous job still holds its lock is skipped for
//! that tick; the missed slot is later found by gap detection. Pending
//! backfill runs in the same task set but only for series without a live job
//! in that tick.
//!
//! Inside a task, collection, append, gap planning and signal state updates
//! all happen under the series lock. Events are delivered to sinks after the
//! lock is released.

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, MutexGuard};
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use chokepoint_core::{
    BackfillConfig, ConfigError, DispatcherConfig, FrequencyClass, Observation, SeriesKey,
    SeriesStore, SignalEvent, SignalSink, StorageError, TimeRange, ValueType,
};
use chokepoint_data::{UnresolvedGap, UnresolvedGapStore};
use chokepoint_signals::SignalEngine;

use crate::backfill::{BackfillExecutor, BackfillReport};
use crate::error::{DispatchError, JobFailure, PipelineError};
use crate::gaps::{BackfillGap, BackfillPlanner, GapDetector};
use crate::locks::{KeyGuard, KeyLocks};
use crate::pipeline::CollectionPipeline;
use crate::registry::ScheduleRegistry;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    Live,
    Backfill,
}

/// Result of one finished task.
#[derive(Debug)]
pub struct JobReport {
    pub key: SeriesKey,
    pub kind: JobKind,
    pub appended: usize,
    pub signals: Vec<SignalEvent>,
    /// Set when a live job failed for this cycle
    pub failure: Option<JobFailure>,
    pub backfill: BackfillReport,
}

impl JobReport {
    fn new(key: SeriesKey, kind: JobKind) -> Self {
        Self {
            key,
            kind,
            appended: 0,
            signals: Vec::new(),
            failure: None,
            backfill: BackfillReport::default(),
        }
    }
}

/// Totals for one tick, or for a window of ticks in persistent mode.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TickReport {
    pub due: usize,
    pub started: usize,
    pub skipped_busy: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub appended: usize,
    pub signals: usize,
    pub backfill: BackfillReport,
}

impl TickReport {
    fn record(&mut self, job: &JobReport) {
        match job.kind {
            JobKind::Live if job.failure.is_some() => self.failed += 1,
            JobKind::Live => self.succeeded += 1,
            JobKind::Backfill => self.backfill.merge(&job.backfill),
        }
        self.appended += job.appended;
        self.signals += job.signals.len();
    }
}

/// Gap state of one series, as reported by the check mode.
#[derive(Debug, Clone, Serialize)]
pub struct GapSummary {
    pub key: SeriesKey,
    pub frequency: FrequencyClass,
    pub expected_slots: usize,
    pub missing_slots: usize,
    pub gaps: Vec<BackfillGap>,
    pub unresolved: Vec<UnresolvedGap>,
    pub truncated: bool,
}

/// Commands accepted by the persistent loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatcherCommand {
    /// Start a live job for every series now
    RunNow,
    /// Re-scan every series, including unresolved gaps
    FullBackfill,
    /// Stop spawning, wait for running jobs, and return
    Shutdown,
}

type JobResult = Result<JobReport, StorageError>;

pub struct JobDispatcher {
    registry: ScheduleRegistry,
    pipeline: Arc<CollectionPipeline>,
    backfill: BackfillExecutor,
    detector: GapDetector,
    planner: Mutex<BackfillPlanner>,
    engine: Mutex<SignalEngine>,
    sinks: Vec<Arc<dyn SignalSink>>,
    locks: KeyLocks,
    last_tick: Mutex<Option<DateTime<Utc>>>,
    tick: Duration,
    full_scan_interval: Duration,
}

impl std::fmt::Debug for JobDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobDispatcher")
            .field("tick", &self.tick)
            .field("full_scan_interval", &self.full_scan_interval)
            .finish_non_exhaustive()
    }
}

impl JobDispatcher {
    pub fn new(
        registry: ScheduleRegistry,
        pipeline: Arc<CollectionPipeline>,
        engine: SignalEngine,
    ) -> Self {
        let unresolved = Arc::new(UnresolvedGapStore::in_memory());
        Self {
            backfill: BackfillExecutor::new(Arc::clone(&pipeline), unresolved),
            registry,
            pipeline,
            detector: GapDetector::default(),
            planner: Mutex::new(BackfillPlanner::new()),
            engine: Mutex::new(engine),
            sinks: Vec::new(),
            locks: KeyLocks::new(),
            last_tick: Mutex::new(None),
            tick: Duration::from_secs(60),
            full_scan_interval: Duration::from_secs(3600),
        }
    }

    /// Applies tick and backfill settings.
    #[must_use]
    pub fn with_config(mut self, dispatcher: &DispatcherConfig, backfill: &BackfillConfig) -> Self {
        self.tick = dispatcher.tick();
        self.full_scan_interval = Duration::from_secs(backfill.full_scan_interval_secs.max(1));
        self.detector = GapDetector::from(backfill);
        self
    }

    #[must_use]
    pub fn with_detector(mut self, detector: GapDetector) -> Self {
        self.detector = detector;
        self
    }

    #[must_use]
    pub fn with_unresolved(mut self, unresolved: Arc<UnresolvedGapStore>) -> Self {
        self.backfill = BackfillExecutor::new(Arc::clone(&self.pipeline), unresolved);
        self
    }

    #[must_use]
    pub fn with_sink(mut self, sink: Arc<dyn SignalSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    #[must_use]
    pub fn registry(&self) -> &ScheduleRegistry {
        &self.registry
    }

    #[must_use]
    pub fn store(&self) -> &Arc<dyn SeriesStore> {
        self.pipeline.store()
    }

    #[must_use]
    pub fn unresolved(&self) -> &Arc<UnresolvedGapStore> {
        self.backfill.unresolved()
    }

    #[must_use]
    pub fn locks(&self) -> &KeyLocks {
        &self.locks
    }

    /// Locks the signal engine. Never hold the guard across an await.
    pub fn engine(&self) -> MutexGuard<'_, SignalEngine> {
        self.engine.lock()
    }

    #[must_use]
    pub fn pending_backfill(&self) -> usize {
        self.planner.lock().pending_gaps()
    }

    /// Series whose fire time lies in `(previous tick, now]`.
    ///
    /// The first tick looks back one tick interval.
    fn due_keys(&self, now: DateTime<Utc>) -> Vec<SeriesKey> {
        let since = {
            let mut last = self.last_tick.lock();
            let since = last.unwrap_or_else(|| now - tick_span(self.tick));
            if now > since {
                *last = Some(now);
            }
            since
        };
        if now <= since {
            return Vec::new();
        }
        self.registry.due(since, now)
    }

    fn all_keys(&self) -> Vec<SeriesKey> {
        self.registry.keys().cloned().collect()
    }

    /// Runs one tick and waits for every job it started.
    ///
    /// # Errors
    /// Returns `DispatchError::Storage` if an append failed. Remaining jobs
    /// are aborted.
    pub async fn tick(self: &Arc<Self>, now: DateTime<Utc>) -> Result<TickReport, DispatchError> {
        let keys = self.due_keys(now);
        self.run_keys(keys, now).await
    }

    /// Starts a live job for every registered series now, regardless of
    /// cadence, and waits for all of them.
    ///
    /// # Errors
    /// Returns `DispatchError::Storage` if an append failed.
    pub async fn run_once(self: &Arc<Self>, now: DateTime<Utc>) -> Result<TickReport, DispatchError> {
        *self.last_tick.lock() = Some(now);
        let keys = self.all_keys();
        self.run_keys(keys, now).await
    }

    async fn run_keys(
        self: &Arc<Self>,
        keys: Vec<SeriesKey>,
        now: DateTime<Utc>,
    ) -> Result<TickReport, DispatchError> {
        let mut jobs = JoinSet::new();
        let mut report = self.start_tick(keys, now, &mut jobs);
        drain(&mut jobs, &mut report).await?;
        info!(
            due = report.due,
            succeeded = report.succeeded,
            failed = report.failed,
            skipped_busy = report.skipped_busy,
            appended = report.appended,
            signals = report.signals,
            "Tick complete"
        );
        Ok(report)
    }

    /// Runs one live job for `key` outside the tick schedule.
    ///
    /// Returns the job report and the observations it stored.
    ///
    /// # Errors
    /// `DispatchError::Config` for an unregistered series,
    /// `DispatchError::Busy` if another job holds its lock, and
    /// `DispatchError::Storage` if an append failed.
    pub async fn collect_key(
        &self,
        key: &SeriesKey,
        now: DateTime<Utc>,
    ) -> Result<(JobReport, Vec<Observation>), DispatchError> {
        let series = self.registry.get(key).ok_or_else(|| {
            DispatchError::Config(ConfigError::Invalid(format!("unknown series {key}")))
        })?;
        let guard = self
            .locks
            .try_acquire(key)
            .ok_or_else(|| DispatchError::Busy(key.to_string()))?;
        let frequency = series.schedule.frequency();
        let value_type = series.value_type;
        let collected = self
            .live_collect(key.clone(), frequency, value_type, guard, now)
            .await?;
        Ok(collected)
    }

    /// Scans every series, re-offers unresolved gaps, and backfills all of
    /// them. Series busy with another job keep their gaps pending.
    ///
    /// # Errors
    /// Returns `DispatchError::Storage` if a read or append failed.
    pub async fn full_backfill_pass(
        self: &Arc<Self>,
        now: DateTime<Utc>,
    ) -> Result<BackfillReport, DispatchError> {
        self.plan_full_pass(now)?;
        let mut jobs = JoinSet::new();
        let mut report = TickReport::default();
        self.start_backfill(&HashSet::new(), now, &mut jobs, &mut report);
        drain(&mut jobs, &mut report).await?;
        info!(
            gaps = report.backfill.gaps,
            filled = report.backfill.filled,
            fetches = report.backfill.fetches,
            unresolved = report.backfill.unresolved,
            "Backfill pass complete"
        );
        Ok(report.backfill)
    }

    /// Reports missing slots and unresolved gaps for every series without
    /// fetching anything.
    ///
    /// # Errors
    /// Returns `StorageError` if the store cannot be read.
    pub fn check(&self, now: DateTime<Utc>) -> Result<Vec<GapSummary>, StorageError> {
        let store = self.store().as_ref();
        self.registry
            .iter()
            .map(|(key, series)| {
                let frequency = series.schedule.frequency();
                let scan = self.detector.scan(store, key, frequency, now)?;
                Ok(GapSummary {
                    key: key.clone(),
                    frequency,
                    expected_slots: scan.expected_slots,
                    missing_slots: scan.missing_slots,
                    gaps: scan.gaps,
                    unresolved: self.unresolved().for_key(key),
                    truncated: scan.truncated,
                })
            })
            .collect()
    }

    /// Plans backfill for every idle series from a fresh scan.
    ///
    /// Returns the number of pending gaps.
    fn plan_full_pass(&self, now: DateTime<Utc>) -> Result<usize, StorageError> {
        let store = self.store().as_ref();
        for (key, series) in self.registry.iter() {
            if self.locks.is_held(key) {
                continue;
            }
            let scan = self
                .detector
                .scan(store, key, series.schedule.frequency(), now)?;
            self.planner.lock().replace(key, scan.gaps);
        }
        let pending = self.planner.lock().pending_gaps();
        info!(pending, "Full backfill pass planned");
        Ok(pending)
    }

    /// Spawns live jobs for `keys` and backfill jobs for other pending series.
    fn start_tick(
        self: &Arc<Self>,
        keys: Vec<SeriesKey>,
        now: DateTime<Utc>,
        jobs: &mut JoinSet<JobResult>,
    ) -> TickReport {
        let mut report = TickReport {
            due: keys.len(),
            ..TickReport::default()
        };
        let live: HashSet<SeriesKey> = keys.iter().cloned().collect();

        for key in keys {
            let Some(series) = self.registry.get(&key) else {
                continue;
            };
            // acquired here, before any backfill task is spawned
            let Some(guard) = self.locks.try_acquire(&key) else {
                debug!(series = %key, "Previous job still running, skipping this tick");
                report.skipped_busy += 1;
                continue;
            };
            let frequency = series.schedule.frequency();
            let value_type = series.value_type;
            let this = Arc::clone(self);
            jobs.spawn(async move { this.live_job(key, frequency, value_type, guard, now).await });
            report.started += 1;
        }

        self.start_backfill(&live, now, jobs, &mut report);
        report
    }

    fn start_backfill(
        self: &Arc<Self>,
        exclude: &HashSet<SeriesKey>,
        now: DateTime<Utc>,
        jobs: &mut JoinSet<JobResult>,
        report: &mut TickReport,
    ) {
        let pending = self.planner.lock().pending_keys();
        for key in pending.into_iter().filter(|k| !exclude.contains(k)) {
            let Some(series) = self.registry.get(&key) else {
                self.planner.lock().take(&key);
                continue;
            };
            let Some(guard) = self.locks.try_acquire(&key) else {
                report.backfill.skipped_busy += 1;
                continue;
            };
            let gaps = self.planner.lock().take(&key);
            if gaps.is_empty() {
                continue;
            }
            let frequency = series.schedule.frequency();
            let value_type = series.value_type;
            let this = Arc::clone(self);
            jobs.spawn(async move {
                this.backfill_job(key, frequency, value_type, gaps, guard, now)
                    .await
            });
        }
    }

    /// Range for an incremental fetch: from the slot after the newest stored
    /// observation to the end of the current slot. `None` fetches everything.
    fn live_range(
        &self,
        key: &SeriesKey,
        frequency: FrequencyClass,
        now: DateTime<Utc>,
    ) -> Result<Option<TimeRange>, StorageError> {
        let latest = self.store().latest(key)?;
        Ok(latest.map(|obs| {
            TimeRange::new(
                frequency.next_slot(frequency.slot_floor(obs.timestamp)),
                frequency.next_slot(frequency.slot_floor(now)),
            )
        }))
    }

    async fn live_job(
        self: Arc<Self>,
        key: SeriesKey,
        frequency: FrequencyClass,
        value_type: Option<ValueType>,
        guard: KeyGuard,
        now: DateTime<Utc>,
    ) -> JobResult {
        self.live_collect(key, frequency, value_type, guard, now)
            .await
            .map(|(report, _)| report)
    }

    async fn live_collect(
        &self,
        key: SeriesKey,
        frequency: FrequencyClass,
        value_type: Option<ValueType>,
        guard: KeyGuard,
        now: DateTime<Utc>,
    ) -> Result<(JobReport, Vec<Observation>), StorageError> {
        let mut report = JobReport::new(key.clone(), JobKind::Live);
        let range = self.live_range(&key, frequency, now)?;

        let appended = match range {
            Some(r) if r.start >= r.end => {
                debug!(series = %key, "Current slot already filled");
                Vec::new()
            }
            _ => match self.pipeline.collect(&key, range, value_type).await {
                Ok(result) => result.appended,
                Err(PipelineError::Job(failure)) => {
                    warn!(series = %key, error = %failure, "Job failed for this cycle");
                    report.failure = Some(failure);
                    Vec::new()
                }
                Err(PipelineError::Storage(e)) => {
                    error!(series = %key, error = %e, "Append failed, stopping");
                    return Err(e);
                }
            },
        };

        self.plan_after_live(&key, frequency, now)?;
        report.appended = appended.len();
        report.signals = self.evaluate(&appended);
        drop(guard);

        self.deliver(&report.signals).await;
        Ok((report, appended))
    }

    /// Re-scans one series, leaving unresolved slots for the next full pass.
    fn plan_after_live(
        &self,
        key: &SeriesKey,
        frequency: FrequencyClass,
        now: DateTime<Utc>,
    ) -> Result<(), StorageError> {
        let scan = self
            .detector
            .scan(self.store().as_ref(), key, frequency, now)?;
        let parked = self.unresolved().for_key(key);
        let gaps = exclude_unresolved(frequency, scan.gaps, &parked);
        if !gaps.is_empty() {
            debug!(series = %key, gaps = gaps.len(), "Backfill planned");
        }
        self.planner.lock().replace(key, gaps);
        Ok(())
    }

    async fn backfill_job(
        self: Arc<Self>,
        key: SeriesKey,
        frequency: FrequencyClass,
        value_type: Option<ValueType>,
        gaps: Vec<BackfillGap>,
        guard: KeyGuard,
        now: DateTime<Utc>,
    ) -> JobResult {
        let mut report = JobReport::new(key.clone(), JobKind::Backfill);
        let outcome = match self
            .backfill
            .execute_all(&key, frequency, value_type, &gaps, now)
            .await
        {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(series = %key, error = %e, "Backfill storage failure, stopping");
                self.planner.lock().requeue(gaps);
                return Err(e);
            }
        };

        report.appended = outcome.appended.len();
        report.backfill = outcome.report;
        report.signals = self.evaluate(&outcome.appended);
        drop(guard);

        self.deliver(&report.signals).await;
        Ok(report)
    }

    /// Runs newly appended observations through the engine and saves its state.
    fn evaluate(&self, appended: &[Observation]) -> Vec<SignalEvent> {
        if appended.is_empty() {
            return Vec::new();
        }
        let mut engine = self.engine.lock();
        let events = engine.process(appended);
        if let Err(e) = engine.save() {
            error!(error = %e, "Failed to persist signal state");
        }
        events
    }

    async fn deliver(&self, events: &[SignalEvent]) {
        for event in events {
            for sink in &self.sinks {
                if let Err(e) = sink.deliver(event).await {
                    warn!(
                        sink = sink.name(),
                        signal = %event.signal_type,
                        chokepoint = %event.chokepoint,
                        error = %e,
                        "Signal delivery failed"
                    );
                }
            }
        }
    }

    /// Runs the tick loop until `Shutdown` arrives or the command channel
    /// closes, then waits for running jobs.
    ///
    /// # Errors
    /// Returns `DispatchError` on a storage failure or a panicked job.
    pub async fn run(
        self: Arc<Self>,
        mut commands: mpsc::Receiver<DispatcherCommand>,
    ) -> Result<(), DispatchError> {
        let mut ticker = tokio::time::interval(self.tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut full_scan = tokio::time::interval(self.full_scan_interval);
        full_scan.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut jobs: JoinSet<JobResult> = JoinSet::new();
        let mut totals = TickReport::default();

        info!(
            series = self.registry.len(),
            tick_secs = self.tick.as_secs(),
            full_scan_secs = self.full_scan_interval.as_secs(),
            "Dispatcher started"
        );

        loop {
            tokio::select! {
                _ = full_scan.tick() => {
                    self.plan_full_pass(Utc::now())?;
                }
                _ = ticker.tick() => {
                    let now = Utc::now();
                    let keys = self.due_keys(now);
                    let started = self.start_tick(keys, now, &mut jobs);
                    if started.due > 0 || started.skipped_busy > 0 {
                        info!(
                            due = started.due,
                            started = started.started,
                            skipped_busy = started.skipped_busy,
                            "Tick"
                        );
                    }
                    totals.due += started.due;
                    totals.started += started.started;
                    totals.skipped_busy += started.skipped_busy;
                    totals.backfill.skipped_busy += started.backfill.skipped_busy;
                }
                Some(joined) = jobs.join_next(), if !jobs.is_empty() => {
                    let job = joined.map_err(|e| DispatchError::Task(e.to_string()))??;
                    debug!(
                        series = %job.key,
                        kind = ?job.kind,
                        appended = job.appended,
                        signals = job.signals.len(),
                        "Job finished"
                    );
                    totals.record(&job);
                }
                command = commands.recv() => match command {
                    Some(DispatcherCommand::RunNow) => {
                        let now = Utc::now();
                        let keys = self.all_keys();
                        let started = self.start_tick(keys, now, &mut jobs);
                        info!(
                            started = started.started,
                            skipped_busy = started.skipped_busy,
                            "Manual run"
                        );
                    }
                    Some(DispatcherCommand::FullBackfill) => {
                        self.plan_full_pass(Utc::now())?;
                    }
                    Some(DispatcherCommand::Shutdown) | None => {
                        info!(running = jobs.len(), "Dispatcher shutting down");
                        break;
                    }
                },
            }
        }

        drain(&mut jobs, &mut totals).await?;
        if let Err(e) = self.engine.lock().save() {
            error!(error = %e, "Failed to persist signal state on shutdown");
        }
        info!(
            succeeded = totals.succeeded,
            failed = totals.failed,
            appended = totals.appended,
            signals = totals.signals,
            backfilled = totals.backfill.filled,
            "Dispatcher stopped"
        );
        Ok(())
    }
}

/// Waits for every job in `jobs`, folding results into `report`.
async fn drain(
    jobs: &mut JoinSet<JobResult>,
    report: &mut TickReport,
) -> Result<(), DispatchError> {
    while let Some(joined) = jobs.join_next().await {
        let job = joined.map_err(|e| DispatchError::Task(e.to_string()))??;
        report.record(&job);
    }
    Ok(())
}

fn tick_span(tick: Duration) -> chrono::Duration {
    chrono::Duration::from_std(tick).unwrap_or_else(|_| chrono::Duration::minutes(1))
}

/// Removes slots covered by unresolved records, splitting gaps around them.
fn exclude_unresolved(
    frequency: FrequencyClass,
    gaps: Vec<BackfillGap>,
    unresolved: &[UnresolvedGap],
) -> Vec<BackfillGap> {
    if unresolved.is_empty() {
        return gaps;
    }
    let mut kept = Vec::new();
    for gap in gaps {
        let mut run: Option<BackfillGap> = None;
        let mut slot = gap.start;
        while slot <= gap.end {
            let parked = unresolved.iter().any(|u| slot >= u.start && slot <= u.end);
            if parked {
                kept.extend(run.take());
            } else {
                match run.as_mut() {
                    Some(r) => {
                        r.end = slot;
                        r.slots += 1;
                    }
                    None => {
                        run = Some(BackfillGap {
                            key: gap.key.clone(),
                            start: slot,
                            end: slot,
                            slots: 1,
                        });
                    }
                }
            }
            slot = frequency.next_slot(slot);
        }
        kept.extend(run);
    }
    kept
}
