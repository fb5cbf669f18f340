//! Background auto-progress worker.
//!
//! One tokio task per process owns the `CheckCycleState` and runs cycles one
//! at a time on the blocking pool. Two things wake it: its own interval timer
//! and `nudge()` calls from the request path. Nudging is a cheap debounce
//! check and never waits for a cycle, so request latency is unaffected.
//! Explicit `run_now()` calls share the same cycle lock, so at most one cycle
//! runs in a process at any time.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{watch, Mutex, Notify, OwnedMutexGuard};
use tokio::time::MissedTickBehavior;
use tracker_core::config::AutoProgressConfig;
use tracker_core::engine::{CycleReport, Engine};
use tracker_core::trigger::CheckCycleState;
use tracker_core::CycleError;

#[derive(Debug, Clone, Serialize)]
pub struct WorkerStatus {
    pub enabled: bool,
    pub check_interval_secs: u64,
    pub last_check: Option<DateTime<Utc>>,
    pub due: bool,
}

struct WorkerInner {
    engine: Arc<Engine>,
    cycle: CheckCycleState,
    enabled: bool,
    wake: Notify,
    stop: watch::Sender<bool>,
    running: Arc<Mutex<()>>,
}

impl WorkerInner {
    /// Run a cycle unconditionally, waiting for any cycle in flight first.
    async fn run_cycle(&self) -> Result<CycleReport, CycleError> {
        let guard = Arc::clone(&self.running).lock_owned().await;
        self.run_cycle_locked(guard).await
    }

    /// Run a cycle only if one is still due once the lock is held, so a
    /// wake-up queued behind a manual run does not repeat its work.
    async fn run_if_due(&self) -> Option<Result<CycleReport, CycleError>> {
        let guard = Arc::clone(&self.running).lock_owned().await;
        if !self.cycle.is_due(self.engine.now()) {
            return None;
        }
        Some(self.run_cycle_locked(guard).await)
    }

    /// The guard travels into the blocking task, so a caller that stops
    /// awaiting cannot release the lock while the cycle is still running.
    async fn run_cycle_locked(
        &self,
        guard: OwnedMutexGuard<()>,
    ) -> Result<CycleReport, CycleError> {
        let engine = Arc::clone(&self.engine);
        let started = engine.now();
        let joined =
            tokio::task::spawn_blocking(move || (engine.run_cycle_at(started), guard)).await;
        match joined {
            Ok((Ok(report), _guard)) => {
                self.cycle.record_success(started);
                Ok(report)
            }
            Ok((Err(e), _guard)) => {
                tracing::error!("auto-progress cycle aborted, retrying next interval: {e}");
                Err(e)
            }
            Err(e) => {
                tracing::error!("auto-progress cycle task failed: {e}");
                Err(CycleError::Interrupted(e.to_string()))
            }
        }
    }
}

/// Cloneable handle to the worker task.
#[derive(Clone)]
pub struct WorkerHandle {
    inner: Arc<WorkerInner>,
}

impl WorkerHandle {
    /// Create the handle and, when enabled and inside a Tokio runtime, spawn
    /// the loop. The loop's first tick fires immediately, so a fresh process
    /// always runs one cycle at startup.
    pub fn spawn(engine: Arc<Engine>, config: &AutoProgressConfig) -> Self {
        let (stop, stop_rx) = watch::channel(false);
        let interval = config.check_interval().max(Duration::from_secs(1));
        let inner = Arc::new(WorkerInner {
            engine,
            cycle: CheckCycleState::new(interval),
            enabled: config.enabled,
            wake: Notify::new(),
            stop,
            running: Arc::new(Mutex::new(())),
        });

        if inner.enabled && tokio::runtime::Handle::try_current().is_ok() {
            tokio::spawn(run_loop(Arc::clone(&inner), stop_rx));
        }

        Self { inner }
    }

    /// Request-path trigger: wake the worker if a cycle is due.
    ///
    /// Returns whether the worker was woken. Safe to call from any number of
    /// requests at once; the worker re-checks before running.
    pub fn nudge(&self) -> bool {
        if !self.inner.enabled {
            return false;
        }
        let due = self.inner.cycle.is_due(self.inner.engine.now());
        if due {
            self.inner.wake.notify_one();
        }
        due
    }

    /// Run a cycle right now, ignoring the debounce.
    pub async fn run_now(&self) -> Result<CycleReport, CycleError> {
        self.inner.run_cycle().await
    }

    pub fn status(&self) -> WorkerStatus {
        let cycle = &self.inner.cycle;
        WorkerStatus {
            enabled: self.inner.enabled,
            check_interval_secs: cycle.interval().as_secs(),
            last_check: cycle.last_check(),
            due: cycle.is_due(self.inner.engine.now()),
        }
    }

    /// Ask the loop to exit after its current cycle.
    pub fn stop(&self) {
        let _ = self.inner.stop.send(true);
    }
}

async fn run_loop(inner: Arc<WorkerInner>, mut stop: watch::Receiver<bool>) {
    let mut ticker = tokio::time::interval(inner.cycle.interval());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    tracing::info!(
        interval_secs = inner.cycle.interval().as_secs(),
        "auto-progress worker started"
    );

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = inner.wake.notified() => {}
            changed = stop.changed() => {
                if changed.is_err() || *stop.borrow() {
                    break;
                }
                continue;
            }
        }

        // Errors are already logged; the next due tick retries.
        let _ = inner.run_if_due().await;
    }

    tracing::info!("auto-progress worker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration as CDur, TimeZone};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tracker_core::clock::{Clock, ManualClock};
    use tracker_core::engine::NewOrder;
    use tracker_core::order::Order;
    use tracker_core::rules::RuleSet;
    use tracker_core::store::{
        CandidatePage, CandidateQuery, MemoryStore, OrderFilter, OrderStore, SaveOutcome,
    };
    use uuid::Uuid;

    /// MemoryStore whose candidate scans are slow and count how many run at once.
    #[derive(Default)]
    struct SlowScanStore {
        inner: MemoryStore,
        active: AtomicUsize,
        max_active: AtomicUsize,
    }

    impl OrderStore for SlowScanStore {
        fn insert(&self, order: &Order) -> tracker_core::Result<()> {
            self.inner.insert(order)
        }
        fn get(&self, id: Uuid) -> tracker_core::Result<Option<Order>> {
            self.inner.get(id)
        }
        fn get_by_reference(&self, reference: &str) -> tracker_core::Result<Option<Order>> {
            self.inner.get_by_reference(reference)
        }
        fn list(&self, filter: &OrderFilter) -> tracker_core::Result<Vec<Order>> {
            self.inner.list(filter)
        }
        fn candidates(&self, query: &CandidateQuery) -> tracker_core::Result<CandidatePage> {
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_active.fetch_max(now, Ordering::SeqCst);
            std::thread::sleep(std::time::Duration::from_millis(100));
            let page = self.inner.candidates(query);
            self.active.fetch_sub(1, Ordering::SeqCst);
            page
        }
        fn save_if_version(
            &self,
            order: &Order,
            expected: u64,
        ) -> tracker_core::Result<SaveOutcome> {
            self.inner.save_if_version(order, expected)
        }
    }

    fn engine_at(clock: Arc<ManualClock>) -> Arc<Engine> {
        Arc::new(
            Engine::new(Arc::new(MemoryStore::new()), RuleSet::default_rules()).with_clock(clock),
        )
    }

    fn disabled() -> AutoProgressConfig {
        AutoProgressConfig {
            enabled: false,
            ..AutoProgressConfig::default()
        }
    }

    #[tokio::test]
    async fn run_now_records_last_check() {
        let clock = Arc::new(ManualClock::new(Utc.timestamp_opt(1_700_000_000, 0).unwrap()));
        let engine = engine_at(clock.clone());
        engine
            .create_order(NewOrder {
                reference: "ord-1".into(),
                student: None,
                opportunity: None,
            })
            .unwrap();
        clock.advance(CDur::minutes(6));

        let worker = WorkerHandle::spawn(engine.clone(), &disabled());
        assert!(worker.status().last_check.is_none());

        let report = worker.run_now().await.unwrap();
        assert_eq!(report.advanced, 1);
        assert_eq!(worker.status().last_check, Some(clock.now()));
        assert!(!worker.status().due);
    }

    #[tokio::test]
    async fn disabled_worker_ignores_nudges() {
        let clock = Arc::new(ManualClock::new(Utc.timestamp_opt(0, 0).unwrap()));
        let worker = WorkerHandle::spawn(engine_at(clock), &disabled());
        assert!(!worker.nudge());
        assert!(worker.status().due);
    }

    #[tokio::test]
    async fn nudge_reports_due_only_when_interval_elapsed() {
        let clock = Arc::new(ManualClock::new(Utc.timestamp_opt(0, 0).unwrap()));
        let engine = engine_at(clock.clone());
        let config = AutoProgressConfig::default();
        let worker = WorkerHandle::spawn(engine, &config);
        worker.stop();

        worker.run_now().await.unwrap();
        assert!(!worker.nudge());
        clock.advance(CDur::seconds(61));
        assert!(worker.nudge());
    }

    #[tokio::test]
    async fn overlapping_manual_runs_execute_one_at_a_time() {
        let clock = Arc::new(ManualClock::new(Utc.timestamp_opt(1_700_000_000, 0).unwrap()));
        let store = Arc::new(SlowScanStore::default());
        let engine = Arc::new(
            Engine::new(store.clone(), RuleSet::default_rules()).with_clock(clock.clone()),
        );
        engine
            .create_order(NewOrder {
                reference: "ord-1".into(),
                student: None,
                opportunity: None,
            })
            .unwrap();
        clock.advance(CDur::minutes(6));
        let worker = WorkerHandle::spawn(engine, &disabled());

        let (a, b) = tokio::join!(worker.run_now(), worker.run_now());
        let (a, b) = (a.unwrap(), b.unwrap());

        assert_eq!(store.max_active.load(Ordering::SeqCst), 1);
        assert_eq!(a.advanced + b.advanced, 1);
        assert_eq!(a.conflicts + b.conflicts, 0);
    }
}
