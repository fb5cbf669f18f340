//! The auto-progression engine: select → evaluate → apply, plus the manual
//! override path the admin surfaces use.
//!
//! A cycle is idempotent. Orders advanced in a cycle get `state_entered_at =
//! now`, and every rule threshold is positive, so a second cycle at the same
//! instant finds nothing to do. Concurrent cycles (other threads, other
//! processes) are safe because every write is a version compare-and-swap.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::applier::Applier;
use crate::clock::{Clock, SystemClock};
use crate::config::AutoProgressConfig;
use crate::error::{ApplyError, CycleError, Result, TrackerError};
use crate::notify::{LogNotifier, Notifier};
use crate::order::{validate_reference, Order, StatusChange};
use crate::rules::{check_manual, evaluate, RuleSet, TransitionRule};
use crate::selector::select_candidates;
use crate::store::{OrderFilter, OrderStore};
use crate::types::{Actor, OrderStatus};

pub const DEFAULT_PAGE_SIZE: usize = 100;

// ---------------------------------------------------------------------------
// Reports and requests
// ---------------------------------------------------------------------------

/// Outcome counters for one cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CycleReport {
    pub at: Option<DateTime<Utc>>,
    pub scanned: u64,
    pub advanced: u64,
    pub unchanged: u64,
    pub conflicts: u64,
    pub failed: u64,
}

#[derive(Debug, Clone)]
pub struct NewOrder {
    pub reference: String,
    pub student: Option<String>,
    pub opportunity: Option<String>,
}

/// A user-initiated status change.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ManualTransition {
    pub actor: String,
    #[serde(default)]
    pub notes: Option<String>,
    /// When set, the change is refused unless the order is still at this version.
    #[serde(default)]
    pub expected_version: Option<u64>,
}

impl ManualTransition {
    pub fn by(actor: impl Into<String>) -> Self {
        Self {
            actor: actor.into(),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BulkSkip {
    pub id: Uuid,
    pub reason: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BulkReport {
    pub updated: Vec<Uuid>,
    pub skipped: Vec<BulkSkip>,
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

pub struct Engine {
    store: Arc<dyn OrderStore>,
    clock: Arc<dyn Clock>,
    notifier: Arc<dyn Notifier>,
    rules: RuleSet,
    page_size: usize,
}

impl Engine {
    /// Engine on the system clock that logs transitions.
    pub fn new(store: Arc<dyn OrderStore>, rules: RuleSet) -> Self {
        Self {
            store,
            clock: Arc::new(SystemClock),
            notifier: Arc::new(LogNotifier),
            rules,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }

    pub fn from_config(store: Arc<dyn OrderStore>, config: &AutoProgressConfig) -> Result<Self> {
        let rules = RuleSet::new(config.rules.clone())?;
        Ok(Self::new(store, rules).with_page_size(config.page_size))
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub fn rules(&self) -> &RuleSet {
        &self.rules
    }

    pub fn store(&self) -> &dyn OrderStore {
        self.store.as_ref()
    }

    fn applier(&self) -> Applier<'_> {
        Applier::new(self.store.as_ref(), self.notifier.as_ref())
    }

    // -----------------------------------------------------------------------
    // Cycle
    // -----------------------------------------------------------------------

    pub fn run_cycle(&self) -> std::result::Result<CycleReport, CycleError> {
        self.run_cycle_at(self.now())
    }

    /// Run one full cycle as of `now`.
    ///
    /// Only a failing candidate query aborts the cycle. Per-order failures
    /// are logged, counted and skipped; those orders are picked up again by
    /// the next cycle.
    pub fn run_cycle_at(&self, now: DateTime<Utc>) -> std::result::Result<CycleReport, CycleError> {
        let mut report = CycleReport {
            at: Some(now),
            ..CycleReport::default()
        };
        let applier = self.applier();

        for status in self.rules.source_statuses() {
            let Some(shortest) = self.rules.shortest_threshold(status) else {
                continue;
            };
            let cutoff = now
                .checked_sub_signed(shortest.min_elapsed_signed())
                .unwrap_or(DateTime::<Utc>::MIN_UTC);

            let candidates = select_candidates(self.store.as_ref(), status, cutoff, self.page_size);
            for candidate in candidates {
                let order = candidate.map_err(CycleError::Query)?;
                report.scanned += 1;

                let Some(rule) = evaluate(&order, now, &self.rules) else {
                    report.unchanged += 1;
                    continue;
                };

                match applier.apply(&order, rule, now, Actor::AutoProgress, None) {
                    Ok(_) => report.advanced += 1,
                    Err(e @ (ApplyError::Conflict { .. } | ApplyError::NotFound(_))) => {
                        tracing::warn!(order = %order.reference, "skipping order: {e}");
                        report.conflicts += 1;
                    }
                    Err(e @ ApplyError::PersistenceFailure { .. }) => {
                        tracing::warn!(order = %order.reference, "will retry next cycle: {e}");
                        report.failed += 1;
                    }
                }
            }
        }

        if report.advanced > 0 || report.failed > 0 || report.conflicts > 0 {
            tracing::info!(
                scanned = report.scanned,
                advanced = report.advanced,
                conflicts = report.conflicts,
                failed = report.failed,
                "auto-progress cycle finished"
            );
        } else {
            tracing::debug!(scanned = report.scanned, "auto-progress cycle found nothing to do");
        }
        Ok(report)
    }

    // -----------------------------------------------------------------------
    // Presentation contract
    // -----------------------------------------------------------------------

    /// Create a pending order. The store claims the reference atomically, so
    /// concurrent creates of one reference yield exactly one order.
    pub fn create_order(&self, new: NewOrder) -> Result<Order> {
        validate_reference(&new.reference)?;
        let order = Order::new(new.reference, self.now())
            .with_student(new.student)
            .with_opportunity(new.opportunity);
        self.store.insert(&order)?;
        Ok(order)
    }

    /// Look an order up by UUID or by reference.
    pub fn find(&self, key: &str) -> Result<Order> {
        let found = match Uuid::parse_str(key) {
            Ok(id) => self.store.get(id)?,
            Err(_) => self.store.get_by_reference(key)?,
        };
        found.ok_or_else(|| TrackerError::OrderNotFound(key.to_string()))
    }

    pub fn list(&self, filter: &OrderFilter) -> Result<Vec<Order>> {
        self.store.list(filter)
    }

    pub fn history(&self, key: &str) -> Result<Vec<StatusChange>> {
        Ok(self.find(key)?.status_history)
    }

    /// Move an order to `to` on a user's behalf.
    ///
    /// Skips the elapsed-time checks but goes through the same versioned
    /// write as the timer, so a concurrent cycle and a user cannot both win.
    pub fn transition(
        &self,
        id: Uuid,
        to: OrderStatus,
        request: ManualTransition,
    ) -> Result<Order> {
        let order = self
            .store
            .get(id)?
            .ok_or_else(|| TrackerError::OrderNotFound(id.to_string()))?;

        if let Some(expected) = request.expected_version {
            if expected != order.version {
                return Err(ApplyError::Conflict {
                    id,
                    expected,
                    found: order.version,
                }
                .into());
            }
        }
        check_manual(order.status, to)?;

        let rule = TransitionRule::new(order.status, Duration::ZERO, to);
        let next = self.applier().apply(
            &order,
            &rule,
            self.now(),
            Actor::user(request.actor),
            request.notes,
        )?;
        Ok(next)
    }

    pub fn cancel(&self, id: Uuid, request: ManualTransition) -> Result<Order> {
        self.transition(id, OrderStatus::Cancelled, request)
    }

    /// Apply the same manual change to many orders, each independently.
    pub fn bulk_transition(
        &self,
        ids: &[Uuid],
        to: OrderStatus,
        request: &ManualTransition,
    ) -> BulkReport {
        let mut report = BulkReport::default();
        for &id in ids {
            let single = ManualTransition {
                expected_version: None,
                ..request.clone()
            };
            match self.transition(id, to, single) {
                Ok(_) => report.updated.push(id),
                Err(e) => {
                    tracing::warn!(%id, "bulk transition skipped order: {e}");
                    report.skipped.push(BulkSkip {
                        id,
                        reason: e.to_string(),
                    });
                }
            }
        }
        report
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::notify::TransitionEvent;
    use crate::store::{CandidatePage, CandidateQuery, MemoryStore, SaveOutcome};
    use chrono::{Duration as CDur, TimeZone};
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder(Mutex<Vec<TransitionEvent>>);

    impl Notifier for Recorder {
        fn notify(&self, event: &TransitionEvent) {
            self.0.lock().unwrap().push(event.clone());
        }
    }

    /// Wraps a MemoryStore; can fail saves for chosen references or every query.
    #[derive(Default)]
    struct FlakyStore {
        inner: MemoryStore,
        fail_saves_for: Mutex<Vec<String>>,
        fail_queries: bool,
    }

    impl OrderStore for FlakyStore {
        fn insert(&self, order: &Order) -> Result<()> {
            self.inner.insert(order)
        }
        fn get(&self, id: Uuid) -> Result<Option<Order>> {
            self.inner.get(id)
        }
        fn get_by_reference(&self, reference: &str) -> Result<Option<Order>> {
            self.inner.get_by_reference(reference)
        }
        fn list(&self, filter: &OrderFilter) -> Result<Vec<Order>> {
            self.inner.list(filter)
        }
        fn candidates(&self, query: &CandidateQuery) -> Result<CandidatePage> {
            if self.fail_queries {
                return Err(TrackerError::Store("store unreachable".into()));
            }
            self.inner.candidates(query)
        }
        fn save_if_version(&self, order: &Order, expected: u64) -> Result<SaveOutcome> {
            if self.fail_saves_for.lock().unwrap().contains(&order.reference) {
                return Err(TrackerError::Store("disk full".into()));
            }
            self.inner.save_if_version(order, expected)
        }
    }

    const T0: i64 = 1_700_000_000;

    fn t0() -> DateTime<Utc> {
        Utc.timestamp_opt(T0, 0).unwrap()
    }

    struct Fixture {
        store: Arc<FlakyStore>,
        clock: Arc<ManualClock>,
        recorder: Arc<Recorder>,
        engine: Engine,
    }

    fn fixture_with(store: FlakyStore, rules: RuleSet) -> Fixture {
        let store = Arc::new(store);
        let clock = Arc::new(ManualClock::new(t0()));
        let recorder = Arc::new(Recorder::default());
        let engine = Engine::new(store.clone(), rules)
            .with_clock(clock.clone())
            .with_notifier(recorder.clone())
            .with_page_size(2);
        Fixture {
            store,
            clock,
            recorder,
            engine,
        }
    }

    fn fixture() -> Fixture {
        fixture_with(FlakyStore::default(), RuleSet::default_rules())
    }

    fn create(f: &Fixture, reference: &str) -> Order {
        f.engine
            .create_order(NewOrder {
                reference: reference.to_string(),
                student: None,
                opportunity: None,
            })
            .unwrap()
    }

    fn reload(f: &Fixture, order: &Order) -> Order {
        f.store.get(order.id).unwrap().unwrap()
    }

    #[test]
    fn pending_order_advances_after_threshold() {
        let f = fixture();
        let order = create(&f, "ord-1");

        f.clock.advance(CDur::minutes(4));
        let report = f.engine.run_cycle().unwrap();
        assert_eq!(report.advanced, 0);
        assert_eq!(reload(&f, &order).status, OrderStatus::Pending);

        f.clock.advance(CDur::minutes(2));
        let report = f.engine.run_cycle().unwrap();
        assert_eq!(report.advanced, 1);

        let stored = reload(&f, &order);
        assert_eq!(stored.status, OrderStatus::InProgress);
        assert_eq!(stored.state_entered_at, t0() + CDur::minutes(6));
        assert_eq!(stored.status_history.len(), 1);
        assert_eq!(stored.status_history[0].changed_by, Actor::AutoProgress);
    }

    #[test]
    fn young_orders_are_left_alone() {
        let f = fixture();
        let order = create(&f, "ord-1");
        f.clock.advance(CDur::seconds(299));

        let report = f.engine.run_cycle().unwrap();
        assert_eq!(
            report,
            CycleReport {
                at: Some(t0() + CDur::seconds(299)),
                ..CycleReport::default()
            }
        );
        let stored = reload(&f, &order);
        assert_eq!(stored.version, 1);
        assert!(stored.status_history.is_empty());
    }

    #[test]
    fn back_to_back_cycles_are_idempotent() {
        let f = fixture();
        for i in 0..5 {
            create(&f, &format!("ord-{i}"));
        }
        f.clock.advance(CDur::minutes(10));

        let first = f.engine.run_cycle().unwrap();
        assert_eq!(first.advanced, 5);
        let second = f.engine.run_cycle().unwrap();
        assert_eq!(second.advanced, 0);
        assert_eq!(second.scanned, 0);
        assert_eq!(f.recorder.0.lock().unwrap().len(), 5);
    }

    #[test]
    fn terminal_orders_are_never_selected() {
        let f = fixture();
        let order = create(&f, "ord-1");
        f.engine
            .transition(order.id, OrderStatus::Completed, ManualTransition::by("ops"))
            .unwrap();

        f.clock.advance(CDur::days(365));
        let report = f.engine.run_cycle().unwrap();
        assert_eq!(report.scanned, 0);
        assert_eq!(reload(&f, &order).status, OrderStatus::Completed);
    }

    #[test]
    fn longest_satisfied_rule_wins_inside_a_cycle() {
        let rule = |from, secs, to| TransitionRule::new(from, Duration::from_secs(secs), to);
        let rules = RuleSet::new(vec![
            rule(OrderStatus::Pending, 300, OrderStatus::InProgress),
            rule(OrderStatus::Pending, 3600, OrderStatus::Completed),
            rule(OrderStatus::InProgress, 600, OrderStatus::Completed),
        ])
        .unwrap();
        let f = fixture_with(FlakyStore::default(), rules);
        let stale = create(&f, "stale");
        f.clock.advance(CDur::minutes(55));
        let fresh = create(&f, "fresh");
        f.clock.advance(CDur::minutes(6));

        let report = f.engine.run_cycle().unwrap();
        assert_eq!(report.advanced, 2);
        // Advanced orders do not cascade within the same cycle
        assert_eq!(reload(&f, &stale).status, OrderStatus::Completed);
        assert_eq!(reload(&f, &fresh).status, OrderStatus::InProgress);

        f.clock.advance(CDur::minutes(10));
        f.engine.run_cycle().unwrap();
        assert_eq!(reload(&f, &fresh).status, OrderStatus::Completed);
    }

    #[test]
    fn failed_save_is_isolated_and_retried_next_cycle() {
        let store = FlakyStore {
            fail_saves_for: Mutex::new(vec!["ord-2".into()]),
            ..FlakyStore::default()
        };
        let f = fixture_with(store, RuleSet::default_rules());
        let orders: Vec<Order> = (0..5).map(|i| create(&f, &format!("ord-{i}"))).collect();
        f.clock.advance(CDur::minutes(6));

        let report = f.engine.run_cycle().unwrap();
        assert_eq!(report.scanned, 5);
        assert_eq!(report.advanced, 4);
        assert_eq!(report.failed, 1);
        for o in &orders {
            let expected = if o.reference == "ord-2" {
                OrderStatus::Pending
            } else {
                OrderStatus::InProgress
            };
            assert_eq!(reload(&f, o).status, expected, "{}", o.reference);
        }

        // Storage recovers; the next cycle picks the order up again
        f.store.fail_saves_for.lock().unwrap().clear();
        f.clock.advance(CDur::seconds(30));
        let retry = f.engine.run_cycle().unwrap();
        assert_eq!(retry.advanced, 1);
        assert_eq!(retry.failed, 0);

        let recovered = reload(&f, &orders[2]);
        assert_eq!(recovered.reference, "ord-2");
        assert_eq!(recovered.status, OrderStatus::InProgress);
        assert_eq!(recovered.status_history.len(), 1);
        assert_eq!(recovered.version, 2);
    }

    #[test]
    fn query_failure_aborts_the_cycle() {
        let store = FlakyStore {
            fail_queries: true,
            ..FlakyStore::default()
        };
        let f = fixture_with(store, RuleSet::default_rules());
        create(&f, "ord-1");
        f.clock.advance(CDur::minutes(6));

        let err = f.engine.run_cycle().unwrap_err();
        assert!(matches!(err, CycleError::Query(_)));
    }

    #[test]
    fn racing_cycles_apply_each_transition_once() {
        let f = fixture();
        let orders: Vec<Order> = (0..6).map(|i| create(&f, &format!("ord-{i}"))).collect();
        f.clock.advance(CDur::minutes(6));
        let now = f.clock.now();

        let reports: Vec<CycleReport> = std::thread::scope(|s| {
            let a = s.spawn(|| f.engine.run_cycle_at(now).unwrap());
            let b = s.spawn(|| f.engine.run_cycle_at(now).unwrap());
            vec![a.join().unwrap(), b.join().unwrap()]
        });

        let advanced: u64 = reports.iter().map(|r| r.advanced).sum();
        assert_eq!(advanced, 6);
        for o in &orders {
            assert_eq!(reload(&f, o).status_history.len(), 1);
        }
        assert_eq!(f.recorder.0.lock().unwrap().len(), 6);
    }

    #[test]
    fn manual_transition_records_actor_and_notes() {
        let f = fixture();
        let order = create(&f, "ord-1");
        let request = ManualTransition {
            actor: "registrar".into(),
            notes: Some("placement confirmed".into()),
            expected_version: Some(1),
        };
        let next = f
            .engine
            .transition(order.id, OrderStatus::InProgress, request)
            .unwrap();

        assert_eq!(next.state_entered_at, t0());
        let entry = &next.status_history[0];
        assert_eq!(entry.changed_by, Actor::user("registrar"));
        assert_eq!(entry.notes.as_deref(), Some("placement confirmed"));
    }

    #[test]
    fn manual_transition_with_stale_version_conflicts() {
        let f = fixture();
        let order = create(&f, "ord-1");
        f.clock.advance(CDur::minutes(6));
        f.engine.run_cycle().unwrap();

        let request = ManualTransition {
            expected_version: Some(1),
            ..ManualTransition::by("ops")
        };
        let err = f
            .engine
            .cancel(order.id, request)
            .unwrap_err();
        assert!(matches!(err, TrackerError::Apply(ApplyError::Conflict { .. })));
        assert_eq!(reload(&f, &order).status, OrderStatus::InProgress);
    }

    #[test]
    fn manual_transition_respects_state_machine() {
        let f = fixture();
        let order = create(&f, "ord-1");
        f.engine
            .cancel(order.id, ManualTransition::by("ops"))
            .unwrap();
        let err = f
            .engine
            .transition(order.id, OrderStatus::InProgress, ManualTransition::by("ops"))
            .unwrap_err();
        assert!(matches!(err, TrackerError::InvalidTransition { .. }));
    }

    #[test]
    fn bulk_transition_isolates_ineligible_orders() {
        let f = fixture();
        let a = create(&f, "a");
        let b = create(&f, "b");
        let c = create(&f, "c");
        f.engine
            .transition(b.id, OrderStatus::Completed, ManualTransition::by("ops"))
            .unwrap();
        let ghost = Uuid::new_v4();

        let report = f.engine.bulk_transition(
            &[a.id, b.id, c.id, ghost],
            OrderStatus::InProgress,
            &ManualTransition::by("ops"),
        );
        assert_eq!(report.updated, vec![a.id, c.id]);
        assert_eq!(report.skipped.len(), 2);
        assert!(report.skipped.iter().any(|s| s.id == ghost));
    }

    #[test]
    fn create_and_find_by_reference_or_id() {
        let f = fixture();
        let order = create(&f, "ord-42");
        assert_eq!(f.engine.find("ord-42").unwrap().id, order.id);
        assert_eq!(f.engine.find(&order.id.to_string()).unwrap().reference, "ord-42");
        assert!(matches!(
            f.engine.find("nope"),
            Err(TrackerError::OrderNotFound(_))
        ));
    }

    #[test]
    fn concurrent_creates_of_one_reference_store_one_order() {
        let f = fixture();
        let barrier = std::sync::Barrier::new(4);

        let results: Vec<Result<Order>> = std::thread::scope(|s| {
            let handles: Vec<_> = (0..4)
                .map(|_| {
                    s.spawn(|| {
                        barrier.wait();
                        f.engine.create_order(NewOrder {
                            reference: "ord-1".into(),
                            student: None,
                            opportunity: None,
                        })
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        let created: Vec<&Order> = results.iter().filter_map(|r| r.as_ref().ok()).collect();
        assert_eq!(created.len(), 1);
        assert!(results
            .iter()
            .filter_map(|r| r.as_ref().err())
            .all(|e| matches!(e, TrackerError::OrderExists(_))));
        assert_eq!(f.store.list(&OrderFilter::default()).unwrap().len(), 1);
        assert_eq!(f.engine.find("ord-1").unwrap().id, created[0].id);
    }

    #[test]
    fn duplicate_or_invalid_reference_is_rejected() {
        let f = fixture();
        create(&f, "ord-1");
        let dup = f.engine.create_order(NewOrder {
            reference: "ord-1".into(),
            student: None,
            opportunity: None,
        });
        assert!(matches!(dup, Err(TrackerError::OrderExists(_))));

        let bad = f.engine.create_order(NewOrder {
            reference: "not valid".into(),
            student: None,
            opportunity: None,
        });
        assert!(matches!(bad, Err(TrackerError::InvalidReference(_))));
    }

    #[test]
    fn history_reads_through_reference() {
        let f = fixture();
        let order = create(&f, "ord-1");
        assert!(f.engine.history("ord-1").unwrap().is_empty());
        f.engine
            .transition(order.id, OrderStatus::InProgress, ManualTransition::by("ops"))
            .unwrap();
        f.engine
            .transition(order.id, OrderStatus::Completed, ManualTransition::by("ops"))
            .unwrap();
        let history = f.engine.history("ord-1").unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[1].new_status, OrderStatus::Completed);
    }
}
