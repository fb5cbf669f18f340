//! Persists one status change with an optimistic version check.

use chrono::{DateTime, Utc};

use crate::error::ApplyError;
use crate::notify::{Notifier, TransitionEvent};
use crate::order::Order;
use crate::rules::TransitionRule;
use crate::store::{OrderStore, SaveOutcome};
use crate::types::Actor;

pub struct Applier<'a> {
    store: &'a dyn OrderStore,
    notifier: &'a dyn Notifier,
}

impl<'a> Applier<'a> {
    pub fn new(store: &'a dyn OrderStore, notifier: &'a dyn Notifier) -> Self {
        Self { store, notifier }
    }

    /// Move `order` along `rule` as of `now`.
    ///
    /// `order` is the copy the caller selected; the write only lands if the
    /// stored version still equals `order.version`. Each call is its own store
    /// transaction, so a failure here never touches other orders. On success
    /// exactly one history entry is appended and one event is published.
    pub fn apply(
        &self,
        order: &Order,
        rule: &TransitionRule,
        now: DateTime<Utc>,
        actor: Actor,
        notes: Option<String>,
    ) -> Result<Order, ApplyError> {
        let next = order.advanced(rule.to, now, actor.clone(), notes);

        let outcome = self
            .store
            .save_if_version(&next, order.version)
            .map_err(|e| ApplyError::PersistenceFailure {
                id: order.id,
                reason: e.to_string(),
            })?;

        match outcome {
            SaveOutcome::Saved => {
                self.notifier
                    .notify(&TransitionEvent::for_order(&next, order.status, actor));
                Ok(next)
            }
            SaveOutcome::Conflict { found } => Err(ApplyError::Conflict {
                id: order.id,
                expected: order.version,
                found,
            }),
            SaveOutcome::Missing => Err(ApplyError::NotFound(order.id)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use crate::types::OrderStatus;
    use chrono::TimeZone;
    use std::sync::{Arc, Barrier, Mutex};
    use std::time::Duration;

    #[derive(Default, Clone)]
    struct Recorder(Arc<Mutex<Vec<TransitionEvent>>>);

    impl Notifier for Recorder {
        fn notify(&self, event: &TransitionEvent) {
            self.0.lock().unwrap().push(event.clone());
        }
    }

    fn t(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    fn rule() -> TransitionRule {
        TransitionRule::new(
            OrderStatus::Pending,
            Duration::from_secs(300),
            OrderStatus::InProgress,
        )
    }

    #[test]
    fn apply_persists_and_notifies_once() {
        let store = MemoryStore::new();
        let recorder = Recorder::default();
        let order = Order::new("ord", t(0));
        store.insert(&order).unwrap();

        let applier = Applier::new(&store, &recorder);
        let next = applier
            .apply(&order, &rule(), t(360), Actor::AutoProgress, None)
            .unwrap();

        assert_eq!(next.status, OrderStatus::InProgress);
        assert_eq!(next.state_entered_at, t(360));
        let stored = store.get(order.id).unwrap().unwrap();
        assert_eq!(stored.version, 2);
        assert_eq!(stored.status_history.len(), 1);

        let events = recorder.0.lock().unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].old_status, OrderStatus::Pending);
        assert_eq!(events[0].new_status, OrderStatus::InProgress);
    }

    #[test]
    fn stale_copy_conflicts_without_notifying() {
        let store = MemoryStore::new();
        let recorder = Recorder::default();
        let order = Order::new("ord", t(0));
        store.insert(&order).unwrap();
        let applier = Applier::new(&store, &recorder);

        applier
            .apply(&order, &rule(), t(360), Actor::AutoProgress, None)
            .unwrap();
        let err = applier
            .apply(&order, &rule(), t(361), Actor::AutoProgress, None)
            .unwrap_err();

        assert!(matches!(
            err,
            ApplyError::Conflict {
                expected: 1,
                found: 2,
                ..
            }
        ));
        assert_eq!(recorder.0.lock().unwrap().len(), 1);
        assert_eq!(store.get(order.id).unwrap().unwrap().status_history.len(), 1);
    }

    #[test]
    fn vanished_order_is_not_found() {
        let store = MemoryStore::new();
        let recorder = Recorder::default();
        let order = Order::new("ghost", t(0));
        let err = Applier::new(&store, &recorder)
            .apply(&order, &rule(), t(360), Actor::AutoProgress, None)
            .unwrap_err();
        assert!(matches!(err, ApplyError::NotFound(id) if id == order.id));
    }

    #[test]
    fn racing_appliers_mutate_exactly_once() {
        let store = Arc::new(MemoryStore::new());
        let recorder = Recorder::default();
        let order = Order::new("raced", t(0));
        store.insert(&order).unwrap();

        let barrier = Arc::new(Barrier::new(2));
        let results: Vec<Result<Order, ApplyError>> = std::thread::scope(|s| {
            let handles: Vec<_> = (0..2)
                .map(|_| {
                    let store = Arc::clone(&store);
                    let recorder = recorder.clone();
                    let barrier = Arc::clone(&barrier);
                    let order = order.clone();
                    s.spawn(move || {
                        barrier.wait();
                        Applier::new(store.as_ref(), &recorder).apply(
                            &order,
                            &rule(),
                            t(360),
                            Actor::AutoProgress,
                            None,
                        )
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        assert!(results
            .iter()
            .any(|r| matches!(r, Err(ApplyError::Conflict { .. }))));
        assert_eq!(store.get(order.id).unwrap().unwrap().status_history.len(), 1);
        assert_eq!(recorder.0.lock().unwrap().len(), 1);
    }
}
