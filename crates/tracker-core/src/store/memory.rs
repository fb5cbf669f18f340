use std::collections::HashMap;
use std::sync::RwLock;

use uuid::Uuid;

use crate::error::{Result, TrackerError};
use crate::order::Order;

use super::{CandidatePage, CandidateQuery, Cursor, OrderFilter, OrderStore, SaveOutcome};

/// Process-local store. Suitable for tests and for embedding the engine where
/// orders already live elsewhere in memory.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

/// Orders plus the reference index, kept under one lock so uniqueness is
/// checked and claimed atomically.
#[derive(Debug, Default)]
struct Tables {
    orders: HashMap<Uuid, Order>,
    references: HashMap<String, Uuid>,
}

fn poisoned<T>(_: T) -> TrackerError {
    TrackerError::Store("memory store lock poisoned".to_string())
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl OrderStore for MemoryStore {
    fn insert(&self, order: &Order) -> Result<()> {
        let mut tables = self.tables.write().map_err(poisoned)?;
        if tables.orders.contains_key(&order.id) {
            return Err(TrackerError::OrderExists(order.id.to_string()));
        }
        if tables.references.contains_key(&order.reference) {
            return Err(TrackerError::OrderExists(order.reference.clone()));
        }
        tables.references.insert(order.reference.clone(), order.id);
        tables.orders.insert(order.id, order.clone());
        Ok(())
    }

    fn get(&self, id: Uuid) -> Result<Option<Order>> {
        let tables = self.tables.read().map_err(poisoned)?;
        Ok(tables.orders.get(&id).cloned())
    }

    fn get_by_reference(&self, reference: &str) -> Result<Option<Order>> {
        let tables = self.tables.read().map_err(poisoned)?;
        Ok(tables
            .references
            .get(reference)
            .and_then(|id| tables.orders.get(id))
            .cloned())
    }

    fn list(&self, filter: &OrderFilter) -> Result<Vec<Order>> {
        let tables = self.tables.read().map_err(poisoned)?;
        let mut result: Vec<Order> = tables
            .orders
            .values().filter(|o| filter.matches(o)).cloned().collect();
        result.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(result)
    }

    fn candidates(&self, query: &CandidateQuery) -> Result<CandidatePage> {
        let tables = self.tables.read().map_err(poisoned)?;
        let mut matching: Vec<&Order> = tables
            .orders
            .values()
            .filter(|o| o.status == query.status && o.state_entered_at <= query.cutoff)
            .filter(|o| match query.after {
                Some(after) => Cursor::of(o) > after,
                None => true,
            })
            .collect();
        matching.sort_by_key(|o| Cursor::of(o));

        let more = matching.len() > query.limit;
        matching.truncate(query.limit);
        let next = if more { matching.last().map(|o| Cursor::of(o)) } else { None };

        Ok(CandidatePage {
            orders: matching.into_iter().cloned().collect(),
            next,
        })
    }

    fn save_if_version(&self, order: &Order, expected_version: u64) -> Result<SaveOutcome> {
        let mut tables = self.tables.write().map_err(poisoned)?;
        let Some(stored) = tables.orders.get_mut(&order.id) else {
            return Ok(SaveOutcome::Missing);
        };
        if stored.version != expected_version {
            return Ok(SaveOutcome::Conflict {
                found: stored.version,
            });
        }
        *stored = order.clone();
        Ok(SaveOutcome::Saved)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Actor, OrderStatus};
    use chrono::{DateTime, TimeZone, Utc};

    fn t(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    fn query(cutoff: i64, after: Option<Cursor>, limit: usize) -> CandidateQuery {
        CandidateQuery {
            status: OrderStatus::Pending,
            cutoff: t(cutoff),
            after,
            limit,
        }
    }

    #[test]
    fn candidates_respect_cutoff_and_status() {
        let store = MemoryStore::new();
        let old = Order::new("old", t(0));
        let young = Order::new("young", t(500));
        let mut done = Order::new("done", t(0));
        done.status = OrderStatus::Completed;
        for o in [&old, &young, &done] {
            store.insert(o).unwrap();
        }

        let page = store.candidates(&query(100, None, 10)).unwrap();
        assert_eq!(page.orders.len(), 1);
        assert_eq!(page.orders[0].reference, "old");
        assert!(page.next.is_none());
    }

    #[test]
    fn candidates_paginate_in_entry_order() {
        let store = MemoryStore::new();
        for i in 0..5 {
            store.insert(&Order::new(format!("o{i}"), t(i))).unwrap();
        }

        let first = store.candidates(&query(100, None, 2)).unwrap();
        assert_eq!(first.orders.len(), 2);
        assert_eq!(first.orders[0].reference, "o0");
        let second = store.candidates(&query(100, first.next, 2)).unwrap();
        assert_eq!(second.orders[0].reference, "o2");
        let third = store.candidates(&query(100, second.next, 2)).unwrap();
        assert_eq!(third.orders.len(), 1);
        assert!(third.next.is_none());
    }

    #[test]
    fn save_if_version_detects_conflict() {
        let store = MemoryStore::new();
        let order = Order::new("ord", t(0));
        store.insert(&order).unwrap();

        let next = order.advanced(OrderStatus::InProgress, t(400), Actor::AutoProgress, None);
        assert_eq!(store.save_if_version(&next, 1).unwrap(), SaveOutcome::Saved);
        assert_eq!(
            store.save_if_version(&next, 1).unwrap(),
            SaveOutcome::Conflict { found: 2 }
        );
    }

    #[test]
    fn save_missing_and_duplicate_insert() {
        let store = MemoryStore::new();
        let order = Order::new("ord", t(0));
        assert_eq!(store.save_if_version(&order, 1).unwrap(), SaveOutcome::Missing);
        store.insert(&order).unwrap();
        assert!(store.insert(&order).is_err());
    }

    #[test]
    fn reference_is_unique_and_indexed() {
        let store = MemoryStore::new();
        let first = Order::new("ord-1", t(0));
        store.insert(&first).unwrap();

        let dup = Order::new("ord-1", t(5));
        assert!(matches!(
            store.insert(&dup),
            Err(TrackerError::OrderExists(r)) if r == "ord-1"
        ));
        assert_eq!(store.get_by_reference("ord-1").unwrap().unwrap().id, first.id);
        assert!(store.get_by_reference("ord-2").unwrap().is_none());
    }
}
