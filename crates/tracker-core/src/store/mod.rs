//! Persistence contract for orders.
//!
//! Stores are transactional per order: every write touches exactly one record,
//! and `save_if_version` is a compare-and-swap on `Order::version`. The engine
//! never assumes it is the only writer.

pub mod memory;
pub mod redb;

pub use self::memory::MemoryStore;
pub use self::redb::RedbStore;

use crate::error::Result;
use crate::order::Order;
use crate::types::OrderStatus;
use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Resume point for a candidate scan: the `(state_entered_at, id)` of the last
/// row already seen. Scans are ordered by this pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Cursor {
    pub entered_at: DateTime<Utc>,
    pub id: Uuid,
}

impl Cursor {
    pub fn of(order: &Order) -> Self {
        Self {
            entered_at: order.state_entered_at,
            id: order.id,
        }
    }
}

/// Orders in `status` that entered it at or before `cutoff`, after `after`.
#[derive(Debug, Clone)]
pub struct CandidateQuery {
    pub status: OrderStatus,
    pub cutoff: DateTime<Utc>,
    pub after: Option<Cursor>,
    pub limit: usize,
}

#[derive(Debug, Clone, Default)]
pub struct CandidatePage {
    pub orders: Vec<Order>,
    /// `Some` when the scan stopped at `limit` and more rows may follow.
    pub next: Option<Cursor>,
}

/// Presentation-side listing filter.
#[derive(Debug, Clone, Default)]
pub struct OrderFilter {
    pub status: Option<OrderStatus>,
    pub text: Option<String>,
}

impl OrderFilter {
    pub fn matches(&self, order: &Order) -> bool {
        if self.status.is_some_and(|s| s != order.status) {
            return false;
        }
        match self.text.as_deref().map(str::trim) {
            Some(text) if !text.is_empty() => order.matches_text(text),
            _ => true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveOutcome {
    Saved,
    /// The stored record has a different version; nothing was written.
    Conflict { found: u64 },
    /// No record with that id exists.
    Missing,
}

pub trait OrderStore: Send + Sync {
    /// Insert a new order. Fails with `OrderExists` if the id or the
    /// reference is taken; the check and the write are one atomic step.
    fn insert(&self, order: &Order) -> Result<()>;

    fn get(&self, id: Uuid) -> Result<Option<Order>>;

    fn get_by_reference(&self, reference: &str) -> Result<Option<Order>>;

    /// All orders matching `filter`, newest first.
    fn list(&self, filter: &OrderFilter) -> Result<Vec<Order>>;

    /// One page of a candidate scan, ordered by `(state_entered_at, id)`.
    fn candidates(&self, query: &CandidateQuery) -> Result<CandidatePage>;

    /// Replace the stored order with `order` if the stored version is still
    /// `expected_version`.
    fn save_if_version(&self, order: &Order, expected_version: u64) -> Result<SaveOutcome>;
}
