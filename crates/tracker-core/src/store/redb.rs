//! Persistent order storage using redb.
//!
//! # Table design
//!
//! `ORDERS` uses a 25-byte composite key:
//! ```text
//! [ status tag: u8 | state_entered_at_ms: u64 big-endian (8 bytes) | uuid: 16 bytes ]
//! ```
//!
//! Because the status tag leads and the timestamp follows in big-endian
//! encoding, byte ordering groups rows by status and orders them by entry time
//! within a status. A candidate scan is a single range
//! `[tag | 0..] ..= [tag | cutoff_ms | ff..]`; orders in other statuses
//! (terminal ones included) are never read.
//!
//! `ORDER_KEYS` maps `uuid → composite key` so lookups and updates by id do
//! not need a full scan. `ORDER_REFS` maps `reference → uuid` and is what
//! makes references unique. All tables are updated in the same write
//! transaction.

use std::ops::Bound;
use std::path::Path;

use chrono::{DateTime, Utc};
use redb::{Database, ReadableTable, TableDefinition};
use uuid::Uuid;

use crate::error::{Result, TrackerError};
use crate::order::Order;
use crate::types::OrderStatus;

use super::{CandidatePage, CandidateQuery, Cursor, OrderFilter, OrderStore, SaveOutcome};

// ---------------------------------------------------------------------------
// Table definitions
// ---------------------------------------------------------------------------

/// Key: 25-byte composite (status tag ++ entered_at_ms big-endian ++ uuid bytes)
/// Value: JSON-encoded Order
const ORDERS: TableDefinition<&[u8], &[u8]> = TableDefinition::new("orders");

/// Key: uuid bytes. Value: the order's current composite key.
const ORDER_KEYS: TableDefinition<&[u8], &[u8]> = TableDefinition::new("order_keys");

/// Key: order reference. Value: uuid bytes. References never change.
const ORDER_REFS: TableDefinition<&str, &[u8]> = TableDefinition::new("order_refs");

const KEY_LEN: usize = 25;

// ---------------------------------------------------------------------------
// Key helpers
// ---------------------------------------------------------------------------

fn order_key(status: OrderStatus, entered_at: DateTime<Utc>, id: Uuid) -> [u8; KEY_LEN] {
    let mut key = [0u8; KEY_LEN];
    key[0] = status.tag();
    let ms = entered_at.timestamp_millis().max(0) as u64;
    key[1..9].copy_from_slice(&ms.to_be_bytes());
    key[9..].copy_from_slice(id.as_bytes());
    key
}

fn key_of(order: &Order) -> [u8; KEY_LEN] {
    order_key(order.status, order.state_entered_at, order.id)
}

/// Smallest possible key for `status`.
fn status_lower_bound(status: OrderStatus) -> [u8; KEY_LEN] {
    let mut key = [0u8; KEY_LEN];
    key[0] = status.tag();
    key
}

/// Largest key for `status` entered at or before `cutoff`.
///
/// The UUID suffix is `0xff` × 16, which is greater than any valid UUID, so
/// every order with `entered_at_ms <= cutoff_ms` is included.
fn cutoff_upper_bound(status: OrderStatus, cutoff: DateTime<Utc>) -> [u8; KEY_LEN] {
    let mut key = [0u8; KEY_LEN];
    key[0] = status.tag();
    let ms = cutoff.timestamp_millis().max(0) as u64;
    key[1..9].copy_from_slice(&ms.to_be_bytes());
    key[9..].fill(0xff);
    key
}

fn db_err(e: impl std::fmt::Display) -> TrackerError {
    TrackerError::Store(e.to_string())
}

// ---------------------------------------------------------------------------
// RedbStore
// ---------------------------------------------------------------------------

/// Embedded on-disk order store.
///
/// redb serializes write transactions, so `save_if_version` is a true
/// compare-and-swap for every thread sharing this handle. The database file is
/// locked to one process at a time.
pub struct RedbStore {
    db: Database,
}

impl RedbStore {
    /// Open or create the database at `path`, creating both tables.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let db = Database::create(path).map_err(db_err)?;
        let wt = db.begin_write().map_err(db_err)?;
        wt.open_table(ORDERS).map_err(db_err)?;
        wt.open_table(ORDER_KEYS).map_err(db_err)?;
        wt.open_table(ORDER_REFS).map_err(db_err)?;
        wt.commit().map_err(db_err)?;
        Ok(Self { db })
    }
}

impl OrderStore for RedbStore {
    fn insert(&self, order: &Order) -> Result<()> {
        let key = key_of(order);
        let value = serde_json::to_vec(order)?;
        let wt = self.db.begin_write().map_err(db_err)?;
        {
            let mut index = wt.open_table(ORDER_KEYS).map_err(db_err)?;
            let exists = index
                .get(order.id.as_bytes().as_slice())
                .map_err(db_err)?
                .is_some();
            if exists {
                return Err(TrackerError::OrderExists(order.id.to_string()));
            }
            let mut refs = wt.open_table(ORDER_REFS).map_err(db_err)?;
            let taken = refs
                .get(order.reference.as_str())
                .map_err(db_err)?
                .is_some();
            if taken {
                return Err(TrackerError::OrderExists(order.reference.clone()));
            }
            refs.insert(order.reference.as_str(), order.id.as_bytes().as_slice())
                .map_err(db_err)?;
            let mut table = wt.open_table(ORDERS).map_err(db_err)?;
            table
                .insert(key.as_slice(), value.as_slice())
                .map_err(db_err)?;
            index
                .insert(order.id.as_bytes().as_slice(), key.as_slice())
                .map_err(db_err)?;
        }
        wt.commit().map_err(db_err)?;
        Ok(())
    }

    fn get_by_reference(&self, reference: &str) -> Result<Option<Order>> {
        let id = {
            let rt = self.db.begin_read().map_err(db_err)?;
            let refs = rt.open_table(ORDER_REFS).map_err(db_err)?;
            let Some(bytes) = refs
                .get(reference)
                .map_err(db_err)?
                .map(|g| g.value().to_vec())
            else {
                return Ok(None);
            };
            Uuid::from_slice(&bytes).map_err(db_err)?
        };
        self.get(id)
    }

    fn get(&self, id: Uuid) -> Result<Option<Order>> {
        let rt = self.db.begin_read().map_err(db_err)?;
        let index = rt.open_table(ORDER_KEYS).map_err(db_err)?;
        let Some(key) = index
            .get(id.as_bytes().as_slice())
            .map_err(db_err)?
            .map(|g| g.value().to_vec())
        else {
            return Ok(None);
        };
        let table = rt.open_table(ORDERS).map_err(db_err)?;
        let order = match table.get(key.as_slice()).map_err(db_err)? {
            Some(v) => Some(serde_json::from_slice(v.value())?),
            None => None,
        };
        Ok(order)
    }

    fn list(&self, filter: &OrderFilter) -> Result<Vec<Order>> {
        let rt = self.db.begin_read().map_err(db_err)?;
        let table = rt.open_table(ORDERS).map_err(db_err)?;

        let mut result = Vec::new();
        for entry in table.iter().map_err(db_err)? {
            let (_, v) = entry.map_err(db_err)?;
            let order: Order = serde_json::from_slice(v.value())?;
            if filter.matches(&order) {
                result.push(order);
            }
        }
        result.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(result)
    }

    fn candidates(&self, query: &CandidateQuery) -> Result<CandidatePage> {
        let upper = cutoff_upper_bound(query.status, query.cutoff);
        let start = match query.after {
            Some(c) => order_key(query.status, c.entered_at, c.id),
            None => status_lower_bound(query.status),
        };
        if start > upper {
            return Ok(CandidatePage::default());
        }
        let lower = match query.after {
            Some(_) => Bound::Excluded(start.as_slice()),
            None => Bound::Included(start.as_slice()),
        };

        let rt = self.db.begin_read().map_err(db_err)?;
        let table = rt.open_table(ORDERS).map_err(db_err)?;

        let mut page = CandidatePage::default();
        for entry in table
            .range::<&[u8]>((lower, Bound::Included(upper.as_slice())))
            .map_err(db_err)?
        {
            let (_, v) = entry.map_err(db_err)?;
            let order: Order = serde_json::from_slice(v.value())?;
            // Keys carry millisecond precision; trim the sub-millisecond overshoot.
            if order.status != query.status || order.state_entered_at > query.cutoff {
                continue;
            }
            page.orders.push(order);
            if page.orders.len() >= query.limit {
                page.next = page.orders.last().map(Cursor::of);
                break;
            }
        }
        Ok(page)
    }

    fn save_if_version(&self, order: &Order, expected_version: u64) -> Result<SaveOutcome> {
        let new_key = key_of(order);
        let value = serde_json::to_vec(order)?;
        let wt = self.db.begin_write().map_err(db_err)?;
        let outcome = {
            let mut index = wt.open_table(ORDER_KEYS).map_err(db_err)?;
            let mut table = wt.open_table(ORDERS).map_err(db_err)?;

            let old_key = index
                .get(order.id.as_bytes().as_slice())
                .map_err(db_err)?
                .map(|g| g.value().to_vec());
            let stored: Option<Order> = match &old_key {
                Some(k) => match table.get(k.as_slice()).map_err(db_err)? {
                    Some(v) => Some(serde_json::from_slice(v.value())?),
                    None => None,
                },
                None => None,
            };

            match (old_key, stored) {
                (Some(old_key), Some(stored)) if stored.version == expected_version => {
                    // Remove the old entry and reinsert under the new status/time key
                    table.remove(old_key.as_slice()).map_err(db_err)?;
                    table
                        .insert(new_key.as_slice(), value.as_slice())
                        .map_err(db_err)?;
                    index
                        .insert(order.id.as_bytes().as_slice(), new_key.as_slice())
                        .map_err(db_err)?;
                    SaveOutcome::Saved
                }
                (Some(_), Some(stored)) => SaveOutcome::Conflict {
                    found: stored.version,
                },
                _ => SaveOutcome::Missing,
            }
        };

        if outcome == SaveOutcome::Saved {
            wt.commit().map_err(db_err)?;
        } else {
            wt.abort().map_err(db_err)?;
        }
        Ok(outcome)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
