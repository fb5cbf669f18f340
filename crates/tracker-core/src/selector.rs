//! Lazy, paginated candidate scan.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::order::Order;
use crate::store::{CandidateQuery, Cursor, OrderStore};
use crate::types::OrderStatus;

/// Iterator over orders in `status` entered at or before `cutoff`.
///
/// Holds at most one page in memory. The scan is finite because the cursor
/// only moves forward through a bounded key range; `restart` rewinds it to the
/// beginning. A store error is yielded once and ends the iteration.
pub struct Candidates<'a> {
    store: &'a dyn OrderStore,
    status: OrderStatus,
    cutoff: DateTime<Utc>,
    page_size: usize,
    cursor: Option<Cursor>,
    buffer: VecDeque<Order>,
    done: bool,
}

pub fn select_candidates<'a>(
    store: &'a dyn OrderStore,
    status: OrderStatus,
    cutoff: DateTime<Utc>,
    page_size: usize,
) -> Candidates<'a> {
    Candidates {
        store,
        status,
        cutoff,
        page_size: page_size.max(1),
        cursor: None,
        buffer: VecDeque::new(),
        done: false,
    }
}

impl Candidates<'_> {
    pub fn restart(&mut self) {
        self.cursor = None;
        self.buffer.clear();
        self.done = false;
    }

    fn fetch_page(&mut self) -> Result<()> {
        let page = self.store.candidates(&CandidateQuery {
            status: self.status,
            cutoff: self.cutoff,
            after: self.cursor,
            limit: self.page_size,
        })?;
        match page.next {
            Some(next) if !page.orders.is_empty() => self.cursor = Some(next),
            _ => self.done = true,
        }
        self.buffer.extend(page.orders);
        Ok(())
    }
}

impl Iterator for Candidates<'_> {
    type Item = Result<Order>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(order) = self.buffer.pop_front() {
                return Some(Ok(order));
            }
            if self.done {
                return None;
            }
            if let Err(e) = self.fetch_page() {
                self.done = true;
                return Some(Err(e));
            }
        }
    }
}
