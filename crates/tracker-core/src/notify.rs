//! Fire-and-forget notification of status changes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::order::Order;
use crate::types::{Actor, OrderStatus};

/// Published once per persisted status change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransitionEvent {
    pub order_id: Uuid,
    pub reference: String,
    pub old_status: OrderStatus,
    pub new_status: OrderStatus,
    pub changed_by: Actor,
    pub at: DateTime<Utc>,
}

impl TransitionEvent {
    /// Build the event for `order` having just left `old_status`.
    pub fn for_order(order: &Order, old_status: OrderStatus, changed_by: Actor) -> Self {
        Self {
            order_id: order.id,
            reference: order.reference.clone(),
            old_status,
            new_status: order.status,
            changed_by,
            at: order.state_entered_at,
        }
    }
}

/// Receives transition events. Delivery is best effort: implementations must
/// not block and must not fail the transition that produced the event.
pub trait Notifier: Send + Sync {
    fn notify(&self, event: &TransitionEvent);
}

/// Writes each event to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, event: &TransitionEvent) {
        tracing::info!(
            order = %event.reference,
            from = %event.old_status,
            to = %event.new_status,
            by = %event.changed_by,
            "order status changed"
        );
    }
}

/// Forwards every event to each wrapped notifier in turn.
#[derive(Default)]
pub struct FanoutNotifier {
    sinks: Vec<Box<dyn Notifier>>,
}

impl FanoutNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, sink: impl Notifier + 'static) -> Self {
        self.sinks.push(Box::new(sink));
        self
    }
}

impl Notifier for FanoutNotifier {
    fn notify(&self, event: &TransitionEvent) {
        for sink in &self.sinks {
            sink.notify(event);
        }
    }
}
