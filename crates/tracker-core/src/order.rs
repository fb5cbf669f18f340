use crate::error::{Result, TrackerError};
use crate::types::{Actor, OrderStatus};
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// StatusChange
// ---------------------------------------------------------------------------

/// One entry in an order's status history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusChange {
    pub old_status: OrderStatus,
    pub new_status: OrderStatus,
    pub changed_by: Actor,
    pub changed_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

// ---------------------------------------------------------------------------
// Order
// ---------------------------------------------------------------------------

/// A tracked placement order.
///
/// `version` starts at 1 and is bumped by every persisted status change; stores
/// refuse a save whose expected version no longer matches.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub id: Uuid,
    pub reference: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub student: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub opportunity: Option<String>,
    pub status: OrderStatus,
    pub created_at: DateTime<Utc>,
    pub state_entered_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub version: u64,
    #[serde(default)]
    pub status_history: Vec<StatusChange>,
}

impl Order {
    /// A fresh `Pending` order entering its state at `now`.
    pub fn new(reference: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            reference: reference.into(),
            student: None,
            opportunity: None,
            status: OrderStatus::Pending,
            created_at: now,
            state_entered_at: now,
            updated_at: now,
            version: 1,
            status_history: Vec::new(),
        }
    }

    pub fn with_student(mut self, student: Option<String>) -> Self {
        self.student = student;
        self
    }

    pub fn with_opportunity(mut self, opportunity: Option<String>) -> Self {
        self.opportunity = opportunity;
        self
    }

    /// Copy of `self` moved to `to`, with the state clock reset and one history
    /// entry appended. Does not persist.
    pub fn advanced(
        &self,
        to: OrderStatus,
        now: DateTime<Utc>,
        actor: Actor,
        notes: Option<String>,
    ) -> Order {
        let mut next = self.clone();
        next.status_history.push(StatusChange {
            old_status: self.status,
            new_status: to,
            changed_by: actor,
            changed_at: now,
            notes,
        });
        next.status = to;
        next.state_entered_at = now;
        next.updated_at = now;
        next.version = self.version + 1;
        next
    }

    /// Case-insensitive substring match over the human-facing labels.
    pub fn matches_text(&self, needle: &str) -> bool {
        let needle = needle.to_lowercase();
        std::iter::once(self.reference.as_str())
            .chain(self.student.as_deref())
            .chain(self.opportunity.as_deref())
            .any(|field| field.to_lowercase().contains(&needle))
    }
}

// ---------------------------------------------------------------------------
// Reference validation
// ---------------------------------------------------------------------------

static REFERENCE_RE: OnceLock<Regex> = OnceLock::new();

fn reference_re() -> &'static Regex {
    REFERENCE_RE.get_or_init(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9._\-]*$").unwrap())
}

pub fn validate_reference(reference: &str) -> Result<()> {
    if reference.is_empty() || reference.len() > 64 || !reference_re().is_match(reference) {
        return Err(TrackerError::InvalidReference(reference.to_string()));
    }
    Ok(())
}
