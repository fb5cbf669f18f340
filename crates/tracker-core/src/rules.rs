//! Time-based transition rules and the pure evaluator that picks one.
//!
//! A `TransitionRule` says "an order that has sat in `from` for at least
//! `min_elapsed` moves to `to`". A `RuleSet` is validated on construction so
//! the evaluator never has to cope with ambiguous or backward rules.

use crate::error::{Result, TrackerError};
use crate::order::Order;
use crate::types::OrderStatus;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::time::Duration;

// ---------------------------------------------------------------------------
// TransitionRule
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransitionRule {
    pub from: OrderStatus,
    pub to: OrderStatus,
    #[serde(
        rename = "after_secs",
        serialize_with = "serialize_secs",
        deserialize_with = "deserialize_secs"
    )]
    pub min_elapsed: Duration,
}

impl TransitionRule {
    pub fn new(from: OrderStatus, min_elapsed: Duration, to: OrderStatus) -> Self {
        Self {
            from,
            to,
            min_elapsed,
        }
    }

    /// Checks that a timer rule only moves an order forward along the chain.
    pub fn validate(&self) -> Result<()> {
        if self.from.is_terminal() {
            return Err(TrackerError::InvalidRule(format!(
                "rule {self} starts from terminal status '{}'",
                self.from
            )));
        }
        if self.to == OrderStatus::Cancelled {
            return Err(TrackerError::InvalidRule(format!(
                "rule {self}: only a user can cancel an order"
            )));
        }
        if !moves_forward(self.from, self.to) {
            return Err(TrackerError::InvalidRule(format!(
                "rule {self} does not move forward"
            )));
        }
        if self.min_elapsed.is_zero() {
            return Err(TrackerError::InvalidRule(format!(
                "rule {self} needs a positive threshold"
            )));
        }
        if chrono::Duration::from_std(self.min_elapsed).is_err() {
            return Err(TrackerError::InvalidRule(format!(
                "rule {self} has an out-of-range threshold"
            )));
        }
        Ok(())
    }

    /// Threshold as a signed chrono duration, saturating for absurd values.
    pub fn min_elapsed_signed(&self) -> chrono::Duration {
        chrono::Duration::from_std(self.min_elapsed).unwrap_or(chrono::Duration::MAX)
    }
}

impl std::fmt::Display for TransitionRule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} -> {} after {}s",
            self.from,
            self.to,
            self.min_elapsed.as_secs()
        )
    }
}

fn moves_forward(from: OrderStatus, to: OrderStatus) -> bool {
    match (from.rank(), to.rank()) {
        (Some(a), Some(b)) => b > a,
        _ => false,
    }
}

// ---------------------------------------------------------------------------
// RuleSet
// ---------------------------------------------------------------------------

/// A validated, deterministic collection of transition rules.
///
/// Several rules may share a `from` status as long as their thresholds differ;
/// `evaluate` then prefers the longest satisfied threshold. Two rules with the
/// same `from` and the same threshold are rejected.
#[derive(Debug, Clone, PartialEq)]
pub struct RuleSet {
    rules: Vec<TransitionRule>,
}

impl RuleSet {
    pub fn new(rules: Vec<TransitionRule>) -> Result<Self> {
        for (i, rule) in rules.iter().enumerate() {
            rule.validate()?;
            if let Some(dup) = rules[..i]
                .iter()
                .find(|r| r.from == rule.from && r.min_elapsed == rule.min_elapsed)
            {
                return Err(TrackerError::InvalidRule(format!(
                    "rules '{dup}' and '{rule}' share a threshold; the outcome would be ambiguous"
                )));
            }
        }
        Ok(Self { rules })
    }

    /// Pending orders start work after five minutes.
    pub fn default_rules() -> Self {
        Self {
            rules: vec![TransitionRule::new(
                OrderStatus::Pending,
                Duration::from_secs(5 * 60),
                OrderStatus::InProgress,
            )],
        }
    }

    pub fn rules(&self) -> &[TransitionRule] {
        &self.rules
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn for_status(&self, status: OrderStatus) -> impl Iterator<Item = &TransitionRule> {
        self.rules.iter().filter(move |r| r.from == status)
    }

    /// Distinct statuses that have at least one rule, in chain order.
    pub fn source_statuses(&self) -> Vec<OrderStatus> {
        let mut statuses: Vec<OrderStatus> = self.rules.iter().map(|r| r.from).collect();
        statuses.sort();
        statuses.dedup();
        statuses
    }

    /// The smallest threshold for `status`: anything younger cannot match.
    pub fn shortest_threshold(&self, status: OrderStatus) -> Option<&TransitionRule> {
        self.for_status(status).min_by_key(|r| r.min_elapsed)
    }
}

// ---------------------------------------------------------------------------
// Evaluator
// ---------------------------------------------------------------------------

/// Pick the rule that applies to `order` at `now`, if any.
///
/// Elapsed time is measured from `state_entered_at`; a timestamp in the future
/// (clock skew between writers) counts as zero elapsed. When more than one rule
/// is satisfied the one with the longest `min_elapsed` wins, so an order that
/// sat unnoticed for a long time jumps straight to the furthest state it has
/// earned.
pub fn evaluate<'a>(
    order: &Order,
    now: DateTime<Utc>,
    rules: &'a RuleSet,
) -> Option<&'a TransitionRule> {
    let elapsed = (now - order.state_entered_at)
        .to_std()
        .unwrap_or(Duration::ZERO);
    rules
        .for_status(order.status)
        .filter(|r| elapsed >= r.min_elapsed)
        .max_by_key(|r| r.min_elapsed)
}

/// Whether a user may move an order from `from` to `to` directly.
///
/// Manual overrides skip elapsed-time checks but still respect the state
/// machine: terminal states are final and the chain never runs backward.
pub fn check_manual(from: OrderStatus, to: OrderStatus) -> Result<()> {
    let reason = if from.is_terminal() {
        Some(format!("'{from}' is a terminal status"))
    } else if from == to {
        Some("order is already in that status".to_string())
    } else if to != OrderStatus::Cancelled && !moves_forward(from, to) {
        Some("status changes cannot move backward".to_string())
    } else {
        None
    };
    match reason {
        Some(reason) => Err(TrackerError::InvalidTransition {
            from: from.to_string(),
            to: to.to_string(),
            reason,
        }),
        None => Ok(()),
    }
}

// ---------------------------------------------------------------------------
// Serde helpers for Duration (serialized as seconds: u64)
// ---------------------------------------------------------------------------

fn serialize_secs<S>(d: &Duration, s: S) -> std::result::Result<S::Ok, S::Error>
where
    S: Serializer,
{
    s.serialize_u64(d.as_secs())
}

fn deserialize_secs<'de, D>(d: D) -> std::result::Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    let secs = u64::deserialize(d)?;
    Ok(Duration::from_secs(secs))
}
