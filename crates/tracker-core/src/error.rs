use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum TrackerError {
    #[error("not initialized: run 'tracker init'")]
    NotInitialized,

    #[error("order not found: {0}")]
    OrderNotFound(String),

    #[error("order already exists: {0}")]
    OrderExists(String),

    #[error("invalid reference '{0}': must be 1-64 characters of letters, digits, '.', '_' or '-'")]
    InvalidReference(String),

    #[error("invalid status: {0}")]
    InvalidStatus(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("invalid transition from {from} to {to}: {reason}")]
    InvalidTransition {
        from: String,
        to: String,
        reason: String,
    },

    #[error("invalid transition rule: {0}")]
    InvalidRule(String),

    #[error("order store error: {0}")]
    Store(String),

    #[error(transparent)]
    Apply(#[from] ApplyError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, TrackerError>;

/// Failure to persist a single status change.
///
/// Always scoped to one order; the engine logs it and moves on to the next
/// candidate.
#[derive(Debug, Error)]
pub enum ApplyError {
    #[error("order {id} changed concurrently (expected version {expected}, found {found})")]
    Conflict { id: Uuid, expected: u64, found: u64 },

    #[error("order {0} no longer exists")]
    NotFound(Uuid),

    #[error("failed to persist order {id}: {reason}")]
    PersistenceFailure { id: Uuid, reason: String },
}

/// Failure that aborts a whole check cycle.
#[derive(Debug, Error)]
pub enum CycleError {
    #[error("candidate query failed: {0}")]
    Query(#[source] TrackerError),

    /// The task running the cycle died (panic or runtime shutdown).
    #[error("cycle did not complete: {0}")]
    Interrupted(String),
}
