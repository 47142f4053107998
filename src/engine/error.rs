use ulid::Ulid;

use crate::model::DateRange;
use crate::store::StoreError;

#[derive(Debug)]
pub enum EngineError {
    NotFound { kind: &'static str, id: Ulid },
    /// The person is already booked over a conflicting window. `what` names
    /// the conflicting plan (or "a trial visit").
    OverlapConflict { what: String, range: DateRange },
    CapacityExceeded { current: u32, normal: u32, total: u32 },
    InvalidTransition(String),
    /// Lock contention — safe to retry.
    Busy(&'static str),
    LimitExceeded(&'static str),
    Store(String),
}

impl EngineError {
    pub fn not_found(kind: &'static str, id: Ulid) -> Self {
        EngineError::NotFound { kind, id }
    }

    /// Stable label for wire responses and metrics.
    pub fn kind_label(&self) -> &'static str {
        match self {
            EngineError::NotFound { .. } => "not_found",
            EngineError::OverlapConflict { .. } => "overlap_conflict",
            EngineError::CapacityExceeded { .. } => "capacity_exceeded",
            EngineError::InvalidTransition(_) => "invalid_transition",
            EngineError::Busy(_) => "busy",
            EngineError::LimitExceeded(_) => "limit_exceeded",
            EngineError::Store(_) => "store",
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, EngineError::Busy(_))
    }
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::NotFound { kind, id } => write!(f, "{kind} not found: {id}"),
            EngineError::OverlapConflict { what, range } => {
                write!(
                    f,
                    "already booked for {what} from {} to {}",
                    range.start, range.end
                )
            }
            EngineError::CapacityExceeded { current, normal, total } => {
                write!(
                    f,
                    "slot is full: {current} of {total} seats taken ({normal} regular)"
                )
            }
            EngineError::InvalidTransition(msg) => write!(f, "{msg}"),
            EngineError::Busy(what) => write!(f, "busy: {what}"),
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::Store(e) => write!(f, "storage failure: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}

impl From<StoreError> for EngineError {
    fn from(e: StoreError) -> Self {
        EngineError::Store(e.0)
    }
}
