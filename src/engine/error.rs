use serde::Serialize;
use ulid::Ulid;

use crate::timezone::TimeError;

/// Failures of a scheduling operation. Anything returned here means the
/// operation did not take effect.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("invalid time input: {0}")]
    InvalidTimeInput(String),

    #[error("slot already taken (conflicts with booking {conflicting})")]
    SlotAlreadyTaken { conflicting: Ulid },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("limit exceeded: {0}")]
    LimitExceeded(&'static str),

    #[error("storage error: {0}")]
    Storage(String),
}

impl From<TimeError> for EngineError {
    fn from(e: TimeError) -> Self {
        EngineError::InvalidTimeInput(e.0)
    }
}

/// Non-fatal degradation reported next to a successful result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Warning {
    /// Booking is held internally but not yet mirrored to the external calendar.
    ExternalSyncDegraded { reason: String },
    /// Availability was computed without the external calendar's busy data.
    ExternalQueryDegraded { reason: String },
}
