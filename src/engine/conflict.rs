use crate::limits::*;
use crate::model::*;

use super::EngineError;

pub(crate) fn now_ms() -> Ms {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as Ms)
        .unwrap_or(0)
}

pub(crate) fn validate_span(span: &Span) -> Result<(), EngineError> {
    if span.start < MIN_VALID_TIMESTAMP_MS || span.end > MAX_VALID_TIMESTAMP_MS {
        return Err(EngineError::LimitExceeded("timestamp out of range"));
    }
    Ok(())
}

/// The conflict check. Caller must hold the coach's write lock from here
/// through the insert, otherwise two reservations can both pass.
pub(crate) fn check_no_conflict(cs: &CoachState, span: &Span) -> Result<(), EngineError> {
    match cs.active_overlapping(span).next() {
        Some(existing) => Err(EngineError::SlotAlreadyTaken {
            conflicting: existing.id,
        }),
        None => Ok(()),
    }
}
