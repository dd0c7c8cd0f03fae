//! External calendar collaborator.
//!
//! The engine only needs three operations from a third-party calendar:
//! free/busy listing, event creation and event deletion. All of them may
//! fail independently of the booking transaction.

mod google;

pub use google::{GoogleCalendar, DEFAULT_API_BASE};

use std::time::Duration;

use async_trait::async_trait;
use ulid::Ulid;

use crate::model::Span;

#[derive(Debug, thiserror::Error)]
pub enum CalendarError {
    #[error("external calendar is not configured")]
    Disabled,

    #[error("calendar request timed out after {0:?}")]
    Timeout(Duration),

    #[error("calendar transport error: {0}")]
    Transport(String),

    #[error("calendar API error ({status}): {body}")]
    Api { status: u16, body: String },

    #[error("calendar rejected request: {0}")]
    Rejected(String),

    #[error("malformed calendar response: {0}")]
    Malformed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewEvent {
    /// Deterministic event id; re-creating with the same key is a no-op.
    pub key: String,
    pub title: String,
    pub description: String,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventRef {
    pub id: String,
    pub html_link: Option<String>,
}

#[async_trait]
pub trait CalendarProvider: Send + Sync {
    /// Busy intervals of `calendar_id` intersecting `range`.
    async fn list_busy(&self, calendar_id: &str, range: Span) -> Result<Vec<Span>, CalendarError>;

    async fn create_event(&self, calendar_id: &str, event: &NewEvent) -> Result<EventRef, CalendarError>;

    /// Deleting an event that is already gone succeeds.
    async fn delete_event(&self, calendar_id: &str, event_id: &str) -> Result<(), CalendarError>;
}

/// Stand-in when no calendar credentials are configured. Every call fails
/// fast so the engine degrades instead of waiting on a timeout.
#[derive(Debug, Default)]
pub struct DisabledCalendar;

#[async_trait]
impl CalendarProvider for DisabledCalendar {
    async fn list_busy(&self, _calendar_id: &str, _range: Span) -> Result<Vec<Span>, CalendarError> {
        Err(CalendarError::Disabled)
    }

    async fn create_event(&self, _calendar_id: &str, _event: &NewEvent) -> Result<EventRef, CalendarError> {
        Err(CalendarError::Disabled)
    }

    async fn delete_event(&self, _calendar_id: &str, _event_id: &str) -> Result<(), CalendarError> {
        Err(CalendarError::Disabled)
    }
}

const BASE32HEX: &[u8; 32] = b"0123456789abcdefghijklmnopqrstuv";

/// External event id for a booking: `rs` + lowercase base32hex of the ULID.
/// Google accepts ids drawn from `[a-v0-9]`, 5 to 1024 characters.
pub fn event_key(booking_id: Ulid) -> String {
    let mut value = booking_id.0;
    let mut digits = [0u8; 26];
    for slot in digits.iter_mut().rev() {
        *slot = BASE32HEX[(value & 0x1f) as usize];
        value >>= 5;
    }
    let mut key = String::with_capacity(28);
    key.push_str("rs");
    key.extend(digits.iter().map(|&b| char::from(b)));
    key
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_key_is_stable_and_valid() {
        let id = Ulid::new();
        let key = event_key(id);
        assert_eq!(key, event_key(id));
        assert_eq!(key.len(), 28);
        assert!(key.starts_with("rs"));
        assert!(key[2..].bytes().all(|b| BASE32HEX.contains(&b)));
    }

    #[test]
    fn event_keys_differ_per_booking() {
        assert_ne!(event_key(Ulid::new()), event_key(Ulid::new()));
        assert_eq!(event_key(Ulid(0)), format!("rs{}", "0".repeat(26)));
        assert_eq!(event_key(Ulid(31)), format!("rs{}v", "0".repeat(25)));
    }

    #[test]
    fn disabled_calendar_fails_fast() {
        let cal = DisabledCalendar;
        tokio_test::block_on(async {
            let range = Span::new(0, 1000);
            assert!(matches!(cal.list_busy("c", range).await, Err(CalendarError::Disabled)));
            assert!(matches!(cal.delete_event("c", "e").await, Err(CalendarError::Disabled)));
        });
    }
}
