use chrono::NaiveTime;
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unix milliseconds — the only time type.
pub type Ms = i64;

pub const MINUTE_MS: Ms = 60_000;

/// Half-open interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start: Ms,
    pub end: Ms,
}

impl Span {
    pub fn new(start: Ms, end: Ms) -> Self {
        debug_assert!(start < end, "Span start must be before end");
        Self { start, end }
    }

    /// Like `new`, but rejects empty and inverted ranges instead of asserting.
    pub fn try_new(start: Ms, end: Ms) -> Option<Self> {
        (start < end).then_some(Self { start, end })
    }

    pub fn duration_ms(&self) -> Ms {
        self.end - self.start
    }

    /// Touching intervals (`a.end == b.start`) do not overlap.
    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }

    /// Returns true if `self` fully contains `other`.
    pub fn contains_span(&self, other: &Span) -> bool {
        self.start <= other.start && other.end <= self.end
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BusySource {
    InternalBooking,
    ExternalCalendar,
}

/// Computed per request, never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BusyInterval {
    pub span: Span,
    pub source: BusySource,
}

impl BusyInterval {
    pub fn internal(span: Span) -> Self {
        Self { span, source: BusySource::InternalBooking }
    }

    pub fn external(span: Span) -> Self {
        Self { span, source: BusySource::ExternalCalendar }
    }
}

/// A coach's bookable schedule. Working bounds are venue-local times of day.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoachScheduleConfig {
    pub id: Ulid,
    pub slug: String,
    pub display_name: Option<String>,
    pub work_start: NaiveTime,
    pub work_end: NaiveTime,
    pub session_minutes: u32,
    pub calendar_id: Option<String>,
}

impl CoachScheduleConfig {
    pub fn session_ms(&self) -> Ms {
        Ms::from(self.session_minutes) * MINUTE_MS
    }

    pub fn label(&self) -> &str {
        self.display_name.as_deref().unwrap_or(&self.slug)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BookingStatus {
    /// Persisted locally, external mirror not yet written.
    Pending,
    /// Externally synced, or no external calendar to sync to.
    Confirmed,
    /// Terminal.
    Cancelled,
}

impl BookingStatus {
    /// Active bookings hold their slot.
    pub fn is_active(self) -> bool {
        matches!(self, BookingStatus::Pending | BookingStatus::Confirmed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            BookingStatus::Pending => "pending",
            BookingStatus::Confirmed => "confirmed",
            BookingStatus::Cancelled => "cancelled",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientIdentity {
    pub name: String,
    /// Lowercased; the canonical match key for a client.
    pub email: String,
    pub phone: Option<String>,
    pub notes: Option<String>,
}

/// Where a booking is mirrored in an external calendar.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalEvent {
    pub calendar_id: String,
    pub event_id: String,
    pub link: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    pub id: Ulid,
    pub coach_id: Ulid,
    pub client: ClientIdentity,
    pub span: Span,
    pub status: BookingStatus,
    pub external: Option<ExternalEvent>,
    /// Set on cancellation while the external event still has to be deleted.
    pub external_cleanup_pending: bool,
    pub created_at: Ms,
    pub cancelled_at: Option<Ms>,
    pub cancel_reason: Option<String>,
}

#[derive(Debug, Clone)]
pub struct CoachState {
    pub config: CoachScheduleConfig,
    /// Every booking ever placed, cancelled ones included, sorted by `span.start`.
    pub bookings: Vec<Booking>,
}

impl CoachState {
    pub fn new(config: CoachScheduleConfig) -> Self {
        Self {
            config,
            bookings: Vec::new(),
        }
    }

    /// Insert booking maintaining sort order by span.start.
    pub fn insert_booking(&mut self, booking: Booking) {
        let pos = self
            .bookings
            .partition_point(|b| b.span.start <= booking.span.start);
        self.bookings.insert(pos, booking);
    }

    pub fn booking(&self, id: &Ulid) -> Option<&Booking> {
        self.bookings.iter().find(|b| b.id == *id)
    }

    pub fn booking_mut(&mut self, id: &Ulid) -> Option<&mut Booking> {
        self.bookings.iter_mut().find(|b| b.id == *id)
    }

    /// Return bookings (any status) whose span overlaps the query window.
    /// Uses binary search to skip bookings starting at or after `query.end`.
    pub fn overlapping(&self, query: &Span) -> impl Iterator<Item = &Booking> {
        let right_bound = self
            .bookings
            .partition_point(|b| b.span.start < query.end);
        self.bookings[..right_bound]
            .iter()
            .filter(move |b| b.span.overlaps(query))
    }

    /// Pending and confirmed bookings overlapping the query window.
    pub fn active_overlapping(&self, query: &Span) -> impl Iterator<Item = &Booking> {
        self.overlapping(query).filter(|b| b.status.is_active())
    }
}

/// The event types — flat, no nesting. This is the WAL record format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    CoachRegistered {
        coach: CoachScheduleConfig,
    },
    CoachUpdated {
        coach: CoachScheduleConfig,
    },
    BookingPlaced {
        booking: Booking,
    },
    BookingConfirmed {
        id: Ulid,
        coach_id: Ulid,
        external: Option<ExternalEvent>,
    },
    BookingCancelled {
        id: Ulid,
        coach_id: Ulid,
        reason: Option<String>,
        cancelled_at: Ms,
    },
    ExternalEventRemoved {
        id: Ulid,
        coach_id: Ulid,
    },
}

impl Event {
    pub fn coach_id(&self) -> Ulid {
        match self {
            Event::CoachRegistered { coach } | Event::CoachUpdated { coach } => coach.id,
            Event::BookingPlaced { booking } => booking.coach_id,
            Event::BookingConfirmed { coach_id, .. }
            | Event::BookingCancelled { coach_id, .. }
            | Event::ExternalEventRemoved { coach_id, .. } => *coach_id,
        }
    }
}


#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;

    fn state() -> CoachState {
        CoachState::new(coach("ali", (8, 0), (20, 0), 60))
    }

    #[test]
    fn span_basics() {
        let s = Span::new(100, 200);
        assert_eq!(s.duration_ms(), 100);
        assert!(Span::try_new(200, 200).is_none());
        assert!(Span::try_new(300, 200).is_none());
    }

    #[test]
    fn span_overlap() {
        let a = Span::new(100, 200);
        let b = Span::new(150, 250);
        let c = Span::new(200, 300);
        assert!(a.overlaps(&b));
        assert!(b.overlaps(&a));
        assert!(!a.overlaps(&c)); // adjacent, not overlapping
        assert!(!c.overlaps(&a));
    }

    #[test]
    fn span_contains_span() {
        let outer = Span::new(100, 400);
        assert!(outer.contains_span(&Span::new(150, 300)));
        assert!(outer.contains_span(&outer));
        assert!(!outer.contains_span(&Span::new(50, 200)));
    }

    #[test]
    fn booking_ordering() {
        let mut cs = state();
        let cid = cs.config.id;
        cs.insert_booking(booking(cid, 300, 400, BookingStatus::Confirmed));
        cs.insert_booking(booking(cid, 100, 200, BookingStatus::Pending));
        cs.insert_booking(booking(cid, 200, 300, BookingStatus::Cancelled));
        let starts: Vec<Ms> = cs.bookings.iter().map(|b| b.span.start).collect();
        assert_eq!(starts, vec![100, 200, 300]);
    }

    #[test]
    fn overlapping_skips_past_and_future() {
        let mut cs = state();
        let cid = cs.config.id;
        cs.insert_booking(booking(cid, 100, 200, BookingStatus::Confirmed));
        cs.insert_booking(booking(cid, 450, 600, BookingStatus::Confirmed));
        cs.insert_booking(booking(cid, 1000, 1100, BookingStatus::Confirmed));

        let hits: Vec<_> = cs.overlapping(&Span::new(500, 800)).collect();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].span, Span::new(450, 600));
    }

    #[test]
    fn overlapping_adjacent_not_included() {
        let mut cs = state();
        let cid = cs.config.id;
        cs.insert_booking(booking(cid, 100, 200, BookingStatus::Confirmed));
        assert_eq!(cs.overlapping(&Span::new(200, 300)).count(), 0);
        assert_eq!(cs.overlapping(&Span::new(0, 100)).count(), 0);
    }

    #[test]
    fn active_overlapping_ignores_cancelled() {
        let mut cs = state();
        let cid = cs.config.id;
        cs.insert_booking(booking(cid, 100, 200, BookingStatus::Cancelled));
        cs.insert_booking(booking(cid, 150, 250, BookingStatus::Pending));
        let query = Span::new(0, 1000);
        assert_eq!(cs.overlapping(&query).count(), 2);
        let active: Vec<_> = cs.active_overlapping(&query).collect();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].status, BookingStatus::Pending);
    }

    #[test]
    fn booking_lookup_by_id() {
        let mut cs = state();
        let cid = cs.config.id;
        let b = booking(cid, 100, 200, BookingStatus::Pending);
        let id = b.id;
        cs.insert_booking(b);
        cs.booking_mut(&id).unwrap().status = BookingStatus::Confirmed;
        assert_eq!(cs.booking(&id).unwrap().status, BookingStatus::Confirmed);
        assert!(cs.booking(&Ulid::new()).is_none());
    }

    #[test]
    fn session_length_in_ms() {
        let c = coach("ali", (8, 0), (20, 0), 45);
        assert_eq!(c.session_ms(), 45 * MINUTE_MS);
        assert_eq!(c.label(), "ali");
    }

    #[test]
    fn event_serialization_roundtrip() {
        let c = coach("ali", (8, 0), (20, 0), 60);
        let events = vec![
            Event::CoachRegistered { coach: c.clone() },
            Event::BookingPlaced {
                booking: booking(c.id, 1000, 2000, BookingStatus::Pending),
            },
        ];
        for event in events {
            let bytes = bincode::serialize(&event).unwrap();
            let decoded: Event = bincode::deserialize(&bytes).unwrap();
            assert_eq!(event, decoded);
        }
    }
}
