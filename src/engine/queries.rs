use chrono::NaiveDate;
use tokio::sync::broadcast;
use ulid::Ulid;

use crate::model::*;
use crate::timezone::VenueClock;

use super::availability::{merge_overlapping, slots};
use super::{Engine, EngineError, Warning};

/// Bookable slots for one (coach, date). Recomputed on every request.
#[derive(Debug, Clone)]
pub struct Availability {
    pub coach: CoachScheduleConfig,
    pub date: NaiveDate,
    /// Candidate sessions, earliest first.
    pub slots: Vec<Span>,
    /// Merged busy cover of the day, for display.
    pub busy: Vec<Span>,
    pub warnings: Vec<Warning>,
}

impl Availability {
    pub fn degraded(&self) -> bool {
        self.warnings
            .iter()
            .any(|w| matches!(w, Warning::ExternalQueryDegraded { .. }))
    }
}

pub(super) fn require(value: &str, field: &str) -> Result<(), EngineError> {
    if value.trim().is_empty() {
        return Err(EngineError::InvalidRequest(format!("{field} is required")));
    }
    Ok(())
}

impl Engine {
    /// The coach's working hours on `date` as absolute instants.
    pub(super) fn working_window(
        &self,
        config: &CoachScheduleConfig,
        date: NaiveDate,
    ) -> Result<Span, EngineError> {
        let clock = &self.settings.clock;
        let start = clock.to_instant(date, config.work_start)?;
        let end = clock.to_instant(date, config.work_end)?;
        Span::try_new(start, end).ok_or_else(|| {
            EngineError::InvalidTimeInput(format!(
                "working hours of {} collapse on {date}",
                config.slug
            ))
        })
    }

    /// Bookable slots for a coach on a venue-local date.
    pub async fn available_slots(&self, coach_key: &str, date: &str) -> Result<Availability, EngineError> {
        require(coach_key, "coach")?;
        require(date, "date")?;
        let date = VenueClock::parse_date(date)?;
        let (_, cs) = self.resolve_coach(coach_key)?;
        let config = cs.read().await.config.clone();

        let window = self.working_window(&config, date)?;
        let day = self.settings.clock.day_bounds(date)?;
        let busy = self.aggregate_busy(&cs, day).await;

        // Only offer starts whose local label books that same instant.
        let clock = &self.settings.clock;
        let found = slots(window, config.session_ms(), self.settings.slot_step, &busy.intervals)
            .filter(|s| clock.round_trips(s.start))
            .collect();
        let merged = merge_overlapping(&busy.intervals.iter().map(|b| b.span).collect::<Vec<_>>());

        Ok(Availability {
            coach: config,
            date,
            slots: found,
            busy: merged,
            warnings: busy.degraded.into_iter().collect(),
        })
    }

    /// All coaches, ordered by slug.
    pub async fn list_coaches(&self) -> Vec<CoachScheduleConfig> {
        let states: Vec<_> = self.coaches.iter().map(|e| e.value().clone()).collect();
        let mut out = Vec::with_capacity(states.len());
        for cs in states {
            out.push(cs.read().await.config.clone());
        }
        out.sort_by(|a, b| a.slug.cmp(&b.slug));
        out
    }

    pub async fn get_booking(&self, booking_id: Ulid) -> Result<Booking, EngineError> {
        let (_, cs) = self.coach_for_booking(&booking_id)?;
        let guard = cs.read().await;
        guard
            .booking(&booking_id)
            .cloned()
            .ok_or_else(|| EngineError::NotFound(format!("booking {booking_id}")))
    }

    /// Every booking (any status) of a coach intersecting a local date.
    pub async fn bookings_on(&self, coach_key: &str, date: &str) -> Result<Vec<Booking>, EngineError> {
        require(date, "date")?;
        let date = VenueClock::parse_date(date)?;
        let (_, cs) = self.resolve_coach(coach_key)?;
        let day = self.settings.clock.day_bounds(date)?;
        let guard = cs.read().await;
        Ok(guard.overlapping(&day).cloned().collect())
    }

    /// Live feed of a coach's committed events.
    pub fn subscribe(&self, coach_key: &str) -> Result<(Ulid, broadcast::Receiver<Event>), EngineError> {
        let (coach_id, _) = self.resolve_coach(coach_key)?;
        Ok((coach_id, self.notify.subscribe(coach_id)))
    }
}
