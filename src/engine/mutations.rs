use std::sync::Arc;

use chrono::NaiveTime;
use tokio::sync::{oneshot, RwLock};
use tracing::{error, info, warn};
use ulid::Ulid;

use crate::calendar::{event_key, NewEvent};
use crate::limits::*;
use crate::model::*;
use crate::notifications::{booking_messages, Template};
use crate::observability;
use crate::timezone::VenueClock;

use super::conflict::{check_no_conflict, now_ms, validate_span};
use super::directory::{is_valid_slug, CoachDirectory};
use super::queries::require;
use super::{Engine, EngineError, WalCommand, Warning};

/// Schedule fields an admin sets for a coach. The slug is the upsert key.
#[derive(Debug, Clone)]
pub struct CoachProfile {
    pub display_name: Option<String>,
    pub work_start: NaiveTime,
    pub work_end: NaiveTime,
    pub session_minutes: u32,
    pub calendar_id: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ReservationRequest {
    /// Slug or id.
    pub coach: String,
    /// `YYYY-MM-DD`, venue-local.
    pub date: String,
    /// `HH:mm`, venue-local.
    pub time: String,
    pub client: ClientIdentity,
}

#[derive(Debug, Clone)]
pub struct Reservation {
    pub booking: Booking,
    pub warnings: Vec<Warning>,
}

/// Outstanding external calendar work for one booking.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncTask {
    /// Pending booking still needs its external event.
    Create(Ulid),
    /// Cancelled booking whose external event is still there.
    Remove(Ulid),
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

fn check_len(value: Option<&str>, max: usize, what: &'static str) -> Result<(), EngineError> {
    match value {
        Some(v) if v.len() > max => Err(EngineError::LimitExceeded(what)),
        _ => Ok(()),
    }
}

/// Trim fields, lowercase the email, enforce field limits.
fn normalize_client(client: ClientIdentity) -> Result<ClientIdentity, EngineError> {
    let name = client.name.trim().to_string();
    let email = client.email.trim().to_lowercase();
    let phone = non_empty(client.phone);
    let notes = non_empty(client.notes);

    require(&name, "client name")?;
    require(&email, "client email")?;
    match email.split_once('@') {
        Some((local, domain)) if !local.is_empty() && !domain.is_empty() && !email.contains(char::is_whitespace) => {}
        _ => return Err(EngineError::InvalidRequest(format!("invalid email address '{email}'"))),
    }
    check_len(Some(&name), MAX_NAME_LEN, "client name too long")?;
    check_len(Some(&email), MAX_EMAIL_LEN, "email too long")?;
    check_len(phone.as_deref(), MAX_PHONE_LEN, "phone number too long")?;
    check_len(notes.as_deref(), MAX_NOTES_LEN, "notes too long")?;

    Ok(ClientIdentity {
        name,
        email,
        phone,
        notes,
    })
}

impl Engine {
    /// Create or update a coach keyed by slug.
    pub async fn register_coach(&self, slug: &str, profile: CoachProfile) -> Result<CoachScheduleConfig, EngineError> {
        let slug = slug.trim().to_ascii_lowercase();
        if !is_valid_slug(&slug) {
            return Err(EngineError::InvalidRequest(
                "slug must be 1-64 characters of a-z, 0-9 and '-'".into(),
            ));
        }
        if profile.work_start >= profile.work_end {
            return Err(EngineError::InvalidRequest(
                "work_start must be before work_end".into(),
            ));
        }
        if profile.session_minutes == 0 || profile.session_minutes > MAX_SESSION_MINUTES {
            return Err(EngineError::InvalidRequest(format!(
                "session length must be between 1 and {MAX_SESSION_MINUTES} minutes"
            )));
        }
        let display_name = non_empty(profile.display_name);
        let calendar_id = non_empty(profile.calendar_id);
        check_len(display_name.as_deref(), MAX_NAME_LEN, "display name too long")?;
        check_len(calendar_id.as_deref(), MAX_CALENDAR_ID_LEN, "calendar id too long")?;

        let _registration = self.registration.lock().await;

        if let Some(id) = self.directory.id_for_slug(&slug) {
            let cs = self
                .get_coach_state(&id)
                .ok_or_else(|| EngineError::NotFound(format!("coach '{slug}'")))?;
            let mut guard = cs.write().await;
            let config = CoachScheduleConfig {
                id,
                slug,
                display_name,
                work_start: profile.work_start,
                work_end: profile.work_end,
                session_minutes: profile.session_minutes,
                calendar_id,
            };
            if guard.config != config {
                let event = Event::CoachUpdated { coach: config.clone() };
                self.persist_and_apply(id, &mut guard, &event).await?;
                info!(coach = %config.slug, "coach schedule updated");
            }
            return Ok(config);
        }

        if self.coaches.len() >= MAX_COACHES {
            return Err(EngineError::LimitExceeded("too many coaches"));
        }
        let config = CoachScheduleConfig {
            id: Ulid::new(),
            slug,
            display_name,
            work_start: profile.work_start,
            work_end: profile.work_end,
            session_minutes: profile.session_minutes,
            calendar_id,
        };
        let event = Event::CoachRegistered { coach: config.clone() };
        self.wal_append(&event).await?;
        self.coaches
            .insert(config.id, Arc::new(RwLock::new(CoachState::new(config.clone()))));
        self.directory.insert(&config.slug, config.id);
        self.notify.send(config.id, &event);
        metrics::gauge!(observability::COACHES_ACTIVE).set(self.coaches.len() as f64);
        info!(coach = %config.slug, id = %config.id, "coach registered");
        Ok(config)
    }

    /// Reserve a session. The conflict check and the insert run under the
    /// coach's write lock; external sync and notifications happen after it
    /// is released and never fail the reservation.
    pub async fn reserve(&self, req: ReservationRequest) -> Result<Reservation, EngineError> {
        let result = self.try_reserve(req).await;
        let outcome = match &result {
            Ok(r) if r.booking.status == BookingStatus::Pending => "pending",
            Ok(_) => "confirmed",
            Err(EngineError::SlotAlreadyTaken { .. }) => "conflict",
            Err(_) => "rejected",
        };
        metrics::counter!(observability::RESERVATIONS_TOTAL, "outcome" => outcome).increment(1);
        result
    }

    async fn try_reserve(&self, req: ReservationRequest) -> Result<Reservation, EngineError> {
        require(&req.coach, "coach")?;
        require(&req.date, "date")?;
        require(&req.time, "time")?;
        require(&req.client.email, "client email")?;
        let date = VenueClock::parse_date(&req.date)?;
        let time = VenueClock::parse_time(&req.time)?;
        let client = normalize_client(req.client)?;
        let (coach_id, cs) = self.resolve_coach(&req.coach)?;

        let (booking, config) = {
            let mut guard = cs.write().await;
            let config = guard.config.clone();

            let start = self.settings.clock.to_instant(date, time)?;
            let span = Span::new(start, start + config.session_ms());
            let window = self.working_window(&config, date)?;
            if !window.contains_span(&span) {
                return Err(EngineError::InvalidRequest(format!(
                    "{} on {} is outside {}'s working hours",
                    req.time.trim(),
                    date,
                    config.label()
                )));
            }
            validate_span(&span)?;
            if guard.bookings.len() >= MAX_BOOKINGS_PER_COACH {
                return Err(EngineError::LimitExceeded("too many bookings for coach"));
            }
            check_no_conflict(&guard, &span)?;

            // Nothing to mirror without a calendar, so the booking is final at once.
            let status = if config.calendar_id.is_some() {
                BookingStatus::Pending
            } else {
                BookingStatus::Confirmed
            };
            let booking = Booking {
                id: Ulid::new(),
                coach_id,
                client,
                span,
                status,
                external: None,
                external_cleanup_pending: false,
                created_at: now_ms(),
                cancelled_at: None,
                cancel_reason: None,
            };
            let event = Event::BookingPlaced { booking: booking.clone() };
            self.persist_and_apply(coach_id, &mut guard, &event).await?;
            (booking, config)
        };
        info!(
            booking = %booking.id,
            coach = %config.slug,
            start = booking.span.start,
            status = booking.status.as_str(),
            "booking placed"
        );

        let mut warnings = Vec::new();
        let booking = match config.calendar_id.as_deref() {
            Some(calendar_id) => match self.sync_to_calendar(&config, calendar_id, &booking).await {
                Ok(synced) => synced,
                Err(reason) => {
                    warnings.push(Warning::ExternalSyncDegraded { reason });
                    booking
                }
            },
            None => booking,
        };

        self.dispatch_notifications(&booking, &config, Template::BookingConfirmation);
        Ok(Reservation { booking, warnings })
    }

    /// Create the external event and record it. Runs outside the coach lock;
    /// the error string becomes the caller's warning.
    async fn sync_to_calendar(
        &self,
        config: &CoachScheduleConfig,
        calendar_id: &str,
        booking: &Booking,
    ) -> Result<Booking, String> {
        let clock = &self.settings.clock;
        let mut description = format!(
            "Client: {} <{}>\nTime: {} {}-{} ({})",
            booking.client.name,
            booking.client.email,
            clock.format_date(booking.span.start),
            clock.format_hhmm(booking.span.start),
            clock.format_hhmm(booking.span.end),
            clock.name(),
        );
        if let Some(phone) = &booking.client.phone {
            description.push_str(&format!("\nPhone: {phone}"));
        }
        if let Some(notes) = &booking.client.notes {
            description.push_str(&format!("\nNotes: {notes}"));
        }
        let event = NewEvent {
            key: event_key(booking.id),
            title: format!("Session with {} ({})", booking.client.name, config.label()),
            description,
            span: booking.span,
        };

        let created = match self.bounded(self.calendar.create_event(calendar_id, &event)).await {
            Ok(created) => created,
            Err(e) => {
                warn!(booking = %booking.id, coach = %config.slug, error = %e, "external sync failed, booking stays pending");
                metrics::counter!(observability::EXTERNAL_SYNC_FAILURES_TOTAL, "op" => "create").increment(1);
                return Err(e.to_string());
            }
        };

        let external = ExternalEvent {
            calendar_id: calendar_id.to_string(),
            event_id: created.id,
            link: created.html_link,
        };
        self.record_sync(booking.id, Some(external)).await.map_err(|e| {
            error!(booking = %booking.id, error = %e, "external event created but confirmation not persisted");
            e.to_string()
        })
    }

    /// Pending → Confirmed, under the lock again. A booking cancelled while
    /// the sync was in flight keeps its status and gets the new event removed.
    pub(super) async fn record_sync(&self, booking_id: Ulid, external: Option<ExternalEvent>) -> Result<Booking, EngineError> {
        let (coach_id, mut guard) = self.resolve_booking_write(&booking_id).await?;
        let current = guard
            .booking(&booking_id)
            .cloned()
            .ok_or_else(|| EngineError::NotFound(format!("booking {booking_id}")))?;

        let applies = match current.status {
            BookingStatus::Pending => true,
            BookingStatus::Cancelled => external.is_some() && current.external.is_none(),
            BookingStatus::Confirmed => false,
        };
        if !applies {
            return Ok(current);
        }

        let event = Event::BookingConfirmed {
            id: booking_id,
            coach_id,
            external,
        };
        self.persist_and_apply(coach_id, &mut guard, &event).await?;
        let updated = guard
            .booking(&booking_id)
            .cloned()
            .ok_or_else(|| EngineError::NotFound(format!("booking {booking_id}")))?;
        drop(guard);

        if updated.status == BookingStatus::Cancelled {
            info!(booking = %booking_id, "booking cancelled during external sync, removing event");
            self.release_external_event(booking_id).await?;
        }
        Ok(updated)
    }

    /// Cancel a booking of the given coach. Idempotent: an already-cancelled
    /// booking is returned unchanged. A booking of another coach is `NotFound`.
    pub async fn cancel(
        &self,
        booking_id: Ulid,
        coach_key: &str,
        reason: Option<String>,
    ) -> Result<Booking, EngineError> {
        let not_found = || EngineError::NotFound(format!("booking {booking_id}"));
        require(coach_key, "coach")?;
        let reason = non_empty(reason);
        check_len(reason.as_deref(), MAX_REASON_LEN, "cancellation reason too long")?;
        let expected_coach = self.directory.resolve(coach_key).ok_or_else(not_found)?;

        let (coach_id, mut guard) = self.resolve_booking_write(&booking_id).await?;
        if expected_coach != coach_id {
            return Err(not_found());
        }
        let current = guard.booking(&booking_id).cloned().ok_or_else(not_found)?;
        if current.status == BookingStatus::Cancelled {
            return Ok(current);
        }

        let event = Event::BookingCancelled {
            id: booking_id,
            coach_id,
            reason,
            cancelled_at: now_ms(),
        };
        self.persist_and_apply(coach_id, &mut guard, &event).await?;
        let mut cancelled = guard.booking(&booking_id).cloned().ok_or_else(not_found)?;
        let config = guard.config.clone();
        drop(guard);

        metrics::counter!(observability::CANCELLATIONS_TOTAL).increment(1);
        info!(booking = %booking_id, coach = %config.slug, "booking cancelled");

        if cancelled.external_cleanup_pending {
            match self.release_external_event(booking_id).await {
                Ok(removed) => cancelled.external_cleanup_pending = !removed,
                // The cancellation itself is durable; the reconciler retries cleanup.
                Err(e) => warn!(booking = %booking_id, error = %e, "recording external event removal failed"),
            }
        }

        self.dispatch_notifications(&cancelled, &config, Template::BookingCancellation);
        Ok(cancelled)
    }

    /// Delete a cancelled booking's external event. `Ok(true)` once it is gone;
    /// `Ok(false)` when the calendar call failed and cleanup stays pending.
    pub(super) async fn release_external_event(&self, booking_id: Ulid) -> Result<bool, EngineError> {
        let external = {
            let (_, cs) = self.coach_for_booking(&booking_id)?;
            let guard = cs.read().await;
            match guard.booking(&booking_id) {
                Some(b) if b.external_cleanup_pending => b.external.clone(),
                _ => None,
            }
        };
        let Some(external) = external else {
            return Ok(true);
        };

        if let Err(e) = self
            .bounded(self.calendar.delete_event(&external.calendar_id, &external.event_id))
            .await
        {
            warn!(booking = %booking_id, event = %external.event_id, error = %e, "external event removal failed");
            metrics::counter!(observability::EXTERNAL_SYNC_FAILURES_TOTAL, "op" => "delete").increment(1);
            return Ok(false);
        }

        let (coach_id, mut guard) = self.resolve_booking_write(&booking_id).await?;
        if guard
            .booking(&booking_id)
            .is_some_and(|b| b.external_cleanup_pending)
        {
            let event = Event::ExternalEventRemoved {
                id: booking_id,
                coach_id,
            };
            self.persist_and_apply(coach_id, &mut guard, &event).await?;
        }
        Ok(true)
    }

    /// Fire-and-forget client messages. Failures are counted and logged.
    fn dispatch_notifications(&self, booking: &Booking, coach: &CoachScheduleConfig, template: Template) {
        for message in booking_messages(booking, coach, &self.settings.clock, template) {
            let notifier = self.notifier.clone();
            let booking_id = booking.id;
            tokio::spawn(async move {
                if let Err(e) = notifier.notify(&message).await {
                    metrics::counter!(observability::NOTIFICATIONS_FAILED_TOTAL).increment(1);
                    warn!(booking = %booking_id, channel = ?message.channel, error = %e, "client notification failed");
                }
            });
        }
    }

    /// External calendar work left over from failed or interrupted syncs.
    pub async fn collect_sync_backlog(&self) -> Vec<SyncTask> {
        let states: Vec<_> = self.coaches.iter().map(|e| e.value().clone()).collect();
        let mut tasks = Vec::new();
        for cs in states {
            let guard = cs.read().await;
            for b in &guard.bookings {
                match b.status {
                    BookingStatus::Pending => tasks.push(SyncTask::Create(b.id)),
                    BookingStatus::Cancelled if b.external_cleanup_pending => {
                        tasks.push(SyncTask::Remove(b.id))
                    }
                    _ => {}
                }
            }
        }
        metrics::gauge!(observability::SYNC_BACKLOG).set(tasks.len() as f64);
        tasks
    }

    /// Retry one backlog item without re-running the conflict check.
    /// `Ok(true)` when the item is settled.
    pub async fn retry_sync(&self, task: SyncTask) -> Result<bool, EngineError> {
        match task {
            SyncTask::Create(booking_id) => {
                let (booking, config) = {
                    let (_, cs) = self.coach_for_booking(&booking_id)?;
                    let guard = cs.read().await;
                    let booking = guard
                        .booking(&booking_id)
                        .cloned()
                        .ok_or_else(|| EngineError::NotFound(format!("booking {booking_id}")))?;
                    (booking, guard.config.clone())
                };
                if booking.status != BookingStatus::Pending {
                    return Ok(true);
                }
                match config.calendar_id.as_deref() {
                    Some(calendar_id) => Ok(self
                        .sync_to_calendar(&config, calendar_id, &booking)
                        .await
                        .is_ok_and(|b| b.status != BookingStatus::Pending)),
                    // Calendar removed from the coach since: nothing left to mirror.
                    None => {
                        self.record_sync(booking_id, None).await?;
                        Ok(true)
                    }
                }
            }
            SyncTask::Remove(booking_id) => self.release_external_event(booking_id).await,
        }
    }

    /// Rewrite the WAL as a snapshot of current state (history included).
    /// All coach read locks are held until the swap so no append slips
    /// between snapshot and rename.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let _registration = self.registration.lock().await;
        let states: Vec<_> = self.coaches.iter().map(|e| e.value().clone()).collect();

        let mut guards = Vec::with_capacity(states.len());
        for cs in &states {
            guards.push(cs.read().await);
        }
        let mut events = Vec::with_capacity(guards.len() + self.booking_to_coach.len());
        for guard in &guards {
            events.push(Event::CoachRegistered {
                coach: guard.config.clone(),
            });
            events.extend(guard.bookings.iter().map(|b| Event::BookingPlaced { booking: b.clone() }));
        }

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact {
                events,
                response: tx,
            })
            .await
            .map_err(|_| EngineError::Storage("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::Storage("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::Storage(e.to_string()))
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}
