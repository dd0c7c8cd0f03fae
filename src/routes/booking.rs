//! Public booking routes: coach list, availability, reservation, cancellation.

use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::engine::{ReservationRequest, Warning};
use crate::error::{ApiError, Result};
use crate::model::{Booking, ClientIdentity, CoachScheduleConfig};
use crate::timezone::VenueClock;
use crate::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/coaches", get(list_coaches))
        .route("/api/availability", get(get_availability))
        .route("/api/bookings", post(create_booking))
        .route("/api/bookings/{id}/cancel", post(cancel_booking))
}

/// Map a JSON body rejection onto the API's error shape.
pub(crate) fn json_body<T>(body: std::result::Result<Json<T>, JsonRejection>) -> Result<T> {
    body.map(|Json(v)| v)
        .map_err(|e| ApiError::BadRequest(e.body_text()))
}

pub(crate) fn parse_booking_id(raw: &str) -> Result<Ulid> {
    Ulid::from_string(raw).map_err(|_| ApiError::BadRequest(format!("invalid booking id '{raw}'")))
}

// ─── Views ───────────────────────────────────────────────────

#[derive(Debug, Serialize)]
pub struct CoachView {
    pub id: String,
    pub slug: String,
    pub name: String,
    pub work_start: String,
    pub work_end: String,
    pub session_minutes: u32,
    pub has_calendar: bool,
}

impl From<&CoachScheduleConfig> for CoachView {
    fn from(c: &CoachScheduleConfig) -> Self {
        Self {
            id: c.id.to_string(),
            slug: c.slug.clone(),
            name: c.label().to_string(),
            work_start: c.work_start.format("%H:%M").to_string(),
            work_end: c.work_end.format("%H:%M").to_string(),
            session_minutes: c.session_minutes,
            has_calendar: c.calendar_id.is_some(),
        }
    }
}

/// Full booking record, for admin views.
#[derive(Debug, Serialize)]
pub struct BookingView {
    pub id: String,
    pub coach_id: String,
    pub status: &'static str,
    pub date: String,
    pub time: String,
    pub end_time: String,
    pub start: String,
    pub end: String,
    pub client: ClientIdentity,
    pub calendar_link: Option<String>,
    pub external_cleanup_pending: bool,
    pub created_at: String,
    pub cancelled_at: Option<String>,
    pub cancel_reason: Option<String>,
}

impl BookingView {
    pub fn new(b: &Booking, clock: &VenueClock) -> Self {
        Self {
            id: b.id.to_string(),
            coach_id: b.coach_id.to_string(),
            status: b.status.as_str(),
            date: clock.format_date(b.span.start),
            time: clock.format_hhmm(b.span.start),
            end_time: clock.format_hhmm(b.span.end),
            start: clock.format_rfc3339(b.span.start),
            end: clock.format_rfc3339(b.span.end),
            client: b.client.clone(),
            calendar_link: b.external.as_ref().and_then(|e| e.link.clone()),
            external_cleanup_pending: b.external_cleanup_pending,
            created_at: clock.format_rfc3339(b.created_at),
            cancelled_at: b.cancelled_at.map(|t| clock.format_rfc3339(t)),
            cancel_reason: b.cancel_reason.clone(),
        }
    }
}

// ─── Coaches ─────────────────────────────────────────────────

async fn list_coaches(State(state): State<Arc<AppState>>) -> Json<Vec<CoachView>> {
    let coaches = state.engine.list_coaches().await;
    Json(coaches.iter().map(CoachView::from).collect())
}

// ─── Availability ────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct AvailabilityQuery {
    #[serde(default)]
    pub coach: String,
    #[serde(default)]
    pub date: String,
}

#[derive(Debug, Serialize)]
pub struct AvailabilityResponse {
    pub coach: String,
    pub date: String,
    pub timezone: &'static str,
    /// Local `HH:mm` session starts, earliest first.
    pub slots: Vec<String>,
    pub degraded: bool,
    pub warnings: Vec<Warning>,
}

async fn get_availability(
    State(state): State<Arc<AppState>>,
    Query(query): Query<AvailabilityQuery>,
) -> Result<Json<AvailabilityResponse>> {
    let availability = state.engine.available_slots(&query.coach, &query.date).await?;
    let clock = state.engine.clock();

    Ok(Json(AvailabilityResponse {
        coach: availability.coach.slug.clone(),
        date: availability.date.format("%Y-%m-%d").to_string(),
        timezone: clock.name(),
        slots: availability.slots.iter().map(|s| clock.format_hhmm(s.start)).collect(),
        degraded: availability.degraded(),
        warnings: availability.warnings,
    }))
}

// ─── Reservation ─────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct CreateBookingRequest {
    #[serde(default)]
    pub coach: String,
    #[serde(default)]
    pub date: String,
    #[serde(default)]
    pub time: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub email: String,
    pub phone: Option<String>,
    pub notes: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct CreateBookingResponse {
    pub id: String,
    pub status: &'static str,
    pub date: String,
    pub time: String,
    pub start: String,
    pub end: String,
    pub calendar_link: Option<String>,
    pub warnings: Vec<Warning>,
}

async fn create_booking(
    State(state): State<Arc<AppState>>,
    body: std::result::Result<Json<CreateBookingRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<CreateBookingResponse>)> {
    let body = json_body(body)?;
    let request = ReservationRequest {
        coach: body.coach,
        date: body.date,
        time: body.time,
        client: ClientIdentity {
            name: body.name,
            email: body.email,
            phone: body.phone,
            notes: body.notes,
        },
    };

    let reservation = state.engine.reserve(request).await?;
    let clock = state.engine.clock();
    let b = &reservation.booking;

    Ok((
        StatusCode::CREATED,
        Json(CreateBookingResponse {
            id: b.id.to_string(),
            status: b.status.as_str(),
            date: clock.format_date(b.span.start),
            time: clock.format_hhmm(b.span.start),
            start: clock.format_rfc3339(b.span.start),
            end: clock.format_rfc3339(b.span.end),
            calendar_link: b.external.as_ref().and_then(|e| e.link.clone()),
            warnings: reservation.warnings,
        }),
    ))
}

// ─── Cancellation ────────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
pub struct CancelBookingRequest {
    /// Scopes the cancel to one coach's bookings. Missing is rejected by the engine.
    #[serde(default)]
    pub coach: String,
    pub reason: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct CancelBookingResponse {
    pub id: String,
    pub status: &'static str,
}

async fn cancel_booking(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    body: std::result::Result<Json<CancelBookingRequest>, JsonRejection>,
) -> Result<Json<CancelBookingResponse>> {
    let id = parse_booking_id(&id)?;
    // A bodyless cancel reads as one without a coach.
    let body = match body {
        Err(JsonRejection::MissingJsonContentType(_)) => CancelBookingRequest::default(),
        other => json_body(other)?,
    };

    let booking = state
        .engine
        .cancel(id, &body.coach, body.reason)
        .await?;
    Ok(Json(CancelBookingResponse {
        id: booking.id.to_string(),
        status: booking.status.as_str(),
    }))
}
