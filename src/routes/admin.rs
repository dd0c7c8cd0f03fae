//! Admin routes (bearer token). The auth middleware is applied in routes/mod.rs.

use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    response::sse::{Event as SseEvent, KeepAlive, Sse},
    routing::{get, put},
    Json, Router,
};
use futures::stream::{self, Stream};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast::error::RecvError;

use super::booking::{json_body, parse_booking_id, BookingView, CoachView};
use crate::engine::CoachProfile;
use crate::error::{ApiError, Result};
use crate::model::Event;
use crate::timezone::VenueClock;
use crate::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/coaches/{coach}", put(upsert_coach))
        .route("/api/coaches/{coach}/bookings", get(coach_bookings))
        .route("/api/coaches/{coach}/events", get(coach_events))
        .route("/api/bookings/{id}", get(get_booking))
}

// ─── Coach schedule ──────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct UpsertCoachRequest {
    pub display_name: Option<String>,
    /// Local `HH:mm`.
    pub work_start: String,
    pub work_end: String,
    pub session_minutes: u32,
    pub calendar_id: Option<String>,
}

async fn upsert_coach(
    State(state): State<Arc<AppState>>,
    Path(slug): Path<String>,
    body: std::result::Result<Json<UpsertCoachRequest>, JsonRejection>,
) -> Result<Json<CoachView>> {
    let body = json_body(body)?;
    let profile = CoachProfile {
        display_name: body.display_name,
        work_start: VenueClock::parse_time(&body.work_start).map_err(|e| ApiError::BadRequest(e.0))?,
        work_end: VenueClock::parse_time(&body.work_end).map_err(|e| ApiError::BadRequest(e.0))?,
        session_minutes: body.session_minutes,
        calendar_id: body.calendar_id,
    };
    let coach = state.engine.register_coach(&slug, profile).await?;
    Ok(Json(CoachView::from(&coach)))
}

// ─── Bookings ────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct DateQuery {
    #[serde(default)]
    pub date: String,
}

async fn coach_bookings(
    State(state): State<Arc<AppState>>,
    Path(coach): Path<String>,
    Query(query): Query<DateQuery>,
) -> Result<Json<Vec<BookingView>>> {
    let bookings = state.engine.bookings_on(&coach, &query.date).await?;
    let clock = state.engine.clock();
    Ok(Json(bookings.iter().map(|b| BookingView::new(b, clock)).collect()))
}

async fn get_booking(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> Result<Json<BookingView>> {
    let booking = state.engine.get_booking(parse_booking_id(&id)?).await?;
    Ok(Json(BookingView::new(&booking, state.engine.clock())))
}

// ─── Live event stream ───────────────────────────────────────

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum EventPayload {
    Coach(CoachView),
    Booking(BookingView),
    Change { booking_id: String },
}

fn event_kind(event: &Event) -> &'static str {
    match event {
        Event::CoachRegistered { .. } => "coach_registered",
        Event::CoachUpdated { .. } => "coach_updated",
        Event::BookingPlaced { .. } => "booking_placed",
        Event::BookingConfirmed { .. } => "booking_confirmed",
        Event::BookingCancelled { .. } => "booking_cancelled",
        Event::ExternalEventRemoved { .. } => "external_event_removed",
    }
}

fn to_sse(event: &Event, clock: &VenueClock) -> std::result::Result<SseEvent, axum::Error> {
    let payload = match event {
        Event::CoachRegistered { coach } | Event::CoachUpdated { coach } => EventPayload::Coach(coach.into()),
        Event::BookingPlaced { booking } => EventPayload::Booking(BookingView::new(booking, clock)),
        Event::BookingConfirmed { id, .. }
        | Event::BookingCancelled { id, .. }
        | Event::ExternalEventRemoved { id, .. } => EventPayload::Change {
            booking_id: id.to_string(),
        },
    };
    SseEvent::default().event(event_kind(event)).json_data(payload)
}

/// Server-sent stream of every committed change for one coach.
async fn coach_events(
    State(state): State<Arc<AppState>>,
    Path(coach): Path<String>,
) -> Result<Sse<impl Stream<Item = std::result::Result<SseEvent, axum::Error>>>> {
    let (coach_id, rx) = state.engine.subscribe(&coach)?;
    let clock = *state.engine.clock();
    tracing::info!(coach = %coach_id, "event stream opened");

    let events = stream::unfold(rx, move |mut rx| async move {
        loop {
            match rx.recv().await {
                Ok(event) => return Some((to_sse(&event, &clock), rx)),
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(coach = %coach_id, skipped, "event stream lagged");
                }
                Err(RecvError::Closed) => return None,
            }
        }
    });

    Ok(Sse::new(events).keep_alive(KeepAlive::default()))
}
