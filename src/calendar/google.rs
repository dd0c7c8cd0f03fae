//! Google Calendar v3 provider.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat};
use reqwest::{Client, Response, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::warn;

use super::{CalendarError, CalendarProvider, EventRef, NewEvent};
use crate::model::{Ms, Span};

pub const DEFAULT_API_BASE: &str = "https://www.googleapis.com/calendar/v3";

/// Google Calendar client authenticated with a bearer access token.
pub struct GoogleCalendar {
    client: Client,
    base_url: String,
    access_token: String,
}

impl GoogleCalendar {
    pub fn new(base_url: &str, access_token: String, timeout: Duration) -> Result<Self, CalendarError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| CalendarError::Transport(e.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            access_token,
        })
    }

    fn events_url(&self, calendar_id: &str) -> String {
        format!(
            "{}/calendars/{}/events",
            self.base_url,
            urlencoding::encode(calendar_id)
        )
    }
}

fn rfc3339(ms: Ms) -> Result<String, CalendarError> {
    DateTime::from_timestamp_millis(ms)
        .map(|dt| dt.to_rfc3339_opts(SecondsFormat::Secs, true))
        .ok_or_else(|| CalendarError::Malformed(format!("timestamp {ms} out of range")))
}

fn parse_instant(s: &str) -> Result<Ms, CalendarError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.timestamp_millis())
        .map_err(|e| CalendarError::Malformed(format!("bad timestamp '{s}': {e}")))
}

fn transport(e: reqwest::Error) -> CalendarError {
    CalendarError::Transport(e.to_string())
}

async fn api_error(response: Response) -> CalendarError {
    let status = response.status().as_u16();
    let body = response
        .text()
        .await
        .unwrap_or_else(|_| "Unknown error".to_string());
    CalendarError::Api { status, body }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct FreeBusyRequest<'a> {
    time_min: String,
    time_max: String,
    time_zone: &'static str,
    items: [FreeBusyItem<'a>; 1],
}

#[derive(Serialize)]
struct FreeBusyItem<'a> {
    id: &'a str,
}

#[derive(Deserialize)]
struct FreeBusyResponse {
    #[serde(default)]
    calendars: HashMap<String, FreeBusyCalendar>,
}

#[derive(Deserialize)]
struct FreeBusyCalendar {
    #[serde(default)]
    busy: Vec<TimePeriod>,
    #[serde(default)]
    errors: Vec<FreeBusyError>,
}

#[derive(Deserialize)]
struct TimePeriod {
    start: String,
    end: String,
}

#[derive(Deserialize)]
struct FreeBusyError {
    #[serde(default)]
    domain: String,
    #[serde(default)]
    reason: String,
}

#[derive(Serialize)]
struct EventBody<'a> {
    id: &'a str,
    summary: &'a str,
    description: &'a str,
    start: EventTime,
    end: EventTime,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct EventTime {
    date_time: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreatedEvent {
    id: String,
    html_link: Option<String>,
}

#[async_trait]
impl CalendarProvider for GoogleCalendar {
    async fn list_busy(&self, calendar_id: &str, range: Span) -> Result<Vec<Span>, CalendarError> {
        let body = FreeBusyRequest {
            time_min: rfc3339(range.start)?,
            time_max: rfc3339(range.end)?,
            time_zone: "UTC",
            items: [FreeBusyItem { id: calendar_id }],
        };
        let response = self
            .client
            .post(format!("{}/freeBusy", self.base_url))
            .bearer_auth(&self.access_token)
            .json(&body)
            .send()
            .await
            .map_err(transport)?;

        if !response.status().is_success() {
            return Err(api_error(response).await);
        }

        let parsed: FreeBusyResponse = response
            .json()
            .await
            .map_err(|e| CalendarError::Malformed(e.to_string()))?;
        let calendar = parsed.calendars.get(calendar_id).ok_or_else(|| {
            CalendarError::Malformed(format!("calendar '{calendar_id}' missing from freeBusy response"))
        })?;

        // Google reports per-calendar failures (notFound, forbidden) inline with a 200
        if let Some(err) = calendar.errors.first() {
            return Err(CalendarError::Rejected(format!("{}: {}", err.domain, err.reason)));
        }

        let mut busy = Vec::with_capacity(calendar.busy.len());
        for period in &calendar.busy {
            let start = parse_instant(&period.start)?;
            let end = parse_instant(&period.end)?;
            match Span::try_new(start, end) {
                Some(span) => busy.push(span),
                None => warn!(
                    calendar = calendar_id,
                    start = %period.start,
                    end = %period.end,
                    "dropping empty busy period"
                ),
            }
        }
        Ok(busy)
    }

    async fn create_event(&self, calendar_id: &str, event: &NewEvent) -> Result<EventRef, CalendarError> {
        let body = EventBody {
            id: &event.key,
            summary: &event.title,
            description: &event.description,
            start: EventTime { date_time: rfc3339(event.span.start)? },
            end: EventTime { date_time: rfc3339(event.span.end)? },
        };
        let response = self
            .client
            .post(self.events_url(calendar_id))
            .bearer_auth(&self.access_token)
            .json(&body)
            .send()
            .await
            .map_err(transport)?;

        // Event id already taken: an earlier attempt got through
        if response.status() == StatusCode::CONFLICT {
            return Ok(EventRef {
                id: event.key.clone(),
                html_link: None,
            });
        }
        if !response.status().is_success() {
            return Err(api_error(response).await);
        }

        let created: CreatedEvent = response
            .json()
            .await
            .map_err(|e| CalendarError::Malformed(e.to_string()))?;
        Ok(EventRef {
            id: created.id,
            html_link: created.html_link,
        })
    }

    async fn delete_event(&self, calendar_id: &str, event_id: &str) -> Result<(), CalendarError> {
        let url = format!("{}/{}", self.events_url(calendar_id), urlencoding::encode(event_id));
        let response = self
            .client
            .delete(url)
            .bearer_auth(&self.access_token)
            .send()
            .await
            .map_err(transport)?;

        match response.status() {
            s if s.is_success() => Ok(()),
            StatusCode::NOT_FOUND | StatusCode::GONE => Ok(()),
            _ => Err(api_error(response).await),
        }
    }
}
