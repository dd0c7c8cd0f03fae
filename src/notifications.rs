//! Client notification collaborator (email/SMS relay).
//!
//! Delivery is fire-and-forget from the engine's point of view: messages are
//! dispatched on spawned tasks after the booking change has committed.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use serde_json::json;

use crate::model::{Booking, CoachScheduleConfig};
use crate::timezone::VenueClock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    Email,
    Sms,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Template {
    BookingConfirmation,
    BookingCancellation,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Notification {
    pub channel: Channel,
    pub address: String,
    pub template: Template,
    pub data: serde_json::Value,
}

#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("notification relay unreachable: {0}")]
    Transport(String),

    #[error("notification relay returned {0}")]
    Rejected(u16),
}

#[async_trait]
pub trait ClientNotifier: Send + Sync {
    async fn notify(&self, notification: &Notification) -> Result<(), NotifyError>;
}

/// Used when no relay is configured.
#[derive(Debug, Default)]
pub struct LogNotifier;

#[async_trait]
impl ClientNotifier for LogNotifier {
    async fn notify(&self, n: &Notification) -> Result<(), NotifyError> {
        tracing::info!(
            channel = ?n.channel,
            template = ?n.template,
            address = %n.address,
            "notification (no relay configured)"
        );
        Ok(())
    }
}

/// POSTs each notification as JSON to a relay that owns templates and providers.
pub struct WebhookNotifier {
    client: Client,
    url: String,
}

impl WebhookNotifier {
    pub fn new(url: String, timeout: Duration) -> Result<Self, NotifyError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| NotifyError::Transport(e.to_string()))?;
        Ok(Self { client, url })
    }
}

#[async_trait]
impl ClientNotifier for WebhookNotifier {
    async fn notify(&self, n: &Notification) -> Result<(), NotifyError> {
        let response = self
            .client
            .post(&self.url)
            .json(n)
            .send()
            .await
            .map_err(|e| NotifyError::Transport(e.to_string()))?;
        if !response.status().is_success() {
            return Err(NotifyError::Rejected(response.status().as_u16()));
        }
        Ok(())
    }
}

/// Messages for a booking change: always email, SMS only with a phone number.
pub fn booking_messages(
    booking: &Booking,
    coach: &CoachScheduleConfig,
    clock: &VenueClock,
    template: Template,
) -> Vec<Notification> {
    let data = json!({
        "booking_id": booking.id.to_string(),
        "client_name": booking.client.name,
        "coach": coach.label(),
        "date": clock.format_date(booking.span.start),
        "time": clock.format_hhmm(booking.span.start),
        "end_time": clock.format_hhmm(booking.span.end),
        "timezone": clock.name(),
        "reason": booking.cancel_reason,
        "calendar_link": booking.external.as_ref().and_then(|e| e.link.clone()),
    });

    let mut out = vec![Notification {
        channel: Channel::Email,
        address: booking.client.email.clone(),
        template,
        data: data.clone(),
    }];
    if let Some(phone) = booking.client.phone.as_deref().filter(|p| !p.is_empty()) {
        out.push(Notification {
            channel: Channel::Sms,
            address: phone.to_string(),
            template,
            data,
        });
    }
    out
}
