//! Ringside: coach availability and booking core for a boxing gym.
//!
//! Availability is computed from internal bookings plus an optional external
//! calendar; reservations are serialized per coach and recorded in a local
//! write-ahead log, which is the system of record.

pub mod auth;
pub mod calendar;
pub mod config;
pub mod engine;
pub mod error;
pub mod limits;
pub mod model;
pub mod notifications;
pub mod notify;
pub mod observability;
pub mod reconciler;
pub mod routes;
pub mod timezone;
pub mod wal;

use std::sync::Arc;

use config::Config;
use engine::Engine;

/// Shared application state.
pub struct AppState {
    pub config: Config,
    pub engine: Arc<Engine>,
}
