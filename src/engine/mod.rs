mod availability;
mod busy;
mod conflict;
mod directory;
mod error;
mod mutations;
mod queries;

pub use availability::{merge_overlapping, slots, Slots};
pub use busy::BusySet;
pub use directory::{CoachDirectory, CoachRegistry};
pub use error::{EngineError, Warning};
pub use mutations::{CoachProfile, Reservation, ReservationRequest, SyncTask};
pub use queries::Availability;

use std::future::Future;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot, Mutex, OwnedRwLockWriteGuard, RwLock};
use ulid::Ulid;

use crate::calendar::{CalendarError, CalendarProvider, DisabledCalendar};
use crate::model::*;
use crate::notifications::{ClientNotifier, LogNotifier};
use crate::notify::NotifyHub;
use crate::observability;
use crate::timezone::VenueClock;
use crate::wal::Wal;

pub type SharedCoachState = Arc<RwLock<CoachState>>;

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

type PendingAppend = (Event, oneshot::Sender<io::Result<()>>);

/// Background task that owns the WAL and batches appends for group commit.
/// 1. Block until the first Append arrives.
/// 2. Drain all immediately available Appends into the batch.
/// 3. One flush + fsync for the whole batch.
/// 4. Answer every sender with the batch result.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            WalCommand::Append { event, response } => {
                let mut batch = vec![(event, response)];
                let mut deferred = None;
                loop {
                    match rx.try_recv() {
                        Ok(WalCommand::Append { event, response }) => batch.push((event, response)),
                        Ok(other) => {
                            deferred = Some(other);
                            break;
                        }
                        Err(_) => break,
                    }
                }
                commit_batch(&mut wal, batch);
                if let Some(other) = deferred {
                    handle_non_append(&mut wal, other);
                }
            }
            other => handle_non_append(&mut wal, other),
        }
    }
}

fn commit_batch(wal: &mut Wal, batch: Vec<PendingAppend>) {
    metrics::histogram!(observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let flush_start = std::time::Instant::now();

    let result = batch
        .iter()
        .try_for_each(|(event, _)| wal.append_buffered(event))
        .and_then(|()| wal.flush_sync());
    metrics::histogram!(observability::WAL_FLUSH_DURATION_SECONDS)
        .record(flush_start.elapsed().as_secs_f64());

    // A failed batch is answered as failed, so none of it may survive on disk.
    if let Err(e) = &result {
        tracing::error!(error = %e, events = batch.len(), "WAL flush failed, rolling back batch");
        if let Err(rollback) = wal.rollback() {
            tracing::error!(error = %rollback, "WAL rollback failed");
        }
    }
    for (_, tx) in batch {
        let r = match &result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result = Wal::write_compact_file(wal.path(), &events)
                .and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { event, response } => commit_batch(wal, vec![(event, response)]),
    }
}

/// Engine-wide knobs, fixed at construction.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub clock: VenueClock,
    /// Distance between candidate slot starts.
    pub slot_step: Ms,
    /// Upper bound on every external calendar call.
    pub calendar_timeout: Duration,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            clock: VenueClock::default(),
            slot_step: 30 * MINUTE_MS,
            calendar_timeout: Duration::from_secs(3),
        }
    }
}

/// Injected dependencies. Calendar and notifier are external systems and
/// never the system of record; the directory resolves coach identity.
#[derive(Clone)]
pub struct Collaborators {
    pub calendar: Arc<dyn CalendarProvider>,
    pub notifier: Arc<dyn ClientNotifier>,
    pub directory: Arc<dyn CoachDirectory>,
}

impl Default for Collaborators {
    fn default() -> Self {
        Self {
            calendar: Arc::new(DisabledCalendar),
            notifier: Arc::new(LogNotifier),
            directory: Arc::new(CoachRegistry::new()),
        }
    }
}

pub struct Engine {
    pub(super) coaches: DashMap<Ulid, SharedCoachState>,
    pub(super) directory: Arc<dyn CoachDirectory>,
    /// Reverse lookup: booking id → coach id
    pub(super) booking_to_coach: DashMap<Ulid, Ulid>,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    pub notify: Arc<NotifyHub>,
    pub(super) calendar: Arc<dyn CalendarProvider>,
    pub(super) notifier: Arc<dyn ClientNotifier>,
    pub(super) settings: EngineSettings,
    /// Serializes coach registration and compaction snapshots.
    pub(super) registration: Mutex<()>,
}

/// Apply an event directly to a CoachState (no locking — caller holds the lock).
fn apply_to_coach(cs: &mut CoachState, event: &Event, booking_map: &DashMap<Ulid, Ulid>) {
    match event {
        Event::CoachUpdated { coach } => {
            cs.config = coach.clone();
        }
        Event::BookingPlaced { booking } => {
            booking_map.insert(booking.id, booking.coach_id);
            cs.insert_booking(booking.clone());
        }
        Event::BookingConfirmed { id, external, .. } => {
            if let Some(b) = cs.booking_mut(id) {
                match b.status {
                    BookingStatus::Pending => {
                        b.status = BookingStatus::Confirmed;
                        b.external = external.clone();
                    }
                    // Sync finished after cancellation: the event exists and must go.
                    BookingStatus::Cancelled if external.is_some() => {
                        b.external = external.clone();
                        b.external_cleanup_pending = true;
                    }
                    _ => {}
                }
            }
        }
        Event::BookingCancelled {
            id,
            reason,
            cancelled_at,
            ..
        } => {
            if let Some(b) = cs.booking_mut(id) {
                b.status = BookingStatus::Cancelled;
                b.cancel_reason = reason.clone();
                b.cancelled_at = Some(*cancelled_at);
                b.external_cleanup_pending = b.external.is_some();
            }
        }
        Event::ExternalEventRemoved { id, .. } => {
            if let Some(b) = cs.booking_mut(id) {
                b.external_cleanup_pending = false;
            }
        }
        // Registration is handled at the DashMap level
        Event::CoachRegistered { .. } => {}
    }
}

impl Engine {
    pub fn new(
        wal_path: PathBuf,
        notify: Arc<NotifyHub>,
        collaborators: Collaborators,
        settings: EngineSettings,
    ) -> io::Result<Self> {
        let (wal, events) = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let engine = Self {
            coaches: DashMap::new(),
            directory: collaborators.directory,
            booking_to_coach: DashMap::new(),
            wal_tx,
            notify,
            calendar: collaborators.calendar,
            notifier: collaborators.notifier,
            settings,
            registration: Mutex::new(()),
        };

        // Sole owner of every Arc during replay, so try_write never contends.
        for event in &events {
            match event {
                Event::CoachRegistered { coach } => {
                    engine.directory.insert(&coach.slug, coach.id);
                    engine
                        .coaches
                        .insert(coach.id, Arc::new(RwLock::new(CoachState::new(coach.clone()))));
                }
                other => {
                    let Some(entry) = engine.coaches.get(&other.coach_id()) else {
                        tracing::warn!(coach = %other.coach_id(), "WAL event for unknown coach skipped");
                        continue;
                    };
                    let cs = entry.value().clone();
                    let Ok(mut guard) = cs.try_write() else {
                        return Err(io::Error::other("coach state locked during replay"));
                    };
                    apply_to_coach(&mut guard, other, &engine.booking_to_coach);
                }
            }
        }

        metrics::gauge!(observability::COACHES_ACTIVE).set(engine.coaches.len() as f64);
        tracing::info!(
            path = %wal_path.display(),
            events = events.len(),
            coaches = engine.coaches.len(),
            bookings = engine.booking_to_coach.len(),
            "engine state replayed"
        );
        Ok(engine)
    }

    pub fn clock(&self) -> &VenueClock {
        &self.settings.clock
    }

    /// Write event to WAL via the background group-commit writer.
    async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| EngineError::Storage("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::Storage("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::Storage(e.to_string()))
    }

    /// WAL-append + apply + broadcast. Caller holds the coach's write lock.
    pub(super) async fn persist_and_apply(
        &self,
        coach_id: Ulid,
        cs: &mut CoachState,
        event: &Event,
    ) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        apply_to_coach(cs, event, &self.booking_to_coach);
        self.notify.send(coach_id, event);
        Ok(())
    }

    pub(super) fn get_coach_state(&self, id: &Ulid) -> Option<SharedCoachState> {
        self.coaches.get(id).map(|e| e.value().clone())
    }

    /// Coach key (slug or id) → id + state.
    pub(super) fn resolve_coach(&self, key: &str) -> Result<(Ulid, SharedCoachState), EngineError> {
        let not_found = || EngineError::NotFound(format!("coach '{key}'"));
        let id = self.directory.resolve(key).ok_or_else(not_found)?;
        let cs = self.get_coach_state(&id).ok_or_else(not_found)?;
        Ok((id, cs))
    }

    pub(super) fn coach_for_booking(&self, booking_id: &Ulid) -> Result<(Ulid, SharedCoachState), EngineError> {
        let not_found = || EngineError::NotFound(format!("booking {booking_id}"));
        let coach_id = self
            .booking_to_coach
            .get(booking_id)
            .map(|e| *e.value())
            .ok_or_else(not_found)?;
        let cs = self.get_coach_state(&coach_id).ok_or_else(not_found)?;
        Ok((coach_id, cs))
    }

    /// Lookup booking → coach, acquire the coach's write lock.
    pub(super) async fn resolve_booking_write(
        &self,
        booking_id: &Ulid,
    ) -> Result<(Ulid, OwnedRwLockWriteGuard<CoachState>), EngineError> {
        let (coach_id, cs) = self.coach_for_booking(booking_id)?;
        Ok((coach_id, cs.write_owned().await))
    }

    /// Run a calendar call under the configured timeout.
    pub(super) async fn bounded<T>(
        &self,
        call: impl Future<Output = Result<T, CalendarError>>,
    ) -> Result<T, CalendarError> {
        let limit = self.settings.calendar_timeout;
        tokio::time::timeout(limit, call)
            .await
            .map_err(|_| CalendarError::Timeout(limit))?
    }
}
