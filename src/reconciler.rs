use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::engine::{Engine, SyncTask};

/// Background task that retries outstanding external calendar work: pending
/// bookings without an event, cancelled bookings whose event is still there.
pub async fn run_sync_reconciler(engine: Arc<Engine>, period: Duration, shutdown: CancellationToken) {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = interval.tick() => {}
            _ = shutdown.cancelled() => break,
        }
        let settled = reconcile_once(&engine).await;
        if settled > 0 {
            info!(settled, "external calendar backlog reconciled");
        }
    }
    debug!("sync reconciler stopped");
}

/// One pass over the backlog. Returns the number of items settled.
pub async fn reconcile_once(engine: &Engine) -> usize {
    let mut settled = 0;
    for task in engine.collect_sync_backlog().await {
        match engine.retry_sync(task).await {
            Ok(true) => settled += 1,
            Ok(false) => {}
            // Booking may have vanished from under us; nothing to retry.
            Err(e) => {
                let id = match task {
                    SyncTask::Create(id) | SyncTask::Remove(id) => id,
                };
                warn!(booking = %id, error = %e, "sync retry failed");
            }
        }
    }
    settled
}

/// Background task that compacts the WAL once enough appends accumulate.
pub async fn run_compactor(engine: Arc<Engine>, threshold: u64, shutdown: CancellationToken) {
    let mut interval = tokio::time::interval(Duration::from_secs(30));
    loop {
        tokio::select! {
            _ = interval.tick() => {}
            _ = shutdown.cancelled() => break,
        }
        let appends = engine.wal_appends_since_compact().await;
        if appends < threshold {
            continue;
        }
        match engine.compact_wal().await {
            Ok(()) => info!(appends, "WAL compacted"),
            Err(e) => warn!(error = %e, "WAL compaction failed"),
        }
    }
    debug!("compactor stopped");
}
