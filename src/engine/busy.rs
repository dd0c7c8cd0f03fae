use tracing::warn;

use crate::calendar::CalendarError;
use crate::model::*;
use crate::observability;

use super::{Engine, SharedCoachState, Warning};

/// Busy intervals for one coach over one window, from both sources.
#[derive(Debug, Clone, Default)]
pub struct BusySet {
    /// Plain union of internal and external intervals, unmerged.
    pub intervals: Vec<BusyInterval>,
    /// Set when the external leg failed and only internal bookings are known.
    pub degraded: Option<Warning>,
}

impl Engine {
    /// Union of the coach's active bookings and its external calendar's busy
    /// periods intersecting `window`.
    ///
    /// Both sources are queried concurrently. The external leg is bounded by
    /// the calendar timeout; any failure there degrades to internal-only.
    pub async fn aggregate_busy(&self, coach: &SharedCoachState, window: Span) -> BusySet {
        let (coach_id, calendar_id) = {
            let guard = coach.read().await;
            (guard.config.id, guard.config.calendar_id.clone())
        };

        let internal = async {
            let guard = coach.read().await;
            guard
                .active_overlapping(&window)
                .map(|b| BusyInterval::internal(b.span))
                .collect::<Vec<_>>()
        };
        let external = async {
            match calendar_id.as_deref() {
                Some(calendar_id) => Some(self.external_busy(calendar_id, window).await),
                None => None,
            }
        };
        let (mut intervals, external) = tokio::join!(internal, external);

        let degraded = match external {
            None => None,
            Some(Ok(spans)) => {
                intervals.extend(spans.into_iter().map(BusyInterval::external));
                None
            }
            Some(Err(e)) => {
                warn!(coach = %coach_id, error = %e, "external busy query degraded, using internal bookings only");
                metrics::counter!(observability::EXTERNAL_QUERY_DEGRADED_TOTAL).increment(1);
                Some(Warning::ExternalQueryDegraded {
                    reason: e.to_string(),
                })
            }
        };

        BusySet { intervals, degraded }
    }

    async fn external_busy(&self, calendar_id: &str, window: Span) -> Result<Vec<Span>, CalendarError> {
        self.bounded(self.calendar.list_busy(calendar_id, window)).await
    }
}
