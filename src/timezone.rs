//! Venue-local civil time to absolute instants and back.
//!
//! Every coach and client shares the venue's single IANA zone, so the clock
//! is built once from configuration and copied into whoever needs it.

use chrono::{DateTime, LocalResult, NaiveDate, NaiveDateTime, NaiveTime, TimeDelta, TimeZone};
use chrono_tz::Tz;

use crate::model::{Ms, Span};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct TimeError(pub String);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VenueClock {
    tz: Tz,
}

impl Default for VenueClock {
    fn default() -> Self {
        Self { tz: Tz::UTC }
    }
}

impl VenueClock {
    pub fn new(tz: Tz) -> Self {
        Self { tz }
    }

    pub fn from_name(name: &str) -> Result<Self, TimeError> {
        name.trim()
            .parse::<Tz>()
            .map(Self::new)
            .map_err(|_| TimeError(format!("unknown timezone '{name}'")))
    }

    pub fn tz(&self) -> Tz {
        self.tz
    }

    pub fn name(&self) -> &'static str {
        self.tz.name()
    }

    /// Strict `YYYY-MM-DD`.
    pub fn parse_date(s: &str) -> Result<NaiveDate, TimeError> {
        NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d")
            .map_err(|_| TimeError(format!("invalid date '{s}', expected YYYY-MM-DD")))
    }

    /// Strict 24-hour `HH:mm`.
    pub fn parse_time(s: &str) -> Result<NaiveTime, TimeError> {
        let s = s.trim();
        if s.len() != 5 {
            return Err(TimeError(format!("invalid time '{s}', expected HH:mm")));
        }
        NaiveTime::parse_from_str(s, "%H:%M")
            .map_err(|_| TimeError(format!("invalid time '{s}', expected HH:mm")))
    }

    /// Local civil date + time → Unix ms.
    ///
    /// Ambiguous times (DST fall-back) resolve to the earlier instant; times
    /// inside a spring-forward gap do not exist and are rejected.
    pub fn to_instant(&self, date: NaiveDate, time: NaiveTime) -> Result<Ms, TimeError> {
        let local = date.and_time(time);
        match self.tz.from_local_datetime(&local) {
            LocalResult::Single(dt) => Ok(dt.timestamp_millis()),
            LocalResult::Ambiguous(earliest, _) => Ok(earliest.timestamp_millis()),
            LocalResult::None => Err(TimeError(format!(
                "{local} does not exist in {}",
                self.tz.name()
            ))),
        }
    }

    /// Parse and resolve `("2025-03-14", "09:30")` in one step.
    pub fn local_instant(&self, date: &str, time: &str) -> Result<Ms, TimeError> {
        self.to_instant(Self::parse_date(date)?, Self::parse_time(time)?)
    }

    /// The local calendar day as an absolute `[start, end)` span. 23 or 25
    /// hours long on DST transition days.
    pub fn day_bounds(&self, date: NaiveDate) -> Result<Span, TimeError> {
        let next = date
            .succ_opt()
            .ok_or_else(|| TimeError(format!("date {date} out of range")))?;
        let start = self.start_of_day(date)?;
        let end = self.start_of_day(next)?;
        Span::try_new(start, end).ok_or_else(|| TimeError(format!("empty day {date}")))
    }

    /// First existing instant of the local day. Some zones skip midnight itself.
    fn start_of_day(&self, date: NaiveDate) -> Result<Ms, TimeError> {
        let midnight = date.and_time(NaiveTime::MIN);
        let mut probe: NaiveDateTime = midnight;
        for _ in 0..4 {
            if let Some(dt) = self.tz.from_local_datetime(&probe).earliest() {
                return Ok(dt.timestamp_millis());
            }
            probe += TimeDelta::minutes(30);
        }
        Err(TimeError(format!("no start of day for {date} in {}", self.tz.name())))
    }

    /// Whether the local wall-clock reading of `ms` resolves back to `ms`.
    /// False on the second pass through a repeated fall-back hour, since that
    /// label always resolves to the first pass.
    pub fn round_trips(&self, ms: Ms) -> bool {
        DateTime::from_timestamp_millis(ms)
            .map(|dt| dt.with_timezone(&self.tz).naive_local())
            .and_then(|local| self.to_instant(local.date(), local.time()).ok())
            == Some(ms)
    }

    /// Unix ms → local `HH:mm`.
    pub fn format_hhmm(&self, ms: Ms) -> String {
        self.format(ms, "%H:%M")
    }

    /// Unix ms → local `YYYY-MM-DD`.
    pub fn format_date(&self, ms: Ms) -> String {
        self.format(ms, "%Y-%m-%d")
    }

    /// Unix ms → RFC 3339 with the venue offset.
    pub fn format_rfc3339(&self, ms: Ms) -> String {
        DateTime::from_timestamp_millis(ms)
            .map(|dt| dt.with_timezone(&self.tz).to_rfc3339())
            .unwrap_or_default()
    }

    fn format(&self, ms: Ms, fmt: &str) -> String {
        DateTime::from_timestamp_millis(ms)
            .map(|dt| dt.with_timezone(&self.tz).format(fmt).to_string())
            .unwrap_or_default()
    }
}
