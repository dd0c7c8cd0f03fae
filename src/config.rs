//! Process configuration, read once from the environment at startup.

use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::calendar::DEFAULT_API_BASE;
use crate::engine::EngineSettings;
use crate::model::MINUTE_MS;
use crate::timezone::VenueClock;

#[derive(Debug, Clone)]
pub struct Config {
    pub bind: String,
    pub port: u16,
    /// Directory holding `ringside.wal`.
    pub data_dir: PathBuf,
    pub clock: VenueClock,
    pub slot_step_minutes: u32,
    pub calendar_timeout: Duration,
    /// WAL appends before a compaction is triggered.
    pub compact_threshold: u64,
    pub reconcile_interval: Duration,
    pub metrics_port: Option<u16>,
    /// Admin routes answer 401 when unset.
    pub admin_token: Option<String>,
    pub log_json: bool,

    // --- External collaborators ---
    /// External calendar disabled when unset.
    pub google_access_token: Option<String>,
    pub google_api_base: String,
    /// Notifications are only logged when unset.
    pub notify_webhook_url: Option<String>,
}

impl Default for Config {
    /// Default config for testing only.
    fn default() -> Self {
        Self {
            bind: "127.0.0.1".to_string(),
            port: 8080,
            data_dir: PathBuf::from("./data"),
            clock: VenueClock::default(),
            slot_step_minutes: 30,
            calendar_timeout: Duration::from_millis(3000),
            compact_threshold: 1000,
            reconcile_interval: Duration::from_secs(60),
            metrics_port: None,
            admin_token: Some("test_admin_token".to_string()),
            log_json: false,
            google_access_token: None,
            google_api_base: DEFAULT_API_BASE.to_string(),
            notify_webhook_url: None,
        }
    }
}

impl Config {
    /// Load configuration from environment variables (and `.env` if present).
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from any key lookup. Empty values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let clock = match get("RINGSIDE_TIMEZONE") {
            Some(name) => VenueClock::from_name(&name).map_err(|e| ConfigError::Invalid {
                var: "RINGSIDE_TIMEZONE",
                reason: e.0,
            })?,
            None => VenueClock::default(),
        };

        let slot_step_minutes: u32 = positive_or(&get, "RINGSIDE_SLOT_STEP_MINUTES", 30)?;

        Ok(Self {
            bind: get("RINGSIDE_BIND").unwrap_or_else(|| "0.0.0.0".to_string()),
            port: parse_or(&get, "RINGSIDE_PORT", 8080)?,
            data_dir: PathBuf::from(get("RINGSIDE_DATA_DIR").unwrap_or_else(|| "./data".to_string())),
            clock,
            slot_step_minutes,
            calendar_timeout: Duration::from_millis(positive_or(&get, "RINGSIDE_CALENDAR_TIMEOUT_MS", 3000)?),
            compact_threshold: parse_or(&get, "RINGSIDE_COMPACT_THRESHOLD", 1000)?,
            reconcile_interval: Duration::from_secs(positive_or(&get, "RINGSIDE_RECONCILE_INTERVAL_SECS", 60)?),
            metrics_port: get("RINGSIDE_METRICS_PORT")
                .map(|v| parse("RINGSIDE_METRICS_PORT", &v))
                .transpose()?,
            admin_token: get("RINGSIDE_ADMIN_TOKEN"),
            log_json: get("RINGSIDE_LOG_JSON").is_some_and(|v| v == "1" || v.eq_ignore_ascii_case("true")),
            google_access_token: get("GOOGLE_CALENDAR_ACCESS_TOKEN"),
            google_api_base: get("GOOGLE_CALENDAR_API_BASE").unwrap_or_else(|| DEFAULT_API_BASE.to_string()),
            notify_webhook_url: get("RINGSIDE_NOTIFY_WEBHOOK_URL"),
        })
    }

    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join(crate::wal::WAL_FILE_NAME)
    }

    pub fn engine_settings(&self) -> EngineSettings {
        EngineSettings {
            clock: self.clock,
            slot_step: i64::from(self.slot_step_minutes) * MINUTE_MS,
            calendar_timeout: self.calendar_timeout,
        }
    }
}

fn parse<T: FromStr>(var: &'static str, raw: &str) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    raw.parse().map_err(|e: T::Err| ConfigError::Invalid {
        var,
        reason: format!("'{raw}': {e}"),
    })
}

fn parse_or<T: FromStr>(
    get: &impl Fn(&str) -> Option<String>,
    var: &'static str,
    default: T,
) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    match get(var) {
        Some(raw) => parse(var, &raw),
        None => Ok(default),
    }
}

/// Like `parse_or`, but zero is rejected.
fn positive_or<T: FromStr + PartialOrd + Default>(
    get: &impl Fn(&str) -> Option<String>,
    var: &'static str,
    default: T,
) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    let value = parse_or(get, var, default)?;
    if value <= T::default() {
        return Err(ConfigError::Invalid {
            var,
            reason: "must be positive".into(),
        });
    }
    Ok(value)
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for {var}: {reason}")]
    Invalid { var: &'static str, reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn defaults_when_unset() {
        let config = Config::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.bind, "0.0.0.0");
        assert_eq!(config.port, 8080);
        assert_eq!(config.clock.name(), "UTC");
        assert_eq!(config.slot_step_minutes, 30);
        assert_eq!(config.calendar_timeout, Duration::from_secs(3));
        assert_eq!(config.compact_threshold, 1000);
        assert!(config.admin_token.is_none());
        assert!(config.google_access_token.is_none());
        assert_eq!(config.google_api_base, DEFAULT_API_BASE);
        assert!(!config.log_json);
        assert_eq!(config.wal_path(), PathBuf::from("./data/ringside.wal"));
    }

    #[test]
    fn reads_values() {
        let config = Config::from_lookup(lookup(&[
            ("RINGSIDE_PORT", "9000"),
            ("RINGSIDE_TIMEZONE", "Europe/Amsterdam"),
            ("RINGSIDE_SLOT_STEP_MINUTES", "15"),
            ("RINGSIDE_CALENDAR_TIMEOUT_MS", "750"),
            ("RINGSIDE_METRICS_PORT", "9100"),
            ("RINGSIDE_ADMIN_TOKEN", " s3cret "),
            ("RINGSIDE_LOG_JSON", "TRUE"),
            ("RINGSIDE_NOTIFY_WEBHOOK_URL", ""),
        ]))
        .unwrap();
        assert_eq!(config.port, 9000);
        assert_eq!(config.clock.name(), "Europe/Amsterdam");
        assert_eq!(config.metrics_port, Some(9100));
        assert_eq!(config.admin_token.as_deref(), Some("s3cret"));
        assert!(config.log_json);
        assert!(config.notify_webhook_url.is_none());

        let settings = config.engine_settings();
        assert_eq!(settings.slot_step, 15 * MINUTE_MS);
        assert_eq!(settings.calendar_timeout, Duration::from_millis(750));
    }

    #[test]
    fn rejects_invalid_values() {
        let err = Config::from_lookup(lookup(&[("RINGSIDE_TIMEZONE", "Mars/Olympus")])).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { var: "RINGSIDE_TIMEZONE", .. }));

        let err = Config::from_lookup(lookup(&[("RINGSIDE_PORT", "eighty")])).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { var: "RINGSIDE_PORT", .. }));

        let err = Config::from_lookup(lookup(&[("RINGSIDE_SLOT_STEP_MINUTES", "0")])).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { var: "RINGSIDE_SLOT_STEP_MINUTES", .. }));

        let err = Config::from_lookup(lookup(&[("RINGSIDE_RECONCILE_INTERVAL_SECS", "0")])).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { var: "RINGSIDE_RECONCILE_INTERVAL_SECS", .. }));

        let err = Config::from_lookup(lookup(&[("RINGSIDE_CALENDAR_TIMEOUT_MS", "0")])).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { var: "RINGSIDE_CALENDAR_TIMEOUT_MS", .. }));
    }
}
