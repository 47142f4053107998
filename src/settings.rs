use std::time::Duration;

/// Policy knobs supplied by the studio's settings service. Read once at
/// startup and injected into the engine.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Completed trial visits (attended or no-show) allowed per person.
    pub max_trials_per_person: u32,
    /// How many days back attendance may still be marked.
    pub attendance_backfill_days: i64,
    /// Bound on slot-lock acquisition before surfacing a retryable Busy.
    pub lock_wait: Duration,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            max_trials_per_person: 2,
            attendance_backfill_days: 3,
            lock_wait: Duration::from_millis(2000),
        }
    }
}

impl Settings {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            max_trials_per_person: env_parse("BATCHD_MAX_TRIALS")
                .unwrap_or(defaults.max_trials_per_person),
            attendance_backfill_days: env_parse("BATCHD_ATTENDANCE_BACKFILL_DAYS")
                .unwrap_or(defaults.attendance_backfill_days),
            lock_wait: env_parse("BATCHD_LOCK_WAIT_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.lock_wait),
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|s| s.parse().ok())
}
