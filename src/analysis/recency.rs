use chrono::{
    DateTime, Duration, FixedOffset, NaiveDateTime, SecondsFormat, SubsecRound, TimeZone, Utc,
};
use chrono_tz::Tz;
use std::sync::{Arc, Mutex};

pub const DEFAULT_TIMEZONE: Tz = chrono_tz::Europe::Zurich;
const SECONDS_PER_DAY: i64 = 86_400;

/// Time source for every day computation. Reads "now" in a fixed reference timezone.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Tz>;
    fn timezone(&self) -> Tz;
}

#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    tz: Tz,
}

impl SystemClock {
    pub fn new(tz: Tz) -> Self {
        Self { tz }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new(DEFAULT_TIMEZONE)
    }
}

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Tz> {
        Utc::now().with_timezone(&self.tz)
    }

    fn timezone(&self) -> Tz {
        self.tz
    }
}

/// Settable clock; clones share the same instant.
#[derive(Debug, Clone)]
pub struct ManualClock {
    tz: Tz,
    instant: Arc<Mutex<DateTime<Utc>>>,
}

impl ManualClock {
    pub fn new(at: DateTime<Tz>) -> Self {
        Self {
            tz: at.timezone(),
            instant: Arc::new(Mutex::new(at.with_timezone(&Utc))),
        }
    }

    pub fn set(&self, at: DateTime<Tz>) {
        let mut lock = self.instant.lock().unwrap_or_else(|p| p.into_inner());
        *lock = at.with_timezone(&Utc);
    }

    pub fn advance(&self, by: Duration) {
        let mut lock = self.instant.lock().unwrap_or_else(|p| p.into_inner());
        *lock += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Tz> {
        let lock = self.instant.lock().unwrap_or_else(|p| p.into_inner());
        lock.with_timezone(&self.tz)
    }

    fn timezone(&self) -> Tz {
        self.tz
    }
}

/// Whole days elapsed since the last visit, or `Never` when no visit is on record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DaysSince {
    Never,
    Days(i64),
}

impl DaysSince {
    pub fn as_option(self) -> Option<i64> {
        match self {
            DaysSince::Never => None,
            DaysSince::Days(days) => Some(days),
        }
    }
}

/// Days since `last_visit` as seen from `now`, floored to whole days.
pub fn days_since_last_visit(
    last_visit: Option<DateTime<FixedOffset>>,
    now: DateTime<Tz>,
) -> DaysSince {
    match last_visit {
        None => DaysSince::Never,
        Some(visited_at) => {
            let elapsed = now.fixed_offset().signed_duration_since(visited_at);
            DaysSince::Days(elapsed.num_seconds().div_euclid(SECONDS_PER_DAY))
        }
    }
}

/// Timestamp stored for a visit made at `now` (microsecond precision).
pub fn visit_timestamp(now: DateTime<Tz>) -> DateTime<FixedOffset> {
    now.fixed_offset().trunc_subsecs(6)
}

/// Interpret a naive timestamp as wall-clock time in `tz`.
pub fn attach_timezone(naive: NaiveDateTime, tz: Tz) -> DateTime<FixedOffset> {
    match tz.from_local_datetime(&naive).earliest() {
        Some(local) => local.fixed_offset(),
        // Skipped by a spring-forward jump: shift past the gap, 02:30 becomes 03:30.
        None => tz
            .from_local_datetime(&(naive + Duration::hours(1)))
            .earliest()
            .unwrap_or_else(|| tz.from_utc_datetime(&naive))
            .fixed_offset(),
    }
}

/// Parse an ISO-8601 timestamp. Values without an offset get `tz` attached.
pub fn parse_timestamp(raw: &str, tz: Tz) -> Option<DateTime<FixedOffset>> {
    let raw = raw.trim();
    if let Ok(aware) = DateTime::parse_from_rfc3339(raw) {
        return Some(aware);
    }

    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .map(|naive| attach_timezone(naive, tz))
}

pub fn format_timestamp(ts: &DateTime<FixedOffset>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, false)
}
