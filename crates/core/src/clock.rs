//! Injectable time source.
//!
//! Everything time-dependent (TTL expiry, retention, share lifetimes, job
//! run stamps) reads the clock through this trait so tests can pin it.

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Datelike, Duration, SecondsFormat, Utc};

use crate::error::Error;

/// Latest year a stored timestamp may carry.
///
/// Past four digits the RFC 3339 form gains a `+` sign and stops sorting
/// after present-day values.
const MAX_STORED_YEAR: i32 = 9999;

/// A source of the current UTC time.
pub trait Clock: Send + Sync + std::fmt::Debug {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock time.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that only moves when told to.
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Arc<Mutex<DateTime<Utc>>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self { now: Arc::new(Mutex::new(start)) }
    }

    pub fn set(&self, at: DateTime<Utc>) {
        *self.now.lock().unwrap_or_else(|e| e.into_inner()) = at;
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *now += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Format a timestamp for storage.
///
/// Fixed microsecond precision with a `Z` suffix keeps stored values
/// lexicographically ordered, which the SQL range comparisons rely on.
pub fn to_db_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// The instant `ttl` after `now`.
///
/// Fails with `InvalidInput` when the result overflows or lands past the
/// last storable year.
pub fn expiry_after(now: DateTime<Utc>, ttl: std::time::Duration) -> Result<DateTime<Utc>, Error> {
    let out_of_range = || Error::InvalidInput(format!("ttl of {}s is out of range", ttl.as_secs()));
    let ttl = Duration::from_std(ttl).map_err(|_| out_of_range())?;
    now.checked_add_signed(ttl)
        .filter(|at| at.year() <= MAX_STORED_YEAR)
        .ok_or_else(out_of_range)
}

/// The instant `age` before `now`, for retention cutoffs.
pub fn cutoff_before(now: DateTime<Utc>, age: Duration) -> Result<DateTime<Utc>, Error> {
    now.checked_sub_signed(age)
        .filter(|at| at.year() >= 1)
        .ok_or_else(|| Error::InvalidInput(format!("retention of {}s is out of range", age.num_seconds())))
}

/// Parse a stored timestamp back into UTC.
pub fn from_db_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw).ok().map(|dt| dt.with_timezone(&Utc))
}
