//! Clock Abstraction for the Run Timestamp
//!
//! A single timestamp is captured when a run starts. It names every output
//! key of the run and stamps the `_sdc_*` metadata columns of every record,
//! so it is taken through this trait rather than read ad hoc.
//!
//! Implementations:
//! - `SystemClock`: real wall-clock time
//! - `FixedClock`: pinned instant for tests

use chrono::{DateTime, FixedOffset, TimeZone, Timelike, Utc};
use std::fmt::Display;

/// Clock trait for the run timestamp
pub trait RunClock: Send + Sync {
    /// Current instant expressed in the given offset
    fn now(&self, offset: FixedOffset) -> DateTime<FixedOffset>;
}

/// Production clock using real system time
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl RunClock for SystemClock {
    fn now(&self, offset: FixedOffset) -> DateTime<FixedOffset> {
        Utc::now().with_timezone(&offset)
    }
}

/// Clock pinned to a single instant
///
/// Time never advances, which keeps rendered keys and metadata values stable
/// across assertions.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock {
    instant: DateTime<Utc>,
}

impl FixedClock {
    pub fn new(instant: DateTime<Utc>) -> Self {
        FixedClock { instant }
    }

    /// Parse an RFC 3339 timestamp such as `2022-04-29T07:39:38.321056+01:00`
    pub fn from_rfc3339(value: &str) -> Result<Self, chrono::ParseError> {
        let parsed = DateTime::parse_from_rfc3339(value)?;
        Ok(FixedClock::new(parsed.with_timezone(&Utc)))
    }
}

impl RunClock for FixedClock {
    fn now(&self, offset: FixedOffset) -> DateTime<FixedOffset> {
        self.instant.with_timezone(&offset)
    }
}

/// ISO 8601 rendering that prints fractional seconds only when non-zero.
///
/// `sep` separates date and time; the numeric offset (`+00:00`) is appended
/// when `with_offset` is set.
pub fn isoformat<Tz: TimeZone>(dt: &DateTime<Tz>, sep: char, with_offset: bool) -> String
where
    Tz::Offset: Display,
{
    let mut out = format!("{}{}{}", dt.format("%Y-%m-%d"), sep, dt.format("%H:%M:%S"));

    // nanosecond() exceeds 1e9 during a leap second
    let micros = (dt.nanosecond() / 1_000) % 1_000_000;
    if micros != 0 {
        out.push_str(&format!(".{:06}", micros));
    }
    if with_offset {
        out.push_str(&dt.format("%:z").to_string());
    }
    out
}
