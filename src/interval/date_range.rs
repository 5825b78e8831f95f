use std::fmt;

use jiff::civil::{Date, DateTime};
use jiff::tz::TimeZone;
use jiff::{SignedDuration, Timestamp};
use log::info;

use crate::error::InputError;

/// Format used by the OASIS api for `startdatetime` and `enddatetime`.
pub const OASIS_FORMAT: &str = "%Y%m%dT%H:%M-0000";

/// Largest chunk length accepted, in days.
pub const MAX_DAYS_PER_CHUNK: i64 = 36_500;

/// Length of a chunk of `max_days` 24 hour days.
pub fn chunk_span(max_days: i64) -> Result<SignedDuration, InputError> {
    if !(1..=MAX_DAYS_PER_CHUNK).contains(&max_days) {
        return Err(InputError::ChunkSpan(max_days));
    }
    Ok(SignedDuration::from_secs(max_days * 86_400))
}

/// A half open interval `[start, end)` of UTC timestamps, with `start < end`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DateRange {
    start: Timestamp,
    end: Timestamp,
}

impl DateRange {
    pub fn new(start: Timestamp, end: Timestamp) -> Result<DateRange, InputError> {
        if start >= end {
            return Err(InputError::EmptyRange {
                start: format_oasis(start),
                end: format_oasis(end),
            });
        }
        Ok(DateRange { start, end })
    }

    /// Parse both ends with [`parse_timestamp`].
    pub fn parse(start: &str, end: &str) -> Result<DateRange, InputError> {
        DateRange::new(parse_timestamp(start)?, parse_timestamp(end)?)
    }

    pub fn start(&self) -> Timestamp {
        self.start
    }

    pub fn end(&self) -> Timestamp {
        self.end
    }

    pub fn span(&self) -> SignedDuration {
        self.end.duration_since(self.start)
    }

    /// Split this range into consecutive pieces at most `max_days` long.
    /// The last piece ends exactly where this range ends.  If the range
    /// already fits, it is returned as is.
    pub fn chunks(&self, max_days: i64) -> Result<Vec<DateRange>, InputError> {
        let max_span = chunk_span(max_days)?;
        if self.span() <= max_span {
            return Ok(vec![*self]);
        }
        info!(
            "Date range spans {} days. Breaking into chunks of maximum {} days.",
            self.span().as_hours() / 24,
            max_days
        );

        let mut out: Vec<DateRange> = Vec::new();
        let mut current = self.start;
        while current < self.end {
            let next = match current.checked_add(max_span) {
                Ok(ts) if ts < self.end => ts,
                _ => self.end,
            };
            out.push(DateRange {
                start: current,
                end: next,
            });
            current = next;
        }
        for (i, chunk) in out.iter().enumerate() {
            info!("  Chunk {}: {}", i + 1, chunk);
        }
        Ok(out)
    }
}

impl fmt::Display for DateRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} to {}",
            format_oasis(self.start),
            format_oasis(self.end)
        )
    }
}

/// Format a timestamp the way the OASIS api wants it, e.g. `20230919T07:00-0000`.
pub fn format_oasis(ts: Timestamp) -> String {
    ts.strftime(OASIS_FORMAT).to_string()
}

/// Parse user input into a timestamp.  Inputs without an offset are taken as UTC.
///
/// Accepts:
///  - `2023-09-19`, `20230919`
///  - `2023-09-19 07:00`, `2023-09-19T07:00`, with or without seconds
///  - `20230919T07:00-0000` (the api format, as found in config files)
///  - RFC 3339, e.g. `2023-09-19T07:00:00Z`
pub fn parse_timestamp(input: &str) -> Result<Timestamp, InputError> {
    let s = input.trim();
    if let Ok(ts) = s.parse::<Timestamp>() {
        return Ok(ts);
    }
    if let Ok(ts) = Timestamp::strptime("%Y%m%dT%H:%M%z", s) {
        return Ok(ts);
    }
    let naive = [
        "%Y-%m-%d %H:%M:%S",
        "%Y-%m-%d %H:%M",
        "%Y-%m-%dT%H:%M:%S",
        "%Y-%m-%dT%H:%M",
    ]
    .iter()
    .find_map(|fmt| DateTime::strptime(fmt, s).ok())
    .or_else(|| {
        ["%Y-%m-%d", "%Y%m%d"]
            .iter()
            .find_map(|fmt| Date::strptime(fmt, s).ok())
            .map(|d| d.at(0, 0, 0, 0))
    });
    match naive {
        Some(dt) => dt
            .to_zoned(TimeZone::UTC)
            .map(|z| z.timestamp())
            .map_err(|_| InputError::Date(input.to_string())),
        None => Err(InputError::Date(input.to_string())),
    }
}
