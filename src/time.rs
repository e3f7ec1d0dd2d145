//! Time handling for the price API: query windows, the two timestamp formats
//! used on the wire and in documents, and the period resolution.

use chrono::{DateTime, Duration, NaiveDateTime, SubsecRound, TimeZone, Timelike, Utc};

use crate::error::{EntsoeError, ParseError};

/// Seconds per query window.
pub const ONE_DAY: i64 = 86_400;

/// Format of `periodStart` / `periodEnd` query parameters.
const WIRE_FORMAT: &str = "%Y%m%d%H00";
/// Format of the `timeInterval` timestamps inside a price document.
const DOCUMENT_FORMAT: &str = "%Y-%m-%dT%H:%MZ";

/// Half-open interval `[start, end)` of UTC instants to request prices for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeWindow {
    start: DateTime<Utc>,
    end: DateTime<Utc>,
}

impl TimeWindow {
    /// Creates a window, rejecting empty and inverted intervals and ends
    /// that are not on a whole UTC hour.
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Self, EntsoeError> {
        for instant in [start, end] {
            if !is_whole_hour(&instant) {
                return Err(EntsoeError::UnalignedWindow { instant });
            }
        }

        if start < end {
            Ok(Self { start, end })
        } else {
            Err(EntsoeError::InvalidWindow { start, end })
        }
    }

    /// The 24 hours starting at the last midnight in `tz` before `now`.
    ///
    /// Local midnight is floored to the whole UTC hour, so in zones with a
    /// fractional-hour offset the window starts up to 45 minutes early.
    pub fn today<TZ: TimeZone>(now: DateTime<Utc>, tz: &TZ) -> Self {
        let start = floor_to_hour(last_midnight(now, tz));
        Self {
            start,
            end: start + Duration::seconds(ONE_DAY),
        }
    }

    /// The 24 hours directly following [`TimeWindow::today`].
    pub fn day_ahead<TZ: TimeZone>(now: DateTime<Utc>, tz: &TZ) -> Self {
        let start = Self::today(now, tz).end;
        Self {
            start,
            end: start + Duration::seconds(ONE_DAY),
        }
    }

    pub fn start(&self) -> DateTime<Utc> {
        self.start
    }

    pub fn end(&self) -> DateTime<Utc> {
        self.end
    }
}

/// Returns midnight of the local calendar day containing `now`.
///
/// When local midnight does not exist (a DST gap at 00:00), the local
/// wall-clock time since midnight is subtracted from `now` instead.
pub fn last_midnight<TZ: TimeZone>(now: DateTime<Utc>, tz: &TZ) -> DateTime<Utc> {
    let now = now.trunc_subsecs(0);
    let local = now.with_timezone(tz);

    local
        .date_naive()
        .and_hms_opt(0, 0, 0)
        .and_then(|midnight| tz.from_local_datetime(&midnight).earliest())
        .map(|midnight| midnight.with_timezone(&Utc))
        .unwrap_or_else(|| {
            let elapsed = local.time().num_seconds_from_midnight();
            now - Duration::seconds(i64::from(elapsed))
        })
}

const ONE_HOUR: i64 = 3_600;

fn is_whole_hour(instant: &DateTime<Utc>) -> bool {
    instant.timestamp().rem_euclid(ONE_HOUR) == 0 && instant.timestamp_subsec_nanos() == 0
}

fn floor_to_hour(instant: DateTime<Utc>) -> DateTime<Utc> {
    let instant = instant.trunc_subsecs(0);
    instant - Duration::seconds(instant.timestamp().rem_euclid(ONE_HOUR))
}

/// Formats an instant as a `periodStart` / `periodEnd` query value.
pub fn format_wire_timestamp(instant: &DateTime<Utc>) -> String {
    instant.format(WIRE_FORMAT).to_string()
}

/// Parses a document timestamp (`YYYY-MM-DDTHH:MMZ`) into epoch seconds.
pub fn parse_document_timestamp(value: &str) -> Result<i64, ParseError> {
    NaiveDateTime::parse_from_str(value, DOCUMENT_FORMAT)
        .map(|naive| Utc.from_utc_datetime(&naive).timestamp())
        .map_err(|_| ParseError::Timestamp {
            value: value.to_owned(),
        })
}

/// Inverse of [`parse_document_timestamp`].
pub fn format_document_timestamp(timestamp: i64) -> Option<String> {
    Utc.timestamp_opt(timestamp, 0)
        .single()
        .map(|instant| instant.format(DOCUMENT_FORMAT).to_string())
}

/// Converts a resolution of the form `PT<digits><S|M|H>` to seconds.
pub fn parse_resolution(value: &str) -> Result<u32, ParseError> {
    let malformed = || ParseError::Resolution {
        value: value.to_owned(),
    };

    let rest = value.strip_prefix("PT").ok_or_else(malformed)?;
    let digits_end = rest
        .find(|c: char| !c.is_ascii_digit())
        .ok_or_else(malformed)?;
    let (digits, unit) = rest.split_at(digits_end);

    let mut unit_chars = unit.chars();
    let (false, Some(unit), None) = (digits.is_empty(), unit_chars.next(), unit_chars.next())
    else {
        return Err(malformed());
    };

    let multiplier = match unit {
        'S' => 1,
        'M' => 60,
        'H' => 3_600,
        _ => {
            return Err(ParseError::ResolutionUnit {
                value: value.to_owned(),
            })
        }
    };

    digits
        .parse::<u32>()
        .ok()
        .and_then(|count| count.checked_mul(multiplier))
        .filter(|&seconds| seconds > 0)
        .ok_or_else(malformed)
}
