// ⏰ Temporal Model - validity intervals for versioned dimension rows
// A version is valid on [valid_from, valid_to], both ends inclusive.
// Open versions carry the far-future sentinel as valid_to.

use crate::error::{EtlError, Result};
use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

/// Sentinel `valid_to` of every open (current) version.
pub fn open_end() -> NaiveDate {
    NaiveDate::from_ymd_opt(9999, 12, 31).unwrap_or(NaiveDate::MAX)
}

// ============================================================================
// VALIDITY INTERVAL
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidityInterval {
    pub valid_from: NaiveDate,
    pub valid_to: NaiveDate,
}

impl ValidityInterval {
    /// Open-ended version starting at `valid_from`
    pub fn open(valid_from: NaiveDate) -> Self {
        ValidityInterval {
            valid_from,
            valid_to: open_end(),
        }
    }

    pub fn closed(valid_from: NaiveDate, valid_to: NaiveDate) -> Self {
        ValidityInterval {
            valid_from,
            valid_to,
        }
    }

    /// True iff this is the open version (valid_to == sentinel)
    pub fn is_current(&self) -> bool {
        self.valid_to == open_end()
    }

    /// Inclusive on both ends
    pub fn contains(&self, date: NaiveDate) -> bool {
        self.valid_from <= date && date <= self.valid_to
    }

    /// Close this interval at `date`
    pub fn close_at(&self, date: NaiveDate) -> ValidityInterval {
        ValidityInterval {
            valid_from: self.valid_from,
            valid_to: date,
        }
    }
}

/// Pick the version valid on `date`.
///
/// An SCD2 change closes the predecessor on the same day the successor
/// opens, so the change day matches two versions. The one with the latest
/// `valid_from` wins, which keeps the lookup single-valued.
pub fn version_at<T, F>(versions: &[T], date: NaiveDate, interval: F) -> Option<&T>
where
    F: Fn(&T) -> ValidityInterval,
{
    versions
        .iter()
        .filter(|v| interval(v).contains(date))
        .max_by_key(|v| interval(v).valid_from)
}

// ============================================================================
// TIMELINE CHECKS
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum TimelineViolation {
    /// More than one open version
    MultipleCurrent { count: usize },

    /// Every version is closed
    NoCurrent,

    /// valid_to earlier than valid_from
    Inverted(ValidityInterval),

    /// Later version starts before the earlier one ends
    Overlap {
        earlier: ValidityInterval,
        later: ValidityInterval,
    },

    /// At least one day is covered by no version
    Gap {
        earlier: ValidityInterval,
        later: ValidityInterval,
    },
}

/// Check the version history of one natural key.
///
/// Consecutive versions are contiguous when the successor starts on the
/// predecessor's `valid_to` (shared change day) or on the day after.
pub fn check_timeline(versions: &[ValidityInterval]) -> Vec<TimelineViolation> {
    let mut violations = Vec::new();
    if versions.is_empty() {
        return violations;
    }

    let mut sorted = versions.to_vec();
    sorted.sort_by_key(|v| v.valid_from);

    for interval in &sorted {
        if interval.valid_to < interval.valid_from {
            violations.push(TimelineViolation::Inverted(*interval));
        }
    }

    let current = sorted.iter().filter(|v| v.is_current()).count();
    match current {
        0 => violations.push(TimelineViolation::NoCurrent),
        1 => {}
        count => violations.push(TimelineViolation::MultipleCurrent { count }),
    }

    for pair in sorted.windows(2) {
        let (earlier, later) = (pair[0], pair[1]);
        if later.valid_from < earlier.valid_to {
            violations.push(TimelineViolation::Overlap { earlier, later });
        } else if let Some(next_day) = earlier.valid_to.succ_opt() {
            if later.valid_from > next_day {
                violations.push(TimelineViolation::Gap { earlier, later });
            }
        }
    }

    violations
}

// ============================================================================
// EVENT DATES
// ============================================================================

const DATETIME_FORMATS: [&str; 4] = [
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%dT%H:%M:%S%.f",
];

/// Calendar date of a source date or timestamp column
pub fn parse_event_date(field: &'static str, value: &str) -> Result<NaiveDate> {
    let trimmed = value.trim();

    if let Ok(date) = NaiveDate::parse_from_str(trimmed, "%Y-%m-%d") {
        return Ok(date);
    }

    DATETIME_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(trimmed, fmt).ok())
        .map(|dt| dt.date())
        .ok_or_else(|| EtlError::InvalidDate {
            field,
            value: value.to_string(),
        })
}

/// Integer YYYYMMDD key shared by the date dimension and every fact table
pub fn date_key(date: NaiveDate) -> i32 {
    use chrono::Datelike;
    date.year() * 10_000 + date.month() as i32 * 100 + date.day() as i32
}

// ============================================================================
// TESTS
// ============================================================================
