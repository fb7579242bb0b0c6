//! Observation date extraction from heterogeneous occurrence exports.

use chrono::NaiveDate;

use crate::{Properties, PropertyValue};

/// Property keys checked, in order, for an ISO date string.
pub const DATE_KEYS: &[&str] = &["date", "eventDate", "event_date", "observed", "timestamp"];

/// Resolves the calendar date a feature was observed on.
///
/// Candidates are tried in priority order: the first of [`DATE_KEYS`]
/// holding a string of at least 10 characters (its `YYYY-MM-DD` prefix),
/// then a truthy `year`/`month`/`day` triple, then `fallback`. Only the
/// first candidate is parsed; if it is not a valid calendar date the
/// result is `None` rather than falling through to later candidates.
#[must_use]
pub fn observation_date(
    properties: Option<&Properties>,
    fallback: Option<NaiveDate>,
) -> Option<NaiveDate> {
    match properties.and_then(date_candidate) {
        Some(candidate) => NaiveDate::parse_from_str(&candidate, "%Y-%m-%d").ok(),
        None => fallback,
    }
}

fn date_candidate(properties: &Properties) -> Option<String> {
    for key in DATE_KEYS {
        if let Some(PropertyValue::Text(value)) = properties.get(*key) {
            if value.chars().count() >= 10 {
                return Some(value.chars().take(10).collect());
            }
        }
    }

    let year = properties.get("year").filter(|v| v.is_truthy())?;
    let month = properties.get("month").filter(|v| v.is_truthy())?;
    let day = properties.get("day").filter(|v| v.is_truthy())?;

    let (year, month, day) = (year.as_integer()?, month.as_integer()?, day.as_integer()?);
    Some(format!("{year:04}-{month:02}-{day:02}"))
}
