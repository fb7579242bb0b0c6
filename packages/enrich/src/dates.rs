//! Fills in observation dates for background points that only carry a
//! `month`.

use std::path::Path;

use shark_env_features::{FeatureCollection, PropertyValue, load_collection, write_collection};

use crate::{EnrichError, EnrichStats, ProgressCallback};

/// Default year. Inside the MUR SST coverage.
pub const DEFAULT_YEAR: i32 = 2019;

/// Default day of month.
pub const DEFAULT_DAY: u32 = 15;

/// Sets `date = YYYY-MM-DD` from `month` and the given `year`/`day`.
///
/// Only features whose `month` is an integer in `1..=12` are touched.
/// Existing `year` and `day` properties are kept; missing ones are filled
/// in with `year` and `day`. `date` is always overwritten.
pub fn assign_dates_from_month(
    collection: &mut FeatureCollection,
    year: i32,
    day: u32,
    progress: &dyn ProgressCallback,
) -> EnrichStats {
    let mut stats = EnrichStats::new(collection.len());
    progress.set_total(collection.len() as u64);

    for feature in &mut collection.features {
        progress.inc(1);

        let month = match feature.property("month") {
            Some(PropertyValue::Integer(m)) if (1..=12).contains(m) => *m,
            _ => {
                stats.skip();
                continue;
            }
        };

        if !feature.has_property("year") {
            feature.set_property("year", i64::from(year));
        }
        if !feature.has_property("day") {
            feature.set_property("day", i64::from(day));
        }
        feature.set_property("date", format!("{year:04}-{month:02}-{day:02}"));
        stats.record(true);
    }

    progress.finish(format!("Dates: {} of {} points", stats.processed, stats.total));
    stats
}

/// Loads `src`, fills in dates, and writes `dst`.
///
/// # Errors
///
/// Returns [`EnrichError`] if `src` cannot be loaded or `dst` cannot be
/// written.
pub fn run(
    src: &Path,
    dst: &Path,
    year: i32,
    day: u32,
    progress: &dyn ProgressCallback,
) -> Result<EnrichStats, EnrichError> {
    log::info!("Dates: {} -> {} ({year}, day {day})", src.display(), dst.display());

    let mut collection = load_collection(src)?;
    let stats = assign_dates_from_month(&mut collection, year, day, progress);

    write_collection(dst, &collection)?;
    log::info!("Dates done: {stats}");
    Ok(stats)
}
