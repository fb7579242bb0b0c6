#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Enrichment stages for shark occurrence points.
//!
//! Each stage loads a `GeoJSON` feature collection, adds one property per
//! point, and writes the collection back out with the same features in the
//! same order:
//!
//! | Stage          | Property        | Source                              |
//! |----------------|-----------------|-------------------------------------|
//! | [`dates`]      | `date`          | `month` + configured year/day       |
//! | [`sst`]        | `sst_c`         | remote ERDDAP grid                  |
//! | [`bathymetry`] | `bathy_m`       | local GeoTIFF                       |
//! | [`coast`]      | `dist_coast_km` | nearest coastline, geodesic         |
//! | [`presence`]   | `presence`      | which input the feature came from   |
//!
//! [`table`] flattens the final collection into CSV and Parquet.
//!
//! Features with missing or invalid coordinates are passed through
//! untouched. A lookup that was attempted but produced nothing is written
//! as `null`, so "no data" and "not processed" stay distinguishable.

pub mod bathymetry;
pub mod coast;
pub mod dates;
pub mod presence;
pub mod progress;
pub mod sst;
pub mod table;

use std::fmt;

use shark_env_erddap::{CacheError, SamplerError};
use shark_env_features::FeatureStoreError;
use shark_env_raster::RasterError;
use shark_env_spatial::SpatialError;

pub use progress::{NullProgress, ProgressCallback};
pub use table::TableError;

/// Errors that abort a stage. Per-feature lookup failures never do.
#[derive(Debug, thiserror::Error)]
pub enum EnrichError {
    /// Reading or writing a feature collection failed.
    #[error(transparent)]
    Store(#[from] FeatureStoreError),

    /// The grid sampler could not be configured.
    #[error(transparent)]
    Sampler(#[from] SamplerError),

    /// The sample cache could not be written.
    #[error(transparent)]
    Cache(#[from] CacheError),

    /// The raster could not be opened.
    #[error(transparent)]
    Raster(#[from] RasterError),

    /// The coastline file could not be loaded.
    #[error(transparent)]
    Spatial(#[from] SpatialError),

    /// The tabular export failed.
    #[error(transparent)]
    Table(#[from] TableError),
}

/// Summary of one stage run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EnrichStats {
    /// Features in the collection.
    pub total: usize,
    /// Features the stage wrote its property to.
    pub processed: usize,
    /// Processed features whose value is not `null`.
    pub with_value: usize,
    /// Features passed through unchanged.
    pub skipped: usize,
}

impl EnrichStats {
    const fn new(total: usize) -> Self {
        Self {
            total,
            processed: 0,
            with_value: 0,
            skipped: 0,
        }
    }

    const fn record(&mut self, has_value: bool) {
        self.processed += 1;
        if has_value {
            self.with_value += 1;
        }
    }

    const fn skip(&mut self) {
        self.skipped += 1;
    }
}

impl fmt::Display for EnrichStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} features: {} processed ({} with value), {} skipped",
            self.total, self.processed, self.with_value, self.skipped
        )
    }
}

/// Rounds `value` to `decimals` decimal places.
#[must_use]
pub fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10_f64.powi(decimals);
    (value * factor).round() / factor
}

#[cfg(test)]
pub(crate) mod test_support {
    use shark_env_features::{Feature, FeatureCollection, Properties, PropertyValue};

    pub fn props(pairs: &[(&str, PropertyValue)]) -> Properties {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), v.clone()))
            .collect()
    }

    pub fn point(lon: f64, lat: f64, pairs: &[(&str, PropertyValue)]) -> Feature {
        Feature::point(lon, lat, props(pairs))
    }

    /// A feature whose geometry has a single coordinate.
    pub fn short_point() -> Feature {
        let mut feature = Feature::point(0.0, 0.0, Properties::new());
        feature.geometry = Some(serde_json::json!({ "type": "Point", "coordinates": [12.5] }));
        feature
    }

    pub fn collection(features: Vec<Feature>) -> FeatureCollection {
        FeatureCollection::new(features)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rounds_to_decimals() {
        assert!((round_to(12.3456, 3) - 12.346).abs() < 1e-12);
        assert!((round_to(-1.23456, 2) - -1.23).abs() < 1e-12);
        assert!((round_to(7.0, 3) - 7.0).abs() < 1e-12);
    }

    #[test]
    fn stats_display() {
        let mut stats = EnrichStats::new(3);
        stats.record(true);
        stats.record(false);
        stats.skip();
        assert_eq!(
            stats.to_string(),
            "3 features: 2 processed (1 with value), 1 skipped"
        );
    }
}
