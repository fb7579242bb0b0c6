#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Remote grid sampler for ERDDAP `griddap` datasets.
//!
//! Answers "what is the value of variable V on date D at (lat, lon)" by
//! querying a single grid cell from an ERDDAP server:
//!
//! 1. Dates before the dataset's coverage start are rejected without a
//!    network call.
//! 2. Coordinates are rounded onto a [`GridCellKey`] and looked up in the
//!    [`SampleCache`]. Cached misses (`null`) short-circuit too.
//! 3. On a cache miss the [`GridSource`] is queried with a bounded number
//!    of attempts (see [`retry`]). Every remote call is followed by a
//!    throttle delay to stay under the provider's rate limit.
//!
//! Dataset endpoints are configured by TOML files in `datasets/` (see
//! [`dataset`]).

pub mod dataset;
pub mod http;
pub mod retry;
pub mod sampler;

use async_trait::async_trait;
use serde::Deserialize;
use strum_macros::{AsRefStr, Display, EnumString};

pub use dataset::GridDataset;
pub use http::{HttpGridSource, parse_grid_csv};
pub use sampler::{RemoteGridSampler, SamplerSettings};
pub use shark_env_cache::{CacheError, GridCellKey, GridStep, SampleCache};

/// Errors from configuring the sampler.
///
/// Per-point lookup failures never surface here; they are recorded as
/// "no data" in the cache.
#[derive(Debug, thiserror::Error)]
pub enum SamplerError {
    /// HTTP client construction failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Dataset configuration file could not be read.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Dataset configuration is not valid TOML for a [`GridDataset`].
    #[error("Dataset config error: {0}")]
    Toml(#[from] toml::de::Error),

    /// Cache error.
    #[error(transparent)]
    Cache(#[from] CacheError),

    /// Unknown dataset id.
    #[error("Unknown grid dataset: {id}")]
    UnknownDataset {
        /// Requested id.
        id: String,
    },
}

/// Result of a single remote call for one grid cell.
#[derive(Debug, Clone, PartialEq)]
pub enum FetchOutcome {
    /// The cell has a numeric value.
    Value(f64),
    /// The server answered, but there is no usable value for the cell
    /// (missing column, empty result, `NaN`, or a permanent 4xx).
    NotAvailable,
    /// Timeout, connection failure, 429/5xx, or an unreadable body.
    /// Worth retrying.
    TransientError(String),
}

/// Something that can fetch the value of one grid cell.
///
/// [`HttpGridSource`] is the ERDDAP implementation; tests substitute
/// in-memory sources.
#[async_trait]
pub trait GridSource: Send + Sync {
    /// Fetches the value for `cell`. Coordinates in `cell` are already in
    /// the dataset's longitude convention.
    async fn fetch(&self, cell: &GridCellKey) -> FetchOutcome;
}

/// Longitude range a dataset is indexed by.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
)]
pub enum LongitudeConvention {
    /// `[0, 360)`.
    #[default]
    #[serde(rename = "zero_to_360")]
    #[strum(serialize = "zero_to_360")]
    ZeroTo360,
    /// `[-180, 180]`.
    #[serde(rename = "signed_180")]
    #[strum(serialize = "signed_180")]
    Signed180,
}

impl LongitudeConvention {
    /// Converts a `[-180, 180]` longitude into this convention.
    #[must_use]
    pub fn normalize(self, lon: f64) -> f64 {
        match self {
            Self::ZeroTo360 => normalize_longitude(lon),
            Self::Signed180 => lon,
        }
    }
}

/// Maps a longitude onto `[0, 360)`, keeping the same meridian.
///
/// `-10 → 350`, `200 → 200`, `0 → 0`, `360 → 0`.
#[must_use]
pub fn normalize_longitude(lon: f64) -> f64 {
    let normalized = lon.rem_euclid(360.0);
    // rem_euclid of a tiny negative number rounds up to exactly 360.0
    if normalized >= 360.0 { 0.0 } else { normalized }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[allow(clippy::float_cmp)]
    fn normalizes_longitudes() {
        assert_eq!(normalize_longitude(-10.0), 350.0);
        assert_eq!(normalize_longitude(200.0), 200.0);
        assert_eq!(normalize_longitude(0.0), 0.0);
        assert_eq!(normalize_longitude(360.0), 0.0);
        assert_eq!(normalize_longitude(-180.0), 180.0);
        assert_eq!(normalize_longitude(180.0), 180.0);
    }

    #[test]
    fn normalized_range_is_half_open() {
        let mut lon = -180.0;
        while lon <= 180.0 {
            let n = normalize_longitude(lon);
            assert!((0.0..360.0).contains(&n), "{lon} -> {n}");
            let offset = (n - lon).rem_euclid(360.0);
            assert!(offset < 1e-9 || offset > 360.0 - 1e-9, "{lon} -> {n}");
            lon += 0.37;
        }
        assert!((0.0..360.0).contains(&normalize_longitude(-1e-20)));
    }

    #[test]
    fn signed_convention_is_identity() {
        assert!((LongitudeConvention::Signed180.normalize(-75.5) - -75.5).abs() < f64::EPSILON);
    }

    #[test]
    fn convention_round_trips_through_strings() {
        assert_eq!(LongitudeConvention::ZeroTo360.to_string(), "zero_to_360");
        assert_eq!(
            "signed_180".parse::<LongitudeConvention>().unwrap(),
            LongitudeConvention::Signed180
        );
    }
}
