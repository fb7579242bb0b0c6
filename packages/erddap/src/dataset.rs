//! Grid dataset configuration.
//!
//! Each remote dataset is described by a TOML file under `datasets/`.
//! The registry embeds these at compile time and exposes them via
//! [`all_datasets`] and [`find_dataset`]. A custom dataset can be loaded
//! from disk with [`GridDataset::from_file`].

use std::path::Path;
use std::time::Duration;

use chrono::NaiveDate;
use serde::Deserialize;

use crate::{LongitudeConvention, SamplerError};

/// A remote gridded dataset served by an ERDDAP `griddap` endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct GridDataset {
    /// Unique identifier (e.g., `"mur_sst"`).
    pub id: String,
    /// Human-readable name.
    pub name: String,
    /// `griddap` base URL, without trailing slash.
    pub base_url: String,
    /// ERDDAP dataset id (e.g., `"jplMURSST41mday_Lon0360"`).
    pub dataset: String,
    /// Variable to query; the response column is matched by prefix.
    pub variable: String,
    /// First date with data. Earlier dates are rejected locally.
    pub coverage_start: NaiveDate,
    /// Longitude range the dataset is indexed by.
    #[serde(default)]
    pub longitude_convention: LongitudeConvention,
    /// Rounding step in degrees for grid cell keys.
    #[serde(default = "default_grid_step")]
    pub grid_step: f64,
    /// Per-request timeout.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Attempts per grid cell before recording it as "no data".
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Fixed pause between attempts, in milliseconds.
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    /// Pause after every remote call, in milliseconds.
    #[serde(default = "default_throttle_ms")]
    pub throttle_ms: u64,
}

const fn default_grid_step() -> f64 {
    0.01
}

const fn default_timeout_secs() -> u64 {
    25
}

const fn default_max_attempts() -> u32 {
    3
}

const fn default_retry_delay_ms() -> u64 {
    1200
}

const fn default_throttle_ms() -> u64 {
    200
}

impl GridDataset {
    /// Parses a dataset definition from TOML text.
    ///
    /// # Errors
    ///
    /// Returns [`SamplerError::Toml`] if the document is invalid.
    pub fn from_toml(text: &str) -> Result<Self, SamplerError> {
        Ok(toml::de::from_str(text)?)
    }

    /// Loads a dataset definition from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns [`SamplerError`] if the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> Result<Self, SamplerError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml(&text)
    }

    #[must_use]
    pub const fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    #[must_use]
    pub const fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    #[must_use]
    pub const fn throttle(&self) -> Duration {
        Duration::from_millis(self.throttle_ms)
    }
}

// ── Compile-time embedded TOML files ────────────────────────────────

const DATASET_TOMLS: &[(&str, &str)] = &[
    ("mur_sst", include_str!("../datasets/mur_sst.toml")),
    ("mur_sst_daily", include_str!("../datasets/mur_sst_daily.toml")),
];

/// Id of the dataset used when none is requested.
pub const DEFAULT_DATASET: &str = "mur_sst";

/// Returns all embedded dataset configurations.
///
/// # Panics
///
/// Panics if any embedded TOML config is malformed (the configs ship with
/// the crate, so this is covered by the tests below).
#[must_use]
pub fn all_datasets() -> Vec<GridDataset> {
    DATASET_TOMLS
        .iter()
        .map(|(name, toml_str)| {
            GridDataset::from_toml(toml_str)
                .unwrap_or_else(|e| panic!("Failed to parse grid dataset '{name}': {e}"))
        })
        .collect()
}

/// Looks up an embedded dataset by id.
///
/// # Errors
///
/// Returns [`SamplerError::UnknownDataset`] if no embedded dataset has
/// that id.
pub fn find_dataset(id: &str) -> Result<GridDataset, SamplerError> {
    all_datasets()
        .into_iter()
        .find(|d| d.id == id)
        .ok_or_else(|| SamplerError::UnknownDataset { id: id.to_string() })
}
