#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Grid cell keys and the persistent sample cache.
//!
//! Remote grid lookups are keyed by `(date, rounded lat, rounded lon)`.
//! Both successful samples and failed lookups (`null`) are cached, so a
//! grid cell is queried at most once per cache file. The cache is a single
//! JSON object read fully at [`SampleCache::open`] and written fully on
//! [`SampleCache::flush`]. It is never invalidated automatically; delete
//! the file to force fresh lookups.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use chrono::NaiveDate;

/// Errors from reading or writing the cache file.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// File I/O error.
    #[error("Cache I/O error on {}: {source}", path.display())]
    Io {
        /// Cache file path.
        path: PathBuf,
        /// Underlying error.
        source: std::io::Error,
    },

    /// Serialization error.
    #[error("Cache serialization error: {0}")]
    Json(#[from] serde_json::Error),

    /// The configured rounding step is not a positive finite number.
    #[error("Invalid grid step: {0}")]
    InvalidStep(f64),
}

/// Rounding step used to collapse coordinates onto grid cells.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GridStep {
    degrees: f64,
    decimals: usize,
}

impl GridStep {
    /// Creates a step of `degrees` (e.g. `0.01` or `0.05`).
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::InvalidStep`] unless `degrees` is positive and
    /// finite.
    pub fn new(degrees: f64) -> Result<Self, CacheError> {
        if !degrees.is_finite() || degrees <= 0.0 {
            return Err(CacheError::InvalidStep(degrees));
        }
        Ok(Self {
            degrees,
            decimals: decimals_for(degrees),
        })
    }

    /// Number of decimals used when rendering cell coordinates.
    #[must_use]
    pub const fn decimals(&self) -> usize {
        self.decimals
    }

    #[allow(clippy::cast_possible_truncation)]
    fn cell(&self, value: f64) -> i64 {
        (value / self.degrees).round() as i64
    }

    #[allow(clippy::cast_precision_loss)]
    fn center(&self, cell: i64) -> f64 {
        cell as f64 * self.degrees
    }

    #[allow(clippy::cast_possible_truncation)]
    fn cells_per_turn(&self) -> i64 {
        (360.0 / self.degrees).round() as i64
    }
}

impl Default for GridStep {
    fn default() -> Self {
        Self {
            degrees: 0.01,
            decimals: 2,
        }
    }
}

/// Smallest number of decimals that represents `step` exactly enough to
/// tell neighbouring cells apart.
fn decimals_for(step: f64) -> usize {
    let mut scaled = step;
    for decimals in 0..10 {
        if (scaled - scaled.round()).abs() < 1e-9 {
            return decimals;
        }
        scaled *= 10.0;
    }
    10
}

/// A `(date, lat, lon)` grid cell.
///
/// Coordinates are stored as integer cell indices, so rounding an
/// already-rounded coordinate yields the same key.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GridCellKey {
    date: NaiveDate,
    lat_cell: i64,
    lon_cell: i64,
    step: GridStep,
}

impl GridCellKey {
    /// Rounds `(lat, lon)` onto the grid.
    ///
    /// `lon` must already be in the dataset's longitude convention. A
    /// longitude that rounds up to 360 wraps to 0.
    #[must_use]
    pub fn new(date: NaiveDate, lat: f64, lon: f64, step: GridStep) -> Self {
        let mut lon_cell = step.cell(lon);
        let turn = step.cells_per_turn();
        if lon_cell >= turn {
            lon_cell -= turn;
        }
        Self {
            date,
            lat_cell: step.cell(lat),
            lon_cell,
            step,
        }
    }

    #[must_use]
    pub const fn date(&self) -> NaiveDate {
        self.date
    }

    #[must_use]
    pub const fn step(&self) -> GridStep {
        self.step
    }

    /// Latitude of the cell centre.
    #[must_use]
    pub fn lat(&self) -> f64 {
        self.step.center(self.lat_cell)
    }

    /// Longitude of the cell centre, in the dataset convention.
    #[must_use]
    pub fn lon(&self) -> f64 {
        self.step.center(self.lon_cell)
    }

    /// Renders the `"date|lat|lon"` string used in the cache file.
    #[must_use]
    pub fn cache_key(&self) -> String {
        self.to_string()
    }
}

/// Renders a cell coordinate with trailing zeros dropped but at least one
/// decimal kept (`280.1`, `25.73`, `10.0`).
fn coordinate(value: f64, decimals: usize) -> String {
    let mut text = format!("{value:.decimals$}");
    if text.contains('.') {
        text.truncate(text.trim_end_matches('0').len());
        if text.ends_with('.') {
            text.push('0');
        }
    } else {
        text.push_str(".0");
    }
    if text == "-0.0" {
        text.remove(0);
    }
    text
}

impl fmt::Display for GridCellKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let decimals = self.step.decimals;
        write!(
            f,
            "{}|{}|{}",
            self.date.format("%Y-%m-%d"),
            coordinate(self.lat(), decimals),
            coordinate(self.lon(), decimals)
        )
    }
}

/// Persistent map of grid cell → sampled value (`None` = no data).
#[derive(Debug, Default)]
pub struct SampleCache {
    path: Option<PathBuf>,
    entries: BTreeMap<String, Option<f64>>,
    dirty: bool,
}

impl SampleCache {
    /// Loads the cache at `path`.
    ///
    /// A missing file yields an empty cache. A file that exists but is not
    /// a valid cache document is logged and replaced by an empty cache on
    /// the next flush.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Io`] if the file exists but cannot be read.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, CacheError> {
        let path = path.into();

        let entries = match std::fs::read_to_string(&path) {
            Ok(text) => match serde_json::from_str::<BTreeMap<String, Option<f64>>>(&text) {
                Ok(entries) => entries,
                Err(e) => {
                    log::warn!("Ignoring unreadable sample cache {}: {e}", path.display());
                    BTreeMap::new()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(source) => return Err(CacheError::Io { path, source }),
        };

        log::info!("Sample cache {}: {} entries", path.display(), entries.len());

        Ok(Self {
            path: Some(path),
            entries,
            dirty: false,
        })
    }

    /// A cache that is never written to disk.
    #[must_use]
    pub fn in_memory() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Looks up a cell.
    ///
    /// The outer `Option` is "was this cell attempted", the inner one is
    /// the sampled value.
    #[must_use]
    pub fn get(&self, key: &GridCellKey) -> Option<Option<f64>> {
        self.entries.get(&key.cache_key()).copied()
    }

    /// Records a lookup result. Non-finite values are stored as `None`.
    pub fn insert(&mut self, key: &GridCellKey, value: Option<f64>) {
        let value = value.filter(|v| v.is_finite());
        self.entries.insert(key.cache_key(), value);
        self.dirty = true;
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Whether there are entries not yet written to disk.
    #[must_use]
    pub const fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Writes the whole cache back to its file.
    ///
    /// No-op for in-memory caches or when nothing changed since the last
    /// flush.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError`] if the file cannot be written.
    pub fn flush(&mut self) -> Result<(), CacheError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        if !self.dirty {
            return Ok(());
        }

        let io_err = |source| CacheError::Io {
            path: path.clone(),
            source,
        };

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(io_err)?;
            }
        }

        let json = serde_json::to_string(&self.entries)?;
        std::fs::write(path, json).map_err(io_err)?;
        self.dirty = false;

        log::debug!(
            "Flushed {} cache entries to {}",
            self.entries.len(),
            path.display()
        );

        Ok(())
    }

    /// Final flush at the end of a run.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError`] if the file cannot be written.
    pub fn close(mut self) -> Result<(), CacheError> {
        self.flush()
    }
}
