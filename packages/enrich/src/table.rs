//! Flattens an enriched collection into a modelling table.
//!
//! One row per feature, in feature order, with the columns
//! `lon, lat, date, month, sst_c, bathy_m, dist_coast_km, presence`.
//! Features without point coordinates still get a row, with empty
//! `lon`/`lat`, so rows stay aligned with the source collection.

use std::path::{Path, PathBuf};

use serde::Serialize;
use shark_env_features::{
    BATHYMETRY_KEY, DIST_COAST_KEY, Feature, FeatureCollection, PRESENCE_KEY, PropertyValue,
    SST_KEY, ensure_dir, load_collection,
};

use crate::{EnrichError, ProgressCallback};

/// Default input collection.
pub const DEFAULT_SOURCE: &str = "data/processed/pa_dataset.geojson";

/// Default CSV output.
pub const DEFAULT_CSV: &str = "data/processed/pa_dataset.csv";

/// Default Parquet output.
pub const DEFAULT_PARQUET: &str = "data/processed/pa_dataset.parquet";

const TABLE_NAME: &str = "pa_dataset";

/// Errors from writing the table.
#[derive(Debug, thiserror::Error)]
pub enum TableError {
    /// Output directory or file could not be created.
    #[error("I/O error on {path}: {source}")]
    Io {
        /// Path being written.
        path: PathBuf,
        /// Underlying error.
        source: std::io::Error,
    },

    /// CSV serialization failed.
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// `DuckDB` failed while building or exporting the Parquet file.
    #[error("DuckDB error: {0}")]
    DuckDb(#[from] duckdb::Error),
}

/// One row of the modelling table.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TableRow {
    pub lon: Option<f64>,
    pub lat: Option<f64>,
    pub date: Option<String>,
    pub month: Option<i64>,
    pub sst_c: Option<f64>,
    pub bathy_m: Option<f64>,
    pub dist_coast_km: Option<f64>,
    pub presence: Option<i64>,
}

fn as_text(value: &PropertyValue) -> Option<String> {
    match value {
        PropertyValue::Null => None,
        PropertyValue::Text(s) => Some(s.clone()),
        PropertyValue::Integer(i) => Some(i.to_string()),
        PropertyValue::Float(f) => Some(f.to_string()),
        PropertyValue::Bool(b) => Some(b.to_string()),
        PropertyValue::Json(v) => Some(v.to_string()),
    }
}

fn number(feature: &Feature, key: &str) -> Option<f64> {
    feature.property(key).and_then(PropertyValue::as_f64)
}

impl TableRow {
    /// Builds the row for one feature.
    ///
    /// `date` falls back to `eventDate` when `date` is missing or falsy.
    /// Without a `presence` property, the row counts as presence only if
    /// `type` is `"presence"`.
    #[must_use]
    pub fn from_feature(feature: &Feature) -> Self {
        let (lon, lat) = feature.lon_lat().unzip();

        let date = ["date", "eventDate"]
            .iter()
            .filter_map(|key| feature.property(key))
            .find(|value| value.is_truthy())
            .and_then(as_text);

        let presence = feature.property(PRESENCE_KEY).map_or_else(
            || {
                let is_presence =
                    feature.property("type").and_then(PropertyValue::as_str) == Some("presence");
                Some(i64::from(is_presence))
            },
            PropertyValue::as_integer,
        );

        Self {
            lon,
            lat,
            date,
            month: feature.property("month").and_then(PropertyValue::as_integer),
            sst_c: number(feature, SST_KEY),
            bathy_m: number(feature, BATHYMETRY_KEY),
            dist_coast_km: number(feature, DIST_COAST_KEY),
            presence,
        }
    }
}

/// Converts every feature of `collection` into a [`TableRow`].
#[must_use]
pub fn table_rows(collection: &FeatureCollection) -> Vec<TableRow> {
    collection
        .features
        .iter()
        .map(TableRow::from_feature)
        .collect()
}

fn prepare_parent(path: &Path) -> Result<(), TableError> {
    if let Some(parent) = path.parent() {
        ensure_dir(parent).map_err(|source| TableError::Io {
            path: parent.to_path_buf(),
            source,
        })?;
    }
    Ok(())
}

/// Writes `rows` as CSV with a header line.
///
/// # Errors
///
/// Returns [`TableError`] if the file cannot be created or written.
pub fn write_csv(path: &Path, rows: &[TableRow]) -> Result<(), TableError> {
    prepare_parent(path)?;

    let mut writer = csv::Writer::from_path(path)?;
    for row in rows {
        writer.serialize(row)?;
    }
    writer.flush().map_err(|source| TableError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    log::info!("Wrote {} rows to {}", rows.len(), path.display());
    Ok(())
}

/// Writes `rows` as a Parquet file by staging them in an in-memory
/// `DuckDB` table and exporting it with `COPY`.
///
/// # Errors
///
/// Returns [`TableError`] if the directory cannot be created or `DuckDB`
/// fails.
pub fn write_parquet(path: &Path, rows: &[TableRow]) -> Result<(), TableError> {
    prepare_parent(path)?;

    let duck = duckdb::Connection::open_in_memory()?;
    duck.execute_batch(&format!(
        "CREATE TABLE {TABLE_NAME} (
            lon DOUBLE,
            lat DOUBLE,
            date VARCHAR,
            month BIGINT,
            sst_c DOUBLE,
            bathy_m DOUBLE,
            dist_coast_km DOUBLE,
            presence BIGINT
        )"
    ))?;

    duck.execute_batch("BEGIN TRANSACTION")?;
    {
        let mut stmt =
            duck.prepare(&format!("INSERT INTO {TABLE_NAME} VALUES (?, ?, ?, ?, ?, ?, ?, ?)"))?;
        for row in rows {
            stmt.execute(duckdb::params![
                row.lon,
                row.lat,
                row.date,
                row.month,
                row.sst_c,
                row.bathy_m,
                row.dist_coast_km,
                row.presence,
            ])?;
        }
    }
    duck.execute_batch("COMMIT")?;

    let target = path.to_string_lossy().replace('\'', "''");
    duck.execute_batch(&format!(
        "COPY {TABLE_NAME} TO '{target}' (FORMAT PARQUET)"
    ))?;

    log::info!("Wrote {} rows to {}", rows.len(), path.display());
    Ok(())
}

/// Writes the table for `collection` to `csv` and, when given, `parquet`.
///
/// # Errors
///
/// Returns [`TableError`] if either output cannot be written.
pub fn export_table(
    collection: &FeatureCollection,
    csv: &Path,
    parquet: Option<&Path>,
) -> Result<usize, TableError> {
    let rows = table_rows(collection);
    write_csv(csv, &rows)?;
    if let Some(parquet) = parquet {
        write_parquet(parquet, &rows)?;
    }
    Ok(rows.len())
}

/// Loads `src` and exports it as a table.
///
/// # Errors
///
/// Returns [`EnrichError`] if `src` cannot be loaded or an output cannot be
/// written.
pub fn run(
    src: &Path,
    csv: &Path,
    parquet: Option<&Path>,
    progress: &dyn ProgressCallback,
) -> Result<usize, EnrichError> {
    log::info!("Table: {} -> {}", src.display(), csv.display());

    let collection = load_collection(src)?;
    progress.set_total(collection.len() as u64);

    let rows = export_table(&collection, csv, parquet)?;
    progress.inc(rows as u64);
    progress.finish(format!("Table: {rows} rows"));
    Ok(rows)
}
