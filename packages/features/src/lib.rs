#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! `GeoJSON` point store.
//!
//! Every stage reads its input with [`load_collection`] and writes its
//! output with [`write_collection`]. Files are single UTF-8 JSON
//! documents (not newline-delimited), read and written in one pass.

use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

pub use shark_env_feature_models::*;

/// Errors from reading or writing feature collections.
#[derive(Debug, thiserror::Error)]
pub enum FeatureStoreError {
    /// The input file does not exist.
    #[error("Feature collection not found: {}", path.display())]
    NotFound {
        /// Path that was requested.
        path: PathBuf,
    },

    /// File I/O error.
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        /// Path being read or written.
        path: PathBuf,
        /// Underlying error.
        source: std::io::Error,
    },

    /// The document is not a valid feature collection.
    #[error("Invalid GeoJSON in {}: {source}", path.display())]
    Json {
        /// Path being read or written.
        path: PathBuf,
        /// Underlying error.
        source: serde_json::Error,
    },
}

/// Reads a feature collection from `path`.
///
/// # Errors
///
/// Returns [`FeatureStoreError::NotFound`] if the file does not exist, or
/// another [`FeatureStoreError`] if it cannot be read or parsed.
pub fn load_collection(path: &Path) -> Result<FeatureCollection, FeatureStoreError> {
    let file = File::open(path).map_err(|source| {
        if source.kind() == std::io::ErrorKind::NotFound {
            FeatureStoreError::NotFound {
                path: path.to_path_buf(),
            }
        } else {
            FeatureStoreError::Io {
                path: path.to_path_buf(),
                source,
            }
        }
    })?;

    let collection: FeatureCollection =
        serde_json::from_reader(BufReader::new(file)).map_err(|source| {
            FeatureStoreError::Json {
                path: path.to_path_buf(),
                source,
            }
        })?;

    log::info!("Loaded {} features from {}", collection.len(), path.display());

    Ok(collection)
}

/// Writes `collection` to `path`, creating parent directories as needed.
///
/// # Errors
///
/// Returns [`FeatureStoreError`] if the directory or file cannot be
/// created or the collection cannot be serialized.
pub fn write_collection(
    path: &Path,
    collection: &FeatureCollection,
) -> Result<(), FeatureStoreError> {
    let io_err = |source| FeatureStoreError::Io {
        path: path.to_path_buf(),
        source,
    };

    if let Some(parent) = path.parent() {
        ensure_dir(parent).map_err(io_err)?;
    }

    let mut writer = BufWriter::new(File::create(path).map_err(io_err)?);
    serde_json::to_writer(&mut writer, collection).map_err(|source| FeatureStoreError::Json {
        path: path.to_path_buf(),
        source,
    })?;
    writer.flush().map_err(io_err)?;

    log::info!("Wrote {} features to {}", collection.len(), path.display());

    Ok(())
}

/// Ensures a directory exists, creating it if necessary.
///
/// An empty path (a bare file name's parent) is treated as the current
/// directory and left alone.
///
/// # Errors
///
/// Returns an I/O error if the directory cannot be created.
pub fn ensure_dir(path: &Path) -> std::io::Result<()> {
    if !path.as_os_str().is_empty() && !path.exists() {
        std::fs::create_dir_all(path)?;
    }
    Ok(())
}
