//! Distance-to-coast stage (`dist_coast_km`).

use std::path::Path;

use shark_env_features::{DIST_COAST_KEY, FeatureCollection, load_collection, write_collection};
use shark_env_spatial::CoastlineIndex;

use crate::{EnrichError, EnrichStats, ProgressCallback, round_to};

/// Default land polygons.
pub const DEFAULT_LAND: &str = "public/data/land.geojson";

/// Features between progress log lines.
pub const COAST_BATCH_SIZE: usize = 200;

/// Decimal places kept in `dist_coast_km`.
const DISTANCE_DECIMALS: i32 = 3;

/// Writes the geodesic distance to the nearest coastline for every feature
/// with valid coordinates.
///
/// With an empty index there is no nearest coastline, so every feature is
/// passed through without the key.
pub fn enrich_collection(
    collection: &mut FeatureCollection,
    index: &CoastlineIndex,
    progress: &dyn ProgressCallback,
) -> EnrichStats {
    let mut stats = EnrichStats::new(collection.len());
    progress.set_total(collection.len() as u64);

    for (i, feature) in collection.features.iter_mut().enumerate() {
        progress.inc(1);

        let nearest = feature
            .valid_lon_lat()
            .and_then(|(lon, lat)| index.nearest(lon, lat));

        if let Some(m) = nearest {
            feature.set_property(DIST_COAST_KEY, round_to(m.distance_km, DISTANCE_DECIMALS));
            stats.record(true);
        } else {
            stats.skip();
        }

        if (i + 1) % COAST_BATCH_SIZE == 0 {
            log::info!(
                "{} features processed ({} with distance)",
                i + 1,
                stats.with_value
            );
        }
    }

    progress.finish(format!(
        "Distance to coast: {} of {} points",
        stats.with_value, stats.total
    ));
    stats
}

/// Loads the land file and `src`, measures distances, and writes `dst`.
///
/// # Errors
///
/// Returns [`EnrichError`] if the land file or `src` cannot be loaded, or
/// `dst` cannot be written.
pub fn run(
    src: &Path,
    dst: &Path,
    land: &Path,
    progress: &dyn ProgressCallback,
) -> Result<EnrichStats, EnrichError> {
    log::info!(
        "Distance to coast: {} -> {} (land {})",
        src.display(),
        dst.display(),
        land.display()
    );

    let index = CoastlineIndex::load(land)?;
    if index.is_empty() {
        log::warn!("{} contains no coastline; no distances will be written", land.display());
    }

    let mut collection = load_collection(src)?;
    let stats = enrich_collection(&mut collection, &index, progress);

    write_collection(dst, &collection)?;
    log::info!("Distance to coast done: {stats}");
    Ok(stats)
}
