//! Sea-surface temperature stage (`sst_c`).

use std::path::Path;

use chrono::NaiveDate;
use shark_env_erddap::{GridSource, RemoteGridSampler};
use shark_env_features::{
    FeatureCollection, SST_KEY, load_collection, observation_date, write_collection,
};

use crate::{EnrichError, EnrichStats, ProgressCallback};

/// Features between progress log lines and cache flushes.
pub const SST_BATCH_SIZE: usize = 50;

/// Tunables for the SST stage.
#[derive(Debug, Clone, Copy)]
pub struct SstOptions {
    /// Sample only the first `limit` features. The rest are passed through
    /// unchanged.
    pub limit: Option<usize>,
    /// Date used for features that carry none.
    pub fallback_date: Option<NaiveDate>,
    /// Features between progress log lines and cache flushes.
    pub batch_size: usize,
}

impl Default for SstOptions {
    fn default() -> Self {
        Self {
            limit: None,
            fallback_date: None,
            batch_size: SST_BATCH_SIZE,
        }
    }
}

/// Adds `sst_c` to every sampled feature of `collection`.
///
/// A feature is skipped (left without the key) when it is past `limit`,
/// has no valid coordinates, or has no resolvable date. Dates before the
/// dataset's coverage get `null` without a remote call. The sampler's
/// cache is flushed every batch; a failed batch flush is logged and
/// retried at the next one.
pub async fn enrich_collection<S: GridSource>(
    collection: &mut FeatureCollection,
    sampler: &mut RemoteGridSampler<S>,
    options: &SstOptions,
    progress: &dyn ProgressCallback,
) -> EnrichStats {
    let mut stats = EnrichStats::new(collection.len());
    let limit = options.limit.unwrap_or(usize::MAX);
    let batch_size = options.batch_size.max(1);

    progress.set_total(collection.len().min(limit) as u64);

    for (i, feature) in collection.features.iter_mut().enumerate() {
        if i >= limit {
            stats.skip();
            continue;
        }
        progress.inc(1);

        let Some((lon, lat)) = feature.valid_lon_lat() else {
            log::debug!("Feature {i}: no valid coordinates, skipping");
            stats.skip();
            continue;
        };
        let Some(date) = observation_date(feature.properties.as_ref(), options.fallback_date)
        else {
            log::debug!("Feature {i}: no observation date, skipping");
            stats.skip();
            continue;
        };

        let value = sampler.sample(date, lat, lon).await;
        feature.set_property(SST_KEY, value);
        stats.record(value.is_some());

        if (i + 1) % batch_size == 0 {
            log::info!(
                "{} features processed ({} with SST, {} remote calls)",
                i + 1,
                stats.with_value,
                sampler.remote_calls()
            );
            if let Err(e) = sampler.flush_cache() {
                log::warn!("Failed to flush sample cache: {e}");
            }
        }
    }

    progress.finish(format!("SST: {} of {} points", stats.with_value, stats.total));
    stats
}

/// Loads `src`, samples SST for each feature, flushes the sampler's cache,
/// and writes `dst`.
///
/// The cache is flushed before `dst` is written, so samples survive a
/// failed write. A failed flush only logs a warning.
///
/// # Errors
///
/// Returns [`EnrichError`] if `src` cannot be loaded or `dst` cannot be
/// written.
pub async fn run<S: GridSource>(
    src: &Path,
    dst: &Path,
    sampler: &mut RemoteGridSampler<S>,
    options: &SstOptions,
    progress: &dyn ProgressCallback,
) -> Result<EnrichStats, EnrichError> {
    log::info!("SST: {} -> {}", src.display(), dst.display());

    let mut collection = load_collection(src)?;
    let stats = enrich_collection(&mut collection, sampler, options, progress).await;

    if let Err(e) = sampler.flush_cache() {
        log::warn!("Failed to flush sample cache: {e}");
    }
    write_collection(dst, &collection)?;

    log::info!(
        "SST done: {stats} ({} remote calls, {} cache entries)",
        sampler.remote_calls(),
        sampler.cache().len()
    );
    Ok(stats)
}
