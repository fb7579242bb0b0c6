//! Presence/absence labelling.
//!
//! Merges an enriched presence collection and an enriched background
//! collection into one training set, presence features first.

use std::fmt;
use std::path::Path;

use shark_env_features::{
    Feature, FeatureCollection, PRESENCE_KEY, SST_KEY, load_collection, write_collection,
};

use crate::{EnrichError, ProgressCallback};

/// Tunables for the merge.
#[derive(Debug, Clone)]
pub struct PresenceAbsenceOptions {
    /// Property a background feature must have a non-null value for.
    pub covariate: String,
    /// Drop background features whose covariate is null or missing.
    pub drop_null_background: bool,
}

impl Default for PresenceAbsenceOptions {
    fn default() -> Self {
        Self {
            covariate: SST_KEY.to_string(),
            drop_null_background: true,
        }
    }
}

/// Counts from one merge.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PresenceAbsenceStats {
    /// Presence features written.
    pub presence: usize,
    /// Background features written.
    pub background: usize,
    /// Background features dropped for a null covariate.
    pub dropped: usize,
}

impl fmt::Display for PresenceAbsenceStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} points ({} presence, {} background, {} background dropped)",
            self.presence + self.background,
            self.presence,
            self.background,
            self.dropped
        )
    }
}

fn tag(mut feature: Feature, presence: i64) -> Feature {
    feature.set_property(PRESENCE_KEY, presence);
    feature
}

/// Labels `presence` features `1` and `background` features `0` and
/// concatenates them, presence first. Input order is kept within each
/// group.
#[must_use]
pub fn build_presence_absence(
    presence: FeatureCollection,
    background: FeatureCollection,
    options: &PresenceAbsenceOptions,
) -> (FeatureCollection, PresenceAbsenceStats) {
    let mut stats = PresenceAbsenceStats::default();
    let mut features = Vec::with_capacity(presence.len() + background.len());

    for feature in presence.features {
        features.push(tag(feature, 1));
        stats.presence += 1;
    }

    for feature in background.features {
        let usable = feature
            .property(&options.covariate)
            .is_some_and(|v| !v.is_null());

        if options.drop_null_background && !usable {
            stats.dropped += 1;
            continue;
        }
        features.push(tag(feature, 0));
        stats.background += 1;
    }

    (FeatureCollection::new(features), stats)
}

/// Loads both inputs, merges them, and writes `out`.
///
/// # Errors
///
/// Returns [`EnrichError`] if either input cannot be loaded or `out`
/// cannot be written.
pub fn run(
    presence: &Path,
    background: &Path,
    out: &Path,
    options: &PresenceAbsenceOptions,
    progress: &dyn ProgressCallback,
) -> Result<PresenceAbsenceStats, EnrichError> {
    log::info!(
        "Presence/absence: {} + {} -> {}",
        presence.display(),
        background.display(),
        out.display()
    );

    let presence = load_collection(presence)?;
    let background = load_collection(background)?;
    progress.set_total((presence.len() + background.len()) as u64);

    let (merged, stats) = build_presence_absence(presence, background, options);
    progress.inc((stats.presence + stats.background + stats.dropped) as u64);

    write_collection(out, &merged)?;
    progress.finish(format!("Presence/absence: {stats}"));
    log::info!("Presence/absence done: {stats}");
    Ok(stats)
}
