//! Cached, rate-limited point sampler.

use chrono::NaiveDate;

use crate::retry::{RetryOutcome, RetryPolicy, fetch_with_retry};
use crate::{
    GridCellKey, GridDataset, GridSource, GridStep, LongitudeConvention, SampleCache,
    SamplerError,
};

/// Per-dataset knobs of a [`RemoteGridSampler`].
#[derive(Debug, Clone, Copy)]
pub struct SamplerSettings {
    /// Dates before this are answered with `None` without a remote call.
    pub coverage_start: NaiveDate,
    /// Longitude convention of the remote grid.
    pub convention: LongitudeConvention,
    /// Rounding step for cache keys and queries.
    pub step: GridStep,
    /// Attempt budget and pacing.
    pub retry: RetryPolicy,
}

impl SamplerSettings {
    /// Settings for an ERDDAP dataset.
    ///
    /// # Errors
    ///
    /// Returns [`SamplerError::Cache`] if the dataset's grid step is
    /// invalid.
    pub fn from_dataset(dataset: &GridDataset) -> Result<Self, SamplerError> {
        Ok(Self {
            coverage_start: dataset.coverage_start,
            convention: dataset.longitude_convention,
            step: GridStep::new(dataset.grid_step)?,
            retry: RetryPolicy::from_dataset(dataset),
        })
    }
}

/// Samples a remote grid at `(date, lat, lon)` through a [`SampleCache`].
///
/// Each grid cell is fetched at most once per cache: values and failures
/// are both recorded. Lookup failures never abort a run; they are logged
/// and reported as `None`.
pub struct RemoteGridSampler<S: GridSource> {
    source: S,
    cache: SampleCache,
    settings: SamplerSettings,
    remote_calls: u64,
}

impl<S: GridSource> RemoteGridSampler<S> {
    #[must_use]
    pub const fn new(source: S, cache: SampleCache, settings: SamplerSettings) -> Self {
        Self {
            source,
            cache,
            settings,
            remote_calls: 0,
        }
    }

    /// The cache key a point maps to. `lon` is in `[-180, 180]`.
    #[must_use]
    pub fn key_for(&self, date: NaiveDate, lat: f64, lon: f64) -> GridCellKey {
        GridCellKey::new(
            date,
            lat,
            self.settings.convention.normalize(lon),
            self.settings.step,
        )
    }

    /// Returns the value at `(date, lat, lon)`, or `None` if there is no
    /// data for that cell.
    pub async fn sample(&mut self, date: NaiveDate, lat: f64, lon: f64) -> Option<f64> {
        if date < self.settings.coverage_start {
            log::debug!(
                "{date} is before dataset coverage ({}), skipping",
                self.settings.coverage_start
            );
            return None;
        }

        let key = self.key_for(date, lat, lon);

        if let Some(cached) = self.cache.get(&key) {
            return cached;
        }

        let (outcome, calls) = fetch_with_retry(&self.source, &key, &self.settings.retry).await;
        self.remote_calls += u64::from(calls);

        let value = match outcome {
            RetryOutcome::Value(value) => Some(value),
            RetryOutcome::NotAvailable => None,
            RetryOutcome::Exhausted {
                attempts,
                last_error,
            } => {
                log::warn!("No value for {key} after {attempts} attempts: {last_error}");
                None
            }
        };

        self.cache.insert(&key, value);
        value
    }

    #[must_use]
    pub const fn cache(&self) -> &SampleCache {
        &self.cache
    }

    /// Writes pending cache entries to disk.
    ///
    /// # Errors
    ///
    /// Returns [`SamplerError::Cache`] if the cache file cannot be written.
    pub fn flush_cache(&mut self) -> Result<(), SamplerError> {
        Ok(self.cache.flush()?)
    }

    /// Total remote calls made so far, retries included.
    #[must_use]
    pub const fn remote_calls(&self) -> u64 {
        self.remote_calls
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};

    use async_trait::async_trait;

    use super::*;
    use crate::FetchOutcome;

    #[derive(Default)]
    struct StubSource {
        calls: AtomicU32,
        script: Mutex<VecDeque<FetchOutcome>>,
        seen: Mutex<Vec<String>>,
    }

    impl StubSource {
        fn scripted(outcomes: Vec<FetchOutcome>) -> Self {
            Self {
                script: Mutex::new(outcomes.into()),
                ..Self::default()
            }
        }
    }

    #[async_trait]
    impl GridSource for StubSource {
        async fn fetch(&self, cell: &GridCellKey) -> FetchOutcome {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.seen.lock().unwrap().push(cell.cache_key());
            self.script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(FetchOutcome::Value(20.0))
        }
    }

    fn settings() -> SamplerSettings {
        SamplerSettings {
            coverage_start: NaiveDate::from_ymd_opt(2002, 6, 1).unwrap(),
            convention: LongitudeConvention::ZeroTo360,
            step: GridStep::default(),
            retry: RetryPolicy::immediate(3),
        }
    }

    fn sampler(source: StubSource) -> RemoteGridSampler<StubSource> {
        RemoteGridSampler::new(source, SampleCache::in_memory(), settings())
    }

    fn july() -> NaiveDate {
        NaiveDate::from_ymd_opt(2019, 7, 15).unwrap()
    }

    #[tokio::test]
    async fn same_cell_is_fetched_once() {
        let mut sampler = sampler(StubSource::scripted(vec![FetchOutcome::Value(28.4)]));

        let first = sampler.sample(july(), 25.731, -79.882).await;
        let second = sampler.sample(july(), 25.734, -79.879).await;

        assert_eq!(first, Some(28.4));
        assert_eq!(second, Some(28.4));
        assert_eq!(sampler.remote_calls(), 1);
        assert_eq!(sampler.cache().len(), 1);
    }

    #[tokio::test]
    async fn queries_in_dataset_longitude_convention() {
        let mut sampler = sampler(StubSource::default());
        sampler.sample(july(), 25.731, -79.882).await;

        let seen = sampler.source.seen.lock().unwrap().clone();
        assert_eq!(seen, vec!["2019-07-15|25.73|280.12".to_string()]);
    }

    #[tokio::test]
    async fn exhausted_retries_are_cached_as_no_data() {
        let failures = (0..5)
            .map(|_| FetchOutcome::TransientError("503".to_string()))
            .collect();
        let mut sampler = sampler(StubSource::scripted(failures));

        assert_eq!(sampler.sample(july(), 10.0, 10.0).await, None);
        assert_eq!(sampler.remote_calls(), 3);

        assert_eq!(sampler.sample(july(), 10.0, 10.0).await, None);
        assert_eq!(sampler.remote_calls(), 3);
        assert_eq!(sampler.cache().get(&sampler.key_for(july(), 10.0, 10.0)), Some(None));
    }

    #[tokio::test]
    async fn dates_before_coverage_make_no_calls() {
        let mut sampler = sampler(StubSource::default());
        let old = NaiveDate::from_ymd_opt(2001, 12, 31).unwrap();

        assert_eq!(sampler.sample(old, 10.0, 10.0).await, None);
        assert_eq!(sampler.remote_calls(), 0);
        assert!(sampler.cache().is_empty());
    }

    #[tokio::test]
    async fn cached_entries_skip_the_source() {
        let mut cache = SampleCache::in_memory();
        let key = GridCellKey::new(july(), 1.0, 1.0, GridStep::default());
        cache.insert(&key, Some(15.5));

        let mut sampler = RemoteGridSampler::new(StubSource::default(), cache, settings());
        assert_eq!(sampler.sample(july(), 1.0, 1.0).await, Some(15.5));
        assert_eq!(sampler.source.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn settings_follow_dataset() {
        let dataset = crate::dataset::find_dataset("mur_sst").unwrap();
        let settings = SamplerSettings::from_dataset(&dataset).unwrap();
        assert_eq!(settings.retry.max_attempts, 3);
        assert_eq!(settings.step.decimals(), 2);
        assert_eq!(settings.convention, LongitudeConvention::ZeroTo360);
    }
}
