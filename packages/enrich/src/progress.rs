//! Progress reporting for enrichment stages.
//!
//! Stages report through [`ProgressCallback`] so the library stays free of
//! any rendering backend. The CLI plugs in `indicatif` bars; tests and
//! library callers use [`NullProgress`].

/// Receives progress updates from a running stage.
pub trait ProgressCallback: Send + Sync {
    /// Set the number of features the stage will visit.
    fn set_total(&self, total: u64);

    /// Advance by `delta` features.
    fn inc(&self, delta: u64);

    /// Mark the stage as complete with a final message.
    fn finish(&self, msg: String);
}

/// Ignores all progress updates.
pub struct NullProgress;

impl ProgressCallback for NullProgress {
    fn set_total(&self, _total: u64) {}
    fn inc(&self, _delta: u64) {}
    fn finish(&self, _msg: String) {}
}
