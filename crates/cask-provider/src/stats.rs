use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Statistics of one garbage collection run.
///
/// `count_deleted`/`bytes_deleted` report unreferenced content even on a
/// dry run; only the physical removal depends on the `delete` flag.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GcStats {
    /// Objects kept (referenced or protected).
    pub count: u64,
    /// Bytes kept.
    pub total_bytes: u64,
    /// Unreferenced objects found.
    pub count_deleted: u64,
    /// Unreferenced bytes found.
    pub bytes_deleted: u64,
    /// Wall-clock duration of the run in milliseconds.
    pub duration_ms: u64,
}

impl GcStats {
    /// Add the counters of `other` into `self`. Durations are not summed;
    /// the caller measures the whole cycle.
    pub fn merge(&mut self, other: &GcStats) {
        self.count += other.count;
        self.total_bytes += other.total_bytes;
        self.count_deleted += other.count_deleted;
        self.bytes_deleted += other.bytes_deleted;
    }

    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration_ms = duration.as_millis() as u64;
        self
    }
}
