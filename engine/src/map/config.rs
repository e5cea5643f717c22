//! Construction-time configuration for a [`super::MapEngine`].

use std::time::Duration;

/// Tunable, per-map configuration: fixed for the duration of a sweeper pass.
#[derive(Debug, Clone)]
pub struct MapConfig {
    /// Quiescence duration a key's last write must exceed before it becomes
    /// eligible for a batch notification.
    pub batch_wait: Duration,
    /// Cursor-scan chunk size used by paginated reads with no search
    /// pattern. Recommended 100.
    pub scan_chunk_pagination: usize,
    /// Cursor-scan chunk size used by full iteration and by paginated reads
    /// with a search pattern. Recommended 1000.
    pub scan_chunk_full: usize,
    /// Period between Expiration Sweeper and Batch Sweeper passes. Fixed at
    /// 1 Hz by default, but overridable for fast-clock tests.
    pub sweep_period: Duration,
}

impl Default for MapConfig {
    fn default() -> Self {
        Self {
            batch_wait: Duration::from_secs(2),
            scan_chunk_pagination: 100,
            scan_chunk_full: 1000,
            sweep_period: Duration::from_secs(1),
        }
    }
}

impl MapConfig {
    /// Creates a config with the given batch window and the default chunk
    /// sizes and sweep period.
    #[must_use]
    pub fn with_batch_wait(batch_wait: Duration) -> Self {
        Self {
            batch_wait,
            ..Self::default()
        }
    }
}
