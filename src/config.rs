//! Engine configuration.

use crate::pages::sidecar::DEFAULT_SIDECAR_NAME;
use std::time::Duration;

/// Tunables for the page engine and its owner loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Quiet period after the last change signal before a reload runs.
    pub debounce: Duration,
    /// Longest a reload may be deferred while signals keep arriving.
    pub max_debounce: Duration,
    /// Poll interval for directories where native watching is unavailable.
    pub poll_interval: Duration,
    /// Capacity of the [`crate::pages::PagesUpdate`] broadcast channel.
    pub update_buffer: usize,
    /// Name of the hidden metadata file kept in every page directory.
    pub sidecar_name: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            debounce: Duration::from_millis(200),
            max_debounce: Duration::from_secs(2),
            poll_interval: Duration::from_millis(1000),
            update_buffer: 256,
            sidecar_name: DEFAULT_SIDECAR_NAME.to_string(),
        }
    }
}
