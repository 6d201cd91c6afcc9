//! Cache configuration.
//!
//! Controls freshness and capacity of the query cache.

use std::num::NonZeroUsize;
use std::time::Duration;

use serde::Deserialize;

// Default values for cache configuration
const DEFAULT_FRESH_FOR_MS: u64 = 0;
const DEFAULT_MAX_ENTRIES: usize = 200;

/// Query cache configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// How long a fetched entry counts as fresh. Zero means always revalidate.
    pub fresh_for_ms: u64,
    /// Maximum descriptors kept before least-recently-used eviction.
    pub max_entries: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            fresh_for_ms: DEFAULT_FRESH_FOR_MS,
            max_entries: DEFAULT_MAX_ENTRIES,
        }
    }
}

impl From<&crate::config::CacheSettings> for CacheConfig {
    fn from(settings: &crate::config::CacheSettings) -> Self {
        Self {
            fresh_for_ms: settings.fresh_for_ms,
            max_entries: settings.max_entries.get(),
        }
    }
}

impl CacheConfig {
    pub fn fresh_for(&self) -> Duration {
        Duration::from_millis(self.fresh_for_ms)
    }

    /// Returns the entry limit as NonZeroUsize, clamping to 1 if zero.
    pub fn max_entries_non_zero(&self) -> NonZeroUsize {
        NonZeroUsize::new(self.max_entries).unwrap_or(NonZeroUsize::MIN)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_values() {
        let config = CacheConfig::default();
        assert_eq!(config.fresh_for_ms, 0);
        assert_eq!(config.max_entries, 200);
        assert_eq!(config.fresh_for(), Duration::ZERO);
    }

    #[test]
    fn non_zero_clamps_to_min() {
        let config = CacheConfig {
            max_entries: 0,
            ..Default::default()
        };
        assert_eq!(config.max_entries_non_zero().get(), 1);
    }
}
