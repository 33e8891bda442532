//! Cache configuration.
//!
//! Configuration follows the public-fields pattern: construct the struct,
//! override what you need, hand it to [`Cache::new`](crate::Cache::new).
//! Validation happens at construction time, not here.
//!
//! # Sizing
//!
//! `max_size_mb` is split evenly across 256 segments, and each segment
//! splits its share across 10 blocks. A 64 MB cache therefore has blocks of
//! `64 MiB / 256 / 10 ≈ 26 KiB`, and no single entry (header + key + value)
//! may exceed a quarter of a block. Size the cache for your largest entry:
//!
//! ```text
//! max entry bytes ≈ max_size_mb × 1 MiB / 256 / 10 / 4
//! ```
//!
//! # Eviction timing
//!
//! `eviction_trigger` controls how early a segment starts draining the next
//! block in the rotation ring. With the default `0.5`, once the current
//! block is half full the next block stops serving reads and is reclaimed
//! as soon as its outstanding leases finish. Lower values drain earlier
//! (more head-room, more churn); `1.0` drains as late as possible.
//!
//! # Example
//!
//! ```
//! use arena_cache::{Cache, CacheConfig};
//!
//! let cache = Cache::new(CacheConfig {
//!     min_write_interval: 5,
//!     ..CacheConfig::new("sessions", 64)
//! })
//! .unwrap();
//! assert_eq!(cache.name(), "sessions");
//! ```

use std::sync::Arc;

use crate::timer::Timer;

/// Configuration for a [`Cache`](crate::Cache) instance.
#[derive(Clone)]
pub struct CacheConfig {
    /// Name of the cache instance. Required, must be non-empty. Leases are
    /// keyed by this name inside a [`LeaseCtx`](crate::LeaseCtx).
    pub name: String,

    /// Total arena size in MB. Required, must be at least 32. Fixed for the
    /// lifetime of the cache; all blocks are allocated up front.
    pub max_size_mb: i64,

    /// Fraction of the current block that must be written before the next
    /// block in the ring starts draining. Must be in `(0, 1]`; `0.0` selects
    /// the default of `0.5`.
    pub eviction_trigger: f32,

    /// Minimum seconds between writes of the same key. A re-set inside the
    /// window returns [`DuplicateWrite`](crate::CacheError::DuplicateWrite)
    /// and keeps the old value. `0` disables suppression.
    pub min_write_interval: u32,

    /// Time source. `None` selects wall-clock seconds
    /// ([`SystemTimer`](crate::SystemTimer)).
    pub timer: Option<Arc<dyn Timer>>,
}

impl CacheConfig {
    /// A configuration with the given name and size and default policy:
    /// eviction trigger `0.5`, no write suppression, wall-clock timer.
    pub fn new(name: impl Into<String>, max_size_mb: i64) -> Self {
        Self {
            name: name.into(),
            max_size_mb,
            eviction_trigger: crate::DEFAULT_EVICTION_TRIGGER,
            min_write_interval: 0,
            timer: None,
        }
    }
}

impl std::fmt::Debug for CacheConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheConfig")
            .field("name", &self.name)
            .field("max_size_mb", &self.max_size_mb)
            .field("eviction_trigger", &self.eviction_trigger)
            .field("min_write_interval", &self.min_write_interval)
            .field("timer", &self.timer.as_ref().map(|_| "custom"))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = CacheConfig::new("c", 64);
        assert_eq!(config.name, "c");
        assert_eq!(config.max_size_mb, 64);
        assert_eq!(config.eviction_trigger, 0.5);
        assert_eq!(config.min_write_interval, 0);
        assert!(config.timer.is_none());
    }

    #[test]
    fn test_debug_does_not_print_timer_internals() {
        let config = CacheConfig::new("c", 64);
        let s = format!("{config:?}");
        assert!(s.contains("\"c\""));
        assert!(s.contains("max_size_mb"));
    }
}
