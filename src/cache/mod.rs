//! Fast-access mirror of building records
//!
//! The mirror is a derived, expiring projection of the durable building
//! store keyed by building address. It exists for latency-sensitive reads
//! only: entries may be stale or missing at any time and nothing that needs
//! to be correct reads from it.
//!
//! ## Write-through protocol
//!
//! 1. The durable store is written first and is authoritative.
//! 2. The mirror copy is then read, merged with the same field changes and
//!    rewritten with a refreshed expiry ([`BuildingMirror::merge_update`]).
//! 3. Any failure in step 2 is logged and swallowed.
//!
//! Full rewrites ([`BuildingMirror::put_building`]) replace the whole entry
//! and may carry their own TTL.

pub mod mirror;
pub mod store;

pub use mirror::BuildingMirror;
pub use store::{spawn_cleanup_task, CacheBackend, CacheEntry, CacheStats, ContentCache};

use std::time::Duration;

/// One day, the default mirror expiry
pub const ONE_DAY: Duration = Duration::from_secs(24 * 60 * 60);

/// Cache configuration
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Maximum number of entries kept in memory
    pub max_entries: usize,
    /// Expiry applied when a building is (re)written without an explicit TTL
    pub building_ttl: Duration,
    /// Cleanup interval
    pub cleanup_interval: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: 10_000,
            building_ttl: ONE_DAY,
            cleanup_interval: Duration::from_secs(60),
        }
    }
}
