//! Error types for cache operations.
//!
//! Every fallible operation returns [`CacheError`]. The variants fall into
//! four groups:
//!
//! - **Input**: [`InvalidConfig`](CacheError::InvalidConfig),
//!   [`LargeKey`](CacheError::LargeKey), [`LargeEntry`](CacheError::LargeEntry)
//! - **Capacity**: [`ValueTooBig`](CacheError::ValueTooBig),
//!   [`SegmentFull`](CacheError::SegmentFull)
//! - **Not present**: [`NotFound`](CacheError::NotFound)
//! - **Policy**: [`DuplicateWrite`](CacheError::DuplicateWrite),
//!   [`ForeignLease`](CacheError::ForeignLease)
//!
//! `NotFound` is the dominant miss path and should never be treated as
//! fatal. Write failures are non-fatal too: the entry simply was not
//! persisted, and the corresponding `write_err_count` statistic ticks up.

use thiserror::Error;

/// Errors returned by [`Cache`](crate::Cache) operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum CacheError {
    /// The configuration passed to [`Cache::new`](crate::Cache::new) was
    /// rejected. The message names the offending field.
    #[error("invalid cache configuration: {0}")]
    InvalidConfig(String),

    /// The key exceeds [`MAX_KEY_LEN`](crate::MAX_KEY_LEN) bytes.
    #[error("key is larger than 65535 bytes")]
    LargeKey,

    /// Header + key + value would exceed a quarter of one block, which can
    /// never be stored without starving the rest of the segment.
    #[error("entry is larger than 1/4 of the block size")]
    LargeEntry,

    /// The value does not fit in the current block even after a successful
    /// rotation onto an empty block.
    #[error("value is too big for an empty block")]
    ValueTooBig,

    /// Rotation was required but the next block still has outstanding pins.
    /// Retry after the pinning leases finish, or grow the cache.
    #[error("segment is full, waiting for outstanding leases to drain")]
    SegmentFull,

    /// No live entry for the key: absent, deleted, expired, or rooted in a
    /// draining block.
    #[error("entry not found")]
    NotFound,

    /// The same key was written less than `min_write_interval` seconds ago
    /// and the write was suppressed. The previous value is retained.
    #[error("write suppressed by the minimum write interval")]
    DuplicateWrite,

    /// The lease passed to a read belongs to a different cache instance, so
    /// its pin tally cannot account for this cache's blocks.
    #[error("lease was issued by a different cache")]
    ForeignLease,
}
