//! The cache: hash-sharded fan-out over 256 segments.
//!
//! `Cache` itself holds no entry state — it hashes the key, picks the
//! segment with the low byte of the hash, and delegates under that
//! segment's lock. Statistics are additive across segments and read
//! without locking.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                           Cache                             │
//! │                                                             │
//! │  hash(key) & 255  ──▶  Segment selection                    │
//! │                                                             │
//! │  ┌───────────┐ ┌───────────┐       ┌───────────┐            │
//! │  │ Segment 0 │ │ Segment 1 │  ...  │Segment 255│            │
//! │  │  [Mutex]  │ │  [Mutex]  │       │  [Mutex]  │            │
//! │  │ 10 blocks │ │ 10 blocks │       │ 10 blocks │            │
//! │  └───────────┘ └───────────┘       └───────────┘            │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Reads and leases
//!
//! [`get`](Cache::get) and [`peek`](Cache::peek) return zero-copy views
//! into the arena, so every read goes through a [`Lease`]: the view
//! borrows the lease, the lease pins the block holding the entry, and
//! dropping the lease (or its [`LeaseCtx`](crate::LeaseCtx)) returns the
//! pins so eviction can reclaim the block.

use std::hash::BuildHasher;
use std::sync::atomic::Ordering::Relaxed;
use std::sync::Arc;

use hashbrown::DefaultHashBuilder;
use tracing::debug;

use crate::codec::ArenaValue;
use crate::config::CacheConfig;
use crate::error::CacheError;
use crate::lease::Lease;
use crate::segment::Segment;
use crate::timer::SystemTimer;
use crate::{BLOCK_COUNT, DEFAULT_EVICTION_TRIGGER, MIN_SIZE_MB, SEG_COUNT, SEG_MASK, UNIT_MB};

/// A concurrent, arena-backed cache with zero-copy reads.
///
/// See the [crate docs](crate) for the design overview and the
/// [`codec`](crate::codec) module for the serialization contract stored
/// values implement.
///
/// # Example
///
/// ```
/// use arena_cache::{Cache, CacheConfig, LeaseCtx};
///
/// let cache = Cache::new(CacheConfig::new("pages", 64)).unwrap();
/// cache.set(b"home", "<html>...</html>", 0).unwrap();
///
/// let ctx = LeaseCtx::new();
/// let lease = ctx.get_lease(&cache);
/// let body: &str = cache.get::<str>(&lease, b"home").unwrap();
/// assert_eq!(body, "<html>...</html>");
/// ctx.done();
/// ```
pub struct Cache {
    name: String,
    hash_builder: DefaultHashBuilder,
    segments: Box<[Segment]>,
}

impl Cache {
    /// Builds a cache from `config`.
    ///
    /// The arena (`max_size_mb` megabytes) is allocated up front and split
    /// evenly into 256 segments of 10 blocks each.
    ///
    /// # Errors
    ///
    /// [`CacheError::InvalidConfig`] when the name is empty, the size is
    /// below 32 MB, or the eviction trigger falls outside `(0, 1]`
    /// (`0.0` selects the default of `0.5`).
    pub fn new(config: CacheConfig) -> Result<Self, CacheError> {
        if config.name.is_empty() {
            return Err(CacheError::InvalidConfig(
                "cache name cannot be empty".to_string(),
            ));
        }
        if config.max_size_mb < MIN_SIZE_MB {
            return Err(CacheError::InvalidConfig(format!(
                "cache size must be at least {MIN_SIZE_MB} MB"
            )));
        }
        if !(0.0..=1.0).contains(&config.eviction_trigger) {
            return Err(CacheError::InvalidConfig(
                "eviction trigger must be in (0, 1]".to_string(),
            ));
        }
        let eviction_trigger = if config.eviction_trigger == 0.0 {
            DEFAULT_EVICTION_TRIGGER
        } else {
            config.eviction_trigger
        };
        let timer = config
            .timer
            .unwrap_or_else(|| Arc::new(SystemTimer) as Arc<dyn crate::timer::Timer>);

        let block_size = (config.max_size_mb * UNIT_MB) as usize / SEG_COUNT / BLOCK_COUNT;
        let segments: Vec<Segment> = (0..SEG_COUNT)
            .map(|i| {
                Segment::new(
                    block_size,
                    i as u16,
                    eviction_trigger,
                    config.min_write_interval,
                    timer.clone(),
                )
            })
            .collect();

        debug!(
            name = %config.name,
            max_size_mb = config.max_size_mb,
            block_size,
            "cache created"
        );
        Ok(Self {
            name: config.name,
            hash_builder: DefaultHashBuilder::default(),
            segments: segments.into_boxed_slice(),
        })
    }

    /// Name of this cache instance. Leases are keyed by it inside a
    /// [`LeaseCtx`](crate::LeaseCtx).
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Stores `value` under `key`, replacing any previous entry.
    ///
    /// The value's [`size`](ArenaValue::size) runs before the segment lock
    /// is taken; [`place`](ArenaValue::place) runs under it. `expire_seconds`
    /// of `0` means the entry never expires.
    ///
    /// # Errors
    ///
    /// [`LargeKey`](CacheError::LargeKey),
    /// [`LargeEntry`](CacheError::LargeEntry),
    /// [`SegmentFull`](CacheError::SegmentFull),
    /// [`ValueTooBig`](CacheError::ValueTooBig), or
    /// [`DuplicateWrite`](CacheError::DuplicateWrite) under a nonzero
    /// minimum write interval. Set failures are non-fatal: the entry
    /// simply was not persisted.
    pub fn set<V: ArenaValue + ?Sized>(
        &self,
        key: &[u8],
        value: &V,
        expire_seconds: u32,
    ) -> Result<(), CacheError> {
        let hash = self.hash_builder.hash_one(key);
        let val_size = value.size(true);
        self.segment_for(hash).set(key, value, val_size, hash, expire_seconds)
    }

    /// Looks up `key` and returns a zero-copy view pinned by `lease`.
    ///
    /// The view borrows the lease: it stays valid until the lease (or its
    /// owning context) is dropped, which releases the pin and lets the
    /// holding block drain. A hit refreshes the entry's access time.
    ///
    /// # Errors
    ///
    /// [`NotFound`](CacheError::NotFound) when the key is absent, deleted,
    /// expired (the entry is unlinked on the spot), or rooted in a
    /// draining block; [`ForeignLease`](CacheError::ForeignLease) when the
    /// lease belongs to another cache.
    pub fn get<'l, V: ArenaValue + ?Sized>(
        &self,
        lease: &'l Lease<'_>,
        key: &[u8],
    ) -> Result<V::View<'l>, CacheError> {
        self.read::<V>(lease, key, false)
    }

    /// As [`get`](Self::get), without side effects: no hit/miss counting,
    /// no access-time refresh, and no expiry enforcement — a peek can
    /// observe an entry past its deadline that the next `get` will unlink.
    pub fn peek<'l, V: ArenaValue + ?Sized>(
        &self,
        lease: &'l Lease<'_>,
        key: &[u8],
    ) -> Result<V::View<'l>, CacheError> {
        self.read::<V>(lease, key, true)
    }

    fn read<'l, V: ArenaValue + ?Sized>(
        &self,
        lease: &'l Lease<'_>,
        key: &[u8],
        peek: bool,
    ) -> Result<V::View<'l>, CacheError> {
        if !lease.belongs_to(self) {
            return Err(CacheError::ForeignLease);
        }
        let hash = self.hash_builder.hash_one(key);
        let seg_id = (hash & SEG_MASK) as usize;
        // SAFETY: the pin taken by `Segment::get` is recorded in `lease`
        // right below, and the returned view borrows `lease`, so the view
        // cannot outlive the drop that releases the pin.
        let (view, block) = unsafe { self.segments[seg_id].get::<V>(key, hash, peek) }?;
        lease.record(seg_id, block as usize);
        Ok(view)
    }

    /// Deletes `key`. Returns whether a live entry was removed.
    pub fn del(&self, key: &[u8]) -> bool {
        let hash = self.hash_builder.hash_one(key);
        self.segment_for(hash).del(key, hash)
    }

    #[inline]
    fn segment_for(&self, hash: u64) -> &Segment {
        &self.segments[(hash & SEG_MASK) as usize]
    }

    #[inline]
    pub(crate) fn segment(&self, idx: usize) -> &Segment {
        &self.segments[idx]
    }

    /// Number of block drains performed.
    pub fn eviction_count(&self) -> i64 {
        self.sum(|s| s.stats.eviction_count.load(Relaxed))
    }

    /// Number of rotations refused because the next block was still
    /// pinned. A growing value means leases are held too long or the
    /// cache is undersized.
    pub fn eviction_wait_count(&self) -> i64 {
        self.sum(|s| s.stats.eviction_wait_count.load(Relaxed))
    }

    /// Number of entries unlinked because they had expired.
    pub fn expire_count(&self) -> i64 {
        self.sum(|s| s.stats.expire_count.load(Relaxed))
    }

    /// Number of live entries.
    pub fn entry_count(&self) -> i64 {
        self.sum(|s| s.stats.entry_count.load(Relaxed))
    }

    /// Number of lookups that found a live entry.
    pub fn hit_count(&self) -> i64 {
        self.sum(|s| s.stats.hit_count.load(Relaxed))
    }

    /// Number of lookups that found nothing.
    pub fn miss_count(&self) -> i64 {
        self.sum(|s| s.stats.miss_count.load(Relaxed))
    }

    /// Total lookups: hits plus misses. Peeks are not counted.
    pub fn read_count(&self) -> i64 {
        self.hit_count() + self.miss_count()
    }

    /// Number of successful writes.
    pub fn write_count(&self) -> i64 {
        self.sum(|s| s.stats.write_count.load(Relaxed))
    }

    /// Number of failed writes (excluding suppressed duplicates).
    pub fn write_err_count(&self) -> i64 {
        self.sum(|s| s.stats.write_err_count.load(Relaxed))
    }

    /// Number of writes that replaced a live entry for the same key.
    pub fn overwrite_count(&self) -> i64 {
        self.sum(|s| s.stats.overwrite_count.load(Relaxed))
    }

    /// Number of writes suppressed by the minimum write interval.
    pub fn skip_write_count(&self) -> i64 {
        self.sum(|s| s.stats.skip_write_count.load(Relaxed))
    }

    /// Ratio of hits over lookups; `0.0` before any lookup.
    pub fn hit_rate(&self) -> f64 {
        let hits = self.hit_count();
        let lookups = hits + self.miss_count();
        if lookups == 0 {
            0.0
        } else {
            hits as f64 / lookups as f64
        }
    }

    /// Bytes written into arena blocks and total bytes reserved, summed
    /// over every segment. Takes each segment's lock in turn.
    pub fn mem_stat(&self) -> (i64, i64) {
        let mut used = 0;
        let mut reserved = 0;
        for seg in self.segments.iter() {
            let (u, r) = seg.mem();
            used += u;
            reserved += r;
        }
        (used, reserved)
    }

    /// Zeroes the activity counters, taking each segment's lock in turn.
    /// Not atomic with in-flight operations: counters may be nonzero again
    /// immediately.
    pub fn reset_statistics(&self) {
        for seg in self.segments.iter() {
            seg.reset_statistics();
        }
    }

    fn sum(&self, f: impl Fn(&Segment) -> i64) -> i64 {
        self.segments.iter().map(f).sum()
    }
}

impl std::fmt::Debug for Cache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cache")
            .field("name", &self.name)
            .field("entry_count", &self.entry_count())
            .finish()
    }
}
