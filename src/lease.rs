//! Lease context: batched pin reference counting for zero-copy reads.
//!
//! Every view a [`get`](crate::Cache::get) returns points straight into an
//! arena block, so the block must not be reclaimed while the view is
//! alive. Incrementing a shared counter per read would contend; instead
//! each operation carries a [`Lease`] — a dense per-`(segment, block)`
//! tally — and the cache batches all of an operation's pins into it. When
//! the lease drops, one decrement per non-zero cell is issued under the
//! owning segment's lock, and any block whose pins reach zero becomes
//! drainable.
//!
//! # Usage
//!
//! A [`LeaseCtx`] is created at the entry of a caller operation and holds
//! one lease per cache (keyed by cache name). Reads borrow the lease, so
//! the borrow checker enforces the protocol: no view can outlive the
//! context that pins it.
//!
//! ```
//! use arena_cache::{Cache, CacheConfig, LeaseCtx};
//!
//! let cache = Cache::new(CacheConfig::new("users", 32)).unwrap();
//! cache.set(b"u1", "alice", 0).unwrap();
//!
//! let ctx = LeaseCtx::new();
//! let lease = ctx.get_lease(&cache);
//! let name: &str = cache.get::<str>(&lease, b"u1").unwrap();
//! assert_eq!(name, "alice");
//! // `ctx.done()` (or just dropping everything) returns the pins.
//! drop(name);
//! ctx.done();
//! ```
//!
//! Holding a lease for a long time keeps its blocks pinned; a segment
//! whose next block cannot drain eventually refuses writes with
//! [`SegmentFull`](crate::CacheError::SegmentFull). Scope contexts to one
//! operation.

use core::cell::{Cell, RefCell};
use core::ptr;
use std::rc::Rc;

use hashbrown::HashMap;
use parking_lot::Mutex;

use crate::cache::Cache;
use crate::{BLOCK_COUNT, SEG_COUNT};

const TALLY_LEN: usize = SEG_COUNT * BLOCK_COUNT;

/// Tally boxes are recycled through a small global pool; a released box
/// has already been zeroed by the drop walk.
const POOL_CAP: usize = 64;

static TALLY_POOL: Mutex<Vec<Box<[Cell<i32>]>>> = Mutex::new(Vec::new());

fn acquire_tally() -> Box<[Cell<i32>]> {
    if let Some(tally) = TALLY_POOL.lock().pop() {
        return tally;
    }
    (0..TALLY_LEN).map(|_| Cell::new(0)).collect()
}

fn release_tally(tally: Box<[Cell<i32>]>) {
    let mut pool = TALLY_POOL.lock();
    if pool.len() < POOL_CAP {
        pool.push(tally);
    }
}

/// Per-operation pin tally against one cache.
///
/// Obtained from [`LeaseCtx::get_lease`]. Every successful `get`/`peek`
/// increments the cell for the `(segment, block)` holding the returned
/// value; dropping the lease issues the matching decrements. Views borrow
/// the lease, so pins cannot be returned while a view is still alive.
pub struct Lease<'c> {
    cache: &'c Cache,
    keeps: Box<[Cell<i32>]>,
}

impl<'c> Lease<'c> {
    pub(crate) fn new(cache: &'c Cache) -> Self {
        Self {
            cache,
            keeps: acquire_tally(),
        }
    }

    /// Whether this lease was issued by `cache`.
    pub(crate) fn belongs_to(&self, cache: &Cache) -> bool {
        ptr::eq(self.cache as *const Cache, cache as *const Cache)
    }

    pub(crate) fn record(&self, seg: usize, block: usize) {
        let cell = &self.keeps[seg * BLOCK_COUNT + block];
        cell.set(cell.get() + 1);
    }

    /// Number of pins currently held.
    pub fn pin_count(&self) -> i64 {
        self.keeps.iter().map(|c| c.get() as i64).sum()
    }
}

impl Drop for Lease<'_> {
    fn drop(&mut self) {
        let tally = std::mem::take(&mut self.keeps);
        for (i, cell) in tally.iter().enumerate() {
            let k = cell.get();
            if k > 0 {
                self.cache
                    .segment(i / BLOCK_COUNT)
                    .update(i % BLOCK_COUNT, -(k as i64));
                cell.set(0);
            }
        }
        release_tally(tally);
    }
}

impl std::fmt::Debug for Lease<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Lease")
            .field("cache", &self.cache.name())
            .field("pin_count", &self.pin_count())
            .finish()
    }
}

/// Per-operation map of cache name → [`Lease`].
///
/// Created at the entry of a caller operation, consumed exactly once by
/// [`done`](Self::done) (or by falling out of scope — finalization is the
/// drop). Multiple reads against the same cache share one lease; reads
/// from different caches get distinct leases.
pub struct LeaseCtx<'c> {
    leases: RefCell<HashMap<String, Rc<Lease<'c>>>>,
}

impl<'c> LeaseCtx<'c> {
    /// An empty context.
    pub fn new() -> Self {
        Self {
            leases: RefCell::new(HashMap::new()),
        }
    }

    /// The lease for `cache`, lazily created on first use.
    ///
    /// Leases are keyed by cache name: two caches sharing a name cannot
    /// share a context.
    pub fn get_lease(&self, cache: &'c Cache) -> Rc<Lease<'c>> {
        self.leases
            .borrow_mut()
            .entry(cache.name().to_string())
            .or_insert_with(|| Rc::new(Lease::new(cache)))
            .clone()
    }

    /// Finalizes the context, returning every pin to its cache.
    ///
    /// Equivalent to dropping the context; spelled out so call sites read
    /// like the operation boundary they are.
    pub fn done(self) {}
}

impl Default for LeaseCtx<'_> {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for LeaseCtx<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LeaseCtx")
            .field("leases", &self.leases.borrow().len())
            .finish()
    }
}
