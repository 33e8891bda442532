//! Locked cache shard: rotating arena blocks, slot table, entry lifecycle.
//!
//! A segment owns one slice of the key space and everything needed to serve
//! it: ten equal arena blocks arranged in a logical ring, a slot table of
//! entry pointers, the eviction state machine, and a set of statistics
//! counters. All structural state lives behind one `parking_lot::Mutex`;
//! the counters are relaxed atomics so aggregate statistics can be read
//! without taking any lock.
//!
//! # Block rotation
//!
//! Exactly one block is *current* (writable); the block after it in the
//! ring is the designated *eviction target*. Entries bump-allocate out of
//! the current block until it runs out of space, at which point the ring
//! rotates — but only once the target block has been drained, and a block
//! cannot drain while outstanding leases still pin it:
//!
//! ```text
//!        ┌────────┐ rotate ┌────────┐ becomes next ┌──────────┐
//!   ───▶ │Current │ ─────▶ │  Full  │ ───────────▶ │ Draining │
//!        └────────┘        └────────┘              └────┬─────┘
//!             ▲                                  pins hit zero
//!             │            ┌────────┐                   │
//!             └─────────── │ Empty  │ ◀─────────────────┘
//!                rotate    └────────┘
//! ```
//!
//! Draining removes every slot pointer rooted in the block and resets its
//! write cursor; the bytes themselves are overwritten lazily by later
//! allocations. Reads of entries rooted in the eviction target stop being
//! admitted as soon as the current block passes the eviction trigger, so
//! the target's pin count can only fall.
//!
//! # Slot table
//!
//! The table is a single flat array of capacity `slot_cap × 256`, sliced
//! into 256 logical slots addressed by the second byte of the key hash.
//! Each slot keeps its live entries sorted by `hash16` (bytes 2..4 of the
//! hash); lookups binary-search the slot and resolve `hash16` ties by
//! comparing key bytes in place in the arena. When any slot fills, every
//! slot's capacity doubles and live entries are copied to their new stride
//! origins.

use std::sync::atomic::{AtomicI64, Ordering::Relaxed};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::trace;

use crate::buffer::Buffer;
use crate::codec::{ArenaValue, RangeReader, RangeWriter};
use crate::entry::{self, EntryHdr, EntryPtr, ENTRY_HDR_SIZE};
use crate::error::CacheError;
use crate::timer::Timer;
use crate::{BLOCK_COUNT, MAX_KEY_LEN, SLOT_COUNT};

/// Per-segment statistics. Relaxed atomics: mutated under the segment lock
/// but summed across segments without it, so values are eventually
/// consistent with real activity.
#[derive(Debug, Default)]
pub(crate) struct SegmentStats {
    pub(crate) hit_count: AtomicI64,
    pub(crate) miss_count: AtomicI64,
    pub(crate) entry_count: AtomicI64,
    pub(crate) eviction_count: AtomicI64,
    pub(crate) eviction_wait_count: AtomicI64,
    pub(crate) expire_count: AtomicI64,
    pub(crate) overwrite_count: AtomicI64,
    pub(crate) skip_write_count: AtomicI64,
    pub(crate) write_count: AtomicI64,
    pub(crate) write_err_count: AtomicI64,
}

impl SegmentStats {
    /// Zeroes every activity counter. `entry_count` tracks live entries,
    /// not activity, and survives a reset.
    fn reset(&self) {
        self.hit_count.store(0, Relaxed);
        self.miss_count.store(0, Relaxed);
        self.eviction_count.store(0, Relaxed);
        self.eviction_wait_count.store(0, Relaxed);
        self.expire_count.store(0, Relaxed);
        self.overwrite_count.store(0, Relaxed);
        self.skip_write_count.store(0, Relaxed);
        self.write_count.store(0, Relaxed);
        self.write_err_count.store(0, Relaxed);
    }
}

/// One lock-sharded slice of the cache.
pub(crate) struct Segment {
    pub(crate) stats: SegmentStats,
    inner: Mutex<SegmentInner>,
}

struct SegmentInner {
    seg_id: u16,
    bufs: [Buffer; BLOCK_COUNT],
    /// Index of the current writable block.
    cur_block: usize,
    /// Absolute byte offset within the current block past which the next
    /// block stops serving reads and drains as soon as its pins clear.
    eviction_size: usize,
    min_write_interval: u32,
    timer: Arc<dyn Timer>,
    /// Capacity of each logical slot within `slots_data`.
    slot_cap: u32,
    /// Live entry count per slot.
    slots_len: [u32; SLOT_COUNT],
    /// Flat array of `slot_cap × SLOT_COUNT` entry pointers.
    slots_data: Vec<EntryPtr>,
}

impl Segment {
    pub(crate) fn new(
        block_size: usize,
        seg_id: u16,
        eviction_trigger: f32,
        min_write_interval: u32,
        timer: Arc<dyn Timer>,
    ) -> Self {
        Self {
            stats: SegmentStats::default(),
            inner: Mutex::new(SegmentInner {
                seg_id,
                bufs: std::array::from_fn(|_| Buffer::new(block_size)),
                cur_block: 0,
                eviction_size: (block_size as f64 * eviction_trigger as f64) as usize,
                min_write_interval,
                timer,
                slot_cap: 1,
                slots_len: [0; SLOT_COUNT],
                slots_data: vec![EntryPtr::default(); SLOT_COUNT],
            }),
        }
    }

    /// Stores `value` under `key`. `val_size` is the byte count the value's
    /// `size` primitive reported; `place` runs here, under the lock.
    pub(crate) fn set<V: ArenaValue + ?Sized>(
        &self,
        key: &[u8],
        value: &V,
        val_size: u32,
        hash: u64,
        expire_seconds: u32,
    ) -> Result<(), CacheError> {
        let result = self
            .inner
            .lock()
            .set(key, value, val_size, hash, expire_seconds, &self.stats);
        match result {
            Ok(()) => self.stats.write_count.fetch_add(1, Relaxed),
            Err(CacheError::DuplicateWrite) => self.stats.skip_write_count.fetch_add(1, Relaxed),
            Err(_) => self.stats.write_err_count.fetch_add(1, Relaxed),
        };
        result
    }

    /// Looks up `key` and builds a view over its value bytes, pinning the
    /// holding block. On success the returned block index must be recorded
    /// in a lease that will eventually call [`update`](Self::update) with a
    /// matching decrement.
    ///
    /// # Safety
    ///
    /// The caller chooses the view lifetime `'a`. The view dereferences
    /// arena bytes of the returned block, so `'a` must end before the pin
    /// taken here is released (the lease protocol: views borrow the lease,
    /// the lease decrements on drop).
    pub(crate) unsafe fn get<'a, V: ArenaValue + ?Sized>(
        &self,
        key: &[u8],
        hash: u64,
        peek: bool,
    ) -> Result<(V::View<'a>, u16), CacheError> {
        let mut inner = self.inner.lock();
        let (block, val_off, val_len) = inner.locate(key, hash, peek, &self.stats)?;
        let ptr = inner.bufs[block].range_ptr(val_off, val_len);
        // SAFETY: the pin taken below freezes this block's bytes (no write
        // or reset touches a block with `used > 0`) and the buffer's heap
        // allocation lives as long as the cache, which outlives `'a` via
        // the lease it is borrowed from.
        let bytes: &'a [u8] = unsafe { core::slice::from_raw_parts(ptr, val_len) };
        match V::view(RangeReader::new(bytes), 0) {
            Some(view) => {
                if !peek {
                    self.stats.hit_count.fetch_add(1, Relaxed);
                }
                inner.bufs[block].used += 1;
                Ok((view, block as u16))
            }
            None => {
                if !peek {
                    self.stats.miss_count.fetch_add(1, Relaxed);
                }
                Err(CacheError::NotFound)
            }
        }
    }

    /// Removes `key`. Returns whether a live entry was unlinked.
    pub(crate) fn del(&self, key: &[u8], hash: u64) -> bool {
        let mut inner = self.inner.lock();
        let slot_id = slot_id_of(hash);
        let (idx, found) = inner.lookup(slot_id, hash16_of(hash), key);
        if found {
            inner.del_entry_ptr(slot_id, idx, &self.stats);
        }
        found
    }

    /// Adjusts a block's pin count. When the eviction target's pins reach
    /// zero while the current block is past the trigger threshold, the
    /// target drains immediately.
    pub(crate) fn update(&self, block: usize, delta: i64) {
        let mut inner = self.inner.lock();
        inner.bufs[block].used += delta;
        debug_assert!(inner.bufs[block].used >= 0);
        let next = inner.next_block();
        if block == next
            && inner.bufs[block].used == 0
            && inner.bufs[block].index > 0
            && inner.bufs[inner.cur_block].index >= inner.eviction_size
        {
            inner.drain(block, &self.stats);
        }
    }

    /// Bytes written and bytes reserved across all blocks.
    pub(crate) fn mem(&self) -> (i64, i64) {
        let inner = self.inner.lock();
        let used = inner.bufs.iter().map(|b| b.index as i64).sum();
        let size = inner.bufs.iter().map(|b| b.size() as i64).sum();
        (used, size)
    }

    /// Zeroes activity counters. Takes the segment lock so the reset lands
    /// between operations, though concurrent activity may tick counters up
    /// again immediately.
    pub(crate) fn reset_statistics(&self) {
        let _guard = self.inner.lock();
        self.stats.reset();
    }
}

impl SegmentInner {
    #[inline]
    fn next_block(&self) -> usize {
        (self.cur_block + 1) % BLOCK_COUNT
    }

    fn set<V: ArenaValue + ?Sized>(
        &mut self,
        key: &[u8],
        value: &V,
        val_size: u32,
        hash: u64,
        expire_seconds: u32,
        stats: &SegmentStats,
    ) -> Result<(), CacheError> {
        if key.len() > MAX_KEY_LEN {
            return Err(CacheError::LargeKey);
        }
        let total = ENTRY_HDR_SIZE + key.len() + val_size as usize;
        if total > self.bufs[0].size() / 4 {
            return Err(CacheError::LargeEntry);
        }

        let slot_id = slot_id_of(hash);
        let hash16 = hash16_of(hash);
        let now = self.timer.now();

        let (idx, found) = self.lookup(slot_id, hash16, key);
        if found {
            let ptr = self.slot(slot_id)[idx];
            let hdr = EntryHdr::read(
                self.bufs[ptr.block as usize].slice(ptr.offset as usize, ENTRY_HDR_SIZE),
            );
            // An interval of zero disables suppression entirely, including
            // for writes landing on the same timer tick.
            if self.min_write_interval > 0
                && now.saturating_sub(hdr.access_time) <= self.min_write_interval
            {
                return Err(CacheError::DuplicateWrite);
            }
            // Arena bytes of the old entry cannot be edited in place; mark
            // it deleted and unlink so the drain walk skips it.
            stats.overwrite_count.fetch_add(1, Relaxed);
            self.del_entry_ptr(slot_id, idx, stats);
        }

        if self.bufs[self.cur_block].free() < total {
            self.rotate(stats)?;
            if self.bufs[self.cur_block].free() < total {
                return Err(CacheError::ValueTooBig);
            }
        }

        let block = self.cur_block;
        let off = self.bufs[block].alloc(total);
        let hdr = EntryHdr {
            access_time: now,
            expire_at: if expire_seconds > 0 {
                now.saturating_add(expire_seconds)
            } else {
                0
            },
            key_len: key.len() as u16,
            hash16,
            val_len: val_size,
            deleted: false,
            slot_id,
        };
        {
            // SAFETY: the range was allocated just above, under the
            // segment lock; no view or concurrent writer can touch it.
            let bs = unsafe { self.bufs[block].slice_mut(off, total) };
            hdr.write(bs);
            bs[ENTRY_HDR_SIZE..ENTRY_HDR_SIZE + key.len()].copy_from_slice(key);
            let mut w = RangeWriter::new(&mut bs[ENTRY_HDR_SIZE + key.len()..]);
            value.place(&mut w, 0, true);
        }

        // Rotation may have drained entries out of this slot; look the
        // insertion point up again.
        let (idx, _) = self.lookup(slot_id, hash16, key);
        self.insert_entry_ptr(
            slot_id,
            idx,
            EntryPtr {
                offset: off as u64,
                hash16,
                key_len: key.len() as u16,
                block: block as u16,
            },
            stats,
        );
        Ok(())
    }

    /// Finds the live entry for `key` and returns its block and value
    /// range. Every negative path is a `NotFound`; non-peek lookups count
    /// the miss, expire aggressively, and refresh the access time on hit.
    fn locate(
        &mut self,
        key: &[u8],
        hash: u64,
        peek: bool,
        stats: &SegmentStats,
    ) -> Result<(usize, usize, usize), CacheError> {
        let miss = |stats: &SegmentStats| {
            if !peek {
                stats.miss_count.fetch_add(1, Relaxed);
            }
            Err(CacheError::NotFound)
        };

        let slot_id = slot_id_of(hash);
        let (idx, found) = self.lookup(slot_id, hash16_of(hash), key);
        if !found {
            return miss(stats);
        }
        let ptr = self.slot(slot_id)[idx];
        let block = ptr.block as usize;

        // Drain state: once the current block passes the eviction trigger,
        // entries rooted in the next-eviction target are invisible so the
        // target's pin count can only fall.
        if block == self.next_block() && self.bufs[self.cur_block].index >= self.eviction_size {
            return miss(stats);
        }

        let off = ptr.offset as usize;
        let hdr = EntryHdr::read(self.bufs[block].slice(off, ENTRY_HDR_SIZE));
        if hdr.deleted {
            return miss(stats);
        }
        if !peek {
            let now = self.timer.now();
            if hdr.is_expired(now) {
                self.del_entry_ptr(slot_id, idx, stats);
                stats.expire_count.fetch_add(1, Relaxed);
                stats.miss_count.fetch_add(1, Relaxed);
                return Err(CacheError::NotFound);
            }
            entry::stamp_access_time(&self.bufs[block], off, now);
        }

        Ok((
            block,
            off + ENTRY_HDR_SIZE + hdr.key_len as usize,
            hdr.val_len as usize,
        ))
    }

    /// Advances the current block to the eviction target, draining it
    /// first if needed. Refuses while the target is pinned.
    fn rotate(&mut self, stats: &SegmentStats) -> Result<(), CacheError> {
        let next = self.next_block();
        if self.bufs[next].used > 0 {
            stats.eviction_wait_count.fetch_add(1, Relaxed);
            return Err(CacheError::SegmentFull);
        }
        if self.bufs[next].index > 0 {
            self.drain(next, stats);
        }
        trace!(
            seg = self.seg_id,
            from = self.cur_block,
            to = next,
            "rotating write block"
        );
        self.cur_block = next;
        Ok(())
    }

    /// Walks a block's entries in placement order, unlinking each live one
    /// from its slot, then resets the block's write cursor. Only called
    /// with the block's pin count at zero.
    fn drain(&mut self, block: usize, stats: &SegmentStats) {
        let end = self.bufs[block].index;
        let mut off = 0;
        let mut removed = 0u32;
        while off + ENTRY_HDR_SIZE <= end {
            let hdr = EntryHdr::read(self.bufs[block].slice(off, ENTRY_HDR_SIZE));
            if !hdr.deleted {
                if let Some(idx) = self.find_ptr(hdr.slot_id, hdr.hash16, block, off) {
                    self.remove_entry_ptr(hdr.slot_id, idx, stats);
                    removed += 1;
                }
            }
            off += hdr.entry_len();
        }
        self.bufs[block].reset();
        stats.eviction_count.fetch_add(1, Relaxed);
        trace!(seg = self.seg_id, block, removed, "drained block");
    }

    /// The live entries of one logical slot, sorted by `hash16`.
    #[inline]
    fn slot(&self, slot_id: u8) -> &[EntryPtr] {
        let stride = slot_id as usize * self.slot_cap as usize;
        &self.slots_data[stride..stride + self.slots_len[slot_id as usize] as usize]
    }

    /// Binary search by `hash16`, then a linear probe over ties comparing
    /// key length and key bytes in the arena. Returns the match index, or
    /// the sorted insertion point and `false`.
    fn lookup(&self, slot_id: u8, hash16: u16, key: &[u8]) -> (usize, bool) {
        let slot = self.slot(slot_id);
        let mut idx = slot.partition_point(|p| p.hash16 < hash16);
        while idx < slot.len() {
            let p = &slot[idx];
            if p.hash16 != hash16 {
                break;
            }
            if p.key_len as usize == key.len()
                && self.bufs[p.block as usize]
                    .equal_at(key, p.offset as usize + ENTRY_HDR_SIZE)
            {
                return (idx, true);
            }
            idx += 1;
        }
        (idx, false)
    }

    /// Finds the pointer for the entry at (`block`, `off`) during a drain
    /// walk.
    fn find_ptr(&self, slot_id: u8, hash16: u16, block: usize, off: usize) -> Option<usize> {
        let slot = self.slot(slot_id);
        let mut idx = slot.partition_point(|p| p.hash16 < hash16);
        while idx < slot.len() && slot[idx].hash16 == hash16 {
            let p = &slot[idx];
            if p.block as usize == block && p.offset as usize == off {
                return Some(idx);
            }
            idx += 1;
        }
        None
    }

    /// Inserts a pointer at the sorted position `idx` of its slot, doubling
    /// the table first when the slot is at capacity.
    fn insert_entry_ptr(&mut self, slot_id: u8, idx: usize, ptr: EntryPtr, stats: &SegmentStats) {
        if self.slots_len[slot_id as usize] == self.slot_cap {
            self.expand();
        }
        let stride = slot_id as usize * self.slot_cap as usize;
        let len = self.slots_len[slot_id as usize] as usize;
        self.slots_data
            .copy_within(stride + idx..stride + len, stride + idx + 1);
        self.slots_data[stride + idx] = ptr;
        self.slots_len[slot_id as usize] += 1;
        stats.entry_count.fetch_add(1, Relaxed);
    }

    /// Marks the entry deleted in the arena and removes its pointer.
    fn del_entry_ptr(&mut self, slot_id: u8, idx: usize, stats: &SegmentStats) {
        let stride = slot_id as usize * self.slot_cap as usize;
        let ptr = self.slots_data[stride + idx];
        entry::stamp_deleted(&self.bufs[ptr.block as usize], ptr.offset as usize);
        self.remove_entry_ptr(slot_id, idx, stats);
    }

    /// Removes a pointer without touching the arena; used by the drain
    /// walk, which resets the whole block afterwards.
    fn remove_entry_ptr(&mut self, slot_id: u8, idx: usize, stats: &SegmentStats) {
        let stride = slot_id as usize * self.slot_cap as usize;
        let len = self.slots_len[slot_id as usize] as usize;
        self.slots_data
            .copy_within(stride + idx + 1..stride + len, stride + idx);
        self.slots_len[slot_id as usize] -= 1;
        stats.entry_count.fetch_sub(1, Relaxed);
    }

    /// Doubles every slot's capacity, copying each slot's live entries to
    /// its new stride origin.
    fn expand(&mut self) {
        let old_cap = self.slot_cap as usize;
        let new_cap = old_cap * 2;
        let mut new_data = vec![EntryPtr::default(); new_cap * SLOT_COUNT];
        for slot_id in 0..SLOT_COUNT {
            let len = self.slots_len[slot_id] as usize;
            let old = slot_id * old_cap;
            let new = slot_id * new_cap;
            new_data[new..new + len].copy_from_slice(&self.slots_data[old..old + len]);
        }
        self.slot_cap = new_cap as u32;
        self.slots_data = new_data;
    }
}

#[inline]
pub(crate) fn slot_id_of(hash: u64) -> u8 {
    (hash >> 8) as u8
}

#[inline]
pub(crate) fn hash16_of(hash: u64) -> u16 {
    (hash >> 16) as u16
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    struct FakeTimer(AtomicU32);

    impl FakeTimer {
        fn at(start: u32) -> Arc<Self> {
            Arc::new(Self(AtomicU32::new(start)))
        }

        fn advance(&self, secs: u32) {
            self.0.fetch_add(secs, Relaxed);
        }
    }

    impl Timer for FakeTimer {
        fn now(&self) -> u32 {
            self.0.load(Relaxed)
        }
    }

    // Hash with a chosen slot id and hash16; the segment ignores the low
    // byte (the cache consumed it for segment selection).
    fn h(slot_id: u8, hash16: u16) -> u64 {
        ((slot_id as u64) << 8) | ((hash16 as u64) << 16)
    }

    fn segment(block_size: usize, timer: Arc<dyn Timer>) -> Segment {
        Segment::new(block_size, 0, 0.5, 0, timer)
    }

    fn get_str<'a>(seg: &Segment, key: &[u8], hash: u64) -> Result<(&'a str, u16), CacheError> {
        // SAFETY: tests release the pin via `update` only after dropping
        // the view.
        unsafe { seg.get::<str>(key, hash, false) }
    }

    #[test]
    fn test_set_get_round_trip() {
        let seg = segment(4096, FakeTimer::at(100));
        let value = "hello arena";
        seg.set(b"k1", value, value.size(true), h(3, 40), 0).unwrap();

        let (view, block) = get_str(&seg, b"k1", h(3, 40)).unwrap();
        assert_eq!(view, "hello arena");
        assert_eq!(block, 0);
        assert_eq!(seg.stats.hit_count.load(Relaxed), 1);
        assert_eq!(seg.stats.write_count.load(Relaxed), 1);
        assert_eq!(seg.stats.entry_count.load(Relaxed), 1);
        seg.update(block as usize, -1);
    }

    #[test]
    fn test_view_points_into_block() {
        let seg = segment(4096, FakeTimer::at(100));
        let value = "pinned bytes";
        seg.set(b"k", value, value.size(true), h(0, 0), 0).unwrap();

        let (view, block) = get_str(&seg, b"k", h(0, 0)).unwrap();
        let inner = seg.inner.lock();
        let base = inner.bufs[block as usize].range_ptr(0, 0) as usize;
        let end = base + inner.bufs[block as usize].size();
        drop(inner);
        let at = view.as_ptr() as usize;
        assert!(at >= base && at < end);
        seg.update(block as usize, -1);
    }

    #[test]
    fn test_miss_counts() {
        let seg = segment(4096, FakeTimer::at(100));
        assert_eq!(
            get_str(&seg, b"missing", h(1, 2)).unwrap_err(),
            CacheError::NotFound
        );
        assert_eq!(seg.stats.miss_count.load(Relaxed), 1);

        // Peek does not count.
        // SAFETY: no view escapes; the result is an error.
        let err = unsafe { seg.get::<str>(b"missing", h(1, 2), true) }.unwrap_err();
        assert_eq!(err, CacheError::NotFound);
        assert_eq!(seg.stats.miss_count.load(Relaxed), 1);
    }

    #[test]
    fn test_overwrite_replaces_and_counts() {
        let seg = segment(4096, FakeTimer::at(100));
        seg.set(b"k", "one", "one".size(true), h(9, 9), 0).unwrap();
        seg.set(b"k", "two", "two".size(true), h(9, 9), 0).unwrap();

        let (view, block) = get_str(&seg, b"k", h(9, 9)).unwrap();
        assert_eq!(view, "two");
        assert_eq!(seg.stats.overwrite_count.load(Relaxed), 1);
        assert_eq!(seg.stats.entry_count.load(Relaxed), 1);
        seg.update(block as usize, -1);
    }

    #[test]
    fn test_min_write_interval_suppression() {
        let timer = FakeTimer::at(100);
        let seg = Segment::new(4096, 0, 0.5, 5, timer.clone());
        seg.set(b"k", "v1", "v1".size(true), h(0, 1), 0).unwrap();

        timer.advance(2);
        let err = seg.set(b"k", "v2", "v2".size(true), h(0, 1), 0).unwrap_err();
        assert_eq!(err, CacheError::DuplicateWrite);
        assert_eq!(seg.stats.skip_write_count.load(Relaxed), 1);
        assert_eq!(seg.stats.overwrite_count.load(Relaxed), 0);

        // v1 is retained.
        let (view, block) = get_str(&seg, b"k", h(0, 1)).unwrap();
        assert_eq!(view, "v1");
        seg.update(block as usize, -1);

        // Outside the window the write goes through. The hit above also
        // refreshed access_time, so advance past it.
        timer.advance(10);
        seg.set(b"k", "v2", "v2".size(true), h(0, 1), 0).unwrap();
        let (view, block) = get_str(&seg, b"k", h(0, 1)).unwrap();
        assert_eq!(view, "v2");
        seg.update(block as usize, -1);
    }

    #[test]
    fn test_zero_interval_never_suppresses() {
        let seg = segment(4096, FakeTimer::at(100));
        seg.set(b"k", "v1", "v1".size(true), h(0, 1), 0).unwrap();
        // Same timer tick, interval 0: no suppression.
        seg.set(b"k", "v2", "v2".size(true), h(0, 1), 0).unwrap();
        assert_eq!(seg.stats.skip_write_count.load(Relaxed), 0);
    }

    #[test]
    fn test_expiry_unlinks_and_counts() {
        let timer = FakeTimer::at(100);
        let seg = segment(4096, timer.clone());
        seg.set(b"k", "v", "v".size(true), h(0, 1), 1).unwrap();

        timer.advance(2);
        let err = get_str(&seg, b"k", h(0, 1)).unwrap_err();
        assert_eq!(err, CacheError::NotFound);
        assert_eq!(seg.stats.expire_count.load(Relaxed), 1);
        assert_eq!(seg.stats.miss_count.load(Relaxed), 1);
        assert_eq!(seg.stats.entry_count.load(Relaxed), 0);
    }

    #[test]
    fn test_peek_skips_expiry_and_access_time() {
        let timer = FakeTimer::at(100);
        let seg = segment(4096, timer.clone());
        seg.set(b"k", "v", "v".size(true), h(0, 1), 1).unwrap();

        timer.advance(10);
        // SAFETY: pin released via update below after the view is dropped.
        let (view, block) = unsafe { seg.get::<str>(b"k", h(0, 1), true) }.unwrap();
        assert_eq!(view, "v");
        assert_eq!(seg.stats.hit_count.load(Relaxed), 0);
        assert_eq!(seg.stats.expire_count.load(Relaxed), 0);
        seg.update(block as usize, -1);
    }

    #[test]
    fn test_del() {
        let seg = segment(4096, FakeTimer::at(100));
        seg.set(b"k", "v", "v".size(true), h(0, 1), 0).unwrap();
        assert!(seg.del(b"k", h(0, 1)));
        assert!(!seg.del(b"k", h(0, 1)));
        assert_eq!(
            get_str(&seg, b"k", h(0, 1)).unwrap_err(),
            CacheError::NotFound
        );
        assert_eq!(seg.stats.entry_count.load(Relaxed), 0);
    }

    #[test]
    fn test_large_key_rejected() {
        let seg = segment(1 << 20, FakeTimer::at(100));
        let key = vec![0u8; MAX_KEY_LEN + 1];
        let err = seg.set(&key, "v", "v".size(true), h(0, 1), 0).unwrap_err();
        assert_eq!(err, CacheError::LargeKey);
        assert_eq!(seg.stats.write_err_count.load(Relaxed), 1);
    }

    #[test]
    fn test_large_entry_rejected() {
        let seg = segment(1024, FakeTimer::at(100));
        // Entry larger than a quarter of the 1024-byte block.
        let value = "x".repeat(300);
        let err = seg
            .set(b"k", value.as_str(), value.as_str().size(true), h(0, 1), 0)
            .unwrap_err();
        assert_eq!(err, CacheError::LargeEntry);
    }

    #[test]
    fn test_slot_expand_keeps_entries() {
        let seg = segment(1 << 16, FakeTimer::at(100));
        // Same slot, distinct hash16 values: forces repeated expansion
        // past the initial capacity of one.
        for i in 0u16..64 {
            let key = format!("key-{i}");
            let value = format!("value-{i}");
            seg.set(
                key.as_bytes(),
                value.as_str(),
                value.as_str().size(true),
                h(7, i),
                0,
            )
            .unwrap();
        }
        for i in 0u16..64 {
            let key = format!("key-{i}");
            let (view, block) = get_str(&seg, key.as_bytes(), h(7, i)).unwrap();
            assert_eq!(view, format!("value-{i}"));
            seg.update(block as usize, -1);
        }
        assert_eq!(seg.stats.entry_count.load(Relaxed), 64);
    }

    #[test]
    fn test_slots_stay_sorted() {
        let seg = segment(1 << 16, FakeTimer::at(100));
        // Insert in descending hash16 order; lookups rely on ascending.
        for i in (0u16..32).rev() {
            let key = format!("key-{i}");
            seg.set(key.as_bytes(), "v", "v".size(true), h(5, i), 0)
                .unwrap();
        }
        // Delete a few and overwrite a few.
        seg.del(b"key-10", h(5, 10));
        seg.set(b"key-20", "w", "w".size(true), h(5, 20), 0).unwrap();

        let inner = seg.inner.lock();
        let slot = inner.slot(5);
        assert!(slot.windows(2).all(|w| w[0].hash16 <= w[1].hash16));
    }

    #[test]
    fn test_hash16_collision_resolved_by_key_bytes() {
        let seg = segment(4096, FakeTimer::at(100));
        seg.set(b"alpha", "A", "A".size(true), h(2, 77), 0).unwrap();
        seg.set(b"beta!", "B", "B".size(true), h(2, 77), 0).unwrap();

        let (a, ba) = get_str(&seg, b"alpha", h(2, 77)).unwrap();
        let (b, bb) = get_str(&seg, b"beta!", h(2, 77)).unwrap();
        assert_eq!(a, "A");
        assert_eq!(b, "B");
        seg.update(ba as usize, -1);
        seg.update(bb as usize, -1);
    }

    // Fills the current block with throwaway entries until a rotation
    // lands.
    fn fill_block(seg: &Segment, tag: &str, entry_payload: usize) {
        let value = "f".repeat(entry_payload);
        let mut i = 0;
        let before = seg.inner.lock().cur_block;
        loop {
            let key = format!("fill-{tag}-{i}");
            seg.set(
                key.as_bytes(),
                value.as_str(),
                value.as_str().size(true),
                h(200, i as u16),
                0,
            )
            .unwrap();
            if seg.inner.lock().cur_block != before {
                return;
            }
            i += 1;
        }
    }

    #[test]
    fn test_rotation_wraps_and_drains() {
        let seg = segment(1024, FakeTimer::at(100));
        seg.set(b"victim", "gone", "gone".size(true), h(1, 1), 0)
            .unwrap();

        // Drive the ring all the way around; the write that wraps back
        // onto block 0 forces its drain.
        for round in 0..BLOCK_COUNT {
            fill_block(&seg, &round.to_string(), 150);
        }
        assert_eq!(
            get_str(&seg, b"victim", h(1, 1)).unwrap_err(),
            CacheError::NotFound
        );
        assert!(seg.stats.eviction_count.load(Relaxed) >= 1);
    }

    #[test]
    fn test_pinned_next_block_blocks_rotation() {
        let seg = segment(1024, FakeTimer::at(100));
        // Entry in block 0, then rotate the ring so block 0 becomes next.
        seg.set(b"pinned", "stay", "stay".size(true), h(1, 1), 0)
            .unwrap();
        for round in 0..BLOCK_COUNT - 1 {
            fill_block(&seg, &round.to_string(), 150);
        }
        assert_eq!(seg.inner.lock().cur_block, BLOCK_COUNT - 1);

        // Pin the entry in block 0 while it is still visible (the current
        // block is freshly rotated, below the trigger).
        let (view, block) = get_str(&seg, b"pinned", h(1, 1)).unwrap();
        assert_eq!(view, "stay");
        assert_eq!(block, 0);

        // Fill block 9; the rotation onto pinned block 0 must refuse.
        let value = "f".repeat(150);
        let err = loop {
            let key = format!("last-{}", seg.stats.write_count.load(Relaxed));
            match seg.set(
                key.as_bytes(),
                value.as_str(),
                value.as_str().size(true),
                h(201, 5),
                0,
            ) {
                Ok(()) => continue,
                Err(e) => break e,
            }
        };
        assert_eq!(err, CacheError::SegmentFull);
        assert_eq!(seg.stats.eviction_wait_count.load(Relaxed), 1);

        // Releasing the pin drains block 0 (current is past the trigger)
        // and the next full-size write rotates onto it.
        seg.update(block as usize, -1);
        seg.set(b"after", value.as_str(), value.as_str().size(true), h(3, 3), 0)
            .unwrap();
        assert_eq!(seg.inner.lock().cur_block, 0);
        assert_eq!(
            get_str(&seg, b"pinned", h(1, 1)).unwrap_err(),
            CacheError::NotFound
        );
    }

    #[test]
    fn test_drain_guard_hides_next_block_entries() {
        let seg = segment(1024, FakeTimer::at(100));
        seg.set(b"early", "e", "e".size(true), h(1, 1), 0).unwrap();
        for round in 0..BLOCK_COUNT - 1 {
            fill_block(&seg, &round.to_string(), 150);
        }
        // Block 0 is now the eviction target. Its entry is still visible
        // while the current block is below the trigger...
        let (view, block) = get_str(&seg, b"early", h(1, 1)).unwrap();
        assert_eq!(view, "e");
        seg.update(block as usize, -1);

        // ...and invisible once the current block passes it.
        let value = "f".repeat(150);
        let mut i = 0;
        while seg.inner.lock().bufs[BLOCK_COUNT - 1].index < 512 {
            let key = format!("pad-{i}");
            seg.set(
                key.as_bytes(),
                value.as_str(),
                value.as_str().size(true),
                h(202, i),
                0,
            )
            .unwrap();
            i += 1;
        }
        assert_eq!(
            get_str(&seg, b"early", h(1, 1)).unwrap_err(),
            CacheError::NotFound
        );
    }

    #[test]
    fn test_capacity_never_exceeded() {
        let seg = segment(1024, FakeTimer::at(100));
        let value = "v".repeat(100);
        for i in 0..500u32 {
            let key = format!("k-{i}");
            let _ = seg.set(
                key.as_bytes(),
                value.as_str(),
                value.as_str().size(true),
                h((i % 256) as u8, (i % 61) as u16),
                0,
            );
        }
        let inner = seg.inner.lock();
        let used: usize = inner.bufs.iter().map(|b| b.index).sum();
        assert!(used <= BLOCK_COUNT * 1024);
    }

    #[test]
    fn test_reset_statistics_keeps_entry_count() {
        let seg = segment(4096, FakeTimer::at(100));
        seg.set(b"k", "v", "v".size(true), h(0, 1), 0).unwrap();
        let (_, block) = get_str(&seg, b"k", h(0, 1)).unwrap();
        seg.update(block as usize, -1);

        seg.reset_statistics();
        assert_eq!(seg.stats.hit_count.load(Relaxed), 0);
        assert_eq!(seg.stats.write_count.load(Relaxed), 0);
        assert_eq!(seg.stats.entry_count.load(Relaxed), 1);
    }

    #[test]
    fn test_mem_reports_used_and_reserved() {
        let seg = segment(1024, FakeTimer::at(100));
        let (used0, size) = seg.mem();
        assert_eq!(used0, 0);
        assert_eq!(size, (BLOCK_COUNT * 1024) as i64);

        seg.set(b"k", "v", "v".size(true), h(0, 1), 0).unwrap();
        let (used1, _) = seg.mem();
        assert!(used1 > 0);
    }
}
