//! The serialization contract: the `size` / `place` / `view` triad.
//!
//! The cache stores an arbitrary object graph in a contiguous byte range
//! handed out by a segment's arena, and reads it back **without copying or
//! deserializing**: a hit returns a view whose strings and slices reference
//! the arena bytes directly. The stored type supplies three operations
//! through the [`ArenaValue`] trait:
//!
//! - [`size`](ArenaValue::size): total bytes the value needs, including
//!   (when `with_head`) the fixed-size head record itself, plus every
//!   transitively owned string, slice, and pointed-to record;
//! - [`place`](ArenaValue::place): copy the head and tails into the range,
//!   rewriting each string/slice handle to refer to the just-written arena
//!   bytes;
//! - [`view`](ArenaValue::view): reinterpret the range as a borrowed view,
//!   resolving handles to `&str` / slice references into the same range.
//!
//! After `place`, the range is **self-contained**: every handle refers to
//! bytes within the same range. That is what makes zero-copy reads sound —
//! as long as the block holding the range is pinned by a live lease, every
//! handle a view carries stays valid.
//!
//! # Layout
//!
//! A record is a fixed-size *head* of little-endian scalars and 8-byte
//! *handles*, followed (anywhere later in the range) by variable-size
//! *tails*. A handle is an `(offset, len)` pair of `u32`s relative to the
//! start of the value range; [`NULL_OFFSET`] marks an absent pointer or a
//! field elided at placement. Scalars are read with `from_le_bytes`, so
//! heads may land at any byte offset — there are no alignment requirements
//! anywhere in the format.
//!
//! ```text
//! value range
//! ┌───────────────┬──────────┬───────────────┬─────────────┬─────┐
//! │ head (fixed)  │ "alpha"  │ [u32 array]   │ child head  │ ... │
//! │  id ──────────│──────────│───────────────│─────────────│     │
//! │  name ─(5,5)──┘          │               │             │     │
//! │  tags ─(10,3)────────────┘               │             │     │
//! │  child ─(22,1)───────────────────────────┘             │     │
//! └────────────────────────────────────────────────────────┴─────┘
//! ```
//!
//! # Field kinds
//!
//! | Kind | Place | View |
//! |------|-------|------|
//! | fixed-width scalar | [`RangeWriter::put`] | [`RangeReader::get`] |
//! | string | [`RangeWriter::put_str`] | [`RangeReader::str_at`] → `&str` |
//! | byte string | [`RangeWriter::put_bytes`] | [`RangeReader::bytes_at`] → `&[u8]` |
//! | slice of scalars | [`RangeWriter::put_slice`] | [`RangeReader::slice_at`] → [`ScalarSlice`] |
//! | nested record (by value) | head embedded in parent, `place(.., with_head = false)` | `view` at the embedded offset |
//! | record behind a pointer | [`RangeWriter::claim_record`] | [`RangeReader::record_at`] |
//! | slice of records | [`RangeWriter::claim_records`] | [`RangeReader::records_at`] → [`RecordSlice`] |
//! | map / closure / unsupported | [`RangeWriter::put_null`] (contributes 0 to `size`) | resolves to `None` / empty |
//!
//! # Contract
//!
//! `place` must consume exactly the bytes `size` reported: the cache
//! reserves that many and the writer panics if a placement overruns its
//! reservation. `place` and `view` run under the segment lock, so they
//! must be pure, bounded, and non-blocking.
//!
//! # Example
//!
//! ```
//! use arena_cache::codec::{str_size, ArenaValue, RangeReader, RangeWriter};
//!
//! struct Device {
//!     id: u32,
//!     label: String,
//! }
//!
//! struct DeviceView<'a> {
//!     id: u32,
//!     label: &'a str,
//! }
//!
//! impl ArenaValue for Device {
//!     type View<'a> = DeviceView<'a>;
//!     const HEAD_SIZE: u32 = 4 + 8; // id + label handle
//!
//!     fn size(&self, with_head: bool) -> u32 {
//!         let head = if with_head { Self::HEAD_SIZE } else { 0 };
//!         head + str_size(&self.label)
//!     }
//!
//!     fn place(&self, w: &mut RangeWriter<'_>, head_at: u32, with_head: bool) {
//!         let head = if with_head { w.claim(Self::HEAD_SIZE) } else { head_at };
//!         w.put(head, self.id);
//!         w.put_str(head + 4, &self.label);
//!     }
//!
//!     fn view<'a>(r: RangeReader<'a>, head_at: u32) -> Option<DeviceView<'a>> {
//!         Some(DeviceView {
//!             id: r.get(head_at)?,
//!             label: r.str_at(head_at + 4)?,
//!         })
//!     }
//! }
//! ```

use core::marker::PhantomData;

/// Size in bytes of an `(offset, len)` handle within a head record.
pub const HANDLE_SIZE: u32 = 8;

/// Offset sentinel for an absent pointer or an elided field.
pub const NULL_OFFSET: u32 = u32::MAX;

/// A value that can be placed into and viewed from an arena byte range.
///
/// Implemented by hand per stored type (see the module example), and
/// provided for `[u8]` and `str` so byte- and string-valued caches work
/// out of the box.
pub trait ArenaValue {
    /// The borrowed form returned by a cache hit. Its lifetime is tied to
    /// the lease pinning the underlying block.
    type View<'a>;

    /// Size of this type's fixed head record in bytes.
    const HEAD_SIZE: u32;

    /// Total bytes needed to place `self`: the head (when `with_head`)
    /// plus every transitively owned tail. Fields that cannot live in
    /// arena bytes (maps, closures) contribute 0.
    fn size(&self, with_head: bool) -> u32;

    /// Writes `self` into the range. When `with_head`, the head is claimed
    /// at the writer's cursor and `head_at` is ignored; otherwise the head
    /// bytes were already claimed (embedded in a parent head or a record
    /// array) and live at `head_at`.
    fn place(&self, w: &mut RangeWriter<'_>, head_at: u32, with_head: bool);

    /// Reconstitutes a view from the range, head record at `head_at`.
    /// Returns `None` if the range is too short or a handle is out of
    /// bounds.
    fn view<'a>(r: RangeReader<'a>, head_at: u32) -> Option<Self::View<'a>>;
}

/// Tail bytes a string contributes to [`ArenaValue::size`].
#[inline]
pub fn str_size(s: &str) -> u32 {
    s.len() as u32
}

/// Tail bytes a byte string contributes to [`ArenaValue::size`].
#[inline]
pub fn bytes_size(bs: &[u8]) -> u32 {
    bs.len() as u32
}

/// Tail bytes a scalar slice contributes to [`ArenaValue::size`].
#[inline]
pub fn slice_size<T: Scalar>(len: usize) -> u32 {
    len as u32 * T::SIZE
}

mod sealed {
    pub trait Sealed {}
}

/// A fixed-width primitive storable directly in arena bytes.
///
/// Sealed; implemented for the integer types, `f32`/`f64`, and `bool`.
pub trait Scalar: sealed::Sealed + Copy {
    /// Encoded width in bytes.
    const SIZE: u32;

    /// Encodes `self` little-endian into `bs` (exactly `SIZE` bytes).
    fn write_le(self, bs: &mut [u8]);

    /// Decodes from `bs` (exactly `SIZE` bytes).
    fn read_le(bs: &[u8]) -> Self;
}

macro_rules! impl_scalar {
    ($($t:ty),*) => {$(
        impl sealed::Sealed for $t {}
        impl Scalar for $t {
            const SIZE: u32 = core::mem::size_of::<$t>() as u32;

            #[inline]
            fn write_le(self, bs: &mut [u8]) {
                bs.copy_from_slice(&self.to_le_bytes());
            }

            #[inline]
            fn read_le(bs: &[u8]) -> Self {
                <$t>::from_le_bytes(bs.try_into().expect("scalar width"))
            }
        }
    )*};
}

impl_scalar!(u8, i8, u16, i16, u32, i32, u64, i64, f32, f64);

impl sealed::Sealed for bool {}
impl Scalar for bool {
    const SIZE: u32 = 1;

    #[inline]
    fn write_le(self, bs: &mut [u8]) {
        bs[0] = self as u8;
    }

    #[inline]
    fn read_le(bs: &[u8]) -> Self {
        bs[0] != 0
    }
}

/// Bump writer over one value range.
///
/// Created by the cache around the exact range [`ArenaValue::size`]
/// reported; `place` implementations claim head space and append tails
/// through it. All offsets are relative to the range start.
pub struct RangeWriter<'r> {
    range: &'r mut [u8],
    cursor: u32,
}

impl<'r> RangeWriter<'r> {
    pub(crate) fn new(range: &'r mut [u8]) -> Self {
        Self { range, cursor: 0 }
    }

    /// Bytes claimed so far.
    #[inline]
    pub fn written(&self) -> u32 {
        self.cursor
    }

    /// Claims `len` bytes at the cursor and returns their offset.
    ///
    /// # Panics
    ///
    /// Panics if the claim exceeds the range — that means `size` under-
    /// reported, which is a bug in the `ArenaValue` implementation.
    #[inline]
    pub fn claim(&mut self, len: u32) -> u32 {
        let off = self.cursor;
        assert!(
            off as usize + len as usize <= self.range.len(),
            "place exceeded the byte count reported by size"
        );
        self.cursor += len;
        off
    }

    /// Writes a scalar at an already-claimed offset.
    #[inline]
    pub fn put<T: Scalar>(&mut self, at: u32, v: T) {
        let at = at as usize;
        v.write_le(&mut self.range[at..at + T::SIZE as usize]);
    }

    /// Writes a raw `(offset, len)` handle at `at`.
    #[inline]
    pub fn put_handle(&mut self, at: u32, off: u32, len: u32) {
        self.put(at, off);
        self.put(at + 4, len);
    }

    /// Writes a null handle at `at`; views resolve it to `None` / empty.
    #[inline]
    pub fn put_null(&mut self, at: u32) {
        self.put_handle(at, NULL_OFFSET, 0);
    }

    /// Copies a string's bytes to the cursor and stores its handle at
    /// `handle_at`. Empty strings consume no tail bytes.
    pub fn put_str(&mut self, handle_at: u32, s: &str) {
        self.put_bytes(handle_at, s.as_bytes());
    }

    /// Copies a byte string to the cursor and stores its handle at
    /// `handle_at`.
    pub fn put_bytes(&mut self, handle_at: u32, bs: &[u8]) {
        if bs.is_empty() {
            self.put_handle(handle_at, 0, 0);
            return;
        }
        let off = self.claim(bs.len() as u32);
        self.range[off as usize..off as usize + bs.len()].copy_from_slice(bs);
        self.put_handle(handle_at, off, bs.len() as u32);
    }

    /// Copies a scalar slice to the cursor, element by element in LE, and
    /// stores its handle (offset + element count) at `handle_at`.
    pub fn put_slice<T: Scalar>(&mut self, handle_at: u32, items: &[T]) {
        if items.is_empty() {
            self.put_handle(handle_at, 0, 0);
            return;
        }
        let off = self.claim(slice_size::<T>(items.len()));
        let mut at = off as usize;
        for item in items {
            item.write_le(&mut self.range[at..at + T::SIZE as usize]);
            at += T::SIZE as usize;
        }
        self.put_handle(handle_at, off, items.len() as u32);
    }

    /// Claims head space for one pointed-to record, stores its handle at
    /// `handle_at`, and returns the head offset to pass to
    /// `place(.., with_head = false)`.
    pub fn claim_record<V: ArenaValue + ?Sized>(&mut self, handle_at: u32) -> u32 {
        let off = self.claim(V::HEAD_SIZE);
        self.put_handle(handle_at, off, 1);
        off
    }

    /// Claims head space for `count` consecutive records, stores the slice
    /// handle at `handle_at`, and returns the offset of the first head.
    /// Element `i`'s head lives at `off + i * V::HEAD_SIZE`.
    pub fn claim_records<V: ArenaValue + ?Sized>(&mut self, handle_at: u32, count: u32) -> u32 {
        if count == 0 {
            self.put_handle(handle_at, 0, 0);
            return 0;
        }
        let off = self.claim(count * V::HEAD_SIZE);
        self.put_handle(handle_at, off, count);
        off
    }
}

/// Bounds-checked reader over one value range.
///
/// Cheap to copy; every accessor returns `None` instead of panicking so a
/// view over a short or foreign range degrades to a miss.
#[derive(Clone, Copy)]
pub struct RangeReader<'a> {
    range: &'a [u8],
}

impl<'a> RangeReader<'a> {
    pub(crate) fn new(range: &'a [u8]) -> Self {
        Self { range }
    }

    /// Length of the value range in bytes.
    #[inline]
    pub fn len(&self) -> u32 {
        self.range.len() as u32
    }

    /// Whether the range is empty.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.range.is_empty()
    }

    /// Reads a scalar at `at`.
    #[inline]
    pub fn get<T: Scalar>(&self, at: u32) -> Option<T> {
        let at = at as usize;
        let bs = self.range.get(at..at + T::SIZE as usize)?;
        Some(T::read_le(bs))
    }

    /// Reads a raw `(offset, len)` handle at `at`.
    #[inline]
    pub fn handle(&self, at: u32) -> Option<(u32, u32)> {
        Some((self.get(at)?, self.get(at + 4)?))
    }

    /// Resolves a string handle to a `&str` borrowing the arena bytes.
    pub fn str_at(&self, handle_at: u32) -> Option<&'a str> {
        let bs = self.bytes_at(handle_at)?;
        core::str::from_utf8(bs).ok()
    }

    /// Resolves a byte-string handle to a slice of the arena bytes.
    pub fn bytes_at(&self, handle_at: u32) -> Option<&'a [u8]> {
        let (off, len) = self.handle(handle_at)?;
        if len == 0 {
            return Some(&[]);
        }
        if off == NULL_OFFSET {
            return None;
        }
        self.range.get(off as usize..off as usize + len as usize)
    }

    /// Resolves a scalar-slice handle to a lazy decoding view.
    pub fn slice_at<T: Scalar>(&self, handle_at: u32) -> Option<ScalarSlice<'a, T>> {
        let (off, count) = self.handle(handle_at)?;
        if count == 0 || off == NULL_OFFSET {
            return Some(ScalarSlice::empty());
        }
        let bytes = self
            .range
            .get(off as usize..off as usize + (count * T::SIZE) as usize)?;
        Some(ScalarSlice {
            bytes,
            _t: PhantomData,
        })
    }

    /// Resolves a record-pointer handle; `None` for a null pointer or an
    /// unreadable head.
    pub fn record_at<V: ArenaValue + ?Sized>(&self, handle_at: u32) -> Option<V::View<'a>> {
        let (off, len) = self.handle(handle_at)?;
        if off == NULL_OFFSET || len == 0 {
            return None;
        }
        V::view(*self, off)
    }

    /// Resolves a record-slice handle to an indexable view. Null and empty
    /// handles both yield an empty slice.
    pub fn records_at<V: ArenaValue + ?Sized>(&self, handle_at: u32) -> Option<RecordSlice<'a, V>> {
        let (off, count) = self.handle(handle_at)?;
        if count == 0 || off == NULL_OFFSET {
            return Some(RecordSlice {
                r: *self,
                off: 0,
                count: 0,
                _v: PhantomData,
            });
        }
        // Heads must fit in the range; each element re-checks on access.
        self.range
            .get(off as usize..off as usize + (count * V::HEAD_SIZE) as usize)?;
        Some(RecordSlice {
            r: *self,
            off,
            count,
            _v: PhantomData,
        })
    }
}

/// Zero-copy view of a scalar slice stored in arena bytes.
///
/// Elements are decoded lazily with `from_le_bytes`; the view itself is
/// just a byte-slice reference into the pinned block.
pub struct ScalarSlice<'a, T: Scalar> {
    bytes: &'a [u8],
    _t: PhantomData<T>,
}

impl<'a, T: Scalar> ScalarSlice<'a, T> {
    fn empty() -> Self {
        Self {
            bytes: &[],
            _t: PhantomData,
        }
    }

    /// Number of elements.
    #[inline]
    pub fn len(&self) -> usize {
        self.bytes.len() / T::SIZE as usize
    }

    /// Whether the slice has no elements.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Decodes element `i`.
    #[inline]
    pub fn get(&self, i: usize) -> Option<T> {
        let at = i.checked_mul(T::SIZE as usize)?;
        let bs = self.bytes.get(at..at + T::SIZE as usize)?;
        Some(T::read_le(bs))
    }

    /// Iterates over decoded elements.
    pub fn iter(&self) -> impl Iterator<Item = T> + 'a {
        let bytes = self.bytes;
        bytes
            .chunks_exact(T::SIZE as usize)
            .map(|chunk| T::read_le(chunk))
    }

    /// Collects the elements into an owned `Vec`, leaving the arena.
    pub fn to_vec(&self) -> Vec<T> {
        self.iter().collect()
    }
}

impl<T: Scalar> Clone for ScalarSlice<'_, T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T: Scalar> Copy for ScalarSlice<'_, T> {}

impl<T: Scalar + core::fmt::Debug> core::fmt::Debug for ScalarSlice<'_, T> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_list().entries(self.iter()).finish()
    }
}

/// View of a slice of records stored as consecutive heads in arena bytes.
pub struct RecordSlice<'a, V: ArenaValue + ?Sized> {
    r: RangeReader<'a>,
    off: u32,
    count: u32,
    _v: PhantomData<V>,
}

impl<'a, V: ArenaValue + ?Sized> RecordSlice<'a, V> {
    /// Number of records.
    #[inline]
    pub fn len(&self) -> usize {
        self.count as usize
    }

    /// Whether the slice has no records.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Builds the view of record `i`.
    pub fn get(&self, i: usize) -> Option<V::View<'a>> {
        if i >= self.count as usize {
            return None;
        }
        V::view(self.r, self.off + i as u32 * V::HEAD_SIZE)
    }

    /// Iterates over record views, skipping any that fail to resolve.
    pub fn iter(&self) -> impl Iterator<Item = V::View<'a>> + '_ {
        (0..self.count as usize).filter_map(|i| self.get(i))
    }
}

impl<V: ArenaValue + ?Sized> Clone for RecordSlice<'_, V> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<V: ArenaValue + ?Sized> Copy for RecordSlice<'_, V> {}

impl ArenaValue for [u8] {
    type View<'a> = &'a [u8];
    const HEAD_SIZE: u32 = HANDLE_SIZE;

    fn size(&self, with_head: bool) -> u32 {
        let head = if with_head { Self::HEAD_SIZE } else { 0 };
        head + bytes_size(self)
    }

    fn place(&self, w: &mut RangeWriter<'_>, head_at: u32, with_head: bool) {
        let head = if with_head { w.claim(Self::HEAD_SIZE) } else { head_at };
        w.put_bytes(head, self);
    }

    fn view<'a>(r: RangeReader<'a>, head_at: u32) -> Option<&'a [u8]> {
        r.bytes_at(head_at)
    }
}

impl ArenaValue for str {
    type View<'a> = &'a str;
    const HEAD_SIZE: u32 = HANDLE_SIZE;

    fn size(&self, with_head: bool) -> u32 {
        let head = if with_head { Self::HEAD_SIZE } else { 0 };
        head + str_size(self)
    }

    fn place(&self, w: &mut RangeWriter<'_>, head_at: u32, with_head: bool) {
        let head = if with_head { w.claim(Self::HEAD_SIZE) } else { head_at };
        w.put_str(head, self);
    }

    fn view<'a>(r: RangeReader<'a>, head_at: u32) -> Option<&'a str> {
        r.str_at(head_at)
    }
}
