//! On-arena entry layout and the off-arena slot pointer.
//!
//! Each entry occupies one contiguous range of a block:
//!
//! ```text
//! ┌──────────────────────┬───────────────┬─────────────────────────┐
//! │ EntryHdr (24 bytes)  │ key bytes     │ value bytes (placed)    │
//! └──────────────────────┴───────────────┴─────────────────────────┘
//! ```
//!
//! The header is stored little-endian at fixed field offsets so it can be
//! decoded from any byte offset without alignment requirements. Slot tables
//! index entries through [`EntryPtr`], which lives off-arena and survives
//! until the entry is overwritten, deleted, or its block is drained.

use crate::buffer::Buffer;

/// Size of the on-arena entry header in bytes.
pub(crate) const ENTRY_HDR_SIZE: usize = 24;

// Field offsets within the 24-byte header. Bytes 18..24 are padding.
const OFF_ACCESS_TIME: usize = 0;
const OFF_EXPIRE_AT: usize = 4;
const OFF_KEY_LEN: usize = 8;
const OFF_HASH16: usize = 10;
const OFF_VAL_LEN: usize = 12;
const OFF_DELETED: usize = 16;
const OFF_SLOT_ID: usize = 17;

/// Decoded entry header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub(crate) struct EntryHdr {
    pub(crate) access_time: u32,
    /// Expiry deadline in timer seconds; `0` means never.
    pub(crate) expire_at: u32,
    pub(crate) key_len: u16,
    pub(crate) hash16: u16,
    pub(crate) val_len: u32,
    pub(crate) deleted: bool,
    pub(crate) slot_id: u8,
}

impl EntryHdr {
    /// Decodes a header from the first [`ENTRY_HDR_SIZE`] bytes of `bs`.
    pub(crate) fn read(bs: &[u8]) -> Self {
        Self {
            access_time: read_u32(bs, OFF_ACCESS_TIME),
            expire_at: read_u32(bs, OFF_EXPIRE_AT),
            key_len: read_u16(bs, OFF_KEY_LEN),
            hash16: read_u16(bs, OFF_HASH16),
            val_len: read_u32(bs, OFF_VAL_LEN),
            deleted: bs[OFF_DELETED] != 0,
            slot_id: bs[OFF_SLOT_ID],
        }
    }

    /// Encodes the header into the first [`ENTRY_HDR_SIZE`] bytes of `bs`,
    /// zeroing the padding.
    pub(crate) fn write(&self, bs: &mut [u8]) {
        bs[..ENTRY_HDR_SIZE].fill(0);
        bs[OFF_ACCESS_TIME..OFF_ACCESS_TIME + 4].copy_from_slice(&self.access_time.to_le_bytes());
        bs[OFF_EXPIRE_AT..OFF_EXPIRE_AT + 4].copy_from_slice(&self.expire_at.to_le_bytes());
        bs[OFF_KEY_LEN..OFF_KEY_LEN + 2].copy_from_slice(&self.key_len.to_le_bytes());
        bs[OFF_HASH16..OFF_HASH16 + 2].copy_from_slice(&self.hash16.to_le_bytes());
        bs[OFF_VAL_LEN..OFF_VAL_LEN + 4].copy_from_slice(&self.val_len.to_le_bytes());
        bs[OFF_DELETED] = self.deleted as u8;
        bs[OFF_SLOT_ID] = self.slot_id;
    }

    /// Total on-arena footprint of the entry this header describes.
    #[inline]
    pub(crate) fn entry_len(&self) -> usize {
        ENTRY_HDR_SIZE + self.key_len as usize + self.val_len as usize
    }

    #[inline]
    pub(crate) fn is_expired(&self, now: u32) -> bool {
        self.expire_at != 0 && self.expire_at <= now
    }
}

/// Stamps just the `access_time` field of a header already in the arena.
/// Header fields are disjoint from value bytes, so this never touches a
/// range a lease-held view can cover.
pub(crate) fn stamp_access_time(buf: &Buffer, entry_off: usize, now: u32) {
    buf.write_at(&now.to_le_bytes(), entry_off + OFF_ACCESS_TIME);
}

/// Stamps just the `deleted` flag of a header already in the arena.
pub(crate) fn stamp_deleted(buf: &Buffer, entry_off: usize) {
    buf.write_at(&[1], entry_off + OFF_DELETED);
}

/// Slot table record pointing at an on-arena entry.
///
/// Slots keep these sorted ascending by `hash16`; ties are resolved by
/// `key_len` and an in-arena byte comparison of the key.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct EntryPtr {
    /// Entry offset within the identified block's buffer.
    pub(crate) offset: u64,
    pub(crate) hash16: u16,
    pub(crate) key_len: u16,
    /// Index of the block holding the entry.
    pub(crate) block: u16,
}

#[inline]
fn read_u16(bs: &[u8], off: usize) -> u16 {
    u16::from_le_bytes([bs[off], bs[off + 1]])
}

#[inline]
fn read_u32(bs: &[u8], off: usize) -> u32 {
    u32::from_le_bytes([bs[off], bs[off + 1], bs[off + 2], bs[off + 3]])
}
