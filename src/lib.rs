#![doc = include_str!("../README.md")]
//!
//! ---
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │                               Cache                                  │
//! │                                                                      │
//! │   hash(key) & 255 ──▶ segment     (hash >> 8) & 255 ──▶ slot         │
//! │                                                                      │
//! │  ┌────────────────────────────── Segment ─────────────────────────┐  │
//! │  │ [Mutex]                                                        │  │
//! │  │                                                                │  │
//! │  │  slot table: 256 slots of EntryPtr, sorted by hash16           │  │
//! │  │      │                                                         │  │
//! │  │      ▼                                                         │  │
//! │  │  block ring (10 × equal arena buffers)                         │  │
//! │  │  ┌──────┐ ┌──────┐ ┌─────────┐ ┌──────┐        ┌──────┐        │  │
//! │  │  │ full │ │ full │ │ current │ │ next │  ....  │ full │        │  │
//! │  │  └──────┘ └──────┘ └────┬────┘ └──┬───┘        └──────┘        │  │
//! │  │   pinned by leases      │ bump    │ drains when pins hit 0     │  │
//! │  │                         ▼ alloc   ▼                            │  │
//! │  │  entry = [24-byte header][key bytes][placed value graph]       │  │
//! │  └────────────────────────────────────────────────────────────────┘  │
//! └──────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! A read locates the entry under the segment lock, builds a view straight
//! over the value bytes with the stored type's
//! [`view`](crate::codec::ArenaValue::view) primitive, pins the holding
//! block, and releases the lock. The view stays valid — no copy, no
//! deserialization — until the pinning [`Lease`] drops.
//!
//! Eviction is wholesale: a segment reclaims an entire block at once by
//! unlinking every entry rooted in it, and only when the block's pin count
//! is zero. There is no per-entry free.
//!
//! # Modules
//!
//! - [`codec`]: the `size` / `place` / `view` serialization contract and
//!   its helper types
//! - [`config`]: cache configuration
//! - [`error`]: the error taxonomy
//! - [`lease`]: lease contexts and pin accounting
//! - [`timer`]: the pluggable seconds source
//!
//! # Concurrency model
//!
//! One `parking_lot::Mutex` per segment, relaxed atomics for statistics,
//! nothing else. All public entry points may block on a single segment
//! mutex; no operation waits on I/O or on another segment. The user's
//! `size` primitive runs before the lock, `place` and `view` run under it
//! and must be pure, bounded, and non-blocking. Within one segment all
//! operations are totally ordered by the mutex; across segments no
//! ordering is guaranteed.

mod buffer;
mod cache;
pub mod codec;
pub mod config;
mod entry;
pub mod error;
pub mod lease;
mod segment;
pub mod timer;

pub use cache::Cache;
pub use codec::ArenaValue;
pub use config::CacheConfig;
pub use error::CacheError;
pub use lease::{Lease, LeaseCtx};
pub use timer::{SystemTimer, Timer};

/// Maximum key length in bytes.
pub const MAX_KEY_LEN: usize = 65535;

/// Number of lock-sharded segments per cache.
pub(crate) const SEG_COUNT: usize = 256;

/// Mask selecting the segment byte of a key hash.
pub(crate) const SEG_MASK: u64 = (SEG_COUNT - 1) as u64;

/// Number of hash slots per segment.
pub(crate) const SLOT_COUNT: usize = 256;

/// Arena blocks per segment; the rotation ring length.
pub(crate) const BLOCK_COUNT: usize = 10;

/// Smallest accepted cache size in MB.
pub(crate) const MIN_SIZE_MB: i64 = 32;

pub(crate) const UNIT_MB: i64 = 1024 * 1024;

/// Fraction of the current block that must fill before the next block
/// starts draining, when the configuration does not say otherwise.
pub(crate) const DEFAULT_EVICTION_TRIGGER: f32 = 0.5;
