//! Compile-time pool sizes and protocol constants.
//!
//! Mirrors the teacher's `param.rs`: every fixed-capacity pool in the storage stack gets a
//! named constant here instead of a magic number at the call site.

/// Sector size in bytes. The mounted FAT32 volume's BPB must report the same value.
pub const SECSZ: usize = 512;

/// Number of buffers in the sector cache.
pub const NBUF: usize = 32;

/// Number of directory entries kept warm in the entry cache.
pub const ENTRY_CACHE_NUM: usize = 50;

/// Depth of the single virtqueue used for block requests. Must be a power of two.
pub const NUM: usize = 8;

/// The only device id this stack talks to (Non-goals: no multi-device support).
pub const ROOTDEV: u32 = 0;

/// 4 KiB page size, used for the virtqueue's three DMA pages.
pub const PGSIZE: usize = 4096;
pub const PGSHIFT: usize = 12;
