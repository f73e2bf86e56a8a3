//! Buffer cache: a fixed pool of sector-sized buffers, kept in an LRU list and keyed by
//! (dev, sector). Callers get a locked, reference-counted handle; releasing it returns the
//! buffer to the head of the LRU list for reuse.
//!
//! Interface, unchanged from the teacher's `bio.rs`:
//! * `bread` to get a buffer holding a sector's contents.
//! * `BufGuard::write` to push a dirty buffer back to disk.
//! * `brelse` (via `Drop`) when done; do not hold a buffer longer than necessary.
//! * `pin`/`unpin` to keep a buffer cached across a release (used by the FAT/FSInfo sector,
//!   which every path touches).
//!
//! Adapted to take its `BlockDevice` explicitly rather than through a kernel-wide disk global,
//! so the cache logic is exercisable against an in-memory `RamDisk` in tests, and to carry a
//! `&'static BCache` back-reference on each guard instead of assuming a single global cache.
//!
//! The LRU list is threaded through plain array indices rather than an `Rc`/`Weak` graph: a
//! shared `static` pool has to be `Sync`, and `Rc` never is. This also keeps the whole list
//! under the one spinlock (`Mutex<Lru>`) as plain `Copy` data, with the per-buffer sleeplock
//! taken only after that spinlock guard has already been dropped — acquiring a sleeplock while
//! a spinlock is held can put a task to sleep with the spinlock still locked.

use crate::{
    blockdev::BlockDevice,
    param::{NBUF, SECSZ},
    sleeplock::{SleepLock, SleepLockGuard},
    spinlock::Mutex,
};
use array_macro::array;
use core::ops::{Deref, DerefMut};

pub struct BCache {
    buf: [SleepLock<Data>; NBUF],
    lru: Mutex<Lru>,
}

pub struct Data {
    pub data: [u8; SECSZ],
    blockno: u32,
    dev: u32,
    valid: bool,
}

#[derive(Clone, Copy)]
struct Node {
    dev: u32,
    blockno: u32,
    refcount: u32,
    next: Option<usize>,
    prev: Option<usize>,
}

impl Node {
    const fn new() -> Self {
        Self {
            dev: 0,
            blockno: 0,
            refcount: 0,
            next: None,
            prev: None,
        }
    }
}

struct Lru {
    nodes: [Node; NBUF],
    head: Option<usize>,
    tail: Option<usize>,
}

impl Lru {
    const fn new() -> Self {
        Self {
            nodes: [Node::new(); NBUF],
            head: None,
            tail: None,
        }
    }

    fn push_front(&mut self, i: usize) {
        self.nodes[i].prev = None;
        self.nodes[i].next = self.head;
        if let Some(h) = self.head {
            self.nodes[h].prev = Some(i);
        }
        self.head = Some(i);
        if self.tail.is_none() {
            self.tail = Some(i);
        }
    }

    fn unlink(&mut self, i: usize) {
        let prev = self.nodes[i].prev;
        let next = self.nodes[i].next;
        match prev {
            Some(p) => self.nodes[p].next = next,
            None => self.head = next,
        }
        match next {
            Some(n) => self.nodes[n].prev = prev,
            None => self.tail = prev,
        }
        self.nodes[i].prev = None;
        self.nodes[i].next = None;
    }

    /// Threads all `NBUF` slots into a single chain. Mirrors `binit`.
    fn init(&mut self) {
        for i in 0..NBUF {
            self.push_front(i);
        }
    }

    /// Finds the slot already caching `(dev, blockno)`, or recycles the least-recently-used
    /// unreferenced one. Returns the slot index and whether its tag was just (re)assigned, so
    /// the caller knows whether its data needs a fresh read from disk. Mirrors `bget`.
    fn acquire(&mut self, dev: u32, blockno: u32) -> (usize, bool) {
        let mut cur = self.head;
        while let Some(i) = cur {
            if self.nodes[i].dev == dev && self.nodes[i].blockno == blockno {
                self.nodes[i].refcount += 1;
                return (i, false);
            }
            cur = self.nodes[i].next;
        }

        let mut cur = self.tail;
        while let Some(i) = cur {
            if self.nodes[i].refcount == 0 {
                self.nodes[i].dev = dev;
                self.nodes[i].blockno = blockno;
                self.nodes[i].refcount = 1;
                return (i, true);
            }
            cur = self.nodes[i].prev;
        }
        panic!("bcache: no free buffers");
    }

    /// Drops one reference; once it reaches zero, moves the slot to the front of the list so
    /// it's the last one picked for recycling. Mirrors `brelse`.
    fn release(&mut self, i: usize) {
        self.nodes[i].refcount -= 1;
        if self.nodes[i].refcount == 0 {
            self.unlink(i);
            self.push_front(i);
        }
    }

    fn pin(&mut self, i: usize) {
        self.nodes[i].refcount += 1;
    }

    fn unpin(&mut self, i: usize) {
        self.nodes[i].refcount -= 1;
    }
}

pub struct BufGuard {
    data_guard: Option<SleepLockGuard<'static, Data>>,
    idx: usize,
    cache: &'static BCache,
}

impl Deref for BufGuard {
    type Target = SleepLockGuard<'static, Data>;
    fn deref(&self) -> &Self::Target {
        self.data_guard.as_ref().unwrap()
    }
}

impl DerefMut for BufGuard {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.data_guard.as_mut().unwrap()
    }
}

impl BufGuard {
    /// Writes this buffer's contents back to disk. Caller still holds the lock (it does, by
    /// construction: a `BufGuard` only exists while locked).
    pub fn write(&mut self, disk: &dyn BlockDevice) {
        disk.write(self.dev, self.blockno, &self.data);
    }

    pub fn pin(&self) {
        self.cache.lru.lock().pin(self.idx);
    }

    pub fn unpin(&self) {
        self.cache.lru.lock().unpin(self.idx);
    }
}

impl Drop for BufGuard {
    fn drop(&mut self) {
        self.data_guard.take();
        self.cache.lru.lock().release(self.idx);
    }
}

impl Data {
    const fn new() -> Self {
        Self {
            data: [0; SECSZ],
            blockno: 0,
            dev: 0,
            valid: false,
        }
    }

    pub fn blockno(&self) -> u32 {
        self.blockno
    }

    pub fn dev(&self) -> u32 {
        self.dev
    }
}

impl Deref for Data {
    type Target = [u8];
    fn deref(&self) -> &Self::Target {
        &self.data
    }
}

impl DerefMut for Data {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.data
    }
}

impl BCache {
    pub const fn new() -> Self {
        Self {
            buf: array![SleepLock::new(Data::new(), "buffer"); NBUF],
            lru: Mutex::new(Lru::new(), "bcache"),
        }
    }

    /// Returns a locked buffer holding `sector`'s contents, reading through to `disk` on a
    /// cache miss.
    pub fn read(&'static self, dev: u32, sector: u32, disk: &dyn BlockDevice) -> BufGuard {
        let (idx, is_new) = self.lru.lock().acquire(dev, sector);
        let mut guard = self.buf[idx].lock();
        if is_new {
            guard.dev = dev;
            guard.blockno = sector;
            guard.valid = false;
        }
        if !guard.valid {
            disk.read(dev, sector, &mut guard.data);
            guard.valid = true;
        }
        BufGuard {
            data_guard: Some(guard),
            idx,
            cache: self,
        }
    }

    pub fn init(&'static self) {
        self.lru.lock().init();
    }
}

pub static BCACHE: BCache = BCache::new();

pub fn init() {
    BCACHE.init();
}

pub fn bread(dev: u32, sector: u32) -> BufGuard {
    BCACHE.read(dev, sector, crate::blockdev::get())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::RamDisk;

    // Each test gets its own static cache (local statics have a distinct address per
    // declaration site) so parallel test threads never share LRU state.

    #[test]
    fn read_returns_disk_contents_and_caches_on_reread() {
        static CACHE: BCache = BCache::new();
        CACHE.init();
        let cache = &CACHE;
        let disk = RamDisk::new(4);
        let mut seed = [0u8; SECSZ];
        seed[0] = 0xAB;
        disk.seed(2, &seed);

        let b = cache.read(0, 2, &disk);
        assert_eq!(b.data[0], 0xAB);
        drop(b);

        // mutate the backing disk directly; a cache hit must not re-read it
        let mut other = [0u8; SECSZ];
        other[0] = 0xCD;
        disk.seed(2, &other);

        let b2 = cache.read(0, 2, &disk);
        assert_eq!(b2.data[0], 0xAB, "cache hit should not re-read disk");
    }

    #[test]
    fn write_persists_to_disk() {
        static CACHE: BCache = BCache::new();
        CACHE.init();
        let cache = &CACHE;
        let disk = RamDisk::new(4);

        let mut b = cache.read(0, 1, &disk);
        b.data[5] = 0x42;
        b.write(&disk);
        drop(b);

        let mut readback = [0u8; SECSZ];
        disk.read(0, 1, &mut readback);
        assert_eq!(readback[5], 0x42);
    }

    #[test]
    fn pin_keeps_buffer_out_of_eviction_pool() {
        static CACHE: BCache = BCache::new();
        CACHE.init();
        let cache = &CACHE;
        let disk = RamDisk::new(NBUF + 2);

        let pinned = cache.read(0, 0, &disk);
        pinned.pin();
        drop(pinned); // released, but the pin keeps its refcount above the eviction threshold

        // touch every other buffer slot; the pinned one must never be recycled to serve them
        for sector in 1..=NBUF as u32 {
            drop(cache.read(0, sector, &disk));
        }

        let still_cached = cache.read(0, 0, &disk);
        assert!(still_cached.valid);
        assert_eq!(still_cached.blockno(), 0);
        still_cached.unpin();
    }
}
