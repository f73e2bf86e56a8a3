//! Directory entry cache: reference-counted, LRU-reused handles to FAT32 directory entries.
//! Grounded on `kernel/fat32.c`'s `struct entry_cache`/`eget`/`elock`/`eunlock`/`edup`/`eput`/
//! `estat`, generalized from raw pointers to array indices (`EntryId`) since Rust doesn't let
//! an intrusive linked list own its own nodes by pointer the way the C version does.
//!
//! Slot 0 is the volume root; it doubles as the sentinel of the circular LRU list, exactly as
//! `struct dirent root` does in the original. Slots `1..=ENTRY_CACHE_NUM` are the reusable
//! cache. `edup`/`eput` are folded into `Clone`/`Drop` on the `Dirent` handle, replacing the
//! original's manual discipline with RAII — the same trade the buffer cache already makes with
//! `Arc`.

use crate::{
    error::{FsError, FsResult},
    param::ENTRY_CACHE_NUM,
    sleeplock::{SleepLock, SleepLockGuard},
    spinlock::Mutex,
    stat::{IType, Stat},
};
use alloc::{string::String, vec::Vec};
use array_macro::array;

const SLOTS: usize = ENTRY_CACHE_NUM + 1;
pub const ROOT: EntryId = EntryId(0);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntryId(pub(crate) usize);

bitflags::bitflags! {
    pub struct Attr: u8 {
        const READ_ONLY = 0x01;
        const HIDDEN = 0x02;
        const SYSTEM = 0x04;
        const VOLUME_ID = 0x08;
        const DIRECTORY = 0x10;
        const ARCHIVE = 0x20;
        const LONG_NAME = 0x0f;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Validity {
    /// Not carrying a live entry; available to `eget`.
    Free,
    /// Carries a live entry; on-disk content matches `filename`/`off`/`parent`.
    Live,
    /// `remove()` was called; the slot stays checked out until the last handle drops, then
    /// `etrunc` runs and the slot reverts to `Free`.
    Removed,
}

struct Meta {
    dev: u32,
    valid: Validity,
    ref_count: u32,
    parent: Option<EntryId>,
    next: EntryId,
    prev: EntryId,
}

impl Meta {
    const fn new() -> Self {
        Self {
            dev: 0,
            valid: Validity::Free,
            ref_count: 0,
            parent: None,
            next: ROOT,
            prev: ROOT,
        }
    }
}

pub struct Data {
    pub filename: String,
    pub attr: Attr,
    pub first_clus: u32,
    pub file_size: u32,
    pub cur_clus: u32,
    pub clus_cnt: u32,
    /// Byte offset of this entry's short-name slot within its parent directory.
    pub off: u32,
    pub dirty: bool,
}

impl Data {
    const fn new() -> Self {
        Self {
            filename: String::new(),
            attr: Attr::empty(),
            first_clus: 0,
            file_size: 0,
            cur_clus: 0,
            clus_cnt: 0,
            off: 0,
            dirty: false,
        }
    }
}

struct Ecache {
    meta: Mutex<[Meta; SLOTS]>,
    data: [SleepLock<Data>; SLOTS],
}

impl Ecache {
    const fn new() -> Self {
        Self {
            meta: Mutex::new(array![_ => Meta::new(); SLOTS], "ecache"),
            data: array![SleepLock::new(Data::new(), "entry"); SLOTS],
        }
    }
}

static ECACHE: Ecache = Ecache::new();

/// Brings the entry cache online: slot 0 becomes the live root directory, the rest are threaded
/// into the LRU list behind it. Mirrors `fat32_init`'s root/ecache setup.
pub(super) fn init(dev: u32, root_clus: u32) {
    let mut meta = ECACHE.meta.lock();
    meta[0] = Meta {
        dev,
        valid: Validity::Live,
        ref_count: 1,
        parent: None,
        next: ROOT,
        prev: ROOT,
    };
    {
        let mut root = ECACHE.data[0].lock();
        root.filename = String::new();
        root.attr = Attr::DIRECTORY | Attr::SYSTEM;
        root.first_clus = root_clus;
        root.cur_clus = root_clus;
        root.file_size = 0;
        root.clus_cnt = 0;
        root.off = 0;
        root.dirty = false;
    }
    for i in (1..SLOTS).rev() {
        meta[i] = Meta::new();
        let old_next = meta[0].next;
        meta[i].next = old_next;
        meta[i].prev = ROOT;
        meta_mut(&mut meta, old_next).prev = EntryId(i);
        meta[0].next = EntryId(i);
    }
}

fn meta_mut(meta: &mut [Meta; SLOTS], id: EntryId) -> &mut Meta {
    &mut meta[id.0]
}

/// Finds `name` among live entries under `parent`, or checks out an unreferenced slot for the
/// caller to populate. Mirrors `eget`.
///
/// Never holds a per-entry sleeplock while `ECACHE.meta`'s spinlock is held: a sleeplock can put
/// the caller to sleep on contention, and sleeping with a spinlock held is the one thing the
/// locking hierarchy never allows. Filename comparisons (which need the sleeplock) run as a
/// separate pass over candidates collected while the spinlock was briefly held, then the
/// candidate's identity is re-checked once the spinlock is retaken to commit the match.
fn eget(parent: EntryId, name: Option<&str>) -> EntryId {
    if let Some(name) = name {
        let candidates = {
            let meta = ECACHE.meta.lock();
            let mut v = Vec::new();
            let mut cur = meta[ROOT.0].next;
            while cur != ROOT {
                let m = &meta[cur.0];
                if m.valid == Validity::Live && m.parent == Some(parent) {
                    v.push(cur);
                }
                cur = meta[cur.0].next;
            }
            v
        };

        for cand in candidates {
            if ECACHE.data[cand.0].lock().filename != name {
                continue;
            }
            let mut meta = ECACHE.meta.lock();
            if meta[cand.0].valid == Validity::Live && meta[cand.0].parent == Some(parent) {
                if meta[cand.0].ref_count == 0 {
                    if let Some(p) = meta[cand.0].parent {
                        meta[p.0].ref_count += 1;
                    }
                }
                meta[cand.0].ref_count += 1;
                return cand;
            }
            // lost the race: recycled out from under us between the name match and the
            // re-check above. Keep looking at the remaining candidates.
        }
    }

    let claimed = {
        let mut meta = ECACHE.meta.lock();
        let mut cur = meta[ROOT.0].prev;
        let mut found = None;
        while cur != ROOT {
            if meta[cur.0].ref_count == 0 {
                meta[cur.0].ref_count = 1;
                meta[cur.0].dev = 0;
                meta[cur.0].valid = Validity::Free;
                found = Some(cur);
                break;
            }
            cur = meta[cur.0].prev;
        }
        found
    };
    match claimed {
        Some(cur) => {
            let mut data = ECACHE.data[cur.0].lock();
            data.off = 0;
            data.dirty = false;
            cur
        }
        None => panic!("eget: insufficient ecache"),
    }
}

pub(super) fn edup(id: EntryId) -> EntryId {
    ECACHE.meta.lock()[id.0].ref_count += 1;
    id
}

/// Releases one reference. When the last one drops, moves the slot to the front of the LRU
/// list and, if the entry was marked removed, truncates it. Mirrors `eput`.
fn eput(id: EntryId) {
    if id == ROOT {
        return;
    }
    let mut meta = ECACHE.meta.lock();
    if meta[id.0].valid != Validity::Free && meta[id.0].ref_count == 1 {
        // detach from its current position
        let next = meta[id.0].next;
        let prev = meta[id.0].prev;
        meta[next.0].prev = prev;
        meta[prev.0].next = next;
        // attach at the front
        let old_head = meta[ROOT.0].next;
        meta[id.0].next = old_head;
        meta[id.0].prev = ROOT;
        meta[old_head.0].prev = id;
        meta[ROOT.0].next = id;
        let removed = meta[id.0].valid == Validity::Removed;
        let dev = meta[id.0].dev;
        let parent = meta[id.0].parent;
        drop(meta);

        {
            // ref_count == 1 guarantees no other task holds this entry's lock, so acquiring it
            // here can never block.
            let mut data = ECACHE.data[id.0].lock();
            if removed {
                super::etrunc(dev, &mut data);
            } else if let Some(p) = parent {
                let mut pdata = ECACHE.data[p.0].lock();
                super::eupdate(dev, &mut data, &mut pdata);
            }
        }

        let mut meta = ECACHE.meta.lock();
        meta[id.0].ref_count -= 1;
        let now_zero = meta[id.0].ref_count == 0;
        drop(meta);
        if now_zero {
            if let Some(p) = parent {
                eput(p);
            }
        }
        return;
    }
    meta[id.0].ref_count -= 1;
}

fn current_parent(id: EntryId) -> Option<EntryId> {
    ECACHE.meta.lock()[id.0].parent
}

/// Acquires the per-entry content lock. Mirrors `elock`.
pub(super) fn lock(id: EntryId) -> SleepLockGuard<'static, Data> {
    assert!(
        ECACHE.meta.lock()[id.0].ref_count >= 1,
        "elock: entry has no references"
    );
    ECACHE.data[id.0].lock()
}

/// A reference-counted handle to a directory entry. `Clone` is `edup`; `Drop` is `eput`.
pub struct Dirent(pub(super) EntryId);

impl Dirent {
    pub fn root() -> Self {
        edup(ROOT);
        Dirent(ROOT)
    }

    /// Takes a reference on the task's current working directory, as reported by `Collab::cwd`.
    pub(super) fn from_cwd(id: crate::collab::EntryId) -> Self {
        edup(EntryId(id.0));
        Dirent(EntryId(id.0))
    }

    pub(super) fn from_id(id: EntryId) -> Self {
        Dirent(id)
    }

    pub fn id(&self) -> EntryId {
        self.0
    }

    pub fn lock(&self) -> SleepLockGuard<'static, Data> {
        lock(self.0)
    }

    pub fn dev(&self) -> u32 {
        ECACHE.meta.lock()[self.0 .0].dev
    }

    pub fn parent(&self) -> Option<Dirent> {
        current_parent(self.0).map(|p| {
            edup(p);
            Dirent(p)
        })
    }

    pub fn is_removed(&self) -> bool {
        ECACHE.meta.lock()[self.0 .0].valid == Validity::Removed
    }

    /// Marks this entry removed in its parent directory. Caller must already hold both this
    /// entry's lock and its parent's, matching `eremove`'s contract.
    pub(super) fn mark_removed(&self) {
        ECACHE.meta.lock()[self.0 .0].valid = Validity::Removed;
    }

    pub fn stat(&self) -> Stat {
        let data = self.lock();
        Stat {
            name: data.filename.clone(),
            kind: if data.attr.contains(Attr::DIRECTORY) {
                IType::Dir
            } else {
                IType::File
            },
            dev: self.dev(),
            size: data.file_size,
        }
    }
}

impl Clone for Dirent {
    fn clone(&self) -> Self {
        edup(self.0);
        Dirent(self.0)
    }
}

impl Drop for Dirent {
    fn drop(&mut self) {
        eput(self.0);
    }
}

pub(super) fn checkout(parent: EntryId, name: Option<&str>) -> EntryId {
    eget(parent, name)
}

/// Marks a freshly checked-out slot as a live entry under `parent` at directory offset `off`.
/// Bumps `parent`'s reference count, mirroring `ep->parent = edup(dp)` in the original: the
/// child's `parent` link is itself a reference, released when the child's own ref count reaches
/// zero in `eput`.
pub(super) fn set_live(id: EntryId, dev: u32, parent: EntryId, off: u32) {
    edup(parent);
    let mut meta = ECACHE.meta.lock();
    meta[id.0].dev = dev;
    meta[id.0].parent = Some(parent);
    meta[id.0].valid = Validity::Live;
    drop(meta);
    ECACHE.data[id.0].lock().off = off;
}

pub(super) fn is_live(id: EntryId) -> bool {
    ECACHE.meta.lock()[id.0].valid == Validity::Live
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn eget_reuses_unreferenced_slots_and_panics_when_exhausted() {
        let _g = crate::test_support::GLOBAL_TEST_LOCK.lock();
        crate::test_support::install_test_collab();
        init(0, 2);
        let mut ids = alloc::vec::Vec::new();
        for _ in 0..ENTRY_CACHE_NUM {
            ids.push(eget(ROOT, None));
        }
        // every slot checked out; one more must panic
        let result = std::panic::catch_unwind(|| eget(ROOT, None));
        assert!(result.is_err());
    }
}
