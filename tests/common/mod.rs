//! Host fakes for the end-to-end tests. Integration test binaries link the crate compiled
//! without `cfg(test)`, so `src/test_support` (gated to the lib's own unit tests) isn't visible
//! here; this is its equivalent, built purely against `fatox`'s public API.

use fatox::blockdev::BlockDevice;
use fatox::collab::{Addr, Collab, EntryId};
use fatox::param::SECSZ;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, OnceLock};

pub struct TestCollab;

impl Collab for TestCollab {
    fn alloc_page(&self) -> Option<*mut u8> {
        let page = Box::new([0u8; fatox::param::PGSIZE]);
        Some(Box::into_raw(page) as *mut u8)
    }

    fn free_page(&self, page: *mut u8) {
        unsafe {
            drop(Box::from_raw(page as *mut [u8; fatox::param::PGSIZE]));
        }
    }

    fn sleep(&self, _chan: usize) {
        panic!("common::TestCollab::sleep: no other task can ever wake this up");
    }

    fn wakeup(&self, _chan: usize) {}

    fn either_copyout(&self, dst: Addr, src: &[u8]) -> Result<(), ()> {
        match dst {
            Addr::Kernel(p) => {
                unsafe { core::ptr::copy_nonoverlapping(src.as_ptr(), p, src.len()) };
                Ok(())
            }
            Addr::User(_) => Err(()),
        }
    }

    fn either_copyin(&self, dst: &mut [u8], src: Addr) -> Result<(), ()> {
        match src {
            Addr::Kernel(p) => {
                unsafe { core::ptr::copy_nonoverlapping(p, dst.as_mut_ptr(), dst.len()) };
                Ok(())
            }
            Addr::User(_) => Err(()),
        }
    }

    fn cwd(&self) -> EntryId {
        EntryId(0)
    }

    fn console_putc(&self, _c: u8) {}
}

static TEST_COLLAB: TestCollab = TestCollab;
static INSTALLED: AtomicBool = AtomicBool::new(false);

/// Serializes tests in this binary: they all share the crate's process-wide `GEOMETRY`/`ECACHE`/
/// `blockdev` singletons, exactly like the lib's own `#[cfg(test)]` suite does.
pub static GLOBAL_TEST_LOCK: Mutex<()> = Mutex::new(());

pub fn install_test_collab() {
    if !INSTALLED.swap(true, Ordering::SeqCst) {
        fatox::collab::set(&TEST_COLLAB);
    }
}

pub struct RamDisk {
    sectors: Mutex<Vec<[u8; SECSZ]>>,
}

impl RamDisk {
    pub fn new(num_sectors: usize) -> Self {
        Self {
            sectors: Mutex::new(vec![[0u8; SECSZ]; num_sectors]),
        }
    }

    pub fn seed(&self, sector: u32, data: &[u8; SECSZ]) {
        self.sectors.lock().unwrap()[sector as usize] = *data;
    }
}

impl BlockDevice for RamDisk {
    fn read(&self, _dev: u32, sector: u32, buf: &mut [u8; SECSZ]) {
        *buf = self.sectors.lock().unwrap()[sector as usize];
    }

    fn write(&self, _dev: u32, sector: u32, buf: &[u8; SECSZ]) {
        self.sectors.lock().unwrap()[sector as usize] = *buf;
    }
}

/// Builds a minimal valid BPB: `rsvd` reserved sectors, one FAT of `fat_sz` sectors (each holding
/// 128 32-bit entries), `sec_per_clus` sectors per cluster, root directory at cluster 2.
pub fn make_bpb(sec_per_clus: u8, rsvd: u16, fat_cnt: u8, fat_sz: u32, tot_sec: u32, root_clus: u32) -> [u8; SECSZ] {
    let mut b = [0u8; SECSZ];
    b[11..13].copy_from_slice(&(SECSZ as u16).to_le_bytes());
    b[13] = sec_per_clus;
    b[14..16].copy_from_slice(&rsvd.to_le_bytes());
    b[16] = fat_cnt;
    b[32..36].copy_from_slice(&tot_sec.to_le_bytes());
    b[36..40].copy_from_slice(&fat_sz.to_le_bytes());
    b[44..48].copy_from_slice(&root_clus.to_le_bytes());
    b[82..87].copy_from_slice(b"FAT32");
    b
}

static VOLUME: OnceLock<&'static RamDisk> = OnceLock::new();

/// Returns the shared in-memory volume for this test binary: 4 sectors/cluster, 2 reserved
/// sectors, one 2-sector FAT (256 cluster entries of headroom), 256 total sectors.
///
/// `fatox::blockdev`/`fatox::fat`'s geometry are process-wide `spin::Once` singletons (mirroring
/// the real kernel, which mounts a device exactly once), so the mount can only happen the first
/// time this is called; every test after that shares the same mounted volume rather than getting
/// its own. Tests below rely on distinct file/directory names to stay independent of each other.
pub fn mount_fresh_volume() -> &'static RamDisk {
    *VOLUME.get_or_init(|| {
        install_test_collab();
        let disk: &'static RamDisk = Box::leak(Box::new(RamDisk::new(256)));
        fatox::blockdev::set(disk);
        fatox::bcache::init();
        disk.seed(0, &make_bpb(4, 2, 1, 2, 256, 2));

        // A real mkfs.fat32 image reserves FAT[0]/FAT[1] and marks the root directory's own
        // cluster (2) terminal; `alloc_clus` (like the original it's grounded on) trusts the
        // on-disk FAT and would otherwise happily "allocate" cluster 0 on its first call.
        let mut fat_sec0 = [0u8; SECSZ];
        fat_sec0[0..4].copy_from_slice(&0x0fff_fff8u32.to_le_bytes());
        fat_sec0[4..8].copy_from_slice(&0x0fff_ffffu32.to_le_bytes());
        fat_sec0[8..12].copy_from_slice(&0x0fff_ffffu32.to_le_bytes());
        disk.seed(2, &fat_sec0);

        fatox::fat::mount(0).expect("mount should succeed on a freshly seeded volume");
        disk
    })
}
