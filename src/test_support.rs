//! Host-side fakes for the collaborators this crate doesn't implement itself: the scheduler's
//! sleep/wakeup, the page allocator, and the physical block device. Exists purely for
//! `cargo test`; never compiled into a kernel build.
//!
//! Tests are single-threaded, so `sleep`/`wakeup` can be no-ops: nothing else is running to
//! wake a sleeper, so every contended path this crate takes must already resolve without
//! blocking in a single-threaded test, or the test is exercising the wrong thing.

use crate::{
    blockdev::BlockDevice,
    collab::{Addr, Collab, EntryId},
    param::SECSZ,
};
use alloc::{boxed::Box, vec, vec::Vec};
use core::sync::atomic::{AtomicBool, Ordering};

pub struct TestCollab;

impl Collab for TestCollab {
    fn alloc_page(&self) -> Option<*mut u8> {
        let page = Box::new([0u8; crate::param::PGSIZE]);
        Some(Box::into_raw(page) as *mut u8)
    }

    fn free_page(&self, page: *mut u8) {
        unsafe {
            drop(Box::from_raw(page as *mut [u8; crate::param::PGSIZE]));
        }
    }

    fn sleep(&self, _chan: usize) {
        panic!("test_support::TestCollab::sleep: no other task can ever wake this up");
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

/// Serializes tests that mutate process-wide singletons (`fat`'s `GEOMETRY`, `ECACHE`, the
/// `blockdev` registration). Cargo runs tests in parallel by default; anything touching those
/// statics must take this lock first or two tests will corrupt each other's state.
pub static GLOBAL_TEST_LOCK: spin::Mutex<()> = spin::Mutex::new(());

/// Registers `TestCollab` as the crate's collaborator. Idempotent and safe to call at the top
/// of every test that touches a `SleepLock` or the virtio descriptor bookkeeping.
pub fn install_test_collab() {
    if !INSTALLED.swap(true, Ordering::SeqCst) {
        crate::collab::set(&TEST_COLLAB);
    }
}

/// An in-memory block device, sized in whole sectors, for exercising the buffer cache and the
/// FAT engine without real hardware.
pub struct RamDisk {
    sectors: spin::Mutex<Vec<[u8; SECSZ]>>,
}

impl RamDisk {
    pub fn new(num_sectors: usize) -> Self {
        Self {
            sectors: spin::Mutex::new(vec![[0u8; SECSZ]; num_sectors]),
        }
    }

    /// Seeds sector `n` with caller-supplied bytes (e.g. a hand-built BPB for a mount test).
    pub fn seed(&self, sector: u32, data: &[u8; SECSZ]) {
        self.sectors.lock()[sector as usize] = *data;
    }
}

impl BlockDevice for RamDisk {
    fn read(&self, _dev: u32, sector: u32, buf: &mut [u8; SECSZ]) {
        *buf = self.sectors.lock()[sector as usize];
    }

    fn write(&self, _dev: u32, sector: u32, buf: &[u8; SECSZ]) {
        self.sectors.lock()[sector as usize] = *buf;
    }
}
