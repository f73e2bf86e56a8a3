//! The boundary between the buffer cache and whatever moves bytes to and from the backing
//! store. In the real kernel that's `virtio_disk::Disk`; tests register a `RamDisk` instead.
//! Split out from `collab::Collab` because a block device is swappable independently of the
//! scheduler/vm collaborator, and because `virtio_disk::Disk` needs `&self` access through a
//! `spinlock::Mutex`, not a trait object held by value.

use crate::param::SECSZ;

pub trait BlockDevice: Sync {
    fn read(&self, dev: u32, sector: u32, buf: &mut [u8; SECSZ]);
    fn write(&self, dev: u32, sector: u32, buf: &[u8; SECSZ]);
}

static DEVICE: spin::Once<&'static dyn BlockDevice> = spin::Once::new();

/// Registers the block device implementation. Must be called exactly once, before `bcache`
/// issues its first read.
pub fn set(dev: &'static dyn BlockDevice) {
    DEVICE.call_once(|| dev);
}

/// # Panics
/// Panics if `set` has not been called yet.
pub fn get() -> &'static dyn BlockDevice {
    *DEVICE
        .get()
        .expect("blockdev::get: no BlockDevice registered, call blockdev::set first")
}
