//! Driver for qemu's virtio-blk device, legacy (version 1) MMIO interface.
//!
//! qemu ... -drive file=fs.img,if=none,format=raw,id=x0 \
//!          -device virtio-blk-device,drive=x0,bus=virtio-mmio-bus.0
//!
//! Adapted from the teacher's `virtio_disk.rs`. The descriptor/avail/used ring bookkeeping is
//! unchanged; the completion handshake no longer keys off an `Arc<Buf>` (the buffer cache is a
//! separate collaborator now, see `blockdev::BlockDevice`) but off the address of the caller's
//! own data buffer, which is stable for the duration of the blocking `read`/`write` call.

use crate::{
    blockdev::BlockDevice,
    collab,
    param::{PGSHIFT, PGSIZE, SECSZ},
    spinlock::Mutex,
};
use bitflags::bitflags;
use core::{
    convert::TryInto,
    sync::atomic::{fence, Ordering},
};

/// Base address of the virtio-mmio region. Real hardware/qemu memory map; has no meaning in
/// tests, which never call `init`/`read`/`write` on a real `Disk`.
const VIRTIO0: usize = 0x1000_1000;

#[repr(usize)]
enum VirtioMMIO {
    MagicValue = 0x000,
    Version = 0x004,
    DeviceId = 0x008,
    VenderId = 0x00c,
    DeviceFeatures = 0x010,
    DriverFeatures = 0x020,
    GuestPageSize = 0x028,
    QueueSel = 0x030,
    QueueNumMax = 0x034,
    QueueNum = 0x038,
    QueuePfn = 0x040,
    QueueNotify = 0x050,
    InterruptStatus = 0x060,
    InterruptAck = 0x064,
    Status = 0x070,
}

impl VirtioMMIO {
    fn read(self) -> u32 {
        unsafe { core::ptr::read_volatile((VIRTIO0 + self as usize) as *const u32) }
    }
    unsafe fn write(self, data: u32) {
        core::ptr::write_volatile((VIRTIO0 + self as usize) as *mut u32, data);
    }
}

bitflags! {
    struct VirtioStatus: u32 {
        const ACKNOWLEDGE = 0b0001;
        const DRIVER = 0b0010;
        const DRIVER_OK = 0b0100;
        const FEATURES_OK = 0b1000;
    }
}

bitflags! {
    struct VirtioFeatures: u32 {
        const BLK_F_RO = 1 << 5;
        const BLK_F_SCSI = 1 << 7;
        const BLK_F_CONFIG_WCE = 1 << 11;
        const BLK_F_MQ = 1 << 12;
        const F_ANY_LAYOUT = 1 << 27;
        const RING_F_INDIRECT_DESC = 1 << 28;
        const RING_F_EVENT_IDX = 1 << 29;
    }
}

use crate::param::NUM;

#[repr(C, align(4096))]
pub struct Disk {
    pad1: PadPGA,
    desc: [VirtqDesc; NUM],
    avail: VirtqAvail,

    pad2: PadPGA,
    used: VirtqUsed,

    pad3: PadPGA,
    free: [bool; NUM],
    used_idx: u16,

    info: [Info; NUM],
    ops: [VirtioBlkReq; NUM],
}

#[derive(Debug, Clone, Copy)]
#[repr(C, align(4096))]
struct PadPGA();

impl PadPGA {
    const fn new() -> Self {
        Self()
    }
}

#[derive(Debug, Clone, Copy)]
#[repr(C, align(16))]
struct VirtqDesc {
    addr: u64,
    len: u32,
    flags: VirtqDescFlags,
    next: u16,
}

bitflags! {
    struct VirtqDescFlags: u16 {
        const FREED = 0b00;
        const NEXT = 0b01;
        const WRITE = 0b10;
    }
}

impl VirtqDesc {
    const fn new() -> Self {
        Self {
            addr: 0,
            len: 0,
            flags: VirtqDescFlags::FREED,
            next: 0,
        }
    }
}

#[derive(Debug, Clone, Copy)]
#[repr(C, align(2))]
struct VirtqAvail {
    flags: u16,
    idx: u16,
    ring: [u16; NUM],
    unused: u16,
}

impl VirtqAvail {
    const fn new() -> Self {
        Self {
            flags: 0,
            idx: 0,
            ring: [0; NUM],
            unused: 0,
        }
    }
}

#[derive(Debug, Clone, Copy)]
#[repr(C)]
struct VirtqUsedElem {
    id: u32,
    len: u32,
}

impl VirtqUsedElem {
    const fn new() -> Self {
        Self { id: 0, len: 0 }
    }
}

#[derive(Debug, Clone, Copy)]
#[repr(C, align(4))]
struct VirtqUsed {
    flags: u16,
    idx: u16,
    ring: [VirtqUsedElem; NUM],
}

impl VirtqUsed {
    const fn new() -> Self {
        Self {
            flags: 0,
            idx: 0,
            ring: [VirtqUsedElem::new(); NUM],
        }
    }
}

/// Per-in-flight-chain bookkeeping, indexed by the head descriptor of the chain. `chan` is the
/// address `intr()` wakes once the device reports completion.
#[derive(Clone, Copy)]
#[repr(C)]
struct Info {
    chan: usize,
    status: u8,
}

impl Info {
    const fn new() -> Self {
        Self { chan: 0, status: 0 }
    }
}

pub const VIRTIO_BLK_T_IN: u32 = 0;
pub const VIRTIO_BLK_T_OUT: u32 = 1;

#[derive(Debug, Clone, Copy)]
#[repr(C)]
struct VirtioBlkReq {
    type_: u32,
    reserved: u32,
    sector: u64,
}

impl VirtioBlkReq {
    const fn new() -> Self {
        Self {
            type_: 0,
            reserved: 0,
            sector: 0,
        }
    }
}

impl Disk {
    pub const fn new() -> Self {
        Self {
            pad1: PadPGA::new(),
            desc: [VirtqDesc::new(); NUM],
            avail: VirtqAvail::new(),
            pad2: PadPGA::new(),
            used: VirtqUsed::new(),
            pad3: PadPGA::new(),
            free: [false; NUM],
            used_idx: 0,
            info: [Info::new(); NUM],
            ops: [VirtioBlkReq::new(); NUM],
        }
    }

    /// Probes the device and negotiates features. Touches real MMIO; never called in tests.
    unsafe fn hw_init(&mut self) {
        let mut status: VirtioStatus = VirtioStatus::empty();

        if VirtioMMIO::MagicValue.read() != 0x7472_6976
            || VirtioMMIO::Version.read() != 1
            || VirtioMMIO::DeviceId.read() != 2
            || VirtioMMIO::VenderId.read() != 0x554d_4551
        {
            panic!("could not find virtio disk");
        }

        status.insert(VirtioStatus::ACKNOWLEDGE);
        VirtioMMIO::Status.write(status.bits());
        status.insert(VirtioStatus::DRIVER);
        VirtioMMIO::Status.write(status.bits());

        let features = VirtioFeatures::from_bits_truncate(VirtioMMIO::DeviceFeatures.read())
            - (VirtioFeatures::BLK_F_RO
                | VirtioFeatures::BLK_F_SCSI
                | VirtioFeatures::BLK_F_CONFIG_WCE
                | VirtioFeatures::BLK_F_MQ
                | VirtioFeatures::F_ANY_LAYOUT
                | VirtioFeatures::RING_F_EVENT_IDX
                | VirtioFeatures::RING_F_INDIRECT_DESC);
        VirtioMMIO::DriverFeatures.write(features.bits());

        status.insert(VirtioStatus::FEATURES_OK);
        VirtioMMIO::Status.write(status.bits());

        status.insert(VirtioStatus::DRIVER_OK);
        VirtioMMIO::Status.write(status.bits());

        VirtioMMIO::GuestPageSize.write(PGSIZE as _);

        VirtioMMIO::QueueSel.write(0);
        let max = VirtioMMIO::QueueNumMax.read();
        assert!(max != 0, "virtio disk has no queue 0");
        assert!(max >= NUM as u32, "virtio disk max queue too short");
        VirtioMMIO::QueueNum.write(NUM as _);
        VirtioMMIO::QueuePfn.write((self as *const _ as usize >> PGSHIFT) as _);

        self.free.iter_mut().for_each(|f| *f = true);
    }

    fn alloc_desc(&mut self) -> Option<usize> {
        self.free
            .iter_mut()
            .enumerate()
            .filter(|(_, v)| **v)
            .take(1)
            .map(|(i, v)| {
                *v = false;
                i
            })
            .next()
    }

    fn free_desc(&mut self, i: usize) {
        assert!(i < NUM, "free_desc: out of range");
        assert!(!self.free[i], "free_desc: already free");
        self.desc[i].addr = 0;
        self.desc[i].len = 0;
        self.desc[i].flags = VirtqDescFlags::empty();
        self.desc[i].next = 0;
        self.free[i] = true;
        collab::get().wakeup(&self.free[0] as *const _ as usize);
    }

    fn free_chain(&mut self, mut i: usize) {
        loop {
            let desc = self.desc.get(i).unwrap();
            let flag = desc.flags;
            let nxt = desc.next;
            self.free_desc(i);
            if !(flag & VirtqDescFlags::NEXT).is_empty() {
                i = nxt as usize;
            } else {
                break;
            }
        }
    }

    fn alloc3_desc(&mut self, idx: &mut [usize; 3]) -> Result<(), ()> {
        for (i, idxi) in idx.iter_mut().enumerate() {
            match self.alloc_desc() {
                Some(ix) => *idxi = ix,
                None => {
                    for j in 0..i {
                        self.free_desc(idx[j]);
                    }
                    return Err(());
                }
            }
        }
        Ok(())
    }
}

impl Mutex<Disk> {
    fn rw(&self, dev: u32, sector: u32, buf: *mut [u8; SECSZ], write: bool) {
        let mut guard = self.lock();

        let mut idx: [usize; 3] = [0; 3];
        loop {
            if guard.alloc3_desc(&mut idx).is_ok() {
                break;
            }
            drop(guard);
            collab::get().sleep(self.name_chan());
            guard = self.lock();
        }

        let _ = dev; // single-device volume (spec Non-goals); kept for signature symmetry

        let buf0 = guard.ops.get_mut(idx[0]).unwrap();
        buf0.type_ = if write {
            VIRTIO_BLK_T_OUT
        } else {
            VIRTIO_BLK_T_IN
        };
        buf0.reserved = 0;
        buf0.sector = sector as u64;

        guard.desc[idx[0]].addr = buf0 as *mut _ as u64;
        guard.desc[idx[0]].len = core::mem::size_of::<VirtioBlkReq>().try_into().unwrap();
        guard.desc[idx[0]].flags = VirtqDescFlags::NEXT;
        guard.desc[idx[0]].next = idx[1].try_into().unwrap();

        guard.desc[idx[1]].addr = buf as u64;
        guard.desc[idx[1]].len = SECSZ.try_into().unwrap();
        guard.desc[idx[1]].flags = if write {
            VirtqDescFlags::empty()
        } else {
            VirtqDescFlags::WRITE
        };
        guard.desc[idx[1]].flags |= VirtqDescFlags::NEXT;
        guard.desc[idx[1]].next = idx[2].try_into().unwrap();

        guard.info[idx[0]].status = 0xff;
        guard.desc[idx[2]].addr = &mut guard.info[idx[0]].status as *mut _ as u64;
        guard.desc[idx[2]].len = 1;
        guard.desc[idx[2]].flags = VirtqDescFlags::WRITE;
        guard.desc[idx[2]].next = 0;

        let chan = buf as usize;
        guard.info[idx[0]].chan = chan;
        guard.info[idx[0]].status = 0xff;

        let i = guard.avail.idx as usize % NUM;
        guard.avail.ring[i] = idx[0].try_into().unwrap();

        fence(Ordering::SeqCst);
        guard.avail.idx += 1;
        fence(Ordering::SeqCst);

        unsafe {
            VirtioMMIO::QueueNotify.write(0);
        }

        while guard.info[idx[0]].status == 0xff {
            drop(guard);
            collab::get().sleep(chan);
            guard = self.lock();
        }

        guard.free_chain(idx[0]);
    }

    fn name_chan(&self) -> usize {
        self as *const _ as usize
    }

    /// Services the virtio interrupt, walking the used ring and waking any chain that finished.
    pub fn intr(&self) {
        let mut guard = self.lock();
        let intr_stat = VirtioMMIO::InterruptStatus.read();
        unsafe {
            VirtioMMIO::InterruptAck.write(intr_stat & 0x3);
        }

        fence(Ordering::SeqCst);

        while guard.used_idx != guard.used.idx {
            fence(Ordering::SeqCst);
            let id = guard.used.ring[guard.used_idx as usize % NUM].id as usize;

            if guard.info[id].status != 0 {
                panic!("disk intr status");
            }

            let chan = guard.info[id].chan;
            guard.info[id].status = 0;
            collab::get().wakeup(chan);

            guard.used_idx += 1;
        }
    }
}

impl BlockDevice for Mutex<Disk> {
    fn read(&self, dev: u32, sector: u32, buf: &mut [u8; SECSZ]) {
        self.rw(dev, sector, buf as *mut _, false);
    }
    fn write(&self, dev: u32, sector: u32, buf: &[u8; SECSZ]) {
        self.rw(dev, sector, buf as *const _ as *mut _, true);
    }
}

pub static DISK: Mutex<Disk> = Mutex::new(Disk::new(), "virtio_disk");

/// Probes the device over MMIO and registers `DISK` as the crate's block device.
pub fn init() {
    unsafe {
        DISK.lock().hw_init();
    }
    crate::blockdev::set(&DISK);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alloc3_desc_allocates_disjoint_indices() {
        crate::test_support::install_test_collab();
        let mut d = Disk::new();
        d.free = [true; NUM];
        let mut idx = [0usize; 3];
        d.alloc3_desc(&mut idx).unwrap();
        assert_ne!(idx[0], idx[1]);
        assert_ne!(idx[1], idx[2]);
        assert_ne!(idx[0], idx[2]);
        for i in idx {
            assert!(!d.free[i]);
        }
    }

    #[test]
    fn alloc3_desc_fails_and_rolls_back_when_exhausted() {
        crate::test_support::install_test_collab();
        let mut d = Disk::new();
        d.free = [true; NUM];
        // exhaust all but two descriptors
        for i in 0..NUM - 2 {
            d.free[i] = false;
        }
        let mut idx = [0usize; 3];
        assert!(d.alloc3_desc(&mut idx).is_err());
        // exactly the descriptors that were free before the call are free afterward: the two it
        // did allocate before failing must have been returned, and none of the already-exhausted
        // ones must have been incorrectly marked free.
        assert!(d.free[..NUM - 2].iter().all(|f| !f));
        assert!(d.free[NUM - 2..].iter().all(|f| *f));
    }

    #[test]
    fn free_chain_releases_every_descriptor_in_the_chain() {
        crate::test_support::install_test_collab();
        let mut d = Disk::new();
        d.free = [true; NUM];
        d.free[0] = false;
        d.free[1] = false;
        d.free[2] = false;
        d.desc[0].flags = VirtqDescFlags::NEXT;
        d.desc[0].next = 1;
        d.desc[1].flags = VirtqDescFlags::NEXT;
        d.desc[1].next = 2;
        d.desc[2].flags = VirtqDescFlags::empty();
        d.free_chain(0);
        assert!(d.free[0] && d.free[1] && d.free[2]);
    }
}
