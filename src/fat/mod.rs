//! FAT32 volume geometry, the FAT table itself, and cluster-chain bookkeeping. Grounded on
//! `kernel/fat32.c`'s `fat32_init`/`first_sec_of_clus`/`fat_sec_of_clus`/`fat_offset_of_clus`/
//! `read_fat`/`write_fat`/`zero_clus`/`alloc_clus`/`free_clus`/`rw_clus`/`reloc_clus`.
//!
//! Everything above "a cluster chain" (directory entries, names, paths) lives in the sibling
//! modules; this one only knows about sector and cluster numbers.

pub mod dirent;
pub mod format;
mod ops;
pub mod path;

pub use ops::{dirlookup, ealloc, eread, eremove, etrunc, eupdate, ewrite};

use crate::{
    bcache,
    collab::{self, Addr},
    error::{FsError, FsResult},
    param::SECSZ,
};

/// Marks a cluster as the end of its chain. Any value `>= FAT32_EOC` is an end-of-chain marker;
/// this is the one `alloc_clus` writes for a freshly allocated, still-terminal cluster.
pub const FAT32_EOC: u32 = 0x0fff_fff8;

#[derive(Debug, Clone, Copy)]
pub struct Geometry {
    pub byts_per_sec: u16,
    pub sec_per_clus: u8,
    pub rsvd_sec_cnt: u16,
    pub fat_cnt: u8,
    pub fat_sz: u32,
    pub root_clus: u32,
    pub first_data_sec: u32,
    pub data_clus_cnt: u32,
    pub byts_per_clus: u32,
}

static GEOMETRY: spin::Once<Geometry> = spin::Once::new();

fn geo() -> &'static Geometry {
    GEOMETRY
        .get()
        .expect("fat::geo: volume not mounted, call fat::mount first")
}

/// Parses the BPB out of sector 0 and brings the volume online: entry cache, root directory,
/// geometry. Mirrors `fat32_init`.
pub fn mount(dev: u32) -> FsResult<()> {
    let b = bcache::bread(dev, 0);
    if &b[82..87] != &b"FAT32"[..] {
        return Err(FsError::NotFat32);
    }

    let byts_per_sec = u16::from_le_bytes([b[11], b[12]]);
    if byts_per_sec as usize != SECSZ {
        return Err(FsError::NotFat32);
    }
    let sec_per_clus = b[13];
    let rsvd_sec_cnt = u16::from_le_bytes([b[14], b[15]]);
    let fat_cnt = b[16];
    let tot_sec = u32::from_le_bytes([b[32], b[33], b[34], b[35]]);
    let fat_sz = u32::from_le_bytes([b[36], b[37], b[38], b[39]]);
    let root_clus = u32::from_le_bytes([b[44], b[45], b[46], b[47]]);
    drop(b);

    let first_data_sec = rsvd_sec_cnt as u32 + fat_cnt as u32 * fat_sz;
    let data_sec_cnt = tot_sec - first_data_sec;
    let data_clus_cnt = data_sec_cnt / sec_per_clus as u32;
    let byts_per_clus = sec_per_clus as u32 * byts_per_sec as u32;

    let geometry = Geometry {
        byts_per_sec,
        sec_per_clus,
        rsvd_sec_cnt,
        fat_cnt,
        fat_sz,
        root_clus,
        first_data_sec,
        data_clus_cnt,
        byts_per_clus,
    };
    GEOMETRY.call_once(|| geometry);
    dirent::init(dev, root_clus);
    Ok(())
}

fn first_sec_of_clus(cluster: u32) -> u32 {
    (cluster - 2) * geo().sec_per_clus as u32 + geo().first_data_sec
}

fn fat_sec_of_clus(cluster: u32, fat_num: u8) -> u32 {
    geo().rsvd_sec_cnt as u32 + (cluster << 2) / geo().byts_per_sec as u32
        + geo().fat_sz * (fat_num as u32 - 1)
}

fn fat_offset_of_clus(cluster: u32) -> u32 {
    (cluster << 2) % geo().byts_per_sec as u32
}

/// Returns the next cluster in `cluster`'s chain, or `cluster` itself if already `>= FAT32_EOC`.
fn read_fat(dev: u32, cluster: u32) -> u32 {
    if cluster >= FAT32_EOC {
        return cluster;
    }
    if cluster > geo().data_clus_cnt + 1 {
        return 0;
    }
    let fat_sec = fat_sec_of_clus(cluster, 1);
    let b = bcache::bread(dev, fat_sec);
    let off = fat_offset_of_clus(cluster) as usize;
    u32::from_le_bytes([b[off], b[off + 1], b[off + 2], b[off + 3]])
}

fn write_fat(dev: u32, cluster: u32, content: u32) -> FsResult<()> {
    if cluster > geo().data_clus_cnt + 1 {
        return Err(FsError::NotFound);
    }
    let fat_sec = fat_sec_of_clus(cluster, 1);
    let mut b = bcache::bread(dev, fat_sec);
    let off = fat_offset_of_clus(cluster) as usize;
    b.data[off..off + 4].copy_from_slice(&content.to_le_bytes());
    b.write(crate::blockdev::get());
    Ok(())
}

fn zero_clus(dev: u32, cluster: u32) {
    let mut sec = first_sec_of_clus(cluster);
    for _ in 0..geo().sec_per_clus {
        let mut b = bcache::bread(dev, sec);
        b.data = [0u8; SECSZ];
        b.write(crate::blockdev::get());
        sec += 1;
    }
}

/// Scans the FAT linearly for the first unused entry, marks it terminal, zeroes its data
/// cluster, and returns its number.
fn alloc_clus(dev: u32) -> FsResult<u32> {
    let ent_per_sec = geo().byts_per_sec as u32 / 4;
    let mut sec = geo().rsvd_sec_cnt as u32;
    for i in 0..geo().fat_sz {
        let mut b = bcache::bread(dev, sec + i);
        for j in 0..ent_per_sec {
            let off = (j * 4) as usize;
            let val = u32::from_le_bytes([b[off], b[off + 1], b[off + 2], b[off + 3]]);
            if val == 0 {
                b.data[off..off + 4].copy_from_slice(&(FAT32_EOC + 7).to_le_bytes());
                b.write(crate::blockdev::get());
                drop(b);
                let clus = i * ent_per_sec + j;
                zero_clus(dev, clus);
                return Ok(clus);
            }
        }
    }
    Err(FsError::NoSpace)
}

fn free_clus(dev: u32, cluster: u32) {
    let _ = write_fat(dev, cluster, 0);
}

/// Reads or writes `n` bytes at offset `off` within cluster `cluster`, to/from `addr`.
/// Mirrors `rw_clus`.
fn rw_clus(dev: u32, cluster: u32, write: bool, addr: Addr, mut off: u32, n: u32) -> FsResult<u32> {
    if off + n > geo().byts_per_clus {
        panic!("rw_clus: offset out of range");
    }
    let mut sec = first_sec_of_clus(cluster) + off / geo().byts_per_sec as u32;
    off %= geo().byts_per_sec as u32;

    let mut tot = 0u32;
    let mut cursor = addr;
    while tot < n {
        let mut b = bcache::bread(dev, sec);
        let mut m = SECSZ as u32 - off % SECSZ as u32;
        if n - tot < m {
            m = n - tot;
        }
        let start = (off % SECSZ as u32) as usize;
        let res = if write {
            let copied = collab::get().either_copyin(&mut b.data[start..start + m as usize], cursor);
            if copied.is_ok() {
                b.write(crate::blockdev::get());
            }
            copied
        } else {
            collab::get().either_copyout(cursor, &b.data[start..start + m as usize])
        };
        drop(b);
        if res.is_err() {
            return Err(FsError::BadAddress);
        }
        tot += m;
        off += m;
        cursor = advance(cursor, m);
        sec += 1;
    }
    Ok(tot)
}

fn advance(addr: Addr, by: u32) -> Addr {
    match addr {
        Addr::Kernel(p) => Addr::Kernel(unsafe { p.add(by as usize) }),
        Addr::User(a) => Addr::User(a + by as usize),
    }
}

/// Walks (and optionally grows) a cluster chain so that `cur_clus`/`clus_cnt` point at the
/// cluster containing byte offset `off`. Returns the offset within that cluster, or `None` if
/// `off` falls past the chain's end and `alloc` is false. Mirrors `reloc_clus`.
pub(crate) fn reloc_clus(
    dev: u32,
    first_clus: u32,
    cur_clus: &mut u32,
    clus_cnt: &mut u32,
    off: u32,
    alloc: bool,
) -> FsResult<u32> {
    let clus_num = off / geo().byts_per_clus;
    while clus_num > *clus_cnt {
        let mut clus = read_fat(dev, *cur_clus);
        if clus >= FAT32_EOC {
            if alloc {
                clus = alloc_clus(dev)?;
                write_fat(dev, *cur_clus, clus)?;
            } else {
                *cur_clus = first_clus;
                *clus_cnt = 0;
                return Err(FsError::NotFound);
            }
        }
        *cur_clus = clus;
        *clus_cnt += 1;
    }
    if clus_num < *clus_cnt {
        *cur_clus = first_clus;
        *clus_cnt = 0;
        while *clus_cnt < clus_num {
            *cur_clus = read_fat(dev, *cur_clus);
            if *cur_clus >= FAT32_EOC {
                panic!("reloc_clus: chain shorter than recorded clus_cnt");
            }
            *clus_cnt += 1;
        }
    }
    Ok(off % geo().byts_per_clus)
}

// `mount` and the cluster-chain helpers all read through the single process-wide `blockdev`
// and `GEOMETRY` statics (mirroring the teacher's single-volume globals), so — unlike
// `bcache`'s tests, which construct a private `BCache` per test — every test in this module
// that touches the volume has to share one mount. They're folded into one function instead of
// many, both for that reason and because `cargo test` runs `#[test]` fns concurrently by
// default and a `spin::Once` can only be won once per process.
#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::RamDisk;
    use alloc::boxed::Box;

    fn make_bpb(sec_per_clus: u8, rsvd: u16, fat_cnt: u8, fat_sz: u32, tot_sec: u32, root_clus: u32) -> [u8; SECSZ] {
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

    #[test]
    fn mount_then_cluster_chain_round_trip() {
        let _g = crate::test_support::GLOBAL_TEST_LOCK.lock();
        crate::test_support::install_test_collab();
        // rsvd=2, fat_cnt=1, fat_sz=2 sectors (256 entries/sector * 1 fat = 256 clusters of
        // headroom), 1 sector/cluster, root at cluster 2.
        let disk: &'static RamDisk = Box::leak(Box::new(RamDisk::new(64)));
        crate::blockdev::set(disk);
        crate::bcache::init();

        // first attempt: no FAT32 signature, must fail without touching GEOMETRY.
        assert_eq!(mount(0), Err(FsError::NotFat32));

        disk.seed(0, &make_bpb(1, 2, 1, 2, 64, 2));
        mount(0).expect("mount should succeed once the BPB is valid");

        // a real mkfs.fat32 image reserves FAT[0]/FAT[1]; alloc_clus trusts the on-disk FAT and
        // would otherwise happily hand out cluster 0, which underflows in first_sec_of_clus.
        let mut fat_sec0 = [0u8; SECSZ];
        fat_sec0[0..4].copy_from_slice(&0x0fff_fff8u32.to_le_bytes());
        fat_sec0[4..8].copy_from_slice(&0x0fff_ffffu32.to_le_bytes());
        disk.seed(2, &fat_sec0);

        // allocate a fresh cluster and confirm the FAT round-trips through read_fat/write_fat.
        let clus = alloc_clus(0).expect("alloc_clus should find free cluster 2 or later");
        assert!(read_fat(0, clus) >= FAT32_EOC);

        write_fat(0, clus, 99).unwrap();
        assert_eq!(read_fat(0, clus), 99);

        free_clus(0, clus);
        assert_eq!(read_fat(0, clus), 0);

        // reloc_clus: walk past the end of a single-cluster chain without `alloc` must fail...
        let first = alloc_clus(0).unwrap();
        let mut cur = first;
        let mut cnt = 0u32;
        let byts_per_clus = geo().byts_per_clus;
        assert_eq!(
            reloc_clus(0, first, &mut cur, &mut cnt, byts_per_clus, false),
            Err(FsError::NotFound)
        );
        assert_eq!(cur, first);
        assert_eq!(cnt, 0);

        // ...but succeeds and extends the chain when `alloc` is true.
        let off_in_clus = reloc_clus(0, first, &mut cur, &mut cnt, byts_per_clus, true).unwrap();
        assert_eq!(off_in_clus, 0);
        assert_eq!(cnt, 1);
        assert_ne!(cur, first);
        assert_eq!(read_fat(0, first), cur);
    }
}
