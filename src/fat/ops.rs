//! Directory-content operations built on top of `dirent`'s reference-counted cache and
//! `format`'s on-disk encode/decode: creating, looking up, removing, and truncating entries,
//! plus whole-file read/write. Grounded on `kernel/fat32.c`'s `ealloc`/`dirlookup`/`eremove`/
//! `etrunc`/`eupdate`/`eread`/`ewrite`.
//!
//! `eupdate`/`etrunc` take the already-locked `Data` of the entry (and, for `eupdate`, its
//! parent) rather than an `EntryId`: their sole caller, `dirent::eput`, already holds both
//! sleeplocks at the point it needs them, and `SleepLock` isn't reentrant.

use super::dirent::{self, Attr, Data, Dirent};
use super::format::{self, NextEntry};
use super::{reloc_clus, rw_clus};
use crate::collab::Addr;
use crate::error::{FsError, FsResult};

/// Frees every cluster in `data`'s chain and zeroes its size. Caller holds `data`'s lock.
/// Mirrors `etrunc`.
pub fn etrunc(dev: u32, data: &mut Data) {
    let mut clus = data.first_clus;
    while clus >= 2 && clus < super::FAT32_EOC {
        let next = super::read_fat(dev, clus);
        super::free_clus(dev, clus);
        clus = next;
    }
    data.file_size = 0;
    data.first_clus = 0;
    data.dirty = true;
}

/// Rewrites the short-name slot's `first_clus`/`file_size` fields from `data` into `parent`'s
/// on-disk directory content. No-op unless `data.dirty`. Caller holds both `data`'s and
/// `parent`'s locks. Mirrors `eupdate`.
pub fn eupdate(dev: u32, data: &mut Data, parent: &mut Data) {
    if !data.dirty {
        return;
    }
    let off = data.off;
    let at = reloc_clus(dev, parent.first_clus, &mut parent.cur_clus, &mut parent.clus_cnt, off, false)
        .expect("eupdate: entry's recorded offset fell outside its parent's chain");
    let mut entcnt_buf = [0u8; 1];
    rw_clus(dev, parent.cur_clus, false, Addr::Kernel(entcnt_buf.as_mut_ptr()), at, 1)
        .expect("eupdate: read of long-name entry count failed");
    let entcnt = (entcnt_buf[0] & !format::LAST_LONG_ENTRY) as u32;
    let short_off = off + (entcnt << 5);
    let at = reloc_clus(dev, parent.first_clus, &mut parent.cur_clus, &mut parent.clus_cnt, short_off, false)
        .expect("eupdate: short-name slot fell outside its parent's chain");
    let mut rec = [0u8; 32];
    rw_clus(dev, parent.cur_clus, false, Addr::Kernel(rec.as_mut_ptr()), at, 32)
        .expect("eupdate: read of short-name slot failed");
    rec[20..22].copy_from_slice(&((data.first_clus >> 16) as u16).to_le_bytes());
    rec[26..28].copy_from_slice(&((data.first_clus & 0xffff) as u16).to_le_bytes());
    rec[28..32].copy_from_slice(&data.file_size.to_le_bytes());
    rw_clus(dev, parent.cur_clus, true, Addr::Kernel(rec.as_mut_ptr()), at, 32)
        .expect("eupdate: write of short-name slot failed");
    data.dirty = false;
}

/// Searches `dp`'s content for `name`, returning the matching entry and (whether found or not)
/// the byte offset either of the match or of the first run of empty slots found along the way
/// that's large enough to hold a new entry by that name. `.`/`..` resolve without touching disk.
/// Mirrors `dirlookup`.
pub fn dirlookup(dp: &Dirent, name: &str) -> (Option<Dirent>, u32) {
    {
        let dp_data = dp.lock();
        assert!(
            dp_data.attr.contains(Attr::DIRECTORY),
            "dirlookup: not a directory"
        );
    }
    if name == "." {
        return (Some(dp.clone()), 0);
    }
    if name == ".." {
        return (Some(dp.parent().unwrap_or_else(|| dp.clone())), 0);
    }
    if !dirent::is_live(dp.id()) {
        return (None, 0);
    }

    let id = dirent::checkout(dp.id(), Some(name));
    if dirent::is_live(id) {
        return (Some(Dirent::from_id(id)), 0);
    }

    let needed = (name.encode_utf16().count() + format::CHAR_LONG_NAME - 1) / format::CHAR_LONG_NAME + 1;
    let dev = dp.dev();
    let mut off = 0u32;
    let mut poff = None;
    let mut dp_data = dp.lock();
    loop {
        match format::enext(dev, &mut dp_data, off) {
            Ok(NextEntry::EndOfDir) | Err(_) => break,
            Ok(NextEntry::Empty { count }) => {
                if poff.is_none() && count as usize >= needed {
                    poff = Some(off);
                }
                off += count * format::ENTRY_SIZE;
            }
            Ok(NextEntry::Live { count, name: found, attr, first_clus, file_size }) => {
                if found == name {
                    drop(dp_data);
                    dirent::set_live(id, dev, dp.id(), off);
                    let mut data = dirent::lock(id);
                    data.filename = found;
                    data.attr = attr;
                    data.first_clus = first_clus;
                    data.file_size = file_size;
                    data.cur_clus = first_clus;
                    data.clus_cnt = 0;
                    drop(data);
                    return (Some(Dirent::from_id(id)), off);
                }
                off += count * format::ENTRY_SIZE;
            }
        }
    }
    drop(dp_data);
    // Not found: the scratch slot checked out above goes back to the pool untouched.
    drop(Dirent::from_id(id));
    (None, poff.unwrap_or(off))
}

/// Creates `name` under `dp` with `attr`, or returns the existing entry if one is already
/// present. For a new directory, also writes its `.`/`..` slots and allocates its first cluster.
/// Mirrors `ealloc`.
pub fn ealloc(dp: &Dirent, name: &str, attr: Attr) -> FsResult<Dirent> {
    if !dirent::is_live(dp.id()) {
        return Err(FsError::NotFound);
    }
    if !dp.lock().attr.contains(Attr::DIRECTORY) {
        return Err(FsError::NotADirectory);
    }

    let formatted = format::formatname(name).ok_or(FsError::InvalidName)?;
    let (existing, off) = dirlookup(dp, &formatted);
    if let Some(existing) = existing {
        return Ok(existing);
    }

    let dev = dp.dev();
    let dp_first_clus = dp.lock().first_clus;
    let is_dir = attr.contains(Attr::DIRECTORY);
    let full_attr = if is_dir {
        attr | Attr::DIRECTORY
    } else {
        attr | Attr::ARCHIVE
    };

    let id = dirent::checkout(dp.id(), Some(&formatted));
    dirent::set_live(id, dev, dp.id(), off);
    {
        let mut data = dirent::lock(id);
        data.filename = formatted.clone();
        data.attr = full_attr;
        data.file_size = 0;
        data.first_clus = 0;
        data.cur_clus = 0;
        data.clus_cnt = 0;
        data.off = off;
        data.dirty = false;
    }

    let child_first_clus = if is_dir {
        let clus = super::alloc_clus(dev)?;
        let mut data = dirent::lock(id);
        data.first_clus = clus;
        data.cur_clus = clus;
        format::emake(&mut data, dev, &formatted, full_attr, clus, 0, 0)?;
        format::emake(&mut data, dev, &formatted, full_attr, dp_first_clus, 0, 32)?;
        clus
    } else {
        0
    };

    {
        let mut pdata = dp.lock();
        format::emake(&mut pdata, dev, &formatted, full_attr, child_first_clus, 0, off)?;
    }

    Ok(Dirent::from_id(id))
}

/// Blanks `entry`'s on-disk short/long-name slots and marks it removed in the cache; the
/// clusters themselves are reclaimed later, by `etrunc`, once the last handle drops. Caller
/// holds no other lock; `entry` and its parent are locked internally. Mirrors `eremove`.
pub fn eremove(entry: &Dirent) -> FsResult<()> {
    if entry.is_removed() || !dirent::is_live(entry.id()) {
        return Ok(());
    }
    let parent = entry.parent().ok_or(FsError::NotFound)?;
    let dev = entry.dev();

    let mut off = entry.lock().off;
    let mut pdata = parent.lock();
    let mut at = reloc_clus(dev, pdata.first_clus, &mut pdata.cur_clus, &mut pdata.clus_cnt, off, false)?;
    let mut entcnt_buf = [0u8; 1];
    rw_clus(dev, pdata.cur_clus, false, Addr::Kernel(entcnt_buf.as_mut_ptr()), at, 1)?;
    let entcnt = (entcnt_buf[0] & !format::LAST_LONG_ENTRY) as u32;
    let flag = [format::EMPTY_ENTRY];
    for _ in 0..=entcnt {
        rw_clus(dev, pdata.cur_clus, true, Addr::Kernel(flag.as_ptr() as *mut u8), at, 1)?;
        off += format::ENTRY_SIZE;
        at = reloc_clus(dev, pdata.first_clus, &mut pdata.cur_clus, &mut pdata.clus_cnt, off, false)?;
    }
    drop(pdata);
    entry.mark_removed();
    Ok(())
}

/// Copies up to `n` bytes starting at file offset `off` to `dst`, clamped to the file's size.
/// Mirrors `eread`.
pub fn eread(entry: &Dirent, dst: Addr, off: u32, n: u32) -> FsResult<u32> {
    let dev = entry.dev();
    let mut data = entry.lock();
    if data.attr.contains(Attr::DIRECTORY) {
        return Err(FsError::IsADirectory);
    }
    if off > data.file_size {
        return Ok(0);
    }
    let n = n.min(data.file_size - off);
    let first_clus = data.first_clus;
    let byts_per_clus = super::geo().byts_per_clus;
    let mut tot = 0u32;
    let mut off = off;
    let mut cursor = dst;
    while data.cur_clus < super::FAT32_EOC && tot < n {
        reloc_clus(dev, first_clus, &mut data.cur_clus, &mut data.clus_cnt, off, false)?;
        let mut m = byts_per_clus - off % byts_per_clus;
        if n - tot < m {
            m = n - tot;
        }
        let got = rw_clus(dev, data.cur_clus, false, cursor, off % byts_per_clus, m)?;
        if got != m {
            break;
        }
        tot += m;
        off += m;
        cursor = super::advance(cursor, m);
    }
    Ok(tot)
}

/// Copies `n` bytes from `src` to file offset `off`, growing the file (and allocating its first
/// cluster if it has none yet) as needed. Mirrors `ewrite`.
pub fn ewrite(entry: &Dirent, src: Addr, off: u32, n: u32) -> FsResult<u32> {
    let dev = entry.dev();
    let mut data = entry.lock();
    if off > data.file_size {
        return Err(FsError::BadAddress);
    }
    if data.attr.contains(Attr::READ_ONLY) {
        return Err(FsError::ReadOnly);
    }
    if (off as u64) + (n as u64) > 0xffff_ffff {
        return Err(FsError::NoSpace);
    }
    if data.first_clus == 0 {
        let clus = super::alloc_clus(dev)?;
        data.first_clus = clus;
        data.cur_clus = clus;
        data.clus_cnt = 0;
        data.dirty = true;
    }
    let first_clus = data.first_clus;
    let byts_per_clus = super::geo().byts_per_clus;
    let mut tot = 0u32;
    let mut off = off;
    let mut cursor = src;
    while tot < n {
        reloc_clus(dev, first_clus, &mut data.cur_clus, &mut data.clus_cnt, off, true)?;
        let mut m = byts_per_clus - off % byts_per_clus;
        if n - tot < m {
            m = n - tot;
        }
        let wrote = rw_clus(dev, data.cur_clus, true, cursor, off % byts_per_clus, m)?;
        if wrote != m {
            break;
        }
        tot += m;
        off += m;
        cursor = super::advance(cursor, m);
    }
    if tot > 0 && off > data.file_size {
        data.file_size = off;
        data.dirty = true;
    }
    Ok(tot)
}
