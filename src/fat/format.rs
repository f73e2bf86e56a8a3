//! On-disk directory entry layout: the 32-byte short-name and long-name records, and the
//! encode/decode routines between those records and a live entry's name/attributes. Grounded
//! on `kernel/fat32.c`'s `short_name_entry_t`/`long_name_entry_t`/`formatname`/
//! `generate_shortname`/`cal_checksum`/`read_entry_name`/`read_entry_info`/`emake`.
//!
//! Entries are encoded straight into byte arrays rather than through `zerocopy`'s derive macros:
//! the short/long-name records mix 8/16/32-bit fields at odd offsets, and hand-rolled
//! little-endian slicing (the same approach `fat::mount` already takes for the BPB) reads more
//! plainly than a `#[repr(C, packed)]` struct would.

use super::dirent::{Attr, Data};
use super::{reloc_clus, rw_clus};
use crate::collab::Addr;
use crate::error::FsResult;
use alloc::string::String;
use alloc::vec::Vec;

pub const ENTRY_SIZE: u32 = 32;
pub const CHAR_SHORT_NAME: usize = 11;
pub const CHAR_LONG_NAME: usize = 13;
pub(super) const LAST_LONG_ENTRY: u8 = 0x40;
pub const EMPTY_ENTRY: u8 = 0xe5;
const END_OF_ENTRY: u8 = 0x00;
const ATTR_LONG_NAME: u8 = 0x0f;

/// Decoded view of one 32-byte slot, read directly out of a sector buffer.
enum RawEntry {
    Short {
        name: [u8; CHAR_SHORT_NAME],
        attr: u8,
        fst_clus_hi: u16,
        fst_clus_lo: u16,
        file_size: u32,
    },
    Long {
        order: u8,
        name1: [u16; 5],
        name2: [u16; 6],
        name3: [u16; 2],
    },
    Empty,
    EndOfDir,
}

fn decode(b: &[u8; 32]) -> RawEntry {
    let order = b[0];
    if order == EMPTY_ENTRY {
        return RawEntry::Empty;
    }
    if order == END_OF_ENTRY {
        return RawEntry::EndOfDir;
    }
    let attr = b[11];
    if attr == ATTR_LONG_NAME {
        let u16_at = |i: usize| u16::from_le_bytes([b[i], b[i + 1]]);
        RawEntry::Long {
            order,
            name1: [u16_at(1), u16_at(3), u16_at(5), u16_at(7), u16_at(9)],
            name2: [
                u16_at(14),
                u16_at(16),
                u16_at(18),
                u16_at(20),
                u16_at(22),
                u16_at(24),
            ],
            name3: [u16_at(28), u16_at(30)],
        }
    } else {
        let mut name = [0u8; CHAR_SHORT_NAME];
        name.copy_from_slice(&b[0..CHAR_SHORT_NAME]);
        RawEntry::Short {
            name,
            attr,
            fst_clus_hi: u16::from_le_bytes([b[20], b[21]]),
            fst_clus_lo: u16::from_le_bytes([b[26], b[27]]),
            file_size: u32::from_le_bytes([b[28], b[29], b[30], b[31]]),
        }
    }
}

/// Trims leading spaces/dots and rejects illegal characters. Returns the trimmed name, or
/// `None` if a disallowed character was found. Mirrors `formatname`.
pub fn formatname(name: &str) -> Option<String> {
    const ILLEGAL: &[char] = &['"', '*', '/', ':', '<', '>', '?', '\\', '|'];
    let trimmed = name.trim_start_matches(|c| c == ' ' || c == '.');
    for c in trimmed.chars() {
        if (c as u32) < 0x20 || ILLEGAL.contains(&c) {
            return None;
        }
    }
    let trimmed = trimmed.trim_end_matches(' ');
    if trimmed.is_empty() {
        return None;
    }
    Some(String::from(trimmed))
}

/// Derives an 8.3 short name from a long file name. Mirrors `generate_shortname`: truncates the
/// base to 8 characters, keeps the last extension (up to 3 characters), uppercases, and
/// replaces characters illegal in a short name entry with `_`.
fn generate_shortname(name: &str) -> [u8; CHAR_SHORT_NAME] {
    const ILLEGAL: &[char] = &['+', ',', ';', '=', '[', ']'];
    let mut out = [b' '; CHAR_SHORT_NAME];
    let dot = name.rfind('.');
    let (base, ext) = match dot {
        Some(pos) if pos > 0 => (&name[..pos], &name[pos + 1..]),
        _ => (name, ""),
    };
    let mut i = 0;
    for c in base.chars() {
        if i == 8 {
            break;
        }
        if c == ' ' {
            continue;
        }
        out[i] = encode_sfn_char(c, ILLEGAL);
        i += 1;
    }
    let mut j = 0;
    for c in ext.chars() {
        if j == 3 {
            break;
        }
        if c == ' ' {
            continue;
        }
        out[8 + j] = encode_sfn_char(c, ILLEGAL);
        j += 1;
    }
    out
}

fn encode_sfn_char(c: char, illegal: &[char]) -> u8 {
    if c.is_ascii_lowercase() {
        (c as u8) - b'a' + b'A'
    } else if illegal.contains(&c) || !c.is_ascii() {
        b'_'
    } else {
        c as u8
    }
}

/// Mirrors `cal_checksum`: an 8-bit rotate-and-add over the 11-byte short name, used to tie
/// long-name entries to the short-name entry that follows them.
fn cal_checksum(shortname: &[u8; CHAR_SHORT_NAME]) -> u8 {
    let mut sum: u8 = 0;
    for &b in shortname.iter() {
        sum = (if sum & 1 != 0 { 0x80 } else { 0 })
            .wrapping_add(sum >> 1)
            .wrapping_add(b);
    }
    sum
}

/// Reassembles a file name fragment out of one long-name entry's three name fields. Mirrors
/// `read_entry_name`'s long-entry branch; UTF-16 code points that don't decode cleanly become
/// `\u{FFFD}`.
fn long_entry_fragment(name1: [u16; 5], name2: [u16; 6], name3: [u16; 2]) -> String {
    let mut units = Vec::with_capacity(13);
    units.extend_from_slice(&name1);
    units.extend_from_slice(&name2);
    units.extend_from_slice(&name3);
    let mut s = String::new();
    for u in units {
        if u == 0x0000 || u == 0xffff {
            break;
        }
        s.push(char::from_u32(u as u32).unwrap_or('\u{FFFD}'));
    }
    s
}

/// Reconstructs `.`/`..` and other short-name-only entries' display name. Mirrors
/// `read_entry_name`'s short-entry branch.
fn short_entry_name(name: &[u8; CHAR_SHORT_NAME]) -> String {
    let mut s = String::new();
    let mut i = 0;
    while i < 8 && name[i] != b' ' {
        s.push(name[i] as char);
        i += 1;
    }
    if name[8] != b' ' {
        s.push('.');
    }
    for j in 8..CHAR_SHORT_NAME {
        if name[j] == b' ' {
            break;
        }
        s.push(name[j] as char);
    }
    s
}

fn first_clus(hi: u16, lo: u16) -> u32 {
    ((hi as u32) << 16) | lo as u32
}

/// Encodes one 32-byte `.`/`..`/short-name slot.
fn encode_short(name: &[u8; CHAR_SHORT_NAME], attr: u8, clus: u32, file_size: u32) -> [u8; 32] {
    let mut b = [0u8; 32];
    b[0..CHAR_SHORT_NAME].copy_from_slice(name);
    b[11] = attr;
    b[20..22].copy_from_slice(&((clus >> 16) as u16).to_le_bytes());
    b[26..28].copy_from_slice(&((clus & 0xffff) as u16).to_le_bytes());
    b[28..32].copy_from_slice(&file_size.to_le_bytes());
    b
}

/// Encodes one 32-byte long-name slot for `order`-th chunk (1-based, counted from the end) of
/// `chunk`, a UTF-16 fragment already padded to 13 units with `0x0000` then `0xffff`.
fn encode_long(order: u8, last: bool, checksum: u8, chunk: &[u16; 13]) -> [u8; 32] {
    let mut b = [0u8; 32];
    b[0] = if last { order | LAST_LONG_ENTRY } else { order };
    let put16 = |b: &mut [u8; 32], i: usize, v: u16| b[i..i + 2].copy_from_slice(&v.to_le_bytes());
    for (k, &u) in chunk[0..5].iter().enumerate() {
        put16(&mut b, 1 + k * 2, u);
    }
    b[11] = ATTR_LONG_NAME;
    b[13] = checksum;
    for (k, &u) in chunk[5..11].iter().enumerate() {
        put16(&mut b, 14 + k * 2, u);
    }
    for (k, &u) in chunk[11..13].iter().enumerate() {
        put16(&mut b, 28 + k * 2, u);
    }
    b
}

fn name_chunk(name: &str, chunk_index: usize) -> [u16; 13] {
    let units: Vec<u16> = name.encode_utf16().collect();
    let mut out = [0xffffu16; 13];
    let start = chunk_index * CHAR_LONG_NAME;
    let mut ended = false;
    for i in 0..CHAR_LONG_NAME {
        let pos = start + i;
        if ended {
            out[i] = 0xffff;
        } else if pos < units.len() {
            out[i] = units[pos];
        } else {
            out[i] = 0x0000;
            ended = true;
        }
    }
    out
}

/// Writes the on-disk record(s) for one directory entry at byte offset `off` in `dp`. `off <=
/// 32` selects the `.`/`..` special-cases emitted by `ealloc` when creating a new directory;
/// anything larger writes the long-name chain followed by the short-name entry. Caller must
/// hold `dp`'s content lock. Mirrors `emake`.
pub(super) fn emake(dp: &mut Data, dp_dev: u32, ep_name: &str, ep_attr: Attr, ep_first_clus: u32, ep_file_size: u32, off: u32) -> FsResult<()> {
    if off % ENTRY_SIZE != 0 {
        panic!("emake: not aligned");
    }
    if off <= 32 {
        let name: &[u8; CHAR_SHORT_NAME] = if off == 0 {
            b".          "
        } else {
            b"..         "
        };
        let rec = encode_short(name, Attr::DIRECTORY.bits(), ep_first_clus, 0);
        let at = reloc_clus(dp_dev, dp.first_clus, &mut dp.cur_clus, &mut dp.clus_cnt, off, true)?;
        rw_clus(dp_dev, dp.cur_clus, true, Addr::Kernel(rec.as_ptr() as *mut u8), at, 32)?;
        return Ok(());
    }

    let shortname = generate_shortname(ep_name);
    let checksum = cal_checksum(&shortname);
    let entcnt = (ep_name.encode_utf16().count() + CHAR_LONG_NAME - 1) / CHAR_LONG_NAME;
    let mut cursor = off;
    for i in (1..=entcnt).rev() {
        let chunk = name_chunk(ep_name, i - 1);
        let rec = encode_long(i as u8, i == entcnt, checksum, &chunk);
        let at = reloc_clus(dp_dev, dp.first_clus, &mut dp.cur_clus, &mut dp.clus_cnt, cursor, true)?;
        rw_clus(dp_dev, dp.cur_clus, true, Addr::Kernel(rec.as_ptr() as *mut u8), at, 32)?;
        cursor += ENTRY_SIZE;
    }
    let rec = encode_short(&shortname, ep_attr.bits(), ep_first_clus, ep_file_size);
    let at = reloc_clus(dp_dev, dp.first_clus, &mut dp.cur_clus, &mut dp.clus_cnt, cursor, true)?;
    rw_clus(dp_dev, dp.cur_clus, true, Addr::Kernel(rec.as_ptr() as *mut u8), at, 32)?;
    Ok(())
}

/// Outcome of `enext`. Mirrors the `-1`/`0`/`1` return of the original plus its `*count`
/// out-parameter, folded into one enum.
pub enum NextEntry {
    /// Hit the unused tail of the directory.
    EndOfDir,
    /// `count` contiguous empty slots starting at the scanned offset.
    Empty { count: u32 },
    /// A live file occupying `count` 32-byte slots (long-name chain plus short-name entry),
    /// with its name and short-entry fields already decoded into `name`/`attr`/`first_clus`/
    /// `file_size`.
    Live {
        count: u32,
        name: String,
        attr: Attr,
        first_clus: u32,
        file_size: u32,
    },
}

/// Reads the entry (or run of empty slots) starting at byte offset `off` in `dp`. Caller must
/// hold `dp`'s content lock. Mirrors `enext`.
pub fn enext(dp_dev: u32, dp: &mut Data, mut off: u32) -> FsResult<NextEntry> {
    let dir_first_clus = dp.first_clus;
    let mut empty_run = 0u32;
    let mut longname_parts: Vec<(u8, String)> = Vec::new();
    loop {
        let at = match reloc_clus(dp_dev, dir_first_clus, &mut dp.cur_clus, &mut dp.clus_cnt, off, false) {
            Ok(at) => at,
            Err(_) => return Ok(NextEntry::EndOfDir),
        };
        let mut raw = [0u8; 32];
        rw_clus(dp_dev, dp.cur_clus, false, Addr::Kernel(raw.as_mut_ptr()), at, 32)?;
        match decode(&raw) {
            RawEntry::EndOfDir => return Ok(NextEntry::EndOfDir),
            RawEntry::Empty => {
                empty_run += 1;
                off += ENTRY_SIZE;
            }
            RawEntry::Long { order, name1, name2, name3 } => {
                if empty_run > 0 {
                    return Ok(NextEntry::Empty { count: empty_run });
                }
                let lcnt = order & !LAST_LONG_ENTRY;
                longname_parts.push((lcnt, long_entry_fragment(name1, name2, name3)));
                off += ENTRY_SIZE;
            }
            RawEntry::Short { name, attr, fst_clus_hi, fst_clus_lo, file_size } => {
                if empty_run > 0 {
                    return Ok(NextEntry::Empty { count: empty_run });
                }
                off += ENTRY_SIZE;
                let long_cnt = longname_parts.len() as u32;
                let display_name = if longname_parts.is_empty() {
                    short_entry_name(&name)
                } else {
                    longname_parts.sort_by(|a, b| a.0.cmp(&b.0));
                    longname_parts.into_iter().map(|(_, s)| s).collect()
                };
                return Ok(NextEntry::Live {
                    count: long_cnt + 1,
                    name: display_name,
                    attr: Attr::from_bits_truncate(attr),
                    first_clus: first_clus(fst_clus_hi, fst_clus_lo),
                    file_size,
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formatname_trims_and_rejects_illegal_chars() {
        assert_eq!(formatname("  hello.txt  ").as_deref(), Some("hello.txt"));
        assert_eq!(formatname("..bar"), Some(String::from("bar")));
        assert_eq!(formatname("a?b"), None);
        assert_eq!(formatname("   "), None);
    }

    #[test]
    fn generate_shortname_uppercases_and_keeps_extension() {
        assert_eq!(&generate_shortname("readme.txt"), b"README  TXT");
        assert_eq!(&generate_shortname("thisisaverylongname.text"), b"THISISAVTEX");
        assert_eq!(&generate_shortname("noext"), b"NOEXT      ");
    }

    #[test]
    fn checksum_is_stable_for_same_shortname() {
        let a = generate_shortname("readme.txt");
        let b = generate_shortname("readme.txt");
        assert_eq!(cal_checksum(&a), cal_checksum(&b));
    }

    #[test]
    fn long_entry_roundtrips_through_name_chunk_and_fragment() {
        let name = "a long filename.txt";
        let chunk0 = name_chunk(name, 0);
        // first 13 UTF-16 units of the name, not null/0xffff padded since the name is longer
        let expected: Vec<u16> = name.encode_utf16().take(13).collect();
        assert_eq!(&chunk0[..expected.len()], expected.as_slice());
    }
}
