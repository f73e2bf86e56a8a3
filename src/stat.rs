//! File status, returned by `dirent::Dirent::stat`. Mirrors the teacher's `stat.rs`, minus the
//! `ino`/`nlink` fields FAT32 has no use for (no inode numbers, no hard links).

use alloc::string::String;

#[repr(u16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IType {
    None = 0,
    Dir = 1,
    File = 2,
    Device = 3,
}

impl Default for IType {
    fn default() -> Self {
        IType::None
    }
}

#[derive(Debug, Clone)]
pub struct Stat {
    pub name: String,
    pub kind: IType,
    pub dev: u32,
    pub size: u32,
}
