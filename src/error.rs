//! Error type for the storage stack. Kept small and enumerable, in the teacher's style of
//! returning `Result<T, ()>`-at-the-syscall-boundary but with named variants internally so a
//! caller two layers up can still tell what went wrong.

use core::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FsError {
    /// Sector 0 didn't carry the `FAT32` BPB signature, or `SECSZ` disagreed with `byts_per_sec`.
    NotFat32,
    /// A path component does not exist.
    NotFound,
    /// A path component that should be a directory isn't (or vice versa).
    NotADirectory,
    IsADirectory,
    /// The volume has no free clusters left.
    NoSpace,
    /// Write would extend a file past the FAT32 32-bit size limit, or target is read-only.
    ReadOnly,
    /// A name failed `formatname` validation (illegal character, empty after trimming).
    InvalidName,
    /// `either_copyin`/`either_copyout` rejected the caller-supplied address.
    BadAddress,
}

impl fmt::Display for FsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FsError::NotFat32 => "not a FAT32 volume",
            FsError::NotFound => "no such file or directory",
            FsError::NotADirectory => "not a directory",
            FsError::IsADirectory => "is a directory",
            FsError::NoSpace => "no space left on device",
            FsError::ReadOnly => "read-only file",
            FsError::InvalidName => "invalid file name",
            FsError::BadAddress => "bad address",
        };
        f.write_str(s)
    }
}

pub type FsResult<T> = Result<T, FsError>;
