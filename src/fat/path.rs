//! Path parsing and resolution: splitting a `/`-separated path into components and walking
//! them down from the root or the caller's working directory. Grounded on `kernel/fat32.c`'s
//! `skipelem`/`lookup_path`/`ename`/`enameparent`.

use super::dirent::{Attr, Dirent};
use super::dirlookup;
use crate::collab;
use crate::error::{FsError, FsResult};
use alloc::string::{String, ToString};

/// Splits the first path component off `path`, returning it along with the remainder. Skips
/// leading and trailing runs of `/`. Mirrors `skipelem`.
fn skipelem(path: &str) -> Option<(&str, &str)> {
    let path = path.trim_start_matches('/');
    if path.is_empty() {
        return None;
    }
    let end = path.find('/').unwrap_or(path.len());
    let (elem, rest) = path.split_at(end);
    Some((elem, rest.trim_start_matches('/')))
}

/// Walks `path` component by component from the root (if absolute) or the caller's current
/// directory (if relative). When `want_parent` is set, stops one component short and returns
/// that last component's name alongside its parent directory; otherwise resolves the whole path
/// and returns the final entry. Mirrors `lookup_path`.
fn lookup_path(path: &str, want_parent: bool) -> FsResult<(Dirent, String)> {
    let mut dp = if path.starts_with('/') {
        Dirent::root()
    } else {
        Dirent::from_cwd(collab::get().cwd())
    };

    let mut rest = path;
    loop {
        let Some((elem, next_rest)) = skipelem(rest) else {
            if want_parent {
                return Err(FsError::InvalidName);
            }
            return Ok((dp, String::new()));
        };

        if !dp.lock().attr.contains(Attr::DIRECTORY) {
            return Err(FsError::NotADirectory);
        }

        if want_parent && next_rest.is_empty() {
            return Ok((dp, elem.to_string()));
        }

        let (next, _off) = dirlookup(&dp, elem);
        let next = next.ok_or(FsError::NotFound)?;
        dp = next;
        rest = next_rest;
    }
}

/// Resolves `path` to the entry it names. Mirrors `ename`.
pub fn ename(path: &str) -> FsResult<Dirent> {
    lookup_path(path, false).map(|(entry, _)| entry)
}

/// Resolves `path` to its parent directory and final component name, without requiring the
/// final component to exist. Mirrors `enameparent`.
pub fn enameparent(path: &str) -> FsResult<(Dirent, String)> {
    lookup_path(path, true)
}
