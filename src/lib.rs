#![cfg_attr(not(test), no_std)]
extern crate alloc;

#[macro_use]
pub mod printf;

pub mod bcache;
pub mod blockdev;
pub mod collab;
pub mod error;
pub mod fat;
pub mod param;
pub mod sleeplock;
pub mod spinlock;
pub mod stat;
pub mod virtio_disk;

#[cfg(test)]
pub mod test_support;
