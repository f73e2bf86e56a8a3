//! Long-term, sleep-on-contention locks, used by the buffer cache (per-buffer) and the
//! directory-entry cache (per-entry). Adapted from the teacher's `sleeplock.rs`: the wait
//! channel is still the lock's own address, but the release-then-sleep step goes through
//! `collab::get()` instead of a global `Process`, since the scheduler is out of scope here.

use crate::collab;
use crate::spinlock::Mutex;
use core::{
    cell::UnsafeCell,
    ops::{Deref, DerefMut},
};

pub struct SleepLock<T> {
    lk: Mutex<bool>, // true while locked
    data: UnsafeCell<T>,
    name: &'static str,
}

unsafe impl<T> Sync for SleepLock<T> {}
unsafe impl<T> Send for SleepLock<T> {}

pub struct SleepLockGuard<'a, T> {
    sleep_lock: &'a SleepLock<T>,
}

impl<T> SleepLock<T> {
    pub const fn new(data: T, name: &'static str) -> Self {
        Self {
            lk: Mutex::new(false, name),
            data: UnsafeCell::new(data),
            name,
        }
    }

    pub fn lock(&self) -> SleepLockGuard<'_, T> {
        let mut locked = self.lk.lock();
        while *locked {
            drop(locked);
            collab::get().sleep(self.chan());
            locked = self.lk.lock();
        }
        *locked = true;
        SleepLockGuard { sleep_lock: self }
    }

    /// `true` if some task currently holds this lock (identity of the holder is not tracked;
    /// the `Collab` boundary doesn't expose a task id, see DESIGN.md).
    pub fn holding(&self) -> bool {
        *self.lk.lock()
    }

    fn chan(&self) -> usize {
        self as *const _ as usize
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl<'a, T> SleepLockGuard<'a, T> {
    pub fn holding(&self) -> bool {
        self.sleep_lock.holding()
    }
}

impl<'a, T> Deref for SleepLockGuard<'a, T> {
    type Target = T;
    fn deref(&self) -> &T {
        unsafe { &*self.sleep_lock.data.get() }
    }
}

impl<'a, T> DerefMut for SleepLockGuard<'a, T> {
    fn deref_mut(&mut self) -> &mut T {
        unsafe { &mut *self.sleep_lock.data.get() }
    }
}

impl<'a, T> Drop for SleepLockGuard<'a, T> {
    fn drop(&mut self) {
        let mut locked = self.sleep_lock.lk.lock();
        *locked = false;
        drop(locked);
        collab::get().wakeup(self.sleep_lock.chan());
    }
}
