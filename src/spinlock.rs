//! Spinning mutex, named like the teacher's own `spinlock::Mutex` (disables nothing on its own —
//! the real disable-preemption behavior is a property of whatever collaborator owns the CPU;
//! see spec §5). Built on the `spin` crate rather than hand-rolled atomics, following the same
//! crate other bare-metal kernels in this corpus (e.g. `rust-os`) reach for.

use core::cell::UnsafeCell;
use core::ops::{Deref, DerefMut};

pub struct Mutex<T> {
    name: &'static str,
    lock: spin::Mutex<()>,
    data: UnsafeCell<T>,
}

pub struct MutexGuard<'a, T> {
    name: &'static str,
    mutex: &'a Mutex<T>,
    _guard: spin::MutexGuard<'a, ()>,
}

impl<T> Mutex<T> {
    pub const fn new(data: T, name: &'static str) -> Self {
        Self {
            name,
            lock: spin::Mutex::new(()),
            data: UnsafeCell::new(data),
        }
    }

    pub fn lock(&self) -> MutexGuard<'_, T> {
        MutexGuard {
            name: self.name,
            mutex: self,
            _guard: self.lock.lock(),
        }
    }

    /// Bypasses the lock entirely.
    ///
    /// # Safety
    /// The caller must be certain no other task can be holding this lock. Used by the panic
    /// handler, which has to keep printing even if some task died mid-print while holding the
    /// console lock.
    pub unsafe fn get_mut(&self) -> &mut T {
        &mut *self.data.get()
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

unsafe impl<T: Send> Sync for Mutex<T> {}

impl<'a, T> Deref for MutexGuard<'a, T> {
    type Target = T;
    fn deref(&self) -> &T {
        unsafe { &*self.mutex.data.get() }
    }
}

impl<'a, T> DerefMut for MutexGuard<'a, T> {
    fn deref_mut(&mut self) -> &mut T {
        unsafe { &mut *self.mutex.data.get() }
    }
}

impl<'a, T> MutexGuard<'a, T> {
    pub fn name(&self) -> &'static str {
        self.name
    }
}
