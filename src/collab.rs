//! The boundary to everything this crate treats as an external collaborator: the physical
//! page allocator, the task scheduler's sleep/wakeup primitive, the current task's working
//! directory, and user/kernel address-space copies.
//!
//! The teacher crate reaches these through free functions on global singletons (`CPUS`,
//! `PROCS`, `CopyInOut`). Those singletons live in the scheduler and virtual-memory modules,
//! which are out of scope here (see spec §2), so this crate collapses them into a single
//! object-safe trait registered once at startup, in the spirit of the teacher's own
//! `sync::OnceLock`-guarded statics.

/// Opaque handle to a directory entry, interpreted by `fat::ecache` as a pool index.
/// Kept here (rather than in `fat`) so `Collab::cwd` doesn't need to depend on the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntryId(pub usize);

/// A copy destination or source that may live in the current task's user address space or in
/// kernel memory. Mirrors the teacher's `VirtAddr` (`proc::CopyInOut`).
#[derive(Debug, Clone, Copy)]
pub enum Addr {
    Kernel(*mut u8),
    User(usize),
}

/// Capabilities this crate consumes from the rest of the kernel (spec §6).
pub trait Collab: Sync {
    /// Returns a zeroed, page-aligned 4 KiB page, or `None` on exhaustion. Backs the virtqueue's
    /// three DMA pages (`kalloc()`).
    fn alloc_page(&self) -> Option<*mut u8>;

    /// Returns a page obtained from `alloc_page` back to the allocator.
    fn free_page(&self, page: *mut u8);

    /// Suspends the calling task until a matching `wakeup(chan)`. Callers drop any spinlock
    /// guard before calling this and reacquire it afterwards, then recheck their condition.
    fn sleep(&self, chan: usize);

    /// Wakes every task sleeping on `chan`. Safe to call from interrupt context.
    fn wakeup(&self, chan: usize);

    /// Copies `src` to a user-or-kernel destination.
    fn either_copyout(&self, dst: Addr, src: &[u8]) -> Result<(), ()>;

    /// Copies a user-or-kernel source into `dst`.
    fn either_copyin(&self, dst: &mut [u8], src: Addr) -> Result<(), ()>;

    /// The current task's working directory.
    fn cwd(&self) -> EntryId;

    /// Emits one byte of diagnostic output (backs the `print!`/`println!` macros).
    fn console_putc(&self, c: u8);
}

static COLLAB: spin::Once<&'static dyn Collab> = spin::Once::new();

/// Registers the collaborator implementation. Must be called exactly once, before any other
/// function in this crate runs.
pub fn set(collab: &'static dyn Collab) {
    COLLAB.call_once(|| collab);
}

/// Returns the registered collaborator.
///
/// # Panics
/// Panics if `set` has not been called yet.
pub fn get() -> &'static dyn Collab {
    *COLLAB
        .get()
        .expect("collab::get: no Collab registered, call collab::set first")
}
