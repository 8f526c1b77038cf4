//! Process-wide tracking singleton.
//!
//! The library core ([`SafeAlloc`]) is an ordinary value; this module is the
//! one place that pins a single instance for the whole process, lazily
//! created on first use and living until exit. A mutex provides the mutual
//! exclusion the core itself deliberately does not carry.
//!
//! [`allocate`] is the thin fail-fast wrapper: on a [`Fatal`] the tracked
//! set has already been rolled back, the diagnostic has been emitted, and
//! the process terminates. Callers that want to decide for themselves use
//! [`try_allocate`].

use std::{process, ptr::NonNull, sync::Mutex};

use once_cell::sync::Lazy;

use crate::{
    facade::{Fatal, SafeAlloc},
    host::LibcAlloc,
    registry::{ProbeTable, Tracked},
};

static TRACKER: Lazy<Mutex<SafeAlloc<ProbeTable, LibcAlloc>>> =
    Lazy::new(|| Mutex::new(SafeAlloc::with_table()));

fn with<T>(f: impl FnOnce(&mut SafeAlloc<ProbeTable, LibcAlloc>) -> T) -> T {
    // A panic elsewhere must not take the allocator down with it; the
    // tracked set is still consistent, so recover the guard.
    let mut tracker = TRACKER.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
    f(&mut tracker)
}

/// [`SafeAlloc::allocate`] on the process tracker, terminating the process
/// on any [`Fatal`]. Every tracked block has been released by then.
pub fn allocate(count: usize, elem_size: usize) -> NonNull<u8> {
    match try_allocate(count, elem_size) {
        Ok(ptr) => ptr,
        Err(_) => process::exit(1),
    }
}

/// [`SafeAlloc::allocate`] on the process tracker, failure by value.
pub fn try_allocate(count: usize, elem_size: usize) -> Result<NonNull<u8>, Fatal> {
    with(|tracker| tracker.allocate(count, elem_size))
}

/// [`SafeAlloc::free_one`] on the process tracker.
pub fn free_one(ptr: *mut u8) {
    with(|tracker| tracker.free_one(ptr));
}

/// [`SafeAlloc::free_all`] on the process tracker.
pub fn free_all() {
    with(|tracker| tracker.free_all());
}

/// [`SafeAlloc::free_many`] on the process tracker.
pub fn free_many(ptrs: &[*mut u8]) {
    with(|tracker| tracker.free_many(ptrs));
}

/// [`SafeAlloc::usage`] on the process tracker.
pub fn usage() -> usize {
    with(|tracker| tracker.usage())
}

/// [`SafeAlloc::count`] on the process tracker.
pub fn count() -> usize {
    with(|tracker| tracker.count())
}

/// [`SafeAlloc::adopt`] on the process tracker.
pub fn adopt(ptr: *mut u8, size: usize) -> Option<NonNull<u8>> {
    with(|tracker| tracker.adopt(ptr, size))
}

/// [`SafeAlloc::snapshot`] on the process tracker.
pub fn snapshot() -> Vec<Tracked> {
    with(|tracker| tracker.snapshot())
}
