//! The host allocator seam.
//!
//! The tracking layer never carves memory itself; it asks a [`HostAlloc`]
//! for zero-initialized blocks and hands them back on free. Production use
//! is [`LibcAlloc`]; the seam exists so the exhaustion path is testable
//! without actually running the process out of memory.

use std::ffi::c_void;

pub trait HostAlloc {
    /// Acquire `size` zero-initialized bytes. Returns null on exhaustion --
    /// the host allocator reports failure by value, it never aborts.
    fn acquire_zeroed(&self, size: usize) -> *mut u8;

    /// Release a block previously returned by [`HostAlloc::acquire_zeroed`].
    ///
    /// # Safety
    ///
    /// `ptr` must have come from `acquire_zeroed` on this same allocator and
    /// must not be released twice.
    unsafe fn release(&self, ptr: *mut u8);
}

/// The C library allocator.
pub struct LibcAlloc;

impl HostAlloc for LibcAlloc {
    fn acquire_zeroed(&self, size: usize) -> *mut u8 {
        // A zero-size request still gets a unique, freeable block.
        let size = size.max(1);
        // SAFETY: `calloc` with any size is sound; the result is either null
        //         or a zeroed block of at least `size` bytes that we own.
        unsafe { libc::calloc(1, size) as *mut u8 }
    }

    unsafe fn release(&self, ptr: *mut u8) {
        // SAFETY: Caller guarantees `ptr` came from our `calloc` and is
        //         released exactly once.
        unsafe { libc::free(ptr as *mut c_void) }
    }
}
