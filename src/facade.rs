//! The allocation facade: the single surface client code talks to.
//!
//! [`SafeAlloc`] orchestrates the registry and the guard codec over a host
//! allocator. It is an ordinary owned value with an explicit lifecycle --
//! construct one, use it, drop it -- so every test gets its own; the
//! process-wide singleton lives in [`crate::global`].
//!
//! Failure policy: allocation failure is *fatal to the tracked set* (every
//! live block is rolled back before the error is returned) but the library
//! itself never terminates the process. Everything else -- null frees,
//! untracked pointers, guard corruption -- is a diagnostic and a no-op.

use std::{
    error::Error,
    fmt,
    ptr::{self, NonNull},
};

use crate::{
    config,
    fence,
    host::{HostAlloc, LibcAlloc},
    registry::{AllocList, ProbeTable, Registry, Tracked},
};

/// Unrecoverable allocation failure. By the time one of these is returned,
/// every previously tracked block has been released and the registry is
/// empty; the caller decides whether the process survives.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Fatal {
    /// `count * elem_size` (plus guard overhead) does not fit in `usize`.
    Overflow,
    /// The host allocator returned null.
    HostExhausted { requested: usize },
    /// The registry refused the new record.
    TrackingFull,
}

impl fmt::Display for Fatal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Fatal::Overflow => f.write_str("allocation size overflows"),
            Fatal::HostExhausted { requested } => {
                write!(f, "memory allocation of {requested} bytes failed")
            }
            Fatal::TrackingFull => f.write_str("allocation tracking limit reached"),
        }
    }
}

impl Error for Fatal {}

pub struct SafeAlloc<R = ProbeTable, A = LibcAlloc> {
    registry: R,
    host: A,
    fencing: bool,
}

impl SafeAlloc<ProbeTable, LibcAlloc> {
    /// Probe-table tracking over the C library allocator, fencing per the
    /// crate's `fencing` feature.
    pub fn with_table() -> Self {
        Self::new(ProbeTable::new(), LibcAlloc, config::FENCING)
    }
}

impl SafeAlloc<AllocList, LibcAlloc> {
    /// Linked-list tracking over the C library allocator, fencing per the
    /// crate's `fencing` feature.
    pub fn with_list() -> Self {
        Self::new(AllocList::new(), LibcAlloc, config::FENCING)
    }
}

impl<R, A> SafeAlloc<R, A>
where
    R: Registry,
    A: HostAlloc,
{
    pub fn new(registry: R, host: A, fencing: bool) -> Self {
        Self {
            registry,
            host,
            fencing,
        }
    }

    /// Acquire a zero-initialized block of `count * elem_size` bytes, fence
    /// it when fencing is enabled, and track it. Returns the client-usable
    /// (interior) pointer.
    ///
    /// Any failure -- overflow, host exhaustion, registry full -- rolls back
    /// every tracked allocation before returning, so a [`Fatal`] never
    /// leaves a half-consistent tracked set behind.
    pub fn allocate(&mut self, count: usize, elem_size: usize) -> Result<NonNull<u8>, Fatal> {
        let size = match count.checked_mul(elem_size) {
            Some(size) => size,
            None => return Err(self.rollback(Fatal::Overflow)),
        };
        let acquire = if self.fencing {
            match size.checked_add(fence::overhead()) {
                Some(acquire) => acquire,
                None => return Err(self.rollback(Fatal::Overflow)),
            }
        } else {
            size
        };

        let block = self.host.acquire_zeroed(acquire);
        if block.is_null() {
            return Err(self.rollback(Fatal::HostExhausted { requested: acquire }));
        }

        let interior = if self.fencing {
            // SAFETY: `block` is non-null and spans `size + overhead` bytes
            //         that nothing else references yet.
            unsafe { fence::install(block, size) }.expect("block is non-null")
        } else {
            // SAFETY: Nullness checked above.
            unsafe { NonNull::new_unchecked(block) }
        };

        let record = Tracked::new(interior.as_ptr() as usize, block as usize, size);
        if self.registry.insert(record).is_err() {
            // SAFETY: Just acquired above and never tracked, so this is the
            //         only release it will ever see.
            unsafe { self.host.release(block) };
            return Err(self.rollback(Fatal::TrackingFull));
        }
        Ok(interior)
    }

    /// Release every tracked allocation, verifying guards first where
    /// present. Corruption is reported but never blocks the release.
    /// Idempotent: on an empty registry this is a no-op.
    pub fn free_all(&mut self) {
        for record in self.registry.drain() {
            self.release_record(record);
        }
    }

    /// Release the single tracked allocation behind `ptr`. A null pointer
    /// and an untracked pointer each produce a warning and no action; an
    /// untracked block is never blindly handed to the host allocator.
    pub fn free_one(&mut self, ptr: *mut u8) {
        let Some(ptr) = NonNull::new(ptr) else {
            log::warn!("attempt to free a NULL pointer");
            return;
        };
        match self.registry.remove(ptr.as_ptr() as usize) {
            Some(record) => self.release_record(record),
            None => log::warn!(
                "pointer {:#x} is not tracked here and was not freed",
                ptr.as_ptr() as usize
            ),
        }
    }

    /// Free each non-null entry of `ptrs` in order through the
    /// [`SafeAlloc::free_one`] path. The slice's own backing storage belongs
    /// to the caller and is left alone; use [`SafeAlloc::free_many_raw`]
    /// when the pointer list itself is a tracked block.
    pub fn free_many(&mut self, ptrs: &[*mut u8]) {
        for &entry in ptrs {
            if !entry.is_null() {
                self.free_one(entry);
            }
        }
    }

    /// C-shaped batch free: release `count` entries of `list`, then the
    /// list block itself if this facade tracks it. `count == 0` means the
    /// list is null-terminated, not empty.
    ///
    /// An untracked list block is left untouched -- the caller still owns
    /// it.
    ///
    /// # Safety
    ///
    /// `list` must point to `count` consecutive pointers (or, for
    /// `count == 0`, to a null-terminated pointer sequence), each of which
    /// is null or a live client pointer.
    pub unsafe fn free_many_raw(&mut self, list: *mut *mut u8, count: usize) {
        if list.is_null() {
            log::warn!("attempt to free a NULL pointer list");
            return;
        }
        if count == 0 {
            let mut i = 0;
            loop {
                // SAFETY: Caller guarantees entries up to and including the
                //         null terminator are readable.
                let entry = unsafe { *list.add(i) };
                if entry.is_null() {
                    break;
                }
                self.free_one(entry);
                i += 1;
            }
        } else {
            for i in 0..count {
                // SAFETY: Caller guarantees `count` readable entries.
                let entry = unsafe { *list.add(i) };
                if !entry.is_null() {
                    self.free_one(entry);
                }
            }
        }
        if let Some(record) = self.registry.remove(list as usize) {
            self.release_record(record);
        }
    }

    /// The C-style free router: exactly one of `ptr` / `list` may be
    /// provided. Both provided is rejected with a diagnostic and neither
    /// path executes; neither provided is the null-free warning.
    pub fn free(&mut self, ptr: *mut u8, list: Option<&[*mut u8]>) {
        match (NonNull::new(ptr), list) {
            (Some(_), Some(_)) => {
                log::warn!("both a pointer and a pointer list were provided; nothing was freed");
            }
            (Some(ptr), None) => self.free_one(ptr.as_ptr()),
            (None, Some(list)) => self.free_many(list),
            (None, None) => log::warn!("attempt to free a NULL pointer"),
        }
    }

    /// Total client-requested bytes currently tracked. Pure observer apart
    /// from the near-limit warning side effect.
    pub fn usage(&self) -> usize {
        self.registry.usage()
    }

    /// Number of live tracked allocations.
    pub fn count(&self) -> usize {
        self.registry.len()
    }

    /// Register a block that was NOT obtained through this facade so it
    /// participates in free/usage accounting uniformly. Adopted blocks are
    /// never fenced. Returns the pointer back on success, `None` for a null
    /// pointer, an already-tracked pointer, or when the registry refuses the
    /// record.
    ///
    /// A second record for a live address would hand the same block to the
    /// host allocator twice on free, so a duplicate is a warning and a
    /// no-op, never a second registration.
    ///
    /// The block must ultimately be releasable by this facade's host
    /// allocator, i.e. come from the same underlying `malloc` family.
    pub fn adopt(&mut self, ptr: *mut u8, size: usize) -> Option<NonNull<u8>> {
        let ptr = NonNull::new(ptr)?;
        let address = ptr.as_ptr() as usize;
        if self.registry.contains(address) {
            log::warn!("pointer {address:#x} is already tracked here and was not adopted");
            return None;
        }
        match self.registry.insert(Tracked::new(address, address, size)) {
            Ok(()) => Some(ptr),
            // The registry already emitted its tracking-limit diagnostic.
            Err(_) => None,
        }
    }

    /// Allocate a fresh `count * elem_size` block, copy over as much of the
    /// old block as fits, and free the old block through the tracked path.
    /// A null `ptr` degenerates to a plain [`SafeAlloc::allocate`]; an
    /// untracked `ptr` gets the "not tracked" warning and nothing is copied
    /// or freed.
    ///
    /// # Safety
    ///
    /// `ptr` must be null or a live client pointer whose tracked size bytes
    /// are readable.
    pub unsafe fn reallocate(
        &mut self,
        ptr: *mut u8,
        count: usize,
        elem_size: usize,
    ) -> Result<NonNull<u8>, Fatal> {
        let new_size = count.saturating_mul(elem_size);
        let new = self.allocate(count, elem_size)?;
        if ptr.is_null() {
            return Ok(new);
        }
        match self.registry.remove(ptr as usize) {
            Some(record) => {
                // SAFETY: The old block has `record.size` readable bytes
                //         (caller contract) and the new one was just
                //         allocated with `new_size` writable bytes; distinct
                //         blocks, so non-overlapping.
                unsafe {
                    ptr::copy_nonoverlapping(ptr, new.as_ptr(), record.size.min(new_size));
                }
                self.release_record(record);
            }
            None => log::warn!(
                "pointer {:#x} is not tracked here and was not freed",
                ptr as usize
            ),
        }
        Ok(new)
    }

    /// All live records, address-ordered. Serializable, for offline
    /// inspection of what a leaky call site left behind.
    pub fn snapshot(&self) -> Vec<Tracked> {
        self.registry.snapshot()
    }

    /// Release a record that has already been removed from the registry.
    fn release_record(&mut self, record: Tracked) {
        if record.is_fenced() {
            // SAFETY: A fenced record's address is the interior pointer our
            //         own install produced for `size` usable bytes, and the
            //         block is still live (the record was, until now).
            let interior = unsafe { NonNull::new_unchecked(record.address as *mut u8) };
            // Corruption has been reported by `verify`; the free proceeds
            // regardless.
            let _ = unsafe { fence::verify(interior, record.size) };
        }
        // SAFETY: `original` is the raw host block for this record, and the
        //         record is out of the registry, so exactly one release.
        unsafe { self.host.release(record.original as *mut u8) };
    }

    /// Drop every tracked block, then pass `fatal` through.
    fn rollback(&mut self, fatal: Fatal) -> Fatal {
        self.free_all();
        log::error!("{fatal}");
        fatal
    }
}
