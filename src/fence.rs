//! Memory fencing: sentinel guard spans around a usable buffer.
//!
//! A fenced block is one raw allocation laid out as
//!
//! ```plaintext
//! +---------------+----------------+----------------+
//! | leading guard | usable span    | trailing guard |
//! | GUARD_SIZE    | usable bytes   | GUARD_SIZE     |
//! +---------------+----------------+----------------+
//! ^ block          ^ interior (what the client sees)
//! ```
//!
//! The client only ever holds the interior pointer. Both guard spans are
//! filled with [`GUARD_PATTERN`] at install time and re-read at free time;
//! a mismatch means something wrote out of bounds. All three regions are
//! views computed by offset from the block start, never by re-deriving
//! addresses elsewhere.

use std::{error::Error, fmt, ptr::NonNull, slice};

use crate::config::{GUARD_PATTERN, GUARD_SIZE};

/// Which guard span failed verification.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GuardSide {
    Start,
    End,
}

impl fmt::Display for GuardSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GuardSide::Start => f.write_str("START"),
            GuardSide::End => f.write_str("END"),
        }
    }
}

/// An out-of-bounds write tripped a guard span.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GuardViolation {
    /// The first failing span; start is checked before end, and exactly one
    /// span is reported per verification.
    pub side: GuardSide,
    /// The interior pointer of the corrupted block.
    pub interior: usize,
}

impl fmt::Display for GuardViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "memory corruption detected at {} guard of {:#x}",
            self.side, self.interior
        )
    }
}

impl Error for GuardViolation {}

/// Extra bytes a fenced block needs on top of the client-usable size.
pub const fn overhead() -> usize {
    2 * GUARD_SIZE
}

/// Offset-computed mutable views over one raw fenced block.
struct FencedBlock {
    block: NonNull<u8>,
    usable: usize,
}

impl FencedBlock {
    /// # Safety
    ///
    /// - `block` must point to at least `overhead() + usable` bytes, valid
    ///   for reads and writes for the lifetime of the view.
    /// - No other reference may alias the guard spans while the view lives.
    ///   The usable span is the client's; the views never touch it.
    unsafe fn from_block(block: NonNull<u8>, usable: usize) -> Self {
        Self { block, usable }
    }

    /// # Safety
    ///
    /// Same block contract as [`FencedBlock::from_block`]; the interior
    /// pointer must have come from a fenced install, i.e. sit exactly
    /// `GUARD_SIZE` bytes into its block.
    unsafe fn from_interior(interior: NonNull<u8>, usable: usize) -> Self {
        // SAFETY: The interior pointer of a fenced block is GUARD_SIZE bytes
        //         past its start, so stepping back stays in the allocation.
        let block = unsafe { NonNull::new_unchecked(interior.as_ptr().sub(GUARD_SIZE)) };
        Self { block, usable }
    }

    fn interior(&self) -> NonNull<u8> {
        // SAFETY: In-bounds by the constructor contract, and non-null
        //         because the block is.
        unsafe { NonNull::new_unchecked(self.block.as_ptr().add(GUARD_SIZE)) }
    }

    fn leading_guard(&mut self) -> &mut [u8] {
        // SAFETY: First GUARD_SIZE bytes of the block; in-bounds and
        //         exclusive by the constructor contract.
        unsafe { slice::from_raw_parts_mut(self.block.as_ptr(), GUARD_SIZE) }
    }

    fn trailing_guard(&mut self) -> &mut [u8] {
        // SAFETY: Bytes [GUARD_SIZE + usable, 2*GUARD_SIZE + usable) of the
        //         block; in-bounds and exclusive by the constructor contract.
        unsafe {
            slice::from_raw_parts_mut(
                self.block.as_ptr().add(GUARD_SIZE + self.usable),
                GUARD_SIZE,
            )
        }
    }
}

/// Write the sentinel pattern into both guard spans of `block` and return
/// the interior pointer the client may use. Returns `None` for a null block.
///
/// # Safety
///
/// `block` must be null or point to at least `overhead() + usable` writable
/// bytes owned by the caller.
pub unsafe fn install(block: *mut u8, usable: usize) -> Option<NonNull<u8>> {
    let block = NonNull::new(block)?;
    // SAFETY: Size and exclusivity guaranteed by the caller.
    let mut fenced = unsafe { FencedBlock::from_block(block, usable) };
    fenced.leading_guard().fill(GUARD_PATTERN);
    fenced.trailing_guard().fill(GUARD_PATTERN);
    Some(fenced.interior())
}

/// Re-read both guard spans of the block behind `interior` and compare every
/// byte against the sentinel. The start span is checked before the end span
/// and only the first failing span is reported. On failure the violation is
/// also written to the diagnostic stream.
///
/// # Safety
///
/// `interior` must have come from [`install`] with the same `usable` size,
/// and the block must still be live.
pub unsafe fn verify(interior: NonNull<u8>, usable: usize) -> Result<(), GuardViolation> {
    // SAFETY: Contract forwarded to the caller.
    let mut fenced = unsafe { FencedBlock::from_interior(interior, usable) };
    let side = if fenced.leading_guard().iter().any(|&b| b != GUARD_PATTERN) {
        GuardSide::Start
    } else if fenced.trailing_guard().iter().any(|&b| b != GUARD_PATTERN) {
        GuardSide::End
    } else {
        return Ok(());
    };
    let violation = GuardViolation {
        side,
        interior: interior.as_ptr() as usize,
    };
    log::error!("{violation}");
    Err(violation)
}
