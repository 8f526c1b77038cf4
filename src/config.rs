//! Compile-time configuration for the tracking layer.
//!
//! Everything here is deliberately a constant, not a runtime knob: the table
//! capacity sizes a fixed probe ring, and the guard geometry must agree
//! between the install and verify sides of a build.

/// Number of slots in the open-addressing probe table. Also the hard upper
/// bound on concurrently tracked allocations for that backing.
pub const TABLE_CAPACITY: usize = 1024;

/// Emit a near-limit warning once the table holds more than this many live
/// records (90% of capacity).
pub const TABLE_WARN_THRESHOLD: usize = TABLE_CAPACITY * 9 / 10;

/// Emit a near-limit warning once the list backing holds more than this many
/// live records. The list itself is unbounded.
pub const LIST_WARN_THRESHOLD: usize = 1000;

/// Width in bytes of each guard span, one before and one after the usable
/// region. Must be non-zero for fencing to detect anything.
pub const GUARD_SIZE: usize = 4;

/// Sentinel byte the guard spans are filled with and compared against.
pub const GUARD_PATTERN: u8 = 0xAB;

/// Whether new allocations get guard regions. Compile-time via the
/// `fencing` cargo feature; the facade constructor can still override it
/// so both modes are exercisable from one build.
pub const FENCING: bool = cfg!(feature = "fencing");
