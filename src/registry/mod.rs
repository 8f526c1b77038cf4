//! The allocation registry: a mapping from client-visible addresses to live
//! allocation records.
//!
//! Two interchangeable backings implement the same [`Registry`] interface --
//! a fixed-capacity open-addressing probe table ([`table::ProbeTable`]) and
//! an unbounded singly-linked list ([`list::AllocList`]). The facade picks
//! one at construction time; nothing else in the crate cares which.
//!
//! The registry owns only the *bookkeeping*. Removal hands the record back
//! to the caller, which is responsible for releasing the underlying block;
//! this keeps the registry free of allocator knowledge and testable on its
//! own.

use std::{error::Error, fmt};

use serde::{Deserialize, Serialize};

pub mod list;
pub mod table;

pub use list::AllocList;
pub use table::ProbeTable;

/// One live allocation known to the tracking layer.
///
/// Addresses are held as plain integers: the registry never dereferences
/// them, it only uses them as identity keys (and hands them back so the
/// facade can free the block).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tracked {
    /// The pointer handed to the client. Identity key, never zero.
    pub address: usize,
    /// The raw allocator-returned pointer. Equal to `address` unless guard
    /// fencing shifted the interior forward by the guard width.
    pub original: usize,
    /// Client-requested byte length, excluding any guard bytes.
    pub size: usize,
}

impl Tracked {
    pub fn new(address: usize, original: usize, size: usize) -> Self {
        debug_assert!(address != 0);
        Self {
            address,
            original,
            size,
        }
    }

    /// A record carries guard spans exactly when its interior pointer was
    /// shifted off the raw block. Adopted blocks never are.
    pub fn is_fenced(&self) -> bool {
        self.address != self.original
    }
}

/// The backing store cannot accept another record.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RegistryFull;

impl fmt::Display for RegistryFull {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("allocation tracking limit reached")
    }
}

impl Error for RegistryFull {}

/// Interface shared by both tracking backings.
pub trait Registry {
    /// Record a live allocation. Fails with [`RegistryFull`] when the
    /// backing has no room left; the tracking-limit diagnostic is emitted by
    /// the backing itself.
    fn insert(&mut self, record: Tracked) -> Result<(), RegistryFull>;

    /// Remove and return the record for `address`, or `None` if no live
    /// record matches. Emitting the "not tracked" warning is the caller's
    /// job -- only the caller knows whether `None` is an error at all.
    fn remove(&mut self, address: usize) -> Option<Tracked>;

    /// Whether a live record exists for `address`. [`Registry::insert`]
    /// assumes the caller has ruled out a duplicate; this is how.
    fn contains(&self, address: usize) -> bool;

    /// Remove every live record, returning them so the caller can release
    /// the underlying blocks. The registry is empty afterwards.
    fn drain(&mut self) -> Vec<Tracked>;

    /// Total client-requested bytes across all live records. Also emits the
    /// near-limit warning as a side effect when the live count is past the
    /// backing's threshold.
    fn usage(&self) -> usize;

    /// Number of live records.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All live records, ordered by address so dumps are stable.
    fn snapshot(&self) -> Vec<Tracked>;
}
