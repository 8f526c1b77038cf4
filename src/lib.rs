//! A tracking layer between client code and the system allocator.
//!
//! Every allocation made through here is recorded (address + size) in a
//! registry, so the whole set can be freed at once, individual frees are
//! checked against what is actually live, and aggregate usage is always one
//! call away. With the `fencing` feature (or an explicit constructor
//! toggle), each block additionally gets sentinel guard spans on both sides
//! that are verified at free time to catch out-of-bounds writes.
//!
//! This is not a general-purpose allocator: memory acquisition and release
//! are delegated to the host allocator (`libc`), and this crate only adds
//! bookkeeping plus the optional guards.
//!
//! ```
//! use safealloc::SafeAlloc;
//!
//! let mut tracker = SafeAlloc::with_table();
//! let ptr = tracker.allocate(10, 4).expect("allocation failed");
//! assert_eq!(tracker.usage(), 40);
//! tracker.free_one(ptr.as_ptr());
//! assert_eq!(tracker.usage(), 0);
//! ```

pub mod config;
pub mod facade;
pub mod fence;
pub mod global;
pub mod host;
pub mod registry;

pub use facade::{Fatal, SafeAlloc};
pub use fence::{GuardSide, GuardViolation};
pub use host::{HostAlloc, LibcAlloc};
pub use registry::{AllocList, ProbeTable, Registry, RegistryFull, Tracked};
