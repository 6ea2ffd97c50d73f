//! Kernel substrate for the tessera runtime.
//!
//! A resolved call is instantiated into a chain of small execution units
//! ("kernels") living contiguously in one relocatable byte arena. Each
//! kernel entry starts with a common prefix (function pointer + destructor
//! pointer) followed by kernel-specific fields; child kernels are addressed
//! by byte offset from their parent's own entry, never by long-lived raw
//! pointer, so arena growth can relocate everything without breaking the
//! chain.
//!
//! # Key Types
//!
//! - [`ArenaBuffer`] - Aligned growable byte storage
//! - [`KernelBuilder`] - Placement-construction of kernel entries by offset
//! - [`KernelChain`] - A finished, executable, self-destructing chain
//! - [`Kernel`] - The `single`/`strided`/`destruct` execution contract
//! - [`KernelPrefix`] - The common per-entry header
//!
//! # Relocation discipline
//!
//! [`KernelBuilder::emplace`] may grow the arena and relocate all existing
//! bytes. Any raw pointer obtained from [`KernelBuilder::get_at`] is
//! invalidated by a subsequent `emplace`/`reserve` and must be re-fetched by
//! offset. Offsets themselves are stable for the life of the arena.

mod arena;
mod builder;
mod kernel;

pub use arena::{ArenaBuffer, ARENA_ALIGNMENT};
pub use builder::{KernelBuilder, KernelChain};
pub use kernel::{
    child_of, entry_size, prefix_of, CallFn, Kernel, KernelPrefix, KernelRequest, SingleFn,
    StridedFn, KERNEL_ALIGNMENT,
};
