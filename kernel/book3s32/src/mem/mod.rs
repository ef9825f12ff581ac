//! Data-Structures and Definitions for 32-bit book3s hashed address translation
//!
//! # Translation Basics
//!
//! A 32-bit effective address is split into a 4-bit segment number, a 16-bit page index and a 12-bit page offset.
//!
//! ```text
//! 0        3 4                        19 20                31
//! ┌─────────┬───────────────────────────┬───────────────────┐
//! │   SR#   │        page index         │    page offset    │
//! └─────────┴───────────────────────────┴───────────────────┘
//!    4bits             16bits                  12bits
//!                  32-bit Effective Address
//! ```
//!
//! The segment number selects one of 16 segment registers which holds the VSID (virtual segment id) of that 256 MiB
//! slice of the address space.
//! VSID and page index together form the virtual page number which is hashed to find a group of [`HashPte`]s in the
//! hardware page table.
//! A matching entry yields the physical page number.
//!
//! Large contiguous ranges (kernel linear mapping, framebuffers, ...) bypass the hash table entirely through a small
//! set of block address translation registers, see [`bat`].
//!
//! Note that the hardware numbers bits big-endian (bit 0 is the most significant one).
//! All masks in this module are written in the usual little-endian Rust notation.

mod addr;
pub mod bat;
pub mod context;
mod hash_pte;
pub mod segments;
mod vsid;

pub use addr::*;
pub use hash_pte::*;
pub use vsid::*;

/// How large each page is
pub const PAGESIZE: usize = 4096;

/// How many segment registers (and thus 256 MiB segments) the effective address space is split into
pub const NUM_SEGMENTS: usize = 16;

/// How large one segment is
pub const SEGMENT_SIZE: u64 = 1 << SEGMENT_SHIFT;

/// The default ceiling of user-accessible effective addresses.
///
/// Segments at and above this address are only ever used by the kernel.
pub const DEFAULT_TASK_SIZE: u64 = 0xb000_0000;
