//! Free-space management for pack containers
//!
//! Reclaimed ranges are threaded through the container itself as a singly
//! linked chain of `FREE` records, starting at the header's first-free
//! pointer. [`FreeList`] owns that chain and an in-memory mirror of it. Every
//! change is written to disk first and mirrored second, so re-reading the
//! chain from the header always rebuilds the same mirror.

pub mod free_list;

pub use free_list::FreeList;

use serde::{Deserialize, Serialize};

/// A granted byte range
///
/// `length` can exceed the requested size when a free block was handed out
/// whole because its remainder could not host a free record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Allocation {
    pub offset: u64,
    pub length: u32,
}

impl Allocation {
    pub fn end(&self) -> u64 {
        self.offset + self.length as u64
    }
}

/// Summary of the free chain
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FreeSpaceStats {
    /// Number of free records in the chain
    pub records: usize,

    /// Sum of free record lengths
    pub total_bytes: u64,

    /// Longest single free record
    pub largest: u64,

    /// 0.0 when all free space is one block, approaching 1.0 as it scatters
    pub fragmentation: f64,
}
