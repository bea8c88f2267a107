//! First-fit allocator over the on-disk free chain
//!
//! The container file is the arena and offsets are the handles. The mirror
//! is a `Vec<FreeRecord>` in chain order: `nodes[i].next` always equals
//! `nodes[i + 1].offset` (or 0 for the tail), and the header's first-free
//! pointer equals `nodes[0].offset` (or 0 when empty).
//!
//! Pointer patches always target the exact field that links to a node: the
//! header's first-free field for the head, the predecessor's next field
//! otherwise. A node that is being removed is never written to.

use super::{Allocation, FreeSpaceStats};
use crate::core::error::{GgpkError, Result};
use crate::core::header::{GgpkHeader, HEADER_LENGTH};
use crate::core::io::GgpkFile;
use crate::core::record::free::{FreeRecord, FREE_RECORD_MIN, LENGTH_FIELD, NEXT_FIELD};
use std::collections::HashSet;
use tracing::{debug, warn};

#[derive(Debug, Clone, Default)]
pub struct FreeList {
    nodes: Vec<FreeRecord>,
}

impl FreeList {
    /// Empty chain, for a fresh container
    pub fn new() -> Self {
        FreeList { nodes: Vec::new() }
    }

    /// Rebuild the mirror by walking the chain on disk
    pub fn load(file: &mut GgpkFile, header: &GgpkHeader) -> Result<Self> {
        let nodes = Self::walk_disk(file, header)?;

        if !nodes.windows(2).all(|w| w[0].offset < w[1].offset) {
            warn!(
                records = nodes.len(),
                "free chain is not offset-ordered; new records are placed by position"
            );
        }

        debug!(records = nodes.len(), "loaded free chain");
        Ok(FreeList { nodes })
    }

    /// Follow the on-disk chain from the header
    fn walk_disk(file: &mut GgpkFile, header: &GgpkHeader) -> Result<Vec<FreeRecord>> {
        let mut nodes = Vec::new();
        let mut seen = HashSet::new();
        let mut cursor = header.first_free_offset;

        while cursor != 0 {
            if !seen.insert(cursor) {
                return Err(GgpkError::malformed(cursor, "free chain loops back on itself"));
            }
            let record = FreeRecord::read_at(file, cursor)?;
            cursor = record.next;
            nodes.push(record);
        }

        Ok(nodes)
    }

    /// Free records in chain order
    pub fn records(&self) -> &[FreeRecord] {
        &self.nodes
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// List position of the free record at `offset`
    pub fn position(&self, offset: u64) -> Option<usize> {
        self.nodes.iter().position(|n| n.offset == offset)
    }

    pub fn total_free(&self) -> u64 {
        self.nodes.iter().map(|n| n.length as u64).sum()
    }

    pub fn stats(&self) -> FreeSpaceStats {
        let total_bytes = self.total_free();
        let largest = self
            .nodes
            .iter()
            .map(|n| n.length as u64)
            .max()
            .unwrap_or(0);

        let fragmentation = if total_bytes == 0 {
            0.0
        } else {
            1.0 - largest as f64 / total_bytes as f64
        };

        FreeSpaceStats {
            records: self.nodes.len(),
            total_bytes,
            largest,
            fragmentation,
        }
    }

    /// Offset the node at `index` must link to
    fn successor_of(&self, index: usize) -> u64 {
        self.nodes.get(index + 1).map_or(0, |n| n.offset)
    }

    /// Point the link that precedes a list position at `target`.
    ///
    /// `predecessor == None` means the header's first-free field.
    fn patch_link(
        &mut self,
        file: &mut GgpkFile,
        header: &mut GgpkHeader,
        predecessor: Option<usize>,
        target: u64,
    ) -> Result<()> {
        match predecessor {
            None => header.set_first_free_offset(file, target),
            Some(index) => {
                file.write_u64_at(self.nodes[index].offset + NEXT_FIELD, target)?;
                self.nodes[index].next = target;
                Ok(())
            }
        }
    }

    /// Grant a range of at least `size` bytes.
    ///
    /// First fit in chain order. A block whose remainder can host a free
    /// record is split and the remainder takes the block's place in the
    /// chain; otherwise the whole block is granted. With no fit the
    /// container grows at end of file, up to `limit` bytes in total.
    pub fn allocate(
        &mut self,
        file: &mut GgpkFile,
        header: &mut GgpkHeader,
        size: u64,
        limit: u64,
    ) -> Result<Allocation> {
        let size = size.max(FREE_RECORD_MIN);
        if size > u32::MAX as u64 {
            return Err(GgpkError::AllocationExhausted { requested: size });
        }

        if let Some(index) = self.nodes.iter().position(|n| n.length as u64 >= size) {
            let block = self.nodes[index];
            let remainder = block.length as u64 - size;

            if remainder >= FREE_RECORD_MIN {
                let mut rest = FreeRecord::new(0, remainder as u32, self.successor_of(index));
                rest.write_at(file, block.offset + size)?;
                self.patch_link(file, header, index.checked_sub(1), rest.offset)?;
                self.nodes[index] = rest;

                debug!(
                    offset = block.offset,
                    size,
                    remainder,
                    "split free record"
                );
                return Ok(Allocation {
                    offset: block.offset,
                    length: size as u32,
                });
            }

            self.remove_by_handle(file, header, index)?;
            debug!(
                offset = block.offset,
                size,
                granted = block.length,
                "granted whole free record"
            );
            return Ok(Allocation {
                offset: block.offset,
                length: block.length,
            });
        }

        let offset = file.len();
        let end = offset
            .checked_add(size)
            .filter(|&end| end <= limit)
            .ok_or(GgpkError::AllocationExhausted { requested: size })?;
        file.grow_to(end)?;

        debug!(offset, size, "grew container");
        Ok(Allocation {
            offset,
            length: size as u32,
        })
    }

    /// Return `[offset, offset + size)` to the chain, merging with free
    /// records that touch it on either side.
    pub fn free(
        &mut self,
        file: &mut GgpkFile,
        header: &mut GgpkHeader,
        offset: u64,
        size: u64,
    ) -> Result<()> {
        let end = self.check_range(file, header, offset, size)?;

        let before = self.nodes.iter().position(|n| n.end() == offset);
        let after = self.nodes.iter().position(|n| n.offset == end);
        let fits = |len: u64| len <= u32::MAX as u64;

        match (before, after) {
            (Some(b), Some(a))
                if fits(self.nodes[b].length as u64 + size + self.nodes[a].length as u64) =>
            {
                let absorbed = self.remove_by_handle(file, header, a)?;
                let b = if a < b { b - 1 } else { b };
                self.extend(file, b, size + absorbed.length as u64)?;
                debug!(offset, size, "coalesced free range with both neighbours");
            }
            (Some(b), _) if fits(self.nodes[b].length as u64 + size) => {
                self.extend(file, b, size)?;
                debug!(offset, size, "coalesced free range into preceding record");
            }
            (_, Some(a)) if fits(size + self.nodes[a].length as u64) => {
                let merged_len = size + self.nodes[a].length as u64;
                let mut merged = FreeRecord::new(0, merged_len as u32, self.successor_of(a));
                merged.write_at(file, offset)?;
                self.patch_link(file, header, a.checked_sub(1), offset)?;
                self.nodes[a] = merged;
                debug!(offset, size, "coalesced free range with following record");
            }
            _ => self.insert(file, header, offset, size)?,
        }

        Ok(())
    }

    fn check_range(
        &self,
        file: &GgpkFile,
        header: &GgpkHeader,
        offset: u64,
        size: u64,
    ) -> Result<u64> {
        let invalid = |reason: String| GgpkError::InvalidRange {
            offset,
            length: size,
            reason,
        };

        if size < FREE_RECORD_MIN {
            return Err(invalid(format!(
                "ranges below {FREE_RECORD_MIN} bytes cannot host a free record"
            )));
        }
        if size > u32::MAX as u64 {
            return Err(invalid("range exceeds the 32-bit record length".to_string()));
        }
        let end = offset
            .checked_add(size)
            .ok_or_else(|| invalid("range end overflows a 64-bit offset".to_string()))?;
        if offset < header.offset + HEADER_LENGTH as u64 && end > header.offset {
            return Err(invalid("range overlaps the header record".to_string()));
        }
        if end > file.len() {
            return Err(invalid(format!("range runs past end of file ({})", file.len())));
        }
        if let Some(existing) = self
            .nodes
            .iter()
            .find(|n| n.offset < end && offset < n.end())
        {
            return Err(invalid(format!(
                "range overlaps free record at {}",
                existing.offset
            )));
        }

        Ok(end)
    }

    /// Grow the node at `index` by `extra` bytes in place
    fn extend(&mut self, file: &mut GgpkFile, index: usize, extra: u64) -> Result<()> {
        let new_len = self.nodes[index].length as u64 + extra;
        file.write_u32_at(self.nodes[index].offset + LENGTH_FIELD, new_len as u32)?;
        self.nodes[index].length = new_len as u32;
        Ok(())
    }

    /// Link a new free record at its offset-ordered position
    fn insert(
        &mut self,
        file: &mut GgpkFile,
        header: &mut GgpkHeader,
        offset: u64,
        size: u64,
    ) -> Result<()> {
        let index = self.nodes.partition_point(|n| n.offset < offset);
        let next = self.nodes.get(index).map_or(0, |n| n.offset);

        let mut record = FreeRecord::new(0, size as u32, next);
        record.write_at(file, offset)?;
        self.patch_link(file, header, index.checked_sub(1), offset)?;
        self.nodes.insert(index, record);

        debug!(offset, size, position = index, "linked new free record");
        Ok(())
    }

    /// Unlink the node at list position `index`.
    ///
    /// Only the link that points at the node is rewritten: the header's
    /// first-free field when it is the head, the predecessor's next field
    /// otherwise. The mirror is updated after the patch lands.
    pub fn remove_by_handle(
        &mut self,
        file: &mut GgpkFile,
        header: &mut GgpkHeader,
        index: usize,
    ) -> Result<FreeRecord> {
        if index >= self.nodes.len() {
            return Err(GgpkError::InvalidRange {
                offset: 0,
                length: 0,
                reason: format!("no free record at list position {index}"),
            });
        }

        let target = self.successor_of(index);
        self.patch_link(file, header, index.checked_sub(1), target)?;
        let removed = self.nodes.remove(index);

        debug!(offset = removed.offset, length = removed.length, "unlinked free record");
        Ok(removed)
    }

    /// Unlink the free record at `offset`, if there is one
    pub fn find_and_remove(
        &mut self,
        file: &mut GgpkFile,
        header: &mut GgpkHeader,
        offset: u64,
    ) -> Result<Option<FreeRecord>> {
        match self.position(offset) {
            Some(index) => self.remove_by_handle(file, header, index).map(Some),
            None => Ok(None),
        }
    }

    /// Compare the on-disk chain with the mirror
    pub fn verify(&self, file: &mut GgpkFile, header: &GgpkHeader) -> Result<()> {
        let on_disk = Self::walk_disk(file, header)?;

        let disk_pairs: Vec<(u64, u32)> = on_disk.iter().map(|n| (n.offset, n.length)).collect();
        let mirror_pairs: Vec<(u64, u32)> =
            self.nodes.iter().map(|n| (n.offset, n.length)).collect();

        if disk_pairs != mirror_pairs {
            return Err(GgpkError::Corrupted(format!(
                "free chain on disk ({} records) diverges from memory ({} records)",
                disk_pairs.len(),
                mirror_pairs.len()
            )));
        }

        for (index, node) in self.nodes.iter().enumerate() {
            if node.next != self.successor_of(index) {
                return Err(GgpkError::Corrupted(format!(
                    "free record at {} links to {}, expected {}",
                    node.offset,
                    node.next,
                    self.successor_of(index)
                )));
            }
        }

        Ok(())
    }
}
