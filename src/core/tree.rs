//! Directory tree rooted at the header's root pointer
//!
//! Paths are slash separated. Empty segments are ignored, so `"/Data//a.dat"`
//! and `"Data/a.dat"` name the same node and `""` names the root.
//!
//! Lookups read records straight from the container. Edits go through
//! [`TreeEditor`], which keeps a chain of directory records from the root to
//! the directory being edited. When a directory outgrows its range it is
//! moved, and the link that points at it (the parent's entry or the header's
//! root field) is patched before the old range is freed.

use crate::core::allocator::FreeList;
use crate::core::error::{GgpkError, Result};
use crate::core::ggpk::GgpkOptions;
use crate::core::hash::name_hash;
use crate::core::header::GgpkHeader;
use crate::core::io::GgpkFile;
use crate::core::record::free::FREE_RECORD_MIN;
use crate::core::record::{DirectoryEntry, DirectoryRecord, FileRecord, Node};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::debug;

/// Non-empty segments of a slash separated path
pub fn segments(path: &str) -> Vec<&str> {
    path.split('/').filter(|s| !s.is_empty()).collect()
}

fn joined(segments: &[&str]) -> String {
    segments.join("/")
}

/// Split a path into its parent segments and terminal name
fn split_path(path: &str) -> Result<(Vec<&str>, &str)> {
    let mut parts = segments(path);
    let name = parts
        .pop()
        .ok_or_else(|| GgpkError::InvalidPath(format!("{path:?} names the root directory")))?;
    Ok((parts, name))
}

fn names_match(stored: &str, wanted: &str, case_sensitive: bool) -> bool {
    if case_sensitive {
        stored == wanted
    } else {
        stored == wanted || stored.to_lowercase() == wanted.to_lowercase()
    }
}

/// Find a child of `dir` by name.
///
/// The name hash narrows the entries down to candidates, then each
/// candidate's stored name is compared.
pub fn find_child(
    file: &mut GgpkFile,
    dir: &DirectoryRecord,
    name: &str,
    case_sensitive: bool,
) -> Result<Option<Node>> {
    for index in dir.candidates_for(name) {
        let child = Node::read_at(file, dir.entries[index].offset)?;
        if names_match(child.name(), name, case_sensitive) {
            return Ok(Some(child));
        }
    }
    Ok(None)
}

/// Walk `path` from the root directory at `root_offset`
pub fn resolve(
    file: &mut GgpkFile,
    root_offset: u64,
    path: &str,
    case_sensitive: bool,
) -> Result<Node> {
    let parts = segments(path);
    let mut node = Node::read_at(file, root_offset)?;

    for (i, segment) in parts.iter().enumerate() {
        let dir = match node {
            Node::Directory(dir) => dir,
            Node::File(_) => return Err(GgpkError::NotADirectory(joined(&parts[..i]))),
        };
        node = find_child(file, &dir, segment, case_sensitive)?
            .ok_or_else(|| GgpkError::PathNotFound(joined(&parts[..=i])))?;
    }

    Ok(node)
}

/// Children of the directory at `path`
pub fn list(
    file: &mut GgpkFile,
    root_offset: u64,
    path: &str,
    case_sensitive: bool,
) -> Result<Vec<Node>> {
    match resolve(file, root_offset, path, case_sensitive)? {
        Node::Directory(dir) => dir
            .entries
            .iter()
            .map(|entry| Node::read_at(file, entry.offset))
            .collect(),
        Node::File(_) => Err(GgpkError::NotADirectory(joined(&segments(path)))),
    }
}

/// Every node below `path`, depth first, with its full path
pub fn walk(
    file: &mut GgpkFile,
    root_offset: u64,
    path: &str,
    case_sensitive: bool,
) -> Result<Vec<(String, Node)>> {
    let base = joined(&segments(path));
    let start = match resolve(file, root_offset, path, case_sensitive)? {
        Node::Directory(dir) => dir,
        file_node => return Ok(vec![(base, file_node)]),
    };

    let mut out = Vec::new();
    let mut seen = HashSet::from([start.offset]);
    let mut stack = Vec::new();
    push_children(file, &start, &base, &mut stack)?;

    while let Some((child_path, node)) = stack.pop() {
        if !seen.insert(node.offset()) {
            return Err(GgpkError::Corrupted(format!(
                "directory cycle through offset {}",
                node.offset()
            )));
        }
        if let Node::Directory(dir) = &node {
            push_children(file, dir, &child_path, &mut stack)?;
        }
        out.push((child_path, node));
    }

    Ok(out)
}

fn push_children(
    file: &mut GgpkFile,
    dir: &DirectoryRecord,
    prefix: &str,
    stack: &mut Vec<(String, Node)>,
) -> Result<()> {
    // Reverse so children pop in entry order
    for entry in dir.entries.iter().rev() {
        let child = Node::read_at(file, entry.offset)?;
        let child_path = if prefix.is_empty() {
            child.name().to_string()
        } else {
            format!("{prefix}/{}", child.name())
        };
        stack.push((child_path, child));
    }
    Ok(())
}

/// Totals gathered by [`verify_tree`]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeStats {
    pub directories: usize,
    pub files: usize,
    pub payload_bytes: u64,

    /// Files whose payload no longer matches the stored SHA-256
    pub digest_mismatches: Vec<String>,
}

/// Parse every record reachable from the root.
///
/// Fails on the first record that does not parse as a directory or file, on
/// unsorted entries, on entry hashes that disagree with the child's name,
/// and on cycles. With `check_digests` every payload is re-hashed and
/// mismatches are reported in the stats rather than failing the walk.
pub fn verify_tree(
    file: &mut GgpkFile,
    header: &GgpkHeader,
    check_digests: bool,
) -> Result<TreeStats> {
    let root = match Node::read_at(file, header.root_offset)? {
        Node::Directory(dir) => dir,
        Node::File(f) => {
            return Err(GgpkError::Corrupted(format!(
                "root offset {} holds file {:?}",
                f.offset, f.name
            )))
        }
    };

    let mut stats = TreeStats::default();
    let mut seen = HashSet::new();
    let mut stack = vec![(String::new(), Node::Directory(root))];

    while let Some((path, node)) = stack.pop() {
        if !seen.insert(node.offset()) {
            return Err(GgpkError::Corrupted(format!(
                "record at {} is reachable twice",
                node.offset()
            )));
        }

        match node {
            Node::Directory(dir) => {
                stats.directories += 1;
                if !dir.is_sorted() {
                    return Err(GgpkError::Corrupted(format!(
                        "directory {path:?} has unsorted entries"
                    )));
                }
                for entry in &dir.entries {
                    let child = Node::read_at(file, entry.offset)?;
                    if entry.name_hash != name_hash(child.name()) {
                        return Err(GgpkError::Corrupted(format!(
                            "entry hash {:#010x} in {path:?} does not match child {:?}",
                            entry.name_hash,
                            child.name()
                        )));
                    }
                    let child_path = if path.is_empty() {
                        child.name().to_string()
                    } else {
                        format!("{path}/{}", child.name())
                    };
                    stack.push((child_path, child));
                }
            }
            Node::File(f) => {
                stats.files += 1;
                stats.payload_bytes += f.data_length as u64;
                if check_digests && !f.verify(file)? {
                    stats.digest_mismatches.push(path);
                }
            }
        }
    }

    Ok(stats)
}

/// Structural edits to the tree.
///
/// Borrows the container state for the duration of one edit. The caller
/// holds the container lock.
pub struct TreeEditor<'a> {
    file: &'a mut GgpkFile,
    header: &'a mut GgpkHeader,
    free_list: &'a mut FreeList,
    options: GgpkOptions,
}

impl<'a> TreeEditor<'a> {
    pub fn new(
        file: &'a mut GgpkFile,
        header: &'a mut GgpkHeader,
        free_list: &'a mut FreeList,
        options: GgpkOptions,
    ) -> Self {
        TreeEditor {
            file,
            header,
            free_list,
            options,
        }
    }

    fn allocate(&mut self, size: u64) -> Result<crate::core::allocator::Allocation> {
        self.free_list
            .allocate(self.file, self.header, size, self.options.max_container_size)
    }

    fn free(&mut self, offset: u64, length: u64) -> Result<()> {
        self.free_list.free(self.file, self.header, offset, length)
    }

    fn read_root(&mut self) -> Result<DirectoryRecord> {
        DirectoryRecord::read_at(self.file, self.header.root_offset)
    }

    /// Directory records from the root down to `parts`, creating missing
    /// directories when `create` is set
    fn directory_chain(&mut self, parts: &[&str], create: bool) -> Result<Vec<DirectoryRecord>> {
        let mut chain = vec![self.read_root()?];

        for (i, segment) in parts.iter().enumerate() {
            let current = &chain[chain.len() - 1];
            match find_child(self.file, current, segment, self.options.case_sensitive)? {
                Some(Node::Directory(dir)) => chain.push(dir),
                Some(Node::File(_)) => {
                    return Err(GgpkError::NotADirectory(joined(&parts[..=i])));
                }
                None if create => {
                    let dir = self.place_directory(segment)?;
                    self.link_new_child(&mut chain, segment, dir.offset, dir.length as u64)?;
                    chain.push(dir);
                }
                None => return Err(GgpkError::PathNotFound(joined(&parts[..=i]))),
            }
        }

        Ok(chain)
    }

    /// Write a new empty directory record somewhere in the container
    fn place_directory(&mut self, name: &str) -> Result<DirectoryRecord> {
        let mut dir = DirectoryRecord::new(name);
        let alloc = self.allocate(dir.extent())?;
        dir.length = alloc.length;
        dir.write_at(self.file, alloc.offset)?;
        Ok(dir)
    }

    /// Add an entry for `child_offset` to the last directory of the chain
    fn link_child(
        &mut self,
        chain: &mut [DirectoryRecord],
        name: &str,
        child_offset: u64,
    ) -> Result<()> {
        let last = chain.len() - 1;
        chain[last].insert_entry(DirectoryEntry {
            name_hash: name_hash(name),
            offset: child_offset,
        });
        self.rewrite_directory(chain, last)
    }

    /// Link a freshly written record, handing its range back to the
    /// allocator when the parent cannot take the entry
    fn link_new_child(
        &mut self,
        chain: &mut [DirectoryRecord],
        name: &str,
        child_offset: u64,
        child_length: u64,
    ) -> Result<()> {
        match self.link_child(chain, name, child_offset) {
            Ok(()) => Ok(()),
            Err(e @ GgpkError::Io(_)) => Err(e),
            Err(e) => {
                self.free(child_offset, child_length)?;
                debug!(name, offset = child_offset, error = %e, "released unlinked record");
                Err(e)
            }
        }
    }

    /// Patch the link that points at `chain[index]` from `old` to `new`
    fn repoint(
        &mut self,
        chain: &mut [DirectoryRecord],
        index: usize,
        old: u64,
        new: u64,
    ) -> Result<()> {
        if index == 0 {
            return self.header.set_root_offset(self.file, new);
        }
        repoint_entry(self.file, &mut chain[index - 1], old, new)
    }

    /// Write `chain[index]` back after its entries changed.
    ///
    /// In place when the new extent fits; a tail of at least 16 bytes is
    /// returned to the free list. Otherwise the directory moves.
    fn rewrite_directory(&mut self, chain: &mut [DirectoryRecord], index: usize) -> Result<()> {
        let extent = chain[index].extent();
        let old_offset = chain[index].offset;
        let old_length = chain[index].length as u64;

        if extent <= old_length {
            let tail = old_length - extent;
            if tail >= FREE_RECORD_MIN {
                chain[index].length = extent as u32;
                chain[index].write_at(self.file, old_offset)?;
                self.free(old_offset + extent, tail)?;
            } else {
                chain[index].write_at(self.file, old_offset)?;
            }
            return Ok(());
        }

        let alloc = self.allocate(extent)?;
        chain[index].length = alloc.length;
        chain[index].write_at(self.file, alloc.offset)?;
        self.repoint(chain, index, old_offset, alloc.offset)?;
        self.free(old_offset, old_length)?;

        debug!(
            name = %chain[index].name,
            from = old_offset,
            to = alloc.offset,
            "relocated directory"
        );
        Ok(())
    }

    /// Store a new file, creating missing parent directories
    pub fn add_file(&mut self, path: &str, data: &[u8]) -> Result<FileRecord> {
        let (parents, name) = split_path(path)?;
        let mut chain = self.directory_chain(&parents, true)?;

        let parent = &chain[chain.len() - 1];
        if find_child(self.file, parent, name, self.options.case_sensitive)?.is_some() {
            return Err(GgpkError::AlreadyExists(path.to_string()));
        }

        let mut record = FileRecord::new(name, data)?;
        let alloc = self.allocate(record.extent())?;
        record.length = alloc.length;
        record.write_at(self.file, alloc.offset, data)?;
        self.link_new_child(&mut chain, name, record.offset, record.length as u64)?;

        debug!(path, offset = record.offset, size = data.len(), "added file");
        Ok(record)
    }

    /// Overwrite the payload of an existing file
    pub fn replace_file(&mut self, path: &str, data: &[u8]) -> Result<FileRecord> {
        let (parents, name) = split_path(path)?;
        let mut chain = self.directory_chain(&parents, false)?;
        let last = chain.len() - 1;

        let old = match find_child(self.file, &chain[last], name, self.options.case_sensitive)? {
            Some(Node::File(f)) => f,
            Some(Node::Directory(_)) => {
                return Err(GgpkError::InvalidPath(format!("{path} is a directory")))
            }
            None => return Err(GgpkError::PathNotFound(path.to_string())),
        };

        let mut record = FileRecord::new(&old.name, data)?;
        let extent = record.extent();
        let old_length = old.length as u64;

        if extent <= old_length {
            let tail = old_length - extent;
            record.length = if tail >= FREE_RECORD_MIN {
                extent as u32
            } else {
                old.length
            };
            record.write_at(self.file, old.offset, data)?;
            if tail >= FREE_RECORD_MIN {
                self.free(old.offset + extent, tail)?;
            }
            debug!(path, offset = old.offset, "replaced file in place");
            return Ok(record);
        }

        let alloc = self.allocate(extent)?;
        record.length = alloc.length;
        record.write_at(self.file, alloc.offset, data)?;
        repoint_entry(self.file, &mut chain[last], old.offset, record.offset)?;
        self.free(old.offset, old_length)?;

        debug!(path, from = old.offset, to = record.offset, "relocated file");
        Ok(record)
    }

    /// Create a directory and any missing parents. Existing directories are
    /// returned unchanged.
    pub fn create_dir(&mut self, path: &str) -> Result<DirectoryRecord> {
        let parts = segments(path);
        let Some((name, parents)) = parts.split_last() else {
            return self.read_root();
        };

        let mut chain = self.directory_chain(parents, true)?;
        let parent = &chain[chain.len() - 1];
        match find_child(self.file, parent, name, self.options.case_sensitive)? {
            Some(Node::Directory(dir)) => Ok(dir),
            Some(Node::File(_)) => Err(GgpkError::AlreadyExists(path.to_string())),
            None => {
                let dir = self.place_directory(name)?;
                self.link_new_child(&mut chain, name, dir.offset, dir.length as u64)?;
                debug!(path, offset = dir.offset, "created directory");
                Ok(dir)
            }
        }
    }

    /// Unlink a node from its parent and free it, with everything below it
    pub fn remove(&mut self, path: &str) -> Result<Node> {
        let (parents, name) = split_path(path)?;
        let mut chain = self.directory_chain(&parents, false)?;
        let last = chain.len() - 1;

        let node = find_child(self.file, &chain[last], name, self.options.case_sensitive)?
            .ok_or_else(|| GgpkError::PathNotFound(path.to_string()))?;
        let ranges = self.subtree_ranges(&node)?;

        chain[last].remove_entry(node.offset()).ok_or_else(|| {
            GgpkError::Corrupted(format!("{path} vanished from its parent during removal"))
        })?;
        self.rewrite_directory(&mut chain, last)?;

        for (offset, length) in &ranges {
            self.free(*offset, *length)?;
        }

        debug!(path, records = ranges.len(), "removed");
        Ok(node)
    }

    /// Byte ranges of `node` and all its descendants
    fn subtree_ranges(&mut self, node: &Node) -> Result<Vec<(u64, u64)>> {
        let mut ranges = Vec::new();
        let mut seen = HashSet::new();
        let mut stack = vec![node.clone()];

        while let Some(current) = stack.pop() {
            if !seen.insert(current.offset()) {
                return Err(GgpkError::Corrupted(format!(
                    "directory cycle through offset {}",
                    current.offset()
                )));
            }
            ranges.push((current.offset(), current.length() as u64));
            if let Node::Directory(dir) = &current {
                for entry in &dir.entries {
                    stack.push(Node::read_at(self.file, entry.offset)?);
                }
            }
        }

        Ok(ranges)
    }
}

/// Patch the entry of `parent` that points at `old` so it points at `new`
fn repoint_entry(
    file: &mut GgpkFile,
    parent: &mut DirectoryRecord,
    old: u64,
    new: u64,
) -> Result<()> {
    let position = parent.position_of(old).ok_or_else(|| {
        GgpkError::Corrupted(format!(
            "directory {:?} has no entry for offset {old}",
            parent.name
        ))
    })?;
    file.write_u64_at(parent.entry_offset_field(position), new)?;
    parent.entries[position].offset = new;
    Ok(())
}
