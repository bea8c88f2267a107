//! Container handle
//!
//! [`Ggpk`] owns the open container file together with its header and the
//! free-list mirror. One `parking_lot::Mutex` guards all of it; every public
//! operation takes the lock for exactly its own duration.
//!
//! A mutation that fails with an I/O error may leave a pointer half patched,
//! so the container is marked poisoned and refuses further writes until
//! [`Ggpk::revalidate`] has rebuilt and checked the mirror.

use crate::core::allocator::{Allocation, FreeList, FreeSpaceStats};
use crate::core::error::{GgpkError, Result};
use crate::core::header::{GgpkHeader, HEADER_LENGTH};
use crate::core::io::GgpkFile;
use crate::core::record::{DirectoryRecord, FileRecord, FreeRecord, Node};
use crate::core::tree::{self, TreeEditor, TreeStats};
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Default cap on container growth: 64 GiB
pub const DEFAULT_MAX_CONTAINER_SIZE: u64 = 64 * 1024 * 1024 * 1024;

/// Behaviour switches for an open container
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GgpkOptions {
    /// Compare names exactly instead of ignoring case
    pub case_sensitive: bool,

    /// The container never grows past this many bytes
    pub max_container_size: u64,
}

impl Default for GgpkOptions {
    fn default() -> Self {
        GgpkOptions {
            case_sensitive: false,
            max_container_size: DEFAULT_MAX_CONTAINER_SIZE,
        }
    }
}

struct State {
    file: GgpkFile,
    header: GgpkHeader,
    free_list: FreeList,
    poisoned: bool,
}

impl State {
    fn editor(&mut self, options: GgpkOptions) -> TreeEditor<'_> {
        TreeEditor::new(
            &mut self.file,
            &mut self.header,
            &mut self.free_list,
            options,
        )
    }
}

/// An open pack container
pub struct Ggpk {
    path: PathBuf,
    options: GgpkOptions,
    state: Mutex<State>,
}

impl Ggpk {
    /// Create an empty container: a header followed by an empty root
    pub fn create<P: AsRef<Path>>(path: P, options: GgpkOptions) -> Result<Self> {
        let mut file = GgpkFile::create(&path)?;

        let header = GgpkHeader::new(HEADER_LENGTH as u64);
        header.write_to(&mut file)?;

        let mut root = DirectoryRecord::new("");
        root.length = root.extent() as u32;
        root.write_at(&mut file, header.root_offset)?;
        file.sync()?;

        info!(path = %path.as_ref().display(), "created container");

        Ok(Ggpk {
            path: path.as_ref().to_path_buf(),
            options,
            state: Mutex::new(State {
                file,
                header,
                free_list: FreeList::new(),
                poisoned: false,
            }),
        })
    }

    /// Open an existing container and rebuild its free-list mirror
    pub fn open<P: AsRef<Path>>(path: P, options: GgpkOptions) -> Result<Self> {
        let mut file = GgpkFile::open(&path)?;
        let header = GgpkHeader::read_from(&mut file)?;
        DirectoryRecord::read_at(&mut file, header.root_offset)?;
        let free_list = FreeList::load(&mut file, &header)?;

        info!(
            path = %path.as_ref().display(),
            size = file.len(),
            free_records = free_list.len(),
            "opened container"
        );

        Ok(Ggpk {
            path: path.as_ref().to_path_buf(),
            options,
            state: Mutex::new(State {
                file,
                header,
                free_list,
                poisoned: false,
            }),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn options(&self) -> GgpkOptions {
        self.options
    }

    /// Snapshot of the header as last written
    pub fn header(&self) -> GgpkHeader {
        self.state.lock().header
    }

    /// Current container length in bytes
    pub fn len(&self) -> u64 {
        self.state.lock().file.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn root(&self) -> Result<DirectoryRecord> {
        let mut state = self.state.lock();
        let root_offset = state.header.root_offset;
        DirectoryRecord::read_at(&mut state.file, root_offset)
    }

    /// Resolve a path; misses are errors
    pub fn lookup(&self, path: &str) -> Result<Node> {
        let mut state = self.state.lock();
        let root_offset = state.header.root_offset;
        tree::resolve(
            &mut state.file,
            root_offset,
            path,
            self.options.case_sensitive,
        )
    }

    /// Resolve a path; misses are `Ok(None)`
    pub fn find(&self, path: &str) -> Result<Option<Node>> {
        match self.lookup(path) {
            Ok(node) => Ok(Some(node)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Resolve a path to a file record; directories and misses are `Ok(None)`
    pub fn find_file(&self, path: &str) -> Result<Option<FileRecord>> {
        Ok(match self.find(path)? {
            Some(Node::File(record)) => Some(record),
            _ => None,
        })
    }

    /// Read the payload at `path`
    pub fn read_file(&self, path: &str) -> Result<Vec<u8>> {
        match self.lookup(path)? {
            Node::File(record) => self.read_record(&record),
            Node::Directory(_) => Err(GgpkError::InvalidPath(format!("{path} is a directory"))),
        }
    }

    /// Read the payload of an already resolved record
    pub fn read_record(&self, record: &FileRecord) -> Result<Vec<u8>> {
        record.read_data(&mut self.state.lock().file)
    }

    /// Children of a directory
    pub fn list(&self, path: &str) -> Result<Vec<Node>> {
        let mut state = self.state.lock();
        let root_offset = state.header.root_offset;
        tree::list(
            &mut state.file,
            root_offset,
            path,
            self.options.case_sensitive,
        )
    }

    /// Every node below a directory, with full paths
    pub fn walk(&self, path: &str) -> Result<Vec<(String, Node)>> {
        let mut state = self.state.lock();
        let root_offset = state.header.root_offset;
        tree::walk(
            &mut state.file,
            root_offset,
            path,
            self.options.case_sensitive,
        )
    }

    /// Run a structural mutation under the lock, poisoning on I/O failure
    fn mutate<T>(&self, op: impl FnOnce(&mut State) -> Result<T>) -> Result<T> {
        let mut state = self.state.lock();
        if state.poisoned {
            return Err(GgpkError::Corrupted(
                "an earlier write failed part way; revalidate before writing".to_string(),
            ));
        }

        let result = op(&mut state);
        if let Err(GgpkError::Io(e)) = &result {
            state.poisoned = true;
            warn!(error = %e, "write failed, container poisoned");
        }
        result
    }

    pub fn add_file(&self, path: &str, data: &[u8]) -> Result<FileRecord> {
        let options = self.options;
        self.mutate(|state| state.editor(options).add_file(path, data))
    }

    pub fn replace_file(&self, path: &str, data: &[u8]) -> Result<FileRecord> {
        let options = self.options;
        self.mutate(|state| state.editor(options).replace_file(path, data))
    }

    /// Add the file, or replace it if it exists
    pub fn write_file(&self, path: &str, data: &[u8]) -> Result<FileRecord> {
        let options = self.options;
        self.mutate(|state| {
            let mut editor = state.editor(options);
            match editor.replace_file(path, data) {
                Err(e) if e.is_not_found() => editor.add_file(path, data),
                other => other,
            }
        })
    }

    pub fn create_dir(&self, path: &str) -> Result<DirectoryRecord> {
        let options = self.options;
        self.mutate(|state| state.editor(options).create_dir(path))
    }

    /// Remove a file or a whole directory
    pub fn remove(&self, path: &str) -> Result<Node> {
        let options = self.options;
        self.mutate(|state| state.editor(options).remove(path))
    }

    /// Claim raw space from the allocator
    pub fn allocate(&self, size: u64) -> Result<Allocation> {
        let limit = self.options.max_container_size;
        self.mutate(|state| {
            state
                .free_list
                .allocate(&mut state.file, &mut state.header, size, limit)
        })
    }

    /// Return raw space to the allocator
    pub fn free(&self, offset: u64, size: u64) -> Result<()> {
        self.mutate(|state| {
            state
                .free_list
                .free(&mut state.file, &mut state.header, offset, size)
        })
    }

    /// Free records in chain order
    pub fn free_records(&self) -> Vec<FreeRecord> {
        self.state.lock().free_list.records().to_vec()
    }

    pub fn free_space(&self) -> FreeSpaceStats {
        self.state.lock().free_list.stats()
    }

    /// Compare the on-disk free chain with the mirror
    pub fn verify_free_list(&self) -> Result<()> {
        let mut state = self.state.lock();
        let State {
            file,
            header,
            free_list,
            ..
        } = &mut *state;
        free_list.verify(file, header)
    }

    /// Parse every reachable record, optionally re-hashing payloads
    pub fn verify_tree(&self, check_digests: bool) -> Result<TreeStats> {
        let mut state = self.state.lock();
        let header = state.header;
        tree::verify_tree(&mut state.file, &header, check_digests)
    }

    /// Re-read header and free chain from disk, check them, and clear the
    /// poisoned flag on success
    pub fn revalidate(&self) -> Result<()> {
        let mut state = self.state.lock();
        let header = GgpkHeader::read_from(&mut state.file)?;
        let free_list = FreeList::load(&mut state.file, &header)?;
        free_list.verify(&mut state.file, &header)?;
        tree::verify_tree(&mut state.file, &header, false)?;

        state.header = header;
        state.free_list = free_list;
        if state.poisoned {
            info!("container revalidated, writes re-enabled");
        }
        state.poisoned = false;
        Ok(())
    }

    pub fn is_poisoned(&self) -> bool {
        self.state.lock().poisoned
    }

    /// Flush and sync all writes to disk
    pub fn sync(&self) -> Result<()> {
        let mut state = self.state.lock();
        state.file.flush()?;
        state.file.sync()?;
        debug!("synced container");
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn poison(&self) {
        self.state.lock().poisoned = true;
    }
}
