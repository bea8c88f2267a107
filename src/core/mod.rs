//! Storage engine for GGPK pack containers
//!
//! - [`error`] - Error types
//! - [`io`] - Offset-addressed file access
//! - [`header`] - The `GGPK` header record
//! - [`record`] - Directory, file and free records
//! - [`allocator`] - Free-space allocator over the on-disk free chain
//! - [`tree`] - Path resolution and structural edits
//! - [`ggpk`] - Locked container handle tying the above together
//! - [`hash`] - Path and name hashes
//! - [`index`] - Bundle index
//! - [`bundle`] / [`compression`] - Bundle blobs and codecs
//! - [`format`] - Content type detection
//!
//! ## Layout
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │ GGPK header (28 bytes)                      │
//! │  - version, root offset, first free offset  │
//! ├─────────────────────────────────────────────┤
//! │ Records, in any order                       │
//! │  - PDIR: name + (name hash, offset) entries │
//! │  - FILE: name + SHA-256 + payload           │
//! │  - FREE: reclaimed range, next free offset  │
//! └─────────────────────────────────────────────┘
//! ```

pub mod allocator;
pub mod bundle;
pub mod compression;
pub mod error;
pub mod format;
pub mod ggpk;
pub mod hash;
pub mod header;
pub mod index;
pub mod io;
pub mod record;
pub mod tree;

pub use allocator::{Allocation, FreeList, FreeSpaceStats};
pub use bundle::{BundleCodec, BundleWriter, ContainerBundles, DirectoryBundles};
pub use error::{GgpkError, Result};
pub use format::DataFormat;
pub use ggpk::{Ggpk, GgpkOptions};
pub use header::GgpkHeader;
pub use index::{BundleIndex, BundleInfo, BundleLocation, IndexBuilder};
pub use record::{DirectoryRecord, FileRecord, FreeRecord, Node, Record};
pub use tree::TreeStats;
