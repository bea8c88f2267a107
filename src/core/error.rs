use crate::core::format::DataFormat;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum GgpkError {
    #[error("Malformed record at offset {offset}: {reason}")]
    MalformedRecord { offset: u64, reason: String },

    #[error("Invalid magic number in header")]
    InvalidMagic,

    #[error("Unsupported format version: {0}")]
    UnsupportedVersion(u32),

    #[error("Path not found: {0}")]
    PathNotFound(String),

    #[error("Not a directory: {0}")]
    NotADirectory(String),

    #[error("Path already exists: {0}")]
    AlreadyExists(String),

    #[error("Invalid path: {0}")]
    InvalidPath(String),

    #[error("File not found in any source: {0}")]
    FileNotFound(String),

    #[error("Unsupported format {found:?} for {path}")]
    UnsupportedFormat { path: String, found: DataFormat },

    #[error("Bundle index hash collision for {path} (hash {hash:#018x})")]
    IndexCollision { path: String, hash: u64 },

    #[error("Malformed bundle index: {0}")]
    MalformedIndex(String),

    #[error("Allocation exhausted: cannot grow container for {requested} bytes")]
    AllocationExhausted { requested: u64 },

    #[error("Invalid free range at offset {offset} ({length} bytes): {reason}")]
    InvalidRange {
        offset: u64,
        length: u64,
        reason: String,
    },

    #[error("Container is corrupted: {0}")]
    Corrupted(String),

    #[error("Codec error: {0}")]
    Codec(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl GgpkError {
    pub(crate) fn malformed(offset: u64, reason: impl Into<String>) -> Self {
        GgpkError::MalformedRecord {
            offset,
            reason: reason.into(),
        }
    }

    /// Whether a batch caller can skip the failing item and keep going.
    ///
    /// Lookup misses, codec failures, format mismatches and a single damaged
    /// record only affect one path. Anything that says the container state
    /// or the index as a whole is broken is not recoverable.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            GgpkError::PathNotFound(_)
                | GgpkError::NotADirectory(_)
                | GgpkError::FileNotFound(_)
                | GgpkError::UnsupportedFormat { .. }
                | GgpkError::IndexCollision { .. }
                | GgpkError::Codec(_)
                | GgpkError::InvalidPath(_)
                | GgpkError::MalformedRecord { .. }
        )
    }

    /// Tree walk misses that should fall through to the next lookup source.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            GgpkError::PathNotFound(_) | GgpkError::NotADirectory(_) | GgpkError::FileNotFound(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, GgpkError>;
