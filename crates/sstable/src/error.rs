use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Errors produced while building or reading SSTables.
#[derive(Debug, Error)]
pub enum SSTableError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    /// The file failed validation. Readers must not serve data from it.
    #[error("corrupt sstable {}: {reason}", path.display())]
    Corrupt { path: PathBuf, reason: String },

    /// A table with zero entries was requested.
    #[error("refusing to write an empty sstable")]
    Empty,

    /// Keys were not supplied in strictly ascending order.
    #[error("keys must be added in strictly ascending order")]
    KeyOrder,
}

pub type Result<T> = std::result::Result<T, SSTableError>;
