use std::io;
use std::path::PathBuf;

use sstable::SSTableError;
use thiserror::Error;
use wal::WalError;

/// Errors surfaced by [`Engine`](crate::Engine) operations.
///
/// A missing key is not an error: lookups return `Ok(None)`.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    /// The WAL holds a damaged record that is not a torn tail.
    #[error("corrupt wal: {0}")]
    CorruptRecord(WalError),

    /// An SSTable failed validation. Reads touching it fail rather than skip
    /// its data.
    #[error("corrupt sstable {}: {reason}", path.display())]
    CorruptSSTable { path: PathBuf, reason: String },

    #[error("manifest error: {0}")]
    Manifest(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("sequence number overflow (u64::MAX reached)")]
    SequenceOverflow,

    #[error("engine is closed")]
    Closed,

    #[error(transparent)]
    Config(#[from] config::ConfigError),
}

pub type Result<T> = std::result::Result<T, EngineError>;

impl From<WalError> for EngineError {
    fn from(e: WalError) -> Self {
        match e {
            WalError::Io(io) => EngineError::Io(io),
            WalError::RecordTooLarge(n) => EngineError::InvalidArgument(format!("record too large: {} bytes", n)),
            other => EngineError::CorruptRecord(other),
        }
    }
}

impl From<SSTableError> for EngineError {
    fn from(e: SSTableError) -> Self {
        match e {
            SSTableError::Io(io) => EngineError::Io(io),
            SSTableError::Corrupt { path, reason } => EngineError::CorruptSSTable { path, reason },
            // Empty and KeyOrder are caller bugs inside the engine
            other => EngineError::Io(io::Error::other(other.to_string())),
        }
    }
}
