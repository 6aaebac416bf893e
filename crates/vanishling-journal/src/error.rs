use std::io;
use std::path::PathBuf;

/// Errors produced by the journal.
#[derive(Debug, thiserror::Error)]
pub enum JournalError {
    /// I/O error while appending, scanning, or compacting.
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    /// A line that does not decode to an entry. `line` is 1-based, or 0 when
    /// the text was parsed outside a file scan.
    #[error("malformed journal line {line}: {reason}")]
    Malformed { line: usize, reason: String },

    /// A path that cannot be represented on a single journal line.
    #[error("path cannot be journaled: {0}")]
    InvalidPath(PathBuf),
}

/// Convenience alias used throughout the journal crate.
pub type JournalResult<T> = std::result::Result<T, JournalError>;
