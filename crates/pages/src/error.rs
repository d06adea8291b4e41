//! Page Error Types
//!
//! This module provides structured errors using `exn` for automatic location
//! tracking and error tree construction.

use derive_more::{Display, Error};
use std::path::PathBuf;

/// A page error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for page operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
///
/// These describe what the caller should *do*, not what went wrong internally.
#[derive(Debug, Display, Error, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    /// The document could not be opened as a directory or an archive.
    #[display("cannot open document: {}", _0.display())]
    Open(#[error(not(source))] PathBuf),
    /// The archive layer failed; the wrapped error says how.
    #[display("archive error")]
    Archive,
    /// The page file is corrupt or not an image format we can decode.
    #[display("cannot decode page: {}", _0.display())]
    Decode(#[error(not(source))] PathBuf),
    /// An I/O operation failed.
    #[display("I/O error")]
    Io,
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ErrorKind::Io)
    }
}
