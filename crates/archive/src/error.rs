//! Archive Error Types
//!
//! This module provides structured errors using `exn` for automatic location
//! tracking and error tree construction.

use derive_more::{Display, Error};
use std::path::PathBuf;

/// An archive error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for archive operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
///
/// These describe what the caller should *do*, not what went wrong internally.
#[derive(Debug, Display, Error, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    /// The file is not an archive format we know how to open.
    #[display("unsupported archive format: {}", _0.display())]
    UnsupportedFormat(#[error(not(source))] PathBuf),
    /// The archive header is encrypted and the password was missing or wrong.
    /// Ask the user for a different password before trying again.
    #[display("encrypted archive: missing or wrong password")]
    Encrypted,
    /// The archive tool could not be run to produce a listing.
    #[display("could not list archive contents")]
    Listing,
    /// The archive stream ended before every requested member was written.
    #[display("extracted {produced} of {wanted} requested members")]
    PartialExtraction { wanted: usize, produced: usize },
    /// A member name would escape the extraction directory.
    #[display("invalid member path: {_0}")]
    InvalidMember(#[error(not(source))] String),
    /// An I/O operation failed.
    #[display("I/O error")]
    Io,
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ErrorKind::Io | ErrorKind::Listing)
    }
}
