//! Archive access for comic book files.
//!
//! An [`ArchiveSession`] wraps one archive on disk and offers three things:
//!
//! - **Listing** of the non-empty members ([`ArchiveSession::iter_contents`]),
//!   parsed from the technical listing of an external archive tool, or read
//!   from the tar headers
//! - **Single extraction** of one member into a directory
//!   ([`ArchiveSession::extract_one`])
//! - **Streaming extraction** of many members in archive order
//!   ([`ArchiveSession::extract_many`]), which reads the whole archive as one
//!   byte stream and splits it by the listed sizes
//!
//! Encrypted archives are retried exactly once with a password, either one
//! supplied up front or one obtained from a [`PasswordPrompt`]. When the
//! archive tool is not installed, zip, rar and 7z archives appear empty
//! instead of failing. Tarballs and bare compressed streams (`.gz`, `.bz2`,
//! ...) are read in-process and never need the external tool. A compressed
//! tarball lists as one stream; [`ArchiveSession::into_innermost`] opens the
//! tarball inside it.

mod backend;
pub mod error;
pub mod executable;
mod kind;
pub mod listing;
mod names;
mod path;
mod session;

pub use crate::backend::ExtractMany;
pub use crate::kind::{ArchiveKind, Compression, is_archive};
pub use crate::names::{alphanumeric_sort, is_image_name};
pub use crate::path::member_path;
pub use crate::session::{ArchiveSession, PasswordPrompt, SOLID_STREAM_NAME};

/// A non-empty member of an archive, in listing order.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ArchiveEntry {
    /// Member name, relative to the archive root.
    pub name: String,
    /// Uncompressed size in bytes, as reported by the listing. Zero for the
    /// decoded contents of a bare compressed file, which isn't known up front.
    pub size: u64,
}
impl ArchiveEntry {
    pub fn new(name: impl Into<String>, size: u64) -> Self {
        Self { name: name.into(), size }
    }
}
