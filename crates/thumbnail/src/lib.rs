//! Persistent thumbnails for images and comic book archives.
//!
//! Thumbnails live in a per-user cache directory, one PNG per source, named
//! by a hash of the source's `file://` URI ([`ContentAddress`]). Each PNG
//! records the source's modification time; a thumbnail whose recorded time no
//! longer matches is regenerated. The thumbnail of an archive is made from
//! its cover, chosen with [`guess_cover`] and extracted on its own.

mod address;
mod cache;
mod cover;
pub mod error;
mod record;

pub use crate::address::ContentAddress;
pub use crate::cache::{NORMAL_SIZE, Origin, Thumbnail, ThumbnailCache};
pub use crate::cover::guess_cover;
pub use crate::record::ThumbnailRecord;
