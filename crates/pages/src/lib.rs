//! Pages of an open document, decoded ahead of the reader.
//!
//! A [`Document`] is a directory of images or an archive. Archive pages are
//! extracted in the background into a scratch directory ([`Extractor`]),
//! progress is published through a [`FileTracker`], and a [`PageCache`] keeps
//! a window of decoded pages around the reading position, filled by its own
//! worker thread.
//!
//! Reading a page never fails: [`PageCache::get_page`] blocks until the page
//! file exists and returns [`Page::Missing`] for anything that can't be
//! decoded, which renders as the shared [`placeholder`].

mod cache;
mod document;
pub mod error;
mod extractor;
mod page;
mod tracker;
mod window;

pub use crate::cache::{PageCache, Refresh};
pub use crate::document::Document;
pub use crate::extractor::Extractor;
pub use crate::page::{Page, decode, dimensions, format_name, placeholder};
pub use crate::tracker::FileTracker;
pub use crate::window::{CacheBudget, CacheWindow};

/// How pages are shown and how many are kept decoded.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Options {
    pub budget: CacheBudget,
    /// Two pages are on screen at once.
    pub double_page: bool,
    /// In double page mode, move two pages at a time.
    pub double_step: bool,
}
impl Default for Options {
    fn default() -> Self {
        Self { budget: CacheBudget::default(), double_page: false, double_step: true }
    }
}
impl Options {
    /// Number of pages on screen at once.
    pub fn viewed(&self) -> usize {
        match self.double_page {
            true => 2,
            false => 1,
        }
    }

    /// Pages moved by one step forward or back.
    pub fn step(&self) -> usize {
        match self.double_page && self.double_step {
            true => 2,
            false => 1,
        }
    }
}
