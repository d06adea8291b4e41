//! Which pages the cache tries to keep decoded.

use std::ops::Range;

/// How many decoded pages a cache may hold.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CacheBudget {
    /// Keep every page of the document.
    Unlimited,
    /// Keep only the pages on screen.
    Disabled,
    /// Keep at most this many pages (never zero).
    Pages(usize),
}
impl CacheBudget {
    /// Parse the configuration convention: `-1` is unlimited, `0` keeps only
    /// the displayed pages, anything positive is a page count.
    pub fn from_pages(pages: i64) -> Option<Self> {
        match pages {
            -1 => Some(CacheBudget::Unlimited),
            0 => Some(CacheBudget::Disabled),
            n if n > 0 => Some(CacheBudget::Pages(usize::try_from(n).unwrap_or(usize::MAX))),
            _ => None,
        }
    }

    pub fn as_pages(&self) -> i64 {
        match self {
            CacheBudget::Unlimited => -1,
            CacheBudget::Disabled => 0,
            CacheBudget::Pages(n) => i64::try_from(*n).unwrap_or(i64::MAX),
        }
    }
}
impl Default for CacheBudget {
    fn default() -> Self {
        CacheBudget::Pages(7)
    }
}

/// A half-open range of 0-based page indices.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct CacheWindow {
    pub first_wanted: usize,
    pub last_wanted: usize,
}
impl CacheWindow {
    pub const EMPTY: CacheWindow = CacheWindow { first_wanted: 0, last_wanted: 0 };

    /// The window to keep around `current` in a document of `page_count` pages,
    /// with `viewed` pages on screen at once.
    ///
    /// A limited budget keeps up to half of it behind the current page and the
    /// rest ahead, sliding the whole window back when it would run past the end
    /// of the document.
    pub fn compute(current: usize, page_count: usize, viewed: usize, budget: CacheBudget) -> Self {
        if page_count == 0 {
            return Self::EMPTY;
        }
        let current = current.min(page_count - 1);
        match budget {
            CacheBudget::Unlimited => Self::new(0, page_count),
            CacheBudget::Pages(n) if n >= page_count => Self::new(0, page_count),
            CacheBudget::Disabled => Self::new(current, (current + viewed.max(1)).min(page_count)),
            CacheBudget::Pages(n) => {
                let n = n.max(1);
                let behind = current.min((n - 1) / 2);
                let first = current - behind;
                match first + n > page_count {
                    true => Self::new(page_count - n, page_count),
                    false => Self::new(first, first + n),
                }
            },
        }
    }

    fn new(first_wanted: usize, last_wanted: usize) -> Self {
        Self { first_wanted, last_wanted }
    }

    pub fn contains(&self, index: usize) -> bool {
        self.range().contains(&index)
    }

    pub fn len(&self) -> usize {
        self.last_wanted - self.first_wanted
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn range(&self) -> Range<usize> {
        self.first_wanted..self.last_wanted
    }
}
