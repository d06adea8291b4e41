use crate::cache::PageCache;
use crate::error::{ErrorKind, Result};
use crate::extractor::Extractor;
use crate::page::Page;
use crate::tracker::FileTracker;
use crate::Options;
use exn::ResultExt;
use folio_archive::{ArchiveSession, alphanumeric_sort, is_image_name, member_path};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;
use tracing::instrument;

/// An open document: a directory of images or an archive of them.
///
/// Page numbers are 1-based.
pub struct Document {
    // Field order is drop order: stop extracting, then stop decoding, then
    // remove the scratch directory.
    extractor: Option<Extractor>,
    cache: PageCache,
    scratch: Option<TempDir>,
    source: PathBuf,
    names: Vec<String>,
}
impl Document {
    /// Open `path` as a directory or, failing that, as an archive, and go to the first page.
    pub fn open(path: impl AsRef<Path>, options: Options) -> Result<Self> {
        let path = path.as_ref();
        if path.is_dir() {
            return Self::open_directory(path, options);
        }
        let session = ArchiveSession::open(path).or_raise(|| ErrorKind::Archive)?;
        Self::open_archive(session, options)
    }

    #[instrument(skip(options))]
    pub fn open_directory(path: &Path, options: Options) -> Result<Self> {
        let mut names = Vec::new();
        for entry in fs::read_dir(path).or_raise(|| ErrorKind::Open(path.to_path_buf()))? {
            let entry = entry.or_raise(|| ErrorKind::Io)?;
            if !entry.file_type().is_ok_and(|kind| kind.is_file()) {
                continue;
            }
            if let Some(name) = entry.file_name().to_str()
                && is_image_name(name)
            {
                names.push(name.to_string());
            }
        }
        alphanumeric_sort(&mut names);
        let pages = names.iter().map(|name| path.join(name)).collect();
        tracing::info!(pages = names.len(), "Opened directory");
        let cache = PageCache::new(pages, Arc::new(FileTracker::finished()), options);
        Ok(Self::start(path, names, cache, None, None))
    }

    /// Open an archive session; its image members are extracted in the background.
    ///
    /// An archive wrapping a single inner archive (a compressed tarball, say)
    /// shows the inner archive's pages.
    #[instrument(skip_all, fields(archive = %session.path().display()))]
    pub fn open_archive(session: ArchiveSession, options: Options) -> Result<Self> {
        let source = session.path().to_path_buf();
        let scratch = tempfile::Builder::new().prefix("folio.").tempdir().or_raise(|| ErrorKind::Io)?;
        let mut session = session.into_innermost(scratch.path().join(".nested")).or_raise(|| ErrorKind::Archive)?;
        let mut names: Vec<String> = session
            .iter_contents()
            .or_raise(|| ErrorKind::Archive)?
            .filter(|name| is_image_name(name))
            .map(str::to_string)
            .collect();
        alphanumeric_sort(&mut names);
        let mut pages = Vec::with_capacity(names.len());
        names.retain(|name| match member_path(scratch.path(), name) {
            Ok(path) => {
                pages.push(path);
                true
            },
            Err(err) => {
                tracing::warn!(member = %name, error = ?err, "Skipping unsafe member name");
                false
            },
        });
        tracing::info!(pages = names.len(), solid = session.is_solid(), "Opened archive");
        let tracker = Arc::new(FileTracker::new());
        let extractor = Extractor::start(session, names.clone(), scratch.path().to_path_buf(), tracker.clone());
        let cache = PageCache::new(pages, tracker, options);
        Ok(Self::start(&source, names, cache, Some(extractor), Some(scratch)))
    }

    fn start(
        source: &Path,
        names: Vec<String>,
        cache: PageCache,
        extractor: Option<Extractor>,
        scratch: Option<TempDir>,
    ) -> Self {
        let mut document = Self { extractor, cache, scratch, source: source.to_path_buf(), names };
        document.first_page();
        document
    }

    pub fn source(&self) -> &Path {
        &self.source
    }

    pub fn number_of_pages(&self) -> usize {
        self.cache.page_count()
    }

    /// The current page number, or `None` for an empty (or closed) document.
    pub fn current_page(&self) -> Option<usize> {
        self.cache.current().map(|index| index + 1)
    }

    /// Go to `page`. Returns `false` (and stays put) if there is no such page.
    pub fn set_page(&mut self, page: usize) -> bool {
        if page == 0 || page > self.number_of_pages() {
            return false;
        }
        self.cache.set_current(page - 1);
        true
    }

    pub fn next_page(&mut self) -> bool {
        let Some(current) = self.cache.current() else {
            return false;
        };
        let next = current + self.cache.options().step();
        if next >= self.number_of_pages() {
            return false;
        }
        self.cache.set_current(next);
        true
    }

    pub fn previous_page(&mut self) -> bool {
        match self.cache.current() {
            Some(current) if current > 0 => {
                self.cache.set_current(current.saturating_sub(self.cache.options().step()));
                true
            },
            _ => false,
        }
    }

    pub fn first_page(&mut self) -> bool {
        self.set_page(1)
    }

    /// Go to the last page, or the last pair of pages in double page mode.
    pub fn last_page(&mut self) -> bool {
        let count = self.number_of_pages();
        self.set_page(count.saturating_sub(self.cache.options().viewed()) + 1)
    }

    /// The page, blocking until it has been extracted.
    pub fn get_page(&self, page: usize) -> Page {
        match page.checked_sub(1) {
            Some(index) => self.cache.get_page(index),
            None => Page::Missing,
        }
    }

    /// The pages on screen: one, or two in double page mode.
    pub fn current_pages(&self) -> Vec<Page> {
        let Some(current) = self.cache.current() else {
            return Vec::new();
        };
        let last = (current + self.cache.options().viewed()).min(self.number_of_pages());
        (current..last).map(|index| self.cache.get_page(index)).collect()
    }

    /// Member (or file) name of `page`.
    pub fn page_name(&self, page: usize) -> Option<&str> {
        self.names.get(page.checked_sub(1)?).map(String::as_str)
    }

    pub fn page_is_available(&self, page: usize) -> bool {
        page.checked_sub(1).is_some_and(|index| self.cache.page_is_available(index))
    }

    pub fn page_size(&self, page: usize) -> Option<(u32, u32)> {
        self.cache.page_size(page.checked_sub(1)?)
    }

    pub fn mime_name(&self, page: usize) -> Option<String> {
        self.cache.mime_name(page.checked_sub(1)?)
    }

    pub fn cache(&self) -> &PageCache {
        &self.cache
    }

    /// Change display or cache options and refresh the window.
    pub fn set_options(&mut self, options: Options) {
        self.cache.set_options(options);
        self.cache.refresh();
    }

    /// Stop all background work and remove extracted files. Idempotent.
    pub fn close(&mut self) {
        if let Some(mut extractor) = self.extractor.take() {
            extractor.stop();
        }
        self.cache.cleanup();
        if let Some(scratch) = self.scratch.take()
            && let Err(err) = scratch.close()
        {
            tracing::warn!(error = %err, "Could not remove extracted pages");
        }
    }
}
impl Drop for Document {
    fn drop(&mut self) {
        self.close();
    }
}
