//! Windowed cache of decoded pages, filled by a background worker.
//!
//! The foreground thread owns the window: every navigation recomputes it,
//! evicts whatever fell out, and hands the new window to the worker. The
//! worker decodes the window's pages in ascending order into the shared
//! resident map, dropping any the window has left by then. Only one fill pass
//! runs at a time; a window computed while a pass is running waits for the
//! next [`refresh`](PageCache::refresh).

use crate::Options;
use crate::page::{self, Page};
use crate::tracker::FileTracker;
use crate::window::CacheWindow;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio_util::sync::CancellationToken;

/// What a window recomputation did.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Refresh {
    /// Same window as last time, and it was already handed to the worker.
    Unchanged,
    /// A fill pass for this window was handed to the worker.
    Dispatched(CacheWindow),
    /// The worker is still busy with an earlier pass; this window is filled
    /// by a later refresh.
    Deferred(CacheWindow),
}

/// Decoded pages, and the window the foreground last asked for. Kept under
/// one lock so a fill pass can't insert a page the window has just left.
#[derive(Default)]
struct Resident {
    pages: HashMap<usize, Page>,
    window: Option<CacheWindow>,
}

/// State shared with the worker thread.
struct Shared {
    pages: Vec<PathBuf>,
    tracker: Arc<FileTracker>,
    resident: Mutex<Resident>,
}
impl Shared {
    fn new(pages: Vec<PathBuf>, tracker: Arc<FileTracker>) -> Self {
        Self { pages, tracker, resident: Mutex::new(Resident::default()) }
    }

    fn resident(&self) -> MutexGuard<'_, Resident> {
        self.resident.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Return the resident page, or wait for its file, decode it and make it resident.
    fn load(&self, index: usize) -> Page {
        if let Some(page) = self.resident().pages.get(&index) {
            return page.clone();
        }
        let page = self.decode(index);
        self.resident().pages.entry(index).or_insert(page).clone()
    }

    /// Decode `index` for a fill pass. Skipped, or thrown away once decoded,
    /// if the window no longer covers it.
    fn prefetch(&self, index: usize) {
        {
            let resident = self.resident();
            if resident.pages.contains_key(&index) || !resident.window.is_some_and(|window| window.contains(index)) {
                return;
            }
        }
        let page = self.decode(index);
        let mut resident = self.resident();
        match resident.window.is_some_and(|window| window.contains(index)) {
            true => {
                resident.pages.entry(index).or_insert(page);
            },
            false => tracing::trace!(index, "Window moved on; dropping decoded page"),
        }
    }

    /// Wait for the page file and decode it.
    fn decode(&self, index: usize) -> Page {
        let Some(path) = self.pages.get(index) else {
            return Page::Missing;
        };
        match self.tracker.wait_for(path) {
            true => Page::load(path),
            false => {
                tracing::warn!(index, path = %path.display(), "Page was never extracted; showing placeholder");
                Page::Missing
            },
        }
    }
}

struct Worker {
    passes: mpsc::Sender<CacheWindow>,
    token: CancellationToken,
    handle: JoinHandle<()>,
}
impl Worker {
    fn spawn(shared: Arc<Shared>, busy: Arc<AtomicBool>) -> std::io::Result<Self> {
        let (passes, receiver) = mpsc::channel(1);
        let token = CancellationToken::new();
        let worker_token = token.clone();
        let handle = thread::Builder::new()
            .name("folio-pages".to_string())
            .spawn(move || fill(&shared, receiver, &busy, &worker_token))?;
        Ok(Self { passes, token, handle })
    }

    fn shutdown(self) {
        self.token.cancel();
        drop(self.passes);
        if self.handle.join().is_err() {
            tracing::error!("Page cache worker panicked");
        }
    }
}

fn fill(shared: &Shared, mut passes: mpsc::Receiver<CacheWindow>, busy: &AtomicBool, token: &CancellationToken) {
    while let Some(window) = passes.blocking_recv() {
        tracing::trace!(?window, "Filling page cache");
        for index in window.range() {
            if token.is_cancelled() {
                break;
            }
            shared.prefetch(index);
        }
        busy.store(false, Ordering::Release);
        if token.is_cancelled() {
            break;
        }
    }
}

/// Decoded pages of one document, kept around the current reading position.
///
/// Page indices are 0-based.
pub struct PageCache {
    shared: Arc<Shared>,
    options: Options,
    current: Option<usize>,
    window: Option<CacheWindow>,
    dispatched: Option<CacheWindow>,
    busy: Arc<AtomicBool>,
    worker: Option<Worker>,
}
impl PageCache {
    /// A cache over the page files in `pages`, whose extraction progress is
    /// reported through `tracker`. No thread is started until the first refresh.
    pub fn new(pages: Vec<PathBuf>, tracker: Arc<FileTracker>, options: Options) -> Self {
        Self {
            shared: Arc::new(Shared::new(pages, tracker)),
            options,
            current: None,
            window: None,
            dispatched: None,
            busy: Arc::new(AtomicBool::new(false)),
            worker: None,
        }
    }

    pub fn page_count(&self) -> usize {
        self.shared.pages.len()
    }

    pub fn options(&self) -> Options {
        self.options
    }

    /// Change the options; takes effect on the next refresh.
    pub fn set_options(&mut self, options: Options) {
        self.options = options;
    }

    pub fn current(&self) -> Option<usize> {
        self.current
    }

    pub fn window(&self) -> Option<CacheWindow> {
        self.window
    }

    /// Whether a fill pass is running.
    pub fn is_caching(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    pub fn is_resident(&self, index: usize) -> bool {
        self.shared.resident().pages.contains_key(&index)
    }

    pub fn resident_count(&self) -> usize {
        self.shared.resident().pages.len()
    }

    pub fn page_path(&self, index: usize) -> Option<&Path> {
        self.shared.pages.get(index).map(PathBuf::as_path)
    }

    /// Move to `index` (clamped to the document) and refresh the window.
    pub fn set_current(&mut self, index: usize) -> Refresh {
        self.current = Some(index.min(self.page_count().saturating_sub(1)));
        self.refresh()
    }

    /// Recompute the window around the current page.
    ///
    /// Idempotent: with no change in position, budget or worker state nothing
    /// is evicted and no pass is started.
    pub fn refresh(&mut self) -> Refresh {
        let Some(current) = self.current else {
            return Refresh::Unchanged;
        };
        let window = CacheWindow::compute(current, self.page_count(), self.options.viewed(), self.options.budget);
        if self.window == Some(window) && self.dispatched == Some(window) {
            return Refresh::Unchanged;
        }
        self.window = Some(window);
        {
            let mut resident = self.shared.resident();
            resident.window = Some(window);
            let before = resident.pages.len();
            resident.pages.retain(|index, _| window.contains(*index));
            tracing::trace!(?window, evicted = before - resident.pages.len(), "Page cache window refreshed");
        }
        if self.busy.swap(true, Ordering::AcqRel) {
            tracing::debug!(?window, "Page cache worker busy; deferring fill");
            return Refresh::Deferred(window);
        }
        match self.dispatch(window) {
            true => {
                self.dispatched = Some(window);
                Refresh::Dispatched(window)
            },
            false => {
                self.busy.store(false, Ordering::Release);
                Refresh::Deferred(window)
            },
        }
    }

    fn dispatch(&mut self, window: CacheWindow) -> bool {
        if self.worker.is_none() {
            match Worker::spawn(self.shared.clone(), self.busy.clone()) {
                Ok(worker) => self.worker = Some(worker),
                Err(err) => {
                    tracing::error!(error = %err, "Could not start page cache worker");
                    return false;
                },
            }
        }
        let Some(worker) = self.worker.as_ref() else {
            return false;
        };
        match worker.passes.try_send(window) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => false,
            Err(TrySendError::Closed(_)) => {
                tracing::warn!("Page cache worker exited; restarting on next refresh");
                if let Some(worker) = self.worker.take() {
                    worker.shutdown();
                }
                false
            },
        }
    }

    /// The page at `index`, blocking until its file has been extracted.
    ///
    /// Never fails: anything that can't be decoded is [`Page::Missing`], and
    /// that answer is remembered.
    pub fn get_page(&self, index: usize) -> Page {
        self.shared.load(index)
    }

    /// Whether the file for `index` is on disk (decoded or not).
    pub fn page_is_available(&self, index: usize) -> bool {
        self.page_path(index).is_some_and(|path| self.shared.tracker.is_available(path))
    }

    /// Pixel dimensions of the page, if known without waiting.
    pub fn page_size(&self, index: usize) -> Option<(u32, u32)> {
        if let Some(Page::Decoded(image)) = self.shared.resident().pages.get(&index) {
            return Some((image.width(), image.height()));
        }
        match self.page_is_available(index) {
            true => page::dimensions(self.page_path(index)?).ok(),
            false => None,
        }
    }

    /// Format name of the page (`PNG`, `JPEG`, ...), if its file is available.
    pub fn mime_name(&self, index: usize) -> Option<String> {
        match self.page_is_available(index) {
            true => page::format_name(self.page_path(index)?).ok(),
            false => None,
        }
    }

    /// Stop the worker and forget everything.
    ///
    /// Anyone still waiting on page files is released (the document is going
    /// away). The worker finishes the page it is decoding, if any.
    pub fn cleanup(&mut self) {
        self.shared.tracker.finish();
        if let Some(worker) = self.worker.take() {
            worker.shutdown();
        }
        self.busy.store(false, Ordering::Release);
        {
            let mut resident = self.shared.resident();
            resident.pages.clear();
            resident.window = None;
        }
        self.current = None;
        self.window = None;
        self.dispatched = None;
    }

    /// Clean up, then start over with a different document.
    pub fn reset(&mut self, pages: Vec<PathBuf>, tracker: Arc<FileTracker>) {
        self.cleanup();
        self.shared = Arc::new(Shared::new(pages, tracker));
    }
}
impl Drop for PageCache {
    fn drop(&mut self) {
        self.cleanup();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::CacheBudget;
    use image::{Rgba, RgbaImage};
    use std::time::{Duration, Instant};
    use tempfile::TempDir;

    fn document(pages: usize) -> (TempDir, Vec<PathBuf>) {
        let dir = tempfile::tempdir().unwrap();
        let paths = (0..pages)
            .map(|index| {
                let path = dir.path().join(format!("{index:03}.png"));
                RgbaImage::from_pixel(4 + index as u32, 4, Rgba([0, 0, 0, 255])).save(&path).unwrap();
                path
            })
            .collect();
        (dir, paths)
    }

    fn options(pages: usize) -> Options {
        Options { budget: CacheBudget::Pages(pages), ..Options::default() }
    }

    fn wait_idle(cache: &PageCache) {
        let deadline = Instant::now() + Duration::from_secs(10);
        while cache.is_caching() {
            assert!(Instant::now() < deadline, "page cache worker never went idle");
            thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn test_fills_window_then_is_idempotent() {
        let (_dir, pages) = document(10);
        let mut cache = PageCache::new(pages, Arc::new(FileTracker::finished()), options(3));
        let window = match cache.set_current(4) {
            Refresh::Dispatched(window) => window,
            other => panic!("expected a dispatch, got {other:?}"),
        };
        assert_eq!(window.range(), 3..6);
        wait_idle(&cache);
        assert_eq!(cache.resident_count(), 3);
        assert!((3..6).all(|index| cache.is_resident(index)));
        assert_eq!(cache.refresh(), Refresh::Unchanged);
        assert_eq!(cache.set_current(4), Refresh::Unchanged);
        assert!(!cache.is_caching());
    }

    #[test]
    fn test_moving_evicts_outside_window() {
        let (_dir, pages) = document(10);
        let mut cache = PageCache::new(pages, Arc::new(FileTracker::finished()), options(3));
        cache.set_current(0);
        wait_idle(&cache);
        assert!((0..3).all(|index| cache.is_resident(index)));
        cache.set_current(9);
        assert!((0..3).all(|index| !cache.is_resident(index)));
        wait_idle(&cache);
        assert_eq!(cache.window().unwrap().range(), 7..10);
        assert!((7..10).all(|index| cache.is_resident(index)));
    }

    #[test]
    fn test_busy_worker_defers_then_dispatches() {
        let (_dir, pages) = document(10);
        let tracker = Arc::new(FileTracker::new());
        let mut cache = PageCache::new(pages, tracker.clone(), options(3));
        // The first pass blocks on page files that are never reported...
        assert!(matches!(cache.set_current(0), Refresh::Dispatched(_)));
        assert!(matches!(cache.set_current(5), Refresh::Deferred(_)));
        assert!(matches!(cache.refresh(), Refresh::Deferred(_)));
        // ...until extraction ends.
        tracker.finish();
        wait_idle(&cache);
        // The stale pass targeted pages 0..3, which the window has since left.
        assert_eq!(cache.resident_count(), 0);
        let window = match cache.refresh() {
            Refresh::Dispatched(window) => window,
            other => panic!("expected a dispatch, got {other:?}"),
        };
        assert_eq!(window.range(), 4..7);
        wait_idle(&cache);
        assert!((4..7).all(|index| cache.is_resident(index)));
        assert!((0..3).all(|index| !cache.is_resident(index)));
        assert_eq!(cache.refresh(), Refresh::Unchanged);
    }

    #[test]
    fn test_get_page_waits_for_extraction() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("late.png");
        let tracker = Arc::new(FileTracker::new());
        let cache = PageCache::new(vec![path.clone()], tracker.clone(), Options::default());
        let extractor = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            RgbaImage::from_pixel(8, 6, Rgba([255, 0, 0, 255])).save(&path).unwrap();
            tracker.mark_available(path);
        });
        let page = cache.get_page(0);
        extractor.join().unwrap();
        assert_eq!(page.image().map(|image| (image.width(), image.height())), Some((8, 6)));
        assert_eq!(cache.page_size(0), Some((8, 6)));
        assert_eq!(cache.mime_name(0).as_deref(), Some("PNG"));
    }

    #[test]
    fn test_undecodable_page_is_remembered_as_missing() {
        let (dir, mut pages) = document(1);
        let broken = dir.path().join("broken.jpg");
        std::fs::write(&broken, b"not a jpeg").unwrap();
        pages.push(broken);
        let cache = PageCache::new(pages, Arc::new(FileTracker::finished()), Options::default());
        assert!(cache.get_page(1).is_missing());
        assert!(cache.is_resident(1));
        assert!(cache.get_page(99).is_missing());
        assert!(!cache.get_page(0).is_missing());
    }

    #[test]
    fn test_cleanup_resets() {
        let (_dir, pages) = document(4);
        let options = Options { budget: CacheBudget::Unlimited, ..Options::default() };
        let mut cache = PageCache::new(pages, Arc::new(FileTracker::finished()), options);
        cache.set_current(1);
        wait_idle(&cache);
        assert_eq!(cache.resident_count(), 4);
        cache.cleanup();
        assert_eq!(cache.resident_count(), 0);
        assert_eq!(cache.window(), None);
        assert_eq!(cache.current(), None);
        assert!(!cache.is_caching());

        let (_other, pages) = document(2);
        cache.reset(pages, Arc::new(FileTracker::finished()));
        assert_eq!(cache.page_count(), 2);
        assert!(matches!(cache.set_current(0), Refresh::Dispatched(_)));
    }

    #[test]
    fn test_cleanup_releases_blocked_worker() {
        let (_dir, pages) = document(3);
        let mut cache = PageCache::new(pages, Arc::new(FileTracker::new()), options(3));
        cache.set_current(0);
        // Would hang forever if the worker stayed blocked on the tracker.
        cache.cleanup();
        assert!(!cache.is_caching());
    }
}
