//! Extraction progress, shared between the thread extracting pages and the
//! threads waiting to read them.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};

#[derive(Debug, Default)]
struct TrackerState {
    available: HashSet<PathBuf>,
    finished: bool,
}

/// Records which extracted files are complete on disk.
///
/// Readers block in [`wait_for`](Self::wait_for) until the extractor reports
/// their file, or reports that it is done (successfully or not).
#[derive(Debug, Default)]
pub struct FileTracker {
    state: Mutex<TrackerState>,
    changed: Condvar,
}
impl FileTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// A tracker for files that are already on disk, such as the pages of a
    /// plain directory.
    pub fn finished() -> Self {
        let tracker = Self::new();
        tracker.finish();
        tracker
    }

    fn lock(&self) -> MutexGuard<'_, TrackerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn mark_available(&self, path: impl Into<PathBuf>) {
        self.lock().available.insert(path.into());
        self.changed.notify_all();
    }

    /// No more files will be reported; wake everyone still waiting.
    pub fn finish(&self) {
        self.lock().finished = true;
        self.changed.notify_all();
    }

    pub fn is_finished(&self) -> bool {
        self.lock().finished
    }

    /// Whether `path` is complete on disk right now.
    pub fn is_available(&self, path: &Path) -> bool {
        let state = self.lock();
        state.available.contains(path) || (state.finished && path.exists())
    }

    /// Block until `path` is reported or extraction has ended, then return
    /// whether the file is there.
    pub fn wait_for(&self, path: &Path) -> bool {
        let state = self
            .changed
            .wait_while(self.lock(), |state| !state.available.contains(path) && !state.finished)
            .unwrap_or_else(PoisonError::into_inner);
        state.available.contains(path) || path.exists()
    }
}
