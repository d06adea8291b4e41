//! Discovery of external archive executables.
//!
//! Lookups are memoized for the lifetime of the process, including negative
//! results: a system without the tool pays for the `PATH` search only once.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{LazyLock, Mutex, PoisonError};

static DISCOVERED: LazyLock<Mutex<HashMap<Tool, Option<PathBuf>>>> = LazyLock::new(Default::default);

/// An external program the archive backends can delegate to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Tool {
    /// The 7-Zip command line tool (or one of its ports).
    SevenZip,
}
impl Tool {
    /// Executable names to try, in order of preference.
    pub fn candidates(&self) -> &'static [&'static str] {
        match self {
            Tool::SevenZip => &["7z", "7zz", "7za"],
        }
    }

    /// Path to the tool's executable, or `None` when it isn't installed.
    ///
    /// The first call per tool searches `PATH`; later calls (from any thread)
    /// return the remembered answer.
    pub fn find(&self) -> Option<PathBuf> {
        let mut discovered = DISCOVERED.lock().unwrap_or_else(PoisonError::into_inner);
        discovered.entry(*self).or_insert_with(|| self.discover()).clone()
    }

    fn discover(&self) -> Option<PathBuf> {
        for exe in self.candidates() {
            if let Ok(path) = which::which(exe) {
                tracing::debug!(tool = ?self, path = %path.display(), "Discovered archive executable");
                return Some(path);
            }
        }
        tracing::info!(tool = ?self, "Archive executable not found in PATH; archives will appear empty");
        None
    }
}
