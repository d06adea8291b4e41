use crate::tracker::FileTracker;
use folio_archive::{ArchiveSession, member_path};
use std::path::PathBuf;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tokio_util::sync::CancellationToken;

/// Background extraction of a document's pages into a scratch directory.
///
/// Runs one streaming pass over the archive on its own thread, reporting each
/// page to the [`FileTracker`] as soon as it is written. The tracker is always
/// finished when the pass ends, however it ends, so nobody waits forever.
pub struct Extractor {
    token: CancellationToken,
    handle: Option<JoinHandle<()>>,
}
impl Extractor {
    pub fn start(session: ArchiveSession, names: Vec<String>, destination: PathBuf, tracker: Arc<FileTracker>) -> Self {
        let token = CancellationToken::new();
        let worker_token = token.clone();
        let worker_tracker = tracker.clone();
        let spawned = thread::Builder::new()
            .name("folio-extract".to_string())
            .spawn(move || run(session, names, destination, &worker_tracker, &worker_token));
        let handle = match spawned {
            Ok(handle) => Some(handle),
            Err(err) => {
                tracing::error!(error = %err, "Could not start extraction thread");
                tracker.finish();
                None
            },
        };
        Self { token, handle }
    }

    /// Stop after the member being written, and wait for the thread to exit.
    pub fn stop(&mut self) {
        self.token.cancel();
        if let Some(handle) = self.handle.take()
            && handle.join().is_err()
        {
            tracing::error!("Extraction thread panicked");
        }
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|handle| !handle.is_finished())
    }
}
impl Drop for Extractor {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run(
    mut session: ArchiveSession,
    names: Vec<String>,
    destination: PathBuf,
    tracker: &FileTracker,
    token: &CancellationToken,
) {
    match session.extract_many(&names, &destination) {
        Ok(extracted) => {
            for result in extracted {
                if token.is_cancelled() {
                    tracing::debug!("Extraction cancelled");
                    break;
                }
                match result.map(|name| member_path(&destination, &name)) {
                    Ok(Ok(path)) => tracker.mark_available(path),
                    Ok(Err(err)) | Err(err) => {
                        tracing::warn!(archive = %session.path().display(), error = ?err, "Extraction incomplete")
                    },
                }
            }
        },
        Err(err) => tracing::warn!(archive = %session.path().display(), error = ?err, "Could not extract archive"),
    }
    tracker.finish();
}
