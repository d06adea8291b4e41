//! Archive backends.
//!
//! Multi-member archives go through the external archive tool; tarballs,
//! compressed tarballs and bare compressed files are read in-process. All of
//! them expose the same three operations, selected by [`ArchiveKind`].

mod sevenzip;
mod stream;
mod tarball;

use crate::error::{ErrorKind, Result};
use crate::executable::Tool;
use crate::listing::{EncryptedHeader, Listing};
use crate::{ArchiveEntry, ArchiveKind, member_path};
use exn::ResultExt;
use std::collections::{HashMap, HashSet};
use std::fs::{self, File};
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::process::Child;

/// One listing attempt: either a listing, or a request for a (different) password.
pub(crate) type Attempt = std::result::Result<Listing, EncryptedHeader>;

impl ArchiveKind {
    /// List the archive. Whole-stream kinds report exactly one member, named `synthetic`
    /// for compressed tarballs and after the file itself for bare compressed files.
    pub(crate) fn list(&self, archive: &Path, password: Option<&str>, synthetic: &str) -> Result<Attempt> {
        match self {
            ArchiveKind::Generic => match Tool::SevenZip.find() {
                Some(executable) => sevenzip::list(&executable, archive, password),
                None => Ok(Ok(Listing::default())),
            },
            ArchiveKind::Tar => tarball::list(archive).map(Ok),
            ArchiveKind::Solid(_) => Ok(Ok(whole_stream(synthetic))),
            ArchiveKind::Stream(_) => Ok(Ok(whole_stream(stream::inner_name(archive)))),
        }
    }

    /// Extract `name` to `target`. Whole-stream kinds ignore the name.
    pub(crate) fn extract_one(&self, archive: &Path, name: &str, target: &Path, password: Option<&str>) -> Result<()> {
        match self {
            ArchiveKind::Generic => match Tool::SevenZip.find() {
                Some(executable) => sevenzip::extract_one(&executable, archive, name, target, password),
                None => Ok(()),
            },
            ArchiveKind::Tar => tarball::extract_one(archive, name, target),
            ArchiveKind::Solid(compression) | ArchiveKind::Stream(compression) => {
                stream::decode_to(archive, *compression, target)
            },
        }
    }

    /// Open the archive as one byte stream, or `None` when no tool can read it.
    pub(crate) fn open_stream(&self, archive: &Path, password: Option<&str>) -> Result<Option<Source>> {
        match self {
            ArchiveKind::Generic => match Tool::SevenZip.find() {
                Some(executable) => sevenzip::spawn(&executable, archive, password).map(Some),
                None => Ok(None),
            },
            ArchiveKind::Tar => tarball::open(archive).map(Some),
            ArchiveKind::Solid(compression) | ArchiveKind::Stream(compression) => {
                stream::open(archive, *compression).map(Some)
            },
        }
    }

    /// How the stream from [`open_stream`](Self::open_stream) splits into members.
    ///
    /// `records` is every member record the stream carries, repeated names
    /// included, so each one's bytes are consumed even when only the first is kept.
    pub(crate) fn plan(&self, records: &[ArchiveEntry]) -> Vec<Segment> {
        match self {
            ArchiveKind::Generic | ArchiveKind::Tar => {
                records.iter().map(|entry| Segment { name: entry.name.clone(), len: Some(entry.size) }).collect()
            },
            ArchiveKind::Solid(_) | ArchiveKind::Stream(_) => {
                records.first().map(|entry| Segment { name: entry.name.clone(), len: None }).into_iter().collect()
            },
        }
    }
}

/// The listing of an archive that decodes to one stream of unknown size.
fn whole_stream(name: impl Into<String>) -> Listing {
    let entry = ArchiveEntry::new(name, 0);
    Listing { entries: vec![entry.clone()], records: vec![entry], members: 1, solid: true, encrypted: false }
}

/// One member's slice of a whole-archive byte stream.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct Segment {
    pub(crate) name: String,
    /// Bytes belonging to this member. `None` runs to the end of the stream.
    pub(crate) len: Option<u64>,
}

/// A readable archive stream, and the process producing it (if any).
pub(crate) struct Source {
    reader: Option<Box<dyn Read + Send>>,
    child: Option<Child>,
}
impl Source {
    pub(crate) fn new(reader: Box<dyn Read + Send>) -> Self {
        Self { reader: Some(reader), child: None }
    }

    pub(crate) fn with_child(reader: Box<dyn Read + Send>, child: Child) -> Self {
        Self { reader: Some(reader), child: Some(child) }
    }

    fn close(&mut self) {
        // Closing the pipe first; a tool still writing to it then exits on its own.
        drop(self.reader.take());
        if let Some(mut child) = self.child.take() {
            match child.wait() {
                Ok(status) => tracing::trace!(%status, "Archive tool exited"),
                Err(err) => tracing::warn!(error = %err, "Could not reap archive tool"),
            }
        }
    }
}
impl Read for Source {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self.reader.as_mut() {
            Some(reader) => reader.read(buf),
            None => Ok(0),
        }
    }
}
impl Drop for Source {
    fn drop(&mut self) {
        self.close();
    }
}

/// Iterator returned by [`ArchiveSession::extract_many`](crate::ArchiveSession::extract_many).
///
/// Each wanted member is written below the destination directory as soon as
/// its bytes have streamed past, and its name is yielded right after. Reading
/// stops (and the archive tool is shut down) once the last wanted member has
/// been written, or when the iterator is dropped.
///
/// If the stream ends early, the members already written are still yielded
/// and the final item is a [`PartialExtraction`](ErrorKind::PartialExtraction)
/// error.
pub struct ExtractMany {
    source: Option<Source>,
    plan: std::vec::IntoIter<Segment>,
    targets: HashMap<String, PathBuf>,
    wanted: usize,
    exhausted: bool,
}
impl ExtractMany {
    pub(crate) fn new<I, S>(source: Option<Source>, plan: Vec<Segment>, names: I, destination: &Path) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let listed: HashSet<&str> = plan.iter().map(|segment| segment.name.as_str()).collect();
        let mut targets = HashMap::new();
        for name in names {
            let name = name.as_ref();
            if !listed.contains(name) {
                tracing::debug!(member = name, "Requested member is not in the archive");
                continue;
            }
            match member_path(destination, name) {
                Ok(target) => {
                    targets.insert(name.to_string(), target);
                },
                Err(err) => tracing::warn!(member = name, error = ?err, "Refusing to extract member"),
            }
        }
        Self { source, plan: plan.into_iter(), wanted: targets.len(), targets, exhausted: false }
    }

    /// Number of requested members that were found in the listing.
    pub fn wanted(&self) -> usize {
        self.wanted
    }

    fn stop(&mut self) {
        self.source = None;
    }
}
impl Iterator for ExtractMany {
    type Item = Result<String>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.targets.is_empty() {
                self.stop();
                return None;
            }
            let source = self.source.as_mut()?;
            let segment = match self.plan.next() {
                Some(segment) if !self.exhausted => segment,
                _ => {
                    let produced = self.wanted - self.targets.len();
                    tracing::warn!(wanted = self.wanted, produced, "Archive stream ended early");
                    self.stop();
                    return Some(Err(exn::Exn::from(ErrorKind::PartialExtraction { wanted: self.wanted, produced })));
                },
            };
            match self.targets.remove(&segment.name) {
                None => match skip(source, segment.len) {
                    Ok(complete) => self.exhausted = !complete,
                    Err(err) => {
                        self.stop();
                        return Some(Err(err));
                    },
                },
                Some(target) => match write(source, &segment, &target) {
                    Ok(complete) => {
                        self.exhausted = !complete;
                        return Some(Ok(segment.name));
                    },
                    Err(err) => {
                        self.stop();
                        return Some(Err(err));
                    },
                },
            }
        }
    }
}

/// Discard one segment. Returns `false` if the stream ended inside it.
fn skip(source: &mut Source, len: Option<u64>) -> Result<bool> {
    let Some(len) = len else {
        return Ok(false);
    };
    let skipped = io::copy(&mut source.by_ref().take(len), &mut io::sink()).or_raise(|| ErrorKind::Io)?;
    Ok(skipped == len)
}

/// Write one segment to `target`. Returns `false` if the stream ended inside it.
fn write(source: &mut Source, segment: &Segment, target: &Path) -> Result<bool> {
    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent).or_raise(|| ErrorKind::Io)?;
    }
    let mut file = File::create(target).or_raise(|| ErrorKind::Io)?;
    let written = match segment.len {
        Some(len) => io::copy(&mut source.by_ref().take(len), &mut file),
        None => io::copy(source, &mut file),
    }
    .or_raise(|| ErrorKind::Io)?;
    let complete = segment.len.is_none_or(|len| written == len);
    if !complete {
        tracing::warn!(member = %segment.name, written, "Archive member truncated");
    }
    Ok(complete)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Compression;
    use crate::listing::ListingParser;
    use std::io::Cursor;

    fn source(bytes: &[u8]) -> Option<Source> {
        Some(Source::new(Box::new(Cursor::new(bytes.to_vec()))))
    }

    fn segment(name: &str, len: u64) -> Segment {
        Segment { name: name.to_string(), len: Some(len) }
    }

    #[test]
    fn test_splits_stream_by_listed_sizes() {
        let dir = tempfile::tempdir().unwrap();
        let plan = vec![segment("a.png", 3), segment("skip.txt", 4), segment("sub/b.png", 2)];
        let names: Vec<String> =
            ExtractMany::new(source(b"AAAxxxxBB"), plan, ["sub/b.png", "a.png"], dir.path())
                .collect::<Result<_>>()
                .unwrap();
        // Archive order, not request order.
        assert_eq!(names, ["a.png", "sub/b.png"]);
        assert_eq!(fs::read(dir.path().join("a.png")).unwrap(), b"AAA");
        assert_eq!(fs::read(dir.path().join("sub/b.png")).unwrap(), b"BB");
        assert!(!dir.path().join("skip.txt").exists());
    }

    #[test]
    fn test_stops_after_last_wanted_member() {
        let dir = tempfile::tempdir().unwrap();
        let plan = vec![segment("a.png", 1), segment("b.png", 1), segment("c.png", 1)];
        let mut iter = ExtractMany::new(source(b"ABC"), plan, ["a.png"], dir.path());
        assert_eq!(iter.next().unwrap().unwrap(), "a.png");
        assert!(iter.next().is_none());
        assert!(iter.source.is_none());
        assert!(!dir.path().join("b.png").exists());
    }

    #[test]
    fn test_truncated_stream_yields_partial_error() {
        let dir = tempfile::tempdir().unwrap();
        let plan = vec![segment("a.png", 2), segment("b.png", 5), segment("c.png", 2)];
        let mut iter = ExtractMany::new(source(b"AAB"), plan, ["a.png", "b.png", "c.png"], dir.path());
        assert_eq!(iter.next().unwrap().unwrap(), "a.png");
        // The truncated member is still written with what arrived.
        assert_eq!(iter.next().unwrap().unwrap(), "b.png");
        let err = iter.next().unwrap().unwrap_err();
        assert_eq!(*err, ErrorKind::PartialExtraction { wanted: 3, produced: 2 });
        assert!(iter.next().is_none());
    }

    #[test]
    fn test_unknown_and_unsafe_names_are_not_wanted() {
        let dir = tempfile::tempdir().unwrap();
        let plan = vec![segment("../evil.png", 1), segment("ok.png", 1)];
        let iter = ExtractMany::new(source(b"EO"), plan, ["../evil.png", "missing.png", "ok.png"], dir.path());
        assert_eq!(iter.wanted(), 1);
        let names: Vec<String> = iter.collect::<Result<_>>().unwrap();
        assert_eq!(names, ["ok.png"]);
    }

    #[test]
    fn test_whole_stream_segment() {
        let dir = tempfile::tempdir().unwrap();
        let plan = vec![Segment { name: "archive.tar".to_string(), len: None }];
        let names: Vec<String> =
            ExtractMany::new(source(b"everything"), plan, ["archive.tar"], dir.path()).collect::<Result<_>>().unwrap();
        assert_eq!(names, ["archive.tar"]);
        assert_eq!(fs::read(dir.path().join("archive.tar")).unwrap(), b"everything");
    }

    #[test]
    fn test_without_source_yields_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let mut iter = ExtractMany::new(None, vec![segment("a.png", 1)], ["a.png"], dir.path());
        assert!(iter.next().is_none());
    }

    #[test]
    fn test_duplicate_records_are_skipped_not_replayed() {
        let listing = ListingParser::parse(
            "----------\nPath = a.png\nSize = 3\n\nPath = a.png\nSize = 3\n\nPath = b.png\nSize = 2\n",
        )
        .unwrap();
        assert_eq!(listing.entries.len(), 2);
        let plan = ArchiveKind::Generic.plan(&listing.records);
        assert_eq!(plan, vec![segment("a.png", 3), segment("a.png", 3), segment("b.png", 2)]);

        let dir = tempfile::tempdir().unwrap();
        let names: Vec<String> =
            ExtractMany::new(source(b"AAAXXXBB"), plan.clone(), ["b.png"], dir.path()).collect::<Result<_>>().unwrap();
        assert_eq!(names, ["b.png"]);
        assert_eq!(fs::read(dir.path().join("b.png")).unwrap(), b"BB");

        // The first copy of a repeated name wins.
        let dir = tempfile::tempdir().unwrap();
        let names: Vec<String> = ExtractMany::new(source(b"AAAXXXBB"), plan, ["a.png", "b.png"], dir.path())
            .collect::<Result<_>>()
            .unwrap();
        assert_eq!(names, ["a.png", "b.png"]);
        assert_eq!(fs::read(dir.path().join("a.png")).unwrap(), b"AAA");
        assert_eq!(fs::read(dir.path().join("b.png")).unwrap(), b"BB");
    }

    #[test]
    fn test_plan_by_kind() {
        let entries = [ArchiveEntry::new("a.png", 3), ArchiveEntry::new("b.png", 4)];
        assert_eq!(ArchiveKind::Generic.plan(&entries), vec![segment("a.png", 3), segment("b.png", 4)]);
        assert_eq!(ArchiveKind::Tar.plan(&entries), vec![segment("a.png", 3), segment("b.png", 4)]);
        let solid = ArchiveKind::Solid(Compression::Gzip);
        assert_eq!(solid.plan(&entries[..1]), vec![Segment { name: "a.png".to_string(), len: None }]);
        assert!(solid.plan(&[]).is_empty());
    }

    #[test]
    fn test_whole_stream_listing() {
        let dir = tempfile::tempdir().unwrap();
        let solid = ArchiveKind::Solid(Compression::Gzip).list(&dir.path().join("comic.tar.gz"), None, "archive.tar");
        let listing = solid.unwrap().unwrap();
        assert_eq!(listing.entries, vec![ArchiveEntry::new("archive.tar", 0)]);
        assert_eq!(listing.records, listing.entries);
        assert!(listing.solid);
        let bare = ArchiveKind::Stream(Compression::Gzip).list(&dir.path().join("page.png.gz"), None, "archive.tar");
        assert_eq!(bare.unwrap().unwrap().entries, vec![ArchiveEntry::new("page.png", 0)]);
    }
}
