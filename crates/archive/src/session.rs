use crate::backend::{Attempt, ExtractMany};
use crate::error::{ErrorKind, Result};
use crate::listing::{EncryptedHeader, Listing};
use crate::{ArchiveEntry, ArchiveKind, member_path};
use exn::{OptionExt, ResultExt};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::instrument;

/// Name given to the single stream inside a compressed tarball, unless the
/// caller picks another with [`ArchiveSession::with_synthetic_name`].
pub const SOLID_STREAM_NAME: &str = "archive.tar";

/// How many archives deep [`ArchiveSession::into_innermost`] unwraps.
const MAX_NESTING: usize = 4;

/// Asks the user for the password of an encrypted archive.
pub trait PasswordPrompt: Send {
    /// Return the password for `archive`, or `None` if the user declined.
    fn password(&mut self, archive: &Path) -> Option<String>;
}
impl<F> PasswordPrompt for F
where
    F: FnMut(&Path) -> Option<String> + Send,
{
    fn password(&mut self, archive: &Path) -> Option<String> {
        self(archive)
    }
}

/// One open archive.
///
/// The listing is produced lazily on first use and kept for the life of the
/// session; [`reopen`](Self::reopen) throws it away. A password, once known,
/// is kept and reused for every later call, and the prompt is consulted at
/// most once.
pub struct ArchiveSession {
    path: PathBuf,
    kind: ArchiveKind,
    synthetic_name: String,
    entries: Vec<ArchiveEntry>,
    records: Vec<ArchiveEntry>,
    listed: bool,
    solid: bool,
    encrypted: bool,
    password: Option<String>,
    prompt: Option<Box<dyn PasswordPrompt>>,
    prompted: bool,
}
impl ArchiveSession {
    /// Open the archive at `path`, detecting its kind by name or contents.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let kind = ArchiveKind::detect(&path).ok_or_raise(|| ErrorKind::UnsupportedFormat(path.clone()))?;
        Ok(Self::with_kind(path, kind))
    }

    pub fn with_kind(path: impl Into<PathBuf>, kind: ArchiveKind) -> Self {
        Self {
            path: path.into(),
            kind,
            synthetic_name: SOLID_STREAM_NAME.to_string(),
            entries: Vec::new(),
            records: Vec::new(),
            listed: false,
            solid: false,
            encrypted: false,
            password: None,
            prompt: None,
            prompted: false,
        }
    }

    /// Use `password` whenever the archive turns out to be encrypted.
    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    /// Ask `prompt` for a password the first time one is needed.
    pub fn with_prompt(mut self, prompt: impl PasswordPrompt + 'static) -> Self {
        self.prompt = Some(Box::new(prompt));
        self
    }

    pub fn with_synthetic_name(mut self, name: impl Into<String>) -> Self {
        self.synthetic_name = name.into();
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn kind(&self) -> ArchiveKind {
        self.kind
    }

    pub fn is_listed(&self) -> bool {
        self.listed
    }

    /// Whether the archive has to be decompressed front to back to reach any member.
    pub fn is_solid(&self) -> bool {
        self.solid
    }

    pub fn is_encrypted(&self) -> bool {
        self.encrypted
    }

    /// Forget the listing; the next call lists the archive again.
    pub fn reopen(&mut self) {
        self.entries.clear();
        self.records.clear();
        self.listed = false;
        self.solid = false;
    }

    /// The archive's non-empty members, in archive order.
    ///
    /// An encrypted header is retried exactly once with a password. If that
    /// fails too, [`Encrypted`](ErrorKind::Encrypted) is returned once and the
    /// session behaves as an empty archive afterwards.
    #[instrument(skip_all, fields(archive = %self.path.display()))]
    pub fn list(&mut self) -> Result<&[ArchiveEntry]> {
        if !self.listed {
            let result = with_password_retry(|retry| {
                if retry {
                    self.encrypted = true;
                }
                let password = self.password();
                self.kind.list(&self.path, password.as_deref(), &self.synthetic_name)
            });
            self.listed = true;
            let listing = match result {
                Ok(listing) => listing,
                Err(err) => {
                    tracing::warn!(error = ?err, "Could not list archive");
                    return Err(err);
                },
            };
            self.solid = listing.solid;
            self.encrypted |= listing.encrypted;
            self.entries = listing.entries;
            self.records = listing.records;
            tracing::debug!(entries = self.entries.len(), solid = self.solid, "Listed archive");
        }
        Ok(&self.entries)
    }

    /// Names of the archive's non-empty members, in archive order.
    pub fn iter_contents(&mut self) -> Result<impl Iterator<Item = &str> + '_> {
        Ok(self.list()?.iter().map(|entry| entry.name.as_str()))
    }

    /// Extract member `name` below `destination`, returning where it was written.
    ///
    /// A missing archive tool leaves nothing on disk but is not an error.
    #[instrument(skip(self, destination), fields(archive = %self.path.display()))]
    pub fn extract_one(&mut self, name: &str, destination: impl AsRef<Path>) -> Result<PathBuf> {
        self.list()?;
        let target = member_path(destination.as_ref(), name)?;
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).or_raise(|| ErrorKind::Io)?;
        }
        let password = self.password();
        self.kind.extract_one(&self.path, name, &target, password.as_deref())?;
        Ok(target)
    }

    /// Stream the whole archive once, writing the members in `names` below
    /// `destination` and yielding each name as soon as its file is complete.
    pub fn extract_many<I, S>(&mut self, names: I, destination: impl AsRef<Path>) -> Result<ExtractMany>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.list()?;
        let password = self.password();
        let source = match self.entries.is_empty() {
            true => None,
            false => self.kind.open_stream(&self.path, password.as_deref())?,
        };
        let plan = self.kind.plan(&self.records);
        Ok(ExtractMany::new(source, plan, names, destination.as_ref()))
    }

    /// Unwrap an archive whose only member is itself an archive (by name),
    /// such as the tarball inside a `.tar.gz`. The inner archive is extracted
    /// below `scratch` and opened with this session's password and prompt.
    /// Repeats for deeper nesting; anything else is returned as is.
    #[instrument(skip_all, fields(archive = %self.path.display()))]
    pub fn into_innermost(mut self, scratch: impl AsRef<Path>) -> Result<Self> {
        let scratch = scratch.as_ref();
        for depth in 0..MAX_NESTING {
            let single = match self.list()? {
                [entry] => Some(entry.name.clone()),
                _ => None,
            };
            let Some(name) = single else {
                break;
            };
            let Some(kind) = ArchiveKind::from_path(&name) else {
                break;
            };
            let path = self.extract_one(&name, scratch.join(format!("nested-{depth}")))?;
            tracing::debug!(inner = %path.display(), ?kind, "Opening nested archive");
            self = self.nested(path, kind);
        }
        Ok(self)
    }

    /// A session for an archive found inside this one.
    fn nested(self, path: PathBuf, kind: ArchiveKind) -> Self {
        Self {
            synthetic_name: self.synthetic_name,
            password: self.password,
            prompt: self.prompt,
            prompted: self.prompted,
            ..Self::with_kind(path, kind)
        }
    }

    /// The password to hand to the tool. Only used once the archive is known
    /// to be encrypted; the prompt is asked at most once per session.
    fn password(&mut self) -> Option<String> {
        if !self.encrypted {
            return None;
        }
        if self.password.is_none() && !self.prompted {
            self.prompted = true;
            if let Some(prompt) = self.prompt.as_mut() {
                self.password = prompt.password(&self.path);
            }
        }
        self.password.clone()
    }
}

/// Run a listing attempt, and exactly one more if the first hit an encrypted
/// header. The closure is told whether it is the retry.
fn with_password_retry(mut attempt: impl FnMut(bool) -> Result<Attempt>) -> Result<Listing> {
    match attempt(false)? {
        Ok(listing) => return Ok(listing),
        Err(EncryptedHeader) => tracing::debug!("Archive header is encrypted; retrying with a password"),
    }
    match attempt(true)? {
        Ok(listing) => Ok(listing),
        Err(EncryptedHeader) => exn::bail!(ErrorKind::Encrypted),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Compression;
    use flate2::write::GzEncoder;
    use std::io::Write;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn gzip_file(path: &Path, contents: &[u8]) {
        let mut encoder = GzEncoder::new(fs::File::create(path).unwrap(), flate2::Compression::default());
        encoder.write_all(contents).unwrap();
        encoder.finish().unwrap();
    }

    #[test]
    fn test_retry_not_needed() {
        let mut calls = 0;
        let listing = with_password_retry(|_| {
            calls += 1;
            Ok(Ok(Listing::default()))
        })
        .unwrap();
        assert_eq!(listing, Listing::default());
        assert_eq!(calls, 1);
    }

    #[test]
    fn test_retry_once_after_encrypted_header() {
        let mut retries = Vec::new();
        let listing = with_password_retry(|retry| {
            retries.push(retry);
            Ok(match retry {
                false => Err(EncryptedHeader),
                true => Ok(Listing { entries: vec![ArchiveEntry::new("a.png", 1)], ..Default::default() }),
            })
        })
        .unwrap();
        assert_eq!(retries, [false, true]);
        assert_eq!(listing.entries.len(), 1);
    }

    #[test]
    fn test_second_encrypted_header_is_terminal() {
        let mut calls = 0;
        let err = with_password_retry(|_| {
            calls += 1;
            Ok(Err(EncryptedHeader))
        })
        .unwrap_err();
        assert_eq!(*err, ErrorKind::Encrypted);
        assert_eq!(calls, 2);
    }

    #[test]
    fn test_prompt_is_asked_once() {
        let asked = Arc::new(AtomicUsize::new(0));
        let counter = asked.clone();
        let prompt = move |_: &Path| -> Option<String> {
            counter.fetch_add(1, Ordering::SeqCst);
            None
        };
        let mut session = ArchiveSession::with_kind("secret.cbr", ArchiveKind::Generic).with_prompt(prompt);
        assert_eq!(session.password(), None);
        assert_eq!(asked.load(Ordering::SeqCst), 0, "no prompt before the archive is known to be encrypted");
        session.encrypted = true;
        assert_eq!(session.password(), None);
        assert_eq!(session.password(), None);
        assert_eq!(asked.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_supplied_password_skips_prompt() {
        let mut session = ArchiveSession::with_kind("secret.cbr", ArchiveKind::Generic)
            .with_password("hunter2")
            .with_prompt(|_: &Path| -> Option<String> { panic!("prompted despite a known password") });
        session.encrypted = true;
        assert_eq!(session.password().as_deref(), Some("hunter2"));
    }

    #[test]
    fn test_open_unsupported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notes.txt");
        fs::write(&path, b"just text").unwrap();
        let err = ArchiveSession::open(&path).err().unwrap();
        assert!(matches!(&*err, ErrorKind::UnsupportedFormat(_)));
    }

    #[test]
    fn test_compressed_stream_session() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("page.png.gz");
        gzip_file(&archive, b"not really a png");

        let mut session = ArchiveSession::open(&archive).unwrap();
        assert_eq!(session.kind(), ArchiveKind::Stream(Compression::Gzip));
        assert_eq!(session.iter_contents().unwrap().collect::<Vec<_>>(), ["page.png"]);
        assert!(session.is_listed());
        assert!(session.is_solid());

        let out = dir.path().join("one");
        let path = session.extract_one("page.png", &out).unwrap();
        assert_eq!(path, out.join("page.png"));
        assert_eq!(fs::read(&path).unwrap(), b"not really a png");

        let out = dir.path().join("many");
        let names: Vec<String> = session.extract_many(["page.png"], &out).unwrap().collect::<Result<_>>().unwrap();
        assert_eq!(names, ["page.png"]);
        assert_eq!(fs::read(out.join("page.png")).unwrap(), b"not really a png");
    }

    fn tar_gz(path: &Path, members: &[(&str, &[u8])]) {
        let encoder = GzEncoder::new(fs::File::create(path).unwrap(), flate2::Compression::default());
        let mut builder = tar::Builder::new(encoder);
        for (name, data) in members {
            let mut header = tar::Header::new_gnu();
            header.set_size(data.len() as u64);
            header.set_mode(0o644);
            builder.append_data(&mut header, name, *data).unwrap();
        }
        builder.into_inner().unwrap().finish().unwrap();
    }

    #[test]
    fn test_compressed_tarball_unwraps_to_members() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("comic.cbt.gz");
        tar_gz(&archive, &[("02.png", b"two"), ("01.png", b"one"), ("01.png", b"again")]);

        let mut session = ArchiveSession::open(&archive).unwrap();
        assert_eq!(session.kind(), ArchiveKind::Solid(Compression::Gzip));
        assert_eq!(session.iter_contents().unwrap().collect::<Vec<_>>(), [SOLID_STREAM_NAME]);

        let scratch = dir.path().join("scratch");
        let mut session = session.into_innermost(&scratch).unwrap();
        assert_eq!(session.kind(), ArchiveKind::Tar);
        assert!(session.path().starts_with(&scratch));
        assert_eq!(session.iter_contents().unwrap().collect::<Vec<_>>(), ["02.png", "01.png"]);

        let out = dir.path().join("pages");
        let names: Vec<String> =
            session.extract_many(["01.png", "02.png"], &out).unwrap().collect::<Result<_>>().unwrap();
        assert_eq!(names, ["02.png", "01.png"]);
        assert_eq!(fs::read(out.join("01.png")).unwrap(), b"one");
        assert_eq!(fs::read(out.join("02.png")).unwrap(), b"two");
    }

    #[test]
    fn test_innermost_keeps_plain_archives() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("page.png.gz");
        gzip_file(&archive, b"pixels");
        let session = ArchiveSession::open(&archive).unwrap().into_innermost(dir.path().join("scratch")).unwrap();
        assert_eq!(session.path(), archive);
        assert!(!dir.path().join("scratch").exists());
    }

    #[test]
    fn test_nested_session_keeps_password() {
        let session = ArchiveSession::with_kind("outer.tar.gz", ArchiveKind::Solid(Compression::Gzip))
            .with_password("hunter2")
            .with_synthetic_name("inner.tar");
        let mut inner = session.nested(PathBuf::from("inner.tar"), ArchiveKind::Tar);
        inner.encrypted = true;
        assert_eq!(inner.password().as_deref(), Some("hunter2"));
        assert_eq!(inner.synthetic_name, "inner.tar");
        assert!(!inner.is_listed());
    }

    #[test]
    fn test_reopen_lists_again() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("page.png.gz");
        gzip_file(&archive, b"x");
        let mut session = ArchiveSession::open(&archive).unwrap();
        session.list().unwrap();
        session.reopen();
        assert!(!session.is_listed());
        assert_eq!(session.list().unwrap().len(), 1);
    }
}
