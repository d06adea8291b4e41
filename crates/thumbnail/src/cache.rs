use crate::address::ContentAddress;
use crate::cover::guess_cover;
use crate::error::{ErrorKind, Result};
use crate::record::{self, ThumbnailRecord};
use directories::BaseDirs;
use exn::{OptionExt, ResultExt};
use folio_archive::{ArchiveSession, is_archive};
use folio_pages::Page;
use image::{DynamicImage, ImageFormat};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use time::OffsetDateTime;
use tracing::instrument;

/// Edge of the bounding box for "normal" thumbnails.
pub const NORMAL_SIZE: u32 = 128;

/// How a thumbnail was obtained.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Origin {
    /// Read from a fresh record in the cache directory.
    Cached,
    /// Made on the fly and not stored.
    Generated,
    /// Made and written to the cache directory.
    Persisted,
}

#[derive(Clone, Debug)]
pub struct Thumbnail {
    pub image: Arc<DynamicImage>,
    pub origin: Origin,
}

/// A directory of thumbnails, one file per source, named by the source's
/// [`ContentAddress`].
///
/// A stored thumbnail is only used while the modification time embedded in it
/// matches the source's. Archive sources get a thumbnail of their cover page.
#[derive(Clone, Debug)]
pub struct ThumbnailCache {
    directory: PathBuf,
    size: u32,
    password: Option<String>,
}
impl ThumbnailCache {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self { directory: directory.into(), size: NORMAL_SIZE, password: None }
    }

    /// `~/.cache/thumbnails/normal` or the platform equivalent.
    pub fn default_directory() -> Option<PathBuf> {
        BaseDirs::new().map(|dirs| dirs.cache_dir().join("thumbnails").join("normal"))
    }

    /// Size of the bounding box stored thumbnails are fitted into. Sources
    /// that already fit are never stored.
    pub fn with_size(mut self, size: u32) -> Self {
        self.size = size.max(1);
        self
    }

    /// Password for encrypted archives.
    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    pub fn size(&self) -> u32 {
        self.size
    }

    /// Where the thumbnail of `source` is (or would be) stored.
    pub fn path_for(&self, source: impl AsRef<Path>) -> Result<PathBuf> {
        let address = ContentAddress::for_path(source)?;
        Ok(self.directory.join(address.file_name()))
    }

    /// A thumbnail of `source` no larger than `want_size` on either side, or
    /// the placeholder page if none can be produced.
    ///
    /// With `persist` set, a generated thumbnail is stored for next time.
    /// Without it, archives only get a thumbnail if one is already stored.
    pub fn get_thumbnail(&self, source: impl AsRef<Path>, want_size: u32, persist: bool) -> Page {
        let source = source.as_ref();
        match self.lookup(source, want_size, persist) {
            Ok(thumbnail) => Page::Decoded(thumbnail.image),
            Err(err) => {
                tracing::warn!(source = %source.display(), error = ?err, "No thumbnail; showing placeholder");
                Page::Missing
            },
        }
    }

    /// Like [`get_thumbnail`](Self::get_thumbnail), but reports why a
    /// thumbnail couldn't be produced and where it came from.
    #[instrument(skip(self, source), fields(source = %source.display()))]
    pub fn lookup(&self, source: &Path, want_size: u32, persist: bool) -> Result<Thumbnail> {
        let metadata = fs::metadata(source).or_raise(|| ErrorKind::NotFound(source.to_path_buf()))?;
        let mtime = metadata.modified().or_raise(|| ErrorKind::Io)?;
        let mtime = OffsetDateTime::from(mtime).unix_timestamp();
        let address = ContentAddress::for_path(source)?;
        let stored = self.directory.join(address.file_name());

        match record::load(&stored) {
            Ok(Some((record, image))) if record.is_fresh(mtime) => {
                tracing::debug!(thumbnail = %stored.display(), "Thumbnail cache hit");
                return Ok(Thumbnail { image: Arc::new(fit(image, want_size)), origin: Origin::Cached });
            },
            Ok(Some((record, _))) => tracing::debug!(stored = ?record.mtime, mtime, "Thumbnail is stale"),
            Ok(None) => tracing::trace!("No stored thumbnail"),
            Err(err) => tracing::warn!(thumbnail = %stored.display(), error = ?err, "Unreadable thumbnail; replacing"),
        }

        let archive = is_archive(source);
        if archive && !persist {
            exn::bail!(ErrorKind::NotCached(source.to_path_buf()));
        }
        let (original, mime_type) = match archive {
            true => self.cover(source)?,
            false => load_image(source)?,
        };
        let (width, height) = (original.width(), original.height());
        if width <= self.size && height <= self.size {
            return Ok(Thumbnail { image: Arc::new(fit(original, want_size)), origin: Origin::Generated });
        }
        let thumbnail = original.thumbnail(self.size, self.size);
        if !persist {
            return Ok(Thumbnail { image: Arc::new(fit(thumbnail, want_size)), origin: Origin::Generated });
        }

        let record = ThumbnailRecord {
            uri: address.uri().to_string(),
            mtime: Some(mtime),
            size: Some(metadata.len()),
            mime_type,
            width: Some(width),
            height: Some(height),
        };
        let origin = match record.encode(&thumbnail.to_rgba8()).and_then(|bytes| record::store(&stored, &bytes)) {
            Ok(path) => {
                tracing::info!(thumbnail = %path.display(), "Stored thumbnail");
                Origin::Persisted
            },
            Err(err) => {
                tracing::warn!(thumbnail = %stored.display(), error = ?err, "Could not store thumbnail");
                Origin::Generated
            },
        };
        Ok(Thumbnail { image: Arc::new(fit(thumbnail, want_size)), origin })
    }

    /// Remove the stored thumbnail of `source`. Returns whether there was one.
    pub fn delete(&self, source: impl AsRef<Path>) -> Result<bool> {
        let stored = self.path_for(source)?;
        match fs::remove_file(&stored) {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(err) => Err(err).or_raise(|| ErrorKind::Io),
        }
    }

    /// Extract and decode the cover page of an archive.
    fn cover(&self, archive: &Path) -> Result<(DynamicImage, Option<String>)> {
        let mut session = ArchiveSession::open(archive).or_raise(|| ErrorKind::Archive)?;
        if let Some(password) = &self.password {
            session = session.with_password(password.clone());
        }
        let scratch = tempfile::Builder::new().prefix("folio.").tempdir().or_raise(|| ErrorKind::Io)?;
        let mut session = session.into_innermost(scratch.path().join(".nested")).or_raise(|| ErrorKind::Archive)?;
        let names: Vec<String> =
            session.iter_contents().or_raise(|| ErrorKind::Archive)?.map(str::to_string).collect();
        let cover = guess_cover(&names).ok_or_raise(|| ErrorKind::NoCover(archive.to_path_buf()))?;
        tracing::debug!(cover = %cover, "Guessed cover");
        let path = session.extract_one(&cover, scratch.path()).or_raise(|| ErrorKind::Archive)?;
        load_image(&path)
    }
}

fn load_image(path: &Path) -> Result<(DynamicImage, Option<String>)> {
    let image = folio_pages::decode(path).or_raise(|| ErrorKind::Decode)?;
    let mime_type = ImageFormat::from_path(path).ok().map(|format| format.to_mime_type().to_string());
    Ok((image, mime_type))
}

/// Shrink `image` to fit a `size` square; never enlarge it.
fn fit(image: DynamicImage, size: u32) -> DynamicImage {
    let size = size.max(1);
    match image.width() > size || image.height() > size {
        true => image.thumbnail(size, size),
        false => image,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use filetime::FileTime;
    use flate2::write::GzEncoder;
    use image::{Rgba, RgbaImage};
    use std::io::Write;
    use tempfile::TempDir;

    fn source_image(dir: &Path, name: &str, width: u32, height: u32) -> PathBuf {
        let path = dir.join(name);
        RgbaImage::from_fn(width, height, |x, y| Rgba([(x % 256) as u8, (y % 256) as u8, 64, 255]))
            .save(&path)
            .unwrap();
        filetime::set_file_mtime(&path, FileTime::from_unix_time(1_600_000_000, 0)).unwrap();
        path
    }

    fn cache() -> (TempDir, ThumbnailCache) {
        let dir = tempfile::tempdir().unwrap();
        let cache = ThumbnailCache::new(dir.path().join("thumbnails"));
        (dir, cache)
    }

    #[test]
    fn test_round_trip_is_cached() {
        let (dir, cache) = cache();
        let source = source_image(dir.path(), "page.png", 300, 200);

        let first = cache.lookup(&source, NORMAL_SIZE, true).unwrap();
        assert_eq!(first.origin, Origin::Persisted);
        assert_eq!((first.image.width(), first.image.height()), (128, 85));
        let stored = cache.path_for(&source).unwrap();
        let bytes = fs::read(&stored).unwrap();

        let second = cache.lookup(&source, NORMAL_SIZE, true).unwrap();
        assert_eq!(second.origin, Origin::Cached);
        assert_eq!(fs::read(&stored).unwrap(), bytes);
        assert_eq!(second.image.to_rgba8(), first.image.to_rgba8());

        let (record, _) = record::load(&stored).unwrap().unwrap();
        assert_eq!(record.mtime, Some(1_600_000_000));
        assert_eq!((record.width, record.height), (Some(300), Some(200)));
        assert_eq!(record.mime_type.as_deref(), Some("image/png"));
        assert_eq!(record.size, Some(fs::metadata(&source).unwrap().len()));
        assert!(record.uri.starts_with("file:///"));
    }

    #[test]
    fn test_changed_mtime_regenerates() {
        let (dir, cache) = cache();
        let source = source_image(dir.path(), "page.png", 300, 200);
        assert_eq!(cache.lookup(&source, NORMAL_SIZE, true).unwrap().origin, Origin::Persisted);

        filetime::set_file_mtime(&source, FileTime::from_unix_time(1_600_000_100, 0)).unwrap();
        assert_eq!(cache.lookup(&source, NORMAL_SIZE, true).unwrap().origin, Origin::Persisted);
        let (record, _) = record::load(&cache.path_for(&source).unwrap()).unwrap().unwrap();
        assert_eq!(record.mtime, Some(1_600_000_100));
        assert_eq!(cache.lookup(&source, NORMAL_SIZE, true).unwrap().origin, Origin::Cached);
    }

    #[test]
    fn test_small_source_is_not_stored() {
        let (dir, cache) = cache();
        let source = source_image(dir.path(), "icon.png", 64, 100);
        let thumbnail = cache.lookup(&source, NORMAL_SIZE, true).unwrap();
        assert_eq!(thumbnail.origin, Origin::Generated);
        assert_eq!((thumbnail.image.width(), thumbnail.image.height()), (64, 100));
        assert!(!cache.path_for(&source).unwrap().exists());
    }

    #[test]
    fn test_without_persist_nothing_is_stored() {
        let (dir, cache) = cache();
        let source = source_image(dir.path(), "page.png", 256, 128);
        let thumbnail = cache.lookup(&source, 64, false).unwrap();
        assert_eq!(thumbnail.origin, Origin::Generated);
        assert_eq!((thumbnail.image.width(), thumbnail.image.height()), (64, 32));
        assert!(!cache.directory().exists());
    }

    #[test]
    fn test_archive_cover() {
        let (dir, cache) = cache();
        let page = source_image(dir.path(), "cover.png", 256, 512);
        let archive = dir.path().join("cover.png.gz");
        let mut encoder = GzEncoder::new(fs::File::create(&archive).unwrap(), flate2::Compression::default());
        encoder.write_all(&fs::read(&page).unwrap()).unwrap();
        encoder.finish().unwrap();

        assert!(cache.get_thumbnail(&archive, NORMAL_SIZE, false).is_missing(), "archives need persist");
        let err = cache.lookup(&archive, NORMAL_SIZE, false).unwrap_err();
        assert!(matches!(&*err, ErrorKind::NotCached(_)));

        let thumbnail = cache.lookup(&archive, NORMAL_SIZE, true).unwrap();
        assert_eq!(thumbnail.origin, Origin::Persisted);
        assert_eq!((thumbnail.image.width(), thumbnail.image.height()), (64, 128));
        // A stored cover is served even without persist.
        let page = cache.get_thumbnail(&archive, NORMAL_SIZE, false);
        assert_eq!(page.image().map(|image| image.height()), Some(128));
    }

    #[test]
    fn test_compressed_tarball_cover() {
        let (dir, cache) = cache();
        let archive = dir.path().join("comic.cbt.gz");
        let encoder = GzEncoder::new(fs::File::create(&archive).unwrap(), flate2::Compression::default());
        let mut builder = tar::Builder::new(encoder);
        for (name, width) in [("b.png", 512), ("cover.png", 256), ("back.png", 384)] {
            let page = source_image(dir.path(), name, width, 512);
            builder.append_path_with_name(&page, name).unwrap();
        }
        builder.into_inner().unwrap().finish().unwrap();

        let thumbnail = cache.lookup(&archive, NORMAL_SIZE, true).unwrap();
        assert_eq!(thumbnail.origin, Origin::Persisted);
        assert_eq!((thumbnail.image.width(), thumbnail.image.height()), (64, 128));
        let (record, _) = record::load(&cache.path_for(&archive).unwrap()).unwrap().unwrap();
        assert_eq!((record.width, record.height), (Some(256), Some(512)));
    }

    #[test]
    fn test_missing_source() {
        let (dir, cache) = cache();
        let missing = dir.path().join("gone.png");
        assert!(matches!(&*cache.lookup(&missing, NORMAL_SIZE, true).unwrap_err(), ErrorKind::NotFound(_)));
        assert!(cache.get_thumbnail(&missing, NORMAL_SIZE, true).is_missing());
    }

    #[test]
    fn test_undecodable_source() {
        let (dir, cache) = cache();
        let source = dir.path().join("broken.png");
        fs::write(&source, b"not a png").unwrap();
        assert_eq!(*cache.lookup(&source, NORMAL_SIZE, true).unwrap_err(), ErrorKind::Decode);
    }

    #[test]
    fn test_delete() {
        let (dir, cache) = cache();
        let source = source_image(dir.path(), "page.png", 300, 200);
        cache.lookup(&source, NORMAL_SIZE, true).unwrap();
        assert!(cache.delete(&source).unwrap());
        assert!(!cache.path_for(&source).unwrap().exists());
        assert!(!cache.delete(&source).unwrap());
    }

    #[test]
    fn test_custom_size() {
        let (dir, cache) = cache();
        let cache = cache.with_size(32);
        let source = source_image(dir.path(), "page.png", 100, 50);
        let thumbnail = cache.lookup(&source, 256, true).unwrap();
        assert_eq!(thumbnail.origin, Origin::Persisted);
        assert_eq!((thumbnail.image.width(), thumbnail.image.height()), (32, 16));
    }
}
