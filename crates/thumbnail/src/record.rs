//! The on-disk thumbnail format: a PNG with freedesktop-style `tEXt` chunks
//! describing the source it was made from.

use crate::error::{ErrorKind, Result};
use exn::{OptionExt, ResultExt};
use image::{DynamicImage, ImageFormat, RgbaImage};
use std::fs;
use std::io::{self, Cursor, Write};
use std::path::{Path, PathBuf};

const KEY_URI: &str = "Thumb::URI";
const KEY_MTIME: &str = "Thumb::MTime";
const KEY_SIZE: &str = "Thumb::Size";
const KEY_MIMETYPE: &str = "Thumb::Mimetype";
const KEY_WIDTH: &str = "Thumb::Image::Width";
const KEY_HEIGHT: &str = "Thumb::Image::Height";
const KEY_SOFTWARE: &str = "Software";
const SOFTWARE: &str = concat!("folio ", env!("CARGO_PKG_VERSION"));

/// What a stored thumbnail says about its source.
///
/// Fields other than the URI are optional on read: thumbnails written by other
/// programs may leave them out, and a missing [`mtime`](Self::mtime) simply
/// makes the record stale.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ThumbnailRecord {
    /// `file://` URI of the source.
    pub uri: String,
    /// Source modification time, in seconds since the Unix epoch.
    pub mtime: Option<i64>,
    /// Source size in bytes.
    pub size: Option<u64>,
    pub mime_type: Option<String>,
    /// Dimensions of the full-size image the thumbnail was made from.
    pub width: Option<u32>,
    pub height: Option<u32>,
}
impl ThumbnailRecord {
    /// Whether this record was made from a source last modified at `mtime`.
    pub fn is_fresh(&self, mtime: i64) -> bool {
        self.mtime == Some(mtime)
    }

    fn text_chunks(&self) -> Vec<(&'static str, String)> {
        let mut chunks = vec![(KEY_URI, self.uri.clone())];
        let optional = [
            (KEY_MTIME, self.mtime.map(|v| v.to_string())),
            (KEY_SIZE, self.size.map(|v| v.to_string())),
            (KEY_MIMETYPE, self.mime_type.clone()),
            (KEY_WIDTH, self.width.map(|v| v.to_string())),
            (KEY_HEIGHT, self.height.map(|v| v.to_string())),
        ];
        chunks.extend(optional.into_iter().filter_map(|(key, value)| Some((key, value?))));
        chunks.push((KEY_SOFTWARE, SOFTWARE.to_string()));
        chunks
    }

    fn set(&mut self, key: &str, value: &str) {
        match key {
            KEY_URI => self.uri = value.to_string(),
            KEY_MTIME => self.mtime = value.trim().parse().ok(),
            KEY_SIZE => self.size = value.trim().parse().ok(),
            KEY_MIMETYPE => self.mime_type = Some(value.to_string()),
            KEY_WIDTH => self.width = value.trim().parse().ok(),
            KEY_HEIGHT => self.height = value.trim().parse().ok(),
            _ => {},
        }
    }

    /// Encode `image` as a PNG carrying this record.
    pub fn encode(&self, image: &RgbaImage) -> Result<Vec<u8>> {
        let mut bytes = Vec::new();
        let mut encoder = png::Encoder::new(&mut bytes, image.width(), image.height());
        encoder.set_color(png::ColorType::Rgba);
        encoder.set_depth(png::BitDepth::Eight);
        for (key, value) in self.text_chunks() {
            encoder.add_text_chunk(key.to_string(), value).or_raise(|| ErrorKind::Decode)?;
        }
        let mut writer = encoder.write_header().or_raise(|| ErrorKind::Decode)?;
        writer.write_image_data(image.as_raw()).or_raise(|| ErrorKind::Decode)?;
        writer.finish().or_raise(|| ErrorKind::Decode)?;
        Ok(bytes)
    }

    /// Read the record and the image back out of PNG `bytes`.
    pub fn decode(bytes: &[u8]) -> Result<(Self, DynamicImage)> {
        let reader = png::Decoder::new(Cursor::new(bytes)).read_info().or_raise(|| ErrorKind::Decode)?;
        let mut record = Self::default();
        for chunk in &reader.info().uncompressed_latin1_text {
            record.set(&chunk.keyword, &chunk.text);
        }
        let image = image::load_from_memory_with_format(bytes, ImageFormat::Png).or_raise(|| ErrorKind::Decode)?;
        Ok((record, image))
    }
}

/// Load the thumbnail stored at `path`, if there is one.
pub fn load(path: &Path) -> Result<Option<(ThumbnailRecord, DynamicImage)>> {
    match fs::read(path) {
        Ok(bytes) => ThumbnailRecord::decode(&bytes).map(Some),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err).or_raise(|| ErrorKind::Io),
    }
}

/// Write `bytes` to `path` atomically: into a private temporary file in the
/// same directory, then renamed over the target.
///
/// Concurrent writers of the same thumbnail each rename a complete file into
/// place, so readers never see a partial one.
pub fn store(path: &Path, bytes: &[u8]) -> Result<PathBuf> {
    let directory = path.parent().ok_or_raise(|| ErrorKind::InvalidPath(path.to_path_buf()))?;
    create_private_dir(directory)?;
    let mut file = tempfile::Builder::new()
        .prefix(".folio-")
        .suffix(".png.part")
        .tempfile_in(directory)
        .or_raise(|| ErrorKind::Io)?;
    file.write_all(bytes).or_raise(|| ErrorKind::Io)?;
    file.as_file().sync_all().or_raise(|| ErrorKind::Io)?;
    file.persist(path).map_err(|err| err.error).or_raise(|| ErrorKind::Io)?;
    Ok(path.to_path_buf())
}

#[cfg(unix)]
fn create_private_dir(directory: &Path) -> Result<()> {
    use std::os::unix::fs::DirBuilderExt;
    fs::DirBuilder::new().recursive(true).mode(0o700).create(directory).or_raise(|| ErrorKind::Io)
}

#[cfg(not(unix))]
fn create_private_dir(directory: &Path) -> Result<()> {
    fs::create_dir_all(directory).or_raise(|| ErrorKind::Io)
}
