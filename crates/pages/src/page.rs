use crate::error::{ErrorKind, Result};
use exn::{OptionExt, ResultExt};
use image::{DynamicImage, ImageReader, Rgba, RgbaImage};
use std::path::Path;
use std::sync::{Arc, LazyLock};

const PLACEHOLDER_SIZE: u32 = 128;
const PLACEHOLDER_INK: Rgba<u8> = Rgba([128, 128, 128, 255]);
const PLACEHOLDER_PAPER: Rgba<u8> = Rgba([224, 224, 224, 255]);

static PLACEHOLDER: LazyLock<Arc<DynamicImage>> = LazyLock::new(|| {
    let last = PLACEHOLDER_SIZE - 1;
    let image = RgbaImage::from_fn(PLACEHOLDER_SIZE, PLACEHOLDER_SIZE, |x, y| {
        let border = x < 2 || y < 2 || x > last - 2 || y > last - 2;
        let cross = x.abs_diff(y) < 2 || (x + y).abs_diff(last) < 2;
        match border || cross {
            true => PLACEHOLDER_INK,
            false => PLACEHOLDER_PAPER,
        }
    });
    Arc::new(DynamicImage::ImageRgba8(image))
});

/// The image shown in place of anything that could not be produced.
pub fn placeholder() -> Arc<DynamicImage> {
    PLACEHOLDER.clone()
}

/// A decoded page, or the sentinel for one that could not be decoded.
#[derive(Clone, Debug)]
pub enum Page {
    Decoded(Arc<DynamicImage>),
    Missing,
}
impl Page {
    /// Decode the image at `path`. Failures are logged and become [`Page::Missing`].
    pub fn load(path: &Path) -> Self {
        match decode(path) {
            Ok(image) => Page::Decoded(Arc::new(image)),
            Err(err) => {
                tracing::warn!(path = %path.display(), error = ?err, "Could not decode page; showing placeholder");
                Page::Missing
            },
        }
    }

    pub fn is_missing(&self) -> bool {
        matches!(self, Page::Missing)
    }

    pub fn image(&self) -> Option<&Arc<DynamicImage>> {
        match self {
            Page::Decoded(image) => Some(image),
            Page::Missing => None,
        }
    }

    /// Something to put on screen: the page itself, or the placeholder.
    pub fn displayable(&self) -> Arc<DynamicImage> {
        match self {
            Page::Decoded(image) => image.clone(),
            Page::Missing => placeholder(),
        }
    }
}
impl From<DynamicImage> for Page {
    fn from(image: DynamicImage) -> Self {
        Page::Decoded(Arc::new(image))
    }
}

/// Decode the image file at `path`, sniffing its format from the contents.
pub fn decode(path: &Path) -> Result<DynamicImage> {
    ImageReader::open(path)
        .or_raise(|| ErrorKind::Io)?
        .with_guessed_format()
        .or_raise(|| ErrorKind::Io)?
        .decode()
        .or_raise(|| ErrorKind::Decode(path.to_path_buf()))
}

/// Pixel dimensions of the image at `path`, read from its header.
pub fn dimensions(path: &Path) -> Result<(u32, u32)> {
    image::image_dimensions(path).or_raise(|| ErrorKind::Decode(path.to_path_buf()))
}

/// Upper-case format name of the image at `path` (`PNG`, `JPEG`, ...).
pub fn format_name(path: &Path) -> Result<String> {
    let reader = ImageReader::open(path)
        .or_raise(|| ErrorKind::Io)?
        .with_guessed_format()
        .or_raise(|| ErrorKind::Io)?;
    let format = reader.format().ok_or_raise(|| ErrorKind::Decode(path.to_path_buf()))?;
    Ok(format!("{format:?}").to_uppercase())
}
