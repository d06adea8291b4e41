//! In-process decoding of bare compressed files.

use crate::Compression;
use crate::backend::Source;
use crate::error::{ErrorKind, Result};
use bzip2::read::BzDecoder;
use exn::ResultExt;
use flate2::read::GzDecoder;
use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::Path;
use tracing::instrument;
#[cfg(feature = "xz")]
use xz2::read::XzDecoder;
#[cfg(feature = "zstd")]
use zstd::stream::read::Decoder as ZstdDecoder;

impl Compression {
    /// Wrap a reader with the appropriate decompression layer.
    pub fn wrap_reader<'a, R: Read + Send + 'a>(&self, reader: R) -> Result<Box<dyn Read + Send + 'a>> {
        Ok(match self {
            Compression::Bzip2 => Box::new(BzDecoder::new(reader)),
            Compression::Gzip => Box::new(GzDecoder::new(reader)),
            #[cfg(feature = "xz")]
            Compression::Xz => Box::new(XzDecoder::new(reader)),
            #[cfg(feature = "zstd")]
            Compression::Zstd => Box::new(ZstdDecoder::new(reader).or_raise(|| ErrorKind::Io)?),
        })
    }
}

/// The decoded member's name: the file name minus its compression suffix.
pub(crate) fn inner_name(archive: &Path) -> String {
    archive.file_stem().map(|stem| stem.to_string_lossy().into_owned()).unwrap_or_else(|| "stream".to_string())
}

pub(crate) fn open(archive: &Path, compression: Compression) -> Result<Source> {
    let file = File::open(archive).or_raise(|| ErrorKind::Io)?;
    Ok(Source::new(compression.wrap_reader(BufReader::new(file))?))
}

#[instrument(skip_all, fields(archive = %archive.display(), format = %compression, output_size))]
pub(crate) fn decode_to(archive: &Path, compression: Compression, target: &Path) -> Result<()> {
    let mut source = open(archive, compression)?;
    let mut output = File::create(target).or_raise(|| ErrorKind::Io)?;
    let size = io::copy(&mut source, &mut output).or_raise(|| ErrorKind::Io)?;
    tracing::Span::current().record("output_size", size);
    Ok(())
}
