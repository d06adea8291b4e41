//! Archive format detection.

use std::fmt::{self, Display, Formatter};
use std::fs::File;
use std::io::Read;
use std::path::Path;

const ZIP_MAGIC: [u8; 4] = [0x50, 0x4B, 0x03, 0x04];
const RAR_MAGIC: [u8; 6] = [0x52, 0x61, 0x72, 0x21, 0x1A, 0x07];
const SEVENZIP_MAGIC: [u8; 6] = [0x37, 0x7A, 0xBC, 0xAF, 0x27, 0x1C];
const TAR_MAGIC: [u8; 5] = *b"ustar";
const TAR_MAGIC_OFFSET: usize = 257;
const BZIP2_MAGIC: [u8; 3] = [0x42, 0x5A, 0x68];
const GZIP_MAGIC: [u8; 2] = [0x1F, 0x8B];
#[cfg(feature = "xz")]
const XZ_MAGIC: [u8; 6] = [0xFD, 0x37, 0x7A, 0x58, 0x5A, 0x00];
#[cfg(feature = "zstd")]
const ZSTD_MAGIC: [u8; 4] = [0x28, 0xB5, 0x2F, 0xFD];

/// Enough to see the tar magic.
const SNIFF_LEN: usize = 512;

/// Stems that mark a compressed file as a tarball (`comic.tar.gz`, `comic.cbt.xz`).
const TARBALL_STEMS: [&str; 2] = [".tar", ".cbt"];

/// A compression format for bare (single-file) streams.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Compression {
    /// Bzip2 compression (.bz2)
    Bzip2,
    /// Gzip compression (.gz)
    Gzip,
    /// XZ/LZMA compression (.xz)
    #[cfg(feature = "xz")]
    Xz,
    /// Zstd compression (.zst)
    #[cfg(feature = "zstd")]
    Zstd,
}
impl Compression {
    /// Detect compression from a (lowercase) file extension.
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext {
            "bz2" => Some(Compression::Bzip2),
            "gz" => Some(Compression::Gzip),
            #[cfg(feature = "xz")]
            "xz" | "lzma" => Some(Compression::Xz),
            #[cfg(feature = "zstd")]
            "zst" => Some(Compression::Zstd),
            _ => None,
        }
    }

    /// Detect compression format from magic bytes.
    pub fn from_magic_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.starts_with(&BZIP2_MAGIC) {
            return Some(Compression::Bzip2);
        }
        if bytes.starts_with(&GZIP_MAGIC) {
            return Some(Compression::Gzip);
        }
        #[cfg(feature = "xz")]
        if bytes.starts_with(&XZ_MAGIC) {
            return Some(Compression::Xz);
        }
        #[cfg(feature = "zstd")]
        if bytes.starts_with(&ZSTD_MAGIC) {
            return Some(Compression::Zstd);
        }
        None
    }

    pub fn extension(&self) -> &'static str {
        match self {
            Compression::Bzip2 => "bz2",
            Compression::Gzip => "gz",
            #[cfg(feature = "xz")]
            Compression::Xz => "xz",
            #[cfg(feature = "zstd")]
            Compression::Zstd => "zst",
        }
    }
}
impl Display for Compression {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

/// How an archive on disk is read.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ArchiveKind {
    /// A multi-member archive (zip, rar, 7z) that the archive tool lists and
    /// extracts member by member.
    Generic,
    /// An uncompressed tarball, read in-process.
    Tar,
    /// A compressed tarball. Decoded in-process into one stream, handed back
    /// whole under a synthetic name; opening that as a [`Tar`](ArchiveKind::Tar)
    /// reaches the members.
    Solid(Compression),
    /// A bare compressed file, decoded in-process.
    Stream(Compression),
}
impl ArchiveKind {
    /// Detect the kind from the file name alone.
    pub fn from_path(path: impl AsRef<Path>) -> Option<Self> {
        let name = path.as_ref().file_name()?.to_str()?.to_lowercase();
        let (stem, ext) = name.rsplit_once('.')?;
        if stem.is_empty() {
            return None;
        }
        match ext {
            "zip" | "cbz" | "rar" | "cbr" | "7z" | "cb7" => Some(ArchiveKind::Generic),
            "tar" | "cbt" => Some(ArchiveKind::Tar),
            "tgz" => Some(ArchiveKind::Solid(Compression::Gzip)),
            "tbz" | "tbz2" => Some(ArchiveKind::Solid(Compression::Bzip2)),
            #[cfg(feature = "xz")]
            "txz" => Some(ArchiveKind::Solid(Compression::Xz)),
            ext => {
                let compression = Compression::from_extension(ext)?;
                match TARBALL_STEMS.iter().any(|suffix| stem.ends_with(suffix)) {
                    true => Some(ArchiveKind::Solid(compression)),
                    false => Some(ArchiveKind::Stream(compression)),
                }
            },
        }
    }

    /// Detect the kind from the first bytes of the file.
    ///
    /// A compressed tarball can't be told apart from any other compressed
    /// file without decompressing it, so those are reported as streams.
    pub fn from_magic_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.starts_with(&ZIP_MAGIC) || bytes.starts_with(&RAR_MAGIC) || bytes.starts_with(&SEVENZIP_MAGIC) {
            return Some(ArchiveKind::Generic);
        }
        if bytes.get(TAR_MAGIC_OFFSET..TAR_MAGIC_OFFSET + TAR_MAGIC.len()) == Some(&TAR_MAGIC[..]) {
            return Some(ArchiveKind::Tar);
        }
        Compression::from_magic_bytes(bytes).map(ArchiveKind::Stream)
    }

    /// Detect the kind by name, falling back to sniffing the file contents.
    pub fn detect(path: impl AsRef<Path>) -> Option<Self> {
        let path = path.as_ref();
        if let Some(kind) = Self::from_path(path) {
            return Some(kind);
        }
        let mut head = Vec::with_capacity(SNIFF_LEN);
        let file = File::open(path).ok()?;
        file.take(SNIFF_LEN as u64).read_to_end(&mut head).ok()?;
        Self::from_magic_bytes(&head)
    }
}

/// Whether `path` looks like something an [`ArchiveSession`](crate::ArchiveSession) can open.
pub fn is_archive(path: impl AsRef<Path>) -> bool {
    let path = path.as_ref();
    path.is_file() && ArchiveKind::detect(path).is_some()
}
