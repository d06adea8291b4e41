use crate::error::{ErrorKind, Result};
use exn::{OptionExt, ResultExt};
use std::path::{Component, Path, PathBuf};
use url::Url;

/// Where a source file's thumbnail lives: a hash of the source's `file://` URI.
///
/// The same file reached through `.` or `..` segments, or through a relative
/// path, hashes to the same address.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ContentAddress {
    uri: Url,
    hash: String,
}
impl ContentAddress {
    pub fn for_path(source: impl AsRef<Path>) -> Result<Self> {
        let source = source.as_ref();
        let absolute = std::path::absolute(source).or_raise(|| ErrorKind::InvalidPath(source.to_path_buf()))?;
        let normalized = normalize(&absolute);
        let uri = Url::from_file_path(&normalized).ok().ok_or_raise(|| ErrorKind::InvalidPath(normalized.clone()))?;
        let hash = blake3::hash(uri.as_str().as_bytes()).to_string();
        Ok(Self { uri, hash })
    }

    pub fn uri(&self) -> &Url {
        &self.uri
    }

    /// Lowercase hex digest of the URI.
    pub fn hash(&self) -> &str {
        &self.hash
    }

    /// File name of the thumbnail inside the cache directory.
    pub fn file_name(&self) -> String {
        format!("{}.png", self.hash)
    }
}

/// Resolve `.` and `..` without touching the filesystem.
fn normalize(path: &Path) -> PathBuf {
    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {},
            Component::ParentDir => {
                normalized.pop();
            },
            other => normalized.push(other),
        }
    }
    normalized
}
