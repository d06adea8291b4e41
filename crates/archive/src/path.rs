//! Mapping archive member names onto the filesystem.

use crate::error::{ErrorKind, Result};
use std::path::{Component, Path, PathBuf};

/// Resolve where member `name` lands inside `destination`.
///
/// Member names come from untrusted archives, so the result never escapes
/// `destination`: `..` may only climb back out of directories the name
/// itself entered, and absolute names are re-rooted. Null bytes and names
/// that resolve to nothing are rejected.
///
/// # Examples
///
/// ```
/// use std::path::Path;
/// use folio_archive::member_path;
///
/// let root = Path::new("/tmp/pages");
/// assert_eq!(member_path(root, "ch1/001.jpg").unwrap(), root.join("ch1/001.jpg"));
/// assert_eq!(member_path(root, "/abs/002.jpg").unwrap(), root.join("abs/002.jpg"));
/// assert!(member_path(root, "../../etc/passwd").is_err());
/// ```
pub fn member_path(destination: impl AsRef<Path>, name: &str) -> Result<PathBuf> {
    let mut components = Vec::new();
    for component in Path::new(name).components() {
        match component {
            Component::Normal(s) => {
                if s.as_encoded_bytes().contains(&0) {
                    exn::bail!(ErrorKind::InvalidMember(name.to_string()));
                }
                components.push(s)
            },
            Component::CurDir | Component::RootDir => {},
            Component::Prefix(_) => exn::bail!(ErrorKind::InvalidMember(name.to_string())),
            Component::ParentDir => {
                if components.pop().is_none() {
                    exn::bail!(ErrorKind::InvalidMember(name.to_string()));
                }
            },
        }
    }
    match components.is_empty() {
        true => exn::bail!(ErrorKind::InvalidMember(name.to_string())),
        false => Ok(destination.as_ref().join(components.into_iter().collect::<PathBuf>())),
    }
}
