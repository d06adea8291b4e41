use folio_archive::{alphanumeric_sort, is_image_name};
use regex::Regex;
use std::sync::LazyLock;

static FRONT: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)(cover|front)").unwrap());

/// Pick the member most likely to be the cover of a comic book archive.
///
/// Images only, in natural order. The first name mentioning "cover" or
/// "front" (but not "back") wins; otherwise the first image does.
pub fn guess_cover<S: AsRef<str>>(names: &[S]) -> Option<String> {
    let mut images: Vec<&str> = names.iter().map(AsRef::as_ref).filter(|name| is_image_name(name)).collect();
    alphanumeric_sort(&mut images);
    images
        .iter()
        .find(|name| FRONT.is_match(name) && !name.to_lowercase().contains("back"))
        .or_else(|| images.first())
        .map(|name| name.to_string())
}
