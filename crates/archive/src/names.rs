use regex::Regex;
use std::cmp::Ordering;
use std::sync::LazyLock;

static IMAGE_EXTENSION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\.(jpg|jpeg|png|gif|tif|tiff|bmp|webp)\s*$").unwrap());

/// Whether a member or file name has a displayable image extension.
pub fn is_image_name(name: &str) -> bool {
    IMAGE_EXTENSION.is_match(name)
}

/// Sort names the way a person would: digit runs compare by numeric value,
/// everything else compares case-insensitively. `2.jpg` comes before `10.jpg`.
pub fn alphanumeric_sort<S: AsRef<str>>(names: &mut [S]) {
    names.sort_by_cached_key(|name| sort_key(name.as_ref()));
}

/// One run of a name: all digits or no digits. Numbers order before text.
#[derive(Debug, PartialEq, Eq, PartialOrd, Ord)]
enum Chunk {
    Number(Digits),
    Text(String),
}

/// A digit run without its leading zeros, compared by magnitude.
#[derive(Debug, PartialEq, Eq)]
struct Digits(String);
impl Ord for Digits {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.len().cmp(&other.0.len()).then_with(|| self.0.cmp(&other.0))
    }
}
impl PartialOrd for Digits {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

fn sort_key(name: &str) -> Vec<Chunk> {
    let mut chunks = Vec::new();
    let mut rest = name;
    while let Some(first) = rest.chars().next() {
        let numeric = first.is_ascii_digit();
        let end = rest.find(|c: char| c.is_ascii_digit() != numeric).unwrap_or(rest.len());
        let (run, tail) = rest.split_at(end);
        chunks.push(match numeric {
            true => Chunk::Number(Digits(run.trim_start_matches('0').to_string())),
            false => Chunk::Text(run.to_lowercase()),
        });
        rest = tail;
    }
    chunks
}
