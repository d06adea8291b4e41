//! In-process reading of uncompressed tar archives.

use crate::ArchiveEntry;
use crate::backend::Source;
use crate::error::{ErrorKind, Result};
use crate::listing::Listing;
use exn::ResultExt;
use std::collections::HashSet;
use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::Path;
use tar::{Archive, Entry, Header};
use tracing::instrument;

const BLOCK_SIZE: u64 = 512;

/// Member name as listed: leading `./` and trailing `/` removed.
fn member_name<R: Read>(entry: &Entry<'_, R>) -> io::Result<String> {
    let path = entry.path()?;
    let name = path.to_string_lossy();
    Ok(name.trim_start_matches("./").trim_end_matches('/').to_string())
}

/// Whether a header starts a body that belongs in the member stream.
fn is_member(header: &Header) -> io::Result<bool> {
    Ok(header.entry_type().is_file() && header.entry_size()? > 0)
}

fn open_archive(archive: &Path) -> Result<Archive<BufReader<File>>> {
    let file = File::open(archive).or_raise(|| ErrorKind::Io)?;
    Ok(Archive::new(BufReader::new(file)))
}

#[instrument(skip_all, fields(archive = %archive.display()))]
pub(crate) fn list(archive: &Path) -> Result<Listing> {
    let mut tar = open_archive(archive)?;
    let mut listing = Listing::default();
    let mut seen = HashSet::new();
    for entry in tar.entries().or_raise(|| ErrorKind::Listing)? {
        let entry = entry.or_raise(|| ErrorKind::Listing)?;
        listing.members += 1;
        if !is_member(entry.header()).or_raise(|| ErrorKind::Listing)? {
            continue;
        }
        let size = entry.header().entry_size().or_raise(|| ErrorKind::Listing)?;
        let entry = ArchiveEntry::new(member_name(&entry).or_raise(|| ErrorKind::Listing)?, size);
        if seen.insert(entry.name.clone()) {
            listing.entries.push(entry.clone());
        }
        listing.records.push(entry);
    }
    Ok(listing)
}

/// Copy the first member called `name` to `target`. A missing member writes nothing.
#[instrument(skip_all, fields(archive = %archive.display(), member = name))]
pub(crate) fn extract_one(archive: &Path, name: &str, target: &Path) -> Result<()> {
    let mut tar = open_archive(archive)?;
    for entry in tar.entries().or_raise(|| ErrorKind::Io)? {
        let mut entry = entry.or_raise(|| ErrorKind::Io)?;
        if !is_member(entry.header()).or_raise(|| ErrorKind::Io)? {
            continue;
        }
        if member_name(&entry).or_raise(|| ErrorKind::Io)? != name {
            continue;
        }
        let mut output = File::create(target).or_raise(|| ErrorKind::Io)?;
        io::copy(&mut entry, &mut output).or_raise(|| ErrorKind::Io)?;
        return Ok(());
    }
    tracing::warn!("Member not found in tar archive");
    Ok(())
}

pub(crate) fn open(archive: &Path) -> Result<Source> {
    let file = File::open(archive).or_raise(|| ErrorKind::Io)?;
    Ok(Source::new(Box::new(Bodies::new(BufReader::new(file)))))
}

/// The bodies of a tar archive's non-empty regular files, back to back in
/// archive order: the same stream the archive tool writes for the other kinds.
///
/// Headers, padding and any other entries are skipped. The stream ends at the
/// end-of-archive block, or early if the file is truncated.
struct Bodies<R> {
    inner: R,
    /// Bytes left in the current body.
    remaining: u64,
    /// Padding after the current body, up to the next header.
    padding: u64,
    done: bool,
}
impl<R: Read> Bodies<R> {
    fn new(inner: R) -> Self {
        Self { inner, remaining: 0, padding: 0, done: false }
    }

    /// Advance to the next member body. Returns `false` at the end of the archive.
    fn next_body(&mut self) -> io::Result<bool> {
        loop {
            self.discard(self.padding)?;
            self.padding = 0;
            let mut block = [0u8; BLOCK_SIZE as usize];
            if !read_block(&mut self.inner, &mut block)? || block.iter().all(|byte| *byte == 0) {
                return Ok(false);
            }
            let header = Header::from_byte_slice(&block);
            let size = header.entry_size()?;
            let padded = size.div_ceil(BLOCK_SIZE) * BLOCK_SIZE;
            if is_member(header)? {
                self.remaining = size;
                self.padding = padded - size;
                return Ok(true);
            }
            self.discard(padded)?;
        }
    }

    fn discard(&mut self, len: u64) -> io::Result<()> {
        io::copy(&mut self.inner.by_ref().take(len), &mut io::sink())?;
        Ok(())
    }
}
impl<R: Read> Read for Bodies<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        while self.remaining == 0 {
            if self.done || !self.next_body()? {
                self.done = true;
                return Ok(0);
            }
        }
        let max = buf.len().min(usize::try_from(self.remaining).unwrap_or(usize::MAX));
        let read = self.inner.read(&mut buf[..max])?;
        if read == 0 && max > 0 {
            self.done = true;
            self.remaining = 0;
        }
        self.remaining -= read as u64;
        Ok(read)
    }
}

/// Fill `block`, or return `false` if the input ends first.
fn read_block(reader: &mut impl Read, block: &mut [u8]) -> io::Result<bool> {
    let mut filled = 0;
    while filled < block.len() {
        match reader.read(&mut block[filled..]) {
            Ok(0) => return Ok(false),
            Ok(read) => filled += read,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => return Err(err),
        }
    }
    Ok(true)
}
