//! Parser for the technical listing (`l -slt`) printed by the archive tool.
//!
//! The output has three sections separated by delimiter lines: a header
//! describing the archive itself, one block of `Key = Value` lines per member,
//! and a footer. The parser is a small state machine fed one line at a time;
//! it only ever moves forward (header, listing, footer) and stops at the
//! footer.

use crate::ArchiveEntry;
use std::collections::HashSet;

const DELIMITER: &str = "----------";
const ENCRYPTED_HEADER_SUFFIX: &str = ": Can not open encrypted archive. Wrong password?";

/// Which section of the listing the parser is in.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ListingState {
    Header,
    Listing,
    Footer,
}
impl ListingState {
    /// State entered on reading a delimiter line.
    fn on_delimiter(self) -> Self {
        match self {
            ListingState::Header => ListingState::Listing,
            ListingState::Listing | ListingState::Footer => ListingState::Footer,
        }
    }
}

/// The tool refused to read the archive header without the right password.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EncryptedHeader;

/// Everything learned from one listing.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Listing {
    /// Non-empty members, in listing order, each name once.
    pub entries: Vec<ArchiveEntry>,
    /// Every non-empty member record in listing order, repeated names
    /// included. The tool streams all of them, so extraction splits by these.
    pub records: Vec<ArchiveEntry>,
    /// Number of `Path` records seen, including empty members and directories.
    pub members: usize,
    /// The archive reported `Solid = +`.
    pub solid: bool,
    /// At least one member reported `Encrypted = +`.
    pub encrypted: bool,
}

#[derive(Debug)]
pub struct ListingParser {
    state: ListingState,
    path: Option<String>,
    seen: HashSet<String>,
    listing: Listing,
}
impl Default for ListingParser {
    fn default() -> Self {
        Self::new()
    }
}
impl ListingParser {
    pub fn new() -> Self {
        Self { state: ListingState::Header, path: None, seen: HashSet::new(), listing: Listing::default() }
    }

    pub fn state(&self) -> ListingState {
        self.state
    }

    /// Feed one line of tool output (a trailing line ending is ignored).
    ///
    /// Fails only while still in the header, when the tool reports that the
    /// header itself is encrypted.
    pub fn feed(&mut self, line: &str) -> Result<(), EncryptedHeader> {
        let line = line.trim_end_matches(['\r', '\n']);
        if line.starts_with(DELIMITER) {
            self.state = self.state.on_delimiter();
            return Ok(());
        }
        match self.state {
            ListingState::Header => {
                if (line.starts_with("Error:") || line.starts_with("ERROR:")) && line.ends_with(ENCRYPTED_HEADER_SUFFIX)
                {
                    return Err(EncryptedHeader);
                }
                if line == "Solid = +" {
                    self.listing.solid = true;
                }
            },
            ListingState::Listing => self.feed_member(line),
            ListingState::Footer => {},
        }
        Ok(())
    }

    fn feed_member(&mut self, line: &str) {
        if let Some(path) = line.strip_prefix("Path = ") {
            self.listing.members += 1;
            self.path = Some(path.to_string());
        } else if let Some(size) = line.strip_prefix("Size = ") {
            let size = size.trim().parse::<u64>().unwrap_or(0);
            if size == 0 {
                return;
            }
            if let Some(path) = self.path.take() {
                let entry = ArchiveEntry::new(path, size);
                match self.seen.insert(entry.name.clone()) {
                    true => self.listing.entries.push(entry.clone()),
                    false => tracing::debug!(member = %entry.name, "Listing duplicate archive member once"),
                }
                self.listing.records.push(entry);
            }
        } else if line == "Encrypted = +" {
            self.listing.encrypted = true;
        }
    }

    pub fn finish(self) -> Listing {
        self.listing
    }

    /// Parse a complete listing, stopping early once the footer is reached.
    pub fn parse(output: &str) -> Result<Listing, EncryptedHeader> {
        let mut parser = Self::new();
        for line in output.lines() {
            parser.feed(line)?;
            if parser.state() == ListingState::Footer {
                break;
            }
        }
        Ok(parser.finish())
    }
}
