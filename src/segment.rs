//! Segment file management.
//!
//! Data lives in files named `segment-N` (N a positive decimal, no
//! padding). The highest-numbered segment is the only one open for append;
//! everything below it is immutable until compaction deletes it.

use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use itertools::Itertools as _;

use crate::error::{Error, Result};
use crate::keydir::Location;

const SEGMENT_PREFIX: &str = "segment";

/// Name of the compactor's scratch file inside the data directory.
pub const TEMP_FILE: &str = "temp";

/// Path of segment `number` inside `dir`.
pub fn segment_path(dir: &Path, number: u64) -> PathBuf {
    dir.join(format!("{SEGMENT_PREFIX}-{number}"))
}

/// Lists the numbers of all segment files in `dir`, sorted numerically.
/// Files that do not match the `segment-N` shape are ignored.
pub fn list_segments(dir: &Path) -> Result<Vec<u64>> {
    let mut numbers = Vec::new();
    for entry in fs::read_dir(dir)? {
        let name = entry?.file_name();
        if let Some(number) = name.to_str().and_then(parse_segment_name) {
            numbers.push(number);
        }
    }
    Ok(numbers.into_iter().sorted().collect())
}

fn parse_segment_name(name: &str) -> Option<u64> {
    let digits = name.strip_prefix("segment-")?;
    // positive decimal, no leading zeros
    if digits.is_empty() || digits.starts_with('0') {
        return None;
    }
    digits.parse().ok()
}

/// Opens a buffered reader positioned at `loc`.
///
/// If the location's segment is not in the known set (a merge renumbered
/// the files since the location was recorded), falls back to segment 1 at
/// the packed logical offset, reproducing the lookup a full rescan would
/// perform.
pub fn open_reader_at(
    dir: &Path,
    segment_size: u64,
    numbers: &[u64],
    loc: Location,
) -> Result<BufReader<File>> {
    let loc = if numbers.contains(&loc.segment) {
        loc
    } else {
        Location::new(1, loc.to_offset(segment_size))
    };
    let mut file = File::open(segment_path(dir, loc.segment))?;
    file.seek(SeekFrom::Start(loc.pos))?;
    Ok(BufReader::new(file))
}

/// Owns the active append handle and the set of segments on disk. Only the
/// owner task holds one of these; readers open their own transient handles
/// via [`open_reader_at`].
pub struct SegmentManager {
    dir: PathBuf,
    segment_size: u64,
    active: File,
    number: u64,
    out_offset: u64,
    numbers: Arc<Vec<u64>>,
}

impl SegmentManager {
    /// Opens segment `number` for append, creating it if absent. `numbers`
    /// is the full set of segments currently in the directory; recovery
    /// supplies it after its scan.
    pub fn open(dir: &Path, segment_size: u64, number: u64, numbers: Vec<u64>) -> Result<Self> {
        let active = OpenOptions::new()
            .append(true)
            .create(true)
            .open(segment_path(dir, number))?;
        let out_offset = active.metadata()?.len();
        Ok(Self {
            dir: dir.to_path_buf(),
            segment_size,
            active,
            number,
            out_offset,
            numbers: Arc::new(numbers),
        })
    }

    pub fn active_number(&self) -> u64 {
        self.number
    }

    pub fn out_offset(&self) -> u64 {
        self.out_offset
    }

    pub fn segment_size(&self) -> u64 {
        self.segment_size
    }

    /// The sorted set of segment numbers currently on disk. Shared with
    /// readers and the compactor, which need it for the stale-segment
    /// fall-back.
    pub fn numbers(&self) -> Arc<Vec<u64>> {
        Arc::clone(&self.numbers)
    }

    /// Appends one encoded record to the active segment, rolling first if
    /// it would overflow the size bound. The record goes down in a single
    /// write so a torn header cannot be left mid-segment. Returns where
    /// the record landed and whether a roll happened.
    pub fn append(&mut self, encoded: &[u8]) -> Result<(Location, bool)> {
        let len = encoded.len() as u64;
        if len > self.segment_size {
            return Err(Error::Config(format!(
                "record of {len} bytes exceeds segment size bound {}",
                self.segment_size
            )));
        }

        let size = self.active.metadata()?.len();
        let mut rolled = false;
        if len > self.segment_size.saturating_sub(size) {
            self.roll()?;
            rolled = true;
        }

        self.active.write_all(encoded)?;
        let loc = Location::new(self.number, self.out_offset);
        self.out_offset += len;
        Ok((loc, rolled))
    }

    /// Closes the active segment and opens the next-numbered one.
    fn roll(&mut self) -> Result<()> {
        self.number += 1;
        // assignment drops (closes) the previous active handle
        self.active = OpenOptions::new()
            .append(true)
            .create(true)
            .open(segment_path(&self.dir, self.number))?;
        self.out_offset = 0;

        let mut numbers = self.numbers.as_ref().clone();
        numbers.push(self.number);
        self.numbers = Arc::new(numbers);

        tracing::info!(segment = self.number, "rolled to new segment");
        Ok(())
    }
}
