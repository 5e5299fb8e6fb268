//! Directory recovery: rebuilding the index from segment files.
//!
//! Runs on open and again after every merge. Segments are scanned oldest
//! to newest so the last location observed for a key wins, matching write
//! order. The newest segment is then reopened for append.

use std::fs;
use std::io::{BufRead, BufReader};
use std::path::Path;

use crate::error::Result;
use crate::keydir::{KeyDir, Location};
use crate::record::{self, Record};
use crate::segment::{self, SegmentManager, TEMP_FILE};

/// Result of a recovery pass: the rebuilt index and the segment manager
/// positioned on the newest segment.
pub(crate) struct Recovered {
    pub keydir: KeyDir,
    pub segments: SegmentManager,
}

/// Scans `dir` and rebuilds the store state. On an empty directory this
/// creates an empty `segment-1`. Corruption in any segment aborts the
/// whole pass; the store refuses to run against an unreadable directory.
pub(crate) fn recover(dir: &Path, segment_size: u64) -> Result<Recovered> {
    clean_temp(dir)?;

    let numbers = segment::list_segments(dir)?;
    let Some(&newest) = numbers.last() else {
        let segments = SegmentManager::open(dir, segment_size, 1, vec![1])?;
        tracing::info!(dir = %dir.display(), "initialized empty store");
        return Ok(Recovered {
            keydir: KeyDir::new(),
            segments,
        });
    };

    let mut keydir = KeyDir::new();
    for &number in &numbers {
        scan_segment(dir, number, &mut keydir)?;
    }

    let segments = SegmentManager::open(dir, segment_size, newest, numbers)?;
    tracing::info!(
        dir = %dir.display(),
        active = newest,
        keys = keydir.len(),
        "recovery complete"
    );
    Ok(Recovered { keydir, segments })
}

/// Removes or promotes a leftover compaction scratch file. If `segment-1`
/// still exists the merge never finished deleting the old segments, so
/// `temp` is stale; otherwise `temp` is the merged segment awaiting its
/// final name.
fn clean_temp(dir: &Path) -> Result<()> {
    let temp = dir.join(TEMP_FILE);
    if !temp.exists() {
        return Ok(());
    }
    if segment::segment_path(dir, 1).exists() {
        fs::remove_file(&temp)?;
        tracing::warn!(dir = %dir.display(), "removed stale compaction temp file");
    } else {
        fs::rename(&temp, segment::segment_path(dir, 1))?;
        tracing::info!(dir = %dir.display(), "promoted compaction temp file to segment-1");
    }
    Ok(())
}

/// Streams every record in one segment, recording each key's location.
fn scan_segment(dir: &Path, number: u64, keydir: &mut KeyDir) -> Result<()> {
    let file = fs::File::open(segment::segment_path(dir, number))?;
    let mut reader = BufReader::new(file);
    let mut pos = 0u64;
    loop {
        // EOF at a record boundary ends the segment cleanly; EOF anywhere
        // else surfaces as corruption from the codec.
        if reader.fill_buf()?.is_empty() {
            return Ok(());
        }
        let raw = record::read_record(&mut reader)?;
        let rec = Record::decode(&raw)?;
        keydir.insert(rec.key, Location::new(number, pos));
        pos += raw.len() as u64;
    }
}
