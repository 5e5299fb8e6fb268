//! Background segment merging.
//!
//! A merge rewrites every older segment into a single `temp` file holding
//! only the newest record for each live key, then hands the rewritten
//! index back to the owner task, which swaps it in, deletes the merged
//! segments, and rescans. The compactor itself never touches the live
//! index or the active segment.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::mpsc;

use crate::error::Result;
use crate::keydir::{KeyDir, Location};
use crate::record;
use crate::segment::{self, TEMP_FILE};

use super::worker::Command;

/// Everything a merge needs, captured while the owner held the state: the
/// index snapshot (with the pivot key already removed) and the segment set
/// as of snapshot time.
pub(crate) struct MergeJob {
    pub dir: PathBuf,
    pub segment_size: u64,
    pub numbers: Arc<Vec<u64>>,
    pub snapshot: KeyDir,
    pub commands: mpsc::Sender<Command>,
}

impl MergeJob {
    /// Runs the rewrite and reports the outcome to the owner. Any failure
    /// aborts the merge with the original segments intact; a leftover
    /// `temp` file is cleaned up by the next recovery pass or overwritten
    /// by the next merge.
    pub(crate) async fn run(mut self) {
        match self.rewrite() {
            Ok(()) => {
                let index = std::mem::take(&mut self.snapshot);
                if self
                    .commands
                    .send(Command::FinishMerge { index })
                    .await
                    .is_err()
                {
                    tracing::warn!("store closed before merge hand-off");
                }
            }
            Err(e) => {
                tracing::error!(error = %e, "segment merge failed");
                let _ = self.commands.send(Command::AbortMerge).await;
            }
        }
    }

    /// Copies each snapshot record into the temp file raw, without
    /// interpreting it, and points the snapshot entry at its new position.
    /// The temp file becomes `segment-1` during finalization.
    fn rewrite(&mut self) -> Result<()> {
        let mut temp = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(self.dir.join(TEMP_FILE))?;

        let mut out_offset = 0u64;
        for (_, loc) in self.snapshot.iter_mut() {
            let mut reader =
                segment::open_reader_at(&self.dir, self.segment_size, &self.numbers, *loc)?;
            let raw = record::read_record(&mut reader)?;
            temp.write_all(&raw)?;
            *loc = Location::new(1, out_offset);
            out_offset += raw.len() as u64;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{Record, Value};
    use crate::segment::SegmentManager;
    use std::collections::HashMap;
    use std::fs;
    use std::io::{BufRead, BufReader, Seek, SeekFrom};
    use tempfile::TempDir;

    fn encoded(key: &str, value: &str) -> Vec<u8> {
        Record::new(key, Value::Str(value.to_string())).encode()
    }

    /// Three records in segment 1, an overwrite of key2 in segment 2.
    fn seed(dir: &std::path::Path) -> KeyDir {
        let mut segments = SegmentManager::open(dir, 100, 1, vec![1]).expect("open");
        let mut keydir = KeyDir::new();
        for (key, value) in [("key1", "value1"), ("key2", "value2"), ("key3", "value3")] {
            let (loc, _) = segments.append(&encoded(key, value)).expect("append");
            keydir.insert(key, loc);
        }
        let (loc, rolled) = segments
            .append(&encoded("key2", "someOTHERvalue"))
            .expect("append");
        assert!(rolled);
        keydir.insert("key2", loc);
        keydir
    }

    fn make_job(dir: &std::path::Path, snapshot: KeyDir) -> (MergeJob, mpsc::Receiver<Command>) {
        let (tx, rx) = mpsc::channel(4);
        let job = MergeJob {
            dir: dir.to_path_buf(),
            segment_size: 100,
            numbers: Arc::new(vec![1, 2]),
            snapshot,
            commands: tx,
        };
        (job, rx)
    }

    fn read_all(path: &std::path::Path) -> HashMap<String, Value> {
        let mut reader = BufReader::new(fs::File::open(path).expect("open temp"));
        let mut out = HashMap::new();
        loop {
            if reader.fill_buf().expect("fill").is_empty() {
                return out;
            }
            let raw = record::read_record(&mut reader).expect("read");
            let rec = Record::decode(&raw).expect("decode");
            out.insert(rec.key, rec.value);
        }
    }

    #[test]
    fn test_rewrite_copies_only_live_records() {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let snapshot = seed(dir.path());

        let (mut job, _rx) = make_job(dir.path(), snapshot);
        job.rewrite().expect("rewrite");

        let records = read_all(&dir.path().join(TEMP_FILE));
        assert_eq!(records.len(), 3);
        assert_eq!(records["key1"], Value::Str("value1".to_string()));
        assert_eq!(records["key2"], Value::Str("someOTHERvalue".to_string()));
        assert_eq!(records["key3"], Value::Str("value3".to_string()));

        // every snapshot entry now points into the temp file
        for (key, loc) in job.snapshot.iter_mut() {
            assert_eq!(loc.segment, 1);
            let mut reader = BufReader::new(fs::File::open(dir.path().join(TEMP_FILE)).unwrap());
            reader.seek(SeekFrom::Start(loc.pos)).expect("seek");
            let raw = record::read_record(&mut reader).expect("read");
            assert_eq!(&Record::decode(&raw).expect("decode").key, key);
        }
    }

    #[test]
    fn test_rewrite_overwrites_stale_temp() {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let snapshot = seed(dir.path());
        fs::write(dir.path().join(TEMP_FILE), b"leftover garbage").expect("write");

        let (mut job, _rx) = make_job(dir.path(), snapshot);
        job.rewrite().expect("rewrite");

        // a stale temp from an aborted merge must not pollute the new one
        let records = read_all(&dir.path().join(TEMP_FILE));
        assert_eq!(records.len(), 3);
    }

    #[tokio::test]
    async fn test_successful_merge_hands_off_index() {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let snapshot = seed(dir.path());

        let (job, mut rx) = make_job(dir.path(), snapshot);
        job.run().await;

        match rx.recv().await {
            Some(Command::FinishMerge { index }) => {
                assert_eq!(index.len(), 3);
                assert!(index.get("key2").is_some());
            }
            _ => panic!("expected FinishMerge"),
        }
    }

    #[tokio::test]
    async fn test_failed_merge_reports_abort() {
        let dir = TempDir::new().expect("Failed to create temp dir");
        // snapshot referencing a segment that does not exist on disk
        let mut snapshot = KeyDir::new();
        snapshot.insert("key", Location::new(5, 0));

        let (tx, mut rx) = mpsc::channel(4);
        let job = MergeJob {
            dir: dir.path().to_path_buf(),
            segment_size: 100,
            numbers: Arc::new(vec![5]),
            snapshot,
            commands: tx,
        };
        job.run().await;

        assert!(matches!(rx.recv().await, Some(Command::AbortMerge)));
    }
}
