//! The owner task.
//!
//! All mutation of the store funnels through a single task that owns the
//! active segment handle and the live index. Callers hand operations over
//! mpsc and get replies over oneshot channels, which turns concurrent
//! puts, lookups, and merge finalizations into one serialized stream.
//! Value reads stay outside: a lookup only resolves a location, and the
//! caller does its own file I/O on a transient handle.

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};

use crate::error::Result;
use crate::flock::FileLock;
use crate::keydir::{KeyDir, Location};
use crate::record::Record;
use crate::recovery::{self, Recovered};
use crate::segment::{self, SegmentManager};

use super::compaction::MergeJob;

/// A resolved index lookup: where the record lives and which segments
/// existed at lookup time (the reader needs the set for the stale-segment
/// fall-back).
#[derive(Debug)]
pub(crate) struct ReadPlan {
    pub loc: Location,
    pub numbers: Arc<Vec<u64>>,
}

pub(crate) enum Command {
    Put {
        record: Record,
        reply: oneshot::Sender<Result<()>>,
    },
    Lookup {
        key: String,
        reply: oneshot::Sender<Option<ReadPlan>>,
    },
    /// Sent by the compactor after a successful rewrite; carries the
    /// snapshot index updated to the temp file's positions.
    FinishMerge { index: KeyDir },
    /// Sent by the compactor when a rewrite failed, so merging can be
    /// retried on a later roll.
    AbortMerge,
    Close {
        reply: oneshot::Sender<Result<()>>,
    },
}

pub(crate) struct Worker {
    dir: PathBuf,
    segments: SegmentManager,
    keydir: KeyDir,
    /// Key whose put triggered the most recent roll. Its authoritative
    /// record lives in the new active segment, so merges must not re-emit
    /// it from an older one.
    pivot: Option<String>,
    /// Segment numbers being merged while a merge is in flight.
    merging: Option<Vec<u64>>,
    pending_close: Option<oneshot::Sender<Result<()>>>,
    /// Weak so the command channel closes when the last store handle is
    /// dropped; merge jobs get an upgraded sender for the hand-off.
    commands: mpsc::WeakSender<Command>,
    lock: Option<FileLock>,
}

impl Worker {
    pub(crate) fn new(
        dir: PathBuf,
        recovered: Recovered,
        lock: FileLock,
        commands: mpsc::WeakSender<Command>,
    ) -> Self {
        Self {
            dir,
            segments: recovered.segments,
            keydir: recovered.keydir,
            pivot: None,
            merging: None,
            pending_close: None,
            commands,
            lock: Some(lock),
        }
    }

    pub(crate) async fn run(mut self, mut rx: mpsc::Receiver<Command>) {
        while let Some(command) = rx.recv().await {
            if self.handle(command) {
                break;
            }
        }
    }

    /// Applies one command; returns true when the loop should stop.
    fn handle(&mut self, command: Command) -> bool {
        match command {
            Command::Put { record, reply } => {
                let _ = reply.send(self.put(record));
                false
            }
            Command::Lookup { key, reply } => {
                let _ = reply.send(self.lookup(&key));
                false
            }
            Command::FinishMerge { index } => {
                if let Err(e) = self.finish_merge(index) {
                    tracing::error!(error = %e, "merge finalization failed");
                }
                if let Some(reply) = self.pending_close.take() {
                    self.lock.take();
                    let _ = reply.send(Ok(()));
                    return true;
                }
                self.maybe_start_merge();
                false
            }
            Command::AbortMerge => {
                tracing::warn!("segment merge aborted, keeping previous index");
                self.merging = None;
                if let Some(reply) = self.pending_close.take() {
                    self.lock.take();
                    let _ = reply.send(Ok(()));
                    return true;
                }
                false
            }
            Command::Close { reply } => {
                if self.merging.is_some() {
                    // finish the in-flight merge first, then acknowledge
                    self.pending_close = Some(reply);
                    false
                } else {
                    self.lock.take();
                    let _ = reply.send(Ok(()));
                    true
                }
            }
        }
    }

    /// Appends the record and indexes it. On an append error the index is
    /// left untouched: either the record was wholly written and indexed,
    /// or it was never indexed at all.
    fn put(&mut self, record: Record) -> Result<()> {
        let encoded = record.encode();
        let (loc, rolled) = self.segments.append(&encoded)?;
        self.keydir.insert(record.key.clone(), loc);
        if rolled {
            self.pivot = Some(record.key);
            self.maybe_start_merge();
        }
        Ok(())
    }

    fn lookup(&self, key: &str) -> Option<ReadPlan> {
        let loc = self.keydir.get(key)?;
        Some(ReadPlan {
            loc,
            numbers: self.segments.numbers(),
        })
    }

    /// Kicks off a merge of every segment but the newest, unless one is
    /// already running or there is nothing worth merging. The newest
    /// segment and at most one predecessor never justify a rewrite.
    fn maybe_start_merge(&mut self) {
        if self.merging.is_some() || self.pending_close.is_some() {
            return;
        }
        let numbers = self.segments.numbers();
        if numbers.len() <= 2 {
            return;
        }
        let Some(commands) = self.commands.upgrade() else {
            return;
        };

        let merge_set: Vec<u64> = numbers[..numbers.len() - 1].to_vec();
        let mut snapshot = self.keydir.snapshot();
        if let Some(pivot) = &self.pivot {
            snapshot.remove(pivot);
        }

        tracing::info!(
            segments = ?merge_set,
            keys = snapshot.len(),
            "starting segment merge"
        );
        self.merging = Some(merge_set);
        let job = MergeJob {
            dir: self.dir.clone(),
            segment_size: self.segments.segment_size(),
            numbers,
            snapshot,
            commands,
        };
        tokio::spawn(job.run());
    }

    /// Installs the rewritten index, deletes the merged segments, and
    /// rescans the directory, which promotes the temp file to `segment-1`
    /// and reopens the newest segment for append. Puts that landed in the
    /// active segment during the merge are picked back up by the rescan.
    ///
    /// If the swap fails partway the previous index is reinstated and the
    /// active segment keeps its current handle, so the store stays
    /// operational to the extent the directory allows.
    fn finish_merge(&mut self, index: KeyDir) -> Result<()> {
        let merged = self.merging.take().unwrap_or_default();
        let previous = std::mem::replace(&mut self.keydir, index);

        match self.swap_segments(&merged) {
            Ok(recovered) => {
                self.keydir = recovered.keydir;
                self.segments = recovered.segments;
                tracing::info!(
                    merged = merged.len(),
                    active = self.segments.active_number(),
                    keys = self.keydir.len(),
                    "merge finalized"
                );
                Ok(())
            }
            Err(e) => {
                self.keydir = previous;
                Err(e)
            }
        }
    }

    fn swap_segments(&self, merged: &[u64]) -> Result<Recovered> {
        for number in merged {
            fs::remove_file(segment::segment_path(&self.dir, *number))?;
        }
        recovery::recover(&self.dir, self.segments.segment_size())
    }
}
