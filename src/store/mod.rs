//! The embedded store.
//!
//! # Architecture
//!
//! ```text
//!  callers ──► Store handle ──► command channel ──► owner task
//!     │                                               │
//!     │  (value reads on own                          ├─ active segment
//!     │   transient handles)                          ├─ key directory
//!     ▼                                               │
//!  segment files ◄──────────── merge task ◄───────────┘ (spawned on roll)
//! ```
//!
//! The owner task applies puts, index lookups, and merge finalizations one
//! at a time. A get resolves its location through the owner, then opens
//! and reads the segment file itself, so the owner never blocks on read
//! I/O. Rolling the active segment spawns a background merge of the older
//! segments when none is running.

mod compaction;
mod worker;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tempfile::TempDir;
use tokio::sync::{mpsc, oneshot};

use crate::config::StoreConfig;
use crate::error::{Error, Result};
use crate::flock::FileLock;
use crate::record::{self, Record, Value};
use crate::recovery;
use crate::segment;

use worker::{Command, Worker};

const LOCK_FILE: &str = "emberdb.lock";
const COMMAND_BUFFER: usize = 64;

/// Handle to an open store. Cloning is cheap; all clones share one owner
/// task. Handles must be used within a tokio runtime.
///
/// Dropping the last handle shuts the owner task down; [`Store::close`]
/// does the same but waits for any in-flight merge to finalize first.
#[derive(Clone)]
pub struct Store {
    commands: mpsc::Sender<Command>,
    dir: PathBuf,
    segment_size: u64,
    _temp: Option<Arc<TempDir>>,
}

impl Store {
    /// Opens a store on `dir` with the default segment size bound,
    /// creating the directory if needed.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Store> {
        Self::open_with_config(StoreConfig::new(dir))
    }

    /// Opens a store with explicit options. An existing directory is
    /// recovered by scanning every segment; an empty one gets a fresh
    /// `segment-1`. The segment size bound must match the one the
    /// directory was written with.
    pub fn open_with_config(config: StoreConfig) -> Result<Store> {
        config.validate()?;

        let mut temp = None;
        let dir = if config.temporary {
            let tempdir = TempDir::new()?;
            let path = tempdir.path().to_path_buf();
            temp = Some(Arc::new(tempdir));
            path
        } else if let Some(dir) = &config.dir {
            dir.clone()
        } else {
            return Err(Error::Config(
                "either a data directory or a temporary database is required".to_string(),
            ));
        };

        std::fs::create_dir_all(&dir)?;
        let lock = FileLock::lock(dir.join(LOCK_FILE))?;
        let recovered = recovery::recover(&dir, config.segment_size)?;

        let (tx, rx) = mpsc::channel(COMMAND_BUFFER);
        let worker = Worker::new(dir.clone(), recovered, lock, tx.downgrade());
        tokio::spawn(worker.run(rx));

        Ok(Store {
            commands: tx,
            dir,
            segment_size: config.segment_size,
            _temp: temp,
        })
    }

    /// The data directory this store runs against.
    pub fn path(&self) -> &Path {
        &self.dir
    }

    /// Stores a string value for `key`, replacing any previous value of
    /// either kind.
    pub async fn put(&self, key: &str, value: &str) -> Result<()> {
        self.put_record(Record::new(key, Value::Str(value.to_string())))
            .await
    }

    /// Stores a signed 64-bit value for `key`, replacing any previous
    /// value of either kind.
    pub async fn put_int64(&self, key: &str, value: i64) -> Result<()> {
        self.put_record(Record::new(key, Value::Int64(value))).await
    }

    /// Fetches the string value for `key`. Fails with
    /// [`Error::TypeMismatch`] if the key holds an int64.
    pub async fn get(&self, key: &str) -> Result<String> {
        match self.read(key).await? {
            Value::Str(s) => Ok(s),
            Value::Int64(_) => Err(Error::TypeMismatch("string")),
        }
    }

    /// Fetches the int64 value for `key`. Fails with
    /// [`Error::TypeMismatch`] if the key holds a string.
    pub async fn get_int64(&self, key: &str) -> Result<i64> {
        match self.read(key).await? {
            Value::Int64(v) => Ok(v),
            Value::Str(_) => Err(Error::TypeMismatch("int64")),
        }
    }

    /// Closes the store: waits until no merge is in progress, then closes
    /// the active file and releases the directory lock. Operations
    /// submitted after close fail with [`Error::Closed`].
    pub async fn close(&self) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(Command::Close { reply })
            .await
            .map_err(|_| Error::Closed)?;
        rx.await.map_err(|_| Error::Closed)?
    }

    async fn put_record(&self, record: Record) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(Command::Put { record, reply })
            .await
            .map_err(|_| Error::Closed)?;
        rx.await.map_err(|_| Error::Closed)?
    }

    /// Serialized index lookup, then a read on our own transient file
    /// handle. The first failure is retried once against a fresh lookup:
    /// a merge may have replaced the segment files between the lookup and
    /// the read, and a retried lookup resolves against the post-merge
    /// index.
    async fn read(&self, key: &str) -> Result<Value> {
        match self.read_once(key).await {
            Err(Error::Io(_)) | Err(Error::Corrupted(_)) => self.read_once(key).await,
            result => result,
        }
    }

    async fn read_once(&self, key: &str) -> Result<Value> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(Command::Lookup {
                key: key.to_string(),
                reply,
            })
            .await
            .map_err(|_| Error::Closed)?;
        let Some(plan) = rx.await.map_err(|_| Error::Closed)? else {
            return Err(Error::NotFound);
        };

        let mut reader =
            segment::open_reader_at(&self.dir, self.segment_size, &plan.numbers, plan.loc)?;
        record::read_value(&mut reader)
    }
}
