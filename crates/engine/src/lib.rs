//! # Engine — The DriftKV Transactional Store
//!
//! An embedded, single-process, transactional key-value store persisted to
//! one append-only log file. State lives in a tree of named buckets; every
//! update runs as a serializable transaction whose changeset is framed
//! through a pluggable codec pipeline, appended to the log, fsynced, and
//! only then merged into the committed tree.
//!
//! ## Architecture
//!
//! ```text
//! Client
//!   |
//!   v
//! ┌──────────────────────────────────────────────────┐
//! │                      DB                          │
//! │                                                  │
//! │ update(f) ── overlay ──> Record ──> backend      │
//! │                  |          (json|gzip|aes)      │
//! │                  |               |               │
//! │                  |               v               │
//! │                  |        log file + fsync       │
//! │                  |               | ok            │
//! │                  v               v               │
//! │           committed tree <── apply changeset     │
//! │                  ^                               │
//! │ read(f) ─────────┘   (shared lock, overlay       │
//! │                       present but read-only)     │
//! └──────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Responsibilities
//!
//! | Module         | Purpose                                              |
//! |----------------|------------------------------------------------------|
//! | `lib.rs`       | `Db` struct, open/close, options, stats, helpers     |
//! | [`tx`]         | `Tx`/`BucketTx`: the overlay-plus-committed view     |
//! | [`write`]      | read/update scopes and the commit protocol           |
//! | [`recovery`]   | log replay at open                                   |
//! | [`compaction`] | snapshot-and-rename log rewrite                      |
//! | [`log`]        | the backing file: append position, truncate, fsync   |
//!
//! ## Durability
//!
//! A commit is encode + flush + fsync, in that order, before the in-memory
//! tree changes. Any failure truncates the log back to its pre-commit
//! length and leaves the committed tree untouched, so the file never holds
//! a half-applied transaction and memory never runs ahead of disk. A torn
//! final record from a crash is discarded at the next open.

mod compaction;
mod error;
mod log;
mod recovery;
mod tx;
mod write;

pub use backend::{
    aes, dummy, gzip, gzip_json, gzip_level, json, Backend, BackendError, BackendFactory, Closable,
    Reader, Record, Writer,
};
pub use bucket::{Bucket, Value};
pub use error::{Error, Result};
pub use tx::{BucketTx, Tx};

use crate::log::LogFile;
use ::log::debug;
use parking_lot::{Mutex, RwLock};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// The bucket the path-less helpers ([`Db::get`], [`Db::set`] and friends)
/// operate on. Collision-proof by being nobody's idea of a sensible name.
pub const DEFAULT_BUCKET: &str = "☢";

/// Engine configuration, captured at open and immutable from then on.
pub struct Options {
    /// Produces the codec pipeline. Invoked at open and again at every
    /// compaction. Defaults to plain JSON.
    pub backend: BackendFactory,

    /// Deep-copy values while applying a changeset into the committed tree,
    /// so the tree never shares an allocation with anything a caller still
    /// holds.
    pub copy_on_set: bool,

    /// Deep-copy values returned by the `Db`-level read helpers.
    pub copy_on_get: bool,
}

impl Default for Options {
    fn default() -> Self {
        Options {
            backend: json(),
            copy_on_set: false,
            copy_on_get: false,
        }
    }
}

impl fmt::Debug for Options {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Options")
            .field("copy_on_set", &self.copy_on_set)
            .field("copy_on_get", &self.copy_on_get)
            .finish_non_exhaustive()
    }
}

/// Commit/rollback counters, as of one instant.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Stats {
    pub commits: u64,
    pub rollbacks: u64,
}

#[derive(Default)]
pub(crate) struct StatsCounters {
    pub(crate) commits: AtomicU64,
    pub(crate) rollbacks: AtomicU64,
}

/// Everything the single reader-writer lock guards: the committed tree, the
/// codec pipeline, the log file, and the sequence counter.
pub(crate) struct Shared {
    pub(crate) root: Bucket,
    pub(crate) backend: Box<dyn Backend>,
    pub(crate) log: LogFile,
    /// Strictly greater than every index stored in the log; the next commit
    /// uses it and then increments it.
    pub(crate) max_index: u64,
}

/// The engine handle. Share it by reference across threads: any number of
/// concurrent readers, one writer at a time.
pub struct Db {
    shared: RwLock<Shared>,
    /// Recycled transaction overlays, cleared between uses.
    pool: Mutex<Vec<Bucket>>,
    stats: StatsCounters,
    opts: Options,
}

impl fmt::Debug for Db {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let shared = self.shared.read();
        f.debug_struct("Db")
            .field("path", &shared.log.path())
            .field("max_index", &shared.max_index)
            .field("closed", &shared.log.is_closed())
            .field("stats", &self.stats())
            .finish()
    }
}

impl Db {
    /// Opens (or creates) the store at `path` and replays the log into
    /// memory.
    ///
    /// The log file is opened read-write with mode `0600`. A non-empty log
    /// is decoded record by record and each changeset applied in order;
    /// any decode failure other than end-of-stream aborts the open. A torn
    /// final record counts as end-of-stream and is discarded.
    pub fn open<P: AsRef<Path>>(path: P, opts: Options) -> Result<Db> {
        let log = LogFile::open(path.as_ref())?;
        let was_empty = log.len()? == 0;

        let mut backend = (opts.backend)();
        backend.init(log.write_handle()?, log.read_handle()?)?;

        let mut shared = Shared {
            root: Bucket::new(),
            backend,
            log,
            max_index: 0,
        };

        let replayed = if was_empty {
            0
        } else {
            recovery::load(&mut shared, &opts)?
        };

        // the first new commit takes the next value
        shared.max_index += 1;
        shared.log.seek_to_end()?;

        debug!(
            "opened {} ({} records replayed, next index {})",
            path.as_ref().display(),
            replayed,
            shared.max_index
        );

        Ok(Db {
            shared: RwLock::new(shared),
            pool: Mutex::new(Vec::new()),
            stats: StatsCounters::default(),
            opts,
        })
    }

    /// Closes the engine: the backend first (a gzip pipeline finishes its
    /// member), then the log file. Idempotent. Reads keep working against
    /// the in-memory tree; updates and compaction return [`Error::Closed`].
    pub fn close(&self) -> Result<()> {
        let mut shared = self.shared.write();
        if let Some(closable) = shared.backend.as_closable() {
            closable.close()?;
        }
        shared.log.close();
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        self.shared.read().log.is_closed()
    }

    /// The commit/rollback counters.
    pub fn stats(&self) -> Stats {
        Stats {
            commits: self.stats.commits.load(Ordering::Relaxed),
            rollbacks: self.stats.rollbacks.load(Ordering::Relaxed),
        }
    }

    /// The next commit's sequence number. Strictly greater than every index
    /// in the log, and preserved across compactions.
    pub fn max_index(&self) -> u64 {
        self.shared.read().max_index
    }

    /// The log file path.
    pub fn path(&self) -> PathBuf {
        self.shared.read().log.path().to_path_buf()
    }

    // ---- handle pool ----

    pub(crate) fn take_handle(&self) -> Bucket {
        self.pool.lock().pop().unwrap_or_default()
    }

    pub(crate) fn put_handle(&self, mut overlay: Bucket) {
        overlay.clear();
        self.pool.lock().push(overlay);
    }

    // ---- path-less convenience (the default bucket) ----

    /// Reads `key` from [`DEFAULT_BUCKET`].
    pub fn get(&self, key: &str) -> Option<Value> {
        self.bucket_get(&[DEFAULT_BUCKET], key)
    }

    /// Writes `key` into [`DEFAULT_BUCKET`] in its own update.
    pub fn set(&self, key: &str, value: impl Into<Value>) -> Result<()> {
        self.bucket_set(&[DEFAULT_BUCKET], key, value)
    }

    /// Reads `key` from [`DEFAULT_BUCKET`] through the backend's object
    /// codec.
    pub fn get_object<T: DeserializeOwned>(&self, key: &str) -> Result<T> {
        self.bucket_get_object(&[DEFAULT_BUCKET], key)
    }

    /// Writes a serializable object under `key` in [`DEFAULT_BUCKET`].
    pub fn set_object<T: Serialize>(&self, key: &str, value: &T) -> Result<()> {
        self.bucket_set_object(&[DEFAULT_BUCKET], key, value)
    }

    // ---- explicit-path surface ----

    /// Reads `key` at the bucket `path` (the empty path is the root).
    /// Honors `copy_on_get`.
    pub fn bucket_get(&self, path: &[&str], key: &str) -> Option<Value> {
        let shared = self.shared.read();
        let mut node = &shared.root;
        for name in path {
            node = node.bucket(name)?;
        }
        let value = node.get(key)?;
        Some(if self.opts.copy_on_get {
            value.deep_copy()
        } else {
            value.clone()
        })
    }

    /// Writes `key` at the bucket `path` in its own update.
    pub fn bucket_set(&self, path: &[&str], key: &str, value: impl Into<Value>) -> Result<()> {
        let value = value.into();
        self.update(|tx| tx.bucket_at(path).set(key, value))
    }

    /// Reads the bytes at `path`/`key` and decodes them through the
    /// backend's object codec. An absent key reads as empty input, which
    /// the codec will reject.
    pub fn bucket_get_object<T: DeserializeOwned>(&self, path: &[&str], key: &str) -> Result<T> {
        let shared = self.shared.read();
        let mut node = Some(&shared.root);
        for name in path {
            node = node.and_then(|node| node.bucket(name));
        }
        let value = node
            .and_then(|node| node.get(key))
            .cloned()
            .unwrap_or_default();
        let json = shared.backend.unmarshal(value.as_bytes())?;
        Ok(serde_json::from_value(json).map_err(BackendError::from)?)
    }

    /// Encodes an object through the backend's object codec and writes the
    /// bytes at `path`/`key`. An encoding that happens to be empty is
    /// accepted; only the nil Value is not.
    pub fn bucket_set_object<T: Serialize>(
        &self,
        path: &[&str],
        key: &str,
        value: &T,
    ) -> Result<()> {
        let bytes = {
            let shared = self.shared.read();
            let json = serde_json::to_value(value).map_err(BackendError::from)?;
            shared.backend.marshal(&json)?
        };
        self.bucket_set(path, key, bytes)
    }
}

/// Best-effort close on drop, so a forgotten [`Db::close`] still finishes
/// the codec pipeline where it can.
impl Drop for Db {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

/// Unix seconds for record timestamps; advisory only, so a pre-epoch clock
/// degrades to zero rather than failing a commit.
pub(crate) fn unix_ts() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests;
