//! Compaction: rewrites the log as a single full-state snapshot record.
//!
//! The snapshot is written to a temp file through a fresh codec pipeline,
//! fsynced, and renamed over the log path; the old file's history is
//! abandoned. The sequence counter is written into the snapshot record, so
//! it survives the rewrite.

use crate::log::LogFile;
use crate::{unix_ts, Db, Error, Record, Result};
use ::log::debug;
use std::fs::{self, File};
use std::mem;

impl Db {
    /// Rewrites the log so it holds exactly one record: the current
    /// committed tree, flagged as a snapshot, carrying the current
    /// `max_index`.
    ///
    /// Runs under the exclusive lock. Failures before the rename remove the
    /// temp file and leave the engine untouched. A rename failure returns
    /// [`Error::Compact`] naming both paths; the temp file is deliberately
    /// kept for the operator to reconcile, and the engine is left degraded
    /// (log closed) but readable.
    pub fn compact(&self) -> Result<()> {
        let mut guard = self.shared.write();
        let shared = &mut *guard;
        if shared.log.is_closed() {
            return Err(Error::Closed);
        }

        let tmp = tempfile::Builder::new()
            .prefix("driftkv-compact-")
            .tempfile()?;

        let mut backend = (self.opts.backend)();
        backend.init(
            Box::new(tmp.as_file().try_clone()?),
            Box::new(File::open(tmp.path())?),
        )?;

        let mut record = Record {
            index: shared.max_index,
            ts: unix_ts(),
            changeset: mem::take(&mut shared.root),
            compact: true,
        };

        let written: Result<()> = (|| {
            backend.encode(&record)?;
            backend.flush()?;
            tmp.as_file().sync_all()?;
            Ok(())
        })();

        // the committed tree goes back in either case
        shared.root = mem::take(&mut record.changeset);
        written?;

        // the old file's contents are abandoned; close before the rename
        shared.log.close();
        let log_path = shared.log.path().to_path_buf();

        let (file, tmp_path) = tmp.keep().map_err(|e| Error::Io(e.error))?;
        if let Err(cause) = fs::rename(&tmp_path, &log_path) {
            return Err(Error::Compact {
                old: log_path,
                new: tmp_path,
                source: cause,
            });
        }

        // adopt the snapshot file and its pipeline as the live pair
        shared.log = LogFile::adopt(file, log_path);
        shared.backend = backend;

        debug!(
            "compacted {} into a single snapshot (index {})",
            shared.log.path().display(),
            shared.max_index
        );
        Ok(())
    }
}
