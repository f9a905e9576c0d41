//! Read/update scopes and the commit protocol.
//!
//! All mutations flow through [`Db::update`]. The callback stages writes in
//! a pooled overlay; on success the overlay becomes a log record and is
//! encoded, flushed, and fsynced before it is merged into the committed
//! tree. Any failure in that sequence truncates the log back to the
//! pre-commit offset and leaves memory untouched, so a reader never sees a
//! state the log does not also hold.

use crate::{unix_ts, Db, Error, Options, Record, Result, Shared, StatsCounters, Tx};
use ::log::warn;
use bucket::Bucket;
use std::mem;
use std::sync::atomic::Ordering;

impl Db {
    /// Runs `f` in a read-only transaction under the shared lock.
    ///
    /// The overlay is present (navigating buckets materializes scratch
    /// nodes in it) but every write through the handle fails with
    /// [`Error::ReadOnly`]. Many readers may run concurrently; none can
    /// observe a partially committed update.
    pub fn read<T>(&self, f: impl FnOnce(&mut Tx) -> Result<T>) -> Result<T> {
        let mut overlay = self.take_handle();
        let shared = self.shared.read();
        let result = {
            let mut tx = Tx::new(&mut overlay, Some(&shared.root), false);
            f(&mut tx)
        };
        drop(shared);
        self.put_handle(overlay);
        result
    }

    /// Runs `f` in a read-write transaction under the exclusive lock, then
    /// commits.
    ///
    /// An error from `f` aborts: the overlay is discarded, `Rollbacks` is
    /// incremented, and the error is returned with the log untouched.
    /// Otherwise the commit protocol runs (see below). Returns
    /// [`Error::Closed`] after [`Db::close`].
    pub fn update<T>(&self, f: impl FnOnce(&mut Tx) -> Result<T>) -> Result<T> {
        let mut overlay = self.take_handle();
        let mut guard = self.shared.write();
        if guard.log.is_closed() {
            drop(guard);
            self.put_handle(overlay);
            return Err(Error::Closed);
        }

        let shared = &mut *guard;
        let result = {
            let mut tx = Tx::new(&mut overlay, Some(&shared.root), true);
            f(&mut tx)
        };

        let outcome = match result {
            Ok(value) => shared
                .commit(&mut overlay, &self.opts, &self.stats)
                .map(|()| value),
            Err(err) => {
                self.stats.rollbacks.fetch_add(1, Ordering::Relaxed);
                Err(err)
            }
        };

        drop(guard);
        self.put_handle(overlay);
        outcome
    }
}

impl Shared {
    /// The commit protocol. `overlay` is taken for the record and handed
    /// back so the caller can pool it.
    ///
    /// 1. Note the current log position.
    /// 2. Encode `{index: max_index, ts: now, changeset: overlay}`.
    /// 3. Flush the backend, fsync the file.
    /// 4. On failure: count a rollback, truncate the log back to the noted
    ///    position (erasing whatever the failed encode got out), reposition
    ///    the write cursor there, and return the error. The committed tree
    ///    is untouched.
    /// 5. On success: apply the changeset to the committed tree, count a
    ///    commit, increment `max_index`.
    pub(crate) fn commit(
        &mut self,
        overlay: &mut Bucket,
        opts: &Options,
        stats: &StatsCounters,
    ) -> Result<()> {
        let pos = self.log.position()?;
        let record = Record {
            index: self.max_index,
            ts: unix_ts(),
            changeset: mem::take(overlay),
            compact: false,
        };

        let appended = self.append(&record);
        *overlay = record.changeset;

        match appended {
            Ok(()) => {
                self.root.apply(overlay, opts.copy_on_set);
                self.max_index += 1;
                stats.commits.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            Err(err) => {
                stats.rollbacks.fetch_add(1, Ordering::Relaxed);
                warn!(
                    "commit of index {} failed ({}), truncating log to {}",
                    self.max_index, err, pos
                );
                if let Err(truncate_err) = self.log.truncate_to(pos) {
                    warn!("post-rollback truncate to {} failed: {}", pos, truncate_err);
                }
                Err(err)
            }
        }
    }

    fn append(&mut self, record: &Record) -> Result<()> {
        self.backend.encode(record)?;
        self.backend.flush()?;
        self.log.sync()?;
        Ok(())
    }
}
