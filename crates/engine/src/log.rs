//! The log file manager: owns the single backing file and the small set of
//! positioned operations the commit protocol needs.

use crate::{Error, Result};
use backend::{Reader, Writer};
use std::fs::{File, OpenOptions};
use std::io::{Seek, SeekFrom};
use std::path::{Path, PathBuf};

/// The open log file, or `None` once closed. Closing is a one-way door; the
/// path is kept so read handles and compaction renames still know where the
/// log lives.
pub(crate) struct LogFile {
    file: Option<File>,
    path: PathBuf,
}

impl LogFile {
    /// Opens or creates the log read-write with restrictive permissions.
    pub(crate) fn open(path: &Path) -> Result<LogFile> {
        let mut options = OpenOptions::new();
        options.create(true).read(true).write(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }
        let file = options.open(path)?;
        Ok(LogFile {
            file: Some(file),
            path: path.to_path_buf(),
        })
    }

    /// Wraps an already-open file, cursor wherever the caller left it. Used
    /// when compaction swaps the snapshot file in.
    pub(crate) fn adopt(file: File, path: PathBuf) -> LogFile {
        LogFile {
            file: Some(file),
            path,
        }
    }

    fn file(&self) -> Result<&File> {
        self.file.as_ref().ok_or(Error::Closed)
    }

    fn file_mut(&mut self) -> Result<&mut File> {
        self.file.as_mut().ok_or(Error::Closed)
    }

    pub(crate) fn len(&self) -> Result<u64> {
        Ok(self.file()?.metadata()?.len())
    }

    /// The current write position.
    pub(crate) fn position(&mut self) -> Result<u64> {
        Ok(self.file_mut()?.stream_position()?)
    }

    pub(crate) fn seek_to_end(&mut self) -> Result<u64> {
        Ok(self.file_mut()?.seek(SeekFrom::End(0))?)
    }

    /// Erases everything past `pos` and repositions the write cursor there,
    /// so the next append lands where the erased bytes began.
    pub(crate) fn truncate_to(&mut self, pos: u64) -> Result<()> {
        let file = self.file_mut()?;
        file.set_len(pos)?;
        file.seek(SeekFrom::Start(pos))?;
        Ok(())
    }

    pub(crate) fn sync(&self) -> Result<()> {
        self.file()?.sync_all()?;
        Ok(())
    }

    /// A write handle sharing this file's cursor, for the backend pipeline.
    /// Bytes the backend writes advance [`LogFile::position`].
    pub(crate) fn write_handle(&self) -> Result<Writer> {
        Ok(Box::new(self.file()?.try_clone()?))
    }

    /// An independent read-only handle positioned at offset zero.
    pub(crate) fn read_handle(&self) -> Result<Reader> {
        let _ = self.file()?;
        Ok(Box::new(File::open(&self.path)?))
    }

    pub(crate) fn close(&mut self) {
        self.file = None;
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.file.is_none()
    }

    pub(crate) fn path(&self) -> &Path {
        &self.path
    }
}
