use backend::BackendError;
use std::io;
use std::path::PathBuf;

/// Everything the engine can fail with.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A write through a read-only transaction handle.
    #[error("transaction is read-only")]
    ReadOnly,

    /// `set` with the nil Value; deletions go through `delete`.
    #[error("nil values are not allowed")]
    NilValue,

    /// An update or compaction against a closed engine.
    #[error("database is closed")]
    Closed,

    /// Bucket names and keys must be non-empty (empty strings are legal
    /// values, not legal names).
    #[error("bucket names and keys must not be empty")]
    EmptyName,

    /// A caller-supplied abort from inside a transaction callback.
    #[error("{0}")]
    Message(String),

    #[error("io error: {0}")]
    Io(#[from] io::Error),

    #[error(transparent)]
    Backend(#[from] BackendError),

    /// The compaction rename failed. Both paths are reported so an operator
    /// can reconcile by hand; the snapshot temp file is left in place.
    #[error("compaction rename of {} over {} failed: {source}", new.display(), old.display())]
    Compact {
        old: PathBuf,
        new: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl Error {
    /// Shorthand for aborting a transaction callback with a message.
    pub fn message(msg: impl Into<String>) -> Self {
        Error::Message(msg.into())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Backend(BackendError::Json(err))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
