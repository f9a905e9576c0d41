use crate::{json, Backend, BackendError, BackendFactory, Reader, Record, Writer};
use std::io;

/// A JSON pipeline that fails on demand, for exercising the rollback path.
/// Counts encodes and flushes and injects an error when a counter reaches
/// its configured trigger.
pub struct FlakyBackend {
    inner: Box<dyn Backend>,
    fail_encode_at: Option<u64>,
    fail_flush_at: Option<u64>,
    encodes: u64,
    flushes: u64,
}

impl Backend for FlakyBackend {
    fn init(&mut self, w: Writer, r: Reader) -> Result<(), BackendError> {
        self.inner.init(w, r)
    }

    fn encode(&mut self, record: &Record) -> Result<(), BackendError> {
        self.encodes += 1;
        if Some(self.encodes) == self.fail_encode_at {
            return Err(BackendError::Io(io::Error::other("injected encode failure")));
        }
        self.inner.encode(record)
    }

    fn decode(&mut self) -> Result<Option<Record>, BackendError> {
        self.inner.decode()
    }

    fn flush(&mut self) -> Result<(), BackendError> {
        self.flushes += 1;
        if Some(self.flushes) == self.fail_flush_at {
            return Err(BackendError::Io(io::Error::other("injected flush failure")));
        }
        self.inner.flush()
    }
}

/// A factory whose pipelines fail the `n`th encode.
pub fn fail_encode_at(n: u64) -> BackendFactory {
    Box::new(move || {
        Box::new(FlakyBackend {
            inner: json()(),
            fail_encode_at: Some(n),
            fail_flush_at: None,
            encodes: 0,
            flushes: 0,
        })
    })
}

/// A factory whose pipelines fail the `n`th flush.
pub fn fail_flush_at(n: u64) -> BackendFactory {
    Box::new(move || {
        Box::new(FlakyBackend {
            inner: json()(),
            fail_encode_at: None,
            fail_flush_at: Some(n),
            encodes: 0,
            flushes: 0,
        })
    })
}
