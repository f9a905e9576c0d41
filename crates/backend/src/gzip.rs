//! The gzip wrapper: compresses the stream under any inner backend.
//!
//! Write side: one gzip member per pipeline lifetime. The inner backend's
//! `flush` reaches the encoder's `Write::flush`, which emits a sync flush,
//! so after every commit the on-disk prefix is a valid, independently
//! decodable deflate stream. Closing the pipeline finishes the member
//! (writes the trailer); a member left without its trailer is still
//! readable, the decoder just reports an unexpected-EOF at the tail which
//! the terminal codec treats as end-of-stream.
//!
//! Read side: a multi-member decoder, since every engine open appends a new
//! member to the same file.

use crate::{Backend, BackendError, Closable, Reader, Record, Writer};
use flate2::read::MultiGzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use parking_lot::Mutex;
use std::io::{self, Write};
use std::sync::Arc;

// The encoder is shared between the inner backend (which writes through it)
// and this wrapper (which must reach it again at close to finish the member).
type SharedEncoder = Arc<Mutex<GzEncoder<Writer>>>;

struct EncoderHandle(SharedEncoder);

impl Write for EncoderHandle {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.0.lock().flush()
    }
}

/// See the module docs.
pub struct GzipBackend {
    inner: Box<dyn Backend>,
    level: Compression,
    encoder: Option<SharedEncoder>,
}

impl GzipBackend {
    pub fn new(inner: Box<dyn Backend>, level: Compression) -> Self {
        Self {
            inner,
            level,
            encoder: None,
        }
    }
}

impl Backend for GzipBackend {
    fn init(&mut self, w: Writer, r: Reader) -> Result<(), BackendError> {
        let encoder = Arc::new(Mutex::new(GzEncoder::new(w, self.level)));
        self.encoder = Some(Arc::clone(&encoder));
        self.inner.init(
            Box::new(EncoderHandle(encoder)),
            Box::new(MultiGzDecoder::new(r)),
        )
    }

    fn encode(&mut self, record: &Record) -> Result<(), BackendError> {
        self.inner.encode(record)
    }

    fn decode(&mut self) -> Result<Option<Record>, BackendError> {
        self.inner.decode()
    }

    fn flush(&mut self) -> Result<(), BackendError> {
        self.inner.flush()
    }

    fn marshal(&self, value: &serde_json::Value) -> Result<Vec<u8>, BackendError> {
        self.inner.marshal(value)
    }

    fn unmarshal(&self, bytes: &[u8]) -> Result<serde_json::Value, BackendError> {
        self.inner.unmarshal(bytes)
    }

    fn as_closable(&mut self) -> Option<&mut dyn Closable> {
        Some(self)
    }
}

impl Closable for GzipBackend {
    fn close(&mut self) -> Result<(), BackendError> {
        if let Some(encoder) = &self.encoder {
            encoder.lock().try_finish()?;
        }
        if let Some(inner) = self.inner.as_closable() {
            inner.close()?;
        }
        Ok(())
    }
}
