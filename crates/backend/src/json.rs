//! The terminal JSON codec: newline-delimited record objects.

use crate::{Backend, BackendError, Reader, Record, Writer};
use serde::Deserialize;
use std::io;

type JsonStream = serde_json::Deserializer<serde_json::de::IoRead<Reader>>;

/// Frames records as JSON objects, one per line, and doubles as the object
/// codec (`marshal`/`unmarshal`) for the engine's object helpers.
pub struct JsonBackend {
    writer: Option<Writer>,
    stream: Option<JsonStream>,
}

impl JsonBackend {
    pub fn new() -> Self {
        Self {
            writer: None,
            stream: None,
        }
    }
}

impl Default for JsonBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl Backend for JsonBackend {
    fn init(&mut self, w: Writer, r: Reader) -> Result<(), BackendError> {
        self.writer = Some(w);
        self.stream = Some(serde_json::Deserializer::from_reader(r));
        Ok(())
    }

    fn encode(&mut self, record: &Record) -> Result<(), BackendError> {
        let w = self.writer.as_mut().ok_or(BackendError::NotInitialized)?;
        serde_json::to_writer(&mut *w, record)?;
        w.write_all(b"\n")?;
        Ok(())
    }

    fn decode(&mut self) -> Result<Option<Record>, BackendError> {
        let stream = self.stream.as_mut().ok_or(BackendError::NotInitialized)?;
        match Record::deserialize(&mut *stream) {
            Ok(record) => Ok(Some(record)),
            // A clean EOF ends the stream. So does an EOF inside a record (a
            // torn tail from an interrupted write) or an unexpected-EOF from
            // an underlying reader such as a trailerless gzip member.
            Err(e) if e.is_eof() => Ok(None),
            Err(e) if e.io_error_kind() == Some(io::ErrorKind::UnexpectedEof) => Ok(None),
            Err(e) => Err(BackendError::Json(e)),
        }
    }

    fn flush(&mut self) -> Result<(), BackendError> {
        let w = self.writer.as_mut().ok_or(BackendError::NotInitialized)?;
        w.flush()?;
        Ok(())
    }

    fn marshal(&self, value: &serde_json::Value) -> Result<Vec<u8>, BackendError> {
        Ok(serde_json::to_vec(value)?)
    }

    fn unmarshal(&self, bytes: &[u8]) -> Result<serde_json::Value, BackendError> {
        Ok(serde_json::from_slice(bytes)?)
    }
}
