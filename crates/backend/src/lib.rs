//! # Backend — DriftKV's Log Codec Pipeline
//!
//! Everything between a transaction record and the bytes in the log file.
//!
//! A [`Backend`] binds a writer/reader pair (normally two handles onto the
//! same log file), frames [`Record`]s onto the write side, and decodes them
//! back off the read side. Backends compose into a pipeline: a terminal
//! codec does the actual framing while wrappers transform the byte stream
//! underneath it.
//!
//! ```text
//! engine ── encode(Record) ──> [aes] ──> [gzip] ──> [json] ──> log file
//! engine <── decode()      ──  [aes] <── [gzip] <── [json] <── log file
//! ```
//!
//! ## Framing
//!
//! Framing is concatenation-safe: the byte concatenation of independently
//! encoded records decodes as that sequence of records. Newline-delimited
//! JSON objects satisfy this, as does a sequence of gzip members, which is
//! what lets the engine append commit after commit (and open after open)
//! to one file.
//!
//! ## End of stream
//!
//! [`Backend::decode`] returns `Ok(None)` at end-of-stream. An
//! unexpected-EOF at the tail (a gzip member whose trailer was never
//! written because the process stopped without closing, or a torn final
//! record) is treated the same way: everything decoded up to that point
//! stands, the tail is discarded.
//!
//! ## Capabilities
//!
//! `marshal`/`unmarshal` are an optional byte-level object codec, separate
//! from record framing; backends without one report
//! [`BackendError::MissingMarshaler`]/[`BackendError::MissingUnmarshaler`].
//! Closing is likewise optional and probed through
//! [`Backend::as_closable`]; only the gzip wrapper has real work to do
//! there (finishing its member).

mod crypto;
mod gzip;
mod json;

pub use crypto::AesBackend;
pub use gzip::GzipBackend;
pub use json::JsonBackend;

use bucket::Bucket;
use serde::{Deserialize, Serialize};
use std::io;
use thiserror::Error;

/// The write side of a pipeline: boxed so backends stack freely.
pub type Writer = Box<dyn io::Write + Send + Sync>;
/// The read side of a pipeline.
pub type Reader = Box<dyn io::Read + Send + Sync>;

/// Produces a fresh pipeline. Invoked once at engine open and once more at
/// every compaction, so a factory must be reusable.
pub type BackendFactory = Box<dyn Fn() -> Box<dyn Backend> + Send + Sync>;

/// Errors from the codec pipeline.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    #[error("codec error: {0}")]
    Json(#[from] serde_json::Error),

    /// `encode`/`decode`/`flush` before `init`.
    #[error("backend is not initialized")]
    NotInitialized,

    /// The dummy backend's answer to everything.
    #[error("not implemented")]
    NotImplemented,

    #[error("backend has no marshaler")]
    MissingMarshaler,

    #[error("backend has no unmarshaler")]
    MissingUnmarshaler,

    /// AES keys must be 16, 24, or 32 bytes.
    #[error("invalid AES key length {0} (want 16, 24, or 32 bytes)")]
    InvalidKeyLength(usize),
}

/// One framed log entry: a changeset (or full snapshot) stamped with the
/// engine's monotonic index.
///
/// Wire tags are stable; field order is not. Empty changesets, zero
/// timestamps and false `compact` flags are omitted on encode and defaulted
/// on decode.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// Monotonic sequence number at commit time.
    #[serde(rename = "idx", default)]
    pub index: u64,

    /// Unix seconds at commit time. Advisory only.
    #[serde(rename = "ts", default)]
    pub ts: i64,

    /// The transaction's changeset, or the whole committed tree for a
    /// compaction snapshot.
    #[serde(rename = "cs", default, skip_serializing_if = "Bucket::is_empty")]
    pub changeset: Bucket,

    /// True iff this record is a compaction snapshot. During replay it is
    /// applied like any other record; its meaning is that no earlier history
    /// exists in the file.
    #[serde(rename = "compact", default, skip_serializing_if = "is_false")]
    pub compact: bool,
}

fn is_false(flag: &bool) -> bool {
    !*flag
}

/// The optional close capability, probed via [`Backend::as_closable`].
pub trait Closable {
    fn close(&mut self) -> Result<(), BackendError>;
}

/// A transaction codec pipeline.
pub trait Backend: Send + Sync {
    /// Binds the pipeline to its stream pair. Called once per pipeline: at
    /// engine open against the log file, or at compaction against the temp
    /// file.
    fn init(&mut self, w: Writer, r: Reader) -> Result<(), BackendError>;

    /// Appends one framed record on the write side.
    fn encode(&mut self, record: &Record) -> Result<(), BackendError>;

    /// Decodes the next record, or `None` at end-of-stream.
    fn decode(&mut self) -> Result<Option<Record>, BackendError>;

    /// Pushes buffered bytes downstream. Called after every commit.
    fn flush(&mut self) -> Result<(), BackendError>;

    /// Ad hoc object-to-bytes codec, used by the engine's object helpers.
    fn marshal(&self, _value: &serde_json::Value) -> Result<Vec<u8>, BackendError> {
        Err(BackendError::MissingMarshaler)
    }

    /// Inverse of [`Backend::marshal`].
    fn unmarshal(&self, _bytes: &[u8]) -> Result<serde_json::Value, BackendError> {
        Err(BackendError::MissingUnmarshaler)
    }

    /// The close capability, when this pipeline has one.
    fn as_closable(&mut self) -> Option<&mut dyn Closable> {
        None
    }
}

/// A JSON pipeline factory (the engine's default).
pub fn json() -> BackendFactory {
    Box::new(|| Box::new(JsonBackend::new()))
}

/// Wraps `inner` in gzip at the default compression level.
pub fn gzip(inner: BackendFactory) -> BackendFactory {
    Box::new(move || Box::new(GzipBackend::new(inner(), flate2::Compression::default())))
}

/// Wraps `inner` in gzip at an explicit compression level (0–9).
pub fn gzip_level(inner: BackendFactory, level: u32) -> BackendFactory {
    Box::new(move || Box::new(GzipBackend::new(inner(), flate2::Compression::new(level))))
}

/// Shorthand for `gzip(json())`.
pub fn gzip_json() -> BackendFactory {
    gzip(json())
}

/// Wraps `inner` in AES-CFB. The key length selects AES-128/192/256.
pub fn aes(inner: BackendFactory, key: impl Into<Vec<u8>>) -> BackendFactory {
    let key = key.into();
    Box::new(move || Box::new(AesBackend::new(inner(), key.clone())))
}

/// A pipeline where every operation returns [`BackendError::NotImplemented`].
pub fn dummy() -> BackendFactory {
    Box::new(|| Box::new(DummyBackend))
}

/// See [`dummy`].
pub struct DummyBackend;

impl Backend for DummyBackend {
    fn init(&mut self, _w: Writer, _r: Reader) -> Result<(), BackendError> {
        Err(BackendError::NotImplemented)
    }

    fn encode(&mut self, _record: &Record) -> Result<(), BackendError> {
        Err(BackendError::NotImplemented)
    }

    fn decode(&mut self) -> Result<Option<Record>, BackendError> {
        Err(BackendError::NotImplemented)
    }

    fn flush(&mut self) -> Result<(), BackendError> {
        Err(BackendError::NotImplemented)
    }

    fn marshal(&self, _value: &serde_json::Value) -> Result<Vec<u8>, BackendError> {
        Err(BackendError::NotImplemented)
    }

    fn unmarshal(&self, _bytes: &[u8]) -> Result<serde_json::Value, BackendError> {
        Err(BackendError::NotImplemented)
    }
}
