//! The AES-CFB wrapper: encrypts the stream under any inner backend.
//!
//! The first 16 bytes of the file are the IV. A pipeline bound to an empty
//! stream generates a fresh random IV and writes it before anything else;
//! bound to an existing stream it consumes the stored IV instead.
//! Everything after the IV is the CFB keystream XOR of the inner backend's
//! bytes.
//!
//! CFB chains on ciphertext, so the write keystream has to stand exactly
//! where the stream ends before new bytes are appended. `init` therefore
//! decrypts the whole existing stream up front (the engine replays all of
//! it at open anyway), hands the inner backend the plaintext, and advances
//! the write keystream over that history so appends continue the chain.
//!
//! The key length selects the cipher: 16 bytes for AES-128, 24 for AES-192,
//! 32 for AES-256.

use crate::{Backend, BackendError, Closable, Reader, Record, Writer};
use aes::{Aes128, Aes192, Aes256};
use cfb_mode::{BufDecryptor, BufEncryptor};
use cipher::KeyIvInit;
use rand::Rng;
use std::io::{self, Cursor, Read, Write};

/// AES block size; the IV occupies exactly one block.
const IV_LEN: usize = 16;

enum CfbEncryptor {
    Aes128(BufEncryptor<Aes128>),
    Aes192(BufEncryptor<Aes192>),
    Aes256(BufEncryptor<Aes256>),
}

impl CfbEncryptor {
    fn new(key: &[u8], iv: &[u8]) -> Result<Self, BackendError> {
        let invalid = || BackendError::InvalidKeyLength(key.len());
        match key.len() {
            16 => Ok(Self::Aes128(
                BufEncryptor::new_from_slices(key, iv).map_err(|_| invalid())?,
            )),
            24 => Ok(Self::Aes192(
                BufEncryptor::new_from_slices(key, iv).map_err(|_| invalid())?,
            )),
            32 => Ok(Self::Aes256(
                BufEncryptor::new_from_slices(key, iv).map_err(|_| invalid())?,
            )),
            _ => Err(invalid()),
        }
    }

    fn encrypt(&mut self, buf: &mut [u8]) {
        match self {
            Self::Aes128(enc) => enc.encrypt(buf),
            Self::Aes192(enc) => enc.encrypt(buf),
            Self::Aes256(enc) => enc.encrypt(buf),
        }
    }
}

enum CfbDecryptor {
    Aes128(BufDecryptor<Aes128>),
    Aes192(BufDecryptor<Aes192>),
    Aes256(BufDecryptor<Aes256>),
}

impl CfbDecryptor {
    fn new(key: &[u8], iv: &[u8]) -> Result<Self, BackendError> {
        let invalid = || BackendError::InvalidKeyLength(key.len());
        match key.len() {
            16 => Ok(Self::Aes128(
                BufDecryptor::new_from_slices(key, iv).map_err(|_| invalid())?,
            )),
            24 => Ok(Self::Aes192(
                BufDecryptor::new_from_slices(key, iv).map_err(|_| invalid())?,
            )),
            32 => Ok(Self::Aes256(
                BufDecryptor::new_from_slices(key, iv).map_err(|_| invalid())?,
            )),
            _ => Err(invalid()),
        }
    }

    fn decrypt(&mut self, buf: &mut [u8]) {
        match self {
            Self::Aes128(dec) => dec.decrypt(buf),
            Self::Aes192(dec) => dec.decrypt(buf),
            Self::Aes256(dec) => dec.decrypt(buf),
        }
    }
}

struct CfbWriter {
    encryptor: CfbEncryptor,
    w: Writer,
    // scratch so write() never mutates the caller's buffer
    buf: Vec<u8>,
}

impl Write for CfbWriter {
    fn write(&mut self, src: &[u8]) -> io::Result<usize> {
        self.buf.clear();
        self.buf.extend_from_slice(src);
        self.encryptor.encrypt(&mut self.buf);
        self.w.write_all(&self.buf)?;
        Ok(src.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.w.flush()
    }
}

/// See the module docs.
pub struct AesBackend {
    inner: Box<dyn Backend>,
    key: Vec<u8>,
}

impl AesBackend {
    pub fn new(inner: Box<dyn Backend>, key: Vec<u8>) -> Self {
        Self { inner, key }
    }
}

impl Backend for AesBackend {
    fn init(&mut self, mut w: Writer, mut r: Reader) -> Result<(), BackendError> {
        if !matches!(self.key.len(), 16 | 24 | 32) {
            return Err(BackendError::InvalidKeyLength(self.key.len()));
        }

        let mut iv = [0u8; IV_LEN];
        let mut history = Vec::new();
        match read_full(&mut r, &mut iv)? {
            // empty stream: fresh IV, written before any ciphertext
            0 => {
                rand::thread_rng().fill(&mut iv[..]);
                w.write_all(&iv)?;
            }
            IV_LEN => {
                r.read_to_end(&mut history)?;
            }
            n => {
                return Err(BackendError::Io(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    format!("log holds a partial IV ({n} of {IV_LEN} bytes)"),
                )));
            }
        }

        // decrypt the stored stream for the inner backend, then advance the
        // write keystream over it so appended bytes continue the chain
        let mut decryptor = CfbDecryptor::new(&self.key, &iv)?;
        decryptor.decrypt(&mut history);

        let mut encryptor = CfbEncryptor::new(&self.key, &iv)?;
        let mut replay = history.clone();
        encryptor.encrypt(&mut replay);

        self.inner.init(
            Box::new(CfbWriter {
                encryptor,
                w,
                buf: Vec::new(),
            }),
            Box::new(Cursor::new(history)),
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
        self.inner.as_closable()
    }
}

/// Reads until `buf` is full or the stream ends, returning the byte count.
fn read_full(r: &mut Reader, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match r.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}
