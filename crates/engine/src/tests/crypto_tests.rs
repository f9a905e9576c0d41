use crate::*;
use anyhow::Result;
use sha2::{Digest, Sha512_256};
use std::fs;
use tempfile::tempdir;

fn aes_gzip_json(key: &[u8]) -> Options {
    Options {
        backend: aes(gzip_json(), key.to_vec()),
        ..Options::default()
    }
}

// --------------------- Round trips ---------------------

#[test]
fn encrypted_compressed_store_round_trips_at_scale() -> Result<()> {
    let key = Sha512_256::digest(b"hello world").to_vec();
    let dir = tempdir()?;
    let path = dir.path().join("db");

    {
        let db = Db::open(&path, aes_gzip_json(&key))?;
        for i in 0..10u32 {
            db.update(|tx| {
                let mut bucket = tx.bucket(&format!("bucket-{i}"));
                for k in 0..100u32 {
                    let k = k.to_string();
                    bucket.set(&k, k.as_str())?;
                }
                Ok(())
            })?;
        }
        db.close()?;
    }

    let db = Db::open(&path, aes_gzip_json(&key))?;
    db.read(|tx| {
        let mut names = tx.buckets();
        names.sort();
        assert_eq!(names.len(), 10);

        for name in names {
            let mut seen = 0;
            tx.bucket(&name).for_each(|key, value| {
                assert_eq!(value.as_bytes(), key.as_bytes(), "in {name}");
                seen += 1;
                Ok(())
            })?;
            assert_eq!(seen, 100, "in {name}");
        }
        Ok(())
    })?;
    Ok(())
}

#[test]
fn aes_json_without_gzip_round_trips() -> Result<()> {
    let key = vec![7u8; 24]; // AES-192
    let dir = tempdir()?;
    let path = dir.path().join("db");

    {
        let db = Db::open(
            &path,
            Options {
                backend: aes(json(), key.clone()),
                ..Options::default()
            },
        )?;
        db.update(|tx| tx.set("k", "v"))?;
        db.update(|tx| tx.bucket("b").set("nested", "too"))?;
    }

    let db = Db::open(
        &path,
        Options {
            backend: aes(json(), key),
            ..Options::default()
        },
    )?;
    assert_eq!(db.bucket_get(&[], "k").unwrap().as_bytes(), b"v");
    assert_eq!(db.bucket_get(&["b"], "nested").unwrap().as_bytes(), b"too");
    Ok(())
}

#[test]
fn appends_after_reopen_continue_the_keystream() -> Result<()> {
    let key = vec![3u8; 16];
    let dir = tempdir()?;
    let path = dir.path().join("db");
    let opts = |key: &[u8]| Options {
        backend: aes(json(), key.to_vec()),
        ..Options::default()
    };

    {
        let db = Db::open(&path, opts(&key))?;
        db.update(|tx| tx.set("first", "session"))?;
    }
    {
        // the write keystream must pick up where the stored stream ends
        let db = Db::open(&path, opts(&key))?;
        db.update(|tx| tx.set("second", "session"))?;
    }

    let db = Db::open(&path, opts(&key))?;
    assert_eq!(db.bucket_get(&[], "first").unwrap().as_bytes(), b"session");
    assert_eq!(db.bucket_get(&[], "second").unwrap().as_bytes(), b"session");
    Ok(())
}

// --------------------- Key mismatches ---------------------

#[test]
fn wrong_key_never_reproduces_the_state() -> Result<()> {
    let key = Sha512_256::digest(b"hello world").to_vec();
    let other = Sha512_256::digest(b"goodbye world").to_vec();
    let dir = tempdir()?;
    let path = dir.path().join("db");

    {
        let db = Db::open(&path, aes_gzip_json(&key))?;
        db.update(|tx| tx.set("k", "v"))?;
        db.close()?;
    }

    match Db::open(&path, aes_gzip_json(&other)) {
        // the usual outcome: the garbage stream fails to decode
        Err(_) => {}
        // never the original state, whatever happened to decode
        Ok(db) => assert!(db
            .bucket_get(&[], "k")
            .map(|v| v.as_bytes() != b"v")
            .unwrap_or(true)),
    }
    Ok(())
}

// --------------------- On-disk shape ---------------------

#[test]
fn ciphertext_leaks_no_plaintext() -> Result<()> {
    let key = vec![1u8; 32];
    let dir = tempdir()?;
    let path = dir.path().join("db");

    let db = Db::open(
        &path,
        Options {
            backend: aes(json(), key),
            ..Options::default()
        },
    )?;
    db.update(|tx| tx.set("super-secret-key", "super-secret-value"))?;
    db.close()?;

    let raw = fs::read(&path)?;
    assert!(raw.len() > 16, "iv plus at least one record");
    for needle in [b"super-secret".as_slice(), b"\"idx\"".as_slice()] {
        assert!(
            !raw.windows(needle.len()).any(|w| w == needle),
            "plaintext {:?} visible in the log",
            String::from_utf8_lossy(needle)
        );
    }
    Ok(())
}

#[test]
fn compaction_re_keys_the_snapshot_with_a_fresh_iv() -> Result<()> {
    let key = vec![9u8; 16];
    let dir = tempdir()?;
    let path = dir.path().join("db");

    {
        let db = Db::open(
            &path,
            Options {
                backend: aes(gzip_json(), key.clone()),
                ..Options::default()
            },
        )?;
        db.update(|tx| tx.set("a", "1"))?;
        let iv_before = fs::read(&path)?[..16].to_vec();

        db.compact()?;
        let iv_after = fs::read(&path)?[..16].to_vec();
        // a fresh pipeline against an empty temp file means a fresh IV
        assert_ne!(iv_before, iv_after);
        db.close()?;
    }

    let db = Db::open(
        &path,
        Options {
            backend: aes(gzip_json(), key),
            ..Options::default()
        },
    )?;
    assert_eq!(db.bucket_get(&[], "a").unwrap().as_bytes(), b"1");
    Ok(())
}
