use crate::*;
use anyhow::Result;
use std::fs::OpenOptions;
use std::io::Write as _;
use tempfile::tempdir;

// --------------------- Replay equivalence ---------------------

#[test]
fn reopen_restores_the_exact_tree() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("db");

    {
        let db = Db::open(&path, Options::default())?;
        db.update(|tx| {
            tx.set("a", "1")?;
            tx.set("b", "2")?;
            tx.bucket("users").set("alice", "admin")?;
            tx.bucket("users").bucket("tokens").set("t1", "xyz")
        })?;
        db.update(|tx| {
            tx.delete("a")?;
            tx.set("c", "3")
        })?;
        db.close()?;
    }

    let db = Db::open(&path, Options::default())?;
    db.read(|tx| {
        assert!(tx.get("a").is_none());
        assert_eq!(tx.get("b").unwrap().as_bytes(), b"2");
        assert_eq!(tx.get("c").unwrap().as_bytes(), b"3");
        assert_eq!(tx.bucket("users").get("alice").unwrap().as_bytes(), b"admin");
        assert_eq!(
            tx.bucket("users").bucket("tokens").get("t1").unwrap().as_bytes(),
            b"xyz"
        );
        Ok(())
    })?;
    Ok(())
}

#[test]
fn max_index_survives_reopen() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("db");

    let before_close;
    {
        let db = Db::open(&path, Options::default())?;
        db.update(|tx| tx.set("a", "1"))?;
        db.update(|tx| tx.set("b", "2"))?;
        before_close = db.max_index();
    }

    let db = Db::open(&path, Options::default())?;
    assert_eq!(db.max_index(), before_close);
    Ok(())
}

#[test]
fn later_records_override_earlier_ones() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("db");

    {
        let db = Db::open(&path, Options::default())?;
        db.update(|tx| tx.set("k", "first"))?;
        db.update(|tx| tx.set("k", "second"))?;
        db.update(|tx| tx.set("k", "third"))?;
    }

    let db = Db::open(&path, Options::default())?;
    assert_eq!(db.bucket_get(&[], "k").unwrap().as_bytes(), b"third");
    Ok(())
}

// --------------------- Tombstones across reopen ---------------------

#[test]
fn deleted_keys_stay_deleted_across_reopen() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("db");

    {
        let db = Db::open(&path, Options::default())?;
        db.update(|tx| tx.set("k", "v"))?;
        db.update(|tx| tx.delete("k"))?;
    }

    let db = Db::open(&path, Options::default())?;
    assert!(db.bucket_get(&[], "k").is_none());
    Ok(())
}

#[test]
fn deleted_buckets_stay_deleted_across_reopen() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("db");

    {
        let db = Db::open(&path, Options::default())?;
        db.update(|tx| {
            tx.bucket("doomed").set("k", "v")?;
            tx.bucket("kept").set("k", "v")
        })?;
        db.update(|tx| tx.delete_bucket("doomed"))?;
    }

    let db = Db::open(&path, Options::default())?;
    db.read(|tx| {
        assert_eq!(tx.buckets(), vec!["kept".to_string()]);
        assert!(tx.bucket("doomed").get("k").is_none());
        Ok(())
    })?;
    Ok(())
}

// --------------------- Damaged logs ---------------------

#[test]
fn torn_final_record_is_discarded() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("db");

    {
        let db = Db::open(&path, Options::default())?;
        db.update(|tx| tx.set("a", "1"))?;
        db.update(|tx| tx.set("b", "2"))?;
    }

    // a commit torn mid-write
    let mut file = OpenOptions::new().append(true).open(&path)?;
    file.write_all(b"{\"idx\":3,\"ts\":17")?;

    let db = Db::open(&path, Options::default())?;
    assert_eq!(db.bucket_get(&[], "a").unwrap().as_bytes(), b"1");
    assert_eq!(db.bucket_get(&[], "b").unwrap().as_bytes(), b"2");
    // the torn record contributed nothing; the next index follows record 2
    assert_eq!(db.max_index(), 3);
    Ok(())
}

#[test]
fn mid_log_garbage_aborts_open() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("db");

    {
        let db = Db::open(&path, Options::default())?;
        db.update(|tx| tx.set("a", "1"))?;
    }

    let mut file = OpenOptions::new().append(true).open(&path)?;
    file.write_all(b"@not json@\n")?;

    assert!(Db::open(&path, Options::default()).is_err());
    Ok(())
}

// --------------------- Fresh stores ---------------------

#[test]
fn fresh_store_starts_at_index_one() -> Result<()> {
    let dir = tempdir()?;
    let db = Db::open(dir.path().join("db"), Options::default())?;

    assert_eq!(db.max_index(), 1);
    assert!(!db.is_closed());
    db.read(|tx| {
        assert!(tx.get_all().is_empty());
        Ok(())
    })?;
    Ok(())
}

#[cfg(unix)]
#[test]
fn log_file_is_created_with_owner_only_permissions() -> Result<()> {
    use std::os::unix::fs::PermissionsExt;

    let dir = tempdir()?;
    let path = dir.path().join("db");
    let _db = Db::open(&path, Options::default())?;

    let mode = std::fs::metadata(&path)?.permissions().mode();
    assert_eq!(mode & 0o777, 0o600);
    Ok(())
}
