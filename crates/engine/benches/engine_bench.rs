use criterion::{criterion_group, criterion_main, BatchSize, Criterion};
use engine::{Db, Options};
use tempfile::tempdir;

const N_KEYS: usize = 1_000;
const VALUE_SIZE: usize = 100;

fn populated_db() -> (tempfile::TempDir, Db) {
    let dir = tempdir().unwrap();
    let db = Db::open(dir.path().join("bench.db"), Options::default()).unwrap();
    db.update(|tx| {
        for i in 0..N_KEYS {
            tx.set(&format!("key{}", i), vec![b'x'; VALUE_SIZE])?;
        }
        Ok(())
    })
    .unwrap();
    (dir, db)
}

fn update_benchmark(c: &mut Criterion) {
    c.bench_function("update_1k_keys_one_commit", |b| {
        b.iter_batched(
            || {
                let dir = tempdir().unwrap();
                let db = Db::open(dir.path().join("bench.db"), Options::default()).unwrap();
                (dir, db)
            },
            |(_dir, db)| {
                db.update(|tx| {
                    for i in 0..N_KEYS {
                        tx.set(&format!("key{}", i), vec![b'x'; VALUE_SIZE])?;
                    }
                    Ok(())
                })
                .unwrap();
            },
            BatchSize::SmallInput,
        );
    });
}

fn read_hit_benchmark(c: &mut Criterion) {
    c.bench_function("read_1k_keys_hit", |b| {
        b.iter_batched(
            populated_db,
            |(_dir, db)| {
                db.read(|tx| {
                    for i in 0..N_KEYS {
                        assert!(tx.get(&format!("key{}", i)).is_some());
                    }
                    Ok(())
                })
                .unwrap();
            },
            BatchSize::LargeInput,
        );
    });
}

fn read_miss_benchmark(c: &mut Criterion) {
    c.bench_function("read_1k_keys_miss", |b| {
        b.iter_batched(
            populated_db,
            |(_dir, db)| {
                db.read(|tx| {
                    for i in 0..N_KEYS {
                        assert!(tx.get(&format!("missing{}", i)).is_none());
                    }
                    Ok(())
                })
                .unwrap();
            },
            BatchSize::LargeInput,
        );
    });
}

criterion_group!(
    benches,
    update_benchmark,
    read_hit_benchmark,
    read_miss_benchmark
);
criterion_main!(benches);
