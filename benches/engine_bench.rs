use criterion::{criterion_group, criterion_main, BatchSize, Criterion};
use lsmkv::DB;
use tempfile::tempdir;

fn bench_upsert(c: &mut Criterion) {
    c.bench_function("upsert_1k_with_flushes", |b| {
        b.iter_batched(
            || tempdir().unwrap(),
            |dir| {
                let db = DB::open_with_threshold(dir.path(), 16 * 1024).unwrap();
                for i in 0..1000u32 {
                    db.upsert(format!("key_{i:06}").as_bytes(), &[0u8; 100]).unwrap();
                }
                db.close().unwrap();
            },
            BatchSize::PerIteration,
        )
    });
}

fn bench_scan(c: &mut Criterion) {
    let dir = tempdir().unwrap();
    let db = DB::open_with_threshold(dir.path(), 64 * 1024).unwrap();
    for i in 0..10_000u32 {
        db.upsert(format!("key_{i:06}").as_bytes(), &[1u8; 100]).unwrap();
    }
    for i in (0..10_000u32).step_by(3) {
        db.remove(format!("key_{i:06}").as_bytes()).unwrap();
    }

    c.bench_function("scan_from_middle_100", |b| {
        b.iter(|| db.scan(b"key_005000").unwrap().take(100).count())
    });
    c.bench_function("get_hit", |b| {
        b.iter(|| db.get(b"key_007001").unwrap())
    });
}

criterion_group!(benches, bench_upsert, bench_scan);
criterion_main!(benches);
