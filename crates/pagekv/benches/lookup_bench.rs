use criterion::{criterion_group, criterion_main, Criterion};
use std::io::Cursor;

use buildset::BuildSet;
use pagekv::{BuildConfig, PageFileBuilder, PageFileReader};

const N: usize = 10_000;

fn inline_image() -> Vec<u8> {
    let mut set = BuildSet::new();
    for i in 0..N as u64 {
        set.insert(format!("k{:08}", i).into_bytes(), vec![b'x'; 100])
            .unwrap();
    }
    PageFileBuilder::build_to_vec(&set, &BuildConfig::new()).unwrap()
}

fn lookup_inline_hit(c: &mut Criterion) {
    let mut reader = PageFileReader::open(Cursor::new(inline_image())).unwrap();
    c.bench_function("lookup_inline_hit_10k", |b| {
        b.iter(|| {
            for i in 0..N as u64 {
                let key = format!("k{:08}", i).into_bytes();
                criterion::black_box(reader.lookup(&key).unwrap());
            }
        });
    });
}

fn lookup_miss(c: &mut Criterion) {
    let mut reader = PageFileReader::open(Cursor::new(inline_image())).unwrap();
    c.bench_function("lookup_miss_10k", |b| {
        b.iter(|| {
            for i in 0..N as u64 {
                let key = format!("absent{:08}", i).into_bytes();
                criterion::black_box(reader.lookup(&key).unwrap());
            }
        });
    });
}

fn lookup_external_hit(c: &mut Criterion) {
    let mut set = BuildSet::new();
    for i in 0..99u64 {
        set.insert(format!("k{:03}", i).into_bytes(), vec![b'x'; 32])
            .unwrap();
    }
    set.insert(b"big".to_vec(), vec![b'X'; 1 << 20]).unwrap();
    let config = BuildConfig::new()
        .small_change_bytes(4096)
        .max_waste_ratio(2.0)
        .max_external_ratio(0.05);
    let image = PageFileBuilder::build_to_vec(&set, &config).unwrap();
    let mut reader = PageFileReader::open(Cursor::new(image)).unwrap();

    c.bench_function("lookup_external_hit", |b| {
        b.iter(|| {
            criterion::black_box(reader.lookup(b"big").unwrap());
        });
    });
}

criterion_group!(benches, lookup_inline_hit, lookup_miss, lookup_external_hit);

criterion_main!(benches);
