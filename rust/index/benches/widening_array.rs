//! Random-increment throughput of the widening counter array against plain
//! fixed-width vectors.
//!
//! Groups:
//!   incr   - `incr(index, 1)` at random indices, widening array vs u16/u32 Vec
//!   get    - sequential reads after the counts are populated
//!
//! Run with:
//!   cargo bench -p heatspace-index --bench widening_array

use std::hint::black_box;

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use heatspace_index::widening_array::UnsignedWideningArray;
use rand::{rngs::StdRng, Rng, SeedableRng};

const SIZES: &[usize] = &[1 << 16, 1 << 20];
const NUM_INCRS: usize = 1 << 18;

fn random_indexes(size: usize) -> Vec<usize> {
    let mut rng = StdRng::seed_from_u64(0xdeadbeef);
    (0..NUM_INCRS).map(|_| rng.gen_range(0..size)).collect()
}

fn bench_incr(c: &mut Criterion) {
    let mut group = c.benchmark_group("incr");
    group.throughput(Throughput::Elements(NUM_INCRS as u64));
    for &size in SIZES {
        let indexes = random_indexes(size);

        group.bench_with_input(BenchmarkId::new("widening", size), &indexes, |b, indexes| {
            b.iter(|| {
                let mut array = UnsignedWideningArray::new(size, 1).unwrap();
                for &i in indexes {
                    array.incr(i, 1).unwrap();
                }
                black_box(array.width())
            })
        });

        group.bench_with_input(BenchmarkId::new("vec_u16", size), &indexes, |b, indexes| {
            b.iter(|| {
                let mut array = vec![0u16; size];
                for &i in indexes {
                    array[i] += 1;
                }
                black_box(array.len())
            })
        });

        group.bench_with_input(BenchmarkId::new("vec_u32", size), &indexes, |b, indexes| {
            b.iter(|| {
                let mut array = vec![0u32; size];
                for &i in indexes {
                    array[i] += 1;
                }
                black_box(array.len())
            })
        });
    }
    group.finish();
}

fn bench_get(c: &mut Criterion) {
    let mut group = c.benchmark_group("get");
    for &size in SIZES {
        let mut array = UnsignedWideningArray::new(size, 1).unwrap();
        for &i in &random_indexes(size) {
            array.incr(i, 1).unwrap();
        }
        group.throughput(Throughput::Elements(size as u64));
        group.bench_with_input(BenchmarkId::new("widening", size), &array, |b, array| {
            b.iter(|| {
                let mut sum = 0u64;
                for i in 0..array.len() {
                    sum += array.get(i).unwrap();
                }
                black_box(sum)
            })
        });
        group.bench_with_input(BenchmarkId::new("widening_iter", size), &array, |b, array| {
            b.iter(|| black_box(array.iter().sum::<u64>()))
        });
    }
    group.finish();
}

criterion_group!(benches, bench_incr, bench_get);
criterion_main!(benches);
