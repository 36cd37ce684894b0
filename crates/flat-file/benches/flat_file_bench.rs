use criterion::{criterion_group, criterion_main, BatchSize, Criterion};
use flat_file::{FlatFileConfig, FlatFileStore};
use rand::{Rng, SeedableRng};
use tempfile::tempdir;

const N: usize = 1_000;
const BLOCK_SIZE: usize = 4 * 1024;

fn bench_config() -> FlatFileConfig {
    FlatFileConfig {
        max_file_size: 1024 * 1024,
        max_open_files: 4,
    }
}

fn flat_file_append(c: &mut Criterion) {
    c.bench_function("flat_file_append_4k_x1k", |b| {
        b.iter_batched(
            || {
                let dir = tempdir().unwrap();
                let store = FlatFileStore::open(dir.path(), "blocks", bench_config()).unwrap();
                (dir, store)
            },
            |(_dir, store)| {
                let block = vec![0xABu8; BLOCK_SIZE];
                for _ in 0..N {
                    store.write(&block).unwrap();
                }
            },
            BatchSize::PerIteration,
        );
    });
}

fn flat_file_random_read(c: &mut Criterion) {
    let dir = tempdir().unwrap();
    let store = FlatFileStore::open(dir.path(), "blocks", bench_config()).unwrap();
    let block = vec![0xCDu8; BLOCK_SIZE];
    let locations: Vec<_> = (0..N).map(|_| store.write(&block).unwrap()).collect();

    let mut rng = rand::rngs::StdRng::seed_from_u64(7);

    c.bench_function("flat_file_random_read_4k", |b| {
        b.iter(|| {
            let location = &locations[rng.gen_range(0..locations.len())];
            store.read(location).unwrap()
        });
    });
}

criterion_group!(benches, flat_file_append, flat_file_random_read);
criterion_main!(benches);
