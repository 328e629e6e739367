//! Benchmarks for the NVM3 image codec and the JSON bridge

use std::collections::BTreeMap;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use nvmedit_rs::core::nvm3::{compress_objects, encode_nvm, fragment_large_object, NvmObject};
use nvmedit_rs::{nvm_to_json, parse_nvm, EncodeOptions};
use rand::{Rng, SeedableRng};

fn random_objects(count: usize, max_size: usize) -> BTreeMap<u32, NvmObject> {
    let mut rng = rand::rngs::StdRng::seed_from_u64(0x5eed);
    (0..count as u32)
        .map(|i| {
            let size = rng.gen_range(1..max_size);
            let data: Vec<u8> = (0..size).map(|_| rng.gen()).collect();
            (0x50000 + i, NvmObject::data(0x50000 + i, data))
        })
        .collect()
}

fn benchmark_encode(c: &mut Criterion) {
    let mut group = c.benchmark_group("nvm3_encode");

    for page_size in [512, 1024, 2048].iter() {
        let objects = random_objects(40, 600);
        let options = EncodeOptions::default().with_page_size(*page_size);
        group.bench_with_input(BenchmarkId::from_parameter(page_size), &options, |b, options| {
            b.iter(|| encode_nvm(&BTreeMap::new(), black_box(&objects), options).unwrap());
        });
    }

    group.finish();
}

fn benchmark_parse(c: &mut Criterion) {
    let mut group = c.benchmark_group("nvm3_parse");

    for page_size in [512, 1024, 2048].iter() {
        let objects = random_objects(40, 600);
        let options = EncodeOptions::default().with_page_size(*page_size);
        let image = encode_nvm(&BTreeMap::new(), &objects, &options).unwrap();
        group.bench_with_input(BenchmarkId::from_parameter(page_size), &image, |b, image| {
            b.iter(|| parse_nvm(black_box(image)).unwrap());
        });
    }

    group.finish();
}

fn benchmark_fragments(c: &mut Criterion) {
    let object = NvmObject::data(0x51200, vec![0xa5; 8192]);

    c.bench_function("fragment_and_compact_8k", |b| {
        b.iter(|| {
            let fragments = fragment_large_object(black_box(&object), 300, 2028).unwrap();
            compress_objects(&fragments)
        });
    });
}

fn benchmark_empty_image_to_json(c: &mut Criterion) {
    let image = encode_nvm(&BTreeMap::new(), &BTreeMap::new(), &EncodeOptions::default()).unwrap();

    // An image without version files is rejected early
    c.bench_function("nvm_to_json_missing_files", |b| {
        b.iter(|| nvm_to_json(black_box(&image)).is_err());
    });
}

criterion_group!(
    benches,
    benchmark_encode,
    benchmark_parse,
    benchmark_fragments,
    benchmark_empty_image_to_json
);
criterion_main!(benches);
