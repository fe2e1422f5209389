use criterion::{criterion_group, criterion_main, Criterion, Throughput};
use jsonroom_core::codec;
use jsonroom_core::{ChangeOrigin, JsonPath, PatchEngine, Replica};
use serde_json::json;
use std::hint::black_box;
use std::sync::{Arc, Mutex};

fn sample_document() -> serde_json::Value {
    let rows: Vec<_> = (0..200)
        .map(|i| json!({"id": i, "name": format!("row-{i}"), "tags": ["a", "b"], "score": i as f64 * 0.5}))
        .collect();
    json!({"title": "bench", "rows": rows})
}

fn bench_codec(c: &mut Criterion) {
    let mut group = c.benchmark_group("Codec");
    let payload: Vec<u8> = (0..64 * 1024).map(|i| (i % 251) as u8).collect();
    let encoded = codec::encode(&payload);
    group.throughput(Throughput::Bytes(payload.len() as u64));

    group.bench_function("encode_64KiB", |b| {
        b.iter(|| black_box(codec::encode(black_box(&payload))))
    });
    group.bench_function("decode_64KiB", |b| {
        b.iter(|| black_box(codec::decode(black_box(&encoded)).unwrap()))
    });

    group.finish();
}

fn bench_path_set(c: &mut Criterion) {
    let mut group = c.benchmark_group("Patch Engine");
    group.throughput(Throughput::Elements(1));

    group.bench_function("path_set_on_200_rows", |b| {
        let replica = Replica::new();
        let engine = PatchEngine::new(&replica);
        engine.apply_full_replace(&sample_document());
        let path = JsonPath::parse_dotted("rows.100.name");
        let mut n = 0u64;

        b.iter(|| {
            n += 1;
            black_box(engine.apply_path_set(&path, json!(n)).unwrap());
        })
    });

    group.bench_function("snapshot_200_rows", |b| {
        let replica = Replica::new();
        PatchEngine::new(&replica).apply_full_replace(&sample_document());
        b.iter(|| black_box(replica.snapshot()))
    });

    group.finish();
}

fn bench_apply_remote(c: &mut Criterion) {
    let mut group = c.benchmark_group("Replica");
    group.throughput(Throughput::Elements(1));

    let mut source = Replica::new();
    let captured = Arc::new(Mutex::new(Vec::new()));
    let sink = captured.clone();
    source
        .on_change(move |update, _| sink.lock().unwrap().push(update.to_vec()))
        .unwrap();
    PatchEngine::new(&source).apply_full_replace(&sample_document());
    let update = captured.lock().unwrap()[0].clone();

    group.bench_function("apply_remote_update", |b| {
        b.iter(|| {
            let dest = Replica::new();
            dest.apply_update(black_box(&update), ChangeOrigin::Remote).unwrap();
            black_box(dest);
        })
    });

    group.finish();
}

criterion_group!(benches, bench_codec, bench_path_set, bench_apply_remote);
criterion_main!(benches);
