//! Canonical encoding and fingerprint benchmarks.

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};

use dkcloak::calibration::browser_profile;
use dkcloak::canonical::{decode, encode, Value};

fn claim_like_value() -> Value {
    Value::map([
        ("issuer", Value::from("dk1:aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa")),
        ("timestamp", Value::from(1_700_000_000_000u64)),
        ("nonce", Value::bytes(vec![0x42u8; 16])),
        (
            "data",
            Value::map([
                ("hosts", Value::text_array(&["a.test", "b.test", "c.test"])),
                ("count", Value::from(-17i64)),
                ("enabled", Value::from(true)),
            ]),
        ),
    ])
}

fn bench_encode(c: &mut Criterion) {
    let value = claim_like_value();
    let len = encode(&value).len() as u64;

    let mut group = c.benchmark_group("canonical_encode");
    group.throughput(Throughput::Bytes(len));
    group.bench_function("claim", |b| b.iter(|| black_box(encode(&value))));
    group.finish();
}

fn bench_decode(c: &mut Criterion) {
    let bytes = encode(&claim_like_value());

    let mut group = c.benchmark_group("canonical_decode");
    group.throughput(Throughput::Bytes(bytes.len() as u64));
    group.bench_function("claim", |b| b.iter(|| black_box(decode(&bytes).unwrap())));
    group.finish();
}

fn bench_template_id(c: &mut Criterion) {
    let params = browser_profile();

    c.bench_function("template_id", |b| b.iter(|| black_box(params.template_id())));
}

criterion_group!(benches, bench_encode, bench_decode, bench_template_id);
criterion_main!(benches);
