use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use sniproxy_core::qpack::{Encoder, EncoderConfig, HeaderField};
use std::hint::black_box;

fn field(name: &str, value: &str) -> HeaderField {
    HeaderField::new(name, Some(value)).unwrap()
}

fn request_fields(path: &str) -> Vec<HeaderField> {
    vec![
        field(":method", "GET"),
        field(":scheme", "https"),
        field(":authority", "example.com"),
        field(":path", path),
        field("user-agent", "bench-client/1.0"),
        field("accept", "*/*"),
    ]
}

fn new_encoder() -> Encoder {
    Encoder::new(EncoderConfig {
        capacity: 4096,
        max_blocked_streams: 100,
    })
}

fn bench_static_only_section(c: &mut Criterion) {
    let encoder = new_encoder();
    let fields = request_fields("/");

    c.bench_function("qpack_encode_static_only", |b| {
        b.iter(|| {
            let mut buf = Vec::new();
            encoder.encode(&mut buf, black_box(0), black_box(&fields)).unwrap();
            black_box(buf);
        });
    });
}

fn bench_repeated_custom_header(c: &mut Criterion) {
    let encoder = new_encoder();
    let fields = vec![field("x-request-id", "abc123-session-token-value")];
    // Warm the dynamic table once so steady-state iterations hit the
    // duplicate-then-reference path instead of inserting from scratch.
    let mut warm = Vec::new();
    encoder.encode(&mut warm, 0, &fields).unwrap();
    encoder.take_pending_instructions();

    let mut stream_id = 4u64;
    c.bench_function("qpack_encode_repeated_dynamic_entry", |b| {
        b.iter(|| {
            let mut buf = Vec::new();
            encoder.encode(&mut buf, black_box(stream_id), black_box(&fields)).unwrap();
            encoder.take_pending_instructions();
            stream_id += 4;
            black_box(buf);
        });
    });
}

fn bench_section_by_field_count(c: &mut Criterion) {
    let mut group = c.benchmark_group("qpack_encode_section_size");

    for count in [1usize, 6, 16, 32] {
        let encoder = new_encoder();
        let mut fields = request_fields("/resource");
        for i in fields.len()..count {
            fields.push(field(&format!("x-custom-{i}"), "value"));
        }

        group.bench_with_input(BenchmarkId::from_parameter(count), &fields, |b, fields| {
            let mut stream_id = 0u64;
            b.iter(|| {
                let mut buf = Vec::new();
                encoder.encode(&mut buf, black_box(stream_id), black_box(fields)).unwrap();
                encoder.take_pending_instructions();
                stream_id += 4;
                black_box(buf);
            });
        });
    }

    group.finish();
}

fn bench_never_indexed_header(c: &mut Criterion) {
    let encoder = new_encoder();
    let fields = vec![field("set-cookie", "session=opaque-token-that-must-never-be-indexed")];

    c.bench_function("qpack_encode_never_indexed", |b| {
        b.iter(|| {
            let mut buf = Vec::new();
            encoder.encode(&mut buf, black_box(0), black_box(&fields)).unwrap();
            black_box(buf);
        });
    });
}

fn bench_insert(c: &mut Criterion) {
    c.bench_function("qpack_insert_distinct_fields", |b| {
        b.iter_batched(
            new_encoder,
            |encoder| {
                for i in 0..32 {
                    encoder.insert(&field(&format!("x-field-{i}"), "value")).unwrap();
                }
            },
            criterion::BatchSize::SmallInput,
        );
    });
}

criterion_group!(
    benches,
    bench_static_only_section,
    bench_repeated_custom_header,
    bench_section_by_field_count,
    bench_never_indexed_header,
    bench_insert
);
criterion_main!(benches);
