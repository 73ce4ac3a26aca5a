//! Criterion benchmarks for the wsgate frame codec.
//!
//! Measures encode and decode latency across the three HyBi length
//! encodings and both payload encodings, plus Hixie framing.
//!
//! Run with:
//! ```bash
//! cargo bench --package wsgate-core --bench codec_bench
//! ```

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use wsgate_core::protocol::frame::{
    decode_hixie, decode_hybi, encode_hixie, encode_hybi, encode_hybi_masked,
};
use wsgate_core::OpCode;

// ── Payload fixtures ──────────────────────────────────────────────────────────

/// One payload per HyBi length encoding: 7-bit, 16-bit and 64-bit.
fn payloads() -> Vec<(&'static str, Vec<u8>)> {
    vec![
        ("64B", vec![0x5A; 64]),
        ("4KiB", vec![0x5A; 4 * 1024]),
        ("64KiB", vec![0x5A; 64 * 1024 + 1]),
    ]
}

const MASK: [u8; 4] = [0x12, 0x34, 0x56, 0x78];

// ── Benchmarks ────────────────────────────────────────────────────────────────

/// Benchmarks server-side encoding (target → client direction).
fn bench_encode(c: &mut Criterion) {
    let mut group = c.benchmark_group("encode");
    for (name, payload) in payloads() {
        group.bench_with_input(BenchmarkId::new("hybi_binary", name), &payload, |b, p| {
            b.iter(|| encode_hybi(black_box(p), OpCode::Binary, false))
        });
        group.bench_with_input(BenchmarkId::new("hybi_base64", name), &payload, |b, p| {
            b.iter(|| encode_hybi(black_box(p), OpCode::Text, true))
        });
        group.bench_with_input(BenchmarkId::new("hixie", name), &payload, |b, p| {
            b.iter(|| encode_hixie(black_box(p)))
        });
    }
    group.finish();
}

/// Benchmarks decoding of masked client frames (client → target direction).
fn bench_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("decode");
    for (name, payload) in payloads() {
        let binary = encode_hybi_masked(&payload, OpCode::Binary, MASK);
        group.bench_with_input(BenchmarkId::new("hybi_binary", name), &binary, |b, bytes| {
            b.iter(|| decode_hybi(black_box(bytes), false).expect("decode must succeed"))
        });

        let hixie = encode_hixie(&payload);
        group.bench_with_input(BenchmarkId::new("hixie", name), &hixie, |b, bytes| {
            b.iter(|| decode_hixie(black_box(bytes)).expect("decode must succeed"))
        });
    }
    group.finish();
}

/// Benchmarks the cost of discovering that a frame is incomplete, which the
/// proxy loop pays on every short read.
fn bench_incomplete(c: &mut Criterion) {
    let bytes = encode_hybi_masked(&[0u8; 4096], OpCode::Binary, MASK);
    let half = &bytes[..bytes.len() / 2];
    c.bench_function("decode_incomplete_hybi", |b| {
        b.iter(|| decode_hybi(black_box(half), false).expect("decode must succeed"))
    });
}

criterion_group!(benches, bench_encode, bench_decode, bench_incomplete);
criterion_main!(benches);
