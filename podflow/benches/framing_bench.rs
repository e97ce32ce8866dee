//! Benchmarks for upstream frame reassembly.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use podflow::framing::{parse_lenient, FrameReassembler};

fn workflow_body(nodes: usize) -> String {
    let mut body = String::from("event: workflow_started\ndata: {\"workflow_run_id\": \"wr-1\"}\n\n");
    for i in 0..nodes {
        body.push_str(&format!(
            "event: node_finished\ndata: {{\"data\": {{\"title\": \"node {i}\", \"outputs\": {{\"text\": \"lorem ipsum dolor sit amet\"}}}}}}\n\n"
        ));
    }
    body.push_str("event: workflow_finished\ndata: {\"data\": {\"status\": \"succeeded\", \"total_tokens\": 1}}\n\n");
    body
}

fn reassembly_benchmark(c: &mut Criterion) {
    let body = workflow_body(200);
    let mut group = c.benchmark_group("reassemble");
    for chunk in [16usize, 256, 4096] {
        group.bench_with_input(BenchmarkId::from_parameter(chunk), &chunk, |b, &chunk| {
            b.iter(|| {
                let mut reassembler = FrameReassembler::new();
                let mut frames = 0;
                for piece in body.as_bytes().chunks(chunk) {
                    frames += reassembler.push(black_box(piece)).len();
                }
                black_box(frames)
            });
        });
    }
    group.finish();
}

fn lenient_parse_benchmark(c: &mut Criterion) {
    let payload = format!("'[{}]'", vec![r#"{"title": "T", "script": "S"}"#; 50].join(","));
    c.bench_function("parse_lenient_single_quoted", |b| b.iter(|| parse_lenient(black_box(&payload))));
}

criterion_group!(benches, reassembly_benchmark, lenient_parse_benchmark);
criterion_main!(benches);
