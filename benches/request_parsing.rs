//! Benchmarks for inbound request handling
//!
//! This benchmark measures:
//! - Full parse (structure, size, schema, sanitize) of typical tool requests
//! - Schema validation of nested arguments
//! - Push stream frame decoding

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use codap_relay_worker::parser::{ParserConfig, ToolRequestParser};
use codap_relay_worker::tools::{handler_fn, ToolRegistry};
use codap_relay_worker::transport::SseFrameDecoder;
use codap_relay_worker::types::{ParameterSchema, ToolSchema};
use serde_json::{json, Map, Value};
use std::sync::Arc;

fn registry() -> Arc<ToolRegistry> {
    let attribute = ParameterSchema::object()
        .with_property("name", ParameterSchema::string().with_length(Some(1), Some(64)))
        .with_property(
            "type",
            ParameterSchema::string().with_enum(vec![json!("numeric"), json!("categorical")]),
        )
        .with_required("name");
    Arc::new(
        ToolRegistry::builder()
            .tool(
                ToolSchema::new("create_codap_dataset", "Create a dataset")
                    .with_param(
                        "name",
                        ParameterSchema::string().with_pattern("^[A-Za-z][A-Za-z0-9_ ]*$"),
                        true,
                    )
                    .with_param("attributes", ParameterSchema::array(attribute), true)
                    .with_param("rows", ParameterSchema::array(ParameterSchema::object()), false),
                handler_fn(|args| async move { Ok(Value::Object(args)) }),
            )
            .build()
            .expect("registry builds"),
    )
}

fn dataset_request(rows: usize) -> Value {
    let rows: Vec<Value> = (0..rows)
        .map(|i| json!({"height": 150 + i % 40, "species": format!("s{}", i % 7)}))
        .collect();
    json!({
        "id": "req-1",
        "tool": "create_codap_dataset",
        "args": {
            "name": "Measurements",
            "attributes": [
                {"name": "height", "type": "numeric"},
                {"name": "species", "type": "categorical"}
            ],
            "rows": rows
        }
    })
}

fn bench_parse_request(c: &mut Criterion) {
    let parser = ToolRequestParser::new(registry(), ParserConfig::default());
    let mut group = c.benchmark_group("parse_request");

    for rows in [0usize, 10, 500] {
        let raw = dataset_request(rows);
        group.bench_with_input(BenchmarkId::new("dataset", rows), &raw, |b, raw| {
            b.iter(|| parser.parse_request(black_box(raw)))
        });
    }

    let text = dataset_request(10).to_string();
    group.bench_function("from_str", |b| b.iter(|| parser.parse_str(black_box(&text))));
    group.finish();
}

fn bench_validate_parameters(c: &mut Criterion) {
    let parser = ToolRequestParser::new(registry(), ParserConfig::default());
    let args: Map<String, Value> = match dataset_request(100)["args"].clone() {
        Value::Object(m) => m,
        _ => Map::new(),
    };
    c.bench_function("validate_parameters", |b| {
        b.iter(|| parser.validate_parameters("create_codap_dataset", black_box(&args)))
    });
}

fn bench_sse_decoding(c: &mut Criterion) {
    let mut group = c.benchmark_group("sse_decoding");
    let frame = format!(
        "event: tool-request\ndata: {}\n\n: keep-alive\n\nevent: heartbeat\ndata: {{}}\n\n",
        dataset_request(10)
    );
    let stream = frame.repeat(50);
    group.throughput(Throughput::Bytes(stream.len() as u64));

    group.bench_function("decode_chunks", |b| {
        b.iter(|| {
            let mut decoder = SseFrameDecoder::new();
            let mut frames = 0;
            for chunk in stream.as_bytes().chunks(512) {
                frames += decoder.push(black_box(chunk)).len();
            }
            frames
        })
    });
    group.finish();
}

criterion_group!(
    benches,
    bench_parse_request,
    bench_validate_parameters,
    bench_sse_decoding
);
criterion_main!(benches);
