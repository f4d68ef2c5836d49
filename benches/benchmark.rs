use criterion::{Criterion, criterion_group, criterion_main};
use std::hint::black_box;
use std::sync::Arc;

use strata::codec::{decode, encode};
use strata::markdown::ComrakRenderer;
use strata::parse::parse_field_value;
use strata::render::{RenderContext, Renderer};
use strata::value::{Date, DatePrecision, Duration, DurationUnit, Link, Value};

// one record shaped like a parsed note
fn sample_document(i: usize) -> Value {
    let due = Date::from_parts(1_700_000_000 + i as i64 * 86_400, 0, 3600, DatePrecision::Day);
    let estimate = Duration::new().with(DurationUnit::Hours, 3.0).and_then(|d| d.with(DurationUnit::Minutes, 30.0));
    Value::object([
        ("title", Value::string(format!("Note {i}"))),
        ("rating", Value::Number(i as f64 / 3.0)),
        ("done", Value::Boolean(i % 2 == 0)),
        ("due", due.map(Value::Date).unwrap_or(Value::Null)),
        ("estimate", estimate.map(Value::Duration).unwrap_or(Value::Null)),
        ("related", Value::array(vec![Value::Link(Link::file(format!("Note {}", i + 1)).with_display("next"))])),
        ("tags", Value::array(vec![Value::from("#project"), Value::from("#review")])),
    ])
}

pub fn criterion_benchmark(c: &mut Criterion) {
    let one = sample_document(1);
    let many = Value::array((0..1_000).map(sample_document).collect());

    c.bench_function("encode 1", |b| b.iter(|| encode(black_box(&one))));
    c.bench_function("encode 1k", |b| b.iter(|| encode(black_box(&many))));

    let encoded = encode(&many).expect("sample encodes");
    c.bench_function("decode 1k", |b| b.iter(|| decode(black_box(&encoded))));

    c.bench_function("field value", |b| {
        b.iter(|| parse_field_value(black_box("[[Note A|see this]], 2024-03-01T09:30, 3 days 4h, \"text\"")))
    });

    let rt = tokio::runtime::Builder::new_current_thread().build().expect("runtime");
    let renderer = Renderer::new(Arc::new(ComrakRenderer::new()));
    let ctx = RenderContext::default();
    c.bench_function("render 1", |b| {
        b.iter(|| rt.block_on(renderer.render_to_element(black_box(&one), "bench.md", &ctx, true)))
    });
    let hundred = Value::array((0..100).map(sample_document).collect());
    c.bench_function("render 100", |b| {
        b.iter(|| rt.block_on(renderer.render_to_element(black_box(&hundred), "bench.md", &ctx, true)))
    });
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
