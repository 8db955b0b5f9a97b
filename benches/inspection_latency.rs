use criterion::{black_box, criterion_group, criterion_main, Criterion};
use std::sync::Arc;

use wafgate::directives::{FilterConfig, FilterSettings};
use wafgate::engine::LiteralCompiler;
use wafgate::filter::memory::{filter_for, HttpRequest, HttpResponse, MemoryStream, RequestHead};
use wafgate::filter::{DestroyReason, FilterFactory};
use wafgate::observability::FilterMetrics;

const SETTINGS: &str = r#"
directives:
  main:
    simple_directives:
      - "engine on"
      - 'rule id=1001 phase=request_headers target=header:user-agent contains="sqlmap" severity=critical'
      - 'rule id=1002 phase=request_body target=body contains="union select" severity=critical'
      - 'rule id=1003 phase=response_body target=body contains="stack trace" severity=error'
default_directive: main
"#;

fn create_factory() -> FilterFactory {
    let settings: FilterSettings = serde_yaml::from_str(SETTINGS).unwrap();
    let config = FilterConfig::build(&settings, &LiteralCompiler).unwrap();
    FilterFactory::fixed(Arc::new(config), Arc::new(FilterMetrics::new()))
}

fn create_request(user_agent: &str) -> HttpRequest {
    HttpRequest::new(
        RequestHead::new("POST", "shop.example.com", "/cart/items")
            .with_protocol("HTTP/1.1")
            .with_header("User-Agent", user_agent)
            .with_header("Content-Type", "application/x-www-form-urlencoded"),
    )
    .with_chunk("item=42&qty=1&")
    .with_chunk("note=gift wrap please")
}

fn create_response() -> HttpResponse {
    HttpResponse::new(200)
        .with_header("Content-Type", "text/html")
        .with_chunk(vec![b'x'; 4096])
        .with_chunk(vec![b'y'; 4096])
}

fn bench_clean_stream(c: &mut Criterion) {
    let factory = create_factory();
    let stream = MemoryStream::default();
    let request = create_request("Mozilla/5.0");
    let response = create_response();

    c.bench_function("stream_clean_exchange", |b| {
        b.iter(|| stream.run(black_box(&factory), black_box(&request), black_box(&response)))
    });
}

fn bench_blocked_stream(c: &mut Criterion) {
    let factory = create_factory();
    let stream = MemoryStream::default();
    let request = create_request("sqlmap/1.7");
    let response = create_response();

    c.bench_function("stream_header_block", |b| {
        b.iter(|| stream.run(black_box(&factory), black_box(&request), black_box(&response)))
    });
}

fn bench_request_headers_only(c: &mut Criterion) {
    let factory = create_factory();
    let head = create_request("Mozilla/5.0").head;

    c.bench_function("decode_headers_and_teardown", |b| {
        b.iter(|| {
            let mut filter = filter_for(&factory);
            filter.decode_headers(black_box(&head), true);
            filter.on_destroy(DestroyReason::Normal);
        })
    });
}

criterion_group!(
    benches,
    bench_clean_stream,
    bench_blocked_stream,
    bench_request_headers_only,
);

criterion_main!(benches);
