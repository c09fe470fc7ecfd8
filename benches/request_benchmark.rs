use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

use std::fs;

use docserver::{Config, DocumentRouter, Request};

fn request_parse_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("request_parse");

    let requests = [
        (
            "simple",
            b"GET / HTTP/1.1\r\nHost: localhost:7878\r\nUser-Agent: Test\r\n\r\n".as_slice(),
        ),
        (
            "query",
            b"GET /docs/index.htm?name=ann&lang=zh%20CN HTTP/1.1\r\nHost: localhost\r\n\r\n"
                .as_slice(),
        ),
        (
            "browser",
            b"GET /path/to/resource?id=123 HTTP/1.1\r\n\
              Host: localhost:7878\r\n\
              User-Agent: Mozilla/5.0 (Windows NT 10.0; Win64; x64)\r\n\
              Accept: text/html,application/xhtml+xml\r\n\
              Accept-Encoding: gzip, deflate, br\r\n\
              Connection: keep-alive\r\n\
              \r\n"
                .as_slice(),
        ),
    ];

    for (name, request) in requests.iter() {
        group.bench_with_input(BenchmarkId::from_parameter(name), request, |b, request| {
            b.iter(|| {
                let _ = Request::try_from(black_box(request), 0).unwrap();
            });
        });
    }

    group.finish();
}

fn dispatch_benchmark(c: &mut Criterion) {
    let dir = tempfile::tempdir().unwrap();
    fs::write(
        dir.path().join("index.html"),
        "<li><* method *> <* uri *> <* query.id *></li>\n".repeat(100),
    )
    .unwrap();
    fs::write(dir.path().join("logo.png"), vec![0u8; 4096]).unwrap();
    let config = Config::new().with_www_root(&dir.path().display().to_string());
    let router = DocumentRouter::new(&config);

    let mut group = c.benchmark_group("dispatch");
    let targets = [
        ("template", "/?id=7"),
        ("static", "/logo.png"),
        ("not_found", "/missing.html"),
    ];

    for (name, target) in targets.iter() {
        let raw = format!("GET {} HTTP/1.1\r\nHost: localhost\r\n\r\n", target);
        let request = Request::try_from(raw.as_bytes(), 0).unwrap();
        group.bench_with_input(BenchmarkId::from_parameter(name), &request, |b, request| {
            b.iter(|| router.dispatch(black_box(request)));
        });
    }

    group.finish();
}

criterion_group!(benches, request_parse_benchmark, dispatch_benchmark);
criterion_main!(benches);
