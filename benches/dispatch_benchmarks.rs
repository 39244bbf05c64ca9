//! Dispatch Benchmarks
//!
//! Measures route lookup and full in-process dispatch through the pooled
//! context and middleware chain.
//!
//! Run with: cargo bench --bench dispatch_benchmarks

use bytes::Bytes;
use criterion::{Criterion, Throughput, criterion_group, criterion_main};
use http::Request;
use std::hint::black_box;
use trellis::prelude::*;

fn ok(body: &'static str) -> Handler {
    Handler::new(move |c| Box::pin(async move { c.string(StatusCode::OK, body) }))
}

fn app(middleware: usize) -> App {
    let mut app = App::new();
    for _ in 0..middleware {
        app.use_middleware(MiddlewareFunc::from_fn(|c, next| {
            Box::pin(async move { next.call(c).await })
        }));
    }
    app.get("/", ok("root")).unwrap();
    app.get("/users", ok("users")).unwrap();
    app.get("/users/new", ok("new")).unwrap();
    app.get("/users/:id", ok("user")).unwrap();
    app.get("/users/:id/files/:file", ok("file")).unwrap();
    app.get("/static/*", ok("static")).unwrap();
    app
}

// ============================================================================
// Route Lookup
// ============================================================================

fn bench_router_resolve(c: &mut Criterion) {
    let app = app(0);
    let router = app.router();
    let mut group = c.benchmark_group("router_resolve");
    group.throughput(Throughput::Elements(1));

    for (name, path) in [
        ("static", "/users/new"),
        ("param", "/users/42"),
        ("two_params", "/users/42/files/report.pdf"),
        ("wildcard", "/static/css/site.css"),
        ("miss", "/nothing/here"),
    ] {
        group.bench_function(name, |b| {
            b.iter(|| black_box(router.resolve(&Method::GET, black_box(path))))
        });
    }

    group.finish();
}

// ============================================================================
// Full Dispatch
// ============================================================================

fn bench_dispatch(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let mut group = c.benchmark_group("dispatch");
    group.throughput(Throughput::Elements(1));

    for middleware in [0, 4] {
        let app = app(middleware);
        group.bench_function(format!("param_route/{}_middleware", middleware), |b| {
            b.to_async(&rt).iter(|| async {
                let request = Request::get("/users/42").body(Bytes::new()).unwrap();
                black_box(app.serve(request).await)
            })
        });
    }

    let app = app(0);
    group.bench_function("not_found", |b| {
        b.to_async(&rt).iter(|| async {
            let request = Request::get("/missing").body(Bytes::new()).unwrap();
            black_box(app.serve(request).await)
        })
    });

    group.finish();
}

criterion_group!(benches, bench_router_resolve, bench_dispatch);
criterion_main!(benches);
