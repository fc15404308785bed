use criterion::{black_box, criterion_group, criterion_main, Criterion};
use http::Method;
use std::io::Read;

use railyard::{HandlerRegistry, HandlerRequest, HandlerResponse, MediaType, Registration};

fn noop(_req: &HandlerRequest, _body: &mut dyn Read) -> HandlerResponse {
    HandlerResponse::text(200, "ok")
}

fn build_registry(route_count: usize) -> HandlerRegistry {
    let registry = HandlerRegistry::new();
    for i in 0..route_count {
        registry
            .register(
                Registration::new("*", format!("/api/s{i}/items/{{id}}"), Method::GET, noop)
                    .api("bench"),
            )
            .unwrap();
        registry
            .register(
                Registration::new("*", format!("/api/s{i}/items"), Method::POST, noop)
                    .content_type("application/json")
                    .api("bench"),
            )
            .unwrap();
    }
    registry
        .register(
            Registration::new("*", "/files/{path}", Method::GET, noop)
                .open_end()
                .api("bench"),
        )
        .unwrap();
    registry
}

fn bench_resolution(c: &mut Criterion) {
    for &routes in &[10usize, 100, 500] {
        let registry = build_registry(routes);
        let deep_path = format!("/api/s{}/items/12345", routes - 1);

        c.bench_function(&format!("resolve_param_route_{routes}"), |b| {
            b.iter(|| {
                let r = registry.resolve(
                    black_box("example.com"),
                    black_box(&deep_path),
                    &Method::GET,
                    &[],
                );
                black_box(r).unwrap()
            })
        });

        let accept = vec![MediaType::parse("application/json")];
        let post_path = format!("/api/s{}/items", routes / 2);
        c.bench_function(&format!("resolve_content_type_{routes}"), |b| {
            b.iter(|| {
                let r = registry.resolve(
                    black_box("example.com"),
                    black_box(&post_path),
                    &Method::POST,
                    &accept,
                );
                black_box(r).unwrap()
            })
        });

        c.bench_function(&format!("resolve_catch_all_{routes}"), |b| {
            b.iter(|| {
                let r = registry.resolve(
                    black_box("example.com"),
                    black_box("/files/a/b/c/d/e"),
                    &Method::GET,
                    &[],
                );
                black_box(r).unwrap()
            })
        });
    }
}

criterion_group!(benches, bench_resolution);
criterion_main!(benches);
