//! Benchmark: per-request authorization hot path
//!
//! Everything here runs on every routed request: role normalization,
//! route lookup and the permission decision. Permission resolution itself
//! is dominated by the store round trip and is not measured.

use std::hint::black_box;

use authz_core::{PermissionCode, PermissionSet, RequiredPermissions, Role, decide};
use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use gateway_authz::authz::RouteTable;
use gateway_authz::config::RouteConfig;

fn granted(size: usize) -> PermissionSet {
    (0..size)
        .filter_map(|i| PermissionCode::parse(&format!("resource{i}:read")))
        .collect()
}

fn bench_decide(c: &mut Criterion) {
    let mut group = c.benchmark_group("decide");
    let required = RequiredPermissions::from_codes(["finance:write", "finance:approve"]);

    for size in [4, 64, 1024] {
        let set = granted(size);
        group.bench_with_input(BenchmarkId::new("deny", size), &set, |b, set| {
            b.iter(|| black_box(decide(&required, set)));
        });

        let mut with_wildcard = set.clone();
        with_wildcard.extend(PermissionCode::parse("finance:*"));
        group.bench_with_input(
            BenchmarkId::new("resource_wildcard", size),
            &with_wildcard,
            |b, set| b.iter(|| black_box(decide(&required, set))),
        );
    }

    group.finish();
}

fn bench_role_normalization(c: &mut Criterion) {
    c.bench_function("role_new", |b| {
        b.iter(|| black_box(Role::new(black_box("  Finance-Approver "))));
    });
}

fn bench_route_lookup(c: &mut Criterion) {
    let routes: Vec<RouteConfig> = (0..50)
        .map(|i| RouteConfig {
            id: format!("svc{i}"),
            path_prefix: format!("/api/svc{i}"),
            upstream: "http://backend.internal".to_string(),
            anonymous: false,
            permissions: Vec::new(),
        })
        .collect();
    let Ok(table) = RouteTable::from_config(&routes) else {
        return;
    };

    c.bench_function("route_find", |b| {
        b.iter(|| black_box(table.find(black_box("/api/svc42/orders/17"))));
    });
}

criterion_group!(
    benches,
    bench_decide,
    bench_role_normalization,
    bench_route_lookup
);
criterion_main!(benches);
