//! Search pipeline benchmarks over a ~100k-path synthetic index. The target
//! is comfortably under 10 ms per query at this size.

use std::hint::black_box;

use criterion::{criterion_group, criterion_main, Criterion};
use pathscope_core::text::{score_path, ScoreParams};
use pathscope_core::{query, FileFlags, Index, QueryPlan, SearchOptions};

const INDEX_SIZE: usize = 100_000;

fn build_index(n: usize) -> Index {
    let dirs = ["src", "pkg", "internal", "lib", "cmd", "docs", "test", "build"];
    let names = ["handler", "router", "config", "parser", "client", "server", "index", "util"];
    let exts = ["go", "rs", "ts", "md"];
    let mut index = Index::new();
    let mut i = 0;
    'fill: loop {
        for d1 in &dirs {
            for d2 in &dirs {
                for name in &names {
                    for ext in &exts {
                        if i >= n {
                            break 'fill;
                        }
                        index.add(&format!("{d1}/{d2}/{name}_{i}.{ext}"), FileFlags::FILE);
                        i += 1;
                    }
                }
            }
        }
    }
    index
}

fn bench_search(c: &mut Criterion) {
    let index = build_index(INDEX_SIZE);
    let snap = index.snapshot();
    let opts = SearchOptions::default();

    let mut group = c.benchmark_group("search");
    group.bench_function("exact_basename", |b| {
        let plan = QueryPlan::new("handler_5000.go");
        b.iter(|| black_box(query::search(&plan, &snap, opts)));
    });
    group.bench_function("common_trigram", |b| {
        let plan = QueryPlan::new("handler");
        b.iter(|| black_box(query::search(&plan, &snap, opts)));
    });
    group.bench_function("short_prefix", |b| {
        let plan = QueryPlan::new("ha");
        b.iter(|| black_box(query::search(&plan, &snap, opts)));
    });
    group.bench_function("fuzzy_fallback", |b| {
        // No trigram of "hnqdlr" exists in the corpus, forcing the
        // first-letter bucket plus subsequence filtering.
        let plan = QueryPlan::new("hnqdlr");
        b.iter(|| black_box(query::search(&plan, &snap, opts)));
    });
    group.finish();
}

fn bench_score_path(c: &mut Criterion) {
    let path = b"src/internal/database/queries/workspaces.sql";
    let query = b"workspace";
    let tokens = vec!["workspace".to_string()];
    let params = ScoreParams::default();
    let base_off = path.len() - "workspaces.sql".len();
    let base_len = "workspaces.sql".len();

    c.bench_function("score_path", |b| {
        b.iter(|| {
            black_box(score_path(
                black_box(path),
                base_off,
                base_len,
                4,
                black_box(query),
                &tokens,
                &params,
            ))
        });
    });
}

criterion_group!(benches, bench_search, bench_score_path);
criterion_main!(benches);
