#![allow(clippy::expect_used)]

use std::time::Duration;

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use microbase_storage::{
    Criteria, RollPageParam, SearchMode,
    testutil::{SampleDoc, seeded_repository},
};
use serde_json::{Value, json};
use tokio::runtime::Runtime;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn rt() -> Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("failed to create tokio runtime")
}

fn make_docs(count: usize) -> Vec<Value> {
    (0..count)
        .map(|idx| {
            json!({
                "_id": idx.to_string(),
                "name": format!("item-{idx:06}.v{}", idx % 7),
                "score": idx,
                "tags": ["alpha", if idx % 2 == 0 { "even" } else { "odd" }],
                "lines": [{ "sku": format!("sku-{}", idx % 13), "qty": idx % 5 }],
            })
        })
        .collect()
}

// ---------------------------------------------------------------------------
// 1. criterion_matching
// ---------------------------------------------------------------------------

fn criterion_matching(c: &mut Criterion) {
    let mut group = c.benchmark_group("criterion_matching");
    let docs = make_docs(1_000);
    group.throughput(Throughput::Elements(docs.len() as u64));

    let cases = [
        ("eq", Criteria::new().field("score").is(500)),
        ("range", Criteria::new().field("score").gte(100).lt(900)),
        ("exact_keyword", Criteria::new().field("name").keyword(SearchMode::Exact, ["item-000042.v0"])),
        ("safe_fuzzy", Criteria::new().field("name").keyword(SearchMode::ComplexDim, ["0042.V"])),
        (
            "elem_match",
            Criteria::new()
                .field("lines")
                .elem_match(Criteria::new().field("sku").is("sku-3").field("qty").gte(2)),
        ),
        (
            "or_of_tags",
            Criteria::new().or_operator([
                Criteria::new().field("tags").is("even"),
                Criteria::new().field("score").lt(10),
            ]),
        ),
    ];

    for (name, criteria) in cases {
        let criterion = criteria.build().expect("valid criteria");
        group.bench_with_input(BenchmarkId::from_parameter(name), &criterion, |b, criterion| {
            b.iter(|| docs.iter().filter(|doc| criterion.matches(doc)).count());
        });
    }

    group.finish();
}

// ---------------------------------------------------------------------------
// 2. roll_page
// ---------------------------------------------------------------------------

fn roll_page(c: &mut Criterion) {
    let mut group = c.benchmark_group("roll_page");
    group.measurement_time(Duration::from_secs(5));
    let rt = rt();

    for &size in &[100usize, 1_000, 10_000] {
        let (repo, _) = rt.block_on(seeded_repository("bench", size));
        let param = RollPageParam::builder()
            .keyword_type("name")
            .keyword_list(vec!["bench-0".to_owned()])
            .search_type("complexDim")
            .sort_key("score")
            .page_num(2)
            .page_size(20)
            .need_count(true)
            .build();

        group.bench_with_input(BenchmarkId::new("counted_fuzzy", size), &param, |b, param| {
            b.to_async(&rt).iter(|| async {
                repo.roll_page(param, None).await.expect("roll page failed");
            });
        });

        group.bench_function(BenchmarkId::new("count_by_score", size), |b| {
            b.to_async(&rt).iter(|| async {
                repo.count(Criteria::new().field(SampleDoc::SCORE).lt(50))
                    .await
                    .expect("count failed");
            });
        });
    }

    group.finish();
}

criterion_group!(benches, criterion_matching, roll_page);
criterion_main!(benches);
