use criterion::{criterion_group, criterion_main, Criterion};
use rgf::data::synthetic::sparse_regression;
use rgf::forest::{fit, ForestParamsBuilder};

fn bench_forest_grower(c: &mut Criterion) {
    let (x, y) = sparse_regression(2000, 20, 0.5, 0.5, 42).unwrap();
    let params = ForestParamsBuilder::new()
        .max_leaves(100)
        .optimize_interval(50)
        .build()
        .unwrap();

    let mut group = c.benchmark_group("ForestGrower");
    group.sample_size(10);
    group.bench_function("Fit100Leaves", |b| {
        b.iter(|| fit(&x, y.clone(), params.clone()).unwrap())
    });
    group.finish();
}

criterion_group!(benches, bench_forest_grower);
criterion_main!(benches);
