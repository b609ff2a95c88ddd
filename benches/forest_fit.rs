use clinpredict::learn::ForestSettings;
use clinpredict::learn::forest::{Criterion as SplitCriterion, RandomForest};
use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use ndarray::{Array1, Array2};
use rand::distributions::Standard;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

fn random_problem(rows: usize, features: usize) -> (Array2<f64>, Array1<f64>) {
    let mut rng = StdRng::seed_from_u64(0x5EED + rows as u64);
    let x: Array2<f64> = Array2::from_shape_fn((rows, features), |_| rng.sample(Standard));
    let y = x.map_axis(ndarray::Axis(1), |row| if row[0] + row[1] > 1.0 { 1.0 } else { 0.0 });
    (x, y)
}

fn benchmark_forest_fit(c: &mut Criterion) {
    let settings = ForestSettings {
        trees: 50,
        mtry: None,
        cores: num_cpus::get(),
        seed: Some(42),
        verbose: false,
    };

    let mut group = c.benchmark_group("forest_fit");
    group.sample_size(10);
    for rows in [500_usize, 2_000] {
        let (x, y) = random_problem(rows, 12);
        group.throughput(Throughput::Elements(rows as u64));
        group.bench_with_input(BenchmarkId::new("gini", rows), &(x, y), |b, (x, y)| {
            b.iter(|| {
                let forest =
                    RandomForest::fit(black_box(x.view()), y.view(), SplitCriterion::Gini, &settings)
                        .unwrap();
                black_box(forest);
            });
        });
    }
    group.finish();
}

criterion_group!(benches, benchmark_forest_fit);
criterion_main!(benches);
