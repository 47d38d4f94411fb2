// Cost of one baseline fit (alpha grid, internal K-fold path, refit) on standardised
// marker matrices of the sizes seen per split, and of a single-alpha fit.

use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use genobase::lasso::{LassoCv, LassoCvConfig, fit_lasso};
use genobase::scaling::StandardScaler;
use ndarray::{Array1, Array2, Axis};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::Normal;

/// (genotypes, markers) pairs to benchmark.
const SHAPES: [(usize, usize); 3] = [(200, 500), (500, 2_000), (1_000, 5_000)];
/// Markers with a non-zero effect.
const CAUSAL_MARKERS: usize = 20;

/// Standardised 0/1/2 marker matrix and a standardised sparse-effect target.
fn simulate(n_genotypes: usize, n_markers: usize) -> (Array2<f64>, Array1<f64>) {
    let mut rng = StdRng::seed_from_u64(7);
    let normal = Normal::new(0.0, 0.5).expect("valid normal");
    let markers = Array2::from_shape_fn((n_genotypes, n_markers), |_| {
        f64::from(rng.gen_range(0u8..3))
    });
    let effects = Array1::from_shape_fn(n_markers, |j| {
        if j < CAUSAL_MARKERS { 0.5 } else { 0.0 }
    });
    let noise = Array1::from_shape_fn(n_genotypes, |_| rng.sample(normal));
    let target = markers.dot(&effects) + noise;

    let x = StandardScaler::fit(markers.view())
        .and_then(|scaler| scaler.transform(markers.view()))
        .expect("scaled markers");
    let y_column = target.view().insert_axis(Axis(1));
    let y = StandardScaler::fit(y_column)
        .and_then(|scaler| scaler.transform(y_column))
        .expect("scaled target")
        .column(0)
        .to_owned();
    (x, y)
}

fn bench_cross_validated_fit(c: &mut Criterion) {
    let mut group = c.benchmark_group("lasso_cv");
    group.sample_size(10);
    for (n_genotypes, n_markers) in SHAPES {
        let (x, y) = simulate(n_genotypes, n_markers);
        let lasso = LassoCv::new(LassoCvConfig::default());
        group.bench_with_input(
            BenchmarkId::from_parameter(format!("{n_genotypes}x{n_markers}")),
            &(x, y),
            |b, (x, y)| b.iter(|| black_box(lasso.cross_validate(x.view(), y.view()))),
        );
    }
    group.finish();
}

fn bench_single_alpha(c: &mut Criterion) {
    let mut group = c.benchmark_group("lasso_single_alpha");
    let config = LassoCvConfig::default();
    for (n_genotypes, n_markers) in SHAPES {
        let (x, y) = simulate(n_genotypes, n_markers);
        group.bench_with_input(
            BenchmarkId::from_parameter(format!("{n_genotypes}x{n_markers}")),
            &(x, y),
            |b, (x, y)| b.iter(|| black_box(fit_lasso(x.view(), y.view(), 0.05, &config))),
        );
    }
    group.finish();
}

criterion_group!(benches, bench_cross_validated_fit, bench_single_alpha);
criterion_main!(benches);
