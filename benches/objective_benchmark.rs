use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use interpfa::cayley::parameter_count;
use interpfa::indices::objective::{Objective, ObjectiveContext};
use interpfa::indices::prior::PriorMatrix;
use ndarray::{Array1, Array2};
use rand::distributions::Standard;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

fn random_loadings(variables: usize, factors: usize) -> Array2<f64> {
    let mut rng = StdRng::seed_from_u64(0x5EED_F64 + (variables * factors) as u64);
    Array2::from_shape_fn((variables, factors), |_| rng.sample::<f64, _>(Standard) - 0.5)
}

/// Consecutive blocks of `variables / factors` items.
fn block_prior(variables: usize, factors: usize) -> PriorMatrix {
    let width = variables / factors;
    let groups: Vec<Vec<usize>> = (0..factors)
        .map(|k| ((k * width + 1)..=((k + 1) * width)).collect())
        .collect();
    PriorMatrix::grouper(variables, &groups).expect("valid block grouping")
}

fn benchmark_objectives(c: &mut Criterion) {
    let shapes = [(20_usize, 3_usize), (60, 5), (120, 8)];
    let mut group = c.benchmark_group("objective_evaluation");
    for &(variables, factors) in &shapes {
        let loadings = random_loadings(variables, factors);
        let prior = block_prior(variables, factors);
        let scaling = Array1::ones(variables);
        let mut rng = StdRng::seed_from_u64(7);
        let params: Vec<f64> = (0..parameter_count(factors))
            .map(|_| rng.gen_range(-1.0..1.0))
            .collect();
        group.throughput(Throughput::Elements(prior.constrained_pair_count() as u64));

        for objective in [Objective::Agreement, Objective::CompositeV] {
            let ctx = ObjectiveContext::new(objective, &prior, scaling.view(), None)
                .expect("valid objective context");
            let id = BenchmarkId::new(objective.name(), format!("{variables}x{factors}"));
            group.bench_with_input(id, &params, |b, input| {
                b.iter(|| {
                    let score = ctx.score_parameters(loadings.view(), black_box(input));
                    black_box(score.ok());
                });
            });
        }
    }
    group.finish();
}

criterion_group!(objective_benchmark, benchmark_objectives);
criterion_main!(objective_benchmark);
