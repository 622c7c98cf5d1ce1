// ========================================================================================
//
//                 Ensemble aggregation performance benchmark
//
// ========================================================================================
//
// Measures the full aggregation pass (binarize, vote, decide, diagnose) and the weighted
// vote alone over a test-set sized ensemble, across a growing number of models.
//
// ========================================================================================

use concord::adapter::binarize;
use concord::assemble::{Ballot, Ensemble};
use concord::engine::aggregate;
use concord::types::{ModelInput, ProbabilityMatrix, SampleIds, Threshold};
use concord::vote::weighted_vote;
use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use ndarray::Array2;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// The number of test images to simulate.
const NUM_SAMPLES: usize = 2_000;
/// The label cardinality of the food recognition task.
const NUM_LABELS: usize = 498;
/// Ensemble sizes to benchmark.
const MODEL_COUNTS: [usize; 3] = [2, 5, 10];

fn setup_inputs(num_models: usize) -> Vec<ModelInput> {
    let mut rng = StdRng::seed_from_u64(42);
    let ids: SampleIds = (0..NUM_SAMPLES)
        .map(|i| format!("test_{i:05}.jpg"))
        .collect::<Vec<_>>()
        .into();

    (0..num_models)
        .map(|k| {
            let name = format!("model_{k}");
            // Skewed towards zero, like sigmoid outputs over a large label space.
            let p = Array2::from_shape_fn((NUM_SAMPLES, NUM_LABELS), |_| {
                rng.r#gen::<f64>().powi(6)
            });
            ModelInput {
                probabilities: ProbabilityMatrix::new(&name, p).unwrap(),
                name,
                sample_ids: ids.clone(),
                threshold: Threshold::new(rng.gen_range(0.2..0.6)).unwrap(),
                raw_weight: rng.gen_range(0.6..0.9),
            }
        })
        .collect()
}

fn bench_aggregation(c: &mut Criterion) {
    let mut group = c.benchmark_group("Ensemble Aggregation");
    group.sample_size(10);
    group.throughput(Throughput::Elements((NUM_SAMPLES * NUM_LABELS) as u64));

    for &num_models in &MODEL_COUNTS {
        let inputs = setup_inputs(num_models);

        group.bench_with_input(
            BenchmarkId::new("aggregate", num_models),
            &inputs,
            |b, inputs| b.iter(|| aggregate(black_box(inputs), NUM_LABELS).unwrap()),
        );

        let ballots: Vec<Ballot> = inputs
            .iter()
            .map(|input| Ballot {
                name: input.name.clone(),
                sample_ids: input.sample_ids.clone(),
                prediction: binarize(&input.name, &input.probabilities, input.threshold, NUM_LABELS)
                    .unwrap(),
                raw_weight: input.raw_weight,
            })
            .collect();
        let ensemble = Ensemble::assemble(ballots).unwrap();

        group.bench_with_input(
            BenchmarkId::new("weighted_vote", num_models),
            &ensemble,
            |b, ensemble| b.iter(|| weighted_vote(black_box(ensemble)).unwrap()),
        );
    }
    group.finish();
}

criterion_group!(benches, bench_aggregation);
criterion_main!(benches);
