// ========================================================================================
//
//                    Diagnostics: disagreement and influence
//
// ========================================================================================
//
// Read-only reporting over an assembled ensemble and its final decision. Nothing in this
// module feeds back into the vote.
//
// - Conflict rate: share of cells whose raw (unweighted) ballots are not unanimous.
// - Pairwise disagreement: share of cells where two models' ballots differ.
// - Agreement: share of cells where a model's ballot equals the final decision.
// - Decisiveness: share of cells whose decision flips when the model is removed and
//   the remaining models keep their original normalized weights.
//
// Decisiveness measures influence on the decision, not correctness. A model that flips
// decisions toward wrong labels scores the same as one that flips them toward right
// labels; ground truth is never consulted.

use crate::assemble::{Ensemble, EnsembleMember};
use crate::vote::{is_selected, tie_tolerance};
use itertools::Itertools;
use ndarray::{Array2, ArrayView2, Axis, Zip};
use rayon::prelude::*;

/// Per-model diagnostic row.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelDiagnostics {
    pub name: String,
    pub raw_weight: f64,
    pub weight: f64,
    pub fallback_count: usize,
    /// Fraction of cells in `[0, 1]` where this model's ballot equals the final decision.
    pub agreement: f64,
    /// Fraction of cells in `[0, 1]` whose decision flips without this model.
    pub decisiveness: f64,
}

/// All diagnostic outputs of one run.
#[derive(Debug, Clone, PartialEq)]
pub struct Diagnostics {
    pub conflict_rate: f64,
    /// Symmetric `N x N` matrix of ballot disagreement fractions, zero on the diagonal.
    pub pairwise_disagreement: Array2<f64>,
    pub total_fallbacks: usize,
    pub models: Vec<ModelDiagnostics>,
}

/// Computes every diagnostic for an ensemble, given its weighted votes and the final
/// decision derived from them.
pub fn diagnose(
    ensemble: &Ensemble,
    votes: &ArrayView2<'_, f64>,
    decision: &ArrayView2<'_, u8>,
) -> Diagnostics {
    let members = ensemble.members();
    let tolerance = tie_tolerance(members.len());

    let models: Vec<ModelDiagnostics> = members
        .par_iter()
        .map(|member| ModelDiagnostics {
            name: member.name().to_string(),
            raw_weight: member.raw_weight(),
            weight: member.weight(),
            fallback_count: member.fallback_count(),
            agreement: agreement(&member.ballot(), decision),
            decisiveness: decisiveness(member, tolerance, votes, decision),
        })
        .collect();

    let total_fallbacks = members.iter().map(EnsembleMember::fallback_count).sum();

    Diagnostics {
        conflict_rate: conflict_rate(ensemble),
        pairwise_disagreement: pairwise_disagreement(ensemble),
        total_fallbacks,
        models,
    }
}

/// The share of cells whose unweighted yes-count is neither 0 nor N.
pub fn conflict_rate(ensemble: &Ensemble) -> f64 {
    let shape = ensemble.shape();
    let members = ensemble.members();
    let num_models = members.len();

    let contested: usize = (0..shape.rows)
        .into_par_iter()
        .map(|i| {
            (0..shape.cols)
                .filter(|&j| {
                    let yes = members
                        .iter()
                        .filter(|m| m.ballot()[[i, j]] == 1)
                        .count();
                    yes != 0 && yes != num_models
                })
                .count()
        })
        .sum();

    fraction(contested, shape.rows * shape.cols)
}

/// The `N x N` matrix of per-pair ballot disagreement.
pub fn pairwise_disagreement(ensemble: &Ensemble) -> Array2<f64> {
    let members = ensemble.members();
    let n = members.len();
    let shape = ensemble.shape();
    let cells = shape.rows * shape.cols;

    let pairs: Vec<(usize, usize)> = (0..n).tuple_combinations().collect();
    let rates: Vec<f64> = pairs
        .par_iter()
        .map(|&(a, b)| {
            let differing = Zip::from(&members[a].ballot())
                .and(&members[b].ballot())
                .fold(0usize, |acc, &x, &y| acc + usize::from(x != y));
            fraction(differing, cells)
        })
        .collect();

    let mut matrix = Array2::<f64>::zeros((n, n));
    for (&(a, b), rate) in pairs.iter().zip(rates) {
        matrix[[a, b]] = rate;
        matrix[[b, a]] = rate;
    }
    matrix
}

/// The share of cells where `ballot` equals `decision`.
pub fn agreement(ballot: &ArrayView2<'_, u8>, decision: &ArrayView2<'_, u8>) -> f64 {
    let agreeing = Zip::from(ballot)
        .and(decision)
        .fold(0usize, |acc, &b, &d| acc + usize::from(b == d));
    fraction(agreeing, decision.len())
}

/// Leave-one-out influence of one member.
///
/// The counterfactual vote without member `k` is `V - w_k * B_k`: the other members
/// keep their original normalized weights, so the comparison is against the original
/// weighted sum rather than a resized ensemble. Each cell is derived by one subtraction
/// from the full vote instead of re-summing the other N-1 ballots. `tolerance` is the
/// tie band of the full ensemble, as given by [`tie_tolerance`].
pub fn decisiveness(
    member: &EnsembleMember,
    tolerance: f64,
    votes: &ArrayView2<'_, f64>,
    decision: &ArrayView2<'_, u8>,
) -> f64 {
    let weight = member.weight();
    let ballot = member.ballot();

    let flips: usize = votes
        .axis_iter(Axis(0))
        .into_par_iter()
        .zip(ballot.axis_iter(Axis(0)))
        .zip(decision.axis_iter(Axis(0)))
        .map(|((v_row, b_row), d_row)| {
            Zip::from(&v_row)
                .and(&b_row)
                .and(&d_row)
                .fold(0usize, |acc, &v, &b, &d| {
                    let without = v - weight * f64::from(b);
                    acc + usize::from(u8::from(is_selected(without, tolerance)) != d)
                })
        })
        .sum();

    fraction(flips, decision.len())
}

#[inline]
fn fraction(count: usize, total: usize) -> f64 {
    if total == 0 { 0.0 } else { count as f64 / total as f64 }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::binarize;
    use crate::assemble::Ballot;
    use crate::types::{ProbabilityMatrix, SampleIds, Threshold};
    use crate::vote::{decide, weighted_vote};
    use approx::assert_abs_diff_eq;
    use ndarray::array;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn ensemble_of(ballots: &[Array2<u8>], raw_weights: &[f64]) -> Ensemble {
        let ids: SampleIds = (0..ballots[0].nrows()).map(|i| format!("s{i}")).collect();
        let list = ballots
            .iter()
            .zip(raw_weights)
            .enumerate()
            .map(|(k, (b, &w))| {
                let name = format!("m{k}");
                let p = ProbabilityMatrix::new(&name, b.mapv(|x| if x == 1 { 0.9 } else { 0.1 }))
                    .unwrap();
                Ballot {
                    prediction: binarize(&name, &p, Threshold::new(0.5).unwrap(), b.ncols())
                        .unwrap(),
                    name,
                    sample_ids: ids.clone(),
                    raw_weight: w,
                }
            })
            .collect();
        Ensemble::assemble(list).unwrap()
    }

    fn run(ensemble: &Ensemble) -> Diagnostics {
        let votes = weighted_vote(ensemble).unwrap();
        let decision = decide(&votes.view(), ensemble.num_models());
        diagnose(ensemble, &votes.view(), &decision.view())
    }

    /// Decisiveness by re-summing the other N-1 ballots from scratch.
    fn brute_force_decisiveness(ensemble: &Ensemble, k: usize) -> f64 {
        let votes = weighted_vote(ensemble).unwrap();
        let decision = decide(&votes.view(), ensemble.num_models());
        let shape = ensemble.shape();
        let tolerance = tie_tolerance(ensemble.num_models());
        let mut flips = 0;
        for i in 0..shape.rows {
            for j in 0..shape.cols {
                let without: f64 = ensemble
                    .members()
                    .iter()
                    .enumerate()
                    .filter(|(idx, _)| *idx != k)
                    .map(|(_, m)| m.weight() * f64::from(m.ballot()[[i, j]]))
                    .sum();
                if u8::from(is_selected(without, tolerance)) != decision[[i, j]] {
                    flips += 1;
                }
            }
        }
        flips as f64 / (shape.rows * shape.cols) as f64
    }

    #[test]
    fn identical_ballots_have_no_conflict() {
        let b = array![[1u8, 0, 1], [0, 1, 1]];
        let d = run(&ensemble_of(&[b.clone(), b.clone(), b], &[0.2, 0.5, 0.3]));
        assert_eq!(d.conflict_rate, 0.0);
        assert!(d.pairwise_disagreement.iter().all(|&x| x == 0.0));
        for m in &d.models {
            assert_eq!(m.agreement, 1.0);
        }
    }

    #[test]
    fn complementary_ballots_are_fully_contested() {
        let d = run(&ensemble_of(
            &[array![[1u8, 0], [0, 1]], array![[0u8, 1], [1, 0]]],
            &[0.6, 0.4],
        ));
        assert_eq!(d.conflict_rate, 1.0);
        assert_eq!(d.pairwise_disagreement, array![[0.0, 1.0], [1.0, 0.0]]);
    }

    #[test]
    fn zero_weight_model_is_never_decisive() {
        let d = run(&ensemble_of(
            &[
                array![[1u8, 0], [1, 1]],
                array![[1u8, 0], [0, 1]],
                array![[0u8, 1], [1, 0]],
            ],
            &[0.5, 0.5, 0.0],
        ));
        assert_eq!(d.models[2].weight, 0.0);
        assert_eq!(d.models[2].decisiveness, 0.0);
    }

    #[test]
    fn three_model_example_statistics() {
        let d = run(&ensemble_of(
            &[
                array![[1u8, 0], [1, 1]],
                array![[1u8, 0], [0, 1]],
                array![[0u8, 1], [1, 0]],
            ],
            &[0.5, 0.3, 0.2],
        ));
        // Final decision is [[1,0],[1,1]]; every cell has a dissenting ballot.
        assert_eq!(d.conflict_rate, 1.0);
        assert_abs_diff_eq!(d.models[0].agreement, 1.0);
        assert_abs_diff_eq!(d.models[1].agreement, 0.75);
        assert_abs_diff_eq!(d.models[2].agreement, 0.25);

        // Without model1: votes [[0.3,0.2],[0.2,0.3]] flip cells (0,0),(1,0),(1,1).
        assert_abs_diff_eq!(d.models[0].decisiveness, 0.75);
        // Without model2: votes [[0.5,0.2],[0.7,0.5]] flip (0,0) and (1,1) at the tie.
        assert_abs_diff_eq!(d.models[1].decisiveness, 0.5);
        // Without model3: votes [[0.8,0.0],[0.5,0.8]] flip (1,0) at the tie.
        assert_abs_diff_eq!(d.models[2].decisiveness, 0.25);
        assert_eq!(d.total_fallbacks, 0);
    }

    #[test]
    fn subtraction_matches_brute_force_recomputation() {
        let mut rng = StdRng::seed_from_u64(0x5eed);
        for _ in 0..8 {
            let n = rng.gen_range(2..6);
            let rows = rng.gen_range(1..20);
            let cols = rng.gen_range(2..12);
            let ballots: Vec<Array2<u8>> = (0..n)
                .map(|_| {
                    let mut b = Array2::from_shape_fn((rows, cols), |_| u8::from(rng.gen_bool(0.4)));
                    // Keep every row non-empty so the ballot survives binarization unchanged.
                    for mut row in b.rows_mut() {
                        if row.iter().all(|&x| x == 0) {
                            row[0] = 1;
                        }
                    }
                    b
                })
                .collect();
            let weights: Vec<f64> = (0..n).map(|_| rng.gen_range(0.05..1.0)).collect();
            let ensemble = ensemble_of(&ballots, &weights);
            let d = run(&ensemble);
            for k in 0..n {
                assert_abs_diff_eq!(
                    d.models[k].decisiveness,
                    brute_force_decisiveness(&ensemble, k),
                    epsilon = 1e-12
                );
            }
        }
    }

    #[test]
    fn fallback_counts_are_summed_across_models() {
        let ids: SampleIds = vec!["a".to_string(), "b".to_string()].into();
        let weak = ProbabilityMatrix::new("weak", array![[0.2, 0.1], [0.3, 0.4]]).unwrap();
        let strong = ProbabilityMatrix::new("strong", array![[0.9, 0.1], [0.3, 0.4]]).unwrap();
        let t = Threshold::new(0.5).unwrap();
        let ensemble = Ensemble::assemble(vec![
            Ballot {
                name: "weak".into(),
                sample_ids: ids.clone(),
                prediction: binarize("weak", &weak, t, 2).unwrap(),
                raw_weight: 1.0,
            },
            Ballot {
                name: "strong".into(),
                sample_ids: ids,
                prediction: binarize("strong", &strong, t, 2).unwrap(),
                raw_weight: 1.0,
            },
        ])
        .unwrap();
        let d = run(&ensemble);
        assert_eq!(d.models[0].fallback_count, 2);
        assert_eq!(d.models[1].fallback_count, 1);
        assert_eq!(d.total_fallbacks, 3);
    }
}
