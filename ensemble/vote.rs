// ========================================================================================
//
//                          The weighted majority vote
//
// ========================================================================================
//
// Because normalized weights sum to 1, "the models voting yes carry more than half of
// the confidence mass" is the same statement as "the weighted vote exceeds 0.5".
// A vote of exactly 0.5 is a tie, and ties resolve to "label absent".

use crate::assemble::Ensemble;
use crate::memory::try_zeroed;
use crate::types::EnsembleError;
use ndarray::{Array2, ArrayView2, Axis, Zip};
use rayon::prelude::*;

/// The decision boundary of the weighted vote.
pub const MAJORITY: f64 = 0.5;

/// Rounding budget, in units of `f64::EPSILON`, granted to each term of a weighted sum.
const ULPS_PER_TERM: f64 = 4.0;

/// The width of the tie band above 0.5 for an ensemble of `num_models`.
///
/// A vote is a sum of at most `num_models` products in `[0, 1]`, and a counterfactual
/// vote takes one more subtraction. Both can land a few ulps either side of 0.5 where
/// exact arithmetic lands on it. The band covers that rounding and nothing more, so any
/// real majority above 0.5 is still selected.
#[inline]
pub fn tie_tolerance(num_models: usize) -> f64 {
    ULPS_PER_TERM * (num_models as f64 + 1.0) * f64::EPSILON
}

/// The decision rule for a single cell. Ties resolve to absent.
#[inline(always)]
pub fn is_selected(vote: f64, tolerance: f64) -> bool {
    vote > MAJORITY + tolerance
}

/// Computes `V[i,j] = sum_k w_k * B_k[i,j]`.
///
/// Rows are summed in parallel. Within each cell the members are always added in
/// ensemble order, so the result is bit-identical for any thread count.
pub fn weighted_vote(ensemble: &Ensemble) -> Result<Array2<f64>, EnsembleError> {
    let shape = ensemble.shape();
    let mut votes = try_zeroed::<f64>(shape.rows, shape.cols)?;

    votes
        .axis_iter_mut(Axis(0))
        .into_par_iter()
        .enumerate()
        .for_each(|(i, mut row)| {
            for member in ensemble.members() {
                let weight = member.weight();
                let ballot = member.ballot();
                for (v, &b) in row.iter_mut().zip(ballot.row(i)) {
                    *v += weight * f64::from(b);
                }
            }
        });

    Ok(votes)
}

/// Thresholds the vote matrix of a `num_models` ensemble into the final decision matrix.
pub fn decide(votes: &ArrayView2<'_, f64>, num_models: usize) -> Array2<u8> {
    let tolerance = tie_tolerance(num_models);
    Zip::from(votes).par_map_collect(|&v| u8::from(is_selected(v, tolerance)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::binarize;
    use crate::assemble::Ballot;
    use crate::types::{ProbabilityMatrix, SampleIds, Threshold};
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    /// Builds an ensemble whose ballots equal the given binary matrices exactly.
    /// Probabilities of 0.9/0.1 against a 0.5 threshold reproduce any ballot that
    /// already has a positive in every row.
    fn ensemble_of(ballots: &[Array2<u8>], raw_weights: &[f64]) -> Ensemble {
        let rows = ballots[0].nrows();
        let ids: SampleIds = (0..rows).map(|i| format!("img_{i}.jpg")).collect();
        let list = ballots
            .iter()
            .zip(raw_weights)
            .enumerate()
            .map(|(k, (b, &w))| {
                let name = format!("model{}", k + 1);
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

    #[test]
    fn three_model_example_yields_the_expected_decision() {
        let ensemble = ensemble_of(
            &[
                array![[1, 0], [1, 1]],
                array![[1, 0], [0, 1]],
                array![[0, 1], [1, 0]],
            ],
            &[0.5, 0.3, 0.2],
        );
        let votes = weighted_vote(&ensemble).unwrap();
        assert_abs_diff_eq!(votes[[0, 0]], 0.8, epsilon = 1e-12);
        assert_abs_diff_eq!(votes[[0, 1]], 0.2, epsilon = 1e-12);
        assert_abs_diff_eq!(votes[[1, 0]], 0.7, epsilon = 1e-12);
        assert_abs_diff_eq!(votes[[1, 1]], 0.8, epsilon = 1e-12);

        let decision = decide(&votes.view(), ensemble.num_models());
        assert_eq!(decision, array![[1u8, 0], [1, 1]]);
    }

    #[test]
    fn an_exact_half_vote_resolves_to_absent() {
        let ensemble = ensemble_of(&[array![[1, 0]], array![[0, 1]]], &[1.0, 1.0]);
        let votes = weighted_vote(&ensemble).unwrap();
        assert_eq!(votes, array![[0.5, 0.5]]);
        assert_eq!(decide(&votes.view(), 2), array![[0u8, 0]]);
    }

    #[test]
    fn a_single_model_decides_alone() {
        let ballot = array![[1u8, 0, 1], [0, 1, 0]];
        let ensemble = ensemble_of(&[ballot.clone()], &[0.3]);
        let votes = weighted_vote(&ensemble).unwrap();
        assert_eq!(decide(&votes.view(), 1), ballot);
    }

    #[test]
    fn selection_boundary_is_strict() {
        let tolerance = tie_tolerance(3);
        assert!(!is_selected(0.5, tolerance));
        // 0.1 + 0.2 + 0.2 rounds one ulp above one half.
        assert!(!is_selected(0.1 + 0.2 + 0.2, tolerance));
        assert!(is_selected(0.5000000001, tolerance));
        assert!(!is_selected(0.0, tolerance));
        assert!(is_selected(1.0, tolerance));
    }

    #[test]
    fn a_narrow_real_majority_is_selected() {
        // Model one alone carries 0.5000000004 of the mass on label 0.
        let ensemble = ensemble_of(
            &[array![[1u8, 0]], array![[0u8, 1]]],
            &[0.5000000004, 0.4999999996],
        );
        let votes = weighted_vote(&ensemble).unwrap();
        assert_eq!(decide(&votes.view(), 2), array![[1u8, 0]]);
    }

    #[test]
    fn tie_band_is_a_few_ulps_wide() {
        assert!(tie_tolerance(1) < 1e-14);
        assert!(tie_tolerance(50) < 1e-12);
        assert!(tie_tolerance(10) > tie_tolerance(2));
    }
}
