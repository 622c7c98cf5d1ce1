// ========================================================================================
//
//                     The engine: a single pure aggregation pass
//
// ========================================================================================
//
// `aggregate` composes the adapter and the aggregator over in-memory inputs. It owns no
// state between calls and performs no I/O, so identical inputs always produce
// bit-identical decisions and diagnostics.

use crate::adapter::binarize;
use crate::assemble::{Ballot, Ensemble};
use crate::diagnostics::{Diagnostics, diagnose};
use crate::types::{EnsembleError, ModelInput, SampleIds};
use crate::vote::{decide, weighted_vote};
use ndarray::Array2;
use std::time::Instant;

/// The full result of one ensemble run.
#[derive(Debug, Clone, PartialEq)]
pub struct EnsembleOutcome {
    /// The sample sequence shared by every input, labelling the rows below.
    pub sample_ids: SampleIds,
    /// The weighted vote matrix `V`.
    pub votes: Array2<f64>,
    /// The final decision matrix `D`.
    pub decision: Array2<u8>,
    pub diagnostics: Diagnostics,
}

/// Binarizes, assembles, votes and diagnoses in one pass.
///
/// Every precondition failure (shape, order, threshold, weights) aborts the whole run.
/// A partially aggregated ensemble is never returned.
pub fn aggregate(
    inputs: &[ModelInput],
    expected_labels: usize,
) -> Result<EnsembleOutcome, EnsembleError> {
    let start = Instant::now();

    let ensemble = Ensemble::assemble(ballots(inputs, expected_labels)?)?;
    let shape = ensemble.shape();
    log::info!(
        "Assembled {} models over {} samples and {} labels.",
        ensemble.num_models(),
        shape.rows,
        shape.cols
    );

    let votes = weighted_vote(&ensemble)?;
    let decision = decide(&votes.view(), ensemble.num_models());
    let diagnostics = diagnose(&ensemble, &votes.view(), &decision.view());

    log::info!(
        "Aggregation finished in {:.2?}: conflict rate {:.4}, {} fallback rows in total.",
        start.elapsed(),
        diagnostics.conflict_rate,
        diagnostics.total_fallbacks
    );

    Ok(EnsembleOutcome {
        sample_ids: SampleIds::clone(ensemble.sample_ids()),
        votes,
        decision,
        diagnostics,
    })
}

/// Binarizes every input with its own threshold, in input order.
pub(crate) fn ballots(
    inputs: &[ModelInput],
    expected_labels: usize,
) -> Result<Vec<Ballot>, EnsembleError> {
    inputs
        .iter()
        .map(|input| {
            let prediction = binarize(
                &input.name,
                &input.probabilities,
                input.threshold,
                expected_labels,
            )?;
            Ok(Ballot {
                name: input.name.clone(),
                sample_ids: SampleIds::clone(&input.sample_ids),
                prediction,
                raw_weight: input.raw_weight,
            })
        })
        .collect()
}
