// ========================================================================================
//
//                    Ensemble assembly: the consistency "airlock"
//
// ========================================================================================
//
// An `Ensemble` is a proof token. Successfully constructing one guarantees that every
// member ballot has the same shape, that all members agree on the exact sample
// sequence, and that the weights have been normalized. Downstream stages (vote,
// diagnostics) therefore never re-check these invariants and cannot be handed an
// inconsistent collection.

use crate::types::{BinaryPrediction, EnsembleError, SampleIds, Shape};
use crate::weights::normalize_weights;
use ndarray::ArrayView2;

/// One model's contribution before assembly: its thresholded ballot, the sample
/// sequence its rows correspond to, and its raw (unnormalized) confidence weight.
#[derive(Debug, Clone)]
pub struct Ballot {
    pub name: String,
    pub sample_ids: SampleIds,
    pub prediction: BinaryPrediction,
    pub raw_weight: f64,
}

/// A validated member of an ensemble.
#[derive(Debug, Clone)]
pub struct EnsembleMember {
    name: String,
    prediction: BinaryPrediction,
    raw_weight: f64,
    weight: f64,
}

impl EnsembleMember {
    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline(always)]
    pub fn ballot(&self) -> ArrayView2<'_, u8> {
        self.prediction.view()
    }

    #[inline(always)]
    pub fn fallback_count(&self) -> usize {
        self.prediction.fallback_count()
    }

    #[inline(always)]
    pub fn raw_weight(&self) -> f64 {
        self.raw_weight
    }

    /// The normalized weight. All members' weights sum to 1.
    #[inline(always)]
    pub fn weight(&self) -> f64 {
        self.weight
    }
}

/// An ordered, shape- and order-consistent collection of weighted ballots.
#[derive(Debug, Clone)]
pub struct Ensemble {
    sample_ids: SampleIds,
    shape: Shape,
    members: Vec<EnsembleMember>,
}

impl Ensemble {
    /// Validates and assembles ballots into an ensemble.
    ///
    /// The first ballot is the reference: every other ballot must match its matrix
    /// shape (`ShapeMismatch`) and its sample sequence element by element
    /// (`OrderMismatch`). Sequences are compared, never re-sorted. Raw weights are then
    /// normalized (`InvalidWeight`, `DegenerateWeights`).
    pub fn assemble(ballots: Vec<Ballot>) -> Result<Self, EnsembleError> {
        let Some(reference) = ballots.first() else {
            return Err(EnsembleError::EmptyEnsemble);
        };
        let reference_name = reference.name.clone();
        let sample_ids = SampleIds::clone(&reference.sample_ids);
        let shape = reference.prediction.shape();

        // The reference itself must label every one of its rows.
        check_sample_count(&reference_name, &sample_ids, shape)?;

        for ballot in &ballots[1..] {
            let found = ballot.prediction.shape();
            if found != shape {
                return Err(EnsembleError::ShapeMismatch {
                    model: ballot.name.clone(),
                    expected: shape,
                    found,
                });
            }
            check_same_order(&reference_name, &sample_ids, &ballot.name, &ballot.sample_ids)?;
        }

        let names: Vec<&str> = ballots.iter().map(|b| b.name.as_str()).collect();
        let raw: Vec<f64> = ballots.iter().map(|b| b.raw_weight).collect();
        let normalized = normalize_weights(&names, &raw)?;

        let members = ballots
            .into_iter()
            .zip(normalized)
            .map(|(ballot, weight)| EnsembleMember {
                name: ballot.name,
                prediction: ballot.prediction,
                raw_weight: ballot.raw_weight,
                weight,
            })
            .collect();

        Ok(Self {
            sample_ids,
            shape,
            members,
        })
    }

    #[inline]
    pub fn sample_ids(&self) -> &SampleIds {
        &self.sample_ids
    }

    #[inline(always)]
    pub fn shape(&self) -> Shape {
        self.shape
    }

    #[inline]
    pub fn members(&self) -> &[EnsembleMember] {
        &self.members
    }

    #[inline(always)]
    pub fn num_models(&self) -> usize {
        self.members.len()
    }
}

fn check_sample_count(model: &str, ids: &SampleIds, shape: Shape) -> Result<(), EnsembleError> {
    if ids.len() != shape.rows {
        return Err(EnsembleError::ShapeMismatch {
            model: model.to_string(),
            expected: Shape {
                rows: ids.len(),
                cols: shape.cols,
            },
            found: shape,
        });
    }
    Ok(())
}

fn check_same_order(
    reference: &str,
    expected: &SampleIds,
    model: &str,
    found: &SampleIds,
) -> Result<(), EnsembleError> {
    // Same allocation means same sequence; skip the element-wise walk.
    if std::ptr::eq(expected.as_ptr(), found.as_ptr()) && expected.len() == found.len() {
        return Ok(());
    }
    let mismatch = expected
        .iter()
        .zip(found.iter())
        .position(|(e, f)| e != f)
        .or_else(|| (expected.len() != found.len()).then(|| expected.len().min(found.len())));

    match mismatch {
        None => Ok(()),
        Some(row) => Err(EnsembleError::OrderMismatch {
            model: model.to_string(),
            reference: reference.to_string(),
            row,
            expected: expected.get(row).cloned().unwrap_or_else(|| "<end of sequence>".into()),
            found: found.get(row).cloned().unwrap_or_else(|| "<end of sequence>".into()),
        }),
    }
}
