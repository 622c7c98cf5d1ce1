// ========================================================================================
//
//                      The predictor adapter: one model, one ballot
//
// ========================================================================================
//
// This module turns one model's raw probability output into a well-formed ballot.
// Every label whose probability strictly exceeds the model's own threshold is voted
// for. A row that would otherwise be empty is "rescued" by voting for its single most
// probable label, so that no model ever abstains on a sample. An abstaining model would
// silently lose its voting weight on that sample without being distinguishable from a
// model that never voted.

use crate::types::{BinaryPrediction, EnsembleError, ProbabilityMatrix, Shape, Threshold};
use ndarray::{Array2, ArrayView1};
use rayon::prelude::*;

/// A model whose fallback rule fires on more than this share of its rows is reported
/// as a data-quality warning. The count never influences the vote.
const FALLBACK_WARNING_SHARE: f64 = 0.10;

/// Applies the model's threshold and the no-empty-row fallback to its probabilities.
///
/// `B[i,j] = 1` iff `P[i,j] > t`. Afterwards, every row with no positive entry gets
/// exactly one positive at the column of its maximum probability. When several
/// columns share the maximum, the lowest column index wins.
///
/// Fails with `ShapeMismatch` when the matrix does not have `expected_labels` columns.
/// Threshold validity is carried by the `Threshold` type itself.
pub fn binarize(
    model: &str,
    probabilities: &ProbabilityMatrix,
    threshold: Threshold,
    expected_labels: usize,
) -> Result<BinaryPrediction, EnsembleError> {
    let found = probabilities.shape();
    if found.cols != expected_labels {
        return Err(EnsembleError::ShapeMismatch {
            model: model.to_string(),
            expected: Shape {
                rows: found.rows,
                cols: expected_labels,
            },
            found,
        });
    }

    let view = probabilities.view();
    let t = threshold.value();

    // Each row is an independent unit of work. The indexed collect keeps row order.
    let rows: Vec<(Vec<u8>, bool)> = (0..found.rows)
        .into_par_iter()
        .map(|i| binarize_row(view.row(i), t))
        .collect();

    let fallback_count = rows.iter().filter(|(_, rescued)| *rescued).count();
    let mut flat = Vec::with_capacity(found.rows * found.cols);
    for (row, _) in rows {
        flat.extend_from_slice(&row);
    }
    let matrix = Array2::from_shape_vec((found.rows, found.cols), flat).map_err(|_| {
        EnsembleError::ShapeMismatch {
            model: model.to_string(),
            expected: found,
            found,
        }
    })?;

    log::debug!(
        "Model '{model}': threshold {t}, fallback fired on {fallback_count}/{} rows.",
        found.rows
    );
    if found.rows > 0 && fallback_count as f64 / found.rows as f64 > FALLBACK_WARNING_SHARE {
        log::warn!(
            "Model '{model}' needed the fallback label on {fallback_count} of {} samples ({:.1}%). Its threshold of {t} may be too strict.",
            found.rows,
            100.0 * fallback_count as f64 / found.rows as f64
        );
    }

    Ok(BinaryPrediction::new(matrix, fallback_count))
}

/// Thresholds one row. Returns the ballot row and whether the fallback fired.
fn binarize_row(row: ArrayView1<'_, f64>, t: f64) -> (Vec<u8>, bool) {
    let mut ballot: Vec<u8> = row.iter().map(|&p| u8::from(p > t)).collect();
    if ballot.iter().any(|&b| b == 1) {
        return (ballot, false);
    }
    match first_argmax(row) {
        Some(j) => {
            ballot[j] = 1;
            (ballot, true)
        }
        // A zero-width row cannot be rescued and has nothing to vote on.
        None => (ballot, false),
    }
}

/// The index of the first occurrence of the row maximum.
fn first_argmax(row: ArrayView1<'_, f64>) -> Option<usize> {
    let mut best: Option<(usize, f64)> = None;
    for (j, &p) in row.iter().enumerate() {
        match best {
            Some((_, max)) if p <= max => {}
            _ => best = Some((j, p)),
        }
    }
    best.map(|(j, _)| j)
}
