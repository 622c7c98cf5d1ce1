//! Normalization of raw model confidence weights.
//!
//! Raw weights come from an independent quality signal (e.g. a held-out score) and may
//! be on any scale. Dividing by their sum makes "more than half of the weighted mass"
//! equivalent to "weighted vote above 0.5", which is the decision rule in [`crate::vote`].

use crate::types::EnsembleError;

/// Divides each raw weight by the total.
///
/// A zero raw weight is valid: the model stays in the ensemble structurally but its
/// ballot contributes nothing to the vote. `names` is used only to label errors and
/// must have the same length as `raw`.
pub fn normalize_weights(names: &[&str], raw: &[f64]) -> Result<Vec<f64>, EnsembleError> {
    if raw.is_empty() {
        return Err(EnsembleError::EmptyEnsemble);
    }
    for (i, &w) in raw.iter().enumerate() {
        if !w.is_finite() || w < 0.0 {
            return Err(EnsembleError::InvalidWeight {
                model: names.get(i).map_or_else(|| format!("#{i}"), |n| n.to_string()),
                weight: w,
            });
        }
    }

    let total: f64 = raw.iter().sum();
    if total <= 0.0 {
        return Err(EnsembleError::DegenerateWeights(total));
    }
    Ok(raw.iter().map(|w| w / total).collect())
}
