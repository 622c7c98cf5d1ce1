//! The serializable diagnostic report written next to a run's decisions.

use crate::engine::EnsembleOutcome;
use serde::Serialize;

/// One `[[models]]` table of the report.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModelReport {
    pub name: String,
    pub threshold: f64,
    pub raw_weight: f64,
    pub normalized_weight: f64,
    pub fallback_count: usize,
    pub agreement_pct: f64,
    pub decisiveness_pct: f64,
}

/// Run-level summary. Scalars come first so that the TOML output keeps every plain key
/// above the `[[models]]` tables.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunReport {
    pub samples: usize,
    pub labels: usize,
    pub model_count: usize,
    pub conflict_rate: f64,
    pub total_fallbacks: usize,
    pub mean_labels_per_sample: f64,
    /// Row-major pairwise ballot disagreement, in model order.
    pub pairwise_disagreement: Vec<Vec<f64>>,
    pub models: Vec<ModelReport>,
}

impl RunReport {
    /// `thresholds` are the per-model thresholds in ensemble order.
    pub fn new(outcome: &EnsembleOutcome, thresholds: &[f64]) -> Self {
        let (samples, labels) = outcome.decision.dim();
        let diagnostics = &outcome.diagnostics;
        let positives: usize = outcome.decision.iter().map(|&d| usize::from(d)).sum();

        let models = diagnostics
            .models
            .iter()
            .zip(thresholds)
            .map(|(m, &threshold)| ModelReport {
                name: m.name.clone(),
                threshold,
                raw_weight: m.raw_weight,
                normalized_weight: m.weight,
                fallback_count: m.fallback_count,
                agreement_pct: 100.0 * m.agreement,
                decisiveness_pct: 100.0 * m.decisiveness,
            })
            .collect();

        Self {
            samples,
            labels,
            model_count: diagnostics.models.len(),
            conflict_rate: diagnostics.conflict_rate,
            total_fallbacks: diagnostics.total_fallbacks,
            mean_labels_per_sample: if samples == 0 {
                0.0
            } else {
                positives as f64 / samples as f64
            },
            pairwise_disagreement: diagnostics
                .pairwise_disagreement
                .rows()
                .into_iter()
                .map(|row| row.to_vec())
                .collect(),
            models,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::aggregate;
    use crate::types::{ModelInput, ProbabilityMatrix, SampleIds, Threshold};
    use ndarray::array;

    #[test]
    fn report_carries_percentages_and_serializes_to_toml() {
        let ids: SampleIds = vec!["a".to_string(), "b".to_string()].into();
        let inputs = vec![
            ModelInput {
                name: "vit".into(),
                sample_ids: ids.clone(),
                probabilities: ProbabilityMatrix::new("vit", array![[0.9, 0.2], [0.8, 0.7]])
                    .unwrap(),
                threshold: Threshold::new(0.5).unwrap(),
                raw_weight: 3.0,
            },
            ModelInput {
                name: "convnext".into(),
                sample_ids: ids,
                probabilities: ProbabilityMatrix::new("convnext", array![[0.9, 0.1], [0.1, 0.2]])
                    .unwrap(),
                threshold: Threshold::new(0.5).unwrap(),
                raw_weight: 1.0,
            },
        ];
        let outcome = aggregate(&inputs, 2).unwrap();
        let report = RunReport::new(&outcome, &[0.5, 0.5]);

        assert_eq!(report.samples, 2);
        assert_eq!(report.model_count, 2);
        // vit carries 3/4 of the weight and decides every cell on its own.
        assert_eq!(report.models[0].agreement_pct, 100.0);
        assert_eq!(report.models[1].decisiveness_pct, 0.0);
        // convnext's second row is rescued via its argmax (label 1).
        assert_eq!(report.models[1].fallback_count, 1);
        assert_eq!(report.mean_labels_per_sample, 1.5);

        let text = toml::to_string_pretty(&report).unwrap();
        assert!(text.contains("[[models]]"));
        assert!(text.contains("name = \"convnext\""));
        assert!(text.find("conflict_rate").unwrap() < text.find("[[models]]").unwrap());
    }
}
