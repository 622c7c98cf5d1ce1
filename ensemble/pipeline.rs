// ========================================================================================
//
//                     The pipeline: manifest in, decisions out
//
// ========================================================================================
//
// This module drives a file-backed run. It loads every model's probability file in
// manifest order, checks that the ensemble fits in memory, hands the in-memory inputs to
// the pure engine, and writes the requested outputs. It never reorders models or samples.

use crate::assemble::Ensemble;
use crate::config::{Manifest, ManifestError};
use crate::engine::{EnsembleOutcome, aggregate, ballots};
use crate::io::{self, LoadError, OutputError};
use crate::memory::{ensure_available, estimate_ensemble_bytes};
use crate::report::RunReport;
use crate::types::{EnsembleError, ModelInput, Shape, Threshold};
use std::path::PathBuf;
use std::time::Instant;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error(transparent)]
    Manifest(#[from] ManifestError),
    #[error(transparent)]
    Load(#[from] LoadError),
    #[error(transparent)]
    Ensemble(#[from] EnsembleError),
    #[error(transparent)]
    Output(#[from] OutputError),
}

/// Model inputs read from disk, together with the header metadata needed to write
/// outputs in the same layout.
#[derive(Debug, Clone)]
pub struct LoadedEnsemble {
    pub id_column: String,
    pub label_names: Vec<String>,
    pub inputs: Vec<ModelInput>,
}

impl LoadedEnsemble {
    pub fn thresholds(&self) -> Vec<f64> {
        self.inputs.iter().map(|i| i.threshold.value()).collect()
    }
}

/// A completed run: the engine outcome plus what is needed to serialize it.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub id_column: String,
    pub label_names: Vec<String>,
    pub thresholds: Vec<f64>,
    pub outcome: EnsembleOutcome,
}

impl RunOutcome {
    pub fn report(&self) -> RunReport {
        RunReport::new(&self.outcome, &self.thresholds)
    }
}

/// Where a run's outputs go. Only `decisions` is mandatory.
#[derive(Debug, Clone)]
pub struct OutputPaths {
    pub decisions: PathBuf,
    pub report: Option<PathBuf>,
    pub votes: Option<PathBuf>,
}

/// The outcome of `check`: a validated ensemble that has not been voted on.
#[derive(Debug, Clone)]
pub struct CheckSummary {
    pub shape: Shape,
    /// `(name, normalized weight, fallback count)` in manifest order.
    pub models: Vec<(String, f64, usize)>,
}

/// Loads every model listed in the manifest, in manifest order.
///
/// The first model's header is the reference: every later model must carry the same
/// label columns in the same order. Sample order is checked later by the ensemble
/// assembly, never here, so that an order mismatch is always reported as such.
pub fn load_inputs(manifest: &Manifest) -> Result<LoadedEnsemble, PipelineError> {
    let mut inputs = Vec::with_capacity(manifest.models.len());
    let mut header: Option<(String, String, Vec<String>)> = None;

    for (k, spec) in manifest.models.iter().enumerate() {
        let threshold = Threshold::new(spec.threshold)?;
        let start = Instant::now();
        let loaded = io::read_probability_csv(&spec.name, &spec.probabilities)?;
        let shape = loaded.probabilities.shape();
        eprintln!(
            "> Loaded '{}' from {}: {} samples x {} labels in {:.2?}",
            spec.name,
            spec.probabilities.display(),
            shape.rows,
            shape.cols,
            start.elapsed()
        );

        match &header {
            None => {
                // Every later model must fit alongside the first one.
                let required = estimate_ensemble_bytes(manifest.models.len(), shape.rows, shape.cols);
                log::debug!("Estimated ensemble footprint: {required} bytes.");
                ensure_available(required)?;
                header = Some((
                    spec.name.clone(),
                    loaded.id_column.clone(),
                    loaded.label_names.clone(),
                ));
            }
            Some((reference, _, labels)) => {
                io::check_same_labels(reference, labels, &spec.name, &loaded.label_names)?;
            }
        }

        log::debug!("Model {k} '{}' has threshold {} and raw weight {}.", spec.name, spec.threshold, spec.weight);
        inputs.push(ModelInput {
            name: spec.name.clone(),
            sample_ids: loaded.sample_ids,
            probabilities: loaded.probabilities,
            threshold,
            raw_weight: spec.weight,
        });
    }

    let (_, id_column, label_names) = header.ok_or(EnsembleError::EmptyEnsemble)?;
    Ok(LoadedEnsemble {
        id_column,
        label_names,
        inputs,
    })
}

/// Loads and aggregates the ensemble described by `manifest`.
pub fn run(manifest: &Manifest) -> Result<RunOutcome, PipelineError> {
    let loaded = load_inputs(manifest)?;
    let thresholds = loaded.thresholds();
    let outcome = aggregate(&loaded.inputs, manifest.labels)?;
    Ok(RunOutcome {
        id_column: loaded.id_column,
        label_names: loaded.label_names,
        thresholds,
        outcome,
    })
}

/// Validates the ensemble described by `manifest` without voting or writing anything.
pub fn check(manifest: &Manifest) -> Result<CheckSummary, PipelineError> {
    let loaded = load_inputs(manifest)?;
    let ensemble = Ensemble::assemble(ballots(&loaded.inputs, manifest.labels)?)?;
    Ok(CheckSummary {
        shape: ensemble.shape(),
        models: ensemble
            .members()
            .iter()
            .map(|m| (m.name().to_string(), m.weight(), m.fallback_count()))
            .collect(),
    })
}

/// Refuses to start a run whose outputs already exist or share a file.
pub fn ensure_outputs_absent(paths: &OutputPaths) -> Result<(), PipelineError> {
    let mut requested = vec![paths.decisions.as_path()];
    requested.extend(paths.report.as_deref());
    requested.extend(paths.votes.as_deref());
    io::ensure_distinct(&requested)?;

    io::ensure_absent(&paths.decisions)?;
    if let Some(report) = &paths.report {
        io::ensure_absent(report)?;
    }
    if let Some(votes) = &paths.votes {
        io::ensure_absent(votes)?;
    }
    Ok(())
}

/// Writes the decision matrix and any optional outputs of a completed run.
pub fn write_outputs(run: &RunOutcome, paths: &OutputPaths) -> Result<(), PipelineError> {
    let outcome = &run.outcome;
    io::write_decisions(
        &paths.decisions,
        &run.id_column,
        &run.label_names,
        &outcome.sample_ids,
        &outcome.decision.view(),
    )?;
    eprintln!("> Wrote decisions to {}", paths.decisions.display());

    if let Some(votes) = &paths.votes {
        io::write_votes(
            votes,
            &run.id_column,
            &run.label_names,
            &outcome.sample_ids,
            &outcome.votes.view(),
        )?;
        eprintln!("> Wrote weighted votes to {}", votes.display());
    }

    if let Some(report) = &paths.report {
        io::write_toml(report, &run.report())?;
        eprintln!("> Wrote diagnostic report to {}", report.display());
    }
    Ok(())
}
