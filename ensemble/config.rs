//! # Ensemble manifest
//!
//! A run is described by a small TOML file naming each model's probability file,
//! decision threshold and raw confidence weight:
//!
//! ```toml
//! labels = 498
//!
//! [[models]]
//! name = "vit_base"
//! probabilities = "probs/vit_base.csv"
//! threshold = 0.35
//! weight = 0.8123
//! ```
//!
//! Relative probability paths are resolved against the manifest's own directory, so a
//! manifest and its matrices can be moved together. Threshold and weight values are
//! validated by the core when the run starts, not here.

use crate::types::DEFAULT_LABEL_COUNT;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// One model entry of the manifest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ModelSpec {
    pub name: String,
    /// Path to the model's probability CSV.
    pub probabilities: PathBuf,
    pub threshold: f64,
    pub weight: f64,
}

/// The full description of one ensemble run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Manifest {
    /// The label cardinality every probability matrix must have.
    #[serde(default = "default_labels")]
    pub labels: usize,
    pub models: Vec<ModelSpec>,
}

fn default_labels() -> usize {
    DEFAULT_LABEL_COUNT
}

#[derive(Error, Debug)]
pub enum ManifestError {
    #[error("Failed to read manifest file '{path}': {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to parse TOML manifest: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("The manifest lists no models. At least one [[models]] entry is required.")]
    NoModels,
    #[error("The manifest sets labels = 0. Every model must predict at least one label.")]
    NoLabels,
    #[error("A model entry has an empty name. Every model needs a unique, non-empty name.")]
    EmptyName,
    #[error("Model name '{0}' appears more than once in the manifest.")]
    DuplicateName(String),
}

impl Manifest {
    /// Reads, parses and validates a manifest, resolving relative probability paths
    /// against the manifest's directory.
    pub fn load(path: &Path) -> Result<Self, ManifestError> {
        let text = fs::read_to_string(path).map_err(|source| ManifestError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut manifest = Self::parse(&text)?;

        let base = match path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        for model in &mut manifest.models {
            if model.probabilities.is_relative() {
                model.probabilities = base.join(&model.probabilities);
            }
        }
        Ok(manifest)
    }

    /// Parses and validates manifest text without touching the filesystem.
    pub fn parse(text: &str) -> Result<Self, ManifestError> {
        let manifest: Manifest = toml::from_str(text)?;
        manifest.validate()?;
        Ok(manifest)
    }

    fn validate(&self) -> Result<(), ManifestError> {
        if self.models.is_empty() {
            return Err(ManifestError::NoModels);
        }
        if self.labels == 0 {
            return Err(ManifestError::NoLabels);
        }
        let mut seen = HashSet::with_capacity(self.models.len());
        for model in &self.models {
            if model.name.trim().is_empty() {
                return Err(ManifestError::EmptyName);
            }
            if !seen.insert(model.name.as_str()) {
                return Err(ManifestError::DuplicateName(model.name.clone()));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::tempdir;

    const TWO_MODELS: &str = r#"
labels = 3

[[models]]
name = "vit"
probabilities = "vit.csv"
threshold = 0.35
weight = 0.81

[[models]]
name = "convnext"
probabilities = "/abs/convnext.csv"
threshold = 0.4
weight = 0.77
"#;

    #[test]
    fn parses_models_in_file_order() {
        let manifest = Manifest::parse(TWO_MODELS).unwrap();
        assert_eq!(manifest.labels, 3);
        let names: Vec<&str> = manifest.models.iter().map(|m| m.name.as_str()).collect();
        assert_eq!(names, ["vit", "convnext"]);
        assert_eq!(manifest.models[0].threshold, 0.35);
    }

    #[test]
    fn label_count_defaults_to_the_food_label_space() {
        let manifest = Manifest::parse(
            "[[models]]\nname = \"a\"\nprobabilities = \"a.csv\"\nthreshold = 0.5\nweight = 1.0\n",
        )
        .unwrap();
        assert_eq!(manifest.labels, DEFAULT_LABEL_COUNT);
    }

    #[test]
    fn relative_paths_resolve_against_the_manifest_directory() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("ensemble.toml");
        let mut file = fs::File::create(&path).unwrap();
        file.write_all(TWO_MODELS.as_bytes()).unwrap();

        let manifest = Manifest::load(&path).unwrap();
        assert_eq!(manifest.models[0].probabilities, dir.path().join("vit.csv"));
        assert_eq!(
            manifest.models[1].probabilities,
            PathBuf::from("/abs/convnext.csv")
        );
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let text = TWO_MODELS.replace("\"convnext\"", "\"vit\"");
        assert!(matches!(
            Manifest::parse(&text),
            Err(ManifestError::DuplicateName(ref n)) if n == "vit"
        ));
    }

    #[test]
    fn empty_model_list_and_unknown_keys_are_rejected() {
        assert!(matches!(
            Manifest::parse("labels = 4\nmodels = []\n"),
            Err(ManifestError::NoModels)
        ));
        let text = TWO_MODELS.replace("weight = 0.81", "weight = 0.81\nbias = 1.0");
        assert!(matches!(Manifest::parse(&text), Err(ManifestError::TomlParse(_))));
    }
}
