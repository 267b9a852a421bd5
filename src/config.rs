//! Experiment configuration.
//!
//! One JSON file describes a whole run. Every artifact path is spelled out; nothing falls
//! back to a default location.

use std::env;
use std::path::{Path, PathBuf};

use itertools::Itertools;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::estimator::genetic::nsga::default_objectives;
use crate::estimator::genetic::GaConfig;
use crate::estimator::nn::TrainingConfig;
use crate::estimator::EstimatorKind;
use crate::features::FeatureConfig;
use crate::files;
use crate::params::{OverrideGroup, OverrideTable};
use crate::presets;
use crate::synth::{EngineKind, Synth};
use crate::synth_config::SynthConfig;

pub const SEED_VAR: &str = "SOUNDMATCH_SEED";

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SynthSettings {
  #[serde(default = "default_engine")]
  pub engine: EngineKind,
  #[serde(flatten)]
  pub render: SynthConfig,
}

fn default_engine() -> EngineKind {
  EngineKind::SimpleFm
}

/// Where the override table comes from: a built-in preset or groups written inline.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OverrideSource {
  Preset { preset: String },
  Groups { groups: Vec<OverrideGroup> },
}

impl OverrideSource {
  pub fn table(&self) -> Result<OverrideTable> {
    match self {
      OverrideSource::Preset { preset } => presets::preset(preset),
      OverrideSource::Groups { groups } => OverrideTable::from_groups(groups),
    }
  }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Paths {
  /// State of the synth before any override is applied.
  pub init_state: PathBuf,
  /// State after overrides; every later step loads this.
  pub synth_state: PathBuf,
  pub dataset_dir: PathBuf,
  pub evaluation_dir: PathBuf,
  pub models_dir: PathBuf,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DatasetSettings {
  pub train_size: usize,
  pub test_size: usize,
  #[serde(default)]
  pub features: FeatureConfig,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EvaluationSetSettings {
  pub num_samples: usize,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GeneticSettings {
  #[serde(flatten)]
  pub ga: GaConfig,
  #[serde(default = "FeatureConfig::mfcc")]
  pub features: FeatureConfig,
}

impl Default for GeneticSettings {
  fn default() -> Self {
    GeneticSettings {
      ga: GaConfig::default(),
      features: FeatureConfig::mfcc(),
    }
  }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NsgaSettings {
  #[serde(flatten)]
  pub ga: GaConfig,
  #[serde(default = "default_objectives")]
  pub objectives: Vec<FeatureConfig>,
  #[serde(default = "default_divisions")]
  pub reference_divisions: usize,
}

fn default_divisions() -> usize {
  12
}

impl Default for NsgaSettings {
  fn default() -> Self {
    NsgaSettings {
      ga: GaConfig::default(),
      objectives: default_objectives(),
      reference_divisions: default_divisions(),
    }
  }
}

fn default_estimators() -> Vec<EstimatorKind> {
  EstimatorKind::ALL.to_vec()
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ExperimentConfig {
  pub synth: SynthSettings,
  pub overrides: OverrideSource,
  pub paths: Paths,
  #[serde(default)]
  pub seed: Option<u64>,
  pub dataset: DatasetSettings,
  pub evaluation_set: EvaluationSetSettings,
  #[serde(default)]
  pub training: TrainingConfig,
  #[serde(default)]
  pub genetic: GeneticSettings,
  #[serde(default)]
  pub nsga: NsgaSettings,
  #[serde(default = "default_estimators")]
  pub estimators: Vec<EstimatorKind>,
  #[serde(default)]
  pub concat_comparisons: bool,
  /// Worker threads for rendering and GA scoring. Sized from idle cores when absent.
  #[serde(default)]
  pub workers: Option<usize>,
}

impl ExperimentConfig {
  /// Read, apply environment overrides and validate.
  pub fn load(path: &Path) -> Result<Self> {
    let mut config: ExperimentConfig =
      files::read_required(path, |path| Error::MissingArtifact { artifact: "experiment config", path })
        .map_err(|e| match e {
          Error::Artifact { path, source } => {
            Error::Configuration(format!("{}: {}", path.display(), source))
          }
          other => other,
        })?;
    config.apply_env()?;
    config.validate()?;
    Ok(config)
  }

  /// `SOUNDMATCH_SEED` replaces the configured seed.
  pub fn apply_env(&mut self) -> Result<()> {
    if let Ok(value) = env::var(SEED_VAR) {
      let seed = value
        .trim()
        .parse::<u64>()
        .map_err(|_| Error::Configuration(format!("{}={} is not an unsigned integer", SEED_VAR, value)))?;
      log::info!("seed {} taken from {}", seed, SEED_VAR);
      self.seed = Some(seed);
    }
    Ok(())
  }

  pub fn validate(&self) -> Result<()> {
    self.synth.render.validate()?;
    self.dataset.features.validate()?;
    if self.dataset.train_size == 0 || self.dataset.test_size == 0 {
      return Err(Error::Configuration("dataset train_size and test_size must be positive".to_string()));
    }
    if self.evaluation_set.num_samples == 0 {
      return Err(Error::Configuration("evaluation_set.num_samples must be positive".to_string()));
    }
    self.training.validate()?;
    self.genetic.ga.validate()?;
    self.genetic.features.validate()?;
    self.nsga.ga.validate()?;
    if self.nsga.objectives.is_empty() {
      return Err(Error::Configuration("nsga needs at least one objective".to_string()));
    }
    for objective in &self.nsga.objectives {
      objective.validate()?;
    }
    if self.workers == Some(0) {
      return Err(Error::Configuration("workers must be positive when set".to_string()));
    }
    if let Some(kind) = self.estimators.iter().duplicates().next() {
      return Err(Error::Configuration(format!("estimator {} is listed more than once", kind)));
    }
    // the override source must resolve even if configure runs later
    self.overrides.table()?;
    Ok(())
  }

  pub fn build_synth(&self) -> Result<Synth> {
    Synth::new(self.synth.engine.build(), self.synth.render.clone())
  }

  pub fn estimator_dir(&self, estimator: EstimatorKind) -> PathBuf {
    self.paths.evaluation_dir.join(estimator.name())
  }

  pub fn target_dir(&self) -> PathBuf {
    self.paths.evaluation_dir.join("audio")
  }

  pub fn comparison_dir(&self) -> Option<PathBuf> {
    self.concat_comparisons.then(|| self.paths.evaluation_dir.join("comparison"))
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use tempdir::TempDir;

  const CONFIG: &str = r#"{
    "synth": {"note_length_secs": 1.0, "render_length_secs": 1.0},
    "overrides": {"preset": "simple_fm"},
    "paths": {
      "init_state": "synth_params/init.json",
      "synth_state": "synth_params/simple_fm.json",
      "dataset_dir": "data",
      "evaluation_dir": "evaluation",
      "models_dir": "models"
    },
    "seed": 7,
    "dataset": {"train_size": 100, "test_size": 20},
    "evaluation_set": {"num_samples": 5},
    "estimators": ["mlp", "ga"]
  }"#;

  #[test]
  fn test_parse_with_defaults() {
    let config: ExperimentConfig = serde_json::from_str(CONFIG).unwrap();
    config.validate().unwrap();
    assert_eq!(config.synth.engine, EngineKind::SimpleFm);
    assert_eq!(config.synth.render.sample_rate, 44100);
    assert_eq!(config.dataset.features, FeatureConfig::mfcc());
    assert_eq!(config.genetic.ga.pop_size, 300);
    assert_eq!(config.nsga.objectives.len(), 3);
    assert_eq!(config.estimators, vec![EstimatorKind::Mlp, EstimatorKind::Ga]);
    assert_eq!(config.estimator_dir(EstimatorKind::Mlp), PathBuf::from("evaluation/mlp"));
    assert!(config.comparison_dir().is_none());
    assert_eq!(config.workers, None);
  }

  #[test]
  fn test_worker_count() {
    let text = CONFIG.replace(r#""seed": 7,"#, r#""seed": 7, "workers": 2,"#);
    let config: ExperimentConfig = serde_json::from_str(&text).unwrap();
    config.validate().unwrap();
    assert_eq!(crate::parallel::worker_count(config.workers), 2);

    let zero = CONFIG.replace(r#""seed": 7,"#, r#""seed": 7, "workers": 0,"#);
    let config: ExperimentConfig = serde_json::from_str(&zero).unwrap();
    assert!(matches!(config.validate(), Err(Error::Configuration(_))));
  }

  #[test]
  fn test_paths_are_required() {
    let without = CONFIG.replace(r#""models_dir": "models""#, r#""unused": "x""#);
    assert!(serde_json::from_str::<ExperimentConfig>(&without).is_err());
  }

  #[test]
  fn test_inline_groups() {
    let text = CONFIG.replace(
      r#"{"preset": "simple_fm"}"#,
      r#"{"groups": [{"name": "tune", "values": [[3, 0.5]]}, {"name": "lfo off", "fill": {"from": 20, "to": 23, "value": 0.0}}]}"#,
    );
    let config: ExperimentConfig = serde_json::from_str(&text).unwrap();
    assert_eq!(config.overrides.table().unwrap().len(), 4);
  }

  #[test]
  fn test_bad_override_value_rejected() {
    let text = CONFIG.replace(r#"{"preset": "simple_fm"}"#, r#"{"groups": [{"name": "x", "values": [[0, 1.5]]}]}"#);
    let config: ExperimentConfig = serde_json::from_str(&text).unwrap();
    assert!(matches!(config.validate(), Err(Error::InvalidParameterValue { index: 0, .. })));
  }

  #[test]
  fn test_load_missing_and_malformed() {
    let tmp = TempDir::new("config").unwrap();
    let path = tmp.path().join("experiment.json");
    assert!(matches!(ExperimentConfig::load(&path), Err(Error::MissingArtifact { .. })));
    std::fs::write(&path, "{ not json").unwrap();
    assert!(matches!(ExperimentConfig::load(&path), Err(Error::Configuration(_))));
  }
}
