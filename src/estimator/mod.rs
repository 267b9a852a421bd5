//! Estimators map a target sound to a patch for the configured synth.

pub mod genetic;
pub mod nn;

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::audio::AudioBuffer;
use crate::dataset::SCALER_FILE;
use crate::error::Result;
use crate::features::{FeatureConfig, FeaturePipeline, FeatureScaler};

use nn::{Model, NeuralFamily};

pub trait Estimator: Send + Sync {
  fn name(&self) -> &str;

  /// Predict a patch for the target with key `index`. The audio is already conformed to
  /// the synth's sample rate and render length.
  fn predict(&self, index: usize, target: &AudioBuffer) -> Result<Vec<f32>>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EstimatorKind {
  Mlp,
  Lstm,
  HwyBlstm,
  Ga,
  Nsga,
}

impl EstimatorKind {
  pub const ALL: [EstimatorKind; 5] = [
    EstimatorKind::Mlp,
    EstimatorKind::Lstm,
    EstimatorKind::HwyBlstm,
    EstimatorKind::Ga,
    EstimatorKind::Nsga,
  ];

  pub fn name(self) -> &'static str {
    match self {
      EstimatorKind::Mlp => "mlp",
      EstimatorKind::Lstm => "lstm",
      EstimatorKind::HwyBlstm => "hwy_blstm",
      EstimatorKind::Ga => "ga",
      EstimatorKind::Nsga => "nsga",
    }
  }

  pub fn family(self) -> Option<NeuralFamily> {
    match self {
      EstimatorKind::Mlp => Some(NeuralFamily::Mlp),
      EstimatorKind::Lstm => Some(NeuralFamily::Lstm),
      EstimatorKind::HwyBlstm => Some(NeuralFamily::HwyBlstm),
      EstimatorKind::Ga | EstimatorKind::Nsga => None,
    }
  }
}

impl fmt::Display for EstimatorKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.name())
  }
}

impl FromStr for EstimatorKind {
  type Err = String;

  fn from_str(name: &str) -> std::result::Result<Self, Self::Err> {
    EstimatorKind::ALL.into_iter().find(|kind| kind.name() == name).ok_or_else(|| {
      let known: Vec<&str> = EstimatorKind::ALL.iter().map(|kind| kind.name()).collect();
      format!("unknown estimator '{}' (known: {})", name, known.join(", "))
    })
  }
}

impl From<NeuralFamily> for EstimatorKind {
  fn from(family: NeuralFamily) -> Self {
    match family {
      NeuralFamily::Mlp => EstimatorKind::Mlp,
      NeuralFamily::Lstm => EstimatorKind::Lstm,
      NeuralFamily::HwyBlstm => EstimatorKind::HwyBlstm,
    }
  }
}

/// A trained model behind the dataset's feature pipeline.
pub struct NeuralEstimator {
  model: Model,
  pipeline: FeaturePipeline,
}

impl NeuralEstimator {
  pub fn new(model: Model, pipeline: FeaturePipeline) -> Self {
    NeuralEstimator { model, pipeline }
  }

  /// Load `<models_dir>/<family>.json` and the dataset's scaler. The MLP sees flattened
  /// features; sequence models keep `[frames, coefficients]`.
  pub fn load(family: NeuralFamily, models_dir: &Path, dataset_dir: &Path, features: &FeatureConfig) -> Result<Self> {
    let scaler = FeatureScaler::load(&dataset_dir.join(SCALER_FILE))?;
    let model = Model::load(&models_dir.join(format!("{}.json", family.name())))?;
    let pipeline = FeaturePipeline::new(features.clone())
      .with_scaler(scaler)
      .flattened(!family.is_sequence());
    Ok(NeuralEstimator::new(model, pipeline))
  }
}

impl Estimator for NeuralEstimator {
  fn name(&self) -> &str {
    self.model.family.name()
  }

  fn predict(&self, _index: usize, target: &AudioBuffer) -> Result<Vec<f32>> {
    let features = self.pipeline.run(target)?;
    self.model.predict(&features)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::error::Error;
  use tempdir::TempDir;

  #[test]
  fn test_missing_scaler_reported_before_model() {
    let tmp = TempDir::new("estimator").unwrap();
    let result = NeuralEstimator::load(NeuralFamily::Mlp, tmp.path(), tmp.path(), &FeatureConfig::mfcc());
    assert!(matches!(result, Err(Error::MissingScaler(_))));
  }

  #[test]
  fn test_kind_names_round_trip_through_serde() {
    for kind in EstimatorKind::ALL {
      let text = serde_json::to_string(&kind).unwrap();
      assert_eq!(text, format!("\"{}\"", kind.name()));
      assert_eq!(kind.name().parse::<EstimatorKind>(), Ok(kind));
    }
    assert!("cnn".parse::<EstimatorKind>().is_err());
  }
}
