//! Labelled feature datasets drawn from random patches.

use std::path::{Path, PathBuf};

use rand::rngs::StdRng;
use rand::SeedableRng;
use rayon::prelude::*;

use crate::audio::AudioBuffer;
use crate::error::{Error, Result};
use crate::features::{FeatureConfig, FeatureExtractor, FeatureScaler};
use crate::synth::Synth;
use crate::tensor::Tensor;

pub const SCALER_FILE: &str = "data_scaler.json";

/// Features stacked along a leading sample axis, with the patches that produced them.
#[derive(Clone, Debug)]
pub struct DatasetSplit {
  pub features: Tensor,
  pub patches: Tensor,
}

impl DatasetSplit {
  pub fn len(&self) -> usize {
    self.patches.rows()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  pub fn load(dir: &Path, prefix: &str) -> Result<Self> {
    let features = Tensor::load(&dir.join(format!("{}features.json", prefix)), "feature array")?;
    let patches = Tensor::load(&dir.join(format!("{}patches.json", prefix)), "patch array")?;
    if features.rows() != patches.rows() {
      return Err(Error::Shape(format!(
        "{}: {} feature rows but {} patch rows",
        dir.display(),
        features.rows(),
        patches.rows()
      )));
    }
    Ok(DatasetSplit { features, patches })
  }
}

pub struct DatasetGenerator<'a> {
  synth: &'a Synth,
  features: FeatureConfig,
  output_dir: PathBuf,
  rng: StdRng,
  scaler: Option<FeatureScaler>,
  pub save_audio: bool,
}

impl<'a> DatasetGenerator<'a> {
  /// Without a seed the generator draws from entropy and the output cannot be reproduced.
  pub fn new(synth: &'a Synth, features: FeatureConfig, output_dir: &Path, seed: Option<u64>) -> Self {
    let rng = match seed {
      Some(seed) => StdRng::seed_from_u64(seed),
      None => {
        log::warn!("no seed configured, {} will not be reproducible", output_dir.display());
        StdRng::from_entropy()
      }
    };
    DatasetGenerator {
      synth,
      features,
      output_dir: output_dir.to_path_buf(),
      rng,
      scaler: None,
      save_audio: false,
    }
  }

  pub fn scaler(&self) -> Option<&FeatureScaler> {
    self.scaler.as_ref()
  }

  /// Render `size` random patches and write `<prefix>features.json` and
  /// `<prefix>patches.json`.
  ///
  /// With `scale` set, the first such call fits the scaler on its own features and every
  /// later call reuses it unchanged.
  pub fn generate(&mut self, size: usize, prefix: &str, scale: bool) -> Result<DatasetSplit> {
    if size == 0 {
      return Err(Error::Configuration(format!("{}: split size must be positive", prefix)));
    }
    self.features.validate()?;
    log::info!(
      "generating {} {} samples over {} free parameters",
      size,
      if prefix.is_empty() { "evaluation" } else { prefix.trim_end_matches('_') },
      self.synth.free_count()
    );

    let patches: Vec<Vec<f32>> = (0..size).map(|_| self.synth.random_patch(&mut self.rng)).collect();

    let synth = self.synth;
    let extractor = &self.features;
    let rendered: Vec<(AudioBuffer, Tensor)> = patches
      .par_iter()
      .map(|patch| {
        let audio = synth.render_candidate(patch)?;
        let features = extractor.extract(&audio)?;
        Ok((audio, features))
      })
      .collect::<Result<Vec<_>>>()?;

    if self.save_audio {
      let audio_dir = self.output_dir.join("audio");
      rendered.par_iter().enumerate().try_for_each(|(i, (audio, _))| {
        audio.save(&audio_dir.join(format!("{}audio_{}.wav", prefix, i)))
      })?;
    }

    let items: Vec<Tensor> = rendered.into_iter().map(|(_, features)| features).collect();
    let mut features = Tensor::stack(&items)?;
    if scale {
      if self.scaler.is_none() {
        log::info!("fitting feature scaler on {}{} samples", prefix, features.rows());
        self.scaler = Some(FeatureScaler::fit(&features, self.features.coefficients_first())?);
      }
      if let Some(scaler) = &self.scaler {
        scaler.transform(&mut features)?;
      }
    }
    let patches = Tensor::from_rows(&patches)?;

    features.save(&self.output_dir.join(format!("{}features.json", prefix)))?;
    patches.save(&self.output_dir.join(format!("{}patches.json", prefix)))?;
    log::info!(
      "wrote {}features {:?} and {}patches {:?} to {}",
      prefix,
      features.shape,
      prefix,
      patches.shape,
      self.output_dir.display()
    );
    Ok(DatasetSplit { features, patches })
  }

  pub fn save_scaler(&self, file_name: &str) -> Result<PathBuf> {
    let scaler = self.scaler.as_ref().ok_or_else(|| {
      Error::Configuration("no scaler has been fitted; generate a scaled split first".to_string())
    })?;
    let path = self.output_dir.join(file_name);
    scaler.save(&path)?;
    Ok(path)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::presets;
  use crate::synth::EngineKind;
  use crate::synth_config::SynthConfig;
  use tempdir::TempDir;

  fn synth() -> Synth {
    let mut synth = Synth::new(EngineKind::SimpleFm.build(), SynthConfig::new(8000, 0.1, 0.125)).unwrap();
    synth.set_overridden_parameters(&presets::preset("simple_fm").unwrap()).unwrap();
    synth
  }

  fn features() -> FeatureConfig {
    FeatureConfig::Mfcc {
      num_mfccs: 8,
      frame_size: 256,
      hop_size: 128,
      time_major: true,
    }
  }

  #[test]
  fn test_same_seed_same_patches() {
    let synth = synth();
    let a_dir = TempDir::new("dataset_a").unwrap();
    let b_dir = TempDir::new("dataset_b").unwrap();
    let a = DatasetGenerator::new(&synth, features(), a_dir.path(), Some(9)).generate(4, "train_", false).unwrap();
    let b = DatasetGenerator::new(&synth, features(), b_dir.path(), Some(9)).generate(4, "train_", false).unwrap();
    assert_eq!(a.patches, b.patches);
    assert_eq!(a.features, b.features);
  }

  #[test]
  fn test_scaler_fitted_once() {
    let synth = synth();
    let tmp = TempDir::new("dataset").unwrap();
    let mut generator = DatasetGenerator::new(&synth, features(), tmp.path(), Some(1));
    generator.generate(6, "train_", true).unwrap();
    let fitted = generator.scaler().cloned().unwrap();
    generator.generate(3, "test_", true).unwrap();
    assert_eq!(generator.scaler(), Some(&fitted));

    generator.save_scaler(SCALER_FILE).unwrap();
    assert_eq!(FeatureScaler::load(&tmp.path().join(SCALER_FILE)).unwrap(), fitted);
    let split = DatasetSplit::load(tmp.path(), "test_").unwrap();
    assert_eq!(split.len(), 3);
  }

  #[test]
  fn test_scaler_follows_coefficients_in_either_layout() {
    let synth = synth();
    let tmp = TempDir::new("dataset").unwrap();
    let config = FeatureConfig::Mfcc {
      num_mfccs: 8,
      frame_size: 256,
      hop_size: 128,
      time_major: false,
    };
    let mut generator = DatasetGenerator::new(&synth, config, tmp.path(), Some(1));
    let split = generator.generate(6, "train_", true).unwrap();
    let scaler = generator.scaler().cloned().unwrap();
    assert_eq!(split.features.shape[1], 8);
    assert_eq!(scaler.width(), 8);
    assert!(scaler.coefficients_first);

    // every coefficient row ends up centred across items and frames
    let frames = split.features.shape[2];
    for c in 0..8 {
      let values: Vec<f32> = (0..split.len())
        .flat_map(|n| split.features.row(n)[c * frames..(c + 1) * frames].to_vec())
        .collect();
      let mean = values.iter().sum::<f32>() / values.len() as f32;
      assert!(mean.abs() < 1e-3, "coefficient {} mean {}", c, mean);
    }
  }

  #[test]
  fn test_saved_audio_is_indexed() {
    let synth = synth();
    let tmp = TempDir::new("dataset").unwrap();
    let mut generator = DatasetGenerator::new(&synth, features(), tmp.path(), Some(2));
    generator.save_audio = true;
    generator.generate(3, "", false).unwrap();
    for i in 0..3 {
      assert!(tmp.path().join(format!("audio/audio_{}.wav", i)).is_file());
    }
  }

  #[test]
  fn test_save_scaler_before_fit() {
    let synth = synth();
    let tmp = TempDir::new("dataset").unwrap();
    let generator = DatasetGenerator::new(&synth, features(), tmp.path(), Some(2));
    assert!(matches!(generator.save_scaler(SCALER_FILE), Err(Error::Configuration(_))));
  }
}
