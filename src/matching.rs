use std::path::{Path, PathBuf};

use rayon::prelude::*;

use crate::audio::{AudioBuffer, AudioSet};
use crate::error::Result;
use crate::estimator::Estimator;
use crate::synth::Synth;

/// Runs one estimator against keyed targets and renders what it predicts.
pub struct SoundMatch<'a> {
  synth: &'a Synth,
  estimator: &'a dyn Estimator,
}

pub struct MatchOutput {
  pub estimates: AudioSet,
  pub patches: Vec<(usize, Vec<f32>)>,
}

impl<'a> SoundMatch<'a> {
  pub fn new(synth: &'a Synth, estimator: &'a dyn Estimator) -> Self {
    SoundMatch { synth, estimator }
  }

  /// Bring a target to the synth's sample rate and render length.
  pub fn conform(&self, target: &AudioBuffer) -> Result<AudioBuffer> {
    let config = self.synth.config();
    target.conform(config.sample_rate, config.render_samples())
  }

  /// Predict a patch for one target and render it.
  pub fn match_target(&self, index: usize, target: &AudioBuffer) -> Result<(Vec<f32>, AudioBuffer)> {
    let conformed = self.conform(target)?;
    let patch = self.estimator.predict(index, &conformed)?;
    let audio = self.synth.render_candidate(&patch)?;
    Ok((patch, audio))
  }

  /// Match every target and write `<name>_prediction_<i>.wav` into `output_dir`. With a
  /// `comparison_dir`, also write the conformed target followed by the estimate as
  /// `<name>_comparison_<i>.wav`.
  pub fn match_all(&self, targets: &AudioSet, output_dir: &Path, comparison_dir: Option<&Path>) -> Result<MatchOutput> {
    let name = self.estimator.name();
    log::info!("matching {} targets with {}", targets.len(), name);

    let entries: Vec<(usize, &AudioBuffer)> = targets.iter().collect();
    let results: Vec<(usize, Vec<f32>, AudioBuffer)> = entries
      .par_iter()
      .map(|&(index, target)| {
        let (patch, audio) = self.match_target(index, target)?;
        audio.save(&prediction_path(output_dir, name, index))?;
        if let Some(dir) = comparison_dir {
          let joined = self.conform(target)?.concat(&audio)?;
          joined.save(&dir.join(format!("{}_comparison_{}.wav", name, index)))?;
        }
        log::debug!("{} matched target {}", name, index);
        Ok((index, patch, audio))
      })
      .collect::<Result<Vec<_>>>()?;

    let mut estimates = AudioSet::new();
    let mut patches = Vec::with_capacity(results.len());
    for (index, patch, audio) in results {
      estimates.insert(index, audio);
      patches.push((index, patch));
    }
    log::info!("{}: wrote {} estimates to {}", name, estimates.len(), output_dir.display());
    Ok(MatchOutput { estimates, patches })
  }
}

pub fn prediction_path(dir: &Path, estimator: &str, index: usize) -> PathBuf {
  dir.join(format!("{}_prediction_{}.wav", estimator, index))
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::synth::EngineKind;
  use crate::synth_config::SynthConfig;
  use tempdir::TempDir;

  /// Always predicts the same patch.
  struct Fixed(Vec<f32>);

  impl Estimator for Fixed {
    fn name(&self) -> &str {
      "fixed"
    }

    fn predict(&self, _index: usize, target: &AudioBuffer) -> Result<Vec<f32>> {
      assert_eq!(target.sample_rate(), 8000);
      assert_eq!(target.len(), 1000);
      Ok(self.0.clone())
    }
  }

  #[test]
  fn test_targets_are_conformed_and_outputs_keyed() {
    let synth = Synth::new(EngineKind::SimpleFm.build(), SynthConfig::new(8000, 0.1, 0.125)).unwrap();
    let estimator = Fixed(synth.patch());
    let tmp = TempDir::new("matching").unwrap();

    let targets: AudioSet = [(4, AudioBuffer::silence(1600, 16000)), (9, AudioBuffer::silence(300, 8000))]
      .into_iter()
      .collect();
    let comparison = tmp.path().join("comparison");
    let output = SoundMatch::new(&synth, &estimator)
      .match_all(&targets, &tmp.path().join("fixed"), Some(&comparison))
      .unwrap();

    assert_eq!(output.estimates.indices(), vec![4, 9]);
    assert!(tmp.path().join("fixed/fixed_prediction_9.wav").is_file());
    let joined = AudioBuffer::load(&comparison.join("fixed_comparison_4.wav")).unwrap();
    assert_eq!(joined.len(), 2000);
  }
}
