//! Audio feature extraction.
//!
//! Every extractor turns one [`AudioBuffer`] into a [`Tensor`] whose shape depends only on the
//! extractor settings and the buffer length, so a batch of equally long renders stacks cleanly.

pub mod mfcc;
pub mod scaler;
pub mod spectrum;
pub mod summary;

use serde::{Deserialize, Serialize};

use crate::audio::AudioBuffer;
use crate::error::{Error, Result};
use crate::tensor::Tensor;

pub use scaler::FeatureScaler;
pub use spectrum::SpectrumOutput;

pub trait FeatureExtractor: Send + Sync {
  fn name(&self) -> &'static str;
  fn extract(&self, audio: &AudioBuffer) -> Result<Tensor>;
}

/// Feature space settings as written in an experiment config, tagged by `kind`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FeatureConfig {
  Mfcc {
    #[serde(default = "default_num_mfccs")]
    num_mfccs: usize,
    #[serde(default = "default_frame_size")]
    frame_size: usize,
    #[serde(default = "default_hop_size")]
    hop_size: usize,
    /// `[frames, coefficients]` when true, `[coefficients, frames]` otherwise.
    #[serde(default = "default_time_major")]
    time_major: bool,
  },
  Stft {
    #[serde(default = "default_frame_size")]
    fft_size: usize,
    #[serde(default = "default_hop_size")]
    hop_size: usize,
    #[serde(default = "default_output")]
    output: SpectrumOutput,
    #[serde(default = "default_time_major")]
    time_major: bool,
  },
  Fft {
    #[serde(default = "default_output")]
    output: SpectrumOutput,
  },
  SpectralSummarized {
    #[serde(default = "default_frame_size")]
    frame_size: usize,
    #[serde(default = "default_hop_size")]
    hop_size: usize,
  },
}

fn default_num_mfccs() -> usize {
  13
}

fn default_frame_size() -> usize {
  2048
}

fn default_hop_size() -> usize {
  1024
}

fn default_time_major() -> bool {
  true
}

fn default_output() -> SpectrumOutput {
  SpectrumOutput::Magnitude
}

impl Default for FeatureConfig {
  fn default() -> Self {
    FeatureConfig::mfcc()
  }
}

impl FeatureConfig {
  pub fn mfcc() -> Self {
    FeatureConfig::Mfcc {
      num_mfccs: default_num_mfccs(),
      frame_size: default_frame_size(),
      hop_size: default_hop_size(),
      time_major: default_time_major(),
    }
  }

  pub fn spectral_summarized() -> Self {
    FeatureConfig::SpectralSummarized {
      frame_size: default_frame_size(),
      hop_size: default_hop_size(),
    }
  }

  pub fn fft() -> Self {
    FeatureConfig::Fft {
      output: default_output(),
    }
  }

  /// True when extracted items are laid out `[coefficients, frames]`.
  pub fn coefficients_first(&self) -> bool {
    match *self {
      FeatureConfig::Mfcc { time_major, .. } | FeatureConfig::Stft { time_major, .. } => !time_major,
      FeatureConfig::Fft { .. } | FeatureConfig::SpectralSummarized { .. } => false,
    }
  }

  pub fn validate(&self) -> Result<()> {
    let (frame, hop) = match *self {
      FeatureConfig::Mfcc {
        num_mfccs,
        frame_size,
        hop_size,
        ..
      } => {
        if num_mfccs == 0 || num_mfccs > mfcc::MEL_BANDS {
          return Err(Error::Configuration(format!(
            "num_mfccs must be in 1..={}, got {}",
            mfcc::MEL_BANDS,
            num_mfccs
          )));
        }
        (frame_size, hop_size)
      }
      FeatureConfig::Stft { fft_size, hop_size, .. } => (fft_size, hop_size),
      FeatureConfig::SpectralSummarized { frame_size, hop_size } => (frame_size, hop_size),
      FeatureConfig::Fft { .. } => return Ok(()),
    };
    if frame < 2 || hop == 0 {
      return Err(Error::Configuration(format!(
        "{}: frame size {} and hop size {} must be positive",
        self.name(),
        frame,
        hop
      )));
    }
    Ok(())
  }
}

/// `[a][b]` to `[b][a]`, row-major.
fn transpose(rows: &[Vec<f32>]) -> Vec<f32> {
  let width = rows.first().map(|r| r.len()).unwrap_or(0);
  (0..width).flat_map(|j| rows.iter().map(move |row| row[j])).collect()
}

fn frames_to_tensor(rows: Vec<Vec<f32>>, time_major: bool) -> Result<Tensor> {
  let frames = rows.len();
  let width = rows.first().map(|r| r.len()).unwrap_or(0);
  if time_major {
    Tensor::new(vec![frames, width], rows.concat())
  } else {
    Tensor::new(vec![width, frames], transpose(&rows))
  }
}

impl FeatureExtractor for FeatureConfig {
  fn name(&self) -> &'static str {
    match self {
      FeatureConfig::Mfcc { .. } => "mfcc",
      FeatureConfig::Stft { .. } => "stft",
      FeatureConfig::Fft { .. } => "fft",
      FeatureConfig::SpectralSummarized { .. } => "spectral_summarized",
    }
  }

  fn extract(&self, audio: &AudioBuffer) -> Result<Tensor> {
    if audio.is_empty() {
      return Err(Error::Shape(format!("{}: cannot extract features from empty audio", self.name())));
    }
    let samples = audio.samples();
    match *self {
      FeatureConfig::Mfcc {
        num_mfccs,
        frame_size,
        hop_size,
        time_major,
      } => {
        let rows = mfcc::Mfcc::new(num_mfccs, frame_size, hop_size, audio.sample_rate()).compute(samples);
        frames_to_tensor(rows, time_major)
      }
      FeatureConfig::Stft {
        fft_size,
        hop_size,
        output,
        time_major,
      } => frames_to_tensor(spectrum::Stft::new(fft_size, hop_size).frames(samples, output), time_major),
      FeatureConfig::Fft { output } => Ok(Tensor::vector(spectrum::spectrum(samples, output))),
      FeatureConfig::SpectralSummarized { frame_size, hop_size } => Ok(Tensor::vector(
        summary::SpectralSummary::new(frame_size, hop_size, audio.sample_rate()).compute(samples),
      )),
    }
  }
}

/// Extraction as an estimator sees it: features, then the dataset's scaler, then optional
/// flattening for models that take a vector.
#[derive(Clone, Debug)]
pub struct FeaturePipeline {
  pub extractor: FeatureConfig,
  pub scaler: Option<FeatureScaler>,
  pub flatten: bool,
}

impl FeaturePipeline {
  pub fn new(extractor: FeatureConfig) -> Self {
    FeaturePipeline {
      extractor,
      scaler: None,
      flatten: false,
    }
  }

  pub fn with_scaler(mut self, scaler: FeatureScaler) -> Self {
    self.scaler = Some(scaler);
    self
  }

  pub fn flattened(mut self, flatten: bool) -> Self {
    self.flatten = flatten;
    self
  }

  pub fn run(&self, audio: &AudioBuffer) -> Result<Tensor> {
    let mut features = self.extractor.extract(audio)?;
    if let Some(scaler) = &self.scaler {
      scaler.transform(&mut features)?;
    }
    Ok(if self.flatten { features.flattened() } else { features })
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn tone() -> AudioBuffer {
    let samples = (0..4096).map(|i| (i as f32 * 0.1).sin() * 0.5).collect();
    AudioBuffer::new(samples, 22050)
  }

  #[test]
  fn test_shapes() {
    let audio = tone();
    assert_eq!(FeatureConfig::mfcc().extract(&audio).unwrap().shape, vec![5, 13]);
    assert_eq!(FeatureConfig::fft().extract(&audio).unwrap().shape, vec![2049]);
    assert_eq!(FeatureConfig::spectral_summarized().extract(&audio).unwrap().shape, vec![12]);

    let stft = FeatureConfig::Stft {
      fft_size: 512,
      hop_size: 256,
      output: SpectrumOutput::Power,
      time_major: false,
    };
    assert_eq!(stft.extract(&audio).unwrap().shape, vec![257, 17]);
  }

  #[test]
  fn test_config_tagging() {
    let config: FeatureConfig = serde_json::from_str(r#"{"kind": "mfcc", "num_mfccs": 20}"#).unwrap();
    assert_eq!(
      config,
      FeatureConfig::Mfcc {
        num_mfccs: 20,
        frame_size: 2048,
        hop_size: 1024,
        time_major: true
      }
    );
  }

  #[test]
  fn test_pipeline_flattens_after_scaling() {
    let audio = tone();
    let raw = FeatureConfig::mfcc().extract(&audio).unwrap();
    let scaler = FeatureScaler::fit(&raw, false).unwrap();
    let pipeline = FeaturePipeline::new(FeatureConfig::mfcc()).with_scaler(scaler).flattened(true);
    let out = pipeline.run(&audio).unwrap();
    assert_eq!(out.shape, vec![5 * 13]);
  }

  #[test]
  fn test_empty_audio() {
    let silence = AudioBuffer::new(Vec::new(), 22050);
    assert!(matches!(FeatureConfig::fft().extract(&silence), Err(Error::Shape(_))));
  }

  #[test]
  fn test_rejects_zero_hop() {
    let config = FeatureConfig::SpectralSummarized {
      frame_size: 1024,
      hop_size: 0,
    };
    assert!(config.validate().is_err());
  }
}
