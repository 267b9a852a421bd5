//! Mono audio buffers and index-keyed sets of them.

pub mod engrave;
pub mod sampler;

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use crate::error::{Error, Result};

/// A mono signal with its sample rate.
#[derive(Clone, Debug, PartialEq)]
pub struct AudioBuffer {
  samples: Vec<f32>,
  sample_rate: u32,
}

impl AudioBuffer {
  pub fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
    AudioBuffer { samples, sample_rate }
  }

  pub fn silence(len: usize, sample_rate: u32) -> Self {
    AudioBuffer::new(vec![0.0; len], sample_rate)
  }

  /// Reads any WAV hound understands; multichannel files are averaged to mono.
  pub fn load(path: &Path) -> Result<Self> {
    let (channels, sample_rate) = sampler::read_audio_file(path)?;
    Ok(AudioBuffer::new(sampler::downmix(&channels), sample_rate))
  }

  pub fn save(&self, path: &Path) -> Result<()> {
    engrave::samples(self.sample_rate, &self.samples, path)
  }

  pub fn samples(&self) -> &[f32] {
    &self.samples
  }

  pub fn sample_rate(&self) -> u32 {
    self.sample_rate
  }

  pub fn len(&self) -> usize {
    self.samples.len()
  }

  pub fn is_empty(&self) -> bool {
    self.samples.is_empty()
  }

  pub fn duration_secs(&self) -> f32 {
    self.samples.len() as f32 / self.sample_rate as f32
  }

  pub fn resampled(&self, sample_rate: u32) -> Result<AudioBuffer> {
    if sample_rate == self.sample_rate {
      return Ok(self.clone());
    }
    let samples = sampler::resample(&self.samples, self.sample_rate, sample_rate)?;
    Ok(AudioBuffer::new(samples, sample_rate))
  }

  /// Zero-pad or truncate to exactly `len` samples.
  pub fn fit_length(&mut self, len: usize) {
    self.samples.resize(len, 0.0);
  }

  /// Conform to a render configuration: resample, then pad or truncate.
  pub fn conform(&self, sample_rate: u32, len: usize) -> Result<AudioBuffer> {
    let mut conformed = self.resampled(sample_rate)?;
    conformed.fit_length(len);
    Ok(conformed)
  }

  /// `self` followed by `other`, for side by side listening.
  pub fn concat(&self, other: &AudioBuffer) -> Result<AudioBuffer> {
    if self.sample_rate != other.sample_rate {
      return Err(Error::Shape(format!(
        "cannot join audio at {} Hz with audio at {} Hz",
        self.sample_rate, other.sample_rate
      )));
    }
    let mut samples = Vec::with_capacity(self.len() + other.len());
    samples.extend_from_slice(&self.samples);
    samples.extend_from_slice(&other.samples);
    Ok(AudioBuffer::new(samples, self.sample_rate))
  }
}

/// Audio keyed by target index.
///
/// Targets and estimates are paired by key, never by position in a directory listing.
#[derive(Clone, Debug, Default)]
pub struct AudioSet {
  items: BTreeMap<usize, AudioBuffer>,
}

impl AudioSet {
  pub fn new() -> Self {
    Self::default()
  }

  /// Load every `*_<index>.wav` in `dir`.
  ///
  /// Files without a trailing index are skipped with a warning; two files resolving to the
  /// same index are a configuration error.
  pub fn load_folder(dir: &Path) -> Result<Self> {
    if !dir.is_dir() {
      return Err(Error::MissingArtifact {
        artifact: "audio folder",
        path: dir.to_path_buf(),
      });
    }
    let entries = fs::read_dir(dir).map_err(|e| Error::read(dir, e))?;

    let mut set = AudioSet::new();
    for entry in entries {
      let path = entry.map_err(|e| Error::read(dir, e))?.path();
      if path.extension().and_then(|e| e.to_str()) != Some("wav") {
        continue;
      }
      let index = match path.file_stem().and_then(|s| s.to_str()).and_then(index_of_stem) {
        Some(index) => index,
        None => {
          log::warn!("skipping {}: no trailing _<index> in file name", path.display());
          continue;
        }
      };
      if set.items.contains_key(&index) {
        return Err(Error::Configuration(format!(
          "{} holds more than one file for index {}",
          dir.display(),
          index
        )));
      }
      set.insert(index, AudioBuffer::load(&path)?);
    }
    log::debug!("loaded {} audio files from {}", set.len(), dir.display());
    Ok(set)
  }

  /// Remove every `*_<index>.wav` that [`AudioSet::load_folder`] would pick up, so a folder
  /// about to be rewritten holds nothing from an earlier run. A missing folder is empty.
  pub fn clear_folder(dir: &Path) -> Result<usize> {
    if !dir.is_dir() {
      return Ok(0);
    }
    let mut removed = 0;
    for entry in fs::read_dir(dir).map_err(|e| Error::read(dir, e))? {
      let path = entry.map_err(|e| Error::read(dir, e))?.path();
      let indexed = path.extension().and_then(|e| e.to_str()) == Some("wav")
        && path.file_stem().and_then(|s| s.to_str()).and_then(index_of_stem).is_some();
      if indexed {
        fs::remove_file(&path).map_err(|e| Error::write(&path, e))?;
        removed += 1;
      }
    }
    if removed > 0 {
      log::info!("removed {} audio files left in {}", removed, dir.display());
    }
    Ok(removed)
  }

  pub fn insert(&mut self, index: usize, audio: AudioBuffer) -> Option<AudioBuffer> {
    self.items.insert(index, audio)
  }

  pub fn get(&self, index: usize) -> Option<&AudioBuffer> {
    self.items.get(&index)
  }

  pub fn indices(&self) -> Vec<usize> {
    self.items.keys().copied().collect()
  }

  pub fn len(&self) -> usize {
    self.items.len()
  }

  pub fn is_empty(&self) -> bool {
    self.items.is_empty()
  }

  pub fn iter(&self) -> impl Iterator<Item = (usize, &AudioBuffer)> {
    self.items.iter().map(|(index, audio)| (*index, audio))
  }
}

impl FromIterator<(usize, AudioBuffer)> for AudioSet {
  fn from_iter<I: IntoIterator<Item = (usize, AudioBuffer)>>(iter: I) -> Self {
    AudioSet {
      items: iter.into_iter().collect(),
    }
  }
}

/// `mlp_prediction_12` -> 12
fn index_of_stem(stem: &str) -> Option<usize> {
  let (_, digits) = stem.rsplit_once('_')?;
  digits.parse().ok()
}
