//! Frame-level spectral descriptors reduced to their mean and variance over time.

use super::spectrum::{bin_frequencies, SpectrumOutput, Stft};

const ROLLOFF: f32 = 0.85;
const EPS: f32 = 1e-10;

pub const DESCRIPTORS: [&str; 6] = ["centroid", "bandwidth", "flatness", "rolloff", "rms", "zcr"];

/// Output holds `DESCRIPTORS.len() * 2` values: mean then variance per descriptor.
pub struct SpectralSummary {
  frame_size: usize,
  hop_size: usize,
  stft: Stft,
  freqs: Vec<f32>,
}

impl SpectralSummary {
  pub fn new(frame_size: usize, hop_size: usize, sample_rate: u32) -> Self {
    SpectralSummary {
      frame_size,
      hop_size,
      stft: Stft::new(frame_size, hop_size),
      freqs: bin_frequencies(frame_size, sample_rate),
    }
  }

  pub fn compute(&self, samples: &[f32]) -> Vec<f32> {
    let spectra = self.stft.frames(samples, SpectrumOutput::Magnitude);
    let mut tracks: Vec<Vec<f32>> = vec![Vec::with_capacity(spectra.len()); DESCRIPTORS.len()];

    for (t, mag) in spectra.iter().enumerate() {
      let total: f32 = mag.iter().sum::<f32>() + EPS;
      let centroid = self.freqs.iter().zip(mag).map(|(f, m)| f * m).sum::<f32>() / total;
      let bandwidth = (self.freqs.iter().zip(mag).map(|(f, m)| m * (f - centroid).powi(2)).sum::<f32>() / total).sqrt();

      let power: Vec<f32> = mag.iter().map(|m| m * m + EPS).collect();
      let log_mean = power.iter().map(|p| p.ln()).sum::<f32>() / power.len() as f32;
      let flatness = log_mean.exp() / (power.iter().sum::<f32>() / power.len() as f32);

      let threshold = ROLLOFF * total;
      let mut cumulative = 0.0;
      let mut rolloff = self.freqs.last().copied().unwrap_or(0.0);
      for (f, m) in self.freqs.iter().zip(mag) {
        cumulative += m;
        if cumulative >= threshold {
          rolloff = *f;
          break;
        }
      }

      let frame = self.time_frame(samples, t);
      let rms = (frame.iter().map(|s| s * s).sum::<f32>() / self.frame_size as f32).sqrt();
      let crossings = frame.windows(2).filter(|w| (w[0] >= 0.0) != (w[1] >= 0.0)).count();
      let zcr = crossings as f32 / self.frame_size as f32;

      for (track, value) in tracks.iter_mut().zip([centroid, bandwidth, flatness, rolloff, rms, zcr]) {
        track.push(value);
      }
    }

    tracks.iter().flat_map(|track| mean_and_variance(track)).collect()
  }

  /// Centred time-domain frame `t`, zero padded past either end.
  fn time_frame(&self, samples: &[f32], t: usize) -> Vec<f32> {
    let start = (t * self.hop_size) as isize - (self.frame_size / 2) as isize;
    (0..self.frame_size as isize)
      .map(|k| {
        let i = start + k;
        if i >= 0 && (i as usize) < samples.len() {
          samples[i as usize]
        } else {
          0.0
        }
      })
      .collect()
  }
}

fn mean_and_variance(values: &[f32]) -> [f32; 2] {
  if values.is_empty() {
    return [0.0, 0.0];
  }
  let n = values.len() as f32;
  let mean = values.iter().sum::<f32>() / n;
  let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f32>() / n;
  [mean, variance]
}
