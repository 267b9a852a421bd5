use std::sync::Arc;

use rustfft::{num_complex::Complex, Fft, FftPlanner};
use serde::{Deserialize, Serialize};

use crate::synth::pi2;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpectrumOutput {
  Magnitude,
  Power,
}

impl SpectrumOutput {
  #[inline]
  pub fn of(self, bin: Complex<f32>) -> f32 {
    match self {
      SpectrumOutput::Magnitude => bin.norm(),
      SpectrumOutput::Power => bin.norm_sqr(),
    }
  }
}

/// Periodic Hann window.
pub fn hann(n: usize) -> Vec<f32> {
  (0..n).map(|i| 0.5 - 0.5 * (pi2 * i as f32 / n as f32).cos()).collect()
}

/// Short-time transform over centred frames.
///
/// The signal is zero padded by half a frame on both sides, so frame `t` is centred on sample
/// `t * hop_size` and a signal of `n` samples yields `1 + n / hop_size` frames.
pub struct Stft {
  frame_size: usize,
  hop_size: usize,
  window: Vec<f32>,
  fft: Arc<dyn Fft<f32>>,
}

impl Stft {
  pub fn new(frame_size: usize, hop_size: usize) -> Self {
    let mut planner = FftPlanner::new();
    Stft {
      frame_size,
      hop_size,
      window: hann(frame_size),
      fft: planner.plan_fft_forward(frame_size),
    }
  }

  pub fn bins(&self) -> usize {
    self.frame_size / 2 + 1
  }

  pub fn frame_count(&self, len: usize) -> usize {
    1 + len / self.hop_size
  }

  /// One row of `bins()` values per frame.
  pub fn frames(&self, samples: &[f32], output: SpectrumOutput) -> Vec<Vec<f32>> {
    let half = self.frame_size / 2;
    let mut buffer = vec![Complex::new(0.0, 0.0); self.frame_size];

    (0..self.frame_count(samples.len()))
      .map(|t| {
        let start = (t * self.hop_size) as isize - half as isize;
        for (k, slot) in buffer.iter_mut().enumerate() {
          let i = start + k as isize;
          let s = if i >= 0 && (i as usize) < samples.len() { samples[i as usize] } else { 0.0 };
          *slot = Complex::new(s * self.window[k], 0.0);
        }
        self.fft.process(&mut buffer);
        buffer[..self.bins()].iter().map(|&bin| output.of(bin)).collect()
      })
      .collect()
  }
}

/// One-sided spectrum of the whole signal.
pub fn spectrum(samples: &[f32], output: SpectrumOutput) -> Vec<f32> {
  if samples.is_empty() {
    return Vec::new();
  }
  let n = samples.len();
  let mut planner = FftPlanner::new();
  let fft = planner.plan_fft_forward(n);
  let mut buffer: Vec<Complex<f32>> = samples.iter().map(|&s| Complex::new(s, 0.0)).collect();
  fft.process(&mut buffer);
  buffer[..n / 2 + 1].iter().map(|&bin| output.of(bin)).collect()
}

/// Centre frequency of each one-sided bin.
pub fn bin_frequencies(frame_size: usize, sample_rate: u32) -> Vec<f32> {
  let step = sample_rate as f32 / frame_size as f32;
  (0..frame_size / 2 + 1).map(|k| k as f32 * step).collect()
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_frame_count_is_centred() {
    let stft = Stft::new(512, 128);
    assert_eq!(stft.frame_count(1024), 9);
    let frames = stft.frames(&vec![0.0; 1024], SpectrumOutput::Power);
    assert_eq!(frames.len(), 9);
    assert!(frames.iter().all(|f| f.len() == 257));
  }

  #[test]
  fn test_sine_peaks_in_its_bin() {
    let sr = 8000;
    let n = 800;
    let signal: Vec<f32> = (0..n).map(|i| (pi2 * 1000.0 * i as f32 / sr as f32).sin()).collect();
    let spec = spectrum(&signal, SpectrumOutput::Magnitude);
    let peak = spec
      .iter()
      .enumerate()
      .fold((0, 0.0f32), |best, (k, &m)| if m > best.1 { (k, m) } else { best });
    // 1000 Hz at 10 Hz per bin
    assert_eq!(peak.0, 100);
  }
}
