use crate::synth::pi;

use super::spectrum::{bin_frequencies, SpectrumOutput, Stft};

pub const MEL_BANDS: usize = 128;
const TOP_DB: f32 = 80.0;
const AMIN: f32 = 1e-10;

pub fn hz_to_mel(hz: f32) -> f32 {
  2595.0 * (1.0 + hz / 700.0).log10()
}

pub fn mel_to_hz(mel: f32) -> f32 {
  700.0 * (10f32.powf(mel / 2595.0) - 1.0)
}

/// Triangular mel filters between 0 Hz and Nyquist, each normalised to unit area.
/// Returns `bands` rows of `frame_size / 2 + 1` weights.
pub fn mel_filterbank(bands: usize, frame_size: usize, sample_rate: u32) -> Vec<Vec<f32>> {
  let freqs = bin_frequencies(frame_size, sample_rate);
  let top = hz_to_mel(sample_rate as f32 / 2.0);
  let edges: Vec<f32> = (0..bands + 2).map(|i| mel_to_hz(top * i as f32 / (bands + 1) as f32)).collect();

  (0..bands)
    .map(|b| {
      let (lo, mid, hi) = (edges[b], edges[b + 1], edges[b + 2]);
      let norm = 2.0 / (hi - lo);
      freqs
        .iter()
        .map(|&f| {
          let rising = (f - lo) / (mid - lo);
          let falling = (hi - f) / (hi - mid);
          rising.min(falling).max(0.0) * norm
        })
        .collect()
    })
    .collect()
}

/// `10 * log10(power)`, floored `TOP_DB` below the loudest value.
pub fn power_to_db(values: &mut [f32]) {
  let mut peak = f32::NEG_INFINITY;
  for v in values.iter_mut() {
    *v = 10.0 * v.max(AMIN).log10();
    peak = peak.max(*v);
  }
  let floor = peak - TOP_DB;
  for v in values.iter_mut() {
    *v = v.max(floor);
  }
}

/// Orthonormal DCT-II, keeping the first `keep` coefficients.
pub fn dct_ortho(input: &[f32], keep: usize) -> Vec<f32> {
  let n = input.len() as f32;
  (0..keep.min(input.len()))
    .map(|k| {
      let sum: f32 = input
        .iter()
        .enumerate()
        .map(|(i, &x)| x * (pi * k as f32 * (2.0 * i as f32 + 1.0) / (2.0 * n)).cos())
        .sum();
      let scale = if k == 0 { (1.0 / n).sqrt() } else { (2.0 / n).sqrt() };
      sum * scale
    })
    .collect()
}

pub struct Mfcc {
  num_mfccs: usize,
  stft: Stft,
  filters: Vec<Vec<f32>>,
}

impl Mfcc {
  pub fn new(num_mfccs: usize, frame_size: usize, hop_size: usize, sample_rate: u32) -> Self {
    Mfcc {
      num_mfccs,
      stft: Stft::new(frame_size, hop_size),
      filters: mel_filterbank(MEL_BANDS, frame_size, sample_rate),
    }
  }

  pub fn frame_count(&self, len: usize) -> usize {
    self.stft.frame_count(len)
  }

  /// Coefficients per frame, `[frames][num_mfccs]`.
  pub fn compute(&self, samples: &[f32]) -> Vec<Vec<f32>> {
    let power = self.stft.frames(samples, SpectrumOutput::Power);
    let mut mel: Vec<f32> = power
      .iter()
      .flat_map(|frame| {
        self
          .filters
          .iter()
          .map(move |filter| filter.iter().zip(frame).map(|(w, p)| w * p).sum::<f32>())
      })
      .collect();
    power_to_db(&mut mel);

    mel.chunks(MEL_BANDS).map(|bands| dct_ortho(bands, self.num_mfccs)).collect()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_mel_round_trip() {
    for hz in [0.0, 440.0, 8000.0] {
      assert!((mel_to_hz(hz_to_mel(hz)) - hz).abs() < 0.05);
    }
  }

  #[test]
  fn test_db_floor() {
    let mut values = vec![1.0, 1e-12, 0.1];
    power_to_db(&mut values);
    for (got, want) in values.iter().zip([0.0, -80.0, -10.0]) {
      assert!((got - want).abs() < 1e-3, "{} != {}", got, want);
    }
  }

  #[test]
  fn test_dct_of_constant_is_dc_only() {
    let coeffs = dct_ortho(&[2.0; 8], 4);
    assert!((coeffs[0] - 2.0 * 8f32.sqrt()).abs() < 1e-4);
    assert!(coeffs[1..].iter().all(|c| c.abs() < 1e-4));
  }

  #[test]
  fn test_shape() {
    let mfcc = Mfcc::new(13, 1024, 256, 22050);
    let out = mfcc.compute(&vec![0.1; 2048]);
    assert_eq!(out.len(), 9);
    assert!(out.iter().all(|f| f.len() == 13));
  }
}
