//! `simple_fm`: a two operator FM voice with a low-pass filter and one LFO.
//!
//! Operator 2 modulates operator 1 ("stacked") or both sound on their own ("parallel"),
//! selected by [`ALGORITHM`]. Operator levels map to modulation index through the DX7 total
//! level table, the same curve Yamaha used for its output level knob.

use biquad::{Biquad, Coefficients, DirectForm1, Hertz, Type as FilterType};

use super::{pi, pi2, Engine, ParameterInfo};
use crate::error::{Error, Result};
use crate::synth_config::SynthConfig;

pub const FILTER_CUTOFF: usize = 0;
pub const FILTER_RESONANCE: usize = 1;
pub const OUTPUT_GAIN: usize = 2;
pub const MASTER_TUNE: usize = 3;
pub const ALGORITHM: usize = 4;
pub const FEEDBACK: usize = 5;
pub const OP1: usize = 6;
pub const OP2: usize = 13;
pub const LFO_RATE: usize = 20;
pub const LFO_PITCH_DEPTH: usize = 21;
pub const LFO_AMP_DEPTH: usize = 22;

/// Offsets inside an operator block starting at [`OP1`] or [`OP2`].
pub const RATIO: usize = 0;
pub const FINE: usize = 1;
pub const LEVEL: usize = 2;
pub const ATTACK: usize = 3;
pub const DECAY: usize = 4;
pub const SUSTAIN: usize = 5;
pub const RELEASE: usize = 6;

static PARAMETERS: [ParameterInfo; 23] = [
  ParameterInfo { name: "filter_cutoff", default: 1.0 },
  ParameterInfo { name: "filter_resonance", default: 0.0 },
  ParameterInfo { name: "output_gain", default: 0.8 },
  ParameterInfo { name: "master_tune", default: 0.5 },
  ParameterInfo { name: "algorithm", default: 0.0 },
  ParameterInfo { name: "feedback", default: 0.0 },
  ParameterInfo { name: "op1_ratio", default: 1.0 / 15.0 },
  ParameterInfo { name: "op1_fine", default: 0.0 },
  ParameterInfo { name: "op1_level", default: 1.0 },
  ParameterInfo { name: "op1_attack", default: 0.9 },
  ParameterInfo { name: "op1_decay", default: 0.5 },
  ParameterInfo { name: "op1_sustain", default: 0.8 },
  ParameterInfo { name: "op1_release", default: 0.7 },
  ParameterInfo { name: "op2_ratio", default: 1.0 / 15.0 },
  ParameterInfo { name: "op2_fine", default: 0.0 },
  ParameterInfo { name: "op2_level", default: 0.0 },
  ParameterInfo { name: "op2_attack", default: 0.9 },
  ParameterInfo { name: "op2_decay", default: 0.5 },
  ParameterInfo { name: "op2_sustain", default: 0.8 },
  ParameterInfo { name: "op2_release", default: 0.7 },
  ParameterInfo { name: "lfo_rate", default: 0.5 },
  ParameterInfo { name: "lfo_pitch_depth", default: 0.0 },
  ParameterInfo { name: "lfo_amp_depth", default: 0.0 },
];

/// Adapted from "FM Theory and Applications: By Musicians for Musicians" by John Chowning and David Bristow
/// Page 166
const TL_VALUES: [u8; 100] = [
  127, 122, 118, 114, 110, 107, 104, 102, 100, 98, 96, 94, 92, 90, 88, 86, 85, 84, 82, 81, 79, 78, 77, 76, 75, 74, 73,
  72, 71, 70, 69, 68, 67, 66, 65, 64, 63, 62, 61, 60, 59, 58, 57, 56, 55, 54, 53, 52, 51, 50, 49, 48, 47, 46, 45, 44,
  43, 42, 41, 40, 39, 38, 37, 36, 35, 34, 33, 32, 31, 30, 29, 28, 27, 26, 25, 24, 23, 22, 21, 20, 19, 18, 17, 16, 15,
  14, 13, 12, 11, 10, 9, 8, 7, 6, 5, 4, 3, 2, 1, 0,
];

/// Modulation index for a normalised operator level: the level picks a DX7 output level
/// (0-99), which is looked up as a total level and mapped to `I = PI * 2^(33/16 - TL/8)`.
pub fn modulation_index(level: f32) -> f32 {
  let output_level = (level.clamp(0.0, 1.0) * 99.0).round() as usize;
  let total_level = TL_VALUES[output_level] as f32;
  let x = (33.0 / 16.0) - (total_level / 8.0);
  pi * 2f32.powf(x)
}

/// Frequency multiple of an operator: coarse steps 0.5, 1, 2 .. 15 plus up to one octave of fine.
pub fn frequency_ratio(coarse: f32, fine: f32) -> f32 {
  let steps = (coarse.clamp(0.0, 1.0) * 15.0).round();
  let coarse = if steps < 1.0 { 0.5 } else { steps };
  coarse * (1.0 + fine.clamp(0.0, 1.0))
}

/// Envelope rates are "higher is faster" as on the DX7: 0 takes four seconds, 1 is instant.
fn rate_to_seconds(rate: f32) -> f32 {
  0.002 + 4.0 * (1.0 - rate.clamp(0.0, 1.0)).powi(3)
}

#[derive(Clone, Copy, Debug)]
struct Adsr {
  attack: f32,
  decay: f32,
  sustain: f32,
  release: f32,
}

impl Adsr {
  fn from_block(block: &[f32]) -> Self {
    Adsr {
      attack: rate_to_seconds(block[ATTACK]),
      decay: rate_to_seconds(block[DECAY]),
      sustain: block[SUSTAIN].clamp(0.0, 1.0),
      release: rate_to_seconds(block[RELEASE]),
    }
  }

  fn held(&self, t: f32) -> f32 {
    if t < self.attack {
      t / self.attack
    } else if t < self.attack + self.decay {
      1.0 - (1.0 - self.sustain) * (t - self.attack) / self.decay
    } else {
      self.sustain
    }
  }

  /// Level at `t` seconds for a note released at `note_off` seconds.
  fn level(&self, t: f32, note_off: f32) -> f32 {
    if t < note_off {
      self.held(t)
    } else {
      let at_release = self.held(note_off);
      at_release * (1.0 - (t - note_off) / self.release).max(0.0)
    }
  }
}

#[derive(Clone, Copy, Debug)]
struct OperatorVoice {
  ratio: f32,
  level: f32,
  envelope: Adsr,
}

impl OperatorVoice {
  fn from_block(block: &[f32]) -> Self {
    OperatorVoice {
      ratio: frequency_ratio(block[RATIO], block[FINE]),
      level: block[LEVEL].clamp(0.0, 1.0),
      envelope: Adsr::from_block(block),
    }
  }
}

#[derive(Debug, Default)]
pub struct SimpleFm;

impl SimpleFm {
  pub fn new() -> Self {
    SimpleFm
  }
}

fn lowpass(samples: &mut [f32], sample_rate: f32, cutoff: f32, resonance: f32) -> Result<()> {
  let nyquist_guard = sample_rate * 0.45;
  let cutoff_hz = (20.0 * 1000f32.powf(cutoff.clamp(0.0, 1.0))).min(nyquist_guard);
  let q = 0.707 + 9.3 * resonance.clamp(0.0, 1.0).powi(2);

  let fs = Hertz::<f32>::from_hz(sample_rate).map_err(|e| Error::Render(format!("{:?}", e)))?;
  let f0 = Hertz::<f32>::from_hz(cutoff_hz).map_err(|e| Error::Render(format!("{:?}", e)))?;
  let coeffs = Coefficients::<f32>::from_params(FilterType::LowPass, fs, f0, q)
    .map_err(|e| Error::Render(format!("low-pass coefficients for {} Hz: {:?}", cutoff_hz, e)))?;

  let mut filter = DirectForm1::<f32>::new(coeffs);
  for sample in samples.iter_mut() {
    *sample = filter.run(*sample);
  }
  Ok(())
}

impl Engine for SimpleFm {
  fn name(&self) -> &str {
    "simple_fm"
  }

  fn parameters(&self) -> &[ParameterInfo] {
    &PARAMETERS
  }

  fn render(&self, values: &[f32], config: &SynthConfig) -> Result<Vec<f32>> {
    if values.len() != PARAMETERS.len() {
      return Err(Error::Shape(format!(
        "simple_fm takes {} parameters, got {}",
        PARAMETERS.len(),
        values.len()
      )));
    }
    let sample_rate = config.sample_rate as f32;
    let n_samples = config.render_samples();
    let note_off = config.note_length_secs;

    let detune = (values[MASTER_TUNE] - 0.5) * 2.0 / 12.0;
    let fundamental = config.note_frequency() * 2f32.powf(detune);
    let velocity = config.velocity as f32 / 127.0;
    let gain = values[OUTPUT_GAIN] * velocity;
    let stacked = values[ALGORITHM] < 0.5;
    let feedback = values[FEEDBACK] * 1.5;

    let carrier = OperatorVoice::from_block(&values[OP1..OP1 + 7]);
    let modulator = OperatorVoice::from_block(&values[OP2..OP2 + 7]);
    let mod_index = modulation_index(modulator.level);

    let lfo_hz = 0.1 * 200f32.powf(values[LFO_RATE]);
    let pitch_depth = values[LFO_PITCH_DEPTH] / 12.0;
    let amp_depth = values[LFO_AMP_DEPTH];

    let mut signal = Vec::with_capacity(n_samples);
    let (mut carrier_phase, mut modulator_phase) = (0f32, 0f32);
    let (mut fb_prev, mut fb_prev2) = (0f32, 0f32);

    for i in 0..n_samples {
      let t = i as f32 / sample_rate;
      let lfo = (pi2 * lfo_hz * t).sin();
      let pitch = 2f32.powf(lfo * pitch_depth);
      let tremolo = 1.0 - amp_depth * 0.5 * (1.0 - lfo);

      // DX7 style feedback averages the last two outputs to stop the loop from hunting.
      let fb = feedback * 0.5 * (fb_prev + fb_prev2);
      let modulator_out = modulator.envelope.level(t, note_off) * (modulator_phase + fb).sin();
      fb_prev2 = fb_prev;
      fb_prev = modulator_out;

      let carrier_env = carrier.envelope.level(t, note_off) * carrier.level;
      let sample = if stacked {
        carrier_env * (carrier_phase + mod_index * modulator_out).sin()
      } else {
        0.5 * (carrier_env * carrier_phase.sin() + modulator.level * modulator_out)
      };
      signal.push(gain * tremolo * sample);

      carrier_phase = (carrier_phase + pi2 * fundamental * carrier.ratio * pitch / sample_rate) % pi2;
      modulator_phase = (modulator_phase + pi2 * fundamental * modulator.ratio * pitch / sample_rate) % pi2;
    }

    lowpass(&mut signal, sample_rate, values[FILTER_CUTOFF], values[FILTER_RESONANCE])?;
    Ok(signal)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn values() -> Vec<f32> {
    PARAMETERS.iter().map(|p| p.default).collect()
  }

  #[test]
  fn test_modulation_index_monotonic_increase() {
    let mut previous = 0.0;
    for i in 0..=20 {
      let input = i as f32 * 0.05;
      let result = modulation_index(input);
      assert!(result >= previous, "index fell at level {:.2}: {} < {}", input, result, previous);
      previous = result;
    }
    assert!(modulation_index(0.0) < 1e-3);
  }

  #[test]
  fn test_ratio_steps() {
    assert_eq!(frequency_ratio(0.0, 0.0), 0.5);
    assert_eq!(frequency_ratio(1.0 / 15.0, 0.0), 1.0);
    assert_eq!(frequency_ratio(1.0, 0.0), 15.0);
    assert_eq!(frequency_ratio(2.0 / 15.0, 1.0), 4.0);
  }

  #[test]
  fn test_render_length_and_bounds() {
    let config = SynthConfig::new(22050, 0.5, 0.75);
    let signal = SimpleFm::new().render(&values(), &config).unwrap();
    assert_eq!(signal.len(), config.render_samples());
    assert!(signal.iter().all(|s| s.is_finite()));
    assert!(signal.iter().any(|s| s.abs() > 0.01));
  }

  #[test]
  fn test_render_is_pure() {
    let config = SynthConfig::new(22050, 0.2, 0.3);
    let mut v = values();
    v[OP2 + LEVEL] = 0.7;
    v[FEEDBACK] = 0.4;
    let engine = SimpleFm::new();
    assert_eq!(engine.render(&v, &config).unwrap(), engine.render(&v, &config).unwrap());
  }

  #[test]
  fn test_release_reaches_silence() {
    let config = SynthConfig::new(22050, 0.1, 0.5);
    let mut v = values();
    v[OP1 + RELEASE] = 1.0;
    let signal = SimpleFm::new().render(&v, &config).unwrap();
    let tail = &signal[signal.len() - 100..];
    assert!(tail.iter().all(|s| s.abs() < 1e-3));
  }

  #[test]
  fn test_wrong_width_is_rejected() {
    let config = SynthConfig::new(22050, 0.1, 0.2);
    assert!(SimpleFm::new().render(&[0.5; 3], &config).is_err());
  }
}
