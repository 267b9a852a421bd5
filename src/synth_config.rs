use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Timing and voicing used for every render of a run.
///
/// Dataset generation, matching and evaluation must all use the same values, so the config
/// is carried into each step rather than defaulted per step.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SynthConfig {
  #[serde(default = "default_sample_rate")]
  pub sample_rate: u32,
  /// Seconds the note is held before release.
  pub note_length_secs: f32,
  /// Seconds of audio rendered in total, release tail included.
  pub render_length_secs: f32,
  #[serde(default = "default_midi_note")]
  pub midi_note: u8,
  #[serde(default = "default_velocity")]
  pub velocity: u8,
}

fn default_sample_rate() -> u32 {
  44100
}

fn default_midi_note() -> u8 {
  60
}

fn default_velocity() -> u8 {
  127
}

impl SynthConfig {
  pub fn new(sample_rate: u32, note_length_secs: f32, render_length_secs: f32) -> SynthConfig {
    SynthConfig {
      sample_rate,
      note_length_secs,
      render_length_secs,
      midi_note: default_midi_note(),
      velocity: default_velocity(),
    }
  }

  pub fn validate(&self) -> Result<()> {
    if self.sample_rate < 8000 {
      return Err(Error::Configuration(format!("sample rate {} is too low", self.sample_rate)));
    }
    if !(self.render_length_secs > 0.0) {
      return Err(Error::Configuration("render_length_secs must be positive".into()));
    }
    if !(self.note_length_secs >= 0.0) || self.note_length_secs > self.render_length_secs {
      return Err(Error::Configuration(format!(
        "note_length_secs {} must lie within the render length {}",
        self.note_length_secs, self.render_length_secs
      )));
    }
    if self.midi_note > 127 || self.velocity > 127 {
      return Err(Error::Configuration("midi note and velocity must be below 128".into()));
    }
    Ok(())
  }

  pub fn render_samples(&self) -> usize {
    (self.render_length_secs * self.sample_rate as f32).round() as usize
  }

  pub fn note_samples(&self) -> usize {
    (self.note_length_secs * self.sample_rate as f32).round() as usize
  }

  pub fn note_frequency(&self) -> f32 {
    440.0 * 2f32.powf((self.midi_note as f32 - 69.0) / 12.0)
  }
}
