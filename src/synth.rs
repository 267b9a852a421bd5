//! The synthesizer seam.
//!
//! An [`Engine`] knows a parameter layout and how to render a full parameter vector to audio.
//! A [`Synth`] wraps an engine with the run's render timing and the parameter bookkeeping every
//! step needs: overridden (frozen) dimensions, random patches over the free dimensions, and
//! persisted state.

pub mod fm;

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::sync::Arc;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::audio::AudioBuffer;
use crate::error::{Error, Result};
use crate::params::{NormalizedValue, OverrideTable, ParameterIndex, ParameterState};
use crate::synth_config::SynthConfig;

#[allow(non_upper_case_globals)]
pub const pi: f32 = std::f32::consts::PI;
#[allow(non_upper_case_globals)]
pub const pi2: f32 = pi * 2f32;

#[derive(Clone, Debug, PartialEq)]
pub struct ParameterInfo {
  pub name: &'static str,
  pub default: f32,
}

/// A sound generator addressed by normalised parameters.
///
/// `render` must be pure: the same values and config always produce the same samples.
pub trait Engine: Send + Sync {
  fn name(&self) -> &str;
  fn parameters(&self) -> &[ParameterInfo];
  fn render(&self, values: &[f32], config: &SynthConfig) -> Result<Vec<f32>>;
}

/// Engines available to experiment configs.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineKind {
  SimpleFm,
}

impl EngineKind {
  pub fn build(self) -> Arc<dyn Engine> {
    match self {
      EngineKind::SimpleFm => Arc::new(fm::SimpleFm::new()),
    }
  }
}

#[derive(Clone)]
pub struct Synth {
  engine: Arc<dyn Engine>,
  config: SynthConfig,
  values: Vec<f32>,
  overridden: BTreeMap<ParameterIndex, f32>,
}

impl fmt::Debug for Synth {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Synth")
      .field("engine", &self.engine.name())
      .field("config", &self.config)
      .field("overridden", &self.overridden.len())
      .finish()
  }
}

impl Synth {
  /// A synth at the engine's default patch with nothing overridden.
  pub fn new(engine: Arc<dyn Engine>, config: SynthConfig) -> Result<Self> {
    config.validate()?;
    let values = engine.parameters().iter().map(|p| p.default).collect();
    Ok(Synth {
      engine,
      config,
      values,
      overridden: BTreeMap::new(),
    })
  }

  pub fn engine_name(&self) -> &str {
    self.engine.name()
  }

  pub fn config(&self) -> &SynthConfig {
    &self.config
  }

  pub fn parameter_count(&self) -> usize {
    self.values.len()
  }

  pub fn parameters(&self) -> &[f32] {
    &self.values
  }

  pub fn overridden(&self) -> &BTreeMap<ParameterIndex, f32> {
    &self.overridden
  }

  fn check_index(&self, index: ParameterIndex) -> Result<()> {
    if index >= self.values.len() {
      return Err(Error::InvalidParameterIndex {
        index,
        count: self.values.len(),
        engine: self.engine.name().to_string(),
      });
    }
    Ok(())
  }

  pub fn get_parameter(&self, index: ParameterIndex) -> Result<f32> {
    self.check_index(index)?;
    Ok(self.values[index])
  }

  pub fn set_parameter(&mut self, index: ParameterIndex, value: NormalizedValue) -> Result<()> {
    self.check_index(index)?;
    self.values[index] = value.get();
    Ok(())
  }

  /// Freeze the dimensions named by `table`, replacing any earlier overrides.
  ///
  /// Every index is checked before anything is written, so a bad table leaves the synth as
  /// it was. Dimensions not in the table keep their current values.
  pub fn set_overridden_parameters(&mut self, table: &OverrideTable) -> Result<()> {
    let resolved = table.resolve();
    for &index in resolved.keys() {
      self.check_index(index)?;
    }
    self.overridden.clear();
    for (index, value) in resolved {
      self.values[index] = value.get();
      self.overridden.insert(index, value.get());
    }
    log::info!(
      "{}: {} of {} parameters overridden, {} free",
      self.engine.name(),
      self.overridden.len(),
      self.values.len(),
      self.free_count()
    );
    Ok(())
  }

  /// Indices not frozen by an override, ascending. A patch has one value per free index.
  pub fn free_indices(&self) -> Vec<ParameterIndex> {
    (0..self.values.len()).filter(|i| !self.overridden.contains_key(i)).collect()
  }

  pub fn free_count(&self) -> usize {
    self.values.len() - self.overridden.len()
  }

  /// Current values of the free dimensions.
  pub fn patch(&self) -> Vec<f32> {
    self.free_indices().into_iter().map(|i| self.values[i]).collect()
  }

  /// Draw a uniform random patch over the free dimensions without touching the synth.
  pub fn random_patch<R: Rng + ?Sized>(&self, rng: &mut R) -> Vec<f32> {
    (0..self.free_count()).map(|_| rng.gen::<f32>()).collect()
  }

  pub fn randomize_patch<R: Rng + ?Sized>(&mut self, rng: &mut R) {
    let patch = self.random_patch(rng);
    for (index, value) in self.free_indices().into_iter().zip(patch) {
      self.values[index] = value;
    }
  }

  /// Write `patch` into the free dimensions.
  ///
  /// Patches come from estimators, so values are clamped into `[0, 1]` here. Overrides are
  /// validated instead, see [`NormalizedValue::new`].
  pub fn set_patch(&mut self, patch: &[f32]) -> Result<()> {
    self.values = self.full_values(patch)?;
    Ok(())
  }

  /// The complete parameter vector for `patch` with overrides in place.
  pub fn full_values(&self, patch: &[f32]) -> Result<Vec<f32>> {
    let free = self.free_indices();
    if patch.len() != free.len() {
      return Err(Error::Shape(format!(
        "patch has {} values but {} has {} free parameters",
        patch.len(),
        self.engine.name(),
        free.len()
      )));
    }
    let mut values = self.values.clone();
    for (index, value) in free.into_iter().zip(patch.iter().copied()) {
      values[index] = if value.is_nan() { 0.0 } else { value.clamp(0.0, 1.0) };
    }
    Ok(values)
  }

  pub fn render_patch(&self) -> Result<AudioBuffer> {
    let samples = self.engine.render(&self.values, &self.config)?;
    Ok(AudioBuffer::new(samples, self.config.sample_rate))
  }

  /// Render `patch` without changing the synth. Safe to call from many threads.
  pub fn render_candidate(&self, patch: &[f32]) -> Result<AudioBuffer> {
    let values = self.full_values(patch)?;
    let samples = self.engine.render(&values, &self.config)?;
    Ok(AudioBuffer::new(samples, self.config.sample_rate))
  }

  pub fn state(&self) -> ParameterState {
    ParameterState::new(self.engine.name(), &self.values, self.overridden.keys().copied())
  }

  /// Persist the full parameter vector to `path`.
  pub fn save_state(&self, path: &Path) -> Result<ParameterState> {
    let state = self.state();
    state.write(path)?;
    Ok(state)
  }

  /// Load a persisted state and apply every entry. The overridden set is replaced by the
  /// one recorded in the file.
  pub fn load_state(&mut self, path: &Path) -> Result<ParameterState> {
    let state = ParameterState::read(path)?;
    state.validate(self.engine.name(), self.values.len(), path)?;

    for (&index, &value) in &state.parameters {
      self.values[index] = value;
    }
    self.overridden = state.overridden.iter().map(|&i| (i, self.values[i])).collect();
    log::info!(
      "loaded synth state from {} ({} overridden)",
      path.display(),
      self.overridden.len()
    );
    Ok(state)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use rand::rngs::StdRng;
  use rand::SeedableRng;

  fn synth() -> Synth {
    Synth::new(EngineKind::SimpleFm.build(), SynthConfig::new(22050, 0.2, 0.25)).unwrap()
  }

  #[test]
  fn test_overrides_only_touch_named_dimensions() {
    let mut synth = synth();
    let before = synth.parameters().to_vec();
    let table = OverrideTable::from_pairs(vec![(2, 0.3), (5, 0.7), (2, 0.9)]).unwrap();
    synth.set_overridden_parameters(&table).unwrap();

    for (i, (&old, &new)) in before.iter().zip(synth.parameters()).enumerate() {
      match i {
        2 => assert_eq!(new, 0.9),
        5 => assert_eq!(new, 0.7),
        _ => assert_eq!(new, old, "parameter {} changed", i),
      }
    }
    assert_eq!(synth.free_count(), synth.parameter_count() - 2);
  }

  #[test]
  fn test_bad_index_leaves_synth_unchanged() {
    let mut synth = synth();
    let before = synth.parameters().to_vec();
    let table = OverrideTable::from_pairs(vec![(0, 0.1), (999, 0.5)]).unwrap();
    let result = synth.set_overridden_parameters(&table);
    assert!(matches!(result, Err(Error::InvalidParameterIndex { index: 999, .. })));
    assert_eq!(synth.parameters(), &before[..]);
    assert!(synth.overridden().is_empty());
  }

  #[test]
  fn test_randomize_keeps_overrides() {
    let mut synth = synth();
    let table = OverrideTable::from_pairs(vec![(0, 1.0), (1, 0.0)]).unwrap();
    synth.set_overridden_parameters(&table).unwrap();
    let mut rng = StdRng::seed_from_u64(3);
    synth.randomize_patch(&mut rng);
    assert_eq!(synth.get_parameter(0).unwrap(), 1.0);
    assert_eq!(synth.get_parameter(1).unwrap(), 0.0);
    assert_eq!(synth.patch().len(), synth.free_count());
  }

  #[test]
  fn test_patch_width_is_checked() {
    let synth = synth();
    assert!(matches!(synth.render_candidate(&[0.5]), Err(Error::Shape(_))));
  }

  #[test]
  fn test_save_state_to_unwritable_path() {
    let tmp = tempdir::TempDir::new("synth").unwrap();
    let blocker = tmp.path().join("state");
    std::fs::write(&blocker, "").unwrap();
    let result = synth().save_state(&blocker.join("simple_fm.json"));
    assert!(matches!(result, Err(Error::IoWrite { .. })));
  }
}
