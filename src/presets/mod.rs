//! Built-in override presets for the `simple_fm` engine.
//!
//! Each preset is a list of thematic groups concatenated in order, the same way a hand
//! written experiment config lists them. Groups may reassign an index; the later group wins.

use std::collections::BTreeMap;

use once_cell::sync::Lazy;

use crate::error::{Error, Result};
use crate::params::{OverrideGroup, OverrideTable};
use crate::synth::fm::*;

static PRESETS: Lazy<BTreeMap<&'static str, Vec<OverrideGroup>>> = Lazy::new(|| {
  let mut presets = BTreeMap::new();
  presets.insert("simple_fm", simple_fm());
  presets.insert("voice_only", vec![global_voice(), modulation_off()]);
  presets.insert("free", Vec::new());
  presets
});

pub fn names() -> Vec<&'static str> {
  PRESETS.keys().copied().collect()
}

pub fn groups(name: &str) -> Option<&'static [OverrideGroup]> {
  PRESETS.get(name).map(|groups| groups.as_slice())
}

pub fn preset(name: &str) -> Result<OverrideTable> {
  let groups = groups(name).ok_or_else(|| {
    Error::Configuration(format!("unknown override preset '{}' (known: {})", name, names().join(", ")))
  })?;
  OverrideTable::from_groups(groups)
}

/// Stacked algorithm, open filter, unity gain, centred tuning.
fn global_voice() -> OverrideGroup {
  OverrideGroup::new("global voice").values(&[
    (FILTER_CUTOFF, 1.0),
    (FILTER_RESONANCE, 0.0),
    (OUTPUT_GAIN, 1.0),
    (MASTER_TUNE, 0.5),
    (ALGORITHM, 0.0),
    (FEEDBACK, 0.0),
    (LFO_RATE, 0.5),
  ])
}

/// LFO rate and both depths to zero.
fn modulation_off() -> OverrideGroup {
  OverrideGroup::new("modulation off").fill(LFO_RATE..LFO_AMP_DEPTH + 1, 0.0)
}

/// Operator 1 as a unit ratio sine with a flat envelope.
fn carrier_sine() -> OverrideGroup {
  OverrideGroup::new("operator 1 as plain sine").values(&[
    (OP1 + RATIO, 1.0 / 15.0),
    (OP1 + FINE, 0.0),
    (OP1 + LEVEL, 1.0),
    (OP1 + ATTACK, 0.9),
    (OP1 + DECAY, 0.9),
    (OP1 + SUSTAIN, 1.0),
    (OP1 + RELEASE, 0.9),
  ])
}

/// Operator 2 always starts immediately; its ratio, level and remaining envelope stay free.
fn modulator_partial() -> OverrideGroup {
  OverrideGroup::new("operator 2 attack").values(&[(OP2 + ATTACK, 0.9)])
}

/// One modulator against a fixed sine carrier: six free parameters.
fn simple_fm() -> Vec<OverrideGroup> {
  vec![global_voice(), modulation_off(), carrier_sine(), modulator_partial()]
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::synth::{EngineKind, Synth};
  use crate::synth_config::SynthConfig;

  #[test]
  fn test_simple_fm_leaves_six_free() {
    let mut synth = Synth::new(EngineKind::SimpleFm.build(), SynthConfig::new(22050, 0.1, 0.1)).unwrap();
    synth.set_overridden_parameters(&preset("simple_fm").unwrap()).unwrap();
    assert_eq!(
      synth.free_indices(),
      vec![OP2 + RATIO, OP2 + FINE, OP2 + LEVEL, OP2 + DECAY, OP2 + SUSTAIN, OP2 + RELEASE]
    );
  }

  #[test]
  fn test_later_group_wins_for_lfo_rate() {
    let resolved = preset("simple_fm").unwrap().resolve();
    assert_eq!(resolved[&LFO_RATE].get(), 0.0);
  }

  #[test]
  fn test_free_is_empty() {
    assert!(preset("free").unwrap().is_empty());
  }

  #[test]
  fn test_unknown_preset() {
    assert!(matches!(preset("dexed"), Err(Error::Configuration(_))));
  }
}
