mod common;

use std::fs;

use pretty_assertions::assert_eq;
use soundmatch::params::{OverrideGroup, OverrideTable, ParameterState};
use soundmatch::presets;
use tempdir::TempDir;

#[test]
fn test_duplicate_indices_resolve_last_write_wins() {
  let mut synth = common::synth();
  let before = synth.parameters().to_vec();

  let groups = vec![
    OverrideGroup::new("first pass").values(&[(0, 0.1), (4, 0.2), (9, 0.3)]),
    OverrideGroup::new("fill").fill(8..11, 0.6),
    OverrideGroup::new("correction").values(&[(4, 0.9), (0, 0.0)]),
  ];
  let table = OverrideTable::from_groups(&groups).unwrap();
  synth.set_overridden_parameters(&table).unwrap();

  let expected = [(0, 0.0), (4, 0.9), (8, 0.6), (9, 0.6), (10, 0.6)];
  for (index, value) in expected {
    assert_eq!(synth.get_parameter(index).unwrap(), value, "parameter {}", index);
  }
  for (index, (&old, &new)) in before.iter().zip(synth.parameters()).enumerate() {
    if !expected.iter().any(|&(i, _)| i == index) {
      assert_eq!(new, old, "parameter {} was not in the table", index);
    }
  }
  assert_eq!(synth.overridden().keys().copied().collect::<Vec<_>>(), vec![0, 4, 8, 9, 10]);
}

#[test]
fn test_persist_restore_is_byte_identical() {
  let tmp = TempDir::new("persist").unwrap();
  let first = tmp.path().join("first.json");
  let second = tmp.path().join("second.json");

  let mut synth = common::synth();
  synth.set_overridden_parameters(&presets::preset("simple_fm").unwrap()).unwrap();
  synth.save_state(&first).unwrap();

  let mut restored = common::synth();
  let state = restored.load_state(&first).unwrap();
  restored.save_state(&second).unwrap();

  assert_eq!(fs::read_to_string(&first).unwrap(), fs::read_to_string(&second).unwrap());
  assert_eq!(ParameterState::read(&second).unwrap(), state);
  assert_eq!(restored.free_indices(), synth.free_indices());
}

#[test]
fn test_restore_rejects_other_engine_state() {
  let tmp = TempDir::new("persist").unwrap();
  let path = tmp.path().join("other.json");
  ParameterState::new("dexed", &[0.5; 4], Vec::new()).write(&path).unwrap();

  let mut synth = common::synth();
  assert!(synth.load_state(&path).is_err());
}
