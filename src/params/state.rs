use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use super::ParameterIndex;
use crate::error::{Error, Result};
use crate::files;

/// A full parameter vector as persisted between steps.
///
/// The JSON form maps index to value with keys in ascending order, so persisting a restored
/// state reproduces the file byte for byte.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ParameterState {
  pub engine: String,
  pub parameters: BTreeMap<ParameterIndex, f32>,
  /// Dimensions frozen by an override table, ascending.
  #[serde(default)]
  pub overridden: Vec<ParameterIndex>,
}

impl ParameterState {
  pub fn new(engine: &str, values: &[f32], overridden: impl IntoIterator<Item = ParameterIndex>) -> Self {
    let mut overridden: Vec<ParameterIndex> = overridden.into_iter().collect();
    overridden.sort_unstable();
    overridden.dedup();
    ParameterState {
      engine: engine.to_string(),
      parameters: values.iter().copied().enumerate().collect(),
      overridden,
    }
  }

  pub fn write(&self, path: &Path) -> Result<()> {
    files::write_json(path, self)?;
    log::info!("saved synth state ({} parameters) to {}", self.parameters.len(), path.display());
    Ok(())
  }

  /// Parse a state file. Anything that is not a well-formed state is a
  /// [`Error::StateFormat`]; range checks against a concrete engine happen in
  /// [`ParameterState::validate`].
  pub fn read(path: &Path) -> Result<Self> {
    let text = fs::read_to_string(path).map_err(|e| Error::read(path, e))?;
    serde_json::from_str(&text).map_err(|e| Error::StateFormat {
      path: path.to_path_buf(),
      reason: e.to_string(),
    })
  }

  pub fn validate(&self, engine: &str, parameter_count: usize, path: &Path) -> Result<()> {
    let malformed = |reason: String| Error::StateFormat {
      path: path.to_path_buf(),
      reason,
    };

    if self.engine != engine {
      return Err(malformed(format!("state is for engine '{}', not '{}'", self.engine, engine)));
    }
    for (&index, &value) in &self.parameters {
      if index >= parameter_count {
        return Err(malformed(format!(
          "parameter index {} is outside 0..{}",
          index, parameter_count
        )));
      }
      if value.is_nan() || !(0.0..=1.0).contains(&value) {
        return Err(malformed(format!("parameter {} has value {} outside [0, 1]", index, value)));
      }
    }
    if let Some(index) = self.overridden.iter().find(|&&i| i >= parameter_count) {
      return Err(malformed(format!("overridden index {} is outside 0..{}", index, parameter_count)));
    }
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use tempdir::TempDir;

  #[test]
  fn test_keys_serialize_as_index_strings() {
    let state = ParameterState::new("simple_fm", &[0.25, 1.0], vec![1]);
    let text = serde_json::to_string(&state).unwrap();
    assert!(text.contains(r#""parameters":{"0":0.25,"1":1.0}"#), "{}", text);
  }

  #[test]
  fn test_read_rejects_garbage() {
    let tmp = TempDir::new("state").unwrap();
    let path = tmp.path().join("broken.json");
    fs::write(&path, "{ not json").unwrap();
    assert!(matches!(ParameterState::read(&path), Err(Error::StateFormat { .. })));
  }

  #[test]
  fn test_validate_rejects_out_of_range_index() {
    let mut state = ParameterState::new("simple_fm", &[0.0; 4], vec![]);
    state.parameters.insert(40, 0.5);
    let result = state.validate("simple_fm", 4, Path::new("s.json"));
    assert!(matches!(result, Err(Error::StateFormat { .. })));
  }

  #[test]
  fn test_validate_rejects_other_engine() {
    let state = ParameterState::new("wavetable", &[0.0; 4], vec![]);
    assert!(state.validate("simple_fm", 4, Path::new("s.json")).is_err());
  }

  #[test]
  fn test_write_below_a_regular_file_fails() {
    let tmp = TempDir::new("state").unwrap();
    let blocker = tmp.path().join("synth_params");
    fs::write(&blocker, "not a directory").unwrap();

    let state = ParameterState::new("simple_fm", &[0.5; 3], vec![]);
    for path in [blocker.join("simple_fm.json"), blocker.join("nested").join("simple_fm.json")] {
      assert!(
        matches!(state.write(&path), Err(Error::IoWrite { .. })),
        "{} should not be writable",
        path.display()
      );
    }
    assert_eq!(fs::read_to_string(&blocker).unwrap(), "not a directory");
  }
}
