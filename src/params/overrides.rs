use std::collections::BTreeMap;
use std::ops::Range;

use serde::{Deserialize, Serialize};

use super::{NormalizedValue, ParameterIndex};
use crate::error::{Error, Result};

/// An ordered sequence of frozen parameter dimensions.
///
/// Tables are usually assembled by concatenating thematic groups ("modulation off",
/// "operator 1 as a plain sine", ...) which may assign the same index more than once.
/// [`OverrideTable::resolve`] folds the sequence left to right, so the last entry for an
/// index wins.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct OverrideTable {
  entries: Vec<(ParameterIndex, NormalizedValue)>,
}

/// A named sub-list of overrides as written in presets and experiment configs.
///
/// Explicit `values` are appended before the `fill` range.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OverrideGroup {
  pub name: String,
  #[serde(default)]
  pub values: Vec<(ParameterIndex, f32)>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub fill: Option<Fill>,
}

/// Sets every index in `from..to` to `value`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Fill {
  pub from: ParameterIndex,
  pub to: ParameterIndex,
  pub value: f32,
}

impl OverrideGroup {
  pub fn new(name: &str) -> Self {
    OverrideGroup {
      name: name.to_string(),
      values: Vec::new(),
      fill: None,
    }
  }

  pub fn values(mut self, values: &[(ParameterIndex, f32)]) -> Self {
    self.values.extend_from_slice(values);
    self
  }

  pub fn fill(mut self, range: Range<ParameterIndex>, value: f32) -> Self {
    self.fill = Some(Fill {
      from: range.start,
      to: range.end,
      value,
    });
    self
  }
}

impl OverrideTable {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn from_pairs<I>(pairs: I) -> Result<Self>
  where
    I: IntoIterator<Item = (ParameterIndex, f32)>,
  {
    let mut table = Self::new();
    table.extend_pairs(pairs)?;
    Ok(table)
  }

  /// Concatenates groups in order. The first invalid value aborts with
  /// [`Error::InvalidParameterValue`].
  pub fn from_groups(groups: &[OverrideGroup]) -> Result<Self> {
    let mut table = Self::new();
    for group in groups {
      table.extend_pairs(group.values.iter().copied())?;
      if let Some(fill) = &group.fill {
        if fill.from >= fill.to {
          let shape = if fill.from == fill.to { "empty" } else { "reversed" };
          return Err(Error::Configuration(format!(
            "override group '{}' has a {} fill range {}..{}",
            group.name, shape, fill.from, fill.to
          )));
        }
        table.fill(fill.from..fill.to, fill.value)?;
      }
      log::debug!("override group '{}' -> {} entries so far", group.name, table.len());
    }
    Ok(table)
  }

  pub fn push(&mut self, index: ParameterIndex, value: f32) -> Result<&mut Self> {
    let value = NormalizedValue::new(index, value)?;
    self.entries.push((index, value));
    Ok(self)
  }

  pub fn extend_pairs<I>(&mut self, pairs: I) -> Result<&mut Self>
  where
    I: IntoIterator<Item = (ParameterIndex, f32)>,
  {
    for (index, value) in pairs {
      self.push(index, value)?;
    }
    Ok(self)
  }

  pub fn fill(&mut self, range: Range<ParameterIndex>, value: f32) -> Result<&mut Self> {
    self.extend_pairs(range.map(|index| (index, value)))
  }

  pub fn entries(&self) -> &[(ParameterIndex, NormalizedValue)] {
    &self.entries
  }

  pub fn len(&self) -> usize {
    self.entries.len()
  }

  pub fn is_empty(&self) -> bool {
    self.entries.is_empty()
  }

  /// Collapse the sequence into one value per index, last write wins.
  pub fn resolve(&self) -> BTreeMap<ParameterIndex, NormalizedValue> {
    self.entries.iter().fold(BTreeMap::new(), |mut resolved, (index, value)| {
      resolved.insert(*index, *value);
      resolved
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_last_write_wins() {
    let table = OverrideTable::from_pairs(vec![(3, 0.1), (5, 0.2), (3, 0.9), (5, 0.4), (3, 0.5)]).unwrap();
    let resolved = table.resolve();
    assert_eq!(table.len(), 5);
    assert_eq!(resolved.len(), 2);
    assert_eq!(resolved[&3].get(), 0.5);
    assert_eq!(resolved[&5].get(), 0.4);
  }

  #[test]
  fn test_fill_then_explicit_override() {
    let mut table = OverrideTable::new();
    table.fill(10..14, 0.0).unwrap();
    table.push(12, 0.75).unwrap();
    let resolved = table.resolve();
    assert_eq!(resolved.keys().copied().collect::<Vec<_>>(), vec![10, 11, 12, 13]);
    assert_eq!(resolved[&12].get(), 0.75);
    assert_eq!(resolved[&13].get(), 0.0);
  }

  #[test]
  fn test_groups_concatenate_in_order() {
    let groups = vec![
      OverrideGroup::new("global").values(&[(0, 1.0), (4, 0.5)]),
      OverrideGroup::new("lfo off").fill(3..6, 0.0),
    ];
    let resolved = OverrideTable::from_groups(&groups).unwrap().resolve();
    assert_eq!(resolved[&0].get(), 1.0);
    assert_eq!(resolved[&4].get(), 0.0);
    assert_eq!(resolved.len(), 4);
  }

  #[test]
  fn test_invalid_value_names_its_index() {
    let groups = vec![OverrideGroup::new("bad").values(&[(0, 0.5), (9, 2.0)])];
    match OverrideTable::from_groups(&groups) {
      Err(Error::InvalidParameterValue { index, .. }) => assert_eq!(index, 9),
      other => panic!("expected InvalidParameterValue, got {:?}", other),
    }
  }

  #[test]
  fn test_fill_range_must_cover_something() {
    for (from, to, shape) in [(5, 2, "reversed"), (4, 4, "empty")] {
      let mut group = OverrideGroup::new("lfo off");
      group.fill = Some(Fill { from, to, value: 0.0 });
      let groups = vec![group];
      match OverrideTable::from_groups(&groups) {
        Err(Error::Configuration(message)) => {
          assert!(message.contains(shape), "{}", message);
          assert!(message.contains("lfo off"), "{}", message);
        }
        other => panic!("expected Configuration, got {:?}", other),
      }
    }
  }

  #[test]
  fn test_group_json_shape() {
    let text = r#"{"name": "ops", "values": [[1, 0.25]], "fill": {"from": 2, "to": 4, "value": 0.0}}"#;
    let group: OverrideGroup = serde_json::from_str(text).unwrap();
    let resolved = OverrideTable::from_groups(&[group]).unwrap().resolve();
    assert_eq!(resolved.len(), 3);
    assert_eq!(resolved[&1].get(), 0.25);
  }
}
