//! Parameter bookkeeping for a synth's normalised parameter vector.
//!
//! * [`NormalizedValue`] - a validated value in `[0.0, 1.0]`.
//! * [`OverrideTable`] - an ordered list of frozen dimensions, resolved last-write-wins.
//! * [`ParameterState`] - a persisted snapshot of a full parameter vector.

mod overrides;
mod state;

use std::fmt;

use serde::Serialize;

use crate::error::{Error, Result};

pub use overrides::{Fill, OverrideGroup, OverrideTable};
pub use state::ParameterState;

/// One dimension of a synth's parameter vector. Meaning is engine specific.
pub type ParameterIndex = usize;

/// A parameter value in the universal `[0.0, 1.0]` representation.
#[derive(Clone, Copy, Debug, PartialEq, PartialOrd, Serialize)]
#[serde(transparent)]
pub struct NormalizedValue(f32);

impl NormalizedValue {
  /// Rejects NaN and anything outside `[0.0, 1.0]`. Values are never clamped.
  pub fn new(index: ParameterIndex, value: f32) -> Result<Self> {
    if value.is_nan() || !(0.0..=1.0).contains(&value) {
      return Err(Error::InvalidParameterValue { index, value });
    }
    Ok(NormalizedValue(value))
  }

  pub fn get(self) -> f32 {
    self.0
  }
}

impl fmt::Display for NormalizedValue {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.0)
  }
}
