use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// A specialized [`Result`] type for pipeline operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Every failure a pipeline step can raise. None of these are recovered locally: a step that
/// hits one aborts and the run stops.
#[derive(Debug, Error)]
pub enum Error {
  #[error("parameter {index}: value {value} is outside [0.0, 1.0]")]
  InvalidParameterValue { index: usize, value: f32 },

  #[error("parameter index {index} is out of range for {engine} ({count} parameters)")]
  InvalidParameterIndex { index: usize, count: usize, engine: String },

  #[error("configuration: {0}")]
  Configuration(String),

  #[error("failed to read {path}: {source}")]
  IoRead {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("failed to write {path}: {source}")]
  IoWrite {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("malformed synth state {path}: {reason}")]
  StateFormat { path: PathBuf, reason: String },

  #[error("feature scaler not found at {0} (generate the dataset first)")]
  MissingScaler(PathBuf),

  #[error("trained model not found at {0} (train the estimator first)")]
  MissingModel(PathBuf),

  #[error("{artifact} not found at {path}")]
  MissingArtifact { artifact: &'static str, path: PathBuf },

  #[error("estimates from {estimator} do not correspond to targets: {detail}")]
  OrderingMismatch { estimator: String, detail: String },

  #[error("audio file {path}: {source}")]
  Audio {
    path: PathBuf,
    #[source]
    source: hound::Error,
  },

  #[error("malformed artifact {path}: {source}")]
  Artifact {
    path: PathBuf,
    #[source]
    source: serde_json::Error,
  },

  #[error("shape mismatch: {0}")]
  Shape(String),

  #[error("render failed: {0}")]
  Render(String),

  #[error("resampling failed: {0}")]
  Resample(String),
}

impl Error {
  pub fn read(path: impl Into<PathBuf>, source: io::Error) -> Self {
    Error::IoRead { path: path.into(), source }
  }

  pub fn write(path: impl Into<PathBuf>, source: io::Error) -> Self {
    Error::IoWrite { path: path.into(), source }
  }
}
