//! Cross-estimator evaluation in MFCC space.

use std::collections::BTreeSet;
use std::path::Path;

use itertools::izip;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::audio::AudioSet;
use crate::error::{Error, Result};
use crate::features::{FeatureConfig, FeatureExtractor};
use crate::files;
use crate::tensor::Tensor;

pub const METRICS: [&str; 4] = ["mean_abs_error", "mean_squared_error", "euclidean_distance", "manhattan_distance"];

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Metrics {
  pub mean_abs_error: f32,
  pub mean_squared_error: f32,
  pub euclidean_distance: f32,
  pub manhattan_distance: f32,
}

impl Metrics {
  pub fn between(target: &Tensor, estimate: &Tensor) -> Result<Metrics> {
    if target.shape != estimate.shape {
      return Err(Error::Shape(format!(
        "target features {:?} and estimate features {:?} differ",
        target.shape, estimate.shape
      )));
    }
    let n = target.len().max(1) as f32;
    let (abs_sum, sq_sum) = izip!(&target.data, &estimate.data)
      .fold((0f32, 0f32), |(a, s), (x, y)| (a + (x - y).abs(), s + (x - y).powi(2)));
    Ok(Metrics {
      mean_abs_error: abs_sum / n,
      mean_squared_error: sq_sum / n,
      euclidean_distance: sq_sum.sqrt(),
      manhattan_distance: abs_sum,
    })
  }

  pub fn get(&self, metric: &str) -> Option<f32> {
    match metric {
      "mean_abs_error" => Some(self.mean_abs_error),
      "mean_squared_error" => Some(self.mean_squared_error),
      "euclidean_distance" => Some(self.euclidean_distance),
      "manhattan_distance" => Some(self.manhattan_distance),
      _ => None,
    }
  }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Stats {
  pub mean: f32,
  pub median: f32,
  pub std_dev: f32,
  pub variance: f32,
  pub min: f32,
  pub max: f32,
}

impl Stats {
  pub fn of(values: &[f32]) -> Stats {
    if values.is_empty() {
      return Stats {
        mean: f32::NAN,
        median: f32::NAN,
        std_dev: f32::NAN,
        variance: f32::NAN,
        min: f32::NAN,
        max: f32::NAN,
      };
    }
    let n = values.len() as f32;
    let mean = values.iter().sum::<f32>() / n;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f32>() / n;
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let mid = sorted.len() / 2;
    let median = if sorted.len() % 2 == 0 {
      (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
      sorted[mid]
    };
    Stats {
      mean,
      median,
      std_dev: variance.sqrt(),
      variance,
      min: sorted[0],
      max: sorted[sorted.len() - 1],
    }
  }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ScoreRow {
  pub estimator: String,
  pub target: usize,
  #[serde(flatten)]
  pub metrics: Metrics,
}

pub struct Evaluation {
  targets: AudioSet,
  estimations: Vec<(String, AudioSet)>,
  extractor: FeatureConfig,
  scores: Vec<ScoreRow>,
}

impl Evaluation {
  /// Pairs each estimator's estimates with the targets by key. Fails on the first estimator
  /// whose keys differ from the target keys.
  pub fn new(targets: AudioSet, estimations: Vec<(String, AudioSet)>) -> Result<Self> {
    if targets.is_empty() {
      return Err(Error::Configuration("no evaluation targets".to_string()));
    }
    let expected: BTreeSet<usize> = targets.indices().into_iter().collect();
    let mut seen = BTreeSet::new();
    for (name, estimates) in &estimations {
      if !seen.insert(name.as_str()) {
        return Err(Error::Configuration(format!("estimator {} listed twice", name)));
      }
      let keys: BTreeSet<usize> = estimates.indices().into_iter().collect();
      if keys != expected {
        let missing: Vec<usize> = expected.difference(&keys).copied().collect();
        let extra: Vec<usize> = keys.difference(&expected).copied().collect();
        return Err(Error::OrderingMismatch {
          estimator: name.clone(),
          detail: format!("missing targets {:?}, unknown targets {:?}", missing, extra),
        });
      }
    }
    Ok(Evaluation {
      targets,
      estimations,
      extractor: FeatureConfig::mfcc(),
      scores: Vec::new(),
    })
  }

  pub fn with_extractor(mut self, extractor: FeatureConfig) -> Self {
    self.extractor = extractor;
    self
  }

  pub fn scores(&self) -> &[ScoreRow] {
    &self.scores
  }

  /// Score every (estimator, target) pair. Rows come out grouped by estimator in the order
  /// given, then by ascending target index.
  pub fn evaluate(&mut self) -> Result<()> {
    let target_features: Vec<(usize, Tensor)> = self
      .targets
      .iter()
      .collect::<Vec<_>>()
      .par_iter()
      .map(|&(index, audio)| Ok((index, self.extractor.extract(audio)?)))
      .collect::<Result<Vec<_>>>()?;

    let mut pairs = Vec::new();
    for (name, estimates) in &self.estimations {
      for (index, target) in &target_features {
        pairs.push((name.as_str(), *index, target, estimates));
      }
    }

    let targets = &self.targets;
    let extractor = &self.extractor;
    self.scores = pairs
      .par_iter()
      .map(|&(name, index, target, estimates)| {
        let reference = targets.get(index).ok_or_else(|| Error::OrderingMismatch {
          estimator: name.to_string(),
          detail: format!("target {} disappeared", index),
        })?;
        let estimate = estimates.get(index).ok_or_else(|| Error::OrderingMismatch {
          estimator: name.to_string(),
          detail: format!("no estimate for target {}", index),
        })?;
        let estimate = estimate.conform(reference.sample_rate(), reference.len())?;
        Ok(ScoreRow {
          estimator: name.to_string(),
          target: index,
          metrics: Metrics::between(target, &extractor.extract(&estimate)?)?,
        })
      })
      .collect::<Result<Vec<_>>>()?;

    log::info!(
      "scored {} estimators against {} targets",
      self.estimations.len(),
      self.targets.len()
    );
    Ok(())
  }

  /// `estimator -> metric -> stats`, estimators in the order given.
  pub fn stats(&self) -> Map<String, Value> {
    let mut report = Map::new();
    for (name, _) in &self.estimations {
      let rows: Vec<&ScoreRow> = self.scores.iter().filter(|r| &r.estimator == name).collect();
      let mut per_metric = Map::new();
      for metric in METRICS {
        let values: Vec<f32> = rows.iter().filter_map(|r| r.metrics.get(metric)).collect();
        let stats = serde_json::to_value(Stats::of(&values)).unwrap_or(Value::Null);
        per_metric.insert(metric.to_string(), stats);
      }
      report.insert(name.clone(), Value::Object(per_metric));
    }
    report
  }

  pub fn save_stats_json(&self, path: &Path) -> Result<()> {
    self.require_scores()?;
    files::write_json(path, &self.stats())?;
    log::info!("wrote evaluation stats to {}", path.display());
    Ok(())
  }

  pub fn save_scores_json(&self, path: &Path) -> Result<()> {
    self.require_scores()?;
    files::write_json(path, &self.scores)?;
    log::info!("wrote {} evaluation scores to {}", self.scores.len(), path.display());
    Ok(())
  }

  fn require_scores(&self) -> Result<()> {
    if self.scores.is_empty() && !self.estimations.is_empty() {
      return Err(Error::Configuration("evaluate() must run before writing reports".to_string()));
    }
    Ok(())
  }
}
