//! Search estimators: candidates are rendered through the synth and scored against the target
//! in feature space, so no training data is needed.

pub mod basic;
pub mod nsga;

use rand::rngs::StdRng;
use rand::Rng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};

use crate::audio::AudioBuffer;
use crate::error::{Error, Result};
use crate::features::{FeatureConfig, FeatureExtractor};
use crate::synth::Synth;
use crate::tensor::Tensor;

pub use basic::BasicGa;
pub use nsga::Nsga;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GaConfig {
  pub pop_size: usize,
  pub ngen: usize,
  /// Chance a selected pair is recombined.
  pub crossover_prob: f32,
  /// Chance an offspring is mutated at all.
  pub mutation_prob: f32,
  /// Chance each gene of a mutated offspring is perturbed.
  pub gene_mutation_prob: f32,
  pub mutation_sigma: f32,
  pub tournament_size: usize,
  pub elites: usize,
}

impl Default for GaConfig {
  fn default() -> Self {
    GaConfig {
      pop_size: 300,
      ngen: 100,
      crossover_prob: 0.5,
      mutation_prob: 0.2,
      gene_mutation_prob: 0.1,
      mutation_sigma: 0.1,
      tournament_size: 3,
      elites: 1,
    }
  }
}

impl GaConfig {
  pub fn validate(&self) -> Result<()> {
    if self.pop_size < 2 || self.ngen == 0 {
      return Err(Error::Configuration(format!(
        "GA needs pop_size >= 2 and ngen >= 1, got {} and {}",
        self.pop_size, self.ngen
      )));
    }
    if self.tournament_size == 0 || self.elites >= self.pop_size {
      return Err(Error::Configuration("GA tournament_size must be positive and elites below pop_size".to_string()));
    }
    let probs = [self.crossover_prob, self.mutation_prob, self.gene_mutation_prob];
    if probs.iter().any(|p| !(0.0..=1.0).contains(p)) || !(self.mutation_sigma >= 0.0) {
      return Err(Error::Configuration("GA probabilities must lie in [0, 1]".to_string()));
    }
    Ok(())
  }
}

/// One RNG per target, so parallel matches do not depend on scheduling.
pub fn target_rng(seed: Option<u64>, index: usize) -> StdRng {
  match seed {
    Some(seed) => StdRng::seed_from_u64(seed.wrapping_add(index as u64)),
    None => StdRng::from_entropy(),
  }
}

/// Standard normal draw (Box-Muller).
pub fn gaussian<R: Rng + ?Sized>(rng: &mut R) -> f32 {
  let u1: f32 = rng.gen_range(f32::EPSILON..1.0);
  let u2: f32 = rng.gen();
  (-2.0 * u1.ln()).sqrt() * (crate::synth::pi2 * u2).cos()
}

/// Blend crossover: each gene pair is mixed with a weight drawn from `[-alpha, 1 + alpha]`.
pub fn blend<R: Rng + ?Sized>(a: &mut [f32], b: &mut [f32], alpha: f32, rng: &mut R) {
  for (x, y) in a.iter_mut().zip(b.iter_mut()) {
    let gamma = (1.0 + 2.0 * alpha) * rng.gen::<f32>() - alpha;
    let (ox, oy) = (*x, *y);
    *x = ((1.0 - gamma) * ox + gamma * oy).clamp(0.0, 1.0);
    *y = (gamma * ox + (1.0 - gamma) * oy).clamp(0.0, 1.0);
  }
}

pub fn mutate<R: Rng + ?Sized>(genes: &mut [f32], config: &GaConfig, rng: &mut R) {
  for gene in genes.iter_mut() {
    if rng.gen::<f32>() < config.gene_mutation_prob {
      *gene = (*gene + config.mutation_sigma * gaussian(rng)).clamp(0.0, 1.0);
    }
  }
}

/// Recombine and mutate `parents` pairwise into the same number of children.
pub fn vary<R: Rng + ?Sized>(parents: Vec<Vec<f32>>, config: &GaConfig, rng: &mut R) -> Vec<Vec<f32>> {
  let mut children = parents;
  for pair in children.chunks_mut(2) {
    if let [a, b] = pair {
      if rng.gen::<f32>() < config.crossover_prob {
        blend(a, b, 0.5, rng);
      }
    }
  }
  for child in children.iter_mut() {
    if rng.gen::<f32>() < config.mutation_prob {
      mutate(child, config, rng);
    }
  }
  children
}

/// Mean absolute difference between equally shaped feature tensors.
pub fn feature_distance(a: &Tensor, b: &Tensor) -> Result<f32> {
  if a.shape != b.shape {
    return Err(Error::Shape(format!("cannot compare features {:?} with {:?}", a.shape, b.shape)));
  }
  if a.is_empty() {
    return Ok(0.0);
  }
  Ok(a.data.iter().zip(&b.data).map(|(x, y)| (x - y).abs()).sum::<f32>() / a.len() as f32)
}

/// Feature spaces a candidate is scored in, with the target's features in each.
pub struct Objectives {
  extractors: Vec<FeatureConfig>,
  target: Vec<Tensor>,
}

impl Objectives {
  pub fn new(extractors: &[FeatureConfig], target: &AudioBuffer) -> Result<Self> {
    if extractors.is_empty() {
      return Err(Error::Configuration("a search estimator needs at least one feature space".to_string()));
    }
    let target = extractors.iter().map(|e| e.extract(target)).collect::<Result<Vec<_>>>()?;
    Ok(Objectives {
      extractors: extractors.to_vec(),
      target,
    })
  }

  pub fn len(&self) -> usize {
    self.extractors.len()
  }

  pub fn is_empty(&self) -> bool {
    self.extractors.is_empty()
  }

  /// Render `patch` and measure its distance to the target in every feature space.
  pub fn score(&self, synth: &Synth, patch: &[f32]) -> Result<Vec<f32>> {
    let audio = synth.render_candidate(patch)?;
    self
      .extractors
      .iter()
      .zip(&self.target)
      .map(|(extractor, target)| feature_distance(&extractor.extract(&audio)?, target))
      .collect()
  }
}
