//! Many-objective search in the style of NSGA-III: non-dominated sorting with reference
//! point niching to keep the front spread out.

use rand::seq::SliceRandom;
use rand::Rng;
use rayon::prelude::*;

use super::{target_rng, vary, GaConfig, Objectives};
use crate::audio::AudioBuffer;
use crate::error::Result;
use crate::estimator::Estimator;
use crate::features::FeatureConfig;
use crate::synth::Synth;

pub fn default_objectives() -> Vec<FeatureConfig> {
  vec![FeatureConfig::mfcc(), FeatureConfig::spectral_summarized(), FeatureConfig::fft()]
}

#[derive(Clone, Debug, PartialEq)]
pub struct Candidate {
  pub patch: Vec<f32>,
  pub objectives: Vec<f32>,
}

pub struct Nsga {
  synth: Synth,
  extractors: Vec<FeatureConfig>,
  config: GaConfig,
  divisions: usize,
  seed: Option<u64>,
}

fn dominates(a: &[f32], b: &[f32]) -> bool {
  a.iter().zip(b).all(|(x, y)| x <= y) && a.iter().zip(b).any(|(x, y)| x < y)
}

/// Indices grouped by front, best front first.
pub fn non_dominated_sort(points: &[Vec<f32>]) -> Vec<Vec<usize>> {
  let n = points.len();
  let mut dominated_by: Vec<Vec<usize>> = vec![Vec::new(); n];
  let mut counts = vec![0usize; n];
  for i in 0..n {
    for j in (i + 1)..n {
      if dominates(&points[i], &points[j]) {
        dominated_by[i].push(j);
        counts[j] += 1;
      } else if dominates(&points[j], &points[i]) {
        dominated_by[j].push(i);
        counts[i] += 1;
      }
    }
  }

  let mut fronts = Vec::new();
  let mut current: Vec<usize> = (0..n).filter(|&i| counts[i] == 0).collect();
  while !current.is_empty() {
    let mut next = Vec::new();
    for &i in &current {
      for &j in &dominated_by[i] {
        counts[j] -= 1;
        if counts[j] == 0 {
          next.push(j);
        }
      }
    }
    fronts.push(current);
    current = next;
  }
  fronts
}

/// Das-Dennis points on the unit simplex with `divisions` steps per objective.
pub fn reference_points(objectives: usize, divisions: usize) -> Vec<Vec<f32>> {
  fn recurse(left: usize, depth: usize, divisions: usize, prefix: &mut Vec<usize>, out: &mut Vec<Vec<f32>>) {
    if depth == 1 {
      prefix.push(left);
      out.push(prefix.iter().map(|&k| k as f32 / divisions as f32).collect());
      prefix.pop();
      return;
    }
    for k in 0..=left {
      prefix.push(k);
      recurse(left - k, depth - 1, divisions, prefix, out);
      prefix.pop();
    }
  }

  let mut out = Vec::new();
  if objectives > 0 {
    recurse(divisions, objectives, divisions.max(1), &mut Vec::new(), &mut out);
  }
  out
}

/// Objectives scaled so the ideal point maps to 0 and the nadir to 1 per axis.
pub fn normalise(points: &[Vec<f32>]) -> Vec<Vec<f32>> {
  let m = points.first().map(|p| p.len()).unwrap_or(0);
  let ideal: Vec<f32> = (0..m).map(|k| points.iter().map(|p| p[k]).fold(f32::INFINITY, f32::min)).collect();
  let nadir: Vec<f32> = (0..m).map(|k| points.iter().map(|p| p[k]).fold(f32::NEG_INFINITY, f32::max)).collect();
  points
    .iter()
    .map(|p| {
      p.iter()
        .zip(ideal.iter().zip(&nadir))
        .map(|(v, (lo, hi))| {
          let span = hi - lo;
          if span > f32::EPSILON {
            (v - lo) / span
          } else {
            0.0
          }
        })
        .collect()
    })
    .collect()
}

/// Nearest reference direction and the perpendicular distance to it.
fn associate(point: &[f32], references: &[Vec<f32>]) -> (usize, f32) {
  let mut best = (0, f32::INFINITY);
  for (r, reference) in references.iter().enumerate() {
    let norm_sq: f32 = reference.iter().map(|w| w * w).sum();
    if norm_sq == 0.0 {
      continue;
    }
    let t = point.iter().zip(reference).map(|(p, w)| p * w).sum::<f32>() / norm_sq;
    let dist = point.iter().zip(reference).map(|(p, w)| (p - t * w).powi(2)).sum::<f32>().sqrt();
    if dist < best.1 {
      best = (r, dist);
    }
  }
  best
}

/// Pick `size` survivors from `points`: whole fronts while they fit, then niche by
/// reference direction within the front that overflows.
pub fn select<R: Rng + ?Sized>(points: &[Vec<f32>], size: usize, references: &[Vec<f32>], rng: &mut R) -> Vec<usize> {
  let fronts = non_dominated_sort(points);
  let mut chosen: Vec<usize> = Vec::with_capacity(size);
  let mut last: Vec<usize> = Vec::new();
  for front in fronts {
    if chosen.len() + front.len() <= size {
      chosen.extend(front);
    } else {
      last = front;
      break;
    }
  }
  if chosen.len() == size || last.is_empty() {
    return chosen;
  }

  let considered: Vec<usize> = chosen.iter().chain(&last).copied().collect();
  let normalised = normalise(&considered.iter().map(|&i| points[i].clone()).collect::<Vec<_>>());
  let associations: Vec<(usize, f32)> = normalised.iter().map(|p| associate(p, references)).collect();

  let mut niche = vec![0usize; references.len()];
  for &(r, _) in &associations[..chosen.len()] {
    niche[r] += 1;
  }
  // (position in `last`, reference, distance)
  let mut pending: Vec<(usize, usize, f32)> = associations[chosen.len()..]
    .iter()
    .enumerate()
    .map(|(k, &(r, d))| (k, r, d))
    .collect();

  let mut open: Vec<usize> = (0..references.len()).collect();
  while chosen.len() < size && !pending.is_empty() {
    let fewest = open.iter().map(|&r| niche[r]).min().unwrap_or(0);
    let mut candidates: Vec<usize> = open.iter().copied().filter(|&r| niche[r] == fewest).collect();
    candidates.shuffle(rng);
    let reference = match candidates.first() {
      Some(&r) => r,
      None => break,
    };

    let members: Vec<usize> = (0..pending.len()).filter(|&p| pending[p].1 == reference).collect();
    if members.is_empty() {
      open.retain(|&r| r != reference);
      continue;
    }
    let pick = if niche[reference] == 0 {
      members
        .iter()
        .copied()
        .min_by(|&a, &b| pending[a].2.total_cmp(&pending[b].2))
        .unwrap_or(members[0])
    } else {
      members[rng.gen_range(0..members.len())]
    };
    let (k, _, _) = pending.swap_remove(pick);
    chosen.push(last[k]);
    niche[reference] += 1;
  }
  chosen
}

/// Rank-0 member with the smallest sum of normalised objectives.
pub fn representative(population: &[Candidate]) -> Option<&Candidate> {
  let points: Vec<Vec<f32>> = population.iter().map(|c| c.objectives.clone()).collect();
  let front = non_dominated_sort(&points).into_iter().next()?;
  let normalised = normalise(&points);
  front
    .into_iter()
    .min_by(|&a, &b| {
      let sa: f32 = normalised[a].iter().sum();
      let sb: f32 = normalised[b].iter().sum();
      sa.total_cmp(&sb)
    })
    .map(|i| &population[i])
}

fn evaluate(synth: &Synth, objectives: &Objectives, patches: Vec<Vec<f32>>) -> Result<Vec<Candidate>> {
  patches
    .into_par_iter()
    .map(|patch| {
      let objectives = objectives.score(synth, &patch)?;
      Ok(Candidate { patch, objectives })
    })
    .collect()
}

impl Nsga {
  pub fn new(synth: Synth, extractors: Vec<FeatureConfig>, config: GaConfig, seed: Option<u64>) -> Result<Self> {
    config.validate()?;
    for extractor in &extractors {
      extractor.validate()?;
    }
    Ok(Nsga {
      synth,
      extractors,
      config,
      divisions: 12,
      seed,
    })
  }

  pub fn with_divisions(mut self, divisions: usize) -> Self {
    self.divisions = divisions.max(1);
    self
  }

  pub fn search(&self, index: usize, target: &AudioBuffer) -> Result<Candidate> {
    let mut rng = target_rng(self.seed, index);
    let objectives = Objectives::new(&self.extractors, target)?;
    let references = reference_points(objectives.len(), self.divisions);
    let config = &self.config;

    let initial = (0..config.pop_size).map(|_| self.synth.random_patch(&mut rng)).collect();
    let mut population = evaluate(&self.synth, &objectives, initial)?;

    for generation in 0..config.ngen {
      let mut parents: Vec<Vec<f32>> = (0..config.pop_size)
        .map(|_| population[rng.gen_range(0..population.len())].patch.clone())
        .collect();
      parents.shuffle(&mut rng);
      let offspring = evaluate(&self.synth, &objectives, vary(parents, config, &mut rng))?;

      population.extend(offspring);
      let points: Vec<Vec<f32>> = population.iter().map(|c| c.objectives.clone()).collect();
      let survivors = select(&points, config.pop_size, &references, &mut rng);
      let mut pool: Vec<Option<Candidate>> = population.into_iter().map(Some).collect();
      population = survivors.into_iter().filter_map(|i| pool[i].take()).collect();
      log::debug!("nsga target {} generation {}: {} survivors", index, generation, population.len());
    }

    let best = representative(&population).cloned().unwrap_or_else(|| Candidate {
      patch: self.synth.patch(),
      objectives: vec![f32::INFINITY; objectives.len()],
    });
    log::info!("nsga target {}: representative objectives {:?}", index, best.objectives);
    Ok(best)
  }
}

impl Estimator for Nsga {
  fn name(&self) -> &str {
    "nsga"
  }

  fn predict(&self, index: usize, target: &AudioBuffer) -> Result<Vec<f32>> {
    Ok(self.search(index, target)?.patch)
  }
}
