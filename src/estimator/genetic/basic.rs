use rand::Rng;
use rayon::prelude::*;

use super::{target_rng, vary, GaConfig, Objectives};
use crate::audio::AudioBuffer;
use crate::error::Result;
use crate::estimator::Estimator;
use crate::features::FeatureConfig;
use crate::synth::Synth;

/// Single-objective GA minimising the mean absolute feature distance to the target.
pub struct BasicGa {
  synth: Synth,
  extractor: FeatureConfig,
  config: GaConfig,
  seed: Option<u64>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Individual {
  pub patch: Vec<f32>,
  pub fitness: f32,
}

fn evaluate(synth: &Synth, objectives: &Objectives, patches: Vec<Vec<f32>>) -> Result<Vec<Individual>> {
  patches
    .into_par_iter()
    .map(|patch| {
      let fitness = objectives.score(synth, &patch)?[0];
      Ok(Individual { patch, fitness })
    })
    .collect()
}

fn tournament<'p, R: Rng + ?Sized>(population: &'p [Individual], size: usize, rng: &mut R) -> &'p Individual {
  let mut best = &population[rng.gen_range(0..population.len())];
  for _ in 1..size {
    let challenger = &population[rng.gen_range(0..population.len())];
    if challenger.fitness < best.fitness {
      best = challenger;
    }
  }
  best
}

impl BasicGa {
  pub fn new(synth: Synth, extractor: FeatureConfig, config: GaConfig, seed: Option<u64>) -> Result<Self> {
    config.validate()?;
    extractor.validate()?;
    Ok(BasicGa {
      synth,
      extractor,
      config,
      seed,
    })
  }

  pub fn search(&self, index: usize, target: &AudioBuffer) -> Result<Individual> {
    let mut rng = target_rng(self.seed, index);
    let objectives = Objectives::new(std::slice::from_ref(&self.extractor), target)?;
    let config = &self.config;

    let initial = (0..config.pop_size).map(|_| self.synth.random_patch(&mut rng)).collect();
    let mut population = evaluate(&self.synth, &objectives, initial)?;

    for generation in 0..config.ngen {
      population.sort_by(|a, b| a.fitness.total_cmp(&b.fitness));
      let parents = (config.elites..config.pop_size)
        .map(|_| tournament(&population, config.tournament_size, &mut rng).patch.clone())
        .collect();
      let children = evaluate(&self.synth, &objectives, vary(parents, config, &mut rng))?;

      population.truncate(config.elites);
      population.extend(children);
      log::debug!(
        "ga target {} generation {}: best {:.5}",
        index,
        generation,
        population.iter().map(|i| i.fitness).fold(f32::INFINITY, f32::min)
      );
    }

    let best = population
      .into_iter()
      .min_by(|a, b| a.fitness.total_cmp(&b.fitness))
      .unwrap_or_else(|| Individual {
        patch: self.synth.patch(),
        fitness: f32::INFINITY,
      });
    log::info!("ga target {}: best fitness {:.5}", index, best.fitness);
    Ok(best)
  }
}

impl Estimator for BasicGa {
  fn name(&self) -> &str {
    "ga"
  }

  fn predict(&self, index: usize, target: &AudioBuffer) -> Result<Vec<f32>> {
    Ok(self.search(index, target)?.patch)
  }
}
