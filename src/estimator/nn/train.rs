use std::path::Path;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use super::{Model, Network, NeuralFamily};
use super::optim::Adam;
use crate::dataset::DatasetSplit;
use crate::error::{Error, Result};
use crate::files;

/// Samples per rayon task inside a batch. Partial gradients are summed in task order, so a
/// run gives the same weights on any number of threads.
const GRADIENT_CHUNK: usize = 8;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingConfig {
  pub epochs: usize,
  pub batch_size: usize,
  pub learning_rate: f32,
  /// Epochs without a validation improvement before training stops.
  pub patience: usize,
  pub mlp_layers: Vec<usize>,
  pub lstm_units: usize,
  pub highway_layers: usize,
}

impl Default for TrainingConfig {
  fn default() -> Self {
    TrainingConfig {
      epochs: 100,
      batch_size: 64,
      learning_rate: 0.001,
      patience: 10,
      mlp_layers: vec![50, 40, 30],
      lstm_units: 64,
      highway_layers: 6,
    }
  }
}

impl TrainingConfig {
  pub fn validate(&self) -> Result<()> {
    if self.epochs == 0 || self.batch_size == 0 {
      return Err(Error::Configuration("training epochs and batch_size must be positive".to_string()));
    }
    if !(self.learning_rate > 0.0) {
      return Err(Error::Configuration(format!("learning rate {} must be positive", self.learning_rate)));
    }
    if self.lstm_units == 0 || self.mlp_layers.iter().any(|&u| u == 0) {
      return Err(Error::Configuration("layer widths must be positive".to_string()));
    }
    Ok(())
  }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EpochRecord {
  pub epoch: usize,
  pub loss: f32,
  pub val_loss: f32,
  pub mae: f32,
  pub val_mae: f32,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TrainingLog {
  pub family: NeuralFamily,
  pub epochs: Vec<EpochRecord>,
  pub best_epoch: usize,
  pub stopped_early: bool,
}

impl TrainingLog {
  pub fn save(&self, path: &Path) -> Result<()> {
    files::write_json(path, self)
  }
}

/// Inputs shaped for `family`: one flat row per sample, plus the per-item shape the model
/// is built with.
pub fn model_input_shape(family: NeuralFamily, split: &DatasetSplit) -> Result<Vec<usize>> {
  let item = split.features.item_shape();
  if family.is_sequence() {
    if item.len() != 2 {
      return Err(Error::Shape(format!(
        "{} needs features shaped [n, frames, coefficients], dataset has {:?}",
        family, split.features.shape
      )));
    }
    Ok(item.to_vec())
  } else {
    Ok(vec![item.iter().product()])
  }
}

fn check_split(model: &Model, split: &DatasetSplit, name: &str) -> Result<()> {
  if split.is_empty() {
    return Err(Error::Shape(format!("{} split is empty", name)));
  }
  if split.features.row_len() != model.input_len() || split.patches.row_len() != model.output_size {
    return Err(Error::Shape(format!(
      "{} split rows are {} features -> {} parameters, model expects {} -> {}",
      name,
      split.features.row_len(),
      split.patches.row_len(),
      model.input_len(),
      model.output_size
    )));
  }
  Ok(())
}

/// Mean loss and mean absolute error over `split` without touching the weights.
fn evaluate(network: &Network, split: &DatasetSplit) -> (f32, f32) {
  let (loss, mae) = (0..split.len())
    .into_par_iter()
    .map(|i| {
      let y = network.predict(split.features.row(i));
      let target = split.patches.row(i);
      let n = y.len() as f32;
      let loss = y.iter().zip(target).map(|(a, b)| (a - b).powi(2)).sum::<f32>() / n;
      let mae = y.iter().zip(target).map(|(a, b)| (a - b).abs()).sum::<f32>() / n;
      (loss as f64, mae as f64)
    })
    .collect::<Vec<_>>()
    .into_iter()
    .fold((0.0, 0.0), |acc, (l, m)| (acc.0 + l, acc.1 + m));
  let n = split.len() as f64;
  ((loss / n) as f32, (mae / n) as f32)
}

/// Train `model` on `train`, validating on `test` after every epoch.
///
/// Stops once validation loss has not improved for `patience` epochs and restores the
/// weights from the best epoch.
pub fn fit(
  model: &mut Model,
  train: &DatasetSplit,
  test: &DatasetSplit,
  config: &TrainingConfig,
  seed: Option<u64>,
) -> Result<TrainingLog> {
  config.validate()?;
  check_split(model, train, "train")?;
  check_split(model, test, "test")?;

  let mut rng = match seed {
    Some(seed) => StdRng::seed_from_u64(seed),
    None => StdRng::from_entropy(),
  };
  let mut adam = Adam::new(config.learning_rate, model.network.tensors().iter().map(|t| t.len()));
  let mut order: Vec<usize> = (0..train.len()).collect();

  let mut log = TrainingLog {
    family: model.family,
    epochs: Vec::with_capacity(config.epochs),
    best_epoch: 0,
    stopped_early: false,
  };
  let mut best: Option<(f32, Network)> = None;
  let mut waited = 0;

  for epoch in 1..=config.epochs {
    order.shuffle(&mut rng);
    let mut loss_sum = 0f64;
    let mut mae_sum = 0f64;

    for batch in order.chunks(config.batch_size) {
      let network = &model.network;
      let partials: Vec<(Network, f64, f64)> = batch
        .par_chunks(GRADIENT_CHUNK)
        .map(|chunk| {
          let mut grads = network.zeros_like();
          let mut loss = 0f64;
          let mut mae = 0f64;
          for &i in chunk {
            let (l, m) = network.accumulate(train.features.row(i), train.patches.row(i), &mut grads);
            loss += l as f64;
            mae += m as f64;
          }
          (grads, loss, mae)
        })
        .collect();

      let mut partials = partials.into_iter();
      let (mut grads, mut loss, mut mae) = match partials.next() {
        Some(first) => first,
        None => continue,
      };
      for (g, l, m) in partials {
        grads.add_assign(&g);
        loss += l;
        mae += m;
      }
      loss_sum += loss;
      mae_sum += mae;

      adam.update(model.network.tensors_mut(), grads.tensors(), 1.0 / batch.len() as f32);
    }

    let n = train.len() as f64;
    let (val_loss, val_mae) = evaluate(&model.network, test);
    let record = EpochRecord {
      epoch,
      loss: (loss_sum / n) as f32,
      val_loss,
      mae: (mae_sum / n) as f32,
      val_mae,
    };
    log::info!(
      "{} epoch {}/{}: loss {:.5} mae {:.5} val_loss {:.5} val_mae {:.5}",
      model.family,
      epoch,
      config.epochs,
      record.loss,
      record.mae,
      record.val_loss,
      record.val_mae
    );
    log.epochs.push(record);

    if !val_loss.is_finite() {
      return Err(Error::Shape(format!("{} training diverged at epoch {}", model.family, epoch)));
    }
    let improved = best.as_ref().map_or(true, |(b, _)| val_loss < *b);
    if improved {
      best = Some((val_loss, model.network.clone()));
      log.best_epoch = epoch;
      waited = 0;
    } else {
      waited += 1;
      if waited >= config.patience {
        log::info!("{}: no improvement for {} epochs, stopping", model.family, waited);
        log.stopped_early = true;
        break;
      }
    }
  }

  if let Some((val_loss, network)) = best {
    log::info!("{}: keeping weights from epoch {} (val_loss {:.5})", model.family, log.best_epoch, val_loss);
    model.network = network;
  }
  Ok(log)
}
