//! Feed-forward and recurrent regressors from features to patches.

pub mod layers;
pub mod optim;
pub mod train;

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::files;
use crate::tensor::Tensor;

use layers::{Activation, Dense, Highway, HighwayTrace, Lstm};
pub use train::{fit, EpochRecord, TrainingConfig, TrainingLog};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NeuralFamily {
  Mlp,
  Lstm,
  HwyBlstm,
}

impl NeuralFamily {
  pub fn name(self) -> &'static str {
    match self {
      NeuralFamily::Mlp => "mlp",
      NeuralFamily::Lstm => "lstm",
      NeuralFamily::HwyBlstm => "hwy_blstm",
    }
  }

  pub fn is_sequence(self) -> bool {
    !matches!(self, NeuralFamily::Mlp)
  }
}

impl fmt::Display for NeuralFamily {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.name())
  }
}

impl FromStr for NeuralFamily {
  type Err = String;

  fn from_str(name: &str) -> std::result::Result<Self, Self::Err> {
    match name {
      "mlp" => Ok(NeuralFamily::Mlp),
      "lstm" => Ok(NeuralFamily::Lstm),
      "hwy_blstm" => Ok(NeuralFamily::HwyBlstm),
      _ => Err(format!("'{}' is not a trainable model (mlp, lstm, hwy_blstm)", name)),
    }
  }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Network {
  Mlp {
    layers: Vec<Dense>,
  },
  Lstm {
    lstm: Lstm,
    head: Vec<Dense>,
  },
  HwyBlstm {
    forward: Lstm,
    backward: Lstm,
    highways: Vec<Highway>,
    output: Dense,
  },
}

fn dense_stack(layers: &[Dense], x: &[f32]) -> Vec<Vec<f32>> {
  let mut acts = vec![x.to_vec()];
  for layer in layers {
    let next = layer.forward(acts.last().map(|a| a.as_slice()).unwrap_or(&[]));
    acts.push(next);
  }
  acts
}

fn dense_stack_backward(layers: &[Dense], acts: &[Vec<f32>], dy: Vec<f32>, grads: &mut [Dense]) -> Vec<f32> {
  let mut dy = dy;
  for (l, (layer, grad)) in layers.iter().zip(grads.iter_mut()).enumerate().rev() {
    dy = layer.backward(&acts[l], &acts[l + 1], &dy, grad);
  }
  dy
}

/// MSE gradient and the per-sample loss and absolute error.
fn output_error(y: &[f32], target: &[f32]) -> (Vec<f32>, f32, f32) {
  let n = y.len() as f32;
  let dy = y.iter().zip(target).map(|(a, b)| 2.0 * (a - b) / n).collect();
  let loss = y.iter().zip(target).map(|(a, b)| (a - b).powi(2)).sum::<f32>() / n;
  let mae = y.iter().zip(target).map(|(a, b)| (a - b).abs()).sum::<f32>() / n;
  (dy, loss, mae)
}

impl Network {
  /// Fresh weights for `family` mapping inputs of `input_shape` to `outputs` values.
  pub fn build(
    family: NeuralFamily,
    input_shape: &[usize],
    outputs: usize,
    config: &TrainingConfig,
    rng: &mut StdRng,
  ) -> Result<Network> {
    if outputs == 0 {
      return Err(Error::Shape("cannot build a network with no outputs".to_string()));
    }
    if family.is_sequence() && input_shape.len() != 2 {
      return Err(Error::Shape(format!(
        "{} expects features shaped [frames, coefficients], got {:?}",
        family, input_shape
      )));
    }

    let network = match family {
      NeuralFamily::Mlp => {
        let mut width = input_shape.iter().product::<usize>();
        let mut layers = Vec::with_capacity(config.mlp_layers.len() + 1);
        for &units in &config.mlp_layers {
          layers.push(Dense::new(width, units, Activation::Relu, rng));
          width = units;
        }
        layers.push(Dense::new(width, outputs, Activation::Sigmoid, rng));
        Network::Mlp { layers }
      }
      NeuralFamily::Lstm => {
        let units = config.lstm_units;
        Network::Lstm {
          lstm: Lstm::new(input_shape[1], units, rng),
          head: vec![
            Dense::new(units, units, Activation::Relu, rng),
            Dense::new(units, outputs, Activation::Sigmoid, rng),
          ],
        }
      }
      NeuralFamily::HwyBlstm => {
        let units = config.lstm_units;
        Network::HwyBlstm {
          forward: Lstm::new(input_shape[1], units, rng),
          backward: Lstm::new(input_shape[1], units, rng),
          highways: (0..config.highway_layers).map(|_| Highway::new(2 * units, rng)).collect(),
          output: Dense::new(2 * units, outputs, Activation::Sigmoid, rng),
        }
      }
    };
    Ok(network)
  }

  pub fn zeros_like(&self) -> Network {
    match self {
      Network::Mlp { layers } => Network::Mlp {
        layers: layers.iter().map(Dense::zeros_like).collect(),
      },
      Network::Lstm { lstm, head } => Network::Lstm {
        lstm: lstm.zeros_like(),
        head: head.iter().map(Dense::zeros_like).collect(),
      },
      Network::HwyBlstm {
        forward,
        backward,
        highways,
        output,
      } => Network::HwyBlstm {
        forward: forward.zeros_like(),
        backward: backward.zeros_like(),
        highways: highways.iter().map(Highway::zeros_like).collect(),
        output: output.zeros_like(),
      },
    }
  }

  /// Every parameter tensor in a fixed order shared with [`Network::tensors_mut`].
  pub fn tensors(&self) -> Vec<&Vec<f32>> {
    match self {
      Network::Mlp { layers } => layers.iter().flat_map(Dense::tensors).collect(),
      Network::Lstm { lstm, head } => lstm.tensors().into_iter().chain(head.iter().flat_map(Dense::tensors)).collect(),
      Network::HwyBlstm {
        forward,
        backward,
        highways,
        output,
      } => forward
        .tensors()
        .into_iter()
        .chain(backward.tensors())
        .chain(highways.iter().flat_map(Highway::tensors))
        .chain(output.tensors())
        .collect(),
    }
  }

  pub fn tensors_mut(&mut self) -> Vec<&mut Vec<f32>> {
    match self {
      Network::Mlp { layers } => layers.iter_mut().flat_map(Dense::tensors_mut).collect(),
      Network::Lstm { lstm, head } => lstm
        .tensors_mut()
        .into_iter()
        .chain(head.iter_mut().flat_map(Dense::tensors_mut))
        .collect(),
      Network::HwyBlstm {
        forward,
        backward,
        highways,
        output,
      } => forward
        .tensors_mut()
        .into_iter()
        .chain(backward.tensors_mut())
        .chain(highways.iter_mut().flat_map(Highway::tensors_mut))
        .chain(output.tensors_mut())
        .collect(),
    }
  }

  pub fn add_assign(&mut self, other: &Network) {
    for (mine, theirs) in self.tensors_mut().into_iter().zip(other.tensors()) {
      for (a, b) in mine.iter_mut().zip(theirs) {
        *a += b;
      }
    }
  }

  /// Layer name and parameter count, outermost first.
  pub fn summary(&self) -> Vec<(String, usize)> {
    match self {
      Network::Mlp { layers } => layers
        .iter()
        .enumerate()
        .map(|(i, l)| (format!("dense_{} ({} -> {}, {:?})", i, l.inputs, l.outputs, l.activation), l.param_count()))
        .collect(),
      Network::Lstm { lstm, head } => std::iter::once((format!("lstm ({} units)", lstm.hidden), lstm.param_count()))
        .chain(
          head
            .iter()
            .enumerate()
            .map(|(i, l)| (format!("dense_{} ({} -> {})", i, l.inputs, l.outputs), l.param_count())),
        )
        .collect(),
      Network::HwyBlstm {
        forward,
        backward,
        highways,
        output,
      } => {
        let mut rows = vec![
          (format!("lstm_forward ({} units)", forward.hidden), forward.param_count()),
          (format!("lstm_backward ({} units)", backward.hidden), backward.param_count()),
        ];
        rows.extend(highways.iter().enumerate().map(|(i, h)| (format!("highway_{}", i), h.param_count())));
        rows.push((format!("dense_out ({} -> {})", output.inputs, output.outputs), output.param_count()));
        rows
      }
    }
  }

  pub fn param_count(&self) -> usize {
    self.tensors().iter().map(|t| t.len()).sum()
  }

  fn frames<'x>(&self, x: &'x [f32]) -> Vec<&'x [f32]> {
    let width = match self {
      Network::Mlp { .. } => x.len(),
      Network::Lstm { lstm, .. } => lstm.inputs,
      Network::HwyBlstm { forward, .. } => forward.inputs,
    };
    x.chunks(width.max(1)).collect()
  }

  pub fn predict(&self, x: &[f32]) -> Vec<f32> {
    match self {
      Network::Mlp { layers } => dense_stack(layers, x).pop().unwrap_or_default(),
      Network::Lstm { lstm, head } => {
        let trace = lstm.forward(self.frames(x).into_iter());
        dense_stack(head, trace.last_hidden()).pop().unwrap_or_default()
      }
      Network::HwyBlstm {
        forward,
        backward,
        highways,
        output,
      } => {
        let steps = self.frames(x);
        let mut hidden = forward.forward(steps.iter().copied()).last_hidden().to_vec();
        hidden.extend_from_slice(backward.forward(steps.iter().rev().copied()).last_hidden());
        for highway in highways {
          hidden = highway.forward(&hidden).y;
        }
        output.forward(&hidden)
      }
    }
  }

  /// Forward and backward pass for one sample, adding its MSE gradient into `grads`.
  /// Returns the sample's loss and mean absolute error.
  pub fn accumulate(&self, x: &[f32], target: &[f32], grads: &mut Network) -> (f32, f32) {
    match (self, grads) {
      (Network::Mlp { layers }, Network::Mlp { layers: g }) => {
        let acts = dense_stack(layers, x);
        let (dy, loss, mae) = output_error(&acts[acts.len() - 1], target);
        dense_stack_backward(layers, &acts, dy, g);
        (loss, mae)
      }
      (Network::Lstm { lstm, head }, Network::Lstm { lstm: g_lstm, head: g_head }) => {
        let steps = self.frames(x);
        let trace = lstm.forward(steps.iter().copied());
        let acts = dense_stack(head, trace.last_hidden());
        let (dy, loss, mae) = output_error(&acts[acts.len() - 1], target);
        let dh = dense_stack_backward(head, &acts, dy, g_head);
        lstm.backward(&steps, &trace, &dh, g_lstm);
        (loss, mae)
      }
      (
        Network::HwyBlstm {
          forward,
          backward,
          highways,
          output,
        },
        Network::HwyBlstm {
          forward: g_forward,
          backward: g_backward,
          highways: g_highways,
          output: g_output,
        },
      ) => {
        let steps = self.frames(x);
        let reversed: Vec<&[f32]> = steps.iter().rev().copied().collect();
        let fwd = forward.forward(steps.iter().copied());
        let bwd = backward.forward(reversed.iter().copied());

        let mut hidden = fwd.last_hidden().to_vec();
        hidden.extend_from_slice(bwd.last_hidden());
        let mut inputs = Vec::with_capacity(highways.len());
        let mut traces: Vec<HighwayTrace> = Vec::with_capacity(highways.len());
        for highway in highways {
          let trace = highway.forward(&hidden);
          inputs.push(std::mem::replace(&mut hidden, trace.y.clone()));
          traces.push(trace);
        }
        let y = output.forward(&hidden);
        let (dy, loss, mae) = output_error(&y, target);

        let mut dh = output.backward(&hidden, &y, &dy, g_output);
        for (l, highway) in highways.iter().enumerate().rev() {
          dh = highway.backward(&inputs[l], &traces[l], &dh, &mut g_highways[l]);
        }
        let (dh_fwd, dh_bwd) = dh.split_at(forward.hidden);
        forward.backward(&steps, &fwd, dh_fwd, g_forward);
        backward.backward(&reversed, &bwd, dh_bwd, g_backward);
        (loss, mae)
      }
      _ => unreachable!("gradient buffers are always built with zeros_like"),
    }
  }
}

/// A trained network together with the shapes it was trained on.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Model {
  pub family: NeuralFamily,
  /// Shape of one feature item, without the sample axis.
  pub input_shape: Vec<usize>,
  pub output_size: usize,
  pub network: Network,
}

impl Model {
  pub fn build(
    family: NeuralFamily,
    input_shape: &[usize],
    output_size: usize,
    config: &TrainingConfig,
    seed: Option<u64>,
  ) -> Result<Model> {
    let mut rng = match seed {
      Some(seed) => StdRng::seed_from_u64(seed),
      None => StdRng::from_entropy(),
    };
    let network = Network::build(family, input_shape, output_size, config, &mut rng)?;
    Ok(Model {
      family,
      input_shape: input_shape.to_vec(),
      output_size,
      network,
    })
  }

  pub fn input_len(&self) -> usize {
    self.input_shape.iter().product()
  }

  pub fn predict(&self, features: &Tensor) -> Result<Vec<f32>> {
    if features.len() != self.input_len() {
      return Err(Error::Shape(format!(
        "{} model expects {:?} features, got {:?}",
        self.family, self.input_shape, features.shape
      )));
    }
    Ok(self.network.predict(&features.data))
  }

  pub fn log_summary(&self) {
    log::info!("{} model, input {:?}, {} outputs", self.family, self.input_shape, self.output_size);
    for (layer, params) in self.network.summary() {
      log::info!("  {:<40} {:>10}", layer, params);
    }
    log::info!("  {:<40} {:>10}", "total parameters", self.network.param_count());
  }

  pub fn save(&self, path: &Path) -> Result<()> {
    files::write_json(path, self)?;
    log::info!("saved {} model to {}", self.family, path.display());
    Ok(())
  }

  pub fn load(path: &Path) -> Result<Model> {
    let model: Model = files::read_required(path, Error::MissingModel)?;
    log::debug!("loaded {} model from {}", model.family, path.display());
    Ok(model)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use tempdir::TempDir;

  fn config() -> TrainingConfig {
    TrainingConfig {
      mlp_layers: vec![8],
      lstm_units: 4,
      highway_layers: 2,
      ..TrainingConfig::default()
    }
  }

  #[test]
  fn test_outputs_stay_in_unit_range() {
    let x: Vec<f32> = (0..12).map(|i| i as f32 - 6.0).collect();
    for family in [NeuralFamily::Mlp, NeuralFamily::Lstm, NeuralFamily::HwyBlstm] {
      let model = Model::build(family, &[4, 3], 5, &config(), Some(1)).unwrap();
      let y = model.predict(&Tensor::new(vec![4, 3], x.clone()).unwrap()).unwrap();
      assert_eq!(y.len(), 5);
      assert!(y.iter().all(|v| (0.0..=1.0).contains(v)), "{}: {:?}", family, y);
    }
  }

  #[test]
  fn test_sequence_models_need_frames() {
    let result = Model::build(NeuralFamily::Lstm, &[12], 5, &config(), Some(1));
    assert!(matches!(result, Err(Error::Shape(_))));
  }

  #[test]
  fn test_gradient_buffers_match_weights() {
    let model = Model::build(NeuralFamily::HwyBlstm, &[4, 3], 2, &config(), Some(2)).unwrap();
    let mut grads = model.network.zeros_like();
    let x = vec![0.1; 12];
    let (loss, _) = model.network.accumulate(&x, &[0.2, 0.8], &mut grads);
    assert!(loss.is_finite());
    let sizes: Vec<usize> = model.network.tensors().iter().map(|t| t.len()).collect();
    let grad_sizes: Vec<usize> = grads.tensors().iter().map(|t| t.len()).collect();
    assert_eq!(sizes, grad_sizes);
    assert!(grads.tensors().iter().any(|t| t.iter().any(|&g| g != 0.0)));
  }

  #[test]
  fn test_save_load() {
    let tmp = TempDir::new("model").unwrap();
    let path = tmp.path().join("lstm.json");
    let model = Model::build(NeuralFamily::Lstm, &[4, 3], 2, &config(), Some(3)).unwrap();
    model.save(&path).unwrap();
    assert_eq!(Model::load(&path).unwrap(), model);
    assert!(matches!(Model::load(&tmp.path().join("mlp.json")), Err(Error::MissingModel(_))));
  }
}
