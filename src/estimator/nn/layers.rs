//! Layers with hand-written forward and backward passes.
//!
//! Gradients are accumulated into a second instance of the same layer (`grads`), so a batch
//! can be split across threads and the partial gradients summed afterwards.

use rand::Rng;
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Activation {
  Relu,
  Sigmoid,
  Tanh,
  Linear,
}

#[inline]
pub fn sigmoid(x: f32) -> f32 {
  1.0 / (1.0 + (-x).exp())
}

impl Activation {
  #[inline]
  pub fn apply(self, x: f32) -> f32 {
    match self {
      Activation::Relu => x.max(0.0),
      Activation::Sigmoid => sigmoid(x),
      Activation::Tanh => x.tanh(),
      Activation::Linear => x,
    }
  }

  /// Derivative expressed through the activation's output `y`.
  #[inline]
  pub fn derivative(self, y: f32) -> f32 {
    match self {
      Activation::Relu => {
        if y > 0.0 {
          1.0
        } else {
          0.0
        }
      }
      Activation::Sigmoid => y * (1.0 - y),
      Activation::Tanh => 1.0 - y * y,
      Activation::Linear => 1.0,
    }
  }
}

/// Glorot uniform initialisation.
fn glorot<R: Rng + ?Sized>(fan_in: usize, fan_out: usize, len: usize, rng: &mut R) -> Vec<f32> {
  let limit = (6.0 / (fan_in + fan_out) as f32).sqrt();
  (0..len).map(|_| rng.gen_range(-limit..limit)).collect()
}

fn add_into(target: &mut [f32], source: &[f32]) {
  for (t, s) in target.iter_mut().zip(source) {
    *t += s;
  }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Dense {
  pub inputs: usize,
  pub outputs: usize,
  /// `outputs x inputs`, row-major.
  pub weights: Vec<f32>,
  pub bias: Vec<f32>,
  pub activation: Activation,
}

impl Dense {
  pub fn new<R: Rng + ?Sized>(inputs: usize, outputs: usize, activation: Activation, rng: &mut R) -> Self {
    Dense {
      inputs,
      outputs,
      weights: glorot(inputs, outputs, inputs * outputs, rng),
      bias: vec![0.0; outputs],
      activation,
    }
  }

  pub fn with_bias(mut self, value: f32) -> Self {
    self.bias.iter_mut().for_each(|b| *b = value);
    self
  }

  pub fn zeros_like(&self) -> Self {
    Dense {
      weights: vec![0.0; self.weights.len()],
      bias: vec![0.0; self.bias.len()],
      ..self.clone()
    }
  }

  pub fn param_count(&self) -> usize {
    self.weights.len() + self.bias.len()
  }

  pub fn forward(&self, x: &[f32]) -> Vec<f32> {
    self
      .weights
      .chunks(self.inputs)
      .zip(&self.bias)
      .map(|(row, b)| self.activation.apply(row.iter().zip(x).map(|(w, v)| w * v).sum::<f32>() + b))
      .collect()
  }

  /// Accumulate gradients for input `x`, output `y` and upstream gradient `dy`.
  /// Returns the gradient with respect to `x`.
  pub fn backward(&self, x: &[f32], y: &[f32], dy: &[f32], grads: &mut Dense) -> Vec<f32> {
    let mut dx = vec![0.0; self.inputs];
    for (o, ((&yo, &dyo), row)) in y.iter().zip(dy).zip(self.weights.chunks(self.inputs)).enumerate() {
      let delta = dyo * self.activation.derivative(yo);
      if delta == 0.0 {
        continue;
      }
      grads.bias[o] += delta;
      let grad_row = &mut grads.weights[o * self.inputs..(o + 1) * self.inputs];
      for ((g, &xi), (d, &w)) in grad_row.iter_mut().zip(x).zip(dx.iter_mut().zip(row)) {
        *g += delta * xi;
        *d += delta * w;
      }
    }
    dx
  }

  pub fn tensors(&self) -> Vec<&Vec<f32>> {
    vec![&self.weights, &self.bias]
  }

  pub fn tensors_mut(&mut self) -> Vec<&mut Vec<f32>> {
    vec![&mut self.weights, &mut self.bias]
  }
}

/// Activated gate values per step, kept for the backward pass.
pub struct LstmTrace {
  /// `hidden` states, `hs[0]` is the zero initial state.
  pub hs: Vec<Vec<f32>>,
  pub cs: Vec<Vec<f32>>,
  /// `[i, f, g, o]` per step, each `hidden` long.
  pub gates: Vec<Vec<f32>>,
}

impl LstmTrace {
  pub fn last_hidden(&self) -> &[f32] {
    self.hs.last().map(|h| h.as_slice()).unwrap_or(&[])
  }
}

/// Single LSTM layer; only the final hidden state is exposed.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Lstm {
  pub inputs: usize,
  pub hidden: usize,
  /// `4H x inputs`, gate order input, forget, cell, output.
  pub w: Vec<f32>,
  /// `4H x H`
  pub u: Vec<f32>,
  pub b: Vec<f32>,
}

impl Lstm {
  pub fn new<R: Rng + ?Sized>(inputs: usize, hidden: usize, rng: &mut R) -> Self {
    let gates = 4 * hidden;
    let mut b = vec![0.0; gates];
    b[hidden..2 * hidden].iter_mut().for_each(|v| *v = 1.0);
    Lstm {
      inputs,
      hidden,
      w: glorot(inputs, gates, gates * inputs, rng),
      u: glorot(hidden, gates, gates * hidden, rng),
      b,
    }
  }

  pub fn zeros_like(&self) -> Self {
    Lstm {
      inputs: self.inputs,
      hidden: self.hidden,
      w: vec![0.0; self.w.len()],
      u: vec![0.0; self.u.len()],
      b: vec![0.0; self.b.len()],
    }
  }

  pub fn param_count(&self) -> usize {
    self.w.len() + self.u.len() + self.b.len()
  }

  pub fn forward<'x, I>(&self, steps: I) -> LstmTrace
  where
    I: Iterator<Item = &'x [f32]>,
  {
    let h_size = self.hidden;
    let mut trace = LstmTrace {
      hs: vec![vec![0.0; h_size]],
      cs: vec![vec![0.0; h_size]],
      gates: Vec::new(),
    };

    for x in steps {
      let h_prev = trace.hs.last().map(|h| h.as_slice()).unwrap_or(&[]);
      let c_prev = trace.cs.last().map(|c| c.as_slice()).unwrap_or(&[]);
      let mut a = self.b.clone();
      for (k, a_k) in a.iter_mut().enumerate() {
        let wx: f32 = self.w[k * self.inputs..(k + 1) * self.inputs].iter().zip(x).map(|(w, v)| w * v).sum();
        let uh: f32 = self.u[k * h_size..(k + 1) * h_size].iter().zip(h_prev).map(|(u, v)| u * v).sum();
        *a_k += wx + uh;
      }
      for (k, a_k) in a.iter_mut().enumerate() {
        *a_k = if k / h_size == 2 { a_k.tanh() } else { sigmoid(*a_k) };
      }

      let (i, rest) = a.split_at(h_size);
      let (f, rest) = rest.split_at(h_size);
      let (g, o) = rest.split_at(h_size);
      let c: Vec<f32> = (0..h_size).map(|j| f[j] * c_prev[j] + i[j] * g[j]).collect();
      let h: Vec<f32> = (0..h_size).map(|j| o[j] * c[j].tanh()).collect();

      trace.gates.push(a);
      trace.cs.push(c);
      trace.hs.push(h);
    }
    trace
  }

  /// Backpropagation through time from a gradient on the final hidden state.
  pub fn backward(&self, xs: &[&[f32]], trace: &LstmTrace, dh_last: &[f32], grads: &mut Lstm) {
    let h_size = self.hidden;
    let mut dh = dh_last.to_vec();
    let mut dc_next = vec![0.0; h_size];

    for t in (0..xs.len()).rev() {
      let gates = &trace.gates[t];
      let (c, c_prev, h_prev) = (&trace.cs[t + 1], &trace.cs[t], &trace.hs[t]);
      let mut da = vec![0.0; 4 * h_size];

      for j in 0..h_size {
        let (i, f, g, o) = (gates[j], gates[h_size + j], gates[2 * h_size + j], gates[3 * h_size + j]);
        let tc = c[j].tanh();
        let dc = dc_next[j] + dh[j] * o * (1.0 - tc * tc);
        da[j] = dc * g * i * (1.0 - i);
        da[h_size + j] = dc * c_prev[j] * f * (1.0 - f);
        da[2 * h_size + j] = dc * i * (1.0 - g * g);
        da[3 * h_size + j] = dh[j] * tc * o * (1.0 - o);
        dc_next[j] = dc * f;
      }

      let mut dh_prev = vec![0.0; h_size];
      for (k, &d) in da.iter().enumerate() {
        if d == 0.0 {
          continue;
        }
        grads.b[k] += d;
        let gw = &mut grads.w[k * self.inputs..(k + 1) * self.inputs];
        for (g, &x) in gw.iter_mut().zip(xs[t]) {
          *g += d * x;
        }
        let u_row = &self.u[k * h_size..(k + 1) * h_size];
        let gu = &mut grads.u[k * h_size..(k + 1) * h_size];
        for ((g, &hp), (dp, &u)) in gu.iter_mut().zip(h_prev).zip(dh_prev.iter_mut().zip(u_row)) {
          *g += d * hp;
          *dp += d * u;
        }
      }
      dh = dh_prev;
    }
  }

  pub fn tensors(&self) -> Vec<&Vec<f32>> {
    vec![&self.w, &self.u, &self.b]
  }

  pub fn tensors_mut(&mut self) -> Vec<&mut Vec<f32>> {
    vec![&mut self.w, &mut self.u, &mut self.b]
  }
}

/// `y = T * H(x) + (1 - T) * x` with a ReLU transform and a sigmoid carry gate.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Highway {
  pub transform: Dense,
  pub gate: Dense,
}

pub struct HighwayTrace {
  pub h: Vec<f32>,
  pub t: Vec<f32>,
  pub y: Vec<f32>,
}

impl Highway {
  pub fn new<R: Rng + ?Sized>(width: usize, rng: &mut R) -> Self {
    Highway {
      transform: Dense::new(width, width, Activation::Relu, rng),
      gate: Dense::new(width, width, Activation::Sigmoid, rng).with_bias(-2.0),
    }
  }

  pub fn zeros_like(&self) -> Self {
    Highway {
      transform: self.transform.zeros_like(),
      gate: self.gate.zeros_like(),
    }
  }

  pub fn param_count(&self) -> usize {
    self.transform.param_count() + self.gate.param_count()
  }

  pub fn forward(&self, x: &[f32]) -> HighwayTrace {
    let h = self.transform.forward(x);
    let t = self.gate.forward(x);
    let y = x.iter().zip(&h).zip(&t).map(|((&x, &h), &t)| t * h + (1.0 - t) * x).collect();
    HighwayTrace { h, t, y }
  }

  pub fn backward(&self, x: &[f32], trace: &HighwayTrace, dy: &[f32], grads: &mut Highway) -> Vec<f32> {
    let dh: Vec<f32> = dy.iter().zip(&trace.t).map(|(d, t)| d * t).collect();
    let dt: Vec<f32> = dy.iter().zip(&trace.h).zip(x).map(|((d, h), x)| d * (h - x)).collect();
    let mut dx: Vec<f32> = dy.iter().zip(&trace.t).map(|(d, t)| d * (1.0 - t)).collect();
    add_into(&mut dx, &self.transform.backward(x, &trace.h, &dh, &mut grads.transform));
    add_into(&mut dx, &self.gate.backward(x, &trace.t, &dt, &mut grads.gate));
    dx
  }

  pub fn tensors(&self) -> Vec<&Vec<f32>> {
    let mut tensors = self.transform.tensors();
    tensors.extend(self.gate.tensors());
    tensors
  }

  pub fn tensors_mut(&mut self) -> Vec<&mut Vec<f32>> {
    let mut tensors = self.transform.tensors_mut();
    tensors.extend(self.gate.tensors_mut());
    tensors
  }
}
