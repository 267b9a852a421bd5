/// Adam with bias correction.
#[derive(Clone, Debug)]
pub struct Adam {
  learning_rate: f32,
  beta1: f32,
  beta2: f32,
  epsilon: f32,
  step: i32,
  m: Vec<Vec<f32>>,
  v: Vec<Vec<f32>>,
}

impl Adam {
  /// `sizes` gives the length of every parameter tensor, in the order `update` will see them.
  pub fn new(learning_rate: f32, sizes: impl IntoIterator<Item = usize>) -> Self {
    let (m, v) = sizes.into_iter().map(|n| (vec![0.0; n], vec![0.0; n])).unzip();
    Adam {
      learning_rate,
      beta1: 0.9,
      beta2: 0.999,
      epsilon: 1e-7,
      step: 0,
      m,
      v,
    }
  }

  /// Apply one step. Gradients are multiplied by `scale` first, typically `1 / batch_len`.
  pub fn update(&mut self, params: Vec<&mut Vec<f32>>, grads: Vec<&Vec<f32>>, scale: f32) {
    self.step += 1;
    let correction1 = 1.0 - self.beta1.powi(self.step);
    let correction2 = 1.0 - self.beta2.powi(self.step);

    for (((param, grad), m), v) in params.into_iter().zip(grads).zip(&mut self.m).zip(&mut self.v) {
      for (((p, &g), m), v) in param.iter_mut().zip(grad.iter()).zip(m.iter_mut()).zip(v.iter_mut()) {
        let g = g * scale;
        *m = self.beta1 * *m + (1.0 - self.beta1) * g;
        *v = self.beta2 * *v + (1.0 - self.beta2) * g * g;
        let m_hat = *m / correction1;
        let v_hat = *v / correction2;
        *p -= self.learning_rate * m_hat / (v_hat.sqrt() + self.epsilon);
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_minimises_quadratic() {
    let mut x = vec![3.0f32, -2.0];
    let mut adam = Adam::new(0.05, [2]);
    for _ in 0..1000 {
      let grad = vec![2.0 * x[0], 2.0 * x[1]];
      adam.update(vec![&mut x], vec![&grad], 1.0);
    }
    assert!(x.iter().all(|v| v.abs() < 0.1), "{:?}", x);
  }

  #[test]
  fn test_first_step_moves_by_learning_rate() {
    let mut x = vec![1.0f32];
    let mut adam = Adam::new(0.01, [1]);
    adam.update(vec![&mut x], vec![&vec![5.0]], 1.0);
    assert!((x[0] - 0.99).abs() < 1e-5);
  }
}
