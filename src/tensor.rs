//! Row-major `f32` arrays as stored on disk: `{"shape": [..], "data": [..]}`.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::files;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Tensor {
  pub shape: Vec<usize>,
  pub data: Vec<f32>,
}

impl Tensor {
  pub fn new(shape: Vec<usize>, data: Vec<f32>) -> Result<Self> {
    let expected: usize = shape.iter().product();
    if expected != data.len() {
      return Err(Error::Shape(format!("shape {:?} holds {} values, got {}", shape, expected, data.len())));
    }
    Ok(Tensor { shape, data })
  }

  pub fn vector(data: Vec<f32>) -> Self {
    Tensor {
      shape: vec![data.len()],
      data,
    }
  }

  pub fn zeros(shape: Vec<usize>) -> Self {
    let len = shape.iter().product();
    Tensor { shape, data: vec![0.0; len] }
  }

  /// Stack equally shaped tensors along a new leading axis.
  pub fn stack(items: &[Tensor]) -> Result<Tensor> {
    let inner = match items.first() {
      Some(first) => first.shape.clone(),
      None => return Ok(Tensor::zeros(vec![0])),
    };
    let mut data = Vec::with_capacity(items.len() * inner.iter().product::<usize>());
    for (i, item) in items.iter().enumerate() {
      if item.shape != inner {
        return Err(Error::Shape(format!(
          "item {} has shape {:?}, expected {:?}",
          i, item.shape, inner
        )));
      }
      data.extend_from_slice(&item.data);
    }
    let mut shape = vec![items.len()];
    shape.extend(inner);
    Ok(Tensor { shape, data })
  }

  /// Stack equal length vectors into `[n, width]`.
  pub fn from_rows(rows: &[Vec<f32>]) -> Result<Tensor> {
    let width = rows.first().map(|r| r.len()).unwrap_or(0);
    let mut data = Vec::with_capacity(rows.len() * width);
    for row in rows {
      if row.len() != width {
        return Err(Error::Shape(format!("row of width {} among rows of width {}", row.len(), width)));
      }
      data.extend_from_slice(row);
    }
    Ok(Tensor {
      shape: vec![rows.len(), width],
      data,
    })
  }

  pub fn ndim(&self) -> usize {
    self.shape.len()
  }

  pub fn len(&self) -> usize {
    self.data.len()
  }

  pub fn is_empty(&self) -> bool {
    self.data.is_empty()
  }

  /// Size of the leading axis.
  pub fn rows(&self) -> usize {
    self.shape.first().copied().unwrap_or(0)
  }

  /// Values per leading-axis entry.
  pub fn row_len(&self) -> usize {
    self.shape.iter().skip(1).product()
  }

  /// Shape of one leading-axis entry.
  pub fn item_shape(&self) -> &[usize] {
    self.shape.get(1..).unwrap_or(&[])
  }

  pub fn row(&self, index: usize) -> &[f32] {
    let width = self.row_len();
    &self.data[index * width..(index + 1) * width]
  }

  /// Entry `index` of the leading axis as its own tensor.
  pub fn item(&self, index: usize) -> Tensor {
    Tensor {
      shape: self.item_shape().to_vec(),
      data: self.row(index).to_vec(),
    }
  }

  /// Size of the trailing axis, the axis a scaler works on.
  pub fn last_dim(&self) -> usize {
    self.shape.last().copied().unwrap_or(0)
  }

  pub fn flattened(mut self) -> Tensor {
    self.shape = vec![self.data.len()];
    self
  }

  pub fn save(&self, path: &Path) -> Result<()> {
    files::write_json(path, self)
  }

  pub fn load(path: &Path, artifact: &'static str) -> Result<Tensor> {
    let tensor: Tensor = files::read_required(path, |path| Error::MissingArtifact { artifact, path })?;
    let expected: usize = tensor.shape.iter().product();
    if expected != tensor.data.len() {
      return Err(Error::Shape(format!(
        "{}: shape {:?} does not match {} values",
        path.display(),
        tensor.shape,
        tensor.data.len()
      )));
    }
    Ok(tensor)
  }
}
