use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::files;
use crate::tensor::Tensor;

/// Per-coefficient standardisation.
///
/// Coefficients sit on the trailing axis unless `coefficients_first` is set, in which case
/// they sit on the axis before it (`[coefficients, frames]` items). Fitted once on the train
/// split, then applied unchanged to the test split and to every inference target.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FeatureScaler {
  pub mean: Vec<f32>,
  pub scale: Vec<f32>,
  #[serde(default)]
  pub coefficients_first: bool,
}

/// Coefficient count and the stride between neighbouring coefficients.
fn coefficient_layout(features: &Tensor, coefficients_first: bool) -> Result<(usize, usize)> {
  if !coefficients_first {
    return Ok((features.last_dim(), 1));
  }
  let ndim = features.ndim();
  if ndim < 2 {
    return Err(Error::Shape(format!(
      "coefficient-first scaling needs at least two axes, features have shape {:?}",
      features.shape
    )));
  }
  Ok((features.shape[ndim - 2], features.shape[ndim - 1]))
}

impl FeatureScaler {
  pub fn fit(features: &Tensor, coefficients_first: bool) -> Result<Self> {
    let (width, stride) = coefficient_layout(features, coefficients_first)?;
    if width == 0 || stride == 0 || features.is_empty() {
      return Err(Error::Shape("cannot fit a scaler on an empty feature array".to_string()));
    }
    let count = (features.len() / width) as f64;
    let coefficient = |e: usize| (e / stride) % width;

    let mut sum = vec![0f64; width];
    for (e, &v) in features.data.iter().enumerate() {
      sum[coefficient(e)] += v as f64;
    }
    let mean: Vec<f64> = sum.iter().map(|s| s / count).collect();

    let mut var = vec![0f64; width];
    for (e, &v) in features.data.iter().enumerate() {
      let c = coefficient(e);
      var[c] += (v as f64 - mean[c]).powi(2);
    }
    let scale = var
      .iter()
      .map(|v| {
        let std = (v / count).sqrt() as f32;
        if std > f32::EPSILON {
          std
        } else {
          1.0
        }
      })
      .collect();

    Ok(FeatureScaler {
      mean: mean.into_iter().map(|m| m as f32).collect(),
      scale,
      coefficients_first,
    })
  }

  pub fn width(&self) -> usize {
    self.mean.len()
  }

  pub fn transform(&self, features: &mut Tensor) -> Result<()> {
    let (width, stride) = coefficient_layout(features, self.coefficients_first)?;
    if width != self.width() {
      return Err(Error::Shape(format!(
        "scaler fitted on {} coefficients, features have {}",
        self.width(),
        width
      )));
    }
    if width == 0 || stride == 0 {
      return Ok(());
    }
    for (e, v) in features.data.iter_mut().enumerate() {
      let c = (e / stride) % width;
      *v = (*v - self.mean[c]) / self.scale[c];
    }
    Ok(())
  }

  pub fn save(&self, path: &Path) -> Result<()> {
    files::write_json(path, self)?;
    log::info!("wrote feature scaler to {}", path.display());
    Ok(())
  }

  pub fn load(path: &Path) -> Result<Self> {
    let scaler: FeatureScaler = files::read_required(path, Error::MissingScaler)?;
    if scaler.mean.len() != scaler.scale.len() {
      return Err(Error::Shape(format!(
        "{}: {} means but {} scales",
        path.display(),
        scaler.mean.len(),
        scaler.scale.len()
      )));
    }
    Ok(scaler)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use tempdir::TempDir;

  #[test]
  fn test_fit_standardises_each_column() {
    let mut features = Tensor::from_rows(&[vec![1.0, 5.0], vec![3.0, 5.0], vec![5.0, 5.0]]).unwrap();
    let scaler = FeatureScaler::fit(&features, false).unwrap();
    assert_eq!(scaler.mean, vec![3.0, 5.0]);
    // constant column keeps unit scale
    assert_eq!(scaler.scale[1], 1.0);

    scaler.transform(&mut features).unwrap();
    let column: Vec<f32> = features.data.iter().step_by(2).copied().collect();
    let mean = column.iter().sum::<f32>() / 3.0;
    let var = column.iter().map(|v| (v - mean).powi(2)).sum::<f32>() / 3.0;
    assert!(mean.abs() < 1e-6);
    assert!((var - 1.0).abs() < 1e-5);
  }

  #[test]
  fn test_missing_scaler() {
    let tmp = TempDir::new("scaler").unwrap();
    assert!(matches!(
      FeatureScaler::load(&tmp.path().join("data_scaler.json")),
      Err(Error::MissingScaler(_))
    ));
  }

  #[test]
  fn test_width_mismatch() {
    let scaler = FeatureScaler {
      mean: vec![0.0; 3],
      scale: vec![1.0; 3],
      coefficients_first: false,
    };
    let mut features = Tensor::from_rows(&[vec![1.0, 2.0]]).unwrap();
    assert!(matches!(scaler.transform(&mut features), Err(Error::Shape(_))));
  }

  #[test]
  fn test_layout_does_not_change_the_statistics() {
    // two items of 3 frames x 2 coefficients
    let frames = vec![
      vec![1.0, 10.0, 2.0, 20.0, 3.0, 30.0],
      vec![4.0, 40.0, 5.0, 50.0, 6.0, 60.0],
    ];
    let mut time_major = Tensor::new(vec![2, 3, 2], frames.concat()).unwrap();
    // the same items stored as 2 coefficients x 3 frames
    let transposed: Vec<f32> = frames
      .iter()
      .flat_map(|item| (0..2).flat_map(move |c| (0..3).map(move |f| item[f * 2 + c])))
      .collect();
    let mut coefficient_major = Tensor::new(vec![2, 2, 3], transposed).unwrap();

    let by_frame = FeatureScaler::fit(&time_major, false).unwrap();
    let by_coefficient = FeatureScaler::fit(&coefficient_major, true).unwrap();
    assert_eq!(by_frame.mean, vec![3.5, 35.0]);
    assert_eq!(by_coefficient.mean, by_frame.mean);
    assert_eq!(by_coefficient.scale, by_frame.scale);

    by_frame.transform(&mut time_major).unwrap();
    by_coefficient.transform(&mut coefficient_major).unwrap();
    // first coefficient of the first item, first frame, in both layouts
    assert_eq!(time_major.data[0], coefficient_major.data[0]);
    // second coefficient of the second item, last frame
    assert_eq!(time_major.data[11], coefficient_major.data[11]);

    // a single item transforms with the same statistics
    let mut item = Tensor::new(vec![2, 3], vec![1.0, 2.0, 3.0, 10.0, 20.0, 30.0]).unwrap();
    by_coefficient.transform(&mut item).unwrap();
    assert_eq!(item.data[0], coefficient_major.data[0]);
  }

  #[test]
  fn test_coefficient_first_needs_two_axes() {
    let features = Tensor::vector(vec![1.0, 2.0, 3.0]);
    assert!(matches!(FeatureScaler::fit(&features, true), Err(Error::Shape(_))));
  }
}
