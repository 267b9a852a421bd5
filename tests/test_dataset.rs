mod common;

use soundmatch::audio::AudioSet;
use soundmatch::dataset::{DatasetSplit, SCALER_FILE};
use soundmatch::features::{FeaturePipeline, FeatureScaler};
use soundmatch::pipeline;
use soundmatch::tensor::Tensor;
use tempdir::TempDir;

/// Per column mean and standard deviation over every row and frame.
fn column_stats(features: &Tensor) -> Vec<(f32, f32)> {
  let width = features.last_dim();
  let rows = features.len() / width;
  (0..width)
    .map(|c| {
      let column: Vec<f32> = features.data.iter().skip(c).step_by(width).copied().collect();
      let mean = column.iter().sum::<f32>() / rows as f32;
      let var = column.iter().map(|v| (v - mean).powi(2)).sum::<f32>() / rows as f32;
      (mean, var.sqrt())
    })
    .collect()
}

#[test]
fn test_split_sizes_and_patch_width() {
  let tmp = TempDir::new("dataset").unwrap();
  let mut config = common::small_experiment(tmp.path(), &["mlp"]);
  config.dataset.train_size = 100;
  config.dataset.test_size = 20;

  pipeline::configure(&config).unwrap();
  let (train, test) = pipeline::generate_dataset(&config).unwrap();
  let free = pipeline::load_synth(&config).unwrap().free_count();

  assert_eq!(train.features.rows(), 100);
  assert_eq!(test.features.rows(), 20);
  assert_eq!(train.patches.shape, vec![100, free]);
  assert_eq!(test.patches.shape, vec![20, free]);
  assert_eq!(train.features.item_shape(), test.features.item_shape());

  let reloaded = DatasetSplit::load(&config.paths.dataset_dir, "test_").unwrap();
  assert_eq!(reloaded.features, test.features);
  assert!(config.paths.dataset_dir.join(SCALER_FILE).exists());
}

#[test]
fn test_scaler_fit_on_train_keeps_test_in_range() {
  let tmp = TempDir::new("dataset").unwrap();
  let mut config = common::small_experiment(tmp.path(), &["mlp"]);
  config.dataset.train_size = 100;
  config.dataset.test_size = 20;

  pipeline::configure(&config).unwrap();
  let (train, test) = pipeline::generate_dataset(&config).unwrap();

  for (mean, std) in column_stats(&train.features) {
    assert!(mean.abs() < 1e-2, "train column mean {}", mean);
    assert!(std < 1.01, "train column std {}", std);
  }
  for (mean, std) in column_stats(&test.features) {
    assert!(mean.is_finite() && std.is_finite());
    assert!(mean.abs() < 1.5, "test column mean {}", mean);
    assert!(std < 4.0, "test column std {}", std);
  }

  // the saved scaler reproduces the stored test rows from the stored patches
  let synth = pipeline::load_synth(&config).unwrap();
  let scaler = FeatureScaler::load(&config.paths.dataset_dir.join(SCALER_FILE)).unwrap();
  let features = FeaturePipeline::new(config.dataset.features.clone()).with_scaler(scaler);
  for i in [0, 7, 19] {
    let audio = synth.render_candidate(test.patches.row(i)).unwrap();
    let row = features.run(&audio).unwrap();
    let stored = test.features.item(i);
    assert_eq!(row.shape, stored.shape);
    for (a, b) in row.data.iter().zip(&stored.data) {
      assert!((a - b).abs() < 1e-4, "test row {} differs: {} vs {}", i, a, b);
    }
  }
}

#[test]
fn test_evaluation_targets_are_indexed_and_rerenderable() {
  let tmp = TempDir::new("evaluation_set").unwrap();
  let config = common::small_experiment(tmp.path(), &["ga"]);

  pipeline::configure(&config).unwrap();
  let targets = pipeline::generate_evaluation(&config).unwrap();
  assert_eq!(targets.indices(), vec![0, 1, 2, 3, 4]);
  for i in 0..5 {
    assert!(config.target_dir().join(format!("audio_{}.wav", i)).exists());
  }

  let recorded = DatasetSplit::load(&config.paths.evaluation_dir, "").unwrap();
  assert_eq!(recorded.len(), 5);
  let synth = pipeline::load_synth(&config).unwrap();
  for (index, target) in targets.iter() {
    let rendered = synth.render_candidate(recorded.patches.row(index)).unwrap();
    assert_eq!(rendered.samples(), target.samples(), "target {} does not re-render", index);
  }
}

#[test]
fn test_regenerating_fewer_targets_drops_the_old_ones() {
  let tmp = TempDir::new("evaluation_set").unwrap();
  let mut config = common::small_experiment(tmp.path(), &["ga"]);

  pipeline::configure(&config).unwrap();
  let first = pipeline::generate_evaluation(&config).unwrap();
  assert_eq!(first.len(), 5);

  config.evaluation_set.num_samples = 3;
  let second = pipeline::generate_evaluation(&config).unwrap();
  assert_eq!(second.indices(), vec![0, 1, 2]);
  for i in 3..5 {
    assert!(!config.target_dir().join(format!("audio_{}.wav", i)).exists());
  }

  // later steps see the same three targets as the recorded patches
  assert_eq!(AudioSet::load_folder(&config.target_dir()).unwrap().len(), 3);
  assert_eq!(DatasetSplit::load(&config.paths.evaluation_dir, "").unwrap().len(), 3);
}

#[test]
fn test_evaluation_targets_differ_from_training_patches() {
  let tmp = TempDir::new("evaluation_set").unwrap();
  let config = common::small_experiment(tmp.path(), &["ga"]);

  pipeline::configure(&config).unwrap();
  let (train, _) = pipeline::generate_dataset(&config).unwrap();
  pipeline::generate_evaluation(&config).unwrap();
  let recorded = DatasetSplit::load(&config.paths.evaluation_dir, "").unwrap();
  assert_ne!(recorded.patches.row(0), train.patches.row(0));
}
