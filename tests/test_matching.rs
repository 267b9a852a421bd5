mod common;

use std::fs;

use soundmatch::audio::AudioSet;
use soundmatch::estimator::nn::NeuralFamily;
use soundmatch::estimator::EstimatorKind;
use soundmatch::pipeline::{self, SCORES_FILE, STATS_FILE};
use tempdir::TempDir;

#[test]
fn test_neural_matching_is_deterministic() {
  let tmp = TempDir::new("matching").unwrap();
  let config = common::small_experiment(tmp.path(), &["mlp"]);

  pipeline::configure(&config).unwrap();
  pipeline::generate_dataset(&config).unwrap();
  pipeline::generate_evaluation(&config).unwrap();
  pipeline::train(&config, NeuralFamily::Mlp).unwrap();

  let first = pipeline::match_estimator(&config, EstimatorKind::Mlp).unwrap();
  let written = AudioSet::load_folder(&config.estimator_dir(EstimatorKind::Mlp)).unwrap();
  let second = pipeline::match_estimator(&config, EstimatorKind::Mlp).unwrap();

  assert_eq!(first.estimates.indices(), vec![0, 1, 2, 3, 4]);
  assert_eq!(first.patches, second.patches);
  for (index, audio) in first.estimates.iter() {
    assert_eq!(second.estimates.get(index), Some(audio));
    assert_eq!(written.get(index), Some(audio));
  }
}

#[test]
fn test_matching_before_training_reports_missing_model() {
  let tmp = TempDir::new("matching").unwrap();
  let config = common::small_experiment(tmp.path(), &["lstm"]);

  pipeline::configure(&config).unwrap();
  pipeline::generate_dataset(&config).unwrap();
  pipeline::generate_evaluation(&config).unwrap();

  let result = pipeline::match_estimator(&config, EstimatorKind::Lstm);
  assert!(matches!(result, Err(soundmatch::error::Error::MissingModel(_))));
}

#[test]
fn test_full_run_with_neural_and_genetic_estimators() {
  let tmp = TempDir::new("run").unwrap();
  let config = common::small_experiment(tmp.path(), &["mlp", "lstm", "ga", "nsga"]);

  let evaluation = pipeline::run(&config).unwrap();
  assert_eq!(evaluation.scores().len(), 4 * 5);
  assert_eq!(
    evaluation.stats().keys().cloned().collect::<Vec<_>>(),
    vec!["mlp", "lstm", "ga", "nsga"]
  );

  for name in ["mlp", "lstm"] {
    assert!(config.paths.models_dir.join(format!("{}.json", name)).exists());
    assert!(config.paths.models_dir.join(format!("{}_log.json", name)).exists());
  }
  let scores: serde_json::Value =
    serde_json::from_str(&fs::read_to_string(config.paths.evaluation_dir.join(SCORES_FILE)).unwrap()).unwrap();
  assert_eq!(scores.as_array().unwrap().len(), 20);
  assert!(config.paths.evaluation_dir.join(STATS_FILE).exists());
}
