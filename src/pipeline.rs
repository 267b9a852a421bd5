//! The steps of an experiment, each reading and writing only the artifacts named in the
//! config. `run` chains them in order.

use crate::audio::AudioSet;
use crate::config::ExperimentConfig;
use crate::dataset::{DatasetGenerator, DatasetSplit, SCALER_FILE};
use crate::error::{Error, Result};
use crate::estimator::genetic::{BasicGa, Nsga};
use crate::estimator::nn::{self, Model, NeuralFamily, TrainingLog};
use crate::estimator::{Estimator, EstimatorKind, NeuralEstimator};
use crate::evaluation::Evaluation;
use crate::files;
use crate::matching::{MatchOutput, SoundMatch};
use crate::params::ParameterState;
use crate::synth::Synth;

/// Evaluation targets are drawn from a different stream than the training data, so they
/// never repeat a training patch under the same seed.
const EVALUATION_SEED_OFFSET: u64 = 0x5eed;

pub const STATS_FILE: &str = "evaluation_stats.json";
pub const SCORES_FILE: &str = "evaluation_scores.json";

/// Save the untouched state, apply the override table, save the configured state and read
/// it back so later steps start from exactly what is on disk.
pub fn configure(config: &ExperimentConfig) -> Result<ParameterState> {
  let mut synth = config.build_synth()?;
  synth.save_state(&config.paths.init_state)?;

  let table = config.overrides.table()?;
  synth.set_overridden_parameters(&table)?;
  synth.save_state(&config.paths.synth_state)?;
  synth.load_state(&config.paths.synth_state)
}

/// A synth with the configured state applied.
pub fn load_synth(config: &ExperimentConfig) -> Result<Synth> {
  let path = &config.paths.synth_state;
  if files::exists(path).is_none() {
    return Err(Error::MissingArtifact {
      artifact: "synth state (run configure first)",
      path: path.clone(),
    });
  }
  let mut synth = config.build_synth()?;
  synth.load_state(path)?;
  Ok(synth)
}

pub fn generate_dataset(config: &ExperimentConfig) -> Result<(DatasetSplit, DatasetSplit)> {
  let synth = load_synth(config)?;
  let mut generator =
    DatasetGenerator::new(&synth, config.dataset.features.clone(), &config.paths.dataset_dir, config.seed);
  let train = generator.generate(config.dataset.train_size, "train_", true)?;
  let test = generator.generate(config.dataset.test_size, "test_", true)?;
  generator.save_scaler(SCALER_FILE)?;
  Ok((train, test))
}

/// Render the evaluation targets to `<evaluation_dir>/audio/audio_<i>.wav` with their
/// patches and unscaled features alongside. Targets from an earlier run are removed first,
/// and the returned set holds exactly the indices `0..num_samples`.
pub fn generate_evaluation(config: &ExperimentConfig) -> Result<AudioSet> {
  let synth = load_synth(config)?;
  let target_dir = config.target_dir();
  AudioSet::clear_folder(&target_dir)?;

  let num_samples = config.evaluation_set.num_samples;
  let seed = config.seed.map(|s| s.wrapping_add(EVALUATION_SEED_OFFSET));
  let mut generator =
    DatasetGenerator::new(&synth, config.dataset.features.clone(), &config.paths.evaluation_dir, seed);
  generator.save_audio = true;
  generator.generate(num_samples, "", false)?;

  let targets = AudioSet::load_folder(&target_dir)?;
  if !targets.indices().into_iter().eq(0..num_samples) {
    return Err(Error::Configuration(format!(
      "{} should hold targets 0..{}, found {:?}",
      target_dir.display(),
      num_samples,
      targets.indices()
    )));
  }
  Ok(targets)
}

pub fn train(config: &ExperimentConfig, family: NeuralFamily) -> Result<TrainingLog> {
  let dir = &config.paths.dataset_dir;
  let train = DatasetSplit::load(dir, "train_")?;
  let test = DatasetSplit::load(dir, "test_")?;

  let input_shape = nn::train::model_input_shape(family, &train)?;
  let mut model = Model::build(family, &input_shape, train.patches.row_len(), &config.training, config.seed)?;
  model.log_summary();

  let log = nn::fit(&mut model, &train, &test, &config.training, config.seed)?;
  model.save(&config.paths.models_dir.join(format!("{}.json", family.name())))?;
  log.save(&config.paths.models_dir.join(format!("{}_log.json", family.name())))?;
  Ok(log)
}

pub fn build_estimator(config: &ExperimentConfig, kind: EstimatorKind, synth: &Synth) -> Result<Box<dyn Estimator>> {
  let estimator: Box<dyn Estimator> = match kind.family() {
    Some(family) => Box::new(NeuralEstimator::load(
      family,
      &config.paths.models_dir,
      &config.paths.dataset_dir,
      &config.dataset.features,
    )?),
    None if kind == EstimatorKind::Ga => Box::new(BasicGa::new(
      synth.clone(),
      config.genetic.features.clone(),
      config.genetic.ga.clone(),
      config.seed,
    )?),
    None => Box::new(
      Nsga::new(synth.clone(), config.nsga.objectives.clone(), config.nsga.ga.clone(), config.seed)?
        .with_divisions(config.nsga.reference_divisions),
    ),
  };
  Ok(estimator)
}

pub fn match_estimator(config: &ExperimentConfig, kind: EstimatorKind) -> Result<MatchOutput> {
  let synth = load_synth(config)?;
  let targets = AudioSet::load_folder(&config.target_dir())?;
  let estimator = build_estimator(config, kind, &synth)?;
  let output_dir = config.estimator_dir(kind);
  AudioSet::clear_folder(&output_dir)?;
  let comparison = config.comparison_dir();
  SoundMatch::new(&synth, estimator.as_ref()).match_all(&targets, &output_dir, comparison.as_deref())
}

pub fn evaluate(config: &ExperimentConfig) -> Result<Evaluation> {
  let targets = AudioSet::load_folder(&config.target_dir())?;
  let estimations = config
    .estimators
    .iter()
    .map(|&kind| Ok((kind.name().to_string(), AudioSet::load_folder(&config.estimator_dir(kind))?)))
    .collect::<Result<Vec<_>>>()?;

  let mut evaluation = Evaluation::new(targets, estimations)?;
  evaluation.evaluate()?;
  evaluation.save_stats_json(&config.paths.evaluation_dir.join(STATS_FILE))?;
  evaluation.save_scores_json(&config.paths.evaluation_dir.join(SCORES_FILE))?;
  Ok(evaluation)
}

/// Every step in order.
pub fn run(config: &ExperimentConfig) -> Result<Evaluation> {
  log::info!("configuring synth");
  configure(config)?;
  log::info!("generating dataset");
  generate_dataset(config)?;
  log::info!("generating evaluation targets");
  generate_evaluation(config)?;

  for family in config.estimators.iter().filter_map(|kind| kind.family()) {
    log::info!("training {}", family);
    train(config, family)?;
  }
  for &kind in &config.estimators {
    match_estimator(config, kind)?;
  }
  log::info!("evaluating {} estimators", config.estimators.len());
  evaluate(config)
}
