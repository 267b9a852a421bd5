#![allow(dead_code)]

use std::path::Path;

use serde_json::json;
use soundmatch::config::ExperimentConfig;
use soundmatch::synth::{EngineKind, Synth};
use soundmatch::synth_config::SynthConfig;

pub const SAMPLE_RATE: u32 = 8000;

/// Short renders at a low rate keep integration runs quick.
pub fn render_config() -> SynthConfig {
  SynthConfig::new(SAMPLE_RATE, 0.2, 0.25)
}

pub fn synth() -> Synth {
  Synth::new(EngineKind::SimpleFm.build(), render_config()).unwrap()
}

/// An experiment rooted in `root` with every size turned down.
pub fn small_experiment(root: &Path, estimators: &[&str]) -> ExperimentConfig {
  let value = json!({
    "synth": {"sample_rate": SAMPLE_RATE, "note_length_secs": 0.2, "render_length_secs": 0.25},
    "overrides": {"preset": "simple_fm"},
    "paths": {
      "init_state": root.join("synth_params/init.json"),
      "synth_state": root.join("synth_params/simple_fm.json"),
      "dataset_dir": root.join("data"),
      "evaluation_dir": root.join("evaluation"),
      "models_dir": root.join("models")
    },
    "seed": 11,
    "dataset": {
      "train_size": 40,
      "test_size": 10,
      "features": {"kind": "mfcc", "num_mfccs": 13, "frame_size": 512, "hop_size": 256, "time_major": true}
    },
    "evaluation_set": {"num_samples": 5},
    "training": {"epochs": 3, "batch_size": 8, "patience": 2, "mlp_layers": [16, 8], "lstm_units": 8, "highway_layers": 2},
    "genetic": {"pop_size": 8, "ngen": 2, "features": {"kind": "mfcc", "num_mfccs": 13, "frame_size": 512, "hop_size": 256, "time_major": true}},
    "nsga": {"pop_size": 8, "ngen": 2, "reference_divisions": 3},
    "estimators": estimators
  });
  let config: ExperimentConfig = serde_json::from_value(value).unwrap();
  config.validate().unwrap();
  config
}
