pub mod audio;
pub mod config;
pub mod dataset;
pub mod error;
pub mod estimator;
pub mod evaluation;
pub mod features;
pub mod files;
pub mod matching;
pub mod params;
pub mod parallel;
pub mod pipeline;
pub mod presets;
pub mod synth;
pub mod synth_config;
pub mod tensor;
