use std::path::PathBuf;
use std::process;

use clap::{Parser, Subcommand};

use soundmatch::config::ExperimentConfig;
use soundmatch::error::Result;
use soundmatch::estimator::nn::NeuralFamily;
use soundmatch::estimator::EstimatorKind;
use soundmatch::{parallel, pipeline, presets};

#[derive(Parser)]
#[command(name = "soundmatch")]
#[command(about = "Synthesizer sound matching experiments", long_about = None)]
struct Cli {
  /// Experiment config (JSON)
  #[arg(short, long, global = true, default_value = "experiment.json")]
  config: PathBuf,

  #[command(subcommand)]
  command: Commands,
}

#[derive(Subcommand)]
enum Commands {
  /// List built-in override presets and the values they freeze
  Presets,
  /// Save the initial synth state, apply overrides, save the configured state
  Configure,
  /// Generate the train and test feature datasets and the scaler
  Generate,
  /// Render the evaluation targets
  GenerateEval,
  /// Train one neural estimator
  Train {
    /// mlp, lstm or hwy_blstm
    #[arg(short, long)]
    model: NeuralFamily,
  },
  /// Match every evaluation target with one estimator
  Match {
    /// mlp, lstm, hwy_blstm, ga or nsga
    #[arg(short, long)]
    estimator: EstimatorKind,
  },
  /// Score all configured estimators against the targets
  Evaluate,
  /// Every step in order
  Run,
}

fn list_presets() -> Result<()> {
  for name in presets::names() {
    let resolved = presets::preset(name)?.resolve();
    println!("{} ({} overridden)", name, resolved.len());
    for group in presets::groups(name).unwrap_or(&[]) {
      println!("  # {}", group.name);
    }
    for (index, value) in resolved {
      println!("  {:>3} = {}", index, value.get());
    }
  }
  Ok(())
}

fn execute(cli: &Cli) -> Result<()> {
  if let Commands::Presets = cli.command {
    return list_presets();
  }

  let config = ExperimentConfig::load(&cli.config)?;
  parallel::init_global_pool(config.workers);
  match cli.command {
    Commands::Presets => Ok(()),
    Commands::Configure => {
      let state = pipeline::configure(&config)?;
      println!(
        "{}: {} parameters, {} overridden -> {}",
        state.engine,
        state.parameters.len(),
        state.overridden.len(),
        config.paths.synth_state.display()
      );
      Ok(())
    }
    Commands::Generate => {
      let (train, test) = pipeline::generate_dataset(&config)?;
      println!("train {:?} / test {:?}", train.features.shape, test.features.shape);
      Ok(())
    }
    Commands::GenerateEval => {
      let targets = pipeline::generate_evaluation(&config)?;
      println!("{} targets in {}", targets.len(), config.target_dir().display());
      Ok(())
    }
    Commands::Train { model } => {
      let log = pipeline::train(&config, model)?;
      if let Some(best) = log.epochs.get(log.best_epoch.saturating_sub(1)) {
        println!("{}: best epoch {} val_loss {:.5} val_mae {:.5}", model, best.epoch, best.val_loss, best.val_mae);
      }
      Ok(())
    }
    Commands::Match { estimator } => {
      let output = pipeline::match_estimator(&config, estimator)?;
      println!("{}: {} estimates", estimator, output.estimates.len());
      Ok(())
    }
    Commands::Evaluate => {
      let evaluation = pipeline::evaluate(&config)?;
      println!("{} scores written", evaluation.scores().len());
      Ok(())
    }
    Commands::Run => {
      let evaluation = pipeline::run(&config)?;
      println!("{} scores written", evaluation.scores().len());
      Ok(())
    }
  }
}

fn main() {
  dotenv::dotenv().ok();
  env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

  let cli = Cli::parse();

  if let Err(e) = execute(&cli) {
    log::error!("{}", e);
    eprintln!("error: {}", e);
    process::exit(1);
  }
}
