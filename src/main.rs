//! Command-line entry point.

use std::path::PathBuf;

use candle_core::Device;
use clap::{Parser, Subcommand};
use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::info;
use tracing_subscriber::EnvFilter;

use ikgen_rs::{
    AdversarialTrainer, IkGenConfig, InvertibleTrainer, InverseDataset, Result, RobotArm2d,
};

#[derive(Parser)]
#[command(name = "ikgen")]
#[command(about = "Generative inverse-kinematics training for a planar robot arm")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable debug logging.
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a preset configuration file.
    Init {
        /// Preset name.
        #[arg(short, long, default_value = "arm-2d")]
        preset: String,

        /// Where to write the configuration.
        #[arg(short, long, default_value = "ikgen.yaml")]
        output: PathBuf,
    },

    /// Check a configuration file.
    Validate {
        /// Path to the configuration file.
        #[arg(short, long)]
        config: PathBuf,
    },

    /// Sample the arm's prior and write a configuration/position dataset.
    Generate {
        /// Path to the configuration file.
        #[arg(short, long)]
        config: PathBuf,

        /// Number of samples.
        #[arg(short, long, default_value_t = 10_000)]
        samples: usize,
    },

    /// Train the adversarial generator/discriminator pair.
    TrainGan {
        /// Path to the configuration file.
        #[arg(short, long)]
        config: PathBuf,
    },

    /// Train the invertible network.
    TrainInn {
        /// Path to the configuration file.
        #[arg(short, long)]
        config: PathBuf,
    },
}

fn main() {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .init();

    if let Err(err) = run(cli) {
        tracing::error!("{err}");
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Init { preset, output } => {
            let config = IkGenConfig::from_preset(&preset)?;
            config.to_file(&output)?;
            info!(path = %output.display(), %preset, "wrote configuration");
        }
        Commands::Validate { config } => {
            let config = IkGenConfig::from_file(&config)?;
            config.validate()?;
            info!(run_name = %config.run_name, "configuration is valid");
        }
        Commands::Generate { config, samples } => {
            let config = load_config(&config)?;
            let device = device()?;
            let mut rng = StdRng::seed_from_u64(config.seed);
            let arm = RobotArm2d::new(
                &config.kinematics,
                &config.run_dir().join("viz"),
                &device,
            )?;
            let dataset = InverseDataset::generate(&arm, samples, &mut rng)?;
            dataset.write(&config.dataset.path)?;
            info!(
                path = %config.dataset.path,
                samples,
                "wrote generated dataset"
            );
        }
        Commands::TrainGan { config } => {
            let config = load_config(&config)?;
            let device = device()?;
            let dataset = InverseDataset::load(&config.dataset.path)?;
            let mut trainer = AdversarialTrainer::new(&config, dataset, &device)?;
            trainer.train()?;
        }
        Commands::TrainInn { config } => {
            let config = load_config(&config)?;
            let device = device()?;
            let dataset = InverseDataset::load(&config.dataset.path)?;
            let mut trainer = InvertibleTrainer::new(&config, dataset, &device)?;
            trainer.train()?;
        }
    }
    Ok(())
}

fn load_config(path: &PathBuf) -> Result<IkGenConfig> {
    let config = IkGenConfig::from_file(path)?;
    config.validate()?;
    Ok(config)
}

#[cfg(feature = "cuda")]
fn device() -> Result<Device> {
    Ok(Device::cuda_if_available(0)?)
}

#[cfg(not(feature = "cuda"))]
fn device() -> Result<Device> {
    Ok(Device::Cpu)
}
