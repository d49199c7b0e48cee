//! # ikgen-rs
//!
//! Training loops for two generative inverse-kinematics models of a planar
//! robot arm: an adversarial generator/discriminator pair and an invertible
//! coupling network with moment-matching losses. Given a target end-effector
//! position, the trained models produce joint configurations that reach it.
//!
//! ## Example
//!
//! ```no_run
//! use candle_core::Device;
//! use ikgen_rs::{AdversarialTrainer, IkGenConfig, InverseDataset};
//!
//! # fn main() -> ikgen_rs::Result<()> {
//! let config = IkGenConfig::from_preset("arm-2d")?;
//! config.validate()?;
//! let dataset = InverseDataset::load(&config.dataset.path)?;
//! let mut trainer = AdversarialTrainer::new(&config, dataset, &Device::Cpu)?;
//! trainer.train()?;
//! # Ok(())
//! # }
//! ```

pub mod checkpoint;
pub mod config;
pub mod dataset;
pub mod error;
pub mod gan;
pub mod inn;
pub mod kinematics;
pub mod metrics;
pub mod mmd;
pub mod model;
pub mod optimizer;
pub mod scheduler;

pub use checkpoint::{load_checkpoint, save_checkpoint, CheckpointState, LossScalars};
pub use config::{DatasetConfig, GanConfig, IkGenConfig, InnConfig, KinematicsConfig};
pub use dataset::{InverseDataset, InverseSample};
pub use error::{IkGenError, Result};
pub use gan::AdversarialTrainer;
pub use inn::{InvertibleTrainer, LossTerms};
pub use kinematics::RobotArm2d;
pub use metrics::MetricsSink;
pub use model::{Discriminator, Generator, InvertibleNetwork};
pub use optimizer::{Adam, RmsProp};
pub use scheduler::ReduceOnPlateau;
