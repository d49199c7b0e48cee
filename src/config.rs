//! Configuration parsing and validation.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{IkGenError, Result};

/// Main configuration for an ikgen training run.
///
/// All hyperparameters for both training paths live here and are supplied at
/// startup; there is no interactive surface beyond process invocation.
///
/// # Example
///
/// ```rust
/// use ikgen_rs::IkGenConfig;
///
/// # fn main() -> ikgen_rs::Result<()> {
/// let mut config = IkGenConfig::from_preset("arm-2d")?;
/// config.gan.num_epochs = 5;
/// config.validate()?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IkGenConfig {
    /// Name of this run; namespaces metrics, checkpoints and artifacts.
    #[serde(default = "default_run_name")]
    pub run_name: String,

    /// Output directory; the run directory is created beneath it.
    #[serde(default = "default_output_dir")]
    pub output_dir: String,

    /// Random seed consumed once at startup by every random source
    /// (weight init, latent/noise sampling, prior sampling, shuffling).
    #[serde(default = "default_seed")]
    pub seed: u64,

    /// Robot arm parameters.
    #[serde(default)]
    pub kinematics: KinematicsConfig,

    /// Dataset configuration.
    #[serde(default)]
    pub dataset: DatasetConfig,

    /// Adversarial (generator/discriminator) path hyperparameters.
    #[serde(default)]
    pub gan: GanConfig,

    /// Invertible-network path hyperparameters.
    #[serde(default)]
    pub inn: InnConfig,
}

fn default_run_name() -> String {
    "ikgen-run".into()
}
fn default_output_dir() -> String {
    "./outputs".into()
}
fn default_seed() -> u64 {
    123_456
}

/// Planar robot arm parameters: a sliding base joint plus three rotary links.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KinematicsConfig {
    /// Link lengths.
    #[serde(default = "default_lengths")]
    pub lengths: Vec<f32>,

    /// Per-joint prior standard deviations (base height first).
    #[serde(default = "default_sigmas")]
    pub sigmas: Vec<f32>,
}

fn default_lengths() -> Vec<f32> {
    vec![0.5, 0.5, 1.0]
}
fn default_sigmas() -> Vec<f32> {
    vec![0.25, 0.5, 0.5, 0.5]
}

impl Default for KinematicsConfig {
    fn default() -> Self {
        Self {
            lengths: default_lengths(),
            sigmas: default_sigmas(),
        }
    }
}

/// Dataset configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasetConfig {
    /// Path to the JSONL pair file.
    #[serde(default = "default_dataset_path")]
    pub path: String,

    /// Validation split portion (invertible path only).
    #[serde(default = "default_val_split")]
    pub val_split: f32,
}

fn default_dataset_path() -> String {
    "data/inverse.jsonl".into()
}
fn default_val_split() -> f32 {
    0.1
}

impl Default for DatasetConfig {
    fn default() -> Self {
        Self {
            path: default_dataset_path(),
            val_split: default_val_split(),
        }
    }
}

/// Hyperparameters for the adversarial path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GanConfig {
    /// Learning rate for both RMSprop optimizers.
    #[serde(default = "default_gan_lr")]
    pub lr: f64,

    /// Number of epochs.
    #[serde(default = "default_gan_epochs")]
    pub num_epochs: usize,

    /// Evaluation/visualization cadence in batches.
    #[serde(default = "default_sample_interval")]
    pub sample_interval: usize,

    /// Checkpoint cadence in batches.
    #[serde(default = "default_save_model_interval")]
    pub save_model_interval: usize,

    /// Batch size; incomplete final batches are dropped.
    #[serde(default = "default_gan_batch_size")]
    pub batch_size: usize,

    /// Number of joint angles produced by the generator.
    #[serde(default = "default_num_thetas")]
    pub num_thetas: usize,

    /// End-effector position dimensionality.
    #[serde(default = "default_dim_pos")]
    pub dim_pos: usize,

    /// Latent code dimensionality.
    #[serde(default = "default_latent_dim")]
    pub latent_dim: usize,

    /// Hidden width of the generator/discriminator MLPs.
    #[serde(default = "default_hidden_dim")]
    pub hidden_dim: usize,

    /// Fixed target position used by the deterministic evaluation batch.
    #[serde(default = "default_pos_test")]
    pub pos_test: Vec<f32>,
}

fn default_gan_lr() -> f64 {
    5e-4
}
fn default_gan_epochs() -> usize {
    300
}
fn default_sample_interval() -> usize {
    100
}
fn default_save_model_interval() -> usize {
    200
}
fn default_gan_batch_size() -> usize {
    64
}
fn default_num_thetas() -> usize {
    4
}
fn default_dim_pos() -> usize {
    2
}
fn default_latent_dim() -> usize {
    3
}
fn default_hidden_dim() -> usize {
    128
}
fn default_pos_test() -> Vec<f32> {
    vec![1.5, 0.0]
}

impl Default for GanConfig {
    fn default() -> Self {
        Self {
            lr: default_gan_lr(),
            num_epochs: default_gan_epochs(),
            sample_interval: default_sample_interval(),
            save_model_interval: default_save_model_interval(),
            batch_size: default_gan_batch_size(),
            num_thetas: default_num_thetas(),
            dim_pos: default_dim_pos(),
            latent_dim: default_latent_dim(),
            hidden_dim: default_hidden_dim(),
            pos_test: default_pos_test(),
        }
    }
}

/// Hyperparameters for the invertible-network path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InnConfig {
    /// Adam learning rate.
    #[serde(default = "default_inn_lr")]
    pub lr: f64,

    /// Number of epochs.
    #[serde(default = "default_inn_epochs")]
    pub epochs: usize,

    /// Batch size; incomplete final batches are dropped.
    #[serde(default = "default_inn_batch_size")]
    pub batch_size: usize,

    /// Plateau patience (epochs) before the learning rate is reduced.
    #[serde(default = "default_lr_patience")]
    pub lr_patience: usize,

    /// Number of affine coupling blocks.
    #[serde(default = "default_num_blocks")]
    pub num_blocks: usize,

    /// Hidden width of the coupling subnets.
    #[serde(default = "default_hidden_dim")]
    pub hidden_dim: usize,

    /// Forward fit loss weight.
    #[serde(default = "default_forward_fit_factor")]
    pub forward_fit_factor: f64,

    /// Forward moment-matching loss weight.
    #[serde(default = "default_forward_mmd_factor")]
    pub forward_mmd_factor: f64,

    /// Backward moment-matching loss weight.
    #[serde(default = "default_backward_mmd_factor")]
    pub backward_mmd_factor: f64,

    /// Reconstruction loss weight.
    #[serde(default = "default_reconstruction_factor")]
    pub reconstruction_factor: f64,

    /// Name of the append-only per-epoch loss log inside the run directory.
    #[serde(default = "default_loss_log")]
    pub loss_log: String,
}

fn default_inn_lr() -> f64 {
    1e-6
}
fn default_inn_epochs() -> usize {
    1000
}
fn default_inn_batch_size() -> usize {
    128
}
fn default_lr_patience() -> usize {
    10
}
fn default_num_blocks() -> usize {
    6
}
fn default_forward_fit_factor() -> f64 {
    1.0
}
fn default_forward_mmd_factor() -> f64 {
    50.0
}
fn default_backward_mmd_factor() -> f64 {
    500.0
}
fn default_reconstruction_factor() -> f64 {
    1.0
}
fn default_loss_log() -> String {
    "losses.csv".into()
}

impl Default for InnConfig {
    fn default() -> Self {
        Self {
            lr: default_inn_lr(),
            epochs: default_inn_epochs(),
            batch_size: default_inn_batch_size(),
            lr_patience: default_lr_patience(),
            num_blocks: default_num_blocks(),
            hidden_dim: default_hidden_dim(),
            forward_fit_factor: default_forward_fit_factor(),
            forward_mmd_factor: default_forward_mmd_factor(),
            backward_mmd_factor: default_backward_mmd_factor(),
            reconstruction_factor: default_reconstruction_factor(),
            loss_log: default_loss_log(),
        }
    }
}

impl IkGenConfig {
    /// Load configuration from a YAML file.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    /// Write configuration to a YAML file.
    ///
    /// # Errors
    /// Returns an error if serialization or writing fails.
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = serde_yaml::to_string(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Create configuration from a named preset.
    ///
    /// # Errors
    /// Returns an error for an unknown preset name.
    pub fn from_preset(preset: &str) -> Result<Self> {
        match preset {
            "arm-2d" => Ok(Self {
                run_name: default_run_name(),
                output_dir: default_output_dir(),
                seed: default_seed(),
                kinematics: KinematicsConfig::default(),
                dataset: DatasetConfig::default(),
                gan: GanConfig::default(),
                inn: InnConfig::default(),
            }),
            other => Err(IkGenError::Config(format!("unknown preset: {other}"))),
        }
    }

    /// Validate the configuration.
    ///
    /// # Errors
    /// Returns a `Config` error naming the first invalid field.
    pub fn validate(&self) -> Result<()> {
        if self.run_name.is_empty() {
            return Err(IkGenError::Config("run_name cannot be empty".into()));
        }
        if self.dataset.path.is_empty() {
            return Err(IkGenError::Config("dataset.path cannot be empty".into()));
        }
        if !(0.0..1.0).contains(&self.dataset.val_split) {
            return Err(IkGenError::Config(
                "dataset.val_split must be in [0, 1)".into(),
            ));
        }
        if self.kinematics.lengths.is_empty() {
            return Err(IkGenError::Config(
                "kinematics.lengths cannot be empty".into(),
            ));
        }
        if self.kinematics.sigmas.len() != self.kinematics.lengths.len() + 1 {
            return Err(IkGenError::Config(
                "kinematics.sigmas must have one entry per link plus the base joint".into(),
            ));
        }
        if self.gan.batch_size == 0 || self.inn.batch_size == 0 {
            return Err(IkGenError::Config("batch_size must be positive".into()));
        }
        if self.gan.num_epochs == 0 || self.inn.epochs == 0 {
            return Err(IkGenError::Config("epoch count must be positive".into()));
        }
        if self.gan.sample_interval == 0 || self.gan.save_model_interval == 0 {
            return Err(IkGenError::Config(
                "gan.sample_interval and gan.save_model_interval must be positive".into(),
            ));
        }
        if self.gan.num_thetas == 0 || self.gan.dim_pos == 0 || self.gan.latent_dim == 0 {
            return Err(IkGenError::Config(
                "gan model dimensions must be positive".into(),
            ));
        }
        if self.gan.pos_test.len() != self.gan.dim_pos {
            return Err(IkGenError::Config(
                "gan.pos_test length must match gan.dim_pos".into(),
            ));
        }
        if self.inn.num_blocks == 0 {
            return Err(IkGenError::Config("inn.num_blocks must be positive".into()));
        }
        if self.gan.lr <= 0.0 || self.inn.lr <= 0.0 {
            return Err(IkGenError::Config("learning rates must be positive".into()));
        }
        Ok(())
    }

    /// Directory holding all artifacts for this run.
    #[must_use]
    pub fn run_dir(&self) -> PathBuf {
        Path::new(&self.output_dir).join(&self.run_name)
    }
}
