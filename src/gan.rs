//! Adversarial training loop.
//!
//! Alternates a generator step and a discriminator step per batch, with MSE
//! against fixed validity labels on the discriminator's scores. The generator
//! never trains against the dataset's position marginal: its targets come
//! from re-sampling the arm's prior and running forward kinematics, so the
//! achievable-position distribution is the conditioning signal.

use std::path::PathBuf;

use candle_core::{DType, Device, Tensor};
use candle_nn::loss::mse;
use indicatif::{ProgressBar, ProgressStyle};
use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::info;

use crate::checkpoint::{save_checkpoint, CheckpointState, LossScalars};
use crate::config::{GanConfig, IkGenConfig};
use crate::dataset::InverseDataset;
use crate::error::{IkGenError, Result};
use crate::kinematics::RobotArm2d;
use crate::metrics::{GanBatchRecord, MetricsSink};
use crate::model::{sample_normal, Discriminator, Generator};
use crate::optimizer::RmsProp;

/// Generator/discriminator trainer for the adversarial path.
pub struct AdversarialTrainer {
    config: GanConfig,
    run_dir: PathBuf,
    arm: RobotArm2d,
    dataset: InverseDataset,
    generator: Generator,
    discriminator: Discriminator,
    opt_g: RmsProp,
    opt_d: RmsProp,
    metrics: MetricsSink,
    rng: StdRng,
    device: Device,
    epoch: usize,
    batches_done: usize,
    last_z: Option<Tensor>,
    last_losses: LossScalars,
    eval_history: Vec<(usize, f32)>,
}

impl AdversarialTrainer {
    /// Build the trainer: seeded models and optimizers, run directory,
    /// metrics sink.
    ///
    /// # Errors
    /// Returns an error if the dataset dimensions disagree with the
    /// configuration or any collaborator fails to initialize.
    pub fn new(config: &IkGenConfig, dataset: InverseDataset, device: &Device) -> Result<Self> {
        if dataset.prior_dim() != config.gan.num_thetas {
            return Err(IkGenError::Dataset(format!(
                "dataset has {} joint values, config expects {}",
                dataset.prior_dim(),
                config.gan.num_thetas
            )));
        }
        if dataset.position_dim() != config.gan.dim_pos {
            return Err(IkGenError::Dataset(format!(
                "dataset has {}-dimensional positions, config expects {}",
                dataset.position_dim(),
                config.gan.dim_pos
            )));
        }

        let run_dir = config.run_dir();
        std::fs::create_dir_all(&run_dir)?;
        let arm = RobotArm2d::new(&config.kinematics, &run_dir.join("viz"), device)?;
        let metrics = MetricsSink::new(&run_dir)?;

        let mut rng = StdRng::seed_from_u64(config.seed);
        let generator = Generator::new(&config.gan, &mut rng, device)?;
        let discriminator = Discriminator::new(&config.gan, &mut rng, device)?;
        let opt_g = RmsProp::new(generator.varmap(), config.gan.lr);
        let opt_d = RmsProp::new(discriminator.varmap(), config.gan.lr);

        Ok(Self {
            config: config.gan.clone(),
            run_dir,
            arm,
            dataset,
            generator,
            discriminator,
            opt_g,
            opt_d,
            metrics,
            rng,
            device: device.clone(),
            epoch: 0,
            batches_done: 0,
            last_z: None,
            last_losses: LossScalars {
                loss_g: 0.0,
                loss_d: 0.0,
                loss_d_real: 0.0,
                loss_d_fake: 0.0,
            },
            eval_history: Vec::new(),
        })
    }

    /// Run the full training loop and write a final checkpoint.
    ///
    /// # Errors
    /// Returns an error on any tensor, metrics or checkpoint failure; there
    /// is no local recovery.
    pub fn train(&mut self) -> Result<()> {
        info!(
            epochs = self.config.num_epochs,
            batch_size = self.config.batch_size,
            lr = self.config.lr,
            "starting adversarial training"
        );
        let progress = ProgressBar::new(self.config.num_epochs as u64);
        progress.set_style(ProgressStyle::with_template(
            "{bar:40.cyan/blue} epoch {pos}/{len} [{elapsed_precise}] {msg}",
        )?);

        for epoch in 0..self.config.num_epochs {
            self.epoch = epoch;
            let batches =
                self.dataset
                    .batches(self.config.batch_size, &mut self.rng, &self.device)?;
            for (thetas_real, pos_real) in &batches {
                self.train_batch(thetas_real, pos_real)?;
            }
            progress.set_message(format!(
                "loss_D {:.4} loss_G {:.4}",
                self.last_losses.loss_d, self.last_losses.loss_g
            ));
            progress.inc(1);
        }
        progress.finish();

        self.save()?;
        info!(batches_done = self.batches_done, "adversarial training finished");
        Ok(())
    }

    /// One generator step followed by one discriminator step on a real batch,
    /// plus the cadenced evaluation and checkpointing.
    ///
    /// # Errors
    /// Returns an error on tensor, metrics or checkpoint failure.
    pub fn train_batch(&mut self, thetas_real: &Tensor, pos_real: &Tensor) -> Result<()> {
        let (b, _) = thetas_real.dims2()?;
        let valid = Tensor::ones((b, 1), DType::F32, &self.device)?;
        let fake = Tensor::zeros((b, 1), DType::F32, &self.device)?;

        // Generator step. The discriminator's score path carries gradient but
        // only the generator's parameters are stepped.
        let z = sample_normal(&mut self.rng, b, self.config.latent_dim, &self.device)?;
        let priors = self.arm.sample_priors(b, &mut self.rng)?;
        let pos_gen = self.arm.forward(&priors)?;
        let thetas_gen = self.generator.forward(&z, &pos_gen)?;
        let loss_g = mse(&self.discriminator.forward(&thetas_gen, &pos_gen)?, &valid)?;
        self.opt_g.step(&loss_g)?;

        // Discriminator step. The generated configurations are detached so no
        // gradient reaches the generator.
        let loss_d_real = mse(&self.discriminator.forward(thetas_real, pos_real)?, &valid)?;
        let loss_d_fake = mse(
            &self.discriminator.forward(&thetas_gen.detach(), &pos_gen)?,
            &fake,
        )?;
        let loss_d = ((&loss_d_real + &loss_d_fake)? * 0.5)?;
        self.opt_d.step(&loss_d)?;

        self.batches_done += 1;
        self.last_z = Some(z);
        self.last_losses = LossScalars {
            loss_g: loss_g.to_scalar::<f32>()?,
            loss_d: loss_d.to_scalar::<f32>()?,
            loss_d_real: loss_d_real.to_scalar::<f32>()?,
            loss_d_fake: loss_d_fake.to_scalar::<f32>()?,
        };
        self.metrics.log(&GanBatchRecord {
            epoch: self.epoch,
            loss_d: self.last_losses.loss_d,
            loss_d_real: self.last_losses.loss_d_real,
            loss_d_fake: self.last_losses.loss_d_fake,
            loss_g: self.last_losses.loss_g,
        })?;

        if self.batches_done % self.config.sample_interval == 0 {
            self.evaluate()?;
        }
        if self.batches_done % self.config.save_model_interval == 0 {
            self.save()?;
        }
        Ok(())
    }

    /// Evaluate against the fixed test position using the latent batch held
    /// over from the last training step.
    ///
    /// Writes a visualization keyed by `batches_done` and returns the mean
    /// Euclidean distance between achieved and target positions.
    ///
    /// # Errors
    /// Returns an error if called before any training step, or on tensor or
    /// I/O failure.
    pub fn evaluate(&mut self) -> Result<f32> {
        let z = self
            .last_z
            .as_ref()
            .ok_or_else(|| IkGenError::Training("evaluate called before any batch".into()))?
            .clone();
        let (b, _) = z.dims2()?;

        let target_row = Tensor::from_vec(
            self.config.pos_test.clone(),
            (1, self.config.dim_pos),
            &self.device,
        )?;
        let targets = target_row.broadcast_as((b, self.config.dim_pos))?.contiguous()?;

        let thetas = self.generator.forward(&z, &targets)?;
        let achieved = self.arm.forward(&thetas)?;
        let distance = self.arm.distance_euclidean(&achieved, &targets)?;

        self.arm
            .viz_inverse(&target_row, &thetas, &self.batches_done.to_string())?;
        info!(
            epoch = self.epoch,
            batches_done = self.batches_done,
            distance,
            "evaluation against fixed target"
        );
        self.eval_history.push((self.batches_done, distance));
        Ok(distance)
    }

    fn save(&self) -> Result<()> {
        let state = CheckpointState {
            epoch: self.epoch,
            batches_done: self.batches_done,
            losses: self.last_losses,
        };
        let dir = save_checkpoint(
            &self.run_dir,
            &state,
            &self.generator,
            &self.discriminator,
            &self.opt_g,
            &self.opt_d,
        )?;
        info!(path = %dir.display(), "wrote checkpoint");
        Ok(())
    }

    /// The generator.
    #[must_use]
    pub fn generator(&self) -> &Generator {
        &self.generator
    }

    /// The discriminator.
    #[must_use]
    pub fn discriminator(&self) -> &Discriminator {
        &self.discriminator
    }

    /// Total batches trained so far.
    #[must_use]
    pub fn batches_done(&self) -> usize {
        self.batches_done
    }

    /// `(batches_done, mean distance)` per evaluation, in order.
    #[must_use]
    pub fn eval_history(&self) -> &[(usize, f32)] {
        &self.eval_history
    }

    /// Directory holding this run's artifacts.
    #[must_use]
    pub fn run_dir(&self) -> &std::path::Path {
        &self.run_dir
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;
    use tempfile::TempDir;

    fn tiny_config(output_dir: &Path) -> IkGenConfig {
        let mut config = IkGenConfig::from_preset("arm-2d").unwrap();
        config.output_dir = output_dir.to_string_lossy().into_owned();
        config.run_name = "tiny".into();
        config.gan.num_epochs = 2;
        config.gan.batch_size = 4;
        config.gan.hidden_dim = 8;
        config.gan.sample_interval = 2;
        config.gan.save_model_interval = 4;
        config
    }

    fn tiny_trainer(output_dir: &Path) -> AdversarialTrainer {
        let config = tiny_config(output_dir);
        let mut rng = StdRng::seed_from_u64(config.seed);
        let arm = RobotArm2d::new(
            &config.kinematics,
            &output_dir.join("gen-viz"),
            &Device::Cpu,
        )
        .unwrap();
        let dataset = InverseDataset::generate(&arm, 16, &mut rng).unwrap();
        AdversarialTrainer::new(&config, dataset, &Device::Cpu).unwrap()
    }

    fn flatten_vars(varmap: &candle_nn::VarMap) -> Vec<Vec<f32>> {
        let mut out: Vec<Vec<f32>> = varmap
            .all_vars()
            .iter()
            .map(|v| v.flatten_all().unwrap().to_vec1::<f32>().unwrap())
            .collect();
        out.sort_by(|a, b| a.partial_cmp(b).unwrap());
        out
    }

    #[test]
    fn test_generator_step_leaves_discriminator_untouched() {
        let dir = TempDir::new().unwrap();
        let mut trainer = tiny_trainer(dir.path());

        let disc_before = flatten_vars(trainer.discriminator.varmap());

        let b = trainer.config.batch_size;
        let valid = Tensor::ones((b, 1), DType::F32, &Device::Cpu).unwrap();
        let z = sample_normal(&mut trainer.rng, b, trainer.config.latent_dim, &Device::Cpu)
            .unwrap();
        let priors = trainer.arm.sample_priors(b, &mut trainer.rng).unwrap();
        let pos_gen = trainer.arm.forward(&priors).unwrap();
        let thetas_gen = trainer.generator.forward(&z, &pos_gen).unwrap();
        let loss_g = mse(
            &trainer.discriminator.forward(&thetas_gen, &pos_gen).unwrap(),
            &valid,
        )
        .unwrap();
        trainer.opt_g.step(&loss_g).unwrap();

        assert_eq!(disc_before, flatten_vars(trainer.discriminator.varmap()));
    }

    #[test]
    fn test_detached_fake_loss_gives_no_generator_gradient() {
        let dir = TempDir::new().unwrap();
        let trainer = tiny_trainer(dir.path());

        let b = trainer.config.batch_size;
        let fake = Tensor::zeros((b, 1), DType::F32, &Device::Cpu).unwrap();
        let mut rng = StdRng::seed_from_u64(1);
        let z = sample_normal(&mut rng, b, trainer.config.latent_dim, &Device::Cpu).unwrap();
        let priors = trainer.arm.sample_priors(b, &mut rng).unwrap();
        let pos_gen = trainer.arm.forward(&priors).unwrap();
        let thetas_gen = trainer.generator.forward(&z, &pos_gen).unwrap();

        let loss_d_fake = mse(
            &trainer
                .discriminator
                .forward(&thetas_gen.detach(), &pos_gen)
                .unwrap(),
            &fake,
        )
        .unwrap();
        let grads = loss_d_fake.backward().unwrap();
        for var in trainer.generator.varmap().all_vars() {
            assert!(grads.get(&var).is_none());
        }
        // Without the detach the generator would receive gradient.
        let loss_attached = mse(
            &trainer
                .discriminator
                .forward(&thetas_gen, &pos_gen)
                .unwrap(),
            &fake,
        )
        .unwrap();
        let grads = loss_attached.backward().unwrap();
        assert!(trainer
            .generator
            .varmap()
            .all_vars()
            .iter()
            .any(|var| grads.get(var).is_some()));
    }

    #[test]
    fn test_discriminator_step_leaves_generator_untouched() {
        let dir = TempDir::new().unwrap();
        let mut trainer = tiny_trainer(dir.path());

        // Full batches so both steps run; the generator must change only in
        // its own step, so compare across a discriminator-only replay.
        let gen_before = flatten_vars(trainer.generator.varmap());
        let b = trainer.config.batch_size;
        let valid = Tensor::ones((b, 1), DType::F32, &Device::Cpu).unwrap();
        let fake = Tensor::zeros((b, 1), DType::F32, &Device::Cpu).unwrap();
        let mut rng = StdRng::seed_from_u64(2);
        let thetas_real = sample_normal(&mut rng, b, trainer.config.num_thetas, &Device::Cpu)
            .unwrap();
        let pos_real = sample_normal(&mut rng, b, trainer.config.dim_pos, &Device::Cpu).unwrap();
        let z = sample_normal(&mut rng, b, trainer.config.latent_dim, &Device::Cpu).unwrap();
        let thetas_gen = trainer.generator.forward(&z, &pos_real).unwrap();

        let loss_d_real = mse(
            &trainer.discriminator.forward(&thetas_real, &pos_real).unwrap(),
            &valid,
        )
        .unwrap();
        let loss_d_fake = mse(
            &trainer
                .discriminator
                .forward(&thetas_gen.detach(), &pos_real)
                .unwrap(),
            &fake,
        )
        .unwrap();
        let loss_d = ((&loss_d_real + &loss_d_fake).unwrap() * 0.5).unwrap();
        trainer.opt_d.step(&loss_d).unwrap();

        assert_eq!(gen_before, flatten_vars(trainer.generator.varmap()));
    }

    #[test]
    fn test_train_batch_shapes_and_loss_composition() {
        let dir = TempDir::new().unwrap();
        let mut trainer = tiny_trainer(dir.path());

        let mut rng = StdRng::seed_from_u64(3);
        let batches = trainer
            .dataset
            .batches(trainer.config.batch_size, &mut rng, &Device::Cpu)
            .unwrap();
        let (thetas_real, pos_real) = &batches[0];
        trainer.train_batch(thetas_real, pos_real).unwrap();

        assert_eq!(trainer.batches_done(), 1);
        let losses = trainer.last_losses;
        let recomposed = (losses.loss_d_real + losses.loss_d_fake) / 2.0;
        assert!((losses.loss_d - recomposed).abs() < 1e-6);
        assert!(trainer.last_z.is_some());
    }

    #[test]
    fn test_evaluate_before_training_fails() {
        let dir = TempDir::new().unwrap();
        let mut trainer = tiny_trainer(dir.path());
        assert!(matches!(
            trainer.evaluate(),
            Err(IkGenError::Training(_))
        ));
    }

    #[test]
    fn test_evaluate_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let mut trainer = tiny_trainer(dir.path());

        let mut rng = StdRng::seed_from_u64(4);
        let batches = trainer
            .dataset
            .batches(trainer.config.batch_size, &mut rng, &Device::Cpu)
            .unwrap();
        trainer.train_batch(&batches[0].0, &batches[0].1).unwrap();

        let first = trainer.evaluate().unwrap();
        let second = trainer.evaluate().unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_full_run_cadence_and_artifacts() {
        let dir = TempDir::new().unwrap();
        let mut trainer = tiny_trainer(dir.path());
        trainer.train().unwrap();

        // 16 samples, batch 4, 2 epochs.
        assert_eq!(trainer.batches_done(), 8);

        // Evaluations at every multiple of the sample interval.
        let eval_points: Vec<usize> =
            trainer.eval_history().iter().map(|(b, _)| *b).collect();
        assert_eq!(eval_points, vec![2, 4, 6, 8]);

        // Cadenced checkpoints plus the final one, keyed by epoch.
        assert!(trainer.run_dir().join("checkpoint-0").exists());
        assert!(trainer.run_dir().join("checkpoint-1").exists());

        // One metrics line per batch.
        let metrics =
            std::fs::read_to_string(trainer.run_dir().join("metrics.jsonl")).unwrap();
        assert_eq!(metrics.lines().count(), 8);
        for line in metrics.lines() {
            let record: serde_json::Value = serde_json::from_str(line).unwrap();
            let loss_d = record["loss_d"].as_f64().unwrap();
            let real = record["loss_d_real"].as_f64().unwrap();
            let fake = record["loss_d_fake"].as_f64().unwrap();
            assert!((loss_d - (real + fake) / 2.0).abs() < 1e-5);
        }

        // Visualization artifacts keyed by batches_done.
        assert!(trainer.run_dir().join("viz/2.svg").exists());
        assert!(trainer.run_dir().join("viz/8.svg").exists());
    }
}
