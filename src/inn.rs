//! Invertible-network training loop.
//!
//! One bijective network is trained in both directions with a four-term
//! composite loss: an L2 fit on the position block, a forward
//! moment-matching term with the position block detached, a backward
//! moment-matching term through the inverse, and a reconstruction term on the
//! detached forward output. A single Adam step is applied to the summed
//! scalar per batch.
//!
//! Note on the scheduler signal: the plateau scheduler observes the mean of
//! the mean training losses, not the validation mean, even though validation
//! is computed every epoch. This mirrors the reference behavior on purpose.

use std::fs::OpenOptions;
use std::path::{Path, PathBuf};

use candle_core::{Device, Tensor};
use indicatif::{ProgressBar, ProgressStyle};
use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::info;

use crate::config::{IkGenConfig, InnConfig};
use crate::dataset::InverseDataset;
use crate::error::{IkGenError, Result};
use crate::metrics::{InnEpochRecord, MetricsSink};
use crate::mmd::{l2_fit, mmd};
use crate::model::{sample_normal, InvertibleNetwork};
use crate::optimizer::Adam;
use crate::scheduler::ReduceOnPlateau;

/// The four weighted loss terms of one batch.
pub struct LossTerms {
    pub fit: Tensor,
    pub forward_mmd: Tensor,
    pub backward_mmd: Tensor,
    pub reconstruction: Tensor,
}

impl LossTerms {
    /// Sum of the four terms; the tensor the optimizer steps on.
    ///
    /// # Errors
    /// Returns an error on tensor failure.
    pub fn total(&self) -> Result<Tensor> {
        Ok((((&self.fit + &self.forward_mmd)? + &self.backward_mmd)? + &self.reconstruction)?)
    }

    /// The terms as scalars, in fit/forward/backward/reconstruction order.
    ///
    /// # Errors
    /// Returns an error on tensor failure.
    pub fn to_scalars(&self) -> Result<[f32; 4]> {
        Ok([
            self.fit.to_scalar::<f32>()?,
            self.forward_mmd.to_scalar::<f32>()?,
            self.backward_mmd.to_scalar::<f32>()?,
            self.reconstruction.to_scalar::<f32>()?,
        ])
    }
}

/// Bijective-model trainer for the invertible path.
pub struct InvertibleTrainer {
    config: InnConfig,
    run_dir: PathBuf,
    inn: InvertibleNetwork,
    optimizer: Adam,
    scheduler: ReduceOnPlateau,
    train_set: InverseDataset,
    val_set: InverseDataset,
    metrics: MetricsSink,
    rng: StdRng,
    device: Device,
    z_dim: usize,
    position_dim: usize,
}

impl InvertibleTrainer {
    /// Build the trainer: seeded network, Adam, plateau scheduler, and the
    /// train/validation split.
    ///
    /// # Errors
    /// Returns an error if the joint space is not wider than the position
    /// space or any collaborator fails to initialize.
    pub fn new(config: &IkGenConfig, dataset: InverseDataset, device: &Device) -> Result<Self> {
        let prior_dim = dataset.prior_dim();
        let position_dim = dataset.position_dim();
        if prior_dim <= position_dim {
            return Err(IkGenError::Dataset(format!(
                "joint space ({prior_dim}) must be wider than position space ({position_dim})"
            )));
        }
        let z_dim = prior_dim - position_dim;

        let run_dir = config.run_dir();
        std::fs::create_dir_all(&run_dir)?;
        let metrics = MetricsSink::new(&run_dir)?;
        let (train_set, val_set) = dataset.split(config.dataset.val_split);

        let mut rng = StdRng::seed_from_u64(config.seed);
        let inn = InvertibleNetwork::new(prior_dim, &config.inn, &mut rng, device)?;
        let optimizer = Adam::new(inn.varmap(), config.inn.lr);
        let scheduler = ReduceOnPlateau::new(config.inn.lr_patience, 0.0);

        Ok(Self {
            config: config.inn.clone(),
            run_dir,
            inn,
            optimizer,
            scheduler,
            train_set,
            val_set,
            metrics,
            rng,
            device: device.clone(),
            z_dim,
            position_dim,
        })
    }

    /// Run the full training loop, appending one loss-log row per epoch.
    ///
    /// # Errors
    /// Returns an error on any tensor, log or metrics failure; there is no
    /// local recovery.
    pub fn train(&mut self) -> Result<()> {
        info!(
            epochs = self.config.epochs,
            batch_size = self.config.batch_size,
            lr = self.config.lr,
            train_samples = self.train_set.len(),
            val_samples = self.val_set.len(),
            "starting invertible training"
        );
        let log_path = self.run_dir.join(&self.config.loss_log);
        let log_file = OpenOptions::new().create(true).append(true).open(&log_path)?;
        let mut loss_log = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(log_file);

        let progress = ProgressBar::new(self.config.epochs as u64);
        progress.set_style(ProgressStyle::with_template(
            "{bar:40.green/white} epoch {pos}/{len} [{elapsed_precise}] {msg}",
        )?);

        for epoch in 0..self.config.epochs {
            let train_mean = self.train_epoch()?;
            self.scheduler.step(train_mean, &mut self.optimizer);
            let val_mean = self.validate_epoch()?;

            loss_log.write_record([train_mean.to_string(), val_mean.to_string()])?;
            loss_log.flush()?;
            self.metrics.log(&InnEpochRecord {
                epoch,
                train_loss: train_mean,
                val_loss: val_mean,
            })?;
            info!(
                epoch,
                train_loss = train_mean,
                val_loss = val_mean,
                lr = self.optimizer.learning_rate(),
                "epoch complete"
            );
            progress.set_message(format!("train {train_mean:.4} val {val_mean:.4}"));
            progress.inc(1);
        }
        progress.finish();
        info!("invertible training finished");
        Ok(())
    }

    /// One pass over the training set; returns the mean of the per-term
    /// batch means.
    fn train_epoch(&mut self) -> Result<f64> {
        let batches =
            self.train_set
                .batches(self.config.batch_size, &mut self.rng, &self.device)?;
        let mut term_sums = [0.0f64; 4];
        let count = batches.len();
        for (priors, positions) in &batches {
            let terms = self.compute_losses(priors, positions)?;
            let total = terms.total()?;
            self.optimizer.step(&total)?;
            for (sum, scalar) in term_sums.iter_mut().zip(terms.to_scalars()?) {
                *sum += f64::from(scalar);
            }
        }
        Ok(mean_of_term_means(&term_sums, count))
    }

    /// One pass over the validation set with no optimizer step.
    fn validate_epoch(&mut self) -> Result<f64> {
        let batches =
            self.val_set
                .batches(self.config.batch_size, &mut self.rng, &self.device)?;
        let mut term_sums = [0.0f64; 4];
        let count = batches.len();
        for (priors, positions) in &batches {
            let terms = self.compute_losses(priors, positions)?;
            for (sum, scalar) in term_sums.iter_mut().zip(terms.to_scalars()?) {
                *sum += f64::from(scalar);
            }
        }
        Ok(mean_of_term_means(&term_sums, count))
    }

    /// Compute the four weighted loss terms for one batch.
    ///
    /// A fresh noise block pads the positions into the target `y`; the
    /// detachment points are exactly where gradients must not flow: the
    /// position block inside the forward moment-matching input, and the whole
    /// forward output inside the reconstruction term.
    ///
    /// # Errors
    /// Returns an error on tensor failure.
    pub fn compute_losses(&mut self, priors: &Tensor, positions: &Tensor) -> Result<LossTerms> {
        let (b, _) = priors.dims2()?;
        let noise = sample_normal(&mut self.rng, b, self.z_dim, &self.device)?;
        let y = Tensor::cat(&[&noise, positions], 1)?;

        let y_pred = self.inn.forward(priors)?;
        let pred_z = y_pred.narrow(1, 0, self.z_dim)?;
        let pred_pos = y_pred.narrow(1, self.z_dim, self.position_dim)?;

        let fit = (l2_fit(&pred_pos, &y.narrow(1, self.z_dim, self.position_dim)?)?
            * self.config.forward_fit_factor)?;

        let pred_mixed = Tensor::cat(&[&pred_z, &pred_pos.detach()], 1)?;
        let forward_mmd = (mmd(&pred_mixed, &y)? * self.config.forward_mmd_factor)?;

        let backward_mmd =
            (mmd(priors, &self.inn.reverse(&y)?)? * self.config.backward_mmd_factor)?;

        let reconstruction = (l2_fit(&self.inn.reverse(&y_pred.detach())?, priors)?
            * self.config.reconstruction_factor)?;

        Ok(LossTerms {
            fit,
            forward_mmd,
            backward_mmd,
            reconstruction,
        })
    }

    /// The invertible network.
    #[must_use]
    pub fn inn(&self) -> &InvertibleNetwork {
        &self.inn
    }

    /// The plateau scheduler.
    #[must_use]
    pub fn scheduler(&self) -> &ReduceOnPlateau {
        &self.scheduler
    }

    /// Width of the noise block padding positions up to the joint dimension.
    #[must_use]
    pub fn z_dim(&self) -> usize {
        self.z_dim
    }

    /// Directory holding this run's artifacts.
    #[must_use]
    pub fn run_dir(&self) -> &Path {
        &self.run_dir
    }
}

/// Mean over terms of the per-term batch means. An empty epoch yields NaN,
/// which flows into the logs unchanged.
fn mean_of_term_means(term_sums: &[f64; 4], batch_count: usize) -> f64 {
    let per_term: f64 = term_sums.iter().sum::<f64>() / term_sums.len() as f64;
    per_term / batch_count as f64
}
