//! Dataset loading and batching.
//!
//! Pairs of joint configurations and end-effector positions are stored as
//! JSONL, one record per line. The dataset is a collaborator of the trainers:
//! it owns loading, validation, the train/validation split, and the
//! shuffle-then-batch iteration both loops consume.

use std::io::{BufRead, BufReader, Write};
use std::path::Path;

use candle_core::{Device, Tensor};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};

use crate::error::{IkGenError, Result};
use crate::kinematics::RobotArm2d;

/// One training pair: joint configuration plus the position it reaches.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InverseSample {
    /// Joint values (base height first, then angles).
    pub thetas: Vec<f32>,
    /// End-effector position.
    pub position: Vec<f32>,
}

/// In-memory dataset of configuration/position pairs.
#[derive(Debug, Clone)]
pub struct InverseDataset {
    samples: Vec<InverseSample>,
    prior_dim: usize,
    position_dim: usize,
}

impl InverseDataset {
    /// Build a dataset from samples, validating that dimensions are uniform.
    ///
    /// # Errors
    /// Returns an error if the sample list is empty or any record's
    /// dimensions disagree with the first.
    pub fn new(samples: Vec<InverseSample>) -> Result<Self> {
        let first = samples
            .first()
            .ok_or_else(|| IkGenError::Dataset("dataset is empty".into()))?;
        let prior_dim = first.thetas.len();
        let position_dim = first.position.len();
        if prior_dim == 0 || position_dim == 0 {
            return Err(IkGenError::Dataset(
                "samples must have nonzero dimensions".into(),
            ));
        }
        for (i, sample) in samples.iter().enumerate() {
            if sample.thetas.len() != prior_dim || sample.position.len() != position_dim {
                return Err(IkGenError::Dataset(format!(
                    "sample {i} has dimensions ({}, {}), expected ({prior_dim}, {position_dim})",
                    sample.thetas.len(),
                    sample.position.len()
                )));
            }
        }
        Ok(Self {
            samples,
            prior_dim,
            position_dim,
        })
    }

    /// Load a dataset from a JSONL file.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read, a line fails to parse,
    /// or the dimensions are inconsistent.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = std::fs::File::open(path.as_ref())?;
        let reader = BufReader::new(file);
        let mut samples = Vec::new();
        for line in reader.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let sample: InverseSample = serde_json::from_str(&line)?;
            samples.push(sample);
        }
        Self::new(samples)
    }

    /// Generate a dataset by sampling the arm's prior and running forward
    /// kinematics.
    ///
    /// # Errors
    /// Returns an error on tensor failure.
    pub fn generate(arm: &RobotArm2d, n: usize, rng: &mut StdRng) -> Result<Self> {
        let thetas = arm.sample_priors(n, rng)?;
        let positions = arm.forward(&thetas)?;
        let thetas = thetas.to_vec2::<f32>()?;
        let positions = positions.to_vec2::<f32>()?;
        let samples = thetas
            .into_iter()
            .zip(positions)
            .map(|(thetas, position)| InverseSample { thetas, position })
            .collect();
        Self::new(samples)
    }

    /// Write the dataset as JSONL, creating parent directories as needed.
    ///
    /// # Errors
    /// Returns an error if serialization or writing fails.
    pub fn write<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut file = std::fs::File::create(path.as_ref())?;
        for sample in &self.samples {
            let line = serde_json::to_string(sample)?;
            writeln!(file, "{line}")?;
        }
        Ok(())
    }

    /// Number of samples.
    #[must_use]
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Whether the dataset holds no samples.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Joint-space dimensionality.
    #[must_use]
    pub fn prior_dim(&self) -> usize {
        self.prior_dim
    }

    /// Position dimensionality.
    #[must_use]
    pub fn position_dim(&self) -> usize {
        self.position_dim
    }

    /// Split off the last `val_portion` of samples for validation.
    ///
    /// The split is positional, so a caller wanting a random split shuffles
    /// first. The validation part may be empty.
    #[must_use]
    pub fn split(&self, val_portion: f32) -> (Self, Self) {
        let val_len = (self.samples.len() as f32 * val_portion) as usize;
        let train_len = self.samples.len() - val_len;
        let train = Self {
            samples: self.samples[..train_len].to_vec(),
            prior_dim: self.prior_dim,
            position_dim: self.position_dim,
        };
        let val = Self {
            samples: self.samples[train_len..].to_vec(),
            prior_dim: self.prior_dim,
            position_dim: self.position_dim,
        };
        (train, val)
    }

    /// Shuffle and chunk into `(thetas, positions)` tensor batches.
    ///
    /// Batches are `(batch_size, prior_dim)` and `(batch_size, position_dim)`;
    /// an incomplete final batch is dropped.
    ///
    /// # Errors
    /// Returns an error if a batch tensor cannot be built.
    pub fn batches(
        &self,
        batch_size: usize,
        rng: &mut StdRng,
        device: &Device,
    ) -> Result<Vec<(Tensor, Tensor)>> {
        let mut order: Vec<usize> = (0..self.samples.len()).collect();
        order.shuffle(rng);

        let mut batches = Vec::with_capacity(self.samples.len() / batch_size);
        for chunk in order.chunks(batch_size) {
            if chunk.len() < batch_size {
                break;
            }
            let mut thetas = Vec::with_capacity(batch_size * self.prior_dim);
            let mut positions = Vec::with_capacity(batch_size * self.position_dim);
            for &i in chunk {
                thetas.extend_from_slice(&self.samples[i].thetas);
                positions.extend_from_slice(&self.samples[i].position);
            }
            let thetas = Tensor::from_vec(thetas, (batch_size, self.prior_dim), device)?;
            let positions = Tensor::from_vec(positions, (batch_size, self.position_dim), device)?;
            batches.push((thetas, positions));
        }
        Ok(batches)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::KinematicsConfig;
    use rand::SeedableRng;
    use tempfile::TempDir;

    fn sample(thetas: Vec<f32>, position: Vec<f32>) -> InverseSample {
        InverseSample { thetas, position }
    }

    fn small_dataset(n: usize) -> InverseDataset {
        let samples = (0..n)
            .map(|i| {
                let v = i as f32;
                sample(vec![v, v + 0.1, v + 0.2, v + 0.3], vec![v, -v])
            })
            .collect();
        InverseDataset::new(samples).unwrap()
    }

    #[test]
    fn test_new_rejects_empty() {
        assert!(InverseDataset::new(vec![]).is_err());
    }

    #[test]
    fn test_new_rejects_ragged_dimensions() {
        let samples = vec![
            sample(vec![0.0; 4], vec![0.0; 2]),
            sample(vec![0.0; 3], vec![0.0; 2]),
        ];
        let result = InverseDataset::new(samples);
        assert!(matches!(result, Err(IkGenError::Dataset(_))));
    }

    #[test]
    fn test_load_jsonl_roundtrip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("pairs.jsonl");

        let dataset = small_dataset(5);
        dataset.write(&path).unwrap();

        let loaded = InverseDataset::load(&path).unwrap();
        assert_eq!(loaded.len(), 5);
        assert_eq!(loaded.prior_dim(), 4);
        assert_eq!(loaded.position_dim(), 2);
    }

    #[test]
    fn test_load_skips_blank_lines() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("pairs.jsonl");
        std::fs::write(
            &path,
            "{\"thetas\":[0.1,0.2,0.3,0.4],\"position\":[1.0,0.0]}\n\n{\"thetas\":[0.0,0.0,0.0,0.0],\"position\":[2.0,0.0]}\n",
        )
        .unwrap();

        let loaded = InverseDataset::load(&path).unwrap();
        assert_eq!(loaded.len(), 2);
    }

    #[test]
    fn test_generate_pairs_satisfy_forward_kinematics() {
        let dir = TempDir::new().unwrap();
        let arm =
            RobotArm2d::new(&KinematicsConfig::default(), dir.path(), &Device::Cpu).unwrap();
        let mut rng = StdRng::seed_from_u64(42);

        let dataset = InverseDataset::generate(&arm, 20, &mut rng).unwrap();
        assert_eq!(dataset.len(), 20);

        let mut batch_rng = StdRng::seed_from_u64(0);
        let batches = dataset.batches(20, &mut batch_rng, &Device::Cpu).unwrap();
        let (thetas, positions) = &batches[0];
        let recomputed = arm.forward(thetas).unwrap();
        let err = arm.distance_euclidean(&recomputed, positions).unwrap();
        assert!(err < 1e-5, "generated pairs drifted: {err}");
    }

    #[test]
    fn test_split_is_positional() {
        let dataset = small_dataset(10);
        let (train, val) = dataset.split(0.3);
        assert_eq!(train.len(), 7);
        assert_eq!(val.len(), 3);
        assert_eq!(train.prior_dim(), 4);
        assert_eq!(val.position_dim(), 2);
    }

    #[test]
    fn test_split_zero_portion_gives_empty_val() {
        let dataset = small_dataset(10);
        let (train, val) = dataset.split(0.0);
        assert_eq!(train.len(), 10);
        assert!(val.is_empty());
    }

    #[test]
    fn test_batches_drop_incomplete_tail() {
        let dataset = small_dataset(10);
        let mut rng = StdRng::seed_from_u64(7);
        let batches = dataset.batches(4, &mut rng, &Device::Cpu).unwrap();
        assert_eq!(batches.len(), 2);
        for (thetas, positions) in &batches {
            assert_eq!(thetas.dims(), &[4, 4]);
            assert_eq!(positions.dims(), &[4, 2]);
        }
    }

    #[test]
    fn test_batches_shuffle_is_seeded() {
        let dataset = small_dataset(16);
        let mut rng_a = StdRng::seed_from_u64(5);
        let mut rng_b = StdRng::seed_from_u64(5);
        let a = dataset.batches(8, &mut rng_a, &Device::Cpu).unwrap();
        let b = dataset.batches(8, &mut rng_b, &Device::Cpu).unwrap();
        assert_eq!(
            a[0].0.to_vec2::<f32>().unwrap(),
            b[0].0.to_vec2::<f32>().unwrap()
        );
    }

    #[test]
    fn test_batches_keep_pairs_aligned() {
        let dataset = small_dataset(8);
        let mut rng = StdRng::seed_from_u64(13);
        let batches = dataset.batches(8, &mut rng, &Device::Cpu).unwrap();
        let (thetas, positions) = &batches[0];
        let thetas = thetas.to_vec2::<f32>().unwrap();
        let positions = positions.to_vec2::<f32>().unwrap();
        for (t, p) in thetas.iter().zip(&positions) {
            // Sample construction ties position[0] to thetas[0].
            assert_eq!(t[0], p[0]);
        }
    }
}
