//! Checkpointing for the adversarial path.
//!
//! A checkpoint is a directory holding both models' parameters and both
//! optimizers' moment state as safetensors, plus a `state.json` with the
//! scalar training state. Loading restores an exact round-trip of parameters
//! and moments. The training loop itself never resumes from a checkpoint;
//! loading is a library affordance for inspection and reuse.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use candle_core::Device;
use serde::{Deserialize, Serialize};

use crate::error::{IkGenError, Result};
use crate::model::{Discriminator, Generator};
use crate::optimizer::RmsProp;

const GENERATOR_FILE: &str = "generator.safetensors";
const DISCRIMINATOR_FILE: &str = "discriminator.safetensors";
const OPT_G_FILE: &str = "opt_g.safetensors";
const OPT_D_FILE: &str = "opt_d.safetensors";
const STATE_FILE: &str = "state.json";

/// Last observed per-batch loss scalars.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct LossScalars {
    pub loss_g: f32,
    pub loss_d: f32,
    pub loss_d_real: f32,
    pub loss_d_fake: f32,
}

/// Scalar training state stored alongside the tensors.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointState {
    pub epoch: usize,
    pub batches_done: usize,
    pub losses: LossScalars,
}

/// Write a checkpoint directory `checkpoint-{epoch}` under `run_dir`.
///
/// # Errors
/// Returns an error if any file cannot be written.
pub fn save_checkpoint(
    run_dir: &Path,
    state: &CheckpointState,
    generator: &Generator,
    discriminator: &Discriminator,
    opt_g: &RmsProp,
    opt_d: &RmsProp,
) -> Result<PathBuf> {
    let dir = run_dir.join(format!("checkpoint-{}", state.epoch));
    std::fs::create_dir_all(&dir)?;

    generator.varmap().save(dir.join(GENERATOR_FILE))?;
    discriminator.varmap().save(dir.join(DISCRIMINATOR_FILE))?;
    candle_core::safetensors::save(opt_g.moments(), dir.join(OPT_G_FILE))?;
    candle_core::safetensors::save(opt_d.moments(), dir.join(OPT_D_FILE))?;

    let state_json = serde_json::to_string_pretty(state)?;
    std::fs::write(dir.join(STATE_FILE), state_json)?;
    Ok(dir)
}

/// Restore models and optimizers from a checkpoint directory and return its
/// scalar state.
///
/// # Errors
/// Returns an error if the directory is missing or any file fails to load.
pub fn load_checkpoint(
    dir: &Path,
    generator: &Generator,
    discriminator: &Discriminator,
    opt_g: &mut RmsProp,
    opt_d: &mut RmsProp,
    device: &Device,
) -> Result<CheckpointState> {
    if !dir.is_dir() {
        return Err(IkGenError::Checkpoint(format!(
            "not a checkpoint directory: {}",
            dir.display()
        )));
    }

    let mut gen_map = generator.varmap().clone();
    gen_map.load(dir.join(GENERATOR_FILE))?;
    let mut disc_map = discriminator.varmap().clone();
    disc_map.load(dir.join(DISCRIMINATOR_FILE))?;

    opt_g.set_moments(load_moments(&dir.join(OPT_G_FILE), device)?);
    opt_d.set_moments(load_moments(&dir.join(OPT_D_FILE), device)?);

    let state_json = std::fs::read_to_string(dir.join(STATE_FILE))?;
    let state: CheckpointState = serde_json::from_str(&state_json)?;
    Ok(state)
}

fn load_moments(
    path: &Path,
    device: &Device,
) -> Result<HashMap<String, candle_core::Tensor>> {
    Ok(candle_core::safetensors::load(path, device)?)
}
