//! Network models: the adversarial generator/discriminator pair and the
//! invertible coupling network.
//!
//! Each model owns its `VarMap`, so an optimizer steps exactly one parameter
//! set and the other models only ever read. All weight initialization draws
//! from an injected `StdRng` because candle's CPU backend has no seedable
//! device rng; layers are built from the map's `Var`s, so optimizer updates
//! through the map are visible to the layers in place.

use candle_core::{Device, Tensor, Var};
use candle_nn::{Linear, Module, VarMap};
use rand::rngs::StdRng;
use rand::Rng;
use rand_distr::StandardNormal;

use crate::config::{GanConfig, InnConfig};
use crate::error::{IkGenError, Result};

/// Soft-clamp bound on the coupling scale exponent.
const COUPLING_CLAMP: f64 = 2.0;

/// Draw a standard-normal tensor of the given shape from `rng`.
///
/// # Errors
/// Returns an error if the tensor cannot be built.
pub fn sample_normal(rng: &mut StdRng, rows: usize, cols: usize, device: &Device) -> Result<Tensor> {
    let mut data = Vec::with_capacity(rows * cols);
    for _ in 0..rows * cols {
        data.push(rng.sample::<f32, _>(StandardNormal));
    }
    Ok(Tensor::from_vec(data, (rows, cols), device)?)
}

/// Build a linear layer with seeded uniform init and register its parameters
/// in `varmap` under `prefix`.
///
/// Weights and biases are uniform in `[-1/sqrt(in_dim), 1/sqrt(in_dim)]`. The
/// returned layer shares storage with the map's `Var`s, so stepping the map
/// updates the layer.
fn seeded_linear(
    in_dim: usize,
    out_dim: usize,
    prefix: &str,
    varmap: &VarMap,
    rng: &mut StdRng,
    device: &Device,
) -> Result<Linear> {
    let bound = 1.0 / (in_dim as f32).sqrt();
    let mut weight = Vec::with_capacity(out_dim * in_dim);
    for _ in 0..out_dim * in_dim {
        weight.push(rng.gen_range(-bound..bound));
    }
    let mut bias = Vec::with_capacity(out_dim);
    for _ in 0..out_dim {
        bias.push(rng.gen_range(-bound..bound));
    }

    let weight = Var::from_tensor(&Tensor::from_vec(weight, (out_dim, in_dim), device)?)?;
    let bias = Var::from_tensor(&Tensor::from_vec(bias, (out_dim,), device)?)?;
    let layer = Linear::new(weight.as_tensor().clone(), Some(bias.as_tensor().clone()));

    let mut data = varmap
        .data()
        .lock()
        .map_err(|_| IkGenError::Training("parameter map lock poisoned".into()))?;
    data.insert(format!("{prefix}.weight"), weight);
    data.insert(format!("{prefix}.bias"), bias);
    Ok(layer)
}

/// Generator mapping `(latent, position)` to a joint configuration.
pub struct Generator {
    fc1: Linear,
    fc2: Linear,
    fc3: Linear,
    varmap: VarMap,
}

impl Generator {
    /// Build the generator with seeded initialization.
    ///
    /// # Errors
    /// Returns an error if a layer cannot be built.
    pub fn new(config: &GanConfig, rng: &mut StdRng, device: &Device) -> Result<Self> {
        let varmap = VarMap::new();
        let in_dim = config.latent_dim + config.dim_pos;
        let h = config.hidden_dim;
        let fc1 = seeded_linear(in_dim, h, "gen.fc1", &varmap, rng, device)?;
        let fc2 = seeded_linear(h, h, "gen.fc2", &varmap, rng, device)?;
        let fc3 = seeded_linear(h, config.num_thetas, "gen.fc3", &varmap, rng, device)?;
        Ok(Self {
            fc1,
            fc2,
            fc3,
            varmap,
        })
    }

    /// Produce joint configurations `(b, J)` from latents `(b, latent_dim)`
    /// and target positions `(b, P)`.
    ///
    /// # Errors
    /// Returns an error on tensor failure.
    pub fn forward(&self, z: &Tensor, positions: &Tensor) -> Result<Tensor> {
        let x = Tensor::cat(&[z, positions], 1)?;
        let x = self.fc1.forward(&x)?.relu()?;
        let x = self.fc2.forward(&x)?.relu()?;
        Ok(self.fc3.forward(&x)?)
    }

    /// The generator's own parameter map.
    #[must_use]
    pub fn varmap(&self) -> &VarMap {
        &self.varmap
    }
}

/// Discriminator scoring `(thetas, position)` pairs with a validity in (0, 1).
pub struct Discriminator {
    fc1: Linear,
    fc2: Linear,
    fc3: Linear,
    varmap: VarMap,
}

impl Discriminator {
    /// Build the discriminator with seeded initialization.
    ///
    /// # Errors
    /// Returns an error if a layer cannot be built.
    pub fn new(config: &GanConfig, rng: &mut StdRng, device: &Device) -> Result<Self> {
        let varmap = VarMap::new();
        let in_dim = config.num_thetas + config.dim_pos;
        let h = config.hidden_dim;
        let fc1 = seeded_linear(in_dim, h, "disc.fc1", &varmap, rng, device)?;
        let fc2 = seeded_linear(h, h, "disc.fc2", &varmap, rng, device)?;
        let fc3 = seeded_linear(h, 1, "disc.fc3", &varmap, rng, device)?;
        Ok(Self {
            fc1,
            fc2,
            fc3,
            varmap,
        })
    }

    /// Score configuration/position pairs, shape `(b, 1)`.
    ///
    /// # Errors
    /// Returns an error on tensor failure.
    pub fn forward(&self, thetas: &Tensor, positions: &Tensor) -> Result<Tensor> {
        let x = Tensor::cat(&[thetas, positions], 1)?;
        let x = self.fc1.forward(&x)?.relu()?;
        let x = self.fc2.forward(&x)?.relu()?;
        Ok(candle_nn::ops::sigmoid(&self.fc3.forward(&x)?)?)
    }

    /// The discriminator's own parameter map.
    #[must_use]
    pub fn varmap(&self) -> &VarMap {
        &self.varmap
    }
}

/// One affine coupling transform.
///
/// The input splits into a conditioning half `xa` and a transformed half
/// `xb`; the output is `cat(xb * exp(s(xa)) + t(xa), xa)`, which embeds the
/// half swap between consecutive blocks. The scale exponent is soft-clamped
/// with `tanh` to keep `exp` bounded.
struct CouplingBlock {
    s1: Linear,
    s2: Linear,
    t1: Linear,
    t2: Linear,
    split: usize,
}

impl CouplingBlock {
    fn new(
        dim: usize,
        hidden_dim: usize,
        index: usize,
        varmap: &VarMap,
        rng: &mut StdRng,
        device: &Device,
    ) -> Result<Self> {
        let split = dim / 2;
        let rest = dim - split;
        let prefix = format!("inn.block{index}");
        Ok(Self {
            s1: seeded_linear(split, hidden_dim, &format!("{prefix}.s1"), varmap, rng, device)?,
            s2: seeded_linear(hidden_dim, rest, &format!("{prefix}.s2"), varmap, rng, device)?,
            t1: seeded_linear(split, hidden_dim, &format!("{prefix}.t1"), varmap, rng, device)?,
            t2: seeded_linear(hidden_dim, rest, &format!("{prefix}.t2"), varmap, rng, device)?,
            split,
        })
    }

    fn scale(&self, xa: &Tensor) -> Result<Tensor> {
        let s = self.s2.forward(&self.s1.forward(xa)?.relu()?)?;
        Ok((s.tanh()? * COUPLING_CLAMP)?)
    }

    fn shift(&self, xa: &Tensor) -> Result<Tensor> {
        Ok(self.t2.forward(&self.t1.forward(xa)?.relu()?)?)
    }

    fn forward(&self, x: &Tensor) -> Result<Tensor> {
        let (_, dim) = x.dims2()?;
        let xa = x.narrow(1, 0, self.split)?;
        let xb = x.narrow(1, self.split, dim - self.split)?;
        let yb = ((xb * self.scale(&xa)?.exp()?)? + self.shift(&xa)?)?;
        Ok(Tensor::cat(&[&yb, &xa], 1)?)
    }

    fn reverse(&self, y: &Tensor) -> Result<Tensor> {
        let (_, dim) = y.dims2()?;
        let yb = y.narrow(1, 0, dim - self.split)?;
        let xa = y.narrow(1, dim - self.split, self.split)?;
        let xb = ((yb - self.shift(&xa)?)? * self.scale(&xa)?.neg()?.exp()?)?;
        Ok(Tensor::cat(&[&xa, &xb], 1)?)
    }
}

/// Stack of affine coupling blocks; `forward` and `reverse` are exact
/// inverses up to float error.
pub struct InvertibleNetwork {
    blocks: Vec<CouplingBlock>,
    varmap: VarMap,
}

impl InvertibleNetwork {
    /// Build the network over joint space of width `dim`.
    ///
    /// # Errors
    /// Returns an error for `dim < 2` or on layer construction failure.
    pub fn new(dim: usize, config: &InnConfig, rng: &mut StdRng, device: &Device) -> Result<Self> {
        if dim < 2 {
            return Err(IkGenError::Training(format!(
                "coupling blocks need at least 2 dimensions, got {dim}"
            )));
        }
        let varmap = VarMap::new();
        let blocks = (0..config.num_blocks)
            .map(|i| CouplingBlock::new(dim, config.hidden_dim, i, &varmap, rng, device))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { blocks, varmap })
    }

    /// Map joint configurations to padded targets.
    ///
    /// # Errors
    /// Returns an error on tensor failure.
    pub fn forward(&self, x: &Tensor) -> Result<Tensor> {
        let mut x = x.clone();
        for block in &self.blocks {
            x = block.forward(&x)?;
        }
        Ok(x)
    }

    /// Invert `forward`.
    ///
    /// # Errors
    /// Returns an error on tensor failure.
    pub fn reverse(&self, y: &Tensor) -> Result<Tensor> {
        let mut y = y.clone();
        for block in self.blocks.iter().rev() {
            y = block.reverse(&y)?;
        }
        Ok(y)
    }

    /// The network's own parameter map.
    #[must_use]
    pub fn varmap(&self) -> &VarMap {
        &self.varmap
    }
}
