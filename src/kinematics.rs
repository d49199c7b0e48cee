//! Planar robot arm kinematics.
//!
//! The arm has a vertically sliding base joint followed by three rotary links,
//! so a configuration is four values: base height plus three angles. Positions
//! are 2D end-effector coordinates. This module is a collaborator of the
//! trainers: forward kinematics, prior sampling, the evaluation distance
//! metric and the comparison visualization all live here.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use candle_core::{Device, Tensor};
use rand::rngs::StdRng;
use rand::Rng;
use rand_distr::StandardNormal;

use crate::config::KinematicsConfig;
use crate::error::{IkGenError, Result};

/// 2D robot arm with a sliding base and rotary links.
pub struct RobotArm2d {
    lengths: Vec<f32>,
    sigmas: Vec<f32>,
    viz_dir: PathBuf,
    device: Device,
}

impl RobotArm2d {
    /// Create an arm from configuration.
    ///
    /// `viz_dir` is created eagerly; `viz_inverse` writes artifacts beneath it.
    ///
    /// # Errors
    /// Returns an error if the visualization directory cannot be created.
    pub fn new(config: &KinematicsConfig, viz_dir: &Path, device: &Device) -> Result<Self> {
        std::fs::create_dir_all(viz_dir)?;
        Ok(Self {
            lengths: config.lengths.clone(),
            sigmas: config.sigmas.clone(),
            viz_dir: viz_dir.to_path_buf(),
            device: device.clone(),
        })
    }

    /// Number of joints (base joint plus one per link).
    #[must_use]
    pub fn num_thetas(&self) -> usize {
        self.lengths.len() + 1
    }

    /// Directory visualization artifacts are written to.
    #[must_use]
    pub fn viz_dir(&self) -> &Path {
        &self.viz_dir
    }

    /// Forward kinematics: joint angles `(n, J)` to end-effector positions `(n, 2)`.
    ///
    /// The x coordinate sums link projections over the accumulated angles; the
    /// y coordinate additionally starts from the base height.
    ///
    /// # Errors
    /// Returns an error on a joint-count mismatch or tensor failure.
    pub fn forward(&self, thetas: &Tensor) -> Result<Tensor> {
        let (_, cols) = thetas.dims2()?;
        if cols != self.num_thetas() {
            return Err(IkGenError::Training(format!(
                "expected {} joint values, got {cols}",
                self.num_thetas()
            )));
        }

        let mut x: Option<Tensor> = None;
        let mut y = thetas.narrow(1, 0, 1)?;
        let mut angle: Option<Tensor> = None;
        for (i, len) in self.lengths.iter().enumerate() {
            let joint = thetas.narrow(1, i + 1, 1)?;
            let acc = match angle {
                Some(prev) => (prev + joint)?,
                None => joint,
            };
            let px = (acc.cos()? * f64::from(*len))?;
            let py = (acc.sin()? * f64::from(*len))?;
            x = Some(match x {
                Some(sum) => (sum + px)?,
                None => px,
            });
            y = (y + py)?;
            angle = Some(acc);
        }
        let x = x.ok_or_else(|| IkGenError::Training("arm has no links".into()))?;
        Ok(Tensor::cat(&[&x, &y], 1)?)
    }

    /// Sample `n` joint configurations from the gaussian prior over joint limits.
    ///
    /// # Errors
    /// Returns an error if the tensor cannot be built.
    pub fn sample_priors(&self, n: usize, rng: &mut StdRng) -> Result<Tensor> {
        let j = self.num_thetas();
        let mut data = Vec::with_capacity(n * j);
        for _ in 0..n {
            for sigma in &self.sigmas {
                let v: f32 = rng.sample(StandardNormal);
                data.push(v * sigma);
            }
        }
        Ok(Tensor::from_vec(data, (n, j), &self.device)?)
    }

    /// Mean row-wise Euclidean distance between two position batches `(n, 2)`.
    ///
    /// # Errors
    /// Returns an error on shape mismatch.
    pub fn distance_euclidean(&self, a: &Tensor, b: &Tensor) -> Result<f32> {
        let d = (a - b)?;
        let dist = d.sqr()?.sum_keepdim(1)?.sqrt()?.mean_all()?;
        Ok(dist.to_scalar::<f32>()?)
    }

    /// Render generated configurations against the target positions.
    ///
    /// Writes `<viz_dir>/<name>.svg` drawing one polyline per configuration
    /// plus a cross at each target, and returns the artifact path. The pack
    /// carries no chart-rendering crate, so the file is plain SVG markup.
    ///
    /// # Errors
    /// Returns an error if the file cannot be written.
    pub fn viz_inverse(&self, targets: &Tensor, thetas: &Tensor, name: &str) -> Result<PathBuf> {
        let thetas = thetas.to_vec2::<f32>()?;
        let targets = targets.to_vec2::<f32>()?;

        // Map arm coordinates (roughly [-2.5, 2.5]) onto a 500x500 canvas.
        let scale = 100.0f32;
        let to_px = |x: f32, y: f32| (250.0 + x * scale, 250.0 - y * scale);

        let mut svg = String::new();
        let _ = writeln!(
            svg,
            r#"<svg xmlns="http://www.w3.org/2000/svg" width="500" height="500" viewBox="0 0 500 500">"#
        );
        let _ = writeln!(svg, r#"<rect width="500" height="500" fill="white"/>"#);

        for row in &thetas {
            let mut points = String::new();
            let (px, py) = to_px(0.0, row[0]);
            let _ = write!(points, "{px:.1},{py:.1}");
            let mut x = 0.0f32;
            let mut y = row[0];
            let mut angle = 0.0f32;
            for (i, len) in self.lengths.iter().enumerate() {
                angle += row[i + 1];
                x += len * angle.cos();
                y += len * angle.sin();
                let (px, py) = to_px(x, y);
                let _ = write!(points, " {px:.1},{py:.1}");
            }
            let _ = writeln!(
                svg,
                r#"<polyline points="{points}" fill="none" stroke="steelblue" stroke-opacity="0.3" stroke-width="1"/>"#
            );
        }

        for row in &targets {
            let (px, py) = to_px(row[0], row[1]);
            let _ = writeln!(
                svg,
                r#"<path d="M {a:.1} {b:.1} L {c:.1} {d:.1} M {a:.1} {d:.1} L {c:.1} {b:.1}" stroke="crimson" stroke-width="2"/>"#,
                a = px - 5.0,
                b = py - 5.0,
                c = px + 5.0,
                d = py + 5.0,
            );
        }

        let _ = writeln!(svg, "</svg>");
        let path = self.viz_dir.join(format!("{name}.svg"));
        std::fs::write(&path, svg)?;
        Ok(path)
    }
}
