//! Optimizers stepping a model's `VarMap` in place.
//!
//! Both optimizers are written against named parameter maps rather than flat
//! var lists so their moment state can be exported and restored by name for
//! checkpointing. A parameter that receives no gradient in a step is left
//! untouched.

use std::collections::HashMap;

use candle_core::Tensor;
use candle_nn::VarMap;

use crate::error::{IkGenError, Result};

const RMSPROP_ALPHA: f64 = 0.99;
const RMSPROP_EPS: f64 = 1e-8;
const ADAM_BETA1: f64 = 0.9;
const ADAM_BETA2: f64 = 0.999;
const ADAM_EPS: f64 = 1e-8;

/// RMSprop over a parameter map. Used by both adversarial optimizers.
pub struct RmsProp {
    varmap: VarMap,
    learning_rate: f64,
    sq_avg: HashMap<String, Tensor>,
}

impl RmsProp {
    /// Create an optimizer stepping `varmap`.
    #[must_use]
    pub fn new(varmap: &VarMap, learning_rate: f64) -> Self {
        Self {
            varmap: varmap.clone(),
            learning_rate,
            sq_avg: HashMap::new(),
        }
    }

    /// Backpropagate `loss` and apply one update to every parameter in the
    /// map that received a gradient.
    ///
    /// # Errors
    /// Returns an error on tensor failure or a poisoned parameter map.
    pub fn step(&mut self, loss: &Tensor) -> Result<()> {
        let grads = loss.backward()?;
        let varmap = self.varmap.clone();
        let data = varmap
            .data()
            .lock()
            .map_err(|_| IkGenError::Training("parameter map lock poisoned".into()))?;
        for (name, var) in data.iter() {
            let Some(grad) = grads.get(var.as_tensor()) else {
                continue;
            };
            let sq_avg = match self.sq_avg.get(name) {
                Some(prev) => ((prev * RMSPROP_ALPHA)? + (grad.sqr()? * (1.0 - RMSPROP_ALPHA))?)?,
                None => (grad.sqr()? * (1.0 - RMSPROP_ALPHA))?,
            };
            let denom = (sq_avg.sqrt()? + RMSPROP_EPS)?;
            let update = ((grad / &denom)? * self.learning_rate)?;
            var.set(&(var.as_tensor() - update)?)?;
            self.sq_avg.insert(name.clone(), sq_avg);
        }
        Ok(())
    }

    /// Current learning rate.
    #[must_use]
    pub fn learning_rate(&self) -> f64 {
        self.learning_rate
    }

    /// Replace the learning rate.
    pub fn set_learning_rate(&mut self, learning_rate: f64) {
        self.learning_rate = learning_rate;
    }

    /// Moment state by parameter name, for checkpointing.
    #[must_use]
    pub fn moments(&self) -> &HashMap<String, Tensor> {
        &self.sq_avg
    }

    /// Restore moment state saved by `moments`.
    pub fn set_moments(&mut self, moments: HashMap<String, Tensor>) {
        self.sq_avg = moments;
    }
}

/// Adam over a parameter map. Used by the invertible path.
pub struct Adam {
    varmap: VarMap,
    learning_rate: f64,
    step_count: usize,
    m: HashMap<String, Tensor>,
    v: HashMap<String, Tensor>,
}

impl Adam {
    /// Create an optimizer stepping `varmap`.
    #[must_use]
    pub fn new(varmap: &VarMap, learning_rate: f64) -> Self {
        Self {
            varmap: varmap.clone(),
            learning_rate,
            step_count: 0,
            m: HashMap::new(),
            v: HashMap::new(),
        }
    }

    /// Backpropagate `loss` and apply one bias-corrected update.
    ///
    /// # Errors
    /// Returns an error on tensor failure or a poisoned parameter map.
    pub fn step(&mut self, loss: &Tensor) -> Result<()> {
        let grads = loss.backward()?;
        self.step_count += 1;
        let t = self.step_count as f64;
        let bias1 = 1.0 - ADAM_BETA1.powf(t);
        let bias2 = 1.0 - ADAM_BETA2.powf(t);

        let varmap = self.varmap.clone();
        let data = varmap
            .data()
            .lock()
            .map_err(|_| IkGenError::Training("parameter map lock poisoned".into()))?;
        for (name, var) in data.iter() {
            let Some(grad) = grads.get(var.as_tensor()) else {
                continue;
            };
            let m = match self.m.get(name) {
                Some(prev) => ((prev * ADAM_BETA1)? + (grad * (1.0 - ADAM_BETA1))?)?,
                None => (grad * (1.0 - ADAM_BETA1))?,
            };
            let v = match self.v.get(name) {
                Some(prev) => ((prev * ADAM_BETA2)? + (grad.sqr()? * (1.0 - ADAM_BETA2))?)?,
                None => (grad.sqr()? * (1.0 - ADAM_BETA2))?,
            };
            let m_hat = (&m / bias1)?;
            let v_hat = (&v / bias2)?;
            let denom = (v_hat.sqrt()? + ADAM_EPS)?;
            let update = ((m_hat / denom)? * self.learning_rate)?;
            var.set(&(var.as_tensor() - update)?)?;
            self.m.insert(name.clone(), m);
            self.v.insert(name.clone(), v);
        }
        Ok(())
    }

    /// Current learning rate.
    #[must_use]
    pub fn learning_rate(&self) -> f64 {
        self.learning_rate
    }

    /// Replace the learning rate. Called by the plateau scheduler.
    pub fn set_learning_rate(&mut self, learning_rate: f64) {
        self.learning_rate = learning_rate;
    }
}
