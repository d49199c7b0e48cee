//! Plateau-driven learning-rate adaptation.

use crate::optimizer::Adam;

const REDUCE_FACTOR: f64 = 0.1;
const RELATIVE_THRESHOLD: f64 = 1e-4;

/// Reduce the learning rate once a monitored metric stops improving.
///
/// A metric counts as improved when it drops below the best seen so far by a
/// relative threshold. After `patience` consecutive epochs without
/// improvement, the optimizer's learning rate is multiplied by the reduction
/// factor, bounded below by `min_lr`.
pub struct ReduceOnPlateau {
    patience: usize,
    min_lr: f64,
    best: Option<f64>,
    bad_epochs: usize,
    last_metric: Option<f64>,
}

impl ReduceOnPlateau {
    /// Create a scheduler with the given patience and learning-rate floor.
    #[must_use]
    pub fn new(patience: usize, min_lr: f64) -> Self {
        Self {
            patience,
            min_lr,
            best: None,
            bad_epochs: 0,
            last_metric: None,
        }
    }

    /// Observe one epoch's metric and reduce `optimizer`'s learning rate if
    /// the plateau has lasted past the patience window.
    pub fn step(&mut self, metric: f64, optimizer: &mut Adam) {
        self.last_metric = Some(metric);
        let improved = match self.best {
            Some(best) => metric < best * (1.0 - RELATIVE_THRESHOLD),
            None => true,
        };
        if improved {
            self.best = Some(metric);
            self.bad_epochs = 0;
            return;
        }
        self.bad_epochs += 1;
        if self.bad_epochs > self.patience {
            let reduced = (optimizer.learning_rate() * REDUCE_FACTOR).max(self.min_lr);
            optimizer.set_learning_rate(reduced);
            self.bad_epochs = 0;
        }
    }

    /// The metric passed to the most recent `step` call.
    #[must_use]
    pub fn last_metric(&self) -> Option<f64> {
        self.last_metric
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_nn::VarMap;

    fn adam(lr: f64) -> Adam {
        Adam::new(&VarMap::new(), lr)
    }

    #[test]
    fn test_improving_metric_keeps_learning_rate() {
        let mut scheduler = ReduceOnPlateau::new(2, 0.0);
        let mut opt = adam(1e-3);
        for i in 0..10 {
            scheduler.step(1.0 / f64::from(i + 1), &mut opt);
        }
        assert_eq!(opt.learning_rate(), 1e-3);
    }

    #[test]
    fn test_plateau_reduces_after_patience() {
        let mut scheduler = ReduceOnPlateau::new(2, 0.0);
        let mut opt = adam(1e-3);

        scheduler.step(1.0, &mut opt);
        // Flat metric: two tolerated epochs, reduction on the third.
        scheduler.step(1.0, &mut opt);
        scheduler.step(1.0, &mut opt);
        assert_eq!(opt.learning_rate(), 1e-3);
        scheduler.step(1.0, &mut opt);
        assert!((opt.learning_rate() - 1e-4).abs() < 1e-12);
    }

    #[test]
    fn test_reduction_respects_min_lr() {
        let mut scheduler = ReduceOnPlateau::new(0, 5e-4);
        let mut opt = adam(1e-3);

        scheduler.step(1.0, &mut opt);
        scheduler.step(1.0, &mut opt);
        assert_eq!(opt.learning_rate(), 5e-4);
        scheduler.step(1.0, &mut opt);
        assert_eq!(opt.learning_rate(), 5e-4);
    }

    #[test]
    fn test_tiny_improvement_counts_as_plateau() {
        let mut scheduler = ReduceOnPlateau::new(0, 0.0);
        let mut opt = adam(1e-3);

        scheduler.step(1.0, &mut opt);
        // Below the relative threshold, so not an improvement.
        scheduler.step(1.0 - 1e-6, &mut opt);
        assert!((opt.learning_rate() - 1e-4).abs() < 1e-12);
    }

    #[test]
    fn test_last_metric_records_most_recent_observation() {
        let mut scheduler = ReduceOnPlateau::new(3, 0.0);
        let mut opt = adam(1e-3);
        assert!(scheduler.last_metric().is_none());
        scheduler.step(0.7, &mut opt);
        scheduler.step(0.9, &mut opt);
        assert_eq!(scheduler.last_metric(), Some(0.9));
    }
}
