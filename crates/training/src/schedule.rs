//! Learning-rate reduction on a validation plateau.

use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum ScheduleError {
    #[error("plateau factor must be in (0, 1), got {0}")]
    Factor(f64),
    #[error("learning rate must be positive and finite, got {0}")]
    LearningRate(f64),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlateauConfig {
    /// Multiplier applied to the learning rate on a plateau.
    pub factor: f64,
    /// Non-improving steps tolerated before reducing.
    pub patience: usize,
    /// Relative improvement required to reset the plateau counter.
    pub threshold: f64,
    pub min_lr: f64,
    /// Reductions smaller than this are skipped.
    pub eps: f64,
}

impl Default for PlateauConfig {
    fn default() -> Self {
        Self {
            factor: 0.1,
            patience: 10,
            threshold: 1e-4,
            min_lr: 0.0,
            eps: 1e-8,
        }
    }
}

/// Tracks the best (lowest) metric in relative-threshold mode.
///
/// A step is an improvement when `metric < best * (1 - threshold)`. Once more than
/// `patience` consecutive steps fail to improve, the learning rate is multiplied by
/// `factor` (never below `min_lr`) and the counter starts over.
#[derive(Debug, Clone)]
pub struct ReduceLrOnPlateau {
    cfg: PlateauConfig,
    lr: f64,
    best: f64,
    bad_steps: usize,
    reductions: usize,
}

impl ReduceLrOnPlateau {
    pub fn new(initial_lr: f64, cfg: PlateauConfig) -> Result<Self, ScheduleError> {
        if !(cfg.factor > 0.0 && cfg.factor < 1.0) {
            return Err(ScheduleError::Factor(cfg.factor));
        }
        if !(initial_lr.is_finite() && initial_lr > 0.0) {
            return Err(ScheduleError::LearningRate(initial_lr));
        }
        Ok(Self {
            cfg,
            lr: initial_lr,
            best: f64::INFINITY,
            bad_steps: 0,
            reductions: 0,
        })
    }

    pub fn lr(&self) -> f64 {
        self.lr
    }

    pub fn best(&self) -> f64 {
        self.best
    }

    pub fn reductions(&self) -> usize {
        self.reductions
    }

    fn is_better(&self, metric: f64) -> bool {
        metric < self.best * (1.0 - self.cfg.threshold)
    }

    /// Feed one epoch's metric; returns the learning rate for the next epoch.
    pub fn step(&mut self, metric: f64) -> f64 {
        if self.is_better(metric) {
            self.best = metric;
            self.bad_steps = 0;
        } else {
            self.bad_steps += 1;
        }

        if self.bad_steps > self.cfg.patience {
            let reduced = (self.lr * self.cfg.factor).max(self.cfg.min_lr);
            if self.lr - reduced > self.cfg.eps {
                tracing::info!(from = self.lr, to = reduced, "reducing learning rate");
                self.lr = reduced;
                self.reductions += 1;
            }
            self.bad_steps = 0;
        }
        self.lr
    }
}
