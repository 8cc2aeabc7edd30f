// ============================================================
// Layer 5 — Plateau Learning-Rate Scheduler
// ============================================================
// Watches the validation Dice score (higher is better). When the
// score has not improved for more than `patience` evaluation rounds,
// the learning rate is multiplied by `factor`.
//
//   improved  ⇔  score > best · (1 + threshold)
//   reduce    ⇔  rounds without improvement > patience
//
// A reduction smaller than `min_delta` is skipped, so the rate
// settles once it reaches `min_lr`.

#[derive(Debug, Clone)]
pub struct PlateauConfig {
    pub patience:  usize,
    pub factor:    f64,
    pub threshold: f64,
    pub min_lr:    f64,
    pub min_delta: f64,
}

impl Default for PlateauConfig {
    fn default() -> Self {
        Self {
            patience:  5,
            factor:    0.1,
            threshold: 1e-4,
            min_lr:    0.0,
            min_delta: 1e-8,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PlateauScheduler {
    config:      PlateauConfig,
    lr:          f64,
    best:        Option<f64>,
    bad_rounds:  usize,
}

impl PlateauScheduler {
    pub fn new(initial_lr: f64, config: PlateauConfig) -> Self {
        Self { config, lr: initial_lr, best: None, bad_rounds: 0 }
    }

    /// Current learning rate.
    pub fn lr(&self) -> f64 {
        self.lr
    }

    pub fn best(&self) -> Option<f64> {
        self.best
    }

    /// Feed one validation score; returns the (possibly reduced) rate.
    pub fn step(&mut self, score: f64) -> f64 {
        let improved = match self.best {
            None       => true,
            Some(best) => score > best * (1.0 + self.config.threshold),
        };

        if improved {
            self.best = Some(score);
            self.bad_rounds = 0;
        } else {
            self.bad_rounds += 1;
        }

        if self.bad_rounds > self.config.patience {
            let reduced = (self.lr * self.config.factor).max(self.config.min_lr);
            if self.lr - reduced > self.config.min_delta {
                tracing::info!("Reducing learning rate {:e} → {:e}", self.lr, reduced);
                self.lr = reduced;
            }
            self.bad_rounds = 0;
        }

        self.lr
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_reduction_while_improving() {
        let mut s = PlateauScheduler::new(1e-3, PlateauConfig::default());
        for i in 0..20 {
            s.step(0.1 + i as f64 * 0.01);
        }
        assert_eq!(s.lr(), 1e-3);
    }

    #[test]
    fn test_reduces_after_patience_window() {
        let mut s = PlateauScheduler::new(1e-3, PlateauConfig::default());
        s.step(0.5);
        // five flat rounds are tolerated
        for _ in 0..5 {
            assert_eq!(s.step(0.5), 1e-3);
        }
        // the sixth triggers the reduction
        let lr = s.step(0.5);
        assert!((lr - 1e-4).abs() < 1e-12);
    }

    #[test]
    fn test_tiny_gain_below_threshold_is_not_improvement() {
        let mut s = PlateauScheduler::new(1.0, PlateauConfig::default());
        s.step(0.5);
        for _ in 0..6 {
            s.step(0.500001);
        }
        assert!((s.lr() - 0.1).abs() < 1e-12);
        assert_eq!(s.best(), Some(0.5));
    }

    #[test]
    fn test_min_lr_floor() {
        let config = PlateauConfig { patience: 0, min_lr: 0.05, ..Default::default() };
        let mut s = PlateauScheduler::new(0.1, config);
        s.step(0.9);
        s.step(0.1);
        assert!((s.lr() - 0.05).abs() < 1e-12);
        s.step(0.1);
        assert!((s.lr() - 0.05).abs() < 1e-12);
    }
}
