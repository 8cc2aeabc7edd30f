// ============================================================
// Layer 5 — Loss Scaler and Gradient Clipping
// ============================================================
// Dynamic loss scaling, as used for reduced-precision training:
//
//   1. loss · S is back-propagated, so small gradients stay
//      representable
//   2. every gradient is multiplied by 1/S (unscaled) and its
//      squared norm is accumulated
//   3. a non-finite norm means the step overflowed: the optimizer
//      step is skipped and S is halved
//   4. after `growth_interval` finite steps in a row, S doubles
//
// When disabled, S stays at 1.0 but unscale, overflow detection
// and clipping still run.
//
// Clipping uses the GLOBAL L2 norm over all parameters:
//   if ‖g‖ > max_norm:  g ← g · max_norm / (‖g‖ + 1e-6)
//
// Gradients are walked with a ModuleVisitor so every float
// parameter of the model is reached, whatever its rank.

use burn::{
    module::{AutodiffModule, ModuleVisitor, ParamId},
    optim::GradientsParams,
    prelude::*,
    tensor::backend::AutodiffBackend,
};
use std::marker::PhantomData;

#[derive(Debug, Clone)]
pub struct GradScalerConfig {
    pub enabled:         bool,
    pub init_scale:      f64,
    pub growth_factor:   f64,
    pub backoff_factor:  f64,
    pub growth_interval: usize,
}

impl Default for GradScalerConfig {
    fn default() -> Self {
        Self {
            enabled:         true,
            init_scale:      65536.0,
            growth_factor:   2.0,
            backoff_factor:  0.5,
            growth_interval: 2000,
        }
    }
}

/// What `unscale` found in the gradients of one step.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct UnscaleOutcome {
    /// Global L2 norm of the unscaled gradients
    pub norm:  f64,
    /// False when any gradient overflowed to inf/NaN
    pub finite: bool,
}

#[derive(Debug, Clone)]
pub struct GradScaler {
    config:        GradScalerConfig,
    scale:         f64,
    growth_streak: usize,
}

impl GradScaler {
    pub fn new(config: GradScalerConfig) -> Self {
        let scale = if config.enabled { config.init_scale } else { 1.0 };
        Self { config, scale, growth_streak: 0 }
    }

    pub fn disabled() -> Self {
        Self::new(GradScalerConfig { enabled: false, ..Default::default() })
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    pub fn scale_factor(&self) -> f64 {
        self.scale
    }

    /// loss · S
    pub fn scale<B: Backend, const D: usize>(&self, loss: Tensor<B, D>) -> Tensor<B, D> {
        if self.config.enabled {
            loss.mul_scalar(self.scale)
        } else {
            loss
        }
    }

    /// Divide every gradient of `module` by S in place and measure the result.
    pub fn unscale<B, M>(&self, module: &M, grads: &mut GradientsParams) -> UnscaleOutcome
    where
        B: AutodiffBackend,
        M: AutodiffModule<B>,
    {
        let mut visitor = GradientRescaler::<B>::new(grads, 1.0 / self.scale);
        module.visit(&mut visitor);
        let norm = visitor.sum_squares.sqrt();
        UnscaleOutcome { norm, finite: norm.is_finite() }
    }

    /// Adjust S after a step: back off on overflow, grow after a finite streak.
    pub fn update(&mut self, found_inf: bool) {
        if !self.config.enabled {
            return;
        }
        if found_inf {
            self.scale *= self.config.backoff_factor;
            self.growth_streak = 0;
            tracing::debug!("Gradient overflow, loss scale lowered to {}", self.scale);
        } else {
            self.growth_streak += 1;
            if self.growth_streak >= self.config.growth_interval {
                self.scale *= self.config.growth_factor;
                self.growth_streak = 0;
            }
        }
    }
}

/// Rescale gradients so their global norm is at most `max_norm`.
/// Returns the coefficient applied (1.0 when no clipping happened).
pub fn clip_global_norm<B, M>(
    module:   &M,
    grads:    &mut GradientsParams,
    norm:     f64,
    max_norm: f64,
) -> f64
where
    B: AutodiffBackend,
    M: AutodiffModule<B>,
{
    let coef = max_norm / (norm + 1e-6);
    if coef >= 1.0 {
        return 1.0;
    }
    let mut visitor = GradientRescaler::<B>::new(grads, coef);
    module.visit(&mut visitor);
    coef
}

// ─── GradientRescaler ─────────────────────────────────────────────────────────
/// Multiplies each parameter's gradient by `factor` and sums the
/// squares of the rescaled values.
struct GradientRescaler<'a, B: AutodiffBackend> {
    grads:       &'a mut GradientsParams,
    factor:      f64,
    sum_squares: f64,
    _backend:    PhantomData<B>,
}

impl<'a, B: AutodiffBackend> GradientRescaler<'a, B> {
    fn new(grads: &'a mut GradientsParams, factor: f64) -> Self {
        Self { grads, factor, sum_squares: 0.0, _backend: PhantomData }
    }
}

impl<B: AutodiffBackend> ModuleVisitor<B> for GradientRescaler<'_, B> {
    fn visit_float<const D: usize>(&mut self, id: ParamId, _tensor: &Tensor<B, D>) {
        let Some(grad) = self.grads.remove::<B::InnerBackend, D>(id) else {
            return;
        };
        let grad = if self.factor == 1.0 { grad } else { grad.mul_scalar(self.factor) };
        self.sum_squares += grad
            .clone()
            .powf_scalar(2.0)
            .sum()
            .into_scalar()
            .elem::<f64>();
        self.grads.register::<B::InnerBackend, D>(id, grad);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::{
        backend::{Autodiff, NdArray},
        nn::{Linear, LinearConfig},
    };

    type B = Autodiff<NdArray>;

    /// A single 2→1 linear layer with its gradients for loss = sum(w·x + b) · k.
    fn grads_for(k: f32) -> (Linear<B>, GradientsParams) {
        let device = Default::default();
        let layer: Linear<B> = LinearConfig::new(2, 1).init(&device);
        let x = Tensor::<B, 2>::from_floats([[3.0, 4.0]], &device);
        let loss = layer.forward(x).sum().mul_scalar(k);
        let grads = GradientsParams::from_grads(loss.backward(), &layer);
        (layer, grads)
    }

    #[test]
    fn test_unscale_recovers_true_gradient_norm() {
        let scaler = GradScaler::new(GradScalerConfig::default());
        // d/dw = x = [3, 4], d/db = 1  →  scaled by S
        let (layer, mut grads) = grads_for(scaler.scale_factor() as f32);
        let outcome = scaler.unscale::<B, _>(&layer, &mut grads);
        assert!(outcome.finite);
        assert!((outcome.norm - 26f64.sqrt()).abs() < 1e-3, "norm = {}", outcome.norm);
    }

    #[test]
    fn test_overflow_is_detected() {
        let scaler = GradScaler::disabled();
        let (layer, mut grads) = grads_for(f32::INFINITY);
        let outcome = scaler.unscale::<B, _>(&layer, &mut grads);
        assert!(!outcome.finite);
    }

    #[test]
    fn test_clip_bounds_global_norm() {
        let scaler = GradScaler::disabled();
        let (layer, mut grads) = grads_for(10.0);
        let before = scaler.unscale::<B, _>(&layer, &mut grads);
        assert!(before.norm > 1.0);

        let coef = clip_global_norm::<B, _>(&layer, &mut grads, before.norm, 1.0);
        assert!(coef < 1.0);

        let after = scaler.unscale::<B, _>(&layer, &mut grads);
        assert!(after.norm <= 1.0 + 1e-4, "norm = {}", after.norm);
    }

    #[test]
    fn test_no_clip_below_threshold() {
        let scaler = GradScaler::disabled();
        let (layer, mut grads) = grads_for(0.01);
        let outcome = scaler.unscale::<B, _>(&layer, &mut grads);
        assert_eq!(clip_global_norm::<B, _>(&layer, &mut grads, outcome.norm, 1.0), 1.0);
    }

    #[test]
    fn test_scale_backs_off_and_grows() {
        let mut scaler = GradScaler::new(GradScalerConfig {
            growth_interval: 3,
            ..Default::default()
        });
        assert_eq!(scaler.scale_factor(), 65536.0);

        scaler.update(true);
        assert_eq!(scaler.scale_factor(), 32768.0);

        scaler.update(false);
        scaler.update(false);
        assert_eq!(scaler.scale_factor(), 32768.0);
        scaler.update(false);
        assert_eq!(scaler.scale_factor(), 65536.0);
    }

    #[test]
    fn test_disabled_scaler_is_pass_through() {
        let mut scaler = GradScaler::disabled();
        scaler.update(true);
        assert_eq!(scaler.scale_factor(), 1.0);
        let t = Tensor::<NdArray, 1>::from_floats([2.0], &Default::default());
        assert_eq!(scaler.scale(t).into_scalar(), 2.0);
    }
}
