// ============================================================
// Layer 5 — Optimizer Policy
// ============================================================
// Two update rules are selectable:
//
//   RMSProp  v = α·v + (1-α)·g²
//            buf = μ·buf + g / (√v + ε)
//            θ = θ - lr · buf
//
//   Adam     m = β1·m + (1-β1)·g
//            v = β2·v + (1-β2)·g²
//            θ = θ - lr · m̂ / (√v̂ + ε)
//
// Both add an L2 weight-decay term to the gradient.
//
// Burn gives each rule its own optimizer type, so the choice is
// made exactly once: `dispatch` builds the selected optimizer and
// hands it to a generic `OptimizerJob`, which is monomorphised
// for that type. Nothing re-checks the choice per batch.
//
// Learning rate is not baked in here; the plateau scheduler owns it.

use burn::{
    optim::{decay::WeightDecayConfig, AdamConfig, Optimizer, RmsPropConfig},
    tensor::backend::AutodiffBackend,
};

use crate::domain::run::OptimizerKind;
use crate::ml::model::UNet;

#[derive(Debug, Clone)]
pub struct OptimizerPolicy {
    pub kind:         OptimizerKind,
    pub weight_decay: f64,
    /// RMSProp momentum; ignored by Adam
    pub momentum:     f64,
}

/// Work that needs a concrete optimizer type.
pub trait OptimizerJob<B: AutodiffBackend> {
    type Output;

    fn run<O: Optimizer<UNet<B>, B>>(self, optim: O) -> Self::Output;
}

impl OptimizerPolicy {
    pub fn dispatch<B, J>(&self, job: J) -> J::Output
    where
        B: AutodiffBackend,
        J: OptimizerJob<B>,
    {
        let decay = Some(WeightDecayConfig::new(self.weight_decay as f32));
        match self.kind {
            OptimizerKind::RmsProp => {
                tracing::info!(
                    "Optimizer: RMSProp (momentum={}, weight_decay={:e})",
                    self.momentum,
                    self.weight_decay
                );
                let optim = RmsPropConfig::new()
                    .with_alpha(0.99)
                    .with_epsilon(1e-8)
                    .with_momentum(self.momentum as f32)
                    .with_weight_decay(decay)
                    .init::<B, UNet<B>>();
                job.run(optim)
            }
            OptimizerKind::Adam => {
                tracing::info!("Optimizer: Adam (weight_decay={:e})", self.weight_decay);
                let optim = AdamConfig::new()
                    .with_epsilon(1e-8)
                    .with_weight_decay(decay)
                    .init::<B, UNet<B>>();
                job.run(optim)
            }
        }
    }
}
