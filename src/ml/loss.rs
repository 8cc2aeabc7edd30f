// ============================================================
// Layer 5 — Segmentation Loss
// ============================================================
// Pixel classification loss + Dice overlap loss, summed unweighted.
//
//   classes == 1 (binary):
//     BCE-with-logits(logits, mask)
//     + dice_loss(sigmoid(logits), mask)
//
//   classes  > 1 (multiclass):
//     cross-entropy(logits, mask)
//     + dice_loss(softmax(logits, dim=1), one_hot(mask))
//
// Dice loss, per class c, sums over batch and pixels:
//   dice_c = 2·Σ(pred·target) / (Σpred + Σtarget + ε)
//   loss   = 1 − mean_c(dice_c)
//
// ε sits only in the denominator: two empty masks score 0, not 1,
// so an all-background prediction earns no credit from ε.

use anyhow::{ensure, Result};
use burn::{
    nn::loss::{BinaryCrossEntropyLossConfig, CrossEntropyLossConfig},
    prelude::*,
    tensor::activation::{sigmoid, softmax},
};

pub const DICE_EPSILON: f64 = 1e-6;

/// Loss branch, chosen once from the class count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LossMode {
    Binary,
    Multiclass { classes: usize },
}

impl LossMode {
    pub fn for_classes(classes: usize) -> Self {
        if classes <= 1 {
            LossMode::Binary
        } else {
            LossMode::Multiclass { classes }
        }
    }

    pub fn classes(&self) -> usize {
        match self {
            LossMode::Binary                => 1,
            LossMode::Multiclass { classes } => *classes,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SegmentationLoss {
    mode: LossMode,
}

impl SegmentationLoss {
    pub fn new(mode: LossMode) -> Self {
        Self { mode }
    }

    pub fn mode(&self) -> LossMode {
        self.mode
    }

    /// logits: [B, C, H, W], masks: [B, H, W] class indices → scalar loss [1]
    pub fn forward<B: Backend>(
        &self,
        logits: Tensor<B, 4>,
        masks:  Tensor<B, 3, Int>,
    ) -> Result<Tensor<B, 1>> {
        let [batch, channels, height, width] = logits.dims();
        let [mask_batch, mask_h, mask_w]     = masks.dims();

        ensure!(
            channels == self.mode.classes(),
            "model predicts {channels} channels but the loss expects {} classes",
            self.mode.classes()
        );
        ensure!(
            mask_batch == batch && mask_h == height && mask_w == width,
            "mask batch {:?} does not match logits {:?}",
            [mask_batch, mask_h, mask_w],
            [batch, channels, height, width]
        );

        let device = logits.device();
        let pixels = batch * height * width;

        let loss = match self.mode {
            LossMode::Binary => {
                let bce = BinaryCrossEntropyLossConfig::new()
                    .with_logits(true)
                    .init(&device)
                    .forward(logits.clone().reshape([pixels]), masks.clone().reshape([pixels]));

                let target = masks.float().unsqueeze_dim::<4>(1);
                bce + dice_loss(sigmoid(logits), target)
            }
            LossMode::Multiclass { classes } => {
                // [B, C, H, W] → [B·H·W, C] rows of class logits
                let flat_logits = logits
                    .clone()
                    .permute([0, 2, 3, 1])
                    .reshape([pixels, classes]);
                let ce = CrossEntropyLossConfig::new()
                    .init(&device)
                    .forward(flat_logits, masks.clone().reshape([pixels]));

                let target = one_hot(masks, classes);
                ce + dice_loss(softmax(logits, 1), target)
            }
        };

        Ok(loss)
    }
}

/// `1 − mean_c(2·Σ(p·t) / (Σp + Σt + ε))`, sums over batch and pixels.
///
/// pred, target: [B, C, H, W] with values in [0, 1].
pub fn dice_loss<B: Backend>(pred: Tensor<B, 4>, target: Tensor<B, 4>) -> Tensor<B, 1> {
    let [batch, classes, height, width] = pred.dims();
    let per_class = |t: Tensor<B, 4>| {
        t.swap_dims(0, 1).reshape([classes, batch * height * width])
    };
    let pred   = per_class(pred);
    let target = per_class(target);

    let intersection = (pred.clone() * target.clone()).sum_dim(1).mul_scalar(2.0);
    let cardinality  = pred.sum_dim(1) + target.sum_dim(1);
    let dice = intersection / cardinality.add_scalar(DICE_EPSILON);

    dice.mean().neg().add_scalar(1.0)
}

/// [B, H, W] class indices → [B, C, H, W] one-hot floats.
pub fn one_hot<B: Backend>(masks: Tensor<B, 3, Int>, classes: usize) -> Tensor<B, 4> {
    let [batch, height, width] = masks.dims();
    let shape = [batch, classes, height, width];
    let ids = Tensor::<B, 1, Int>::arange(0..classes as i64, &masks.device())
        .reshape([1, classes, 1, 1])
        .expand(shape);
    masks.unsqueeze_dim::<4>(1).expand(shape).equal(ids).float()
}
