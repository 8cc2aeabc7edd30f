// ============================================================
// Layer 5 — Validation Evaluator
// ============================================================
// Scores the model on the validation loader with the Dice
// coefficient of HARD predictions:
//
//   binary      pred = sigmoid(logits) > 0.5
//   multiclass  pred = one_hot(argmax(logits)), background dropped
//
// Each (sample, class) pair is scored separately:
//   dice = (2·Σ(p·t) + ε) / (Σp + Σt + ε),   both empty → 1.0
// and the batch score is the mean over pairs. The final score is
// the mean over batches, in [0, 1].
//
// Run it on `model.valid()`: inference mode, no autodiff graph.

use anyhow::{ensure, Result};
use burn::{
    data::dataloader::DataLoader,
    prelude::*,
    tensor::activation::sigmoid,
};

use crate::data::batcher::SegmentationBatch;
use crate::ml::loss::{one_hot, LossMode, DICE_EPSILON};
use crate::ml::model::UNet;

pub fn evaluate<B: Backend>(
    model:  &UNet<B>,
    loader: &dyn DataLoader<SegmentationBatch<B>>,
    mode:   LossMode,
) -> Result<f64> {
    let mut total   = 0.0f64;
    let mut batches = 0usize;

    for batch in loader.iter() {
        batch.ensure_complete()?;
        let [_, channels, _, _] = batch.images.dims();
        ensure!(
            channels == model.n_channels,
            "network has {} input channels but validation images have {channels}",
            model.n_channels
        );

        let logits = model.forward(batch.images);
        total   += batch_dice(logits, batch.masks, mode);
        batches += 1;
    }

    let score = total / batches.max(1) as f64;
    tracing::debug!("Validation over {} batches: dice={:.4}", batches, score);
    Ok(score)
}

/// Mean hard-prediction Dice of one batch.
pub fn batch_dice<B: Backend>(logits: Tensor<B, 4>, masks: Tensor<B, 3, Int>, mode: LossMode) -> f64 {
    let [batch, classes, height, width] = logits.dims();

    let (pred, target) = match mode {
        LossMode::Binary => (
            sigmoid(logits).greater_elem(0.5).float(),
            masks.float().unsqueeze_dim::<4>(1),
        ),
        LossMode::Multiclass { .. } => {
            let winners = logits.argmax(1).squeeze::<3>(1);
            let keep = [0..batch, 1..classes, 0..height, 0..width];
            (
                one_hot(winners, classes).slice(keep.clone()),
                one_hot(masks, classes).slice(keep),
            )
        }
    };

    let [b, c, h, w] = pred.dims();
    let pairs = b * c;
    if pairs == 0 {
        return 0.0;
    }
    let pred   = pred.reshape([pairs, h * w]);
    let target = target.reshape([pairs, h * w]);

    let inter: Vec<f32> = (pred.clone() * target.clone())
        .sum_dim(1)
        .into_data()
        .iter::<f32>()
        .collect();
    let sets: Vec<f32> = (pred.sum_dim(1) + target.sum_dim(1))
        .into_data()
        .iter::<f32>()
        .collect();

    let sum: f64 = inter
        .iter()
        .zip(&sets)
        .map(|(&i, &s)| pair_dice(i as f64, s as f64))
        .sum();
    sum / pairs as f64
}

fn pair_dice(intersection: f64, cardinality: f64) -> f64 {
    if cardinality == 0.0 {
        return 1.0;
    }
    (2.0 * intersection + DICE_EPSILON) / (cardinality + DICE_EPSILON)
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    type B = NdArray;

    fn masks(values: &[i32], shape: [usize; 3]) -> Tensor<B, 3, Int> {
        Tensor::<B, 1, Int>::from_ints(values, &Default::default()).reshape(shape)
    }

    fn logits(values: &[f32], shape: [usize; 4]) -> Tensor<B, 4> {
        Tensor::<B, 1>::from_floats(values, &Default::default()).reshape(shape)
    }

    #[test]
    fn test_binary_perfect_and_empty() {
        // sample 0 predicts its mask exactly, sample 1 is empty on both sides
        let l = logits(&[5.0, -5.0, -5.0, -5.0, -5.0, -5.0], [2, 1, 1, 3]);
        let m = masks(&[1, 0, 0, 0, 0, 0], [2, 1, 3]);
        let score = batch_dice(l, m, LossMode::Binary);
        assert!((score - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_binary_half_overlap() {
        // pred {0,1}, target {1,2} → 2·1 / (2 + 2)
        let l = logits(&[5.0, 5.0, -5.0], [1, 1, 1, 3]);
        let m = masks(&[0, 1, 1], [1, 1, 3]);
        let score = batch_dice(l, m, LossMode::Binary);
        assert!((score - 0.5).abs() < 1e-5);
    }

    #[test]
    fn test_multiclass_ignores_background() {
        // 3 classes, 2 pixels; class 1 is right, class 2 is missed
        let l = logits(
            &[
                0.0, 9.0, // class 0
                9.0, 0.0, // class 1
                0.0, 0.0, // class 2
            ],
            [1, 3, 1, 2],
        );
        let m = masks(&[1, 2], [1, 1, 2]);
        let score = batch_dice(l, m, LossMode::for_classes(3));
        // class 1 → 1.0, class 2 → ε / (1 + ε) ≈ 0
        assert!((score - 0.5).abs() < 1e-5);
    }
}
