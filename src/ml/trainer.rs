// ============================================================
// Layer 5 — Training Loop
// ============================================================
// Full train + periodic validation loop over Burn DataLoaders.
//
// Per batch:
//   forward → loss → loss·S → backward → unscale → (finite?)
//     yes: clip global norm → optimizer step
//     no:  skip the step
//   → scaler update → steps.csv
//
// Every `division_step = n_train / (5 · batch_size)` steps
// (never, when that is 0):
//   model.valid() → validation Dice → plateau scheduler
//   → validation.csv (+ PNG snapshots when step % 5 == 0)
//
// After epochs 4, 9, 14, ... (epoch % 5 == 4) a checkpoint is saved.
//
// Key Burn insights:
//   - Training runs on Autodiff<Wgpu> (or Autodiff<NdArray>)
//   - model.valid() returns the model on the inner backend, so
//     the validation loader is built on B::InnerBackend
//   - Each optimizer is its own type; the loop is generic over it
//     and is instantiated once through OptimizerPolicy::dispatch
//
// Reference: Burn Book §5 (Custom Training Loop)

use anyhow::{ensure, Result};
use burn::{
    backend::{ndarray::NdArrayDevice, wgpu::WgpuDevice, Autodiff, NdArray, Wgpu},
    module::AutodiffModule,
    optim::{GradientsParams, Optimizer},
    prelude::*,
    tensor::backend::AutodiffBackend,
};
use std::{path::PathBuf, sync::Arc};

use crate::application::train_use_case::TrainConfig;
use crate::data::{
    dataset::SegmentationDataset,
    loader::{build_loaders, LoaderOptions, Loaders},
    splitter::Split,
};
use crate::domain::{legend::MaskLegend, run::{BackendKind, ExportMode}};
use crate::infra::{
    checkpoint::CheckpointManager,
    metrics::{ExperimentLogger, Snapshot, ValidationRecord},
    workspace::RunLayout,
};
use crate::ml::{
    evaluator::evaluate,
    export::render_prediction,
    loss::{LossMode, SegmentationLoss},
    model::{UNet, UNetConfig},
    optimizer::{OptimizerJob, OptimizerPolicy},
    scaler::{clip_global_norm, GradScaler, GradScalerConfig},
    scheduler::{PlateauConfig, PlateauScheduler},
};

/// What a finished run reports back to the CLI.
#[derive(Debug, Clone)]
pub struct TrainingSummary {
    pub global_step:     usize,
    pub epochs:          usize,
    pub final_lr:        f64,
    pub last_dice:       Option<f64>,
    pub skipped_steps:   usize,
    pub checkpoints:     Vec<PathBuf>,
}

/// Steps between validation rounds; `None` disables validation.
pub fn validation_interval(n_train: usize, batch_size: usize) -> Option<usize> {
    let step = n_train / (5 * batch_size.max(1));
    (step > 0).then_some(step)
}

/// 1-indexed epochs 4, 9, 14, ... are checkpointed.
pub fn is_checkpoint_epoch(epoch: usize) -> bool {
    epoch % 5 == 4
}

fn is_snapshot_step(global_step: usize) -> bool {
    global_step % 5 == 0
}

pub fn run_training(
    cfg:     &TrainConfig,
    dataset: Arc<SegmentationDataset>,
    split:   &Split,
    layout:  &RunLayout,
) -> Result<TrainingSummary> {
    match cfg.backend {
        BackendKind::Wgpu => {
            let device = WgpuDevice::default();
            tracing::info!("Using WGPU device: {:?}", device);
            train_on::<Autodiff<Wgpu>>(cfg, dataset, split, layout, device)
        }
        BackendKind::NdArray => {
            let device = NdArrayDevice::default();
            tracing::info!("Using NdArray device: {:?}", device);
            train_on::<Autodiff<NdArray>>(cfg, dataset, split, layout, device)
        }
    }
}

fn train_on<B: AutodiffBackend>(
    cfg:     &TrainConfig,
    dataset: Arc<SegmentationDataset>,
    split:   &Split,
    layout:  &RunLayout,
    device:  B::Device,
) -> Result<TrainingSummary> {
    B::seed(cfg.seed);

    // ── Build model ───────────────────────────────────────────────────────────
    let mut model: UNet<B> = UNetConfig::new(cfg.channels, cfg.classes)
        .with_bilinear(cfg.bilinear)
        .with_base_channels(cfg.base_channels)
        .init(&device);
    tracing::info!(
        "Network: {} input channels, {} output channels (classes), {} upscaling",
        model.n_channels,
        model.n_classes,
        if cfg.bilinear { "bilinear" } else { "transposed conv" },
    );

    // ── Optional resume ───────────────────────────────────────────────────────
    if let Some(path) = &cfg.load {
        let (record, legend) = CheckpointManager::load::<B>(path, &device)?;
        if &legend != dataset.legend() {
            tracing::warn!(
                "Checkpoint mask values {:?} differ from the dataset's {:?}",
                legend.values(),
                dataset.legend().values()
            );
        }
        model = model.load_record(record);
        tracing::info!("Model loaded from {}", path);
    }

    // ── Loaders ───────────────────────────────────────────────────────────────
    let opts = LoaderOptions {
        batch_size:   cfg.batch_size,
        num_workers:  cfg.num_workers,
        shuffle_seed: cfg.seed,
    };
    let legend  = dataset.legend().clone();
    let loaders = build_loaders::<B>(dataset, split, opts, &device)?;

    let session = TrainingSession {
        cfg,
        model,
        loaders,
        legend,
        n_train: split.train_len(),
        logger:  ExperimentLogger::new(&layout.outputs)?,
        checkpoints: CheckpointManager::new(&layout.checkpoints),
    };

    let policy = OptimizerPolicy {
        kind:         cfg.optimizer,
        weight_decay: cfg.weight_decay,
        momentum:     cfg.momentum,
    };
    policy.dispatch::<B, _>(session)
}

// ─── TrainingSession ──────────────────────────────────────────────────────────
// Everything the loop owns for the lifetime of the run.
struct TrainingSession<'a, B: AutodiffBackend> {
    cfg:         &'a TrainConfig,
    model:       UNet<B>,
    loaders:     Loaders<B>,
    legend:      MaskLegend,
    n_train:     usize,
    logger:      ExperimentLogger,
    checkpoints: CheckpointManager,
}

impl<B: AutodiffBackend> OptimizerJob<B> for TrainingSession<'_, B> {
    type Output = Result<TrainingSummary>;

    fn run<O: Optimizer<UNet<B>, B>>(self, optim: O) -> Self::Output {
        self.train(optim)
    }
}

impl<B: AutodiffBackend> TrainingSession<'_, B> {
    fn train<O: Optimizer<UNet<B>, B>>(self, mut optim: O) -> Result<TrainingSummary> {
        let TrainingSession { cfg, mut model, loaders, legend, n_train, logger, checkpoints } = self;

        let loss_fn = SegmentationLoss::new(LossMode::for_classes(cfg.classes));
        let mut scaler = if cfg.amp {
            GradScaler::new(GradScalerConfig::default())
        } else {
            GradScaler::disabled()
        };
        let mut scheduler     = PlateauScheduler::new(cfg.learning_rate, PlateauConfig::default());
        let division_step     = validation_interval(n_train, cfg.batch_size);

        tracing::info!(
            "Starting training: epochs={}, batch_size={}, lr={:e}, training size={}, \
             checkpoints={}, mixed precision={}",
            cfg.epochs, cfg.batch_size, cfg.learning_rate, n_train, cfg.save_checkpoint,
            scaler.is_enabled(),
        );
        if division_step.is_none() {
            tracing::warn!("Training set too small for periodic validation; the learning rate stays fixed");
        }

        let mut summary = TrainingSummary {
            global_step:   0,
            epochs:        cfg.epochs,
            final_lr:      cfg.learning_rate,
            last_dice:     None,
            skipped_steps: 0,
            checkpoints:   Vec::new(),
        };

        // ── Epoch loop ────────────────────────────────────────────────────────
        for epoch in 1..=cfg.epochs {
            let mut epoch_loss = 0.0f64;
            let mut batches    = 0usize;

            for batch in loaders.train.iter() {
                batch.ensure_complete()?;
                let [_, channels, _, _] = batch.images.dims();
                ensure!(
                    channels == model.n_channels,
                    "Network has been defined with {} input channels, but loaded images have \
                     {channels} channels. Please check that the images are loaded correctly.",
                    model.n_channels
                );

                let images = batch.images.clone();
                let masks  = batch.masks.clone();

                let logits = model.forward(batch.images);
                let loss   = loss_fn.forward(logits.clone(), batch.masks)?;
                let loss_value: f64 = loss.clone().into_scalar().elem::<f64>();

                let (next, stepped) = apply_step(
                    model,
                    &mut optim,
                    &mut scaler,
                    loss,
                    scheduler.lr(),
                    cfg.gradient_clipping,
                );
                model = next;
                if !stepped {
                    summary.skipped_steps += 1;
                }

                summary.global_step += 1;
                epoch_loss += loss_value;
                batches    += 1;
                logger.log_step(summary.global_step, epoch, loss_value)?;

                // ── Validation round ──────────────────────────────────────────
                let Some(every) = division_step else { continue };
                if summary.global_step % every != 0 {
                    continue;
                }

                let score = evaluate(&model.valid(), loaders.valid.as_ref(), loss_fn.mode())?;
                let lr    = scheduler.step(score);
                summary.last_dice = Some(score);
                tracing::info!("Validation Dice score: {:.4} (lr {:e})", score, lr);

                let record = ValidationRecord {
                    step:          summary.global_step,
                    epoch,
                    learning_rate: lr,
                    dice:          score,
                };
                let snapshot = is_snapshot_step(summary.global_step)
                    .then(|| first_sample(images, masks, logits, cfg.export, cfg.classes));
                if let Err(err) = log_round(&logger, &record, snapshot) {
                    tracing::debug!("Validation logging failed: {err:#}");
                }
            }

            let avg_loss = if batches > 0 { epoch_loss / batches as f64 } else { f64::NAN };
            tracing::info!(
                "Epoch {:>3}/{} | steps={} | train_loss={:.4} | lr={:e}",
                epoch, cfg.epochs, batches, avg_loss, scheduler.lr(),
            );

            // ── Checkpoint ────────────────────────────────────────────────────
            if cfg.save_checkpoint && is_checkpoint_epoch(epoch) {
                let path = checkpoints.save(&model, &legend, epoch)?;
                tracing::info!("Checkpoint {} saved to '{}'", epoch, path.display());
                summary.checkpoints.push(path);
            }
        }

        summary.final_lr = scheduler.lr();
        tracing::info!("Training complete!");
        Ok(summary)
    }
}

/// Scaled backward pass, unscale, then either clip + optimizer step or
/// skip on non-finite gradients. The scaler is updated either way.
/// Returns the model and whether the optimizer stepped.
pub(crate) fn apply_step<B, M, O>(
    model:    M,
    optim:    &mut O,
    scaler:   &mut GradScaler,
    loss:     Tensor<B, 1>,
    lr:       f64,
    max_norm: f64,
) -> (M, bool)
where
    B: AutodiffBackend,
    M: AutodiffModule<B>,
    O: Optimizer<M, B>,
{
    let grads     = scaler.scale(loss).backward();
    let mut grads = GradientsParams::from_grads(grads, &model);
    let outcome   = scaler.unscale::<B, _>(&model, &mut grads);
    scaler.update(!outcome.finite);

    if !outcome.finite {
        tracing::debug!("Non-finite gradients, optimizer step skipped (scale {})", scaler.scale_factor());
        return (model, false);
    }
    clip_global_norm::<B, _>(&model, &mut grads, outcome.norm, max_norm);
    (optim.step(lr, model, grads), true)
}

fn log_round(logger: &ExperimentLogger, record: &ValidationRecord, snapshot: Option<Snapshot>) -> Result<()> {
    logger.log_validation(record)?;
    if let Some(snapshot) = snapshot {
        logger.save_snapshot(record.step, &snapshot)?;
    }
    Ok(())
}

/// Pull the first sample of a batch and its prediction off the device.
fn first_sample<B: Backend>(
    images:  Tensor<B, 4>,
    masks:   Tensor<B, 3, Int>,
    logits:  Tensor<B, 4>,
    export:  ExportMode,
    classes: usize,
) -> Snapshot {
    let [_, channels, height, width] = images.dims();
    let [_, out, _, _] = logits.dims();

    let image = images
        .slice([0..1, 0..channels, 0..height, 0..width])
        .into_data()
        .iter::<f32>()
        .collect();
    let true_mask = masks
        .slice([0..1, 0..height, 0..width])
        .into_data()
        .iter::<i64>()
        .collect();
    let pred_mask = render_prediction(
        export,
        logits.slice([0..1, 0..out, 0..height, 0..width]).reshape([out, height, width]),
    );

    Snapshot {
        width: width as u32,
        height: height as u32,
        channels,
        image,
        true_mask,
        pred_mask,
        classes,
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use burn::{
        nn::{Linear, LinearConfig},
        optim::SgdConfig,
    };

    type AB = Autodiff<NdArray>;

    fn weights(layer: &Linear<AB>) -> Vec<f32> {
        layer.weight.val().into_data().iter::<f32>().collect()
    }

    #[test]
    fn test_non_finite_gradients_skip_the_step() {
        let device = Default::default();
        let layer: Linear<AB> = LinearConfig::new(2, 1).init(&device);
        let before = weights(&layer);
        let mut optim  = SgdConfig::new().init::<AB, Linear<AB>>();
        let mut scaler = GradScaler::new(GradScalerConfig::default());

        let x    = Tensor::<AB, 2>::from_floats([[3.0, 4.0]], &device);
        let loss = layer.forward(x).sum().mul_scalar(f32::INFINITY);
        let (layer, stepped) = apply_step(layer, &mut optim, &mut scaler, loss, 0.1, 1.0);

        assert!(!stepped);
        assert_eq!(weights(&layer), before);
        assert_eq!(scaler.scale_factor(), 32768.0);
    }

    #[test]
    fn test_finite_gradients_step_and_clip() {
        let device = Default::default();
        let layer: Linear<AB> = LinearConfig::new(2, 1).init(&device);
        let before = weights(&layer);
        let mut optim  = SgdConfig::new().init::<AB, Linear<AB>>();
        let mut scaler = GradScaler::new(GradScalerConfig::default());

        // d/dw = [3, 4], clipped to norm <= 1, so each weight moves at most lr
        let x    = Tensor::<AB, 2>::from_floats([[3.0, 4.0]], &device);
        let loss = layer.forward(x).sum();
        let (layer, stepped) = apply_step(layer, &mut optim, &mut scaler, loss, 0.1, 1.0);

        assert!(stepped);
        assert_eq!(scaler.scale_factor(), 65536.0);
        let after = weights(&layer);
        for (b, a) in before.iter().zip(&after) {
            let moved = b - a;
            assert!(moved > 0.0 && moved <= 0.1 + 1e-4, "moved {moved}");
        }
    }

    #[test]
    fn test_validation_interval() {
        // 100 samples, 10% validation → 90 train; batch 2 → every 9 steps
        assert_eq!(validation_interval(90, 2), Some(9));
        assert_eq!(validation_interval(5, 1), Some(1));
        // Fewer than 5 batches per epoch → no validation at all
        assert_eq!(validation_interval(9, 2), None);
        assert_eq!(validation_interval(0, 1), None);
    }

    #[test]
    fn test_checkpoint_epochs() {
        let saved: Vec<usize> = (1..=10).filter(|&e| is_checkpoint_epoch(e)).collect();
        assert_eq!(saved, vec![4, 9]);
    }

    #[test]
    fn test_snapshot_steps() {
        assert!(is_snapshot_step(5));
        assert!(is_snapshot_step(10));
        assert!(!is_snapshot_step(9));
    }
}
