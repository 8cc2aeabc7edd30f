// ============================================================
// Layer 2 — TrainUseCase
// ============================================================
// Orchestrates the full training pipeline in order:
//
//   Step 1: Check the configuration
//   Step 2: Open the image/mask dataset  (Layer 4 - data)
//   Step 3: Split train/validation       (Layer 4 - data)
//   Step 4: Create run directories       (Layer 6 - infra)
//           (refused when the run already holds checkpoints)
//   Step 5: Save config                  (Layer 6 - infra)
//   Step 6: Run training loop            (Layer 5 - ml)

use anyhow::{bail, ensure, Context, Result};
use serde::{Deserialize, Serialize};
use std::{path::Path, sync::Arc};

use crate::data::{
    dataset::SegmentationDataset,
    splitter::{split_indices, DEFAULT_SPLIT_SEED},
};
use crate::domain::{
    legend::MaskLegend,
    run::{BackendKind, ExportMode, OptimizerKind, RunId},
};
use crate::infra::{checkpoint::CheckpointManager, workspace::RunLayout};
use crate::ml::trainer::{run_training, TrainingSummary};

// ─── Training Configuration ──────────────────────────────────────────────────
// All hyperparameters for a training run.
// Saved as train_config.json next to the checkpoints so a later
// `evaluate` can rebuild the same network and the same split.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainConfig {
    pub data_dir:           String,
    pub output_root:        String,
    pub epochs:             usize,
    pub batch_size:         usize,
    pub learning_rate:      f64,
    /// Checkpoint file to start from
    pub load:               Option<String>,
    /// Downscaling factor applied to images and masks, in (0, 1]
    pub scale:              f64,
    /// Percent of the data held out for validation, in [0, 100)
    pub validation_percent: f64,
    pub amp:                bool,
    pub bilinear:           bool,
    pub classes:            usize,
    pub channels:           usize,
    pub optimizer:          OptimizerKind,
    pub weight_decay:       f64,
    pub momentum:           f64,
    pub gradient_clipping:  f64,
    pub export:             ExportMode,
    pub save_checkpoint:    bool,
    /// Loader shuffle and parameter initialisation
    pub seed:               u64,
    pub split_seed:         u64,
    pub num_workers:        usize,
    pub base_channels:      usize,
    pub backend:            BackendKind,
}

impl TrainConfig {
    /// Every setting at its usual value; the export mode has none.
    pub fn new(export: ExportMode) -> Self {
        Self {
            data_dir:           "data".to_string(),
            output_root:        ".".to_string(),
            epochs:             25,
            batch_size:         1,
            learning_rate:      1e-5,
            load:               None,
            scale:              1.0,
            validation_percent: 10.0,
            amp:                true,
            bilinear:           false,
            classes:            1,
            channels:           3,
            optimizer:          OptimizerKind::RmsProp,
            weight_decay:       1e-8,
            momentum:           0.999,
            gradient_clipping:  1.0,
            export,
            save_checkpoint:    true,
            seed:               42,
            split_seed:         DEFAULT_SPLIT_SEED,
            num_workers:        4,
            base_channels:      64,
            backend:            BackendKind::Wgpu,
        }
    }

    pub fn run_id(&self) -> RunId {
        RunId::new(self.export, self.optimizer, self.weight_decay)
    }

    pub fn validate(&self) -> Result<()> {
        ensure!(self.batch_size >= 1, "batch size must be at least 1");
        ensure!(self.classes >= 1, "number of classes must be at least 1");
        ensure!(self.channels >= 1, "number of input channels must be at least 1");
        ensure!(self.base_channels >= 1, "base channel width must be at least 1");
        ensure!(
            (0.0..100.0).contains(&self.validation_percent),
            "validation percentage must be in [0, 100), got {}",
            self.validation_percent
        );
        ensure!(
            self.gradient_clipping > 0.0,
            "gradient clipping threshold must be positive, got {}",
            self.gradient_clipping
        );
        ensure!(self.learning_rate > 0.0, "learning rate must be positive");
        Ok(())
    }
}

/// `<data_dir>/imgs` + `<data_dir>/masks`, Carvana naming first.
pub fn open_dataset(data_dir: &str, scale: f64) -> Result<SegmentationDataset> {
    let root = Path::new(data_dir);
    SegmentationDataset::open(root.join("imgs"), root.join("masks"), scale)
        .with_context(|| format!("Cannot build a dataset from '{data_dir}'"))
}

/// Every mask value must map to an output the network has:
/// one logit covers two values, `classes` logits cover `classes`.
pub fn check_legend_fits(legend: &MaskLegend, classes: usize) -> Result<()> {
    ensure!(!legend.is_empty(), "the masks contain no values");
    let capacity = if classes == 1 { 2 } else { classes };
    ensure!(
        legend.len() <= capacity,
        "the masks contain {} distinct values {:?}, but a network with {} output class(es) \
         can represent at most {}; set --classes accordingly",
        legend.len(),
        legend.values(),
        classes,
        capacity
    );
    Ok(())
}

// ─── TrainUseCase ─────────────────────────────────────────────────────────────
pub struct TrainUseCase {
    config: TrainConfig,
}

impl TrainUseCase {
    pub fn new(config: TrainConfig) -> Self {
        Self { config }
    }

    /// Execute the full training pipeline end to end
    pub fn execute(&self) -> Result<TrainingSummary> {
        let cfg = &self.config;

        // ── Step 1: Check the configuration ──────────────────────────────────
        cfg.validate()?;

        // ── Step 2: Open the dataset ──────────────────────────────────────────
        // Strict `<id>_mask.*` naming first, plain `<id>.*` if that does not fit
        tracing::info!("Loading images and masks from '{}'", cfg.data_dir);
        let dataset = open_dataset(&cfg.data_dir, cfg.scale)?;
        check_legend_fits(dataset.legend(), cfg.classes)?;

        // ── Step 3: Train / validation split ──────────────────────────────────
        let split = split_indices(
            dataset.sample_count(),
            cfg.validation_percent / 100.0,
            cfg.split_seed,
        )?;
        tracing::info!(
            "Split: {} train, {} validation",
            split.train_len(),
            split.validation_len()
        );

        // ── Step 4: Run directories ───────────────────────────────────────────
        // Epochs restart at 1, so an earlier run's checkpoints would collide
        let checkpoints = CheckpointManager::new(RunLayout::new(&cfg.output_root, cfg.run_id()).checkpoints);
        let existing    = checkpoints.saved_checkpoints()?;
        if let Some(first) = existing.first() {
            bail!(
                "Run directory '{}' already holds {} checkpoint(s) (e.g. '{}'); \
                 move them or choose another --output-root",
                checkpoints.dir().display(),
                existing.len(),
                first.display()
            );
        }
        let layout = RunLayout::create(&cfg.output_root, cfg.run_id())?;

        // ── Step 5: Save config next to the checkpoints ───────────────────────
        checkpoints.save_config(cfg)?;

        // ── Step 6: Run training loop (Layer 5) ───────────────────────────────
        run_training(cfg, Arc::new(dataset), &split, &layout)
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::dataset::tests::write_sized_fixture;
    use crate::ml::model::UNetConfig;
    use burn::backend::NdArray;
    use image::{GrayImage, Luma};
    use std::{fs, path::PathBuf};

    /// Six 16px samples and a small NdArray config writing under `root`.
    fn small_run(root: &Path, export: ExportMode) -> (PathBuf, TrainConfig) {
        let data = root.join("data");
        write_sized_fixture(&data, 6, 16, "_mask");

        let mut cfg = TrainConfig::new(export);
        cfg.data_dir           = data.to_string_lossy().into_owned();
        cfg.output_root        = root.to_string_lossy().into_owned();
        cfg.validation_percent = 20.0;
        cfg.learning_rate      = 1e-3;
        cfg.base_channels      = 2;
        cfg.num_workers        = 1;
        cfg.backend            = BackendKind::NdArray;
        (data, cfg)
    }

    #[test]
    fn test_defaults() {
        let cfg = TrainConfig::new(ExportMode::Sigmoid);
        assert_eq!(cfg.epochs, 25);
        assert_eq!(cfg.optimizer, OptimizerKind::RmsProp);
        assert_eq!(cfg.run_id().as_str(), "sigmoid-rmsprop-1e-8");
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut cfg = TrainConfig::new(ExportMode::Mean);
        cfg.validation_percent = 100.0;
        assert!(cfg.validate().is_err());

        let mut cfg = TrainConfig::new(ExportMode::Mean);
        cfg.batch_size = 0;
        assert!(cfg.validate().is_err());

        let mut cfg = TrainConfig::new(ExportMode::Mean);
        cfg.classes = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_training_run_end_to_end() {
        let dir = tempfile::tempdir().unwrap();
        let (_, mut cfg) = small_run(dir.path(), ExportMode::Sigmoid);
        cfg.epochs = 5;

        let summary = TrainUseCase::new(cfg.clone()).execute().unwrap();

        // 6 samples, 20% → 5 train / 1 validation; batch 1 → 5 steps per epoch
        assert_eq!(summary.global_step, 25);
        assert_eq!(summary.checkpoints.len(), 1);
        assert!(summary.last_dice.is_some());

        let layout = RunLayout::new(dir.path(), cfg.run_id());
        assert!(layout.checkpoints.join("checkpoint_epoch4.mpk.gz").is_file());
        assert!(!layout.checkpoints.join("checkpoint_epoch5.mpk.gz").exists());
        assert!(layout.checkpoints.join("train_config.json").is_file());

        let steps = fs::read_to_string(layout.outputs.join("steps.csv")).unwrap();
        assert_eq!(steps.lines().count(), 1 + 25);
        // validation every 5 / (5 · 1) = 1 step
        let rounds = fs::read_to_string(layout.outputs.join("validation.csv")).unwrap();
        assert_eq!(rounds.lines().count(), 1 + 25);
        assert!(layout.outputs.join("snapshots").join("step5_pred.png").is_file());
    }

    #[test]
    fn test_adam_run_without_decode_threads() {
        let dir = tempfile::tempdir().unwrap();
        let (_, mut cfg) = small_run(dir.path(), ExportMode::Mean);
        cfg.epochs      = 1;
        cfg.optimizer   = OptimizerKind::Adam;
        cfg.num_workers = 0;

        let summary = TrainUseCase::new(cfg.clone()).execute().unwrap();
        assert_eq!(summary.global_step, 5);
        assert!(summary.final_lr > 0.0);
        assert_eq!(cfg.run_id().as_str(), "mean-adam-1e-8");
        assert!(RunLayout::new(dir.path(), cfg.run_id()).outputs.join("steps.csv").is_file());
    }

    #[test]
    fn test_multiclass_run() {
        let dir = tempfile::tempdir().unwrap();
        let (_, mut cfg) = small_run(dir.path(), ExportMode::Sigmoid);
        cfg.epochs  = 1;
        cfg.classes = 2;
        cfg.amp     = false;

        let summary = TrainUseCase::new(cfg.clone()).execute().unwrap();
        assert_eq!(summary.global_step, 5);
        let dice = summary.last_dice.unwrap();
        assert!((0.0..=1.0).contains(&dice), "dice = {dice}");
        let layout = RunLayout::new(dir.path(), cfg.run_id());
        assert!(layout.outputs.join("snapshots").join("step5_pred.png").is_file());
    }

    #[test]
    fn test_existing_checkpoints_stop_the_run_before_training() {
        let dir = tempfile::tempdir().unwrap();
        let (_, mut cfg) = small_run(dir.path(), ExportMode::Sigmoid);
        cfg.epochs = 1;

        let layout  = RunLayout::create(dir.path(), cfg.run_id()).unwrap();
        let earlier = CheckpointManager::new(&layout.checkpoints);
        let model   = UNetConfig::new(3, 1).with_base_channels(2).init::<NdArray>(&Default::default());
        let legend  = MaskLegend::from_values(vec![vec![0], vec![255]]);
        earlier.save(&model, &legend, 4).unwrap();

        let err = TrainUseCase::new(cfg).execute().unwrap_err();
        assert!(err.to_string().contains("already holds 1 checkpoint"), "{err}");
        assert!(!layout.checkpoints.join("train_config.json").exists());
        assert!(!layout.outputs.join("steps.csv").exists());
    }

    #[test]
    fn test_legend_larger_than_classes_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let (data, cfg) = small_run(dir.path(), ExportMode::Sigmoid);
        let mut mask = GrayImage::new(16, 16);
        mask.put_pixel(1, 1, Luma([128]));
        mask.put_pixel(2, 2, Luma([255]));
        mask.save(data.join("masks").join("s000_mask.png")).unwrap();

        let err = TrainUseCase::new(cfg).execute().unwrap_err();
        assert!(err.to_string().contains("3 distinct values"), "{err}");

        assert!(check_legend_fits(&MaskLegend::from_values(vec![vec![0], vec![128], vec![255]]), 3).is_ok());
        assert!(check_legend_fits(&MaskLegend::from_values(Vec::<Vec<u8>>::new()), 1).is_err());
    }
}
