// ============================================================
// Layer 2 — EvaluateUseCase
// ============================================================
// Scores a saved checkpoint on the validation split of its run:
//
//   Step 1: Read train_config.json next to the checkpoint
//   Step 2: Rebuild the dataset and the SAME split
//           (same data dir, scale, percentage and split seed)
//   Step 3: Rebuild the network and restore its weights
//   Step 4: Validation Dice on the inner (non-autodiff) backend

use anyhow::{Context, Result};
use burn::{
    backend::{ndarray::NdArrayDevice, wgpu::WgpuDevice, NdArray, Wgpu},
    prelude::*,
};
use std::{path::PathBuf, sync::Arc};

use crate::application::train_use_case::{check_legend_fits, open_dataset, TrainConfig};
use crate::data::{
    loader::{build_validation_loader, LoaderOptions},
    splitter::split_indices,
};
use crate::domain::run::BackendKind;
use crate::infra::checkpoint::CheckpointManager;
use crate::ml::{
    evaluator::evaluate,
    loss::LossMode,
    model::{UNet, UNetConfig},
};

#[derive(Debug, Clone)]
pub struct EvaluateConfig {
    pub checkpoint:  PathBuf,
    /// Overrides the data directory recorded with the run
    pub data_dir:    Option<String>,
    pub batch_size:  usize,
    pub num_workers: usize,
    pub backend:     BackendKind,
}

#[derive(Debug, Clone)]
pub struct EvaluationReport {
    pub dice:              f64,
    pub validation_size:   usize,
}

pub struct EvaluateUseCase {
    config: EvaluateConfig,
}

impl EvaluateUseCase {
    pub fn new(config: EvaluateConfig) -> Self {
        Self { config }
    }

    pub fn execute(&self) -> Result<EvaluationReport> {
        // ── Step 1: Configuration of the run that wrote the checkpoint ───────
        let run_dir = self
            .config
            .checkpoint
            .parent()
            .map(PathBuf::from)
            .unwrap_or_default();
        let mut train_cfg = CheckpointManager::new(run_dir)
            .load_config()
            .context("evaluate needs the train_config.json written next to the checkpoint")?;
        if let Some(dir) = &self.config.data_dir {
            train_cfg.data_dir = dir.clone();
        }

        match self.config.backend {
            BackendKind::Wgpu => self.evaluate_on::<Wgpu>(&train_cfg, WgpuDevice::default()),
            BackendKind::NdArray => self.evaluate_on::<NdArray>(&train_cfg, NdArrayDevice::default()),
        }
    }

    fn evaluate_on<B: Backend>(&self, cfg: &TrainConfig, device: B::Device) -> Result<EvaluationReport> {
        // ── Step 2: Same dataset, same split ──────────────────────────────────
        let dataset = open_dataset(&cfg.data_dir, cfg.scale)?;
        check_legend_fits(dataset.legend(), cfg.classes)?;
        let split   = split_indices(
            dataset.sample_count(),
            cfg.validation_percent / 100.0,
            cfg.split_seed,
        )?;

        let opts = LoaderOptions {
            batch_size:   self.config.batch_size,
            num_workers:  self.config.num_workers,
            shuffle_seed: cfg.seed,
        };
        let loader = build_validation_loader::<B>(Arc::new(dataset), &split, opts, &device)?;

        // ── Step 3: Restore the network ───────────────────────────────────────
        let (record, legend) = CheckpointManager::load::<B>(&self.config.checkpoint, &device)?;
        let model: UNet<B> = UNetConfig::new(cfg.channels, cfg.classes)
            .with_bilinear(cfg.bilinear)
            .with_base_channels(cfg.base_channels)
            .init::<B>(&device)
            .load_record(record);
        tracing::info!("Mask values of the checkpoint: {:?}", legend.values());

        // ── Step 4: Score ─────────────────────────────────────────────────────
        let dice = evaluate(&model, loader.as_ref(), LossMode::for_classes(cfg.classes))?;
        Ok(EvaluationReport { dice, validation_size: split.validation_len() })
    }
}
