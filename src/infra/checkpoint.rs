// ============================================================
// Layer 6 — Checkpoint Manager
// ============================================================
// Saves and restores model weights with Burn's named MessagePack
// recorder (gzip-compressed) at full precision.
//
// One checkpoint record holds:
//   model        — the U-Net parameters
//   mask_values  — the dataset's MaskLegend, so a deployed model
//                  can map class indices back to pixel values
//
// Loading hands the two back separately: the legend is stripped
// before the parameters are restored into a model.
//
// File naming convention:
//   checkpoints/<run>/
//     checkpoint_epoch4.mpk.gz   ← written after epoch 4
//     checkpoint_epoch9.mpk.gz   ← written after epoch 9
//     ...
//     train_config.json          ← hyperparameters of the run
//
// A checkpoint is never overwritten: saving an epoch whose file
// already exists is an error.
//
// Reference: Burn Book §5 (Records and Checkpointing)

use anyhow::{bail, Context, Result};
use burn::{
    prelude::*,
    record::{FullPrecisionSettings, NamedMpkGzFileRecorder, Record, Recorder},
};
use std::{
    fs,
    path::{Path, PathBuf},
};

use crate::application::train_use_case::TrainConfig;
use crate::domain::legend::MaskLegend;
use crate::ml::model::{UNet, UNetRecord};

const EXTENSION: &str = ".mpk.gz";

/// What goes into one checkpoint file.
#[derive(Record)]
pub struct SegmentationCheckpoint<B: Backend> {
    pub model:       UNetRecord<B>,
    pub mask_values: Vec<Vec<u8>>,
}

type CheckpointRecorder = NamedMpkGzFileRecorder<FullPrecisionSettings>;

/// Manages saving and loading of model checkpoints for one run.
pub struct CheckpointManager {
    dir: PathBuf,
}

impl CheckpointManager {
    /// The directory is created on first save, not here.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Full path, extension included, of the checkpoint for `epoch`.
    pub fn checkpoint_path(&self, epoch: usize) -> PathBuf {
        self.dir.join(format!("checkpoint_epoch{epoch}{EXTENSION}"))
    }

    /// Checkpoint files already present in the run directory, sorted.
    pub fn saved_checkpoints(&self) -> Result<Vec<PathBuf>> {
        if !self.dir.is_dir() {
            return Ok(Vec::new());
        }
        let entries = fs::read_dir(&self.dir)
            .with_context(|| format!("Cannot list checkpoint directory '{}'", self.dir.display()))?;

        let mut found = Vec::new();
        for entry in entries {
            let path = entry?.path();
            let is_checkpoint = path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with("checkpoint_epoch") && n.ends_with(EXTENSION));
            if is_checkpoint {
                found.push(path);
            }
        }
        found.sort();
        Ok(found)
    }

    /// Save model weights plus the mask legend for a given epoch.
    pub fn save<B: Backend>(
        &self,
        model:  &UNet<B>,
        legend: &MaskLegend,
        epoch:  usize,
    ) -> Result<PathBuf> {
        let path = self.checkpoint_path(epoch);
        if path.exists() {
            bail!("Checkpoint '{}' already exists; refusing to overwrite it", path.display());
        }
        fs::create_dir_all(&self.dir)
            .with_context(|| format!("Cannot create checkpoint directory '{}'", self.dir.display()))?;

        let record = SegmentationCheckpoint {
            model:       model.clone().into_record(),
            mask_values: legend.values().to_vec(),
        };

        // The recorder appends its own extension
        CheckpointRecorder::new()
            .record(record, strip_extension(&path))
            .with_context(|| format!("Failed to save checkpoint to '{}'", path.display()))?;

        tracing::debug!("Saved checkpoint: epoch {}", epoch);
        Ok(path)
    }

    /// Load a checkpoint file and split it into (parameters, legend).
    ///
    /// `path` may be given with or without the `.mpk.gz` extension.
    pub fn load<B: Backend>(
        path:   impl AsRef<Path>,
        device: &B::Device,
    ) -> Result<(UNetRecord<B>, MaskLegend)> {
        let path = path.as_ref();
        let checkpoint: SegmentationCheckpoint<B> = CheckpointRecorder::new()
            .load(strip_extension(path), device)
            .with_context(|| format!("Cannot load checkpoint '{}'", path.display()))?;

        let legend = MaskLegend::from_values(checkpoint.mask_values);
        tracing::info!(
            "Loaded checkpoint '{}' ({} mask values)",
            path.display(),
            legend.len()
        );
        Ok((checkpoint.model, legend))
    }

    /// Save the training configuration to JSON.
    pub fn save_config(&self, cfg: &TrainConfig) -> Result<()> {
        fs::create_dir_all(&self.dir)
            .with_context(|| format!("Cannot create checkpoint directory '{}'", self.dir.display()))?;
        let path = self.dir.join("train_config.json");
        let json = serde_json::to_string_pretty(cfg)?;

        fs::write(&path, json)
            .with_context(|| format!("Cannot write config to '{}'", path.display()))?;

        tracing::debug!("Saved training config to '{}'", path.display());
        Ok(())
    }

    /// Load the training configuration of a previous run.
    pub fn load_config(&self) -> Result<TrainConfig> {
        let path = self.dir.join("train_config.json");
        let json = fs::read_to_string(&path)
            .with_context(|| format!("Cannot read config from '{}'", path.display()))?;
        Ok(serde_json::from_str(&json)?)
    }
}

fn strip_extension(path: &Path) -> PathBuf {
    let text = path.to_string_lossy();
    match text.strip_suffix(EXTENSION) {
        Some(stem) => PathBuf::from(stem),
        None => path.to_path_buf(),
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::run::ExportMode;
    use crate::ml::model::UNetConfig;
    use burn::backend::NdArray;

    type B = NdArray;

    fn tiny_model(seed: u64) -> UNet<B> {
        B::seed(seed);
        UNetConfig::new(3, 2).with_base_channels(2).init(&Default::default())
    }

    fn outputs(model: &UNet<B>) -> Vec<f32> {
        let input = Tensor::<B, 4>::ones([1, 3, 16, 16], &Default::default()).mul_scalar(0.5);
        model.forward(input).into_data().iter::<f32>().collect()
    }

    #[test]
    fn test_strip_extension() {
        assert_eq!(strip_extension(Path::new("a/checkpoint_epoch4.mpk.gz")), PathBuf::from("a/checkpoint_epoch4"));
        assert_eq!(strip_extension(Path::new("a/checkpoint_epoch4")), PathBuf::from("a/checkpoint_epoch4"));
    }

    #[test]
    fn test_resume_gives_identical_outputs() {
        let dir     = tempfile::tempdir().unwrap();
        let manager = CheckpointManager::new(dir.path().join("run"));
        let legend  = MaskLegend::from_values(vec![vec![0], vec![255]]);

        let trained = tiny_model(1);
        let path    = manager.save(&trained, &legend, 4).unwrap();
        assert!(path.is_file());
        assert!(path.to_string_lossy().ends_with("checkpoint_epoch4.mpk.gz"));

        let (record, loaded_legend) = CheckpointManager::load::<B>(&path, &Default::default()).unwrap();
        assert_eq!(loaded_legend, legend);

        let restored = tiny_model(2).load_record(record);
        assert_eq!(outputs(&trained), outputs(&restored));
    }

    #[test]
    fn test_never_overwrites() {
        let dir     = tempfile::tempdir().unwrap();
        let manager = CheckpointManager::new(dir.path());
        let legend  = MaskLegend::from_values(vec![vec![0], vec![1]]);
        let model   = tiny_model(3);

        manager.save(&model, &legend, 9).unwrap();
        assert!(manager.save(&model, &legend, 9).is_err());
    }

    #[test]
    fn test_lists_saved_checkpoints() {
        let dir     = tempfile::tempdir().unwrap();
        let manager = CheckpointManager::new(dir.path().join("run"));
        assert!(manager.saved_checkpoints().unwrap().is_empty());

        let legend = MaskLegend::from_values(vec![vec![0], vec![1]]);
        manager.save(&tiny_model(4), &legend, 4).unwrap();
        manager.save_config(&TrainConfig::new(ExportMode::Sigmoid)).unwrap();

        let found = manager.saved_checkpoints().unwrap();
        assert_eq!(found, vec![manager.checkpoint_path(4)]);
        assert_eq!(found[0].parent(), Some(manager.dir()));
    }

    #[test]
    fn test_config_round_trip() {
        let dir     = tempfile::tempdir().unwrap();
        let manager = CheckpointManager::new(dir.path());
        let cfg     = TrainConfig::new(ExportMode::Mean);
        manager.save_config(&cfg).unwrap();
        let back = manager.load_config().unwrap();
        assert_eq!(back.epochs, cfg.epochs);
        assert_eq!(back.optimizer, cfg.optimizer);
    }
}
