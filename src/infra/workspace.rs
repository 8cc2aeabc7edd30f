// ============================================================
// Layer 6 — Run Directories
// ============================================================
// Every run owns two directories under the output root:
//
//   <root>/outputs/<run>      step/validation CSVs and snapshots
//   <root>/checkpoints/<run>  checkpoint_epoch{N}.mpk.gz + train_config.json
//
// `<run>` is the RunId, e.g. "sigmoid-rmsprop-1e-8".

use anyhow::{Context, Result};
use std::{
    fs,
    path::{Path, PathBuf},
};

use crate::domain::run::RunId;

#[derive(Debug, Clone)]
pub struct RunLayout {
    pub run:         RunId,
    pub outputs:     PathBuf,
    pub checkpoints: PathBuf,
}

impl RunLayout {
    /// Resolve the paths for `run` without touching the filesystem.
    pub fn new(root: impl AsRef<Path>, run: RunId) -> Self {
        let root = root.as_ref();
        Self {
            outputs:     root.join("outputs").join(run.as_str()),
            checkpoints: root.join("checkpoints").join(run.as_str()),
            run,
        }
    }

    /// Resolve and create both directories (like `mkdir -p`).
    pub fn create(root: impl AsRef<Path>, run: RunId) -> Result<Self> {
        let layout = Self::new(root, run);
        for dir in [&layout.outputs, &layout.checkpoints] {
            fs::create_dir_all(dir)
                .with_context(|| format!("Cannot create run directory '{}'", dir.display()))?;
        }
        tracing::debug!(
            "Run '{}': outputs in '{}', checkpoints in '{}'",
            layout.run,
            layout.outputs.display(),
            layout.checkpoints.display(),
        );
        Ok(layout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::run::{ExportMode, OptimizerKind};

    #[test]
    fn test_layout_paths_use_run_id() {
        let run    = RunId::new(ExportMode::Sigmoid, OptimizerKind::RmsProp, 1e-8);
        let layout = RunLayout::new("/tmp/x", run);
        assert_eq!(layout.outputs, PathBuf::from("/tmp/x/outputs/sigmoid-rmsprop-1e-8"));
        assert_eq!(layout.checkpoints, PathBuf::from("/tmp/x/checkpoints/sigmoid-rmsprop-1e-8"));
    }

    #[test]
    fn test_create_makes_directories() {
        let dir    = tempfile::tempdir().unwrap();
        let run    = RunId::new(ExportMode::Mean, OptimizerKind::Adam, 1e-4);
        let layout = RunLayout::create(dir.path(), run).unwrap();
        assert!(layout.outputs.is_dir());
        assert!(layout.checkpoints.is_dir());
    }
}
