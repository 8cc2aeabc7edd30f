// ============================================================
// Layer 3 — Run-level Choices
// ============================================================
// String-keyed switches ("rmsprop", "adam", "sigmoid", ...) become
// enums here. Each one is matched exactly once at setup time; the
// training loop never re-checks them per batch.

use std::fmt;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

/// Which adaptive optimizer drives the parameter updates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OptimizerKind {
    /// Running average of squared gradients plus momentum
    #[value(name = "rmsprop")]
    RmsProp,
    /// First and second moment estimates
    Adam,
}

impl OptimizerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OptimizerKind::RmsProp => "rmsprop",
            OptimizerKind::Adam    => "adam",
        }
    }
}

impl fmt::Display for OptimizerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How raw logits are turned into a binary mask for visual snapshots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportMode {
    /// Foreground where sigmoid(logit) > 0.5
    Sigmoid,
    /// Foreground where logit exceeds the mean of the positive part
    Mean,
}

impl ExportMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExportMode::Sigmoid => "sigmoid",
            ExportMode::Mean    => "mean",
        }
    }
}

impl fmt::Display for ExportMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Compute backend for a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Wgpu,
    #[value(name = "ndarray")]
    NdArray,
}

/// Identifier shared by `outputs/<run>` and `checkpoints/<run>`.
///
/// Built from the export mode, optimizer and weight decay so that
/// sweeps over those three never collide on disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunId(String);

impl RunId {
    pub fn new(export: ExportMode, optimizer: OptimizerKind, weight_decay: f64) -> Self {
        Self(format!("{}-{}-{:e}", export, optimizer, weight_decay))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_id_joins_choices() {
        let id = RunId::new(ExportMode::Sigmoid, OptimizerKind::RmsProp, 1e-8);
        assert_eq!(id.as_str(), "sigmoid-rmsprop-1e-8");

        let id = RunId::new(ExportMode::Mean, OptimizerKind::Adam, 1e-6);
        assert_eq!(id.to_string(), "mean-adam-1e-6");
    }

    #[test]
    fn test_cli_names() {
        assert_eq!(
            OptimizerKind::from_str("rmsprop", true).ok(),
            Some(OptimizerKind::RmsProp)
        );
        assert_eq!(BackendKind::from_str("ndarray", true).ok(), Some(BackendKind::NdArray));
        assert_eq!(ExportMode::from_str("mean", true).ok(), Some(ExportMode::Mean));
    }
}
