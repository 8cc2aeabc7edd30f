// ============================================================
// Layer 1 — CLI Commands and Arguments
// ============================================================
// Defines the two subcommands, `train` and `evaluate`,
// and all their configurable flags.
//
// clap's derive macros automatically generate:
//   - help text (--help)
//   - error messages for missing args
//   - type conversion (string → usize, f64, enums, etc.)
//
// Reference: Rust Book §12 (Building a CLI Program)

use clap::{ArgAction, Args, Subcommand};
use std::path::PathBuf;

use crate::application::{evaluate_use_case::EvaluateConfig, train_use_case::TrainConfig};
use crate::data::splitter::DEFAULT_SPLIT_SEED;
use crate::domain::run::{BackendKind, ExportMode, OptimizerKind};

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Train the U-Net on images and target masks
    Train(TrainArgs),

    /// Validation Dice score of a saved checkpoint
    Evaluate(EvaluateArgs),
}

/// All arguments for the `train` command.
#[derive(Args, Debug)]
pub struct TrainArgs {
    /// Number of epochs
    #[arg(short, long, default_value_t = 25)]
    pub epochs: usize,

    /// Batch size
    #[arg(short, long, default_value_t = 1)]
    pub batch_size: usize,

    /// Initial learning rate
    #[arg(short, long, default_value_t = 1e-5)]
    pub learning_rate: f64,

    /// Load model weights from a checkpoint file
    #[arg(long)]
    pub load: Option<String>,

    /// Downscaling factor of the images
    #[arg(short, long, default_value_t = 1.0)]
    pub scale: f64,

    /// Percent of the data used as validation (0-100)
    #[arg(short, long, default_value_t = 10.0)]
    pub validation: f64,

    /// Loss scaling against gradient underflow
    #[arg(long, default_value_t = true, action = ArgAction::Set)]
    pub amp: bool,

    /// Use bilinear upsampling instead of transposed convolutions
    #[arg(long, default_value_t = false)]
    pub bilinear: bool,

    /// Number of classes (1 = binary segmentation)
    #[arg(short, long, default_value_t = 1)]
    pub classes: usize,

    /// Number of input image channels
    #[arg(long, default_value_t = 3)]
    pub channels: usize,

    #[arg(long, value_enum, default_value_t = OptimizerKind::RmsProp)]
    pub optimizer: OptimizerKind,

    #[arg(long, default_value_t = 1e-8)]
    pub weight_decay: f64,

    /// RMSProp momentum
    #[arg(long, default_value_t = 0.999)]
    pub momentum: f64,

    /// Maximum global L2 norm of the gradients
    #[arg(long, default_value_t = 1.0)]
    pub gradient_clipping: f64,

    /// How predictions are rendered in snapshots
    #[arg(long, value_enum)]
    pub export: ExportMode,

    /// Directory holding `imgs/` and `masks/`
    #[arg(long, default_value = "data")]
    pub data_dir: String,

    /// Where `outputs/` and `checkpoints/` are created
    #[arg(long, default_value = ".")]
    pub output_root: String,

    /// Save a checkpoint every fifth epoch
    #[arg(long, default_value_t = true, action = ArgAction::Set)]
    pub save_checkpoint: bool,

    /// Seed for loader shuffling and weight initialisation
    #[arg(long, default_value_t = 42)]
    pub seed: u64,

    /// Seed of the train/validation partition
    #[arg(long, default_value_t = DEFAULT_SPLIT_SEED)]
    pub split_seed: u64,

    /// Threads decoding the samples of each batch (0 = decode inline)
    #[arg(long, default_value_t = 4)]
    pub num_workers: usize,

    /// Width of the first U-Net block
    #[arg(long, default_value_t = 64)]
    pub base_channels: usize,

    #[arg(long, value_enum, default_value_t = BackendKind::Wgpu)]
    pub backend: BackendKind,
}

/// Convert CLI TrainArgs into the application-layer TrainConfig.
/// The application layer never sees clap types.
impl From<TrainArgs> for TrainConfig {
    fn from(a: TrainArgs) -> Self {
        TrainConfig {
            data_dir:           a.data_dir,
            output_root:        a.output_root,
            epochs:             a.epochs,
            batch_size:         a.batch_size,
            learning_rate:      a.learning_rate,
            load:               a.load,
            scale:              a.scale,
            validation_percent: a.validation,
            amp:                a.amp,
            bilinear:           a.bilinear,
            classes:            a.classes,
            channels:           a.channels,
            optimizer:          a.optimizer,
            weight_decay:       a.weight_decay,
            momentum:           a.momentum,
            gradient_clipping:  a.gradient_clipping,
            export:             a.export,
            save_checkpoint:    a.save_checkpoint,
            seed:               a.seed,
            split_seed:         a.split_seed,
            num_workers:        a.num_workers,
            base_channels:      a.base_channels,
            backend:            a.backend,
        }
    }
}

/// All arguments for the `evaluate` command
#[derive(Args, Debug)]
pub struct EvaluateArgs {
    /// Checkpoint file written by `train`
    #[arg(long)]
    pub checkpoint: PathBuf,

    /// Data directory, if it moved since training
    #[arg(long)]
    pub data_dir: Option<String>,

    #[arg(short, long, default_value_t = 1)]
    pub batch_size: usize,

    #[arg(long, default_value_t = 4)]
    pub num_workers: usize,

    #[arg(long, value_enum, default_value_t = BackendKind::Wgpu)]
    pub backend: BackendKind,
}

impl From<EvaluateArgs> for EvaluateConfig {
    fn from(a: EvaluateArgs) -> Self {
        EvaluateConfig {
            checkpoint:  a.checkpoint,
            data_dir:    a.data_dir,
            batch_size:  a.batch_size,
            num_workers: a.num_workers,
            backend:     a.backend,
        }
    }
}
