// ============================================================
// Layer 1 — CLI / Presentation Layer
// ============================================================
// This is the entry point for all user interaction.
// All business logic is delegated to Layer 2 (application).
//
// Two commands are supported:
//   1. `train`    — trains the U-Net on an image/mask folder
//   2. `evaluate` — scores a checkpoint on its validation split
//
// Reference: Rust Book §7 (Modules), §12 (CLI programs)

pub mod commands;

use anyhow::Result;
use clap::Parser;
use commands::{Commands, EvaluateArgs, TrainArgs};

#[derive(Parser, Debug)]
#[command(
    name = "unet-trainer",
    version = "0.1.0",
    about = "Train a U-Net on images and target masks."
)]
pub struct Cli {
    /// The subcommand to run (train or evaluate)
    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    /// Match on the subcommand and dispatch to the correct use case.
    pub fn run(self) -> Result<()> {
        match self.command {
            Commands::Train(args)    => run_train(args),
            Commands::Evaluate(args) => run_evaluate(args),
        }
    }
}

fn run_train(args: TrainArgs) -> Result<()> {
    use crate::application::train_use_case::TrainUseCase;

    tracing::info!("Starting training on images in: {}", args.data_dir);

    let summary = TrainUseCase::new(args.into()).execute()?;

    println!(
        "Training complete: {} epochs, {} steps ({} skipped), final lr {:e}",
        summary.epochs, summary.global_step, summary.skipped_steps, summary.final_lr,
    );
    if let Some(dice) = summary.last_dice {
        println!("Last validation Dice: {dice:.4}");
    }
    for path in &summary.checkpoints {
        println!("Checkpoint: {}", path.display());
    }
    Ok(())
}

fn run_evaluate(args: EvaluateArgs) -> Result<()> {
    use crate::application::evaluate_use_case::EvaluateUseCase;

    let report = EvaluateUseCase::new(args.into()).execute()?;
    println!(
        "Validation Dice: {:.4} over {} samples",
        report.dice, report.validation_size
    );
    Ok(())
}
