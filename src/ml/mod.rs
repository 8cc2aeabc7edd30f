// ============================================================
// Layer 5 — ML / Model Layer (Burn)
// ============================================================
// The network, the loss, and everything that turns gradients
// into parameter updates.
//
// What's in this layer:
//
//   model.rs      — U-Net: double convs, four down steps, four up
//                   steps (transposed conv or bilinear), skip
//                   concatenation, 1x1 output conv
//
//   loss.rs       — BCE-with-logits + Dice (binary) or
//                   cross-entropy + Dice (multiclass)
//
//   scaler.rs     — dynamic loss scaling, overflow detection and
//                   global-norm gradient clipping
//
//   optimizer.rs  — RMSProp / Adam selection, made once
//
//   scheduler.rs  — reduce-on-plateau learning rate
//
//   evaluator.rs  — hard-prediction validation Dice
//
//   export.rs     — logits → black/white mask for snapshots
//
//   trainer.rs    — the training loop itself
//
// Reference: Burn Book §3 (Building Blocks)
//            Burn Book §5 (Training)
//            Ronneberger et al. (2015) U-Net

/// U-Net segmentation model
pub mod model;

/// Pixel classification + Dice loss
pub mod loss;

/// Loss scaling and gradient clipping
pub mod scaler;

/// Optimizer selection
pub mod optimizer;

/// Plateau learning-rate scheduler
pub mod scheduler;

/// Validation Dice score
pub mod evaluator;

/// Prediction rendering for snapshots
pub mod export;

/// Full training loop with periodic validation and checkpointing
pub mod trainer;
