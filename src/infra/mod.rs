// ============================================================
// Layer 6 — Infrastructure Layer
// ============================================================
// Everything that touches the disk on behalf of a run:
//
//   workspace.rs   — Run directories
//                    outputs/<run> and checkpoints/<run>
//                    under the output root.
//
//   checkpoint.rs  — Saving and loading model weights
//                    Burn's named MessagePack recorder,
//                    model record + mask legend per file.
//                    Also saves/loads TrainConfig as JSON.
//
//   metrics.rs     — Experiment logging
//                    Per-step and per-validation CSVs plus
//                    PNG snapshots of predictions.
//
// Reference: Rust Book §7 (Modules)
//            Burn Book §5 (Checkpointing)

/// Per-run output and checkpoint directories
pub mod workspace;

/// Model checkpoint saving and loading
pub mod checkpoint;

/// Step / validation CSV logs and image snapshots
pub mod metrics;
