// ============================================================
// Layer 4 — Data Pipeline
// ============================================================
// This layer takes two folders of files all the way to
// device-ready tensor batches.
//
// The pipeline flows in this order:
//
//   imgs/ + masks/
//       │
//       ▼
//   SegmentationDataset → pairs images with masks, builds the legend
//       │                  (strict Carvana naming, else Basic naming)
//       ▼
//   Preprocessor        → rescales, CHW floats, pixel values → class ids
//       │
//       ▼
//   split_indices       → seeded train / validation partition
//       │
//       ▼
//   SampleIndices       → one index list per partition (burn Dataset)
//       │
//       ▼
//   DataLoader          → shuffled train batches, fixed-order validation
//       │
//       ▼
//   SegmentationBatcher → decodes the batch's samples on a rayon pool,
//                         stacks them into [B,C,H,W] / [B,H,W]
//
// Reference: Burn Book §4 (Datasets and Dataloaders)

/// Image + mask folder dataset with the strict/permissive variants
pub mod dataset;

/// Resizing and tensor layout for images and masks
pub mod preprocessor;

/// Seeded train/validation partition
pub mod splitter;

/// Implements Burn's Batcher trait to create tensor batches
pub mod batcher;

/// Builds the train and validation DataLoaders
pub mod loader;
