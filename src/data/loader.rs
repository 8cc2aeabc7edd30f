// ============================================================
// Layer 4 — Data Loaders
// ============================================================
// Wraps each partition in a Burn DataLoader over sample indices.
//
//   train loader      — the whole partition is reshuffled with a
//                       seeded RNG on every call to `.iter()`
//                       (once per epoch)
//   validation loader — fixed order, trailing partial batch dropped,
//                       built on the inner (non-autodiff) backend
//
// The burn loaders themselves stay single-threaded: a multi-worker
// burn loader cuts the index list into per-worker blocks, each
// ending in its own partial batch and arriving out of order.
// Parallelism lives in the batcher instead: `num_workers` threads
// in a rayon pool decode the samples of one batch at a time.
//
// Reference: Burn Book §4 (DataLoaderBuilder)

use anyhow::{Context, Result};
use burn::{
    data::dataloader::{DataLoader, DataLoaderBuilder},
    prelude::*,
    tensor::backend::AutodiffBackend,
};
use rayon::{ThreadPool, ThreadPoolBuilder};
use std::sync::Arc;

use crate::data::{
    batcher::{SegmentationBatch, SegmentationBatcher},
    dataset::{SampleIndices, SegmentationDataset},
    splitter::Split,
};

#[derive(Debug, Clone, Copy)]
pub struct LoaderOptions {
    pub batch_size:   usize,
    /// Decode threads; 0 decodes on the calling thread.
    pub num_workers:  usize,
    pub shuffle_seed: u64,
}

pub struct Loaders<B: AutodiffBackend> {
    pub train: Arc<dyn DataLoader<SegmentationBatch<B>>>,
    pub valid: Arc<dyn DataLoader<SegmentationBatch<B::InnerBackend>>>,
}

/// Rayon pool for sample decoding, or None when `num_workers` is 0.
pub fn decode_pool(num_workers: usize) -> Result<Option<Arc<ThreadPool>>> {
    if num_workers == 0 {
        return Ok(None);
    }
    let pool = ThreadPoolBuilder::new()
        .num_threads(num_workers)
        .thread_name(|i| format!("decode-{i}"))
        .build()
        .context("failed to start the decode thread pool")?;
    Ok(Some(Arc::new(pool)))
}

/// Build both loaders over one shared dataset and decode pool.
pub fn build_loaders<B: AutodiffBackend>(
    dataset: Arc<SegmentationDataset>,
    split:   &Split,
    opts:    LoaderOptions,
    device:  &B::Device,
) -> Result<Loaders<B>> {
    let batch_size = opts.batch_size.max(1);
    let pool       = decode_pool(opts.num_workers)?;

    let batcher = SegmentationBatcher::<B>::new(dataset.clone(), pool.clone(), device.clone());
    let train = DataLoaderBuilder::new(batcher)
        .batch_size(batch_size)
        .shuffle(opts.shuffle_seed)
        .build(SampleIndices::new(split.train.clone()));

    let valid = validation_loader::<B::InnerBackend>(dataset, split, batch_size, pool, device);

    Ok(Loaders { train, valid })
}

/// Fixed-order loader over the validation partition.
pub fn build_validation_loader<B: Backend>(
    dataset: Arc<SegmentationDataset>,
    split:   &Split,
    opts:    LoaderOptions,
    device:  &B::Device,
) -> Result<Arc<dyn DataLoader<SegmentationBatch<B>>>> {
    let pool = decode_pool(opts.num_workers)?;
    Ok(validation_loader::<B>(dataset, split, opts.batch_size.max(1), pool, device))
}

fn validation_loader<B: Backend>(
    dataset:    Arc<SegmentationDataset>,
    split:      &Split,
    batch_size: usize,
    pool:       Option<Arc<ThreadPool>>,
    device:     &B::Device,
) -> Arc<dyn DataLoader<SegmentationBatch<B>>> {
    let valid_set = SampleIndices::new(split.validation.clone()).drop_last(batch_size);
    if valid_set.indices().is_empty() {
        tracing::warn!(
            "Validation set has fewer than {} samples; validation Dice will be 0",
            batch_size
        );
    }

    DataLoaderBuilder::new(SegmentationBatcher::<B>::new(dataset, pool, device.clone()))
        .batch_size(batch_size)
        .build(valid_set)
}
